//! Periodic maintenance: expired cache entries and stale or orphaned sessions.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::events::{EventEmitter, RemovalReason, RoomEvent};
use crate::resolver::CachedResolver;
use crate::runtime::TaskSpawner;
use crate::session::{SessionRegistry, SweepReport};
use crate::utils::now_millis;

/// What one maintenance pass removed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MaintenanceReport {
    pub cache_evicted: usize,
    pub sessions: SweepReport,
}

/// Runs the registry sweep and cache sweep on a fixed interval.
pub struct MaintenanceService {
    registry: Arc<SessionRegistry>,
    resolver: Arc<CachedResolver>,
    emitter: Arc<dyn EventEmitter>,
    interval: Duration,
    stale_after: Duration,
    cancel_token: CancellationToken,
}

impl MaintenanceService {
    pub fn new(
        registry: Arc<SessionRegistry>,
        resolver: Arc<CachedResolver>,
        emitter: Arc<dyn EventEmitter>,
        interval: Duration,
        stale_after: Duration,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            registry,
            resolver,
            emitter,
            interval,
            stale_after,
            cancel_token,
        }
    }

    /// One maintenance pass.
    pub async fn sweep_once(&self) -> MaintenanceReport {
        let cache_evicted = self.resolver.sweep();
        let sessions = self.registry.sweep(self.stale_after).await;

        let removed = sessions
            .stale
            .iter()
            .map(|room| (room, RemovalReason::Stale))
            .chain(sessions.orphaned.iter().map(|room| (room, RemovalReason::Orphaned)));
        for (room_id, reason) in removed {
            self.emitter.emit_room(RoomEvent::SessionRemoved {
                room_id: room_id.clone(),
                reason,
                timestamp: now_millis(),
            });
        }

        if cache_evicted > 0 || sessions.removed() > 0 {
            log::info!(
                "[Maintenance] Evicted {} cache entr(ies), removed {} session(s) ({} teardown error(s))",
                cache_evicted,
                sessions.removed(),
                sessions.errors
            );
        }
        MaintenanceReport {
            cache_evicted,
            sessions,
        }
    }

    /// Starts the background loop. It stops when the cancellation token fires.
    pub fn start(self: Arc<Self>, spawner: &TaskSpawner) {
        let cancel_token = self.cancel_token.clone();
        spawner.spawn(async move {
            let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel_token.cancelled() => {
                        log::info!("[Maintenance] Shutting down maintenance loop");
                        break;
                    }
                    _ = ticker.tick() => {}
                }
                self.sweep_once().await;
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::RecordingEmitter;
    use crate::resolver::{QueueItem, Track, TrackResolver};
    use crate::services::player::tests::EchoResolver;
    use crate::state::Config;

    fn service(emitter: Arc<RecordingEmitter>, token: CancellationToken) -> Arc<MaintenanceService> {
        let config = Config::for_test();
        Arc::new(MaintenanceService::new(
            Arc::new(SessionRegistry::new(&config)),
            Arc::new(CachedResolver::new(Arc::new(EchoResolver), &config)),
            emitter,
            config.sweep_interval(),
            config.stale_session_after(),
            token,
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn loop_sweeps_every_interval_until_cancelled() {
        let emitter = Arc::new(RecordingEmitter::default());
        let token = CancellationToken::new();
        let maintenance = service(emitter.clone(), token.clone());
        let spawner = TaskSpawner::current();

        maintenance.resolver.resolve("song", false).await.unwrap();
        let idle = maintenance.registry.get_or_create("idle").unwrap();
        let busy = maintenance.registry.get_or_create("busy").unwrap();
        busy.enqueue(vec![QueueItem::Track(Track::new("u", "t"))]).await;

        maintenance.clone().start(&spawner);

        // Keep "busy" active while "idle" ages past the stale threshold.
        for _ in 0..13 {
            tokio::time::sleep(Duration::from_secs(300)).await;
            busy.touch();
        }
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert!(idle.is_closed());
        assert!(maintenance.registry.get("idle").is_none());
        assert!(maintenance.registry.get("busy").is_some());
        assert_eq!(maintenance.resolver.cached_len(), 0);
        assert!(matches!(
            emitter.room().as_slice(),
            [RoomEvent::SessionRemoved {
                reason: RemovalReason::Stale,
                ..
            }]
        ));

        token.cancel();
        assert!(spawner.drain(Duration::from_secs(1)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_once_reports_nothing_on_a_fresh_registry() {
        let emitter = Arc::new(RecordingEmitter::default());
        let maintenance = service(emitter.clone(), CancellationToken::new());

        let report = maintenance.sweep_once().await;

        assert_eq!(report, MaintenanceReport::default());
        assert!(emitter.room().is_empty());
    }
}
