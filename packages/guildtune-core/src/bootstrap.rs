//! Application bootstrap and dependency wiring.
//!
//! This module contains the composition root - the single place where all
//! services are instantiated and wired together. The external collaborators
//! (resolver, voice transport, audio launcher, storage probe) are passed in,
//! so the server binary supplies the real adapters and tests supply mocks.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::api::AppState;
use crate::audio::{AudioLauncher, AudioSupervisor};
use crate::constants::SHUTDOWN_DRAIN_TIMEOUT_SECS;
use crate::error::{GuildtuneError, GuildtuneResult};
use crate::events::{BroadcastEventBridge, EventEmitter, LoggingEventEmitter};
use crate::resolver::{CachedResolver, TrackResolver};
use crate::runtime::TaskSpawner;
use crate::services::{MaintenanceService, MusicService, Player, StorageProbe};
use crate::session::SessionRegistry;
use crate::state::Config;
use crate::transport::{ConnectionManager, VoiceTransport};

/// External systems the orchestrator drives.
pub struct Collaborators {
    pub resolver: Arc<dyn TrackResolver>,
    pub transport: Arc<dyn VoiceTransport>,
    pub launcher: Arc<dyn AudioLauncher>,
    pub storage: Arc<dyn StorageProbe>,
    /// Tracks every background task, including those the adapters spawn.
    pub spawner: TaskSpawner,
}

/// Container for all bootstrapped services.
#[derive(Clone)]
pub struct BootstrappedServices {
    /// Validated core configuration.
    pub config: Arc<Config>,
    /// Room sessions by id.
    pub registry: Arc<SessionRegistry>,
    /// Caching front of the resolver.
    pub resolver: Arc<CachedResolver>,
    /// Playback loop driver.
    pub player: Arc<Player>,
    /// Room commands.
    pub music: Arc<MusicService>,
    /// Event bridge for emitting events to WebSocket and optional external consumers.
    pub event_bridge: Arc<BroadcastEventBridge>,
    /// Periodic sweep of sessions and cache.
    pub maintenance: Arc<MaintenanceService>,
    /// Task spawner for background operations.
    pub spawner: TaskSpawner,
    /// Cancellation token for graceful shutdown.
    pub cancel_token: CancellationToken,
}

impl BootstrappedServices {
    /// Starts background loops that run for the life of the process.
    pub fn start_background_tasks(&self) {
        Arc::clone(&self.maintenance).start(&self.spawner);
        log::info!(
            "[Bootstrap] Maintenance started (every {:?})",
            self.config.sweep_interval()
        );
    }

    /// Builds the state shared by HTTP and WebSocket handlers.
    pub fn app_state(&self) -> AppState {
        AppState {
            music: Arc::clone(&self.music),
            event_bridge: Arc::clone(&self.event_bridge),
            config: Arc::clone(&self.config),
            shutdown: self.cancel_token.clone(),
        }
    }

    /// Initiates graceful shutdown of all services.
    ///
    /// New sessions are refused, background loops are cancelled, every room
    /// is disconnected and the cache dropped. Then waits (bounded) for
    /// in-flight room tasks. Returns `false` if some tasks outlived the wait.
    pub async fn shutdown(&self) -> bool {
        log::info!("[Bootstrap] Beginning graceful shutdown...");

        self.registry.stop_accepting();
        self.cancel_token.cancel();

        let sessions = self.registry.clear_all().await;
        log::info!("[Bootstrap] Closed {} session(s)", sessions);

        self.resolver.clear();

        let drained = self
            .spawner
            .drain(Duration::from_secs(SHUTDOWN_DRAIN_TIMEOUT_SECS))
            .await;
        if drained {
            log::info!("[Bootstrap] Shutdown complete");
        } else {
            log::warn!(
                "[Bootstrap] Shutdown timed out with {} task(s) still running",
                self.spawner.active_tasks()
            );
        }
        drained
    }
}

/// Bootstraps all application services with their dependencies.
///
/// Services are created in dependency order:
///
/// 1. Shared infrastructure (spawner, cancellation token, event bridge)
/// 2. Caching resolver and session registry
/// 3. Connection manager and audio supervisor
/// 4. Player (depends on all of the above)
/// 5. Music service and maintenance
///
/// # Errors
///
/// Returns [`GuildtuneError::Configuration`] if `config` fails validation.
pub fn bootstrap_services(
    config: Config,
    collaborators: Collaborators,
) -> GuildtuneResult<BootstrappedServices> {
    config.validate().map_err(GuildtuneError::Configuration)?;
    let config = Arc::new(config);

    let spawner = collaborators.spawner;
    let cancel_token = CancellationToken::new();

    let event_bridge = Arc::new(BroadcastEventBridge::new(config.event_channel_capacity));
    event_bridge.set_external_emitter(Arc::new(LoggingEventEmitter));
    let emitter = Arc::clone(&event_bridge) as Arc<dyn EventEmitter>;

    let resolver = Arc::new(CachedResolver::new(collaborators.resolver, &config));
    let registry = Arc::new(SessionRegistry::new(&config));

    let connections = ConnectionManager::new(
        collaborators.transport,
        config.connect_policy(),
        config.connect_settle(),
    );
    let audio = AudioSupervisor::new(
        collaborators.launcher,
        config.audio_start_policy(),
        config.kill_grace(),
        spawner.clone(),
    );

    let player = Arc::new(Player::new(
        Arc::clone(&resolver) as Arc<dyn TrackResolver>,
        connections,
        audio,
        collaborators.storage,
        Arc::clone(&emitter),
        spawner.clone(),
        &config,
    ));

    let music = Arc::new(MusicService::new(
        Arc::clone(&registry),
        Arc::clone(&resolver),
        Arc::clone(&player),
        Arc::clone(&emitter),
    ));

    let maintenance = Arc::new(MaintenanceService::new(
        Arc::clone(&registry),
        Arc::clone(&resolver),
        emitter,
        config.sweep_interval(),
        config.stale_session_after(),
        cancel_token.clone(),
    ));

    log::info!(
        "[Bootstrap] Services ready (queue capacity {}, hard cap {:?}, idle timeout {:?})",
        config.queue_capacity,
        config.hard_cap(),
        config.idle_timeout()
    );

    Ok(BootstrappedServices {
        config,
        registry,
        resolver,
        player,
        music,
        event_bridge,
        maintenance,
        spawner,
        cancel_token,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::tests::MockLauncher;
    use crate::events::{BroadcastEvent, PlaybackEvent};
    use crate::services::player::tests::{EchoResolver, FixedProbe};
    use crate::services::{CommandError, StorageStatus};
    use crate::transport::tests::MockTransport;

    fn collaborators() -> Collaborators {
        Collaborators {
            resolver: Arc::new(EchoResolver),
            transport: Arc::new(MockTransport::default()),
            launcher: Arc::new(MockLauncher::default()),
            storage: Arc::new(FixedProbe(StorageStatus::Ok { free_bytes: u64::MAX })),
            spawner: TaskSpawner::current(),
        }
    }

    #[tokio::test]
    async fn invalid_config_is_rejected() {
        let config = Config {
            queue_capacity: 0,
            ..Config::for_test()
        };
        let result = bootstrap_services(config, collaborators());
        assert!(matches!(result, Err(GuildtuneError::Configuration(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn events_reach_subscribers_and_shutdown_drains() {
        let services = bootstrap_services(Config::for_test(), collaborators()).unwrap();
        services.start_background_tasks();
        let mut events = services.event_bridge.subscribe();

        services
            .music
            .enqueue_request("guild-1", "general", "song")
            .await
            .unwrap();

        let event = events.recv().await.unwrap();
        assert!(matches!(
            event,
            BroadcastEvent::Playback(PlaybackEvent::NowPlaying { ref title, .. }) if title == "song"
        ));

        assert!(services.shutdown().await);
        assert!(services.app_state().shutdown.is_cancelled());
        assert_eq!(services.registry.len(), 0);
        assert_eq!(
            services
                .music
                .enqueue_request("guild-1", "general", "again")
                .await
                .unwrap_err(),
            CommandError::ShuttingDown
        );
    }
}
