//! Process-wide map from room id to [`RoomSession`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;

use super::room::{EnqueueThrottle, RoomId, RoomSession, RoomSummary};
use crate::state::Config;

/// Outcome of one sweep pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    /// Rooms removed for inactivity.
    pub stale: Vec<RoomId>,
    /// Rooms removed because their connection died while idle.
    pub orphaned: Vec<RoomId>,
    /// Rooms whose teardown reported an error (still removed).
    pub errors: usize,
}

impl SweepReport {
    pub fn removed(&self) -> usize {
        self.stale.len() + self.orphaned.len()
    }
}

/// Registry of live room sessions.
///
/// Sessions are created lazily on first lookup. Removal always quiesces the
/// session first (playback drained, connection closed).
pub struct SessionRegistry {
    sessions: DashMap<RoomId, Arc<RoomSession>>,
    accepting: AtomicBool,
    capacity: usize,
    throttle: EnqueueThrottle,
}

impl SessionRegistry {
    pub fn new(config: &Config) -> Self {
        Self {
            sessions: DashMap::new(),
            accepting: AtomicBool::new(true),
            capacity: config.queue_capacity,
            throttle: config.enqueue_throttle(),
        }
    }

    /// Queue capacity given to new sessions.
    pub fn queue_capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the room's session, creating it if needed.
    ///
    /// Returns `None` once the registry stopped accepting sessions. A session
    /// that is being torn down is replaced by a fresh one.
    pub fn get_or_create(&self, room_id: &str) -> Option<Arc<RoomSession>> {
        if !self.is_accepting() {
            return None;
        }

        let new_session = || Arc::new(RoomSession::new(room_id, self.capacity, self.throttle));
        let mut entry = self
            .sessions
            .entry(room_id.to_string())
            .or_insert_with(|| {
                log::info!("[Registry] Created session for room {}", room_id);
                new_session()
            });
        if entry.is_closed() {
            log::debug!("[Registry] Replacing closed session for room {}", room_id);
            *entry = new_session();
        }
        Some(entry.clone())
    }

    pub fn get(&self, room_id: &str) -> Option<Arc<RoomSession>> {
        self.sessions.get(room_id).map(|entry| entry.clone())
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn all(&self) -> Vec<Arc<RoomSession>> {
        self.sessions
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn summaries(&self) -> Vec<RoomSummary> {
        let mut summaries: Vec<RoomSummary> =
            self.sessions.iter().map(|entry| entry.summary()).collect();
        summaries.sort_by(|a, b| a.room_id.cmp(&b.room_id));
        summaries
    }

    /// Quiesces and removes one room. Returns `false` if it did not exist.
    pub async fn remove(&self, room_id: &str) -> bool {
        let Some(session) = self.get(room_id) else {
            return false;
        };
        if let Err(e) = session.close().await {
            log::warn!("[Registry] Teardown of room {} failed: {}", room_id, e);
        }
        self.detach(&session)
    }

    /// Removes the map entry only if it still points at `session`.
    fn detach(&self, session: &Arc<RoomSession>) -> bool {
        self.sessions
            .remove_if(session.id(), |_, current| Arc::ptr_eq(current, session))
            .is_some()
    }

    /// Removes stale and orphaned sessions.
    ///
    /// A session is stale when its last activity is older than `stale_after`,
    /// orphaned when its connection died while it is neither playing nor
    /// holding queued items. A failing teardown is logged and counted; the
    /// sweep continues with the remaining sessions.
    pub async fn sweep(&self, stale_after: Duration) -> SweepReport {
        let mut report = SweepReport::default();

        for session in self.all() {
            let stale = session.last_activity().elapsed() > stale_after;
            let orphaned = !stale && session.is_orphaned();
            if !stale && !orphaned {
                continue;
            }

            if let Err(e) = session.close().await {
                log::warn!(
                    "[Registry] Sweep teardown of room {} failed: {}",
                    session.id(),
                    e
                );
                report.errors += 1;
            }
            if !self.detach(&session) {
                continue;
            }

            let room_id = session.id().to_string();
            if stale {
                log::info!("[Registry] Removed stale session {}", room_id);
                report.stale.push(room_id);
            } else {
                log::info!("[Registry] Removed orphaned session {}", room_id);
                report.orphaned.push(room_id);
            }
        }

        report
    }

    /// Rejects new sessions from now on.
    pub fn stop_accepting(&self) {
        self.accepting.store(false, Ordering::SeqCst);
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    /// Quiesces and removes every session. Returns how many were removed.
    pub async fn clear_all(&self) -> usize {
        let sessions = self.all();
        let count = sessions.len();

        let closing = sessions.iter().map(|session| async move {
            if let Err(e) = session.close().await {
                log::warn!("[Registry] Teardown of room {} failed: {}", session.id(), e);
            }
            self.detach(session);
        });
        futures::future::join_all(closing).await;

        if count > 0 {
            log::info!("[Registry] Cleared {} session(s)", count);
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::{QueueItem, Track};
    use crate::transport::tests::MockConnection;
    use crate::transport::{TransportError, VoiceConnection};
    use async_trait::async_trait;

    fn registry() -> SessionRegistry {
        SessionRegistry::new(&Config::for_test())
    }

    fn track() -> Vec<QueueItem> {
        vec![QueueItem::Track(Track::new("https://cdn/a", "A"))]
    }

    /// Connection whose disconnect always fails.
    struct StuckConnection;

    #[async_trait]
    impl VoiceConnection for StuckConnection {
        fn channel(&self) -> String {
            "stuck".into()
        }

        fn sink_url(&self) -> String {
            "udp://stuck".into()
        }

        fn is_connected(&self) -> bool {
            false
        }

        async fn move_to(&self, _: &str) -> Result<(), TransportError> {
            Err(TransportError::Closed)
        }

        async fn disconnect(&self, _: bool) -> Result<(), TransportError> {
            Err(TransportError::Other("socket wedged".into()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn lookup_creates_once() {
        let registry = registry();
        let a = registry.get_or_create("guild-1").unwrap();
        let b = registry.get_or_create("guild-1").unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);
        assert!(registry.get("guild-2").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn closed_session_is_replaced_on_lookup() {
        let registry = registry();
        let old = registry.get_or_create("guild-1").unwrap();
        old.close().await.unwrap();

        let fresh = registry.get_or_create("guild-1").unwrap();
        assert!(!Arc::ptr_eq(&old, &fresh));
        assert!(!fresh.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn rejects_sessions_after_stop_accepting() {
        let registry = registry();
        registry.stop_accepting();
        assert!(registry.get_or_create("guild-1").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_removes_stale_and_orphaned_only() {
        let registry = registry();

        let stale = registry.get_or_create("stale").unwrap();
        let stale_link = Arc::new(MockConnection::new("general"));
        stale
            .set_connection(Some(stale_link.clone() as Arc<dyn VoiceConnection>))
            .await;

        tokio::time::sleep(Duration::from_secs(3601)).await;

        let orphan = registry.get_or_create("orphan").unwrap();
        let orphan_link = Arc::new(MockConnection::new("general"));
        orphan
            .set_connection(Some(orphan_link.clone() as Arc<dyn VoiceConnection>))
            .await;
        orphan_link.drop_link();

        let busy = registry.get_or_create("busy").unwrap();
        let busy_link = Arc::new(MockConnection::new("general"));
        busy.set_connection(Some(busy_link.clone() as Arc<dyn VoiceConnection>))
            .await;
        busy_link.drop_link();
        busy.enqueue(track()).await;

        registry.get_or_create("fresh").unwrap();

        let report = registry.sweep(Duration::from_secs(3600)).await;

        assert_eq!(report.stale, vec!["stale".to_string()]);
        assert_eq!(report.orphaned, vec!["orphan".to_string()]);
        assert_eq!(report.errors, 0);
        assert!(!stale_link.is_connected());
        assert!(stale.is_closed());
        assert!(registry.get("busy").is_some());
        assert!(registry.get("fresh").is_some());
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_continues_past_a_failing_teardown() {
        let registry = registry();
        let wedged = registry.get_or_create("wedged").unwrap();
        wedged
            .set_connection(Some(Arc::new(StuckConnection) as Arc<dyn VoiceConnection>))
            .await;
        let other = registry.get_or_create("other").unwrap();
        let link = Arc::new(MockConnection::new("general"));
        other
            .set_connection(Some(link.clone() as Arc<dyn VoiceConnection>))
            .await;
        link.drop_link();

        let report = registry.sweep(Duration::from_secs(3600)).await;

        assert_eq!(report.removed(), 2);
        assert_eq!(report.errors, 1);
        assert!(registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn clear_all_disconnects_everything() {
        let registry = registry();
        let mut links = Vec::new();
        for room in ["a", "b", "c"] {
            let session = registry.get_or_create(room).unwrap();
            let link = Arc::new(MockConnection::new("general"));
            session
                .set_connection(Some(link.clone() as Arc<dyn VoiceConnection>))
                .await;
            session.enqueue(track()).await;
            links.push(link);
        }

        assert_eq!(registry.clear_all().await, 3);

        assert!(registry.is_empty());
        assert!(links.iter().all(|link| !link.is_connected()));
    }

    #[tokio::test(start_paused = true)]
    async fn remove_only_detaches_the_same_session() {
        let registry = registry();
        registry.get_or_create("guild-1").unwrap();

        assert!(registry.remove("guild-1").await);
        assert!(!registry.remove("guild-1").await);
        assert!(registry.is_empty());
    }
}
