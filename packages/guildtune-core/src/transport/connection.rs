//! Room-facing connection management on top of a [`VoiceTransport`].

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use super::{TransportError, VoiceConnection, VoiceTransport};
use crate::retry::RetryPolicy;

/// Errors surfaced to the playback loop when a room cannot get a connection.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConnectionError {
    /// Every fresh-connect attempt failed.
    #[error("Failed to connect after {attempts} attempt(s): {last}")]
    Exhausted { attempts: u32, last: String },

    /// The room has no connection or no channel to connect to.
    #[error("Not connected to a voice channel")]
    NotConnected,

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Ensures a room is connected to the requested channel.
pub struct ConnectionManager {
    transport: Arc<dyn VoiceTransport>,
    policy: RetryPolicy,
    settle: Duration,
}

impl ConnectionManager {
    pub fn new(transport: Arc<dyn VoiceTransport>, policy: RetryPolicy, settle: Duration) -> Self {
        Self {
            transport,
            policy,
            settle,
        }
    }

    /// Returns a connection attached to `channel`.
    ///
    /// - A live `existing` connection on the same channel is returned as is.
    /// - A live connection on another channel is moved; if the move fails it is
    ///   force-disconnected and a fresh connection is made.
    /// - Fresh connects follow the retry policy and wait for the settle delay
    ///   after success.
    pub async fn connect(
        &self,
        existing: Option<Arc<dyn VoiceConnection>>,
        channel: &str,
    ) -> Result<Arc<dyn VoiceConnection>, ConnectionError> {
        if let Some(connection) = existing {
            if connection.is_connected() {
                if connection.channel() == channel {
                    return Ok(connection);
                }

                match connection.move_to(channel).await {
                    Ok(()) => {
                        log::info!("[Connection] Moved to channel {}", channel);
                        tokio::time::sleep(self.settle).await;
                        return Ok(connection);
                    }
                    Err(e) => {
                        log::warn!(
                            "[Connection] Move to {} failed, reconnecting: {}",
                            channel,
                            e
                        );
                        if let Err(e) = connection.disconnect(true).await {
                            log::debug!("[Connection] Force disconnect after failed move: {}", e);
                        }
                    }
                }
            }
        }

        self.connect_fresh(channel).await
    }

    async fn connect_fresh(
        &self,
        channel: &str,
    ) -> Result<Arc<dyn VoiceConnection>, ConnectionError> {
        let timeout = self
            .policy
            .attempt_timeout
            .unwrap_or(Duration::from_secs(crate::constants::DEFAULT_CONNECT_TIMEOUT_SECS));
        let transport = &self.transport;
        let policy = &self.policy;
        let settle = self.settle;

        let connection = policy
            .run("voice connect", |attempt| async move {
                log::debug!("[Connection] Connecting to {} (attempt {})", channel, attempt);
                let connection = policy
                    .timed(transport.connect(channel, timeout))
                    .await
                    .map_err(|e| e.to_string())?;

                tokio::time::sleep(settle).await;
                if connection.is_connected() {
                    Ok(connection)
                } else {
                    Err("connection dropped while settling".to_string())
                }
            })
            .await
            .map_err(|exhausted| ConnectionError::Exhausted {
                attempts: exhausted.attempts,
                last: exhausted.last,
            })?;

        log::info!("[Connection] Connected to channel {}", channel);
        Ok(connection)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio::time::Instant;

    pub(crate) struct MockConnection {
        channel: Mutex<String>,
        connected: AtomicBool,
        fail_move: bool,
        pub moves: AtomicUsize,
        pub disconnects: AtomicUsize,
    }

    impl MockConnection {
        pub(crate) fn new(channel: &str) -> Self {
            Self {
                channel: Mutex::new(channel.to_string()),
                connected: AtomicBool::new(true),
                fail_move: false,
                moves: AtomicUsize::new(0),
                disconnects: AtomicUsize::new(0),
            }
        }

        pub(crate) fn drop_link(&self) {
            self.connected.store(false, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl VoiceConnection for MockConnection {
        fn channel(&self) -> String {
            self.channel.lock().clone()
        }

        fn sink_url(&self) -> String {
            format!("udp://sink/{}", self.channel.lock())
        }

        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }

        async fn move_to(&self, channel: &str) -> Result<(), TransportError> {
            self.moves.fetch_add(1, Ordering::SeqCst);
            if self.fail_move {
                return Err(TransportError::Unreachable(channel.into()));
            }
            *self.channel.lock() = channel.to_string();
            Ok(())
        }

        async fn disconnect(&self, _force: bool) -> Result<(), TransportError> {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
            self.connected.store(false, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Transport that fails a configurable number of times, or hangs forever.
    #[derive(Default)]
    pub(crate) struct MockTransport {
        pub failures: AtomicUsize,
        pub hang: AtomicBool,
        pub calls: AtomicUsize,
        /// Every connection handed out, oldest first.
        pub opened: Mutex<Vec<Arc<MockConnection>>>,
    }

    impl MockTransport {
        pub(crate) fn failing(times: usize) -> Self {
            Self {
                failures: AtomicUsize::new(times),
                ..Self::default()
            }
        }

        pub(crate) fn opened(&self) -> Vec<Arc<MockConnection>> {
            self.opened.lock().clone()
        }
    }

    #[async_trait]
    impl VoiceTransport for MockTransport {
        async fn connect(
            &self,
            channel: &str,
            _timeout: Duration,
        ) -> Result<Arc<dyn VoiceConnection>, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.hang.load(Ordering::SeqCst) {
                std::future::pending::<()>().await;
            }
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err(TransportError::Unreachable("connection refused".into()));
            }
            let connection = Arc::new(MockConnection::new(channel));
            self.opened.lock().push(connection.clone());
            Ok(connection as Arc<dyn VoiceConnection>)
        }
    }

    fn manager(transport: Arc<MockTransport>) -> ConnectionManager {
        ConnectionManager::new(
            transport,
            crate::state::Config::default().connect_policy(),
            Duration::from_secs(1),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn fresh_connect_waits_for_settle() {
        let transport = Arc::new(MockTransport::default());
        let start = Instant::now();

        let connection = manager(transport.clone())
            .connect(None, "general")
            .await
            .unwrap();

        assert_eq!(connection.channel(), "general");
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
        assert_eq!(start.elapsed(), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn three_failures_exhaust_with_last_error() {
        let transport = Arc::new(MockTransport::failing(3));
        let start = Instant::now();

        let result = manager(transport.clone()).connect(None, "general").await;

        match result {
            Err(ConnectionError::Exhausted { attempts, last }) => {
                assert_eq!(attempts, 3);
                assert!(last.contains("connection refused"));
            }
            other => panic!("expected exhaustion, got {:?}", other.map(|c| c.channel())),
        }
        assert_eq!(transport.calls.load(Ordering::SeqCst), 3);
        assert_eq!(start.elapsed(), Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_after_transient_failures() {
        let transport = Arc::new(MockTransport::failing(2));

        let connection = manager(transport.clone()).connect(None, "general").await;

        assert!(connection.is_ok());
        assert_eq!(transport.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_attempts_time_out() {
        let transport = Arc::new(MockTransport::default());
        transport.hang.store(true, Ordering::SeqCst);
        let start = Instant::now();

        let result = manager(transport.clone()).connect(None, "general").await;

        match result {
            Err(ConnectionError::Exhausted { attempts, last }) => {
                assert_eq!(attempts, 3);
                assert!(last.contains("timed out"));
            }
            other => panic!("expected timeout, got {:?}", other.map(|c| c.channel())),
        }
        assert_eq!(start.elapsed(), Duration::from_secs(3 * 20 + 2 * 2));
    }

    #[tokio::test(start_paused = true)]
    async fn reuses_connection_on_same_channel() {
        let transport = Arc::new(MockTransport::default());
        let existing: Arc<dyn VoiceConnection> = Arc::new(MockConnection::new("general"));

        let connection = manager(transport.clone())
            .connect(Some(existing.clone()), "general")
            .await
            .unwrap();

        assert!(Arc::ptr_eq(&connection, &existing));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn moves_connection_to_other_channel() {
        let transport = Arc::new(MockTransport::default());
        let existing = Arc::new(MockConnection::new("general"));

        let connection = manager(transport.clone())
            .connect(Some(existing.clone() as Arc<dyn VoiceConnection>), "music")
            .await
            .unwrap();

        assert_eq!(connection.channel(), "music");
        assert_eq!(existing.moves.load(Ordering::SeqCst), 1);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_move_force_disconnects_and_reconnects() {
        let transport = Arc::new(MockTransport::default());
        let mut existing = MockConnection::new("general");
        existing.fail_move = true;
        let existing = Arc::new(existing);

        let connection = manager(transport.clone())
            .connect(Some(existing.clone() as Arc<dyn VoiceConnection>), "music")
            .await
            .unwrap();

        assert_eq!(connection.channel(), "music");
        assert_eq!(existing.disconnects.load(Ordering::SeqCst), 1);
        assert!(!existing.is_connected());
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn dead_existing_connection_is_replaced() {
        let transport = Arc::new(MockTransport::default());
        let existing = Arc::new(MockConnection::new("general"));
        existing.drop_link();

        let connection = manager(transport.clone())
            .connect(Some(existing.clone() as Arc<dyn VoiceConnection>), "general")
            .await
            .unwrap();

        assert!(connection.is_connected());
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    }
}
