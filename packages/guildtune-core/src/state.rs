//! Core configuration.
//!
//! [`Config`] holds every tunable of the orchestrator. The server binary builds
//! one from YAML, environment and CLI input; tests usually start from
//! `Config::default()` and disable the enqueue throttle.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::*;
use crate::retry::RetryPolicy;
use crate::session::EnqueueThrottle;

/// Configuration for the guildtune orchestrator.
///
/// All fields have sensible defaults.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    // Queue
    /// Maximum queued items per room (ready tracks plus pending playlist entries).
    pub queue_capacity: usize,

    /// Lower bound of the delay applied before each track is enqueued (milliseconds).
    pub enqueue_delay_min_ms: u64,

    /// Upper bound of the delay applied before each track is enqueued (milliseconds).
    pub enqueue_delay_max_ms: u64,

    // Voice connection
    pub connect_attempts: u32,
    pub connect_timeout_secs: u64,
    pub connect_retry_delay_ms: u64,

    /// Settle delay after a connect or move before audio starts (milliseconds).
    pub connect_settle_ms: u64,

    // Audio process
    pub audio_start_attempts: u32,
    pub audio_start_timeout_secs: u64,
    pub audio_start_retry_delay_ms: u64,

    /// Grace period between terminate and kill (seconds).
    pub audio_kill_grace_secs: u64,

    /// Hard playback cap per track (seconds).
    pub hard_cap_secs: u64,

    // Session lifecycle
    /// Inactivity before a room is disconnected (seconds).
    pub idle_timeout_secs: u64,

    /// Interval between registry sweeps (seconds).
    pub sweep_interval_secs: u64,

    /// Sessions without activity for this long are removed by the sweep (seconds).
    pub stale_session_secs: u64,

    // Resolver
    pub cache_ttl_secs: u64,
    pub cache_capacity: usize,

    /// Maximum concurrent calls into the underlying resolver.
    pub resolver_concurrency: usize,

    pub playlist_entry_attempts: u32,
    pub playlist_entry_retry_delay_ms: u64,

    // Storage
    /// Free space below which temp files are purged and a warning is emitted.
    pub storage_warn_bytes: u64,

    /// Free space below which the shortfall is reported as critical.
    pub storage_critical_bytes: u64,

    // Events
    /// Capacity of the event broadcast channel.
    pub event_channel_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            enqueue_delay_min_ms: DEFAULT_ENQUEUE_DELAY_MIN_MS,
            enqueue_delay_max_ms: DEFAULT_ENQUEUE_DELAY_MAX_MS,
            connect_attempts: DEFAULT_CONNECT_ATTEMPTS,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            connect_retry_delay_ms: DEFAULT_CONNECT_RETRY_DELAY_MS,
            connect_settle_ms: DEFAULT_CONNECT_SETTLE_MS,
            audio_start_attempts: DEFAULT_AUDIO_START_ATTEMPTS,
            audio_start_timeout_secs: DEFAULT_AUDIO_START_TIMEOUT_SECS,
            audio_start_retry_delay_ms: DEFAULT_AUDIO_START_RETRY_DELAY_MS,
            audio_kill_grace_secs: DEFAULT_AUDIO_KILL_GRACE_SECS,
            hard_cap_secs: DEFAULT_HARD_CAP_SECS,
            idle_timeout_secs: DEFAULT_IDLE_TIMEOUT_SECS,
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
            stale_session_secs: DEFAULT_STALE_SESSION_SECS,
            cache_ttl_secs: DEFAULT_CACHE_TTL_SECS,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            resolver_concurrency: DEFAULT_RESOLVER_CONCURRENCY,
            playlist_entry_attempts: DEFAULT_PLAYLIST_ENTRY_ATTEMPTS,
            playlist_entry_retry_delay_ms: DEFAULT_PLAYLIST_ENTRY_RETRY_DELAY_MS,
            storage_warn_bytes: DEFAULT_STORAGE_WARN_BYTES,
            storage_critical_bytes: DEFAULT_STORAGE_CRITICAL_BYTES,
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
        }
    }
}

impl Config {
    /// Validates configuration values.
    ///
    /// Returns an error message describing the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.queue_capacity == 0 {
            return Err("queue_capacity must be >= 1".to_string());
        }
        if self.enqueue_delay_min_ms > self.enqueue_delay_max_ms {
            return Err("enqueue_delay_min_ms must not exceed enqueue_delay_max_ms".to_string());
        }
        if self.connect_attempts == 0 {
            return Err("connect_attempts must be >= 1".to_string());
        }
        if self.connect_timeout_secs == 0 {
            return Err("connect_timeout_secs must be >= 1".to_string());
        }
        if self.audio_start_attempts == 0 {
            return Err("audio_start_attempts must be >= 1".to_string());
        }
        if self.audio_start_timeout_secs == 0 {
            return Err("audio_start_timeout_secs must be >= 1".to_string());
        }
        if self.hard_cap_secs == 0 {
            return Err("hard_cap_secs must be >= 1".to_string());
        }
        if self.sweep_interval_secs == 0 {
            return Err("sweep_interval_secs must be >= 1 (interval panics on 0)".to_string());
        }
        if self.cache_capacity == 0 {
            return Err("cache_capacity must be >= 1".to_string());
        }
        if self.resolver_concurrency == 0 {
            return Err("resolver_concurrency must be >= 1".to_string());
        }
        if self.playlist_entry_attempts == 0 {
            return Err("playlist_entry_attempts must be >= 1".to_string());
        }
        if self.storage_critical_bytes > self.storage_warn_bytes {
            return Err("storage_critical_bytes must not exceed storage_warn_bytes".to_string());
        }
        if self.event_channel_capacity == 0 {
            return Err(
                "event_channel_capacity must be >= 1 (broadcast::channel panics on 0)".to_string(),
            );
        }
        Ok(())
    }

    /// Retry policy for establishing a voice connection.
    pub fn connect_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.connect_attempts,
            Duration::from_millis(self.connect_retry_delay_ms),
        )
        .with_attempt_timeout(Duration::from_secs(self.connect_timeout_secs))
    }

    /// Retry policy for starting an audio process.
    pub fn audio_start_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.audio_start_attempts,
            Duration::from_millis(self.audio_start_retry_delay_ms),
        )
        .with_attempt_timeout(Duration::from_secs(self.audio_start_timeout_secs))
    }

    /// Retry policy for resolving a single pending playlist entry.
    pub fn playlist_entry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.playlist_entry_attempts,
            Duration::from_millis(self.playlist_entry_retry_delay_ms),
        )
    }

    pub fn enqueue_throttle(&self) -> EnqueueThrottle {
        EnqueueThrottle::new(
            Duration::from_millis(self.enqueue_delay_min_ms),
            Duration::from_millis(self.enqueue_delay_max_ms),
        )
    }

    pub fn connect_settle(&self) -> Duration {
        Duration::from_millis(self.connect_settle_ms)
    }

    pub fn kill_grace(&self) -> Duration {
        Duration::from_secs(self.audio_kill_grace_secs)
    }

    pub fn hard_cap(&self) -> Duration {
        Duration::from_secs(self.hard_cap_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn stale_session_after(&self) -> Duration {
        Duration::from_secs(self.stale_session_secs)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    /// Defaults with the enqueue throttle disabled.
    #[cfg(test)]
    pub(crate) fn for_test() -> Self {
        Self {
            enqueue_delay_min_ms: 0,
            enqueue_delay_max_ms: 0,
            ..Self::default()
        }
    }
}
