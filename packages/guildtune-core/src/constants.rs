//! Fixed limits and default tunables.
//!
//! The defaults here seed [`Config`](crate::state::Config); anything a deployment
//! may want to change is exposed there instead of being read from these constants.

// ─────────────────────────────────────────────────────────────────────────────
// Identity
// ─────────────────────────────────────────────────────────────────────────────

/// Application name reported by the health endpoint.
pub const APP_NAME: &str = "guildtune";

/// Service identifier reported by the health endpoint.
pub const SERVICE_ID: &str = "guildtune-server";

// ─────────────────────────────────────────────────────────────────────────────
// Queue
// ─────────────────────────────────────────────────────────────────────────────

/// Maximum number of queued items per room (ready + pending playlist entries).
pub const DEFAULT_QUEUE_CAPACITY: usize = 50;

/// Lower bound of the per-track enqueue throttle (milliseconds).
pub const DEFAULT_ENQUEUE_DELAY_MIN_MS: u64 = 10_000;

/// Upper bound of the per-track enqueue throttle (milliseconds).
pub const DEFAULT_ENQUEUE_DELAY_MAX_MS: u64 = 15_000;

/// Maximum number of entries taken from an expanded playlist.
pub const PLAYLIST_ENTRY_LIMIT: usize = 50;

// ─────────────────────────────────────────────────────────────────────────────
// Voice Connection
// ─────────────────────────────────────────────────────────────────────────────

pub const DEFAULT_CONNECT_ATTEMPTS: u32 = 3;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 20;
pub const DEFAULT_CONNECT_RETRY_DELAY_MS: u64 = 2_000;

/// Pause after a successful connect or move before audio is started.
pub const DEFAULT_CONNECT_SETTLE_MS: u64 = 1_000;

// ─────────────────────────────────────────────────────────────────────────────
// Audio Process
// ─────────────────────────────────────────────────────────────────────────────

pub const DEFAULT_AUDIO_START_ATTEMPTS: u32 = 3;
pub const DEFAULT_AUDIO_START_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_AUDIO_START_RETRY_DELAY_MS: u64 = 1_000;

/// Time a terminated process gets to exit before it is killed.
pub const DEFAULT_AUDIO_KILL_GRACE_SECS: u64 = 5;

/// Hard playback cap: any track still running after this long is stopped.
pub const DEFAULT_HARD_CAP_SECS: u64 = 300;

/// Volume bounds accepted by rooms (1.0 = unity gain).
pub const MIN_VOLUME: f32 = 0.0;
pub const MAX_VOLUME: f32 = 2.0;
pub const DEFAULT_VOLUME: f32 = 1.0;

// ─────────────────────────────────────────────────────────────────────────────
// Session Lifecycle
// ─────────────────────────────────────────────────────────────────────────────

pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 600;
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 300;
pub const DEFAULT_STALE_SESSION_SECS: u64 = 3_600;

/// Upper bound on how long shutdown waits for room tasks to finish.
pub const SHUTDOWN_DRAIN_TIMEOUT_SECS: u64 = 10;

// ─────────────────────────────────────────────────────────────────────────────
// Resolver
// ─────────────────────────────────────────────────────────────────────────────

pub const DEFAULT_CACHE_TTL_SECS: u64 = 3_600;
pub const DEFAULT_CACHE_CAPACITY: usize = 1_000;
pub const DEFAULT_RESOLVER_CONCURRENCY: usize = 10;
pub const DEFAULT_PLAYLIST_ENTRY_ATTEMPTS: u32 = 2;
pub const DEFAULT_PLAYLIST_ENTRY_RETRY_DELAY_MS: u64 = 1_000;

/// Tracks longer than this are refused by the resolver (seconds).
pub const MAX_TRACK_DURATION_SECS: u64 = 7_200;

// ─────────────────────────────────────────────────────────────────────────────
// Storage
// ─────────────────────────────────────────────────────────────────────────────

pub const DEFAULT_STORAGE_WARN_BYTES: u64 = 512 * 1024 * 1024;
pub const DEFAULT_STORAGE_CRITICAL_BYTES: u64 = 100 * 1024 * 1024;

/// Temp-file prefixes that the storage probe may delete when space runs low.
pub const PURGEABLE_TEMP_PREFIXES: &[&str] = &["yt-dlp", "guildtune-"];

// ─────────────────────────────────────────────────────────────────────────────
// Events
// ─────────────────────────────────────────────────────────────────────────────

pub const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 100;

// ─────────────────────────────────────────────────────────────────────────────
// WebSocket
// ─────────────────────────────────────────────────────────────────────────────

/// How often a WebSocket connection checks for client inactivity.
pub const WS_HEARTBEAT_CHECK_INTERVAL_SECS: u64 = 5;

/// A WebSocket client silent for this long is disconnected.
pub const WS_HEARTBEAT_TIMEOUT_SECS: u64 = 60;
