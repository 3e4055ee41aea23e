//! Audio process lifecycle.
//!
//! The process that actually decodes and streams a track is an external
//! collaborator behind [`AudioLauncher`] / [`AudioProcess`]. The
//! [`AudioSupervisor`] owns the lifecycle contract around it:
//!
//! ```text
//! Idle → Starting → Running → Stopping → Terminated
//! ```
//!
//! - Startup is bounded per attempt and retried; a failed attempt is torn down
//!   (terminate, grace period, kill) before the next one.
//! - A running process ends by natural completion or an explicit stop.
//! - Every started track yields exactly one [`PlaybackCompletion`].

mod ffmpeg;
mod supervisor;

pub use ffmpeg::FfmpegLauncher;
pub use supervisor::{AudioSupervisor, PlaybackHandle, StartedPlayback};

#[cfg(test)]
pub(crate) use supervisor::tests;

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

/// Lifecycle state of a supervised audio process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum AudioState {
    Idle,
    Starting,
    Running,
    Stopping,
    Terminated,
}

/// Why a track stopped playing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum StopReason {
    /// The process exited on its own.
    Finished,
    /// A user skipped the track.
    Skipped,
    /// The hard playback cap elapsed.
    HardCap,
    /// Playback was stopped (leave, reset, shutdown, or the handle was dropped).
    Stopped,
}

/// The single completion signal of a started track.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackCompletion {
    pub reason: StopReason,
    /// Set when the process failed rather than finishing cleanly.
    pub error: Option<String>,
}

/// How a process exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessExit {
    pub success: bool,
    pub code: Option<i32>,
}

impl From<std::process::ExitStatus> for ProcessExit {
    fn from(status: std::process::ExitStatus) -> Self {
        Self {
            success: status.success(),
            code: status.code(),
        }
    }
}

/// Per-track options handed to the launcher.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessOptions {
    /// Output URL taken from the room's connection.
    pub sink_url: String,
    /// Linear gain, 0.0–2.0.
    pub volume: f32,
}

/// Errors from an audio process implementation.
#[derive(Debug, Error)]
pub enum AudioError {
    /// The process could not be spawned.
    #[error("Failed to spawn audio process: {0}")]
    Spawn(String),

    /// The process exited before reporting readiness.
    #[error("Audio process exited before it was ready")]
    ExitedEarly,

    /// A signal could not be delivered.
    #[error("Failed to signal audio process: {0}")]
    Signal(String),

    /// The operation is not available on this platform.
    #[error("Not supported on this platform: {0}")]
    Unsupported(&'static str),

    #[error("Audio process I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// The startup of a track's audio process failed on every attempt.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Audio process failed to start after {attempts} attempt(s): {last}")]
pub struct ProcessStartError {
    pub attempts: u32,
    pub last: String,
}

/// A spawned audio process.
#[async_trait]
pub trait AudioProcess: Send {
    /// OS process id, if still known.
    fn id(&self) -> Option<u32>;

    /// Resolves once the process reports it is streaming.
    async fn wait_started(&mut self) -> Result<(), AudioError>;

    /// Waits for exit. With a timeout, `Ok(None)` means still running.
    async fn wait(&mut self, timeout: Option<Duration>) -> Result<Option<ProcessExit>, AudioError>;

    /// Asks the process to exit.
    fn terminate(&mut self) -> Result<(), AudioError>;

    /// Kills the process and reaps it. A no-op once the process has exited.
    async fn kill(&mut self) -> Result<(), AudioError>;

    fn pause(&mut self) -> Result<(), AudioError>;

    fn resume(&mut self) -> Result<(), AudioError>;
}

/// Spawns audio processes.
#[async_trait]
pub trait AudioLauncher: Send + Sync {
    async fn spawn(
        &self,
        stream_url: &str,
        options: &ProcessOptions,
    ) -> Result<Box<dyn AudioProcess>, AudioError>;
}

/// Tears a process down: terminate, wait up to `grace`, then kill.
///
/// The kill step is always reached, even when terminate fails or the process
/// already exited.
pub(crate) async fn teardown(process: &mut dyn AudioProcess, grace: Duration) {
    let pid = process.id();

    if let Err(e) = process.terminate() {
        log::warn!("[Audio] Terminate of {:?} failed: {}", pid, e);
    }

    match process.wait(Some(grace)).await {
        Ok(Some(exit)) => log::debug!("[Audio] Process {:?} exited: {:?}", pid, exit),
        Ok(None) => log::warn!(
            "[Audio] Process {:?} still running after {}s, killing",
            pid,
            grace.as_secs()
        ),
        Err(e) => log::warn!("[Audio] Waiting for {:?} failed: {}", pid, e),
    }

    if let Err(e) = process.kill().await {
        log::error!("[Audio] Kill of {:?} failed: {}", pid, e);
    }
}
