//! Supervision of one audio process per playing track.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;

use super::{
    teardown, AudioLauncher, AudioProcess, AudioState, PlaybackCompletion, ProcessOptions,
    ProcessStartError, StopReason,
};
use crate::resolver::Track;
use crate::retry::RetryPolicy;
use crate::runtime::TaskSpawner;

enum Control {
    Pause,
    Resume,
    Stop(StopReason),
}

/// Control handle for a running track.
///
/// Clones share the same process. When every clone is dropped the process is
/// torn down with [`StopReason::Stopped`].
#[derive(Clone)]
pub struct PlaybackHandle {
    id: u64,
    control: mpsc::UnboundedSender<Control>,
    state: watch::Receiver<AudioState>,
}

impl std::fmt::Debug for PlaybackHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackHandle")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}

impl PlaybackHandle {
    /// Identifier unique within the supervisor.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> AudioState {
        *self.state.borrow()
    }

    /// Requests teardown. Returns `false` if the process already ended.
    pub fn stop(&self, reason: StopReason) -> bool {
        self.control.send(Control::Stop(reason)).is_ok()
    }

    pub fn pause(&self) -> bool {
        self.control.send(Control::Pause).is_ok()
    }

    pub fn resume(&self) -> bool {
        self.control.send(Control::Resume).is_ok()
    }

    /// Waits until the process has been torn down and reaped.
    pub async fn terminated(&self) {
        let mut state = self.state.clone();
        let _ = state
            .wait_for(|state| *state == AudioState::Terminated)
            .await;
    }
}

/// A successfully started track.
pub struct StartedPlayback {
    pub handle: PlaybackHandle,
    /// Fires exactly once, when the process has ended and been reaped.
    pub completion: oneshot::Receiver<PlaybackCompletion>,
}

/// Starts audio processes and supervises them until they end.
pub struct AudioSupervisor {
    launcher: Arc<dyn AudioLauncher>,
    start_policy: RetryPolicy,
    kill_grace: Duration,
    spawner: TaskSpawner,
    next_id: AtomicU64,
}

impl AudioSupervisor {
    pub fn new(
        launcher: Arc<dyn AudioLauncher>,
        start_policy: RetryPolicy,
        kill_grace: Duration,
        spawner: TaskSpawner,
    ) -> Self {
        Self {
            launcher,
            start_policy,
            kill_grace,
            spawner,
            next_id: AtomicU64::new(0),
        }
    }

    /// Starts `track` and hands supervision to a background task.
    ///
    /// Spawning and readiness of one attempt share the policy's per-attempt
    /// timeout; a failed attempt is torn down before the next one.
    pub async fn play(
        &self,
        track: &Track,
        options: ProcessOptions,
    ) -> Result<StartedPlayback, ProcessStartError> {
        let (state_tx, state_rx) = watch::channel(AudioState::Idle);
        state_tx.send_replace(AudioState::Starting);

        let launcher = &self.launcher;
        let policy = &self.start_policy;
        let grace = self.kill_grace;
        let options = &options;

        let started = policy
            .run("audio start", |attempt| async move {
                let began = Instant::now();
                let mut process = policy
                    .timed_since(began, launcher.spawn(&track.stream_url, options))
                    .await
                    .map_err(|e| e.to_string())?;
                log::debug!(
                    "[Audio] Spawned process {:?} for '{}' (attempt {})",
                    process.id(),
                    track.title,
                    attempt
                );

                let ready = policy.timed_since(began, process.wait_started()).await;
                match ready {
                    Ok(()) => Ok::<_, String>(process),
                    Err(e) => {
                        teardown(process.as_mut(), grace).await;
                        Err(e.to_string())
                    }
                }
            })
            .await;

        let process = match started {
            Ok(process) => process,
            Err(exhausted) => {
                state_tx.send_replace(AudioState::Terminated);
                return Err(ProcessStartError {
                    attempts: exhausted.attempts,
                    last: exhausted.last,
                });
            }
        };

        state_tx.send_replace(AudioState::Running);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (done_tx, done_rx) = oneshot::channel();

        log::info!("[Audio] Playing '{}' (playback {})", track.title, id);
        self.spawner.spawn(monitor(
            process,
            control_rx,
            state_tx,
            done_tx,
            self.kill_grace,
            track.title.clone(),
        ));

        Ok(StartedPlayback {
            handle: PlaybackHandle {
                id,
                control: control_tx,
                state: state_rx,
            },
            completion: done_rx,
        })
    }
}

/// Owns a running process until it exits or is told to stop.
async fn monitor(
    mut process: Box<dyn AudioProcess>,
    mut control: mpsc::UnboundedReceiver<Control>,
    state: watch::Sender<AudioState>,
    done: oneshot::Sender<PlaybackCompletion>,
    grace: Duration,
    title: String,
) {
    let started = Instant::now();

    let (reason, error) = loop {
        tokio::select! {
            exit = process.wait(None) => {
                let error = match exit {
                    Ok(Some(exit)) if exit.success => None,
                    Ok(Some(exit)) => Some(format!("audio process exited with {:?}", exit.code)),
                    Ok(None) => None,
                    Err(e) => Some(e.to_string()),
                };
                break (StopReason::Finished, error);
            }
            command = control.recv() => match command {
                Some(Control::Pause) => {
                    if let Err(e) = process.pause() {
                        log::warn!("[Audio] Pause of '{}' failed: {}", title, e);
                    }
                }
                Some(Control::Resume) => {
                    if let Err(e) = process.resume() {
                        log::warn!("[Audio] Resume of '{}' failed: {}", title, e);
                    }
                }
                Some(Control::Stop(reason)) => {
                    state.send_replace(AudioState::Stopping);
                    teardown(process.as_mut(), grace).await;
                    break (reason, None);
                }
                None => {
                    state.send_replace(AudioState::Stopping);
                    teardown(process.as_mut(), grace).await;
                    break (StopReason::Stopped, None);
                }
            },
        }
    };

    state.send_replace(AudioState::Terminated);
    log::info!(
        "[Audio] '{}' ended after {}s ({:?})",
        title,
        started.elapsed().as_secs(),
        reason
    );
    if done.send(PlaybackCompletion { reason, error }).is_err() {
        log::debug!("[Audio] Nobody waiting for completion of '{}'", title);
    }
}
