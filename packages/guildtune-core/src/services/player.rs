//! Per-room playback loop.
//!
//! [`Player::play_next`] and [`Player::on_song_complete`] are the only places
//! that advance a room:
//!
//! ```text
//! play_next ──dequeue──► connect ──► start audio ──► watchdog + completion waiter
//!     ▲                                                     │
//!     └──────────── on_song_complete ◄──────────────────────┘
//!                        │ queue empty
//!                        ▼
//!                    idle timer
//! ```
//!
//! A connection failure abandons the cycle without retry; the dequeued track
//! is lost and the room waits for the next request.

use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use tokio::sync::oneshot;
use tokio::time::Instant;

use super::storage::{StorageProbe, StorageStatus};
use crate::audio::{AudioSupervisor, PlaybackCompletion, PlaybackHandle, ProcessOptions, StopReason};
use crate::events::{EventEmitter, PlaybackEvent, RoomEvent, SystemEvent};
use crate::resolver::{Track, TrackResolver};
use crate::runtime::TaskSpawner;
use crate::session::{IdleOutcome, RoomSession};
use crate::state::Config;
use crate::transport::ConnectionManager;
use crate::utils::now_millis;

/// How one advance attempt ended.
enum Advance {
    /// A track is playing; its completion waiter takes over.
    Started,
    /// Nothing left to play.
    Drained,
    /// No connection; the cycle is abandoned.
    ConnectFailed,
    /// The session was stopped or closed underneath the cycle.
    Aborted,
    /// The track could not be started.
    StartFailed { title: String, error: String },
}

/// Drives playback for every room.
pub struct Player {
    resolver: Arc<dyn TrackResolver>,
    connections: ConnectionManager,
    audio: AudioSupervisor,
    storage: Arc<dyn StorageProbe>,
    emitter: Arc<dyn EventEmitter>,
    spawner: TaskSpawner,
    hard_cap: Duration,
    idle_timeout: Duration,
}

impl Player {
    pub fn new(
        resolver: Arc<dyn TrackResolver>,
        connections: ConnectionManager,
        audio: AudioSupervisor,
        storage: Arc<dyn StorageProbe>,
        emitter: Arc<dyn EventEmitter>,
        spawner: TaskSpawner,
        config: &Config,
    ) -> Self {
        Self {
            resolver,
            connections,
            audio,
            storage,
            emitter,
            spawner,
            hard_cap: config.hard_cap(),
            idle_timeout: config.idle_timeout(),
        }
    }

    /// Starts the loop for an idle room in the background.
    pub fn start(self: &Arc<Self>, session: &Arc<RoomSession>) {
        if session.is_playing() || session.is_closed() {
            return;
        }
        self.spawner.spawn(self.play_next(session.clone()));
    }

    /// Advances the room to its next track.
    ///
    /// Only one task advances a room at a time; a concurrent call returns
    /// immediately.
    pub fn play_next(self: &Arc<Self>, session: Arc<RoomSession>) -> BoxFuture<'static, ()> {
        let player = self.clone();
        async move {
            loop {
                if session.is_closed() {
                    return;
                }
                let Some(guard) = session.try_begin_advance() else {
                    log::debug!("[Player] Room {} is already advancing", session.id());
                    return;
                };
                if session.is_playing() {
                    return;
                }
                session.idle().cancel();

                match player.advance(&session).await {
                    Advance::Started | Advance::ConnectFailed => return,
                    Advance::Aborted => {
                        drop(guard);
                        // Tracks enqueued after the stop start a fresh cycle.
                        if session.queued_len() > 0 && !session.is_closed() {
                            continue;
                        }
                        return;
                    }
                    Advance::Drained => {
                        drop(guard);
                        // An enqueue may have landed after the empty dequeue.
                        if session.queued_len() > 0 && !session.is_closed() {
                            continue;
                        }
                        log::info!("[Player] Room {}: queue finished", session.id());
                        player.emitter.emit_playback(PlaybackEvent::QueueFinished {
                            room_id: session.id().to_string(),
                            timestamp: now_millis(),
                        });
                        player.arm_idle(&session);
                        return;
                    }
                    Advance::StartFailed { title, error } => {
                        drop(guard);
                        log::error!(
                            "[Player] Room {}: failed to start '{}': {}",
                            session.id(),
                            title,
                            error
                        );
                        player.emitter.emit_playback(PlaybackEvent::TrackFailed {
                            room_id: session.id().to_string(),
                            title: Some(title),
                            error: error.clone(),
                            timestamp: now_millis(),
                        });
                        player.on_song_complete(session, Some(error)).await;
                        return;
                    }
                }
            }
        }
        .boxed()
    }

    /// Single decision point after a track ends.
    ///
    /// Releases the current audio, checks storage headroom, then plays the
    /// next track or arms the idle timer.
    pub fn on_song_complete(
        self: &Arc<Self>,
        session: Arc<RoomSession>,
        error: Option<String>,
    ) -> BoxFuture<'static, ()> {
        let player = self.clone();
        async move {
            if let Some(handle) = session.release_current().await {
                handle.stop(StopReason::Stopped);
            }
            if let Some(error) = error {
                log::warn!("[Player] Room {}: track ended with error: {}", session.id(), error);
            }
            player.check_storage(session.id());

            if session.is_closed() {
                return;
            }
            if session.queued_len() > 0 {
                player.play_next(session).await;
            } else {
                log::info!("[Player] Room {}: queue finished", session.id());
                player.emitter.emit_playback(PlaybackEvent::QueueFinished {
                    room_id: session.id().to_string(),
                    timestamp: now_millis(),
                });
                player.arm_idle(&session);
            }
        }
        .boxed()
    }

    async fn advance(self: &Arc<Self>, session: &Arc<RoomSession>) -> Advance {
        let epoch = session.stop_epoch();
        let Some(track) = session.dequeue_next(self.resolver.as_ref()).await else {
            if let Some(handle) = session.release_current().await {
                handle.stop(StopReason::Stopped);
            }
            return Advance::Drained;
        };

        let Some(channel) = session.channel() else {
            log::warn!("[Player] Room {}: no channel to play in", session.id());
            return Advance::ConnectFailed;
        };

        let existing = session.connection().await;
        let connection = match self.connections.connect(existing, &channel).await {
            Ok(connection) => connection,
            Err(e) => {
                log::error!(
                    "[Player] Room {}: connection to {} failed, dropping '{}': {}",
                    session.id(),
                    channel,
                    track.title,
                    e
                );
                session.forget_dead_connection().await;
                self.emitter.emit_room(RoomEvent::ConnectionFailed {
                    room_id: session.id().to_string(),
                    channel,
                    error: e.to_string(),
                    timestamp: now_millis(),
                });
                return Advance::ConnectFailed;
            }
        };

        if !session.adopt_connection(connection.clone(), epoch).await {
            log::info!(
                "[Player] Room {}: stopped while connecting, dropping '{}'",
                session.id(),
                track.title
            );
            if let Err(e) = connection.disconnect(true).await {
                log::debug!("[Player] Disconnect of stopped room {}: {}", session.id(), e);
            }
            return Advance::Aborted;
        }

        let options = ProcessOptions {
            sink_url: connection.sink_url(),
            volume: session.volume().await,
        };
        let started = match self.audio.play(&track, options).await {
            Ok(started) => started,
            Err(_) if session.stopped_since(epoch) => return Advance::Aborted,
            Err(e) => {
                return Advance::StartFailed {
                    title: track.title,
                    error: e.to_string(),
                }
            }
        };

        let handle = started.handle;
        if !session.begin_playback(track.clone(), handle.clone(), epoch).await {
            handle.stop(StopReason::Stopped);
            if session.stopped_since(epoch) {
                return Advance::Aborted;
            }
            return Advance::StartFailed {
                title: track.title,
                error: "voice connection lost before playback started".into(),
            };
        }

        session.touch();
        self.emitter.emit_playback(PlaybackEvent::NowPlaying {
            room_id: session.id().to_string(),
            title: track.title.clone(),
            timestamp: now_millis(),
        });
        self.spawn_watchdog(session.clone(), &track, handle.clone());
        self.spawn_completion_waiter(session.clone(), track, handle.id(), started.completion);
        Advance::Started
    }

    /// Stops the track with [`StopReason::HardCap`] once the cap elapses,
    /// paused or not.
    fn spawn_watchdog(&self, session: Arc<RoomSession>, track: &Track, handle: PlaybackHandle) {
        let hard_cap = self.hard_cap;
        let emitter = self.emitter.clone();
        let title = track.title.clone();

        self.spawner.spawn(async move {
            tokio::select! {
                _ = handle.terminated() => {}
                _ = tokio::time::sleep(hard_cap) => {
                    if !session.is_current_playback(handle.id()).await {
                        return;
                    }
                    log::warn!(
                        "[Player] Room {}: '{}' hit the {}s playback cap",
                        session.id(),
                        title,
                        hard_cap.as_secs()
                    );
                    emitter.emit_playback(PlaybackEvent::HardCapReached {
                        room_id: session.id().to_string(),
                        title,
                        timestamp: now_millis(),
                    });
                    handle.stop(StopReason::HardCap);
                }
            }
        });
    }

    fn spawn_completion_waiter(
        self: &Arc<Self>,
        session: Arc<RoomSession>,
        track: Track,
        playback_id: u64,
        completion: oneshot::Receiver<PlaybackCompletion>,
    ) {
        let player = self.clone();
        self.spawner.spawn(async move {
            let error = match completion.await {
                Ok(completion) => completion.error,
                Err(_) => Some("audio supervisor dropped the track".to_string()),
            };
            // A stop or teardown already released this playback.
            if !session.is_current_playback(playback_id).await {
                log::debug!(
                    "[Player] Room {}: ignoring completion of released playback {}",
                    session.id(),
                    playback_id
                );
                return;
            }
            if let Some(error) = &error {
                player.emitter.emit_playback(PlaybackEvent::TrackFailed {
                    room_id: session.id().to_string(),
                    title: Some(track.title.clone()),
                    error: error.clone(),
                    timestamp: now_millis(),
                });
            }
            player.on_song_complete(session, error).await;
        });
    }

    /// Arms the idle timer; when it fires the room is disconnected unless
    /// something happened in the meantime.
    fn arm_idle(self: &Arc<Self>, session: &Arc<RoomSession>) {
        if session.is_closed() {
            return;
        }
        let weak: Weak<RoomSession> = Arc::downgrade(session);
        let player = self.clone();
        let armed_at = Instant::now();

        session
            .idle()
            .start(&self.spawner, self.idle_timeout, move |generation| async move {
                let Some(session) = weak.upgrade() else {
                    return;
                };
                match session.disconnect_if_idle(generation, armed_at).await {
                    IdleOutcome::Disconnected => {
                        log::info!("[Player] Room {}: disconnected after idling", session.id());
                        player.emitter.emit_room(RoomEvent::IdleDisconnected {
                            room_id: session.id().to_string(),
                            timestamp: now_millis(),
                        });
                    }
                    IdleOutcome::Active => player.arm_idle(&session),
                    IdleOutcome::Superseded => {}
                }
            });
    }

    /// Runs the storage probe off the playback path.
    fn check_storage(&self, room_id: &str) {
        let storage = self.storage.clone();
        let emitter = self.emitter.clone();
        let room_id = room_id.to_string();

        self.spawner.spawn(async move {
            let status = match tokio::task::spawn_blocking(move || storage.check()).await {
                Ok(status) => status,
                Err(e) => {
                    log::warn!("[Player] Storage check after room {} failed: {}", room_id, e);
                    return;
                }
            };
            let (free_bytes, critical) = match status {
                StorageStatus::Low { free_bytes } => (free_bytes, false),
                StorageStatus::Critical { free_bytes } => (free_bytes, true),
                StorageStatus::Ok { .. } | StorageStatus::Unknown { .. } => return,
            };
            emitter.emit_system(SystemEvent::StorageLow {
                free_bytes,
                critical,
                timestamp: now_millis(),
            });
        });
    }
}
