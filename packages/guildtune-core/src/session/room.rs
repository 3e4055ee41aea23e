//! Per-room session state.
//!
//! All mutation of a room's queue, current track, connection and playback
//! handle happens under one async mutex. A few flags are mirrored into atomics
//! so status reads and capacity checks never wait behind a throttled enqueue.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;
use serde::Serialize;
use tokio::sync::{watch, MutexGuard};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::idle::IdleTimer;
use super::queue::TrackQueue;
use crate::audio::{PlaybackHandle, StopReason};
use crate::constants::DEFAULT_VOLUME;
use crate::resolver::{QueueItem, Track, TrackResolver};
use crate::transport::{TransportError, VoiceConnection};
use crate::utils::clamp_volume;

/// Room identifier (one per guild).
pub type RoomId = String;

// ─────────────────────────────────────────────────────────────────────────────
// Enqueue Throttle
// ─────────────────────────────────────────────────────────────────────────────

/// Random delay applied before each resolved track is enqueued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnqueueThrottle {
    min: Duration,
    max: Duration,
}

impl EnqueueThrottle {
    /// Creates a throttle drawing uniformly from `[min, max]`.
    pub fn new(min: Duration, max: Duration) -> Self {
        if min <= max {
            Self { min, max }
        } else {
            Self { min: max, max: min }
        }
    }

    pub fn disabled() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO)
    }

    pub fn sample(&self) -> Duration {
        if self.max <= self.min {
            return self.min;
        }
        let min = self.min.as_millis() as u64;
        let max = self.max.as_millis() as u64;
        Duration::from_millis(rand::rng().random_range(min..=max))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Snapshots
// ─────────────────────────────────────────────────────────────────────────────

/// Queue listing for a room.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueSnapshot {
    pub now_playing: Option<String>,
    /// Ready tracks in play order.
    pub tracks: Vec<String>,
    /// Playlist entries not resolved yet.
    pub pending: usize,
    pub capacity: usize,
    pub playing: bool,
    pub paused: bool,
    pub volume: f32,
}

/// Lock-free status of a room.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSummary {
    pub room_id: RoomId,
    pub channel: Option<String>,
    pub playing: bool,
    pub paused: bool,
    pub queued: usize,
    pub idle_secs: u64,
}

/// Result of an idle timer firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleOutcome {
    /// The room was disconnected.
    Disconnected,
    /// Activity happened after the timer was armed; the room stays connected.
    Active,
    /// The timer was cancelled or replaced, or playback is running.
    Superseded,
}

// ─────────────────────────────────────────────────────────────────────────────
// Room Session
// ─────────────────────────────────────────────────────────────────────────────

struct SessionState {
    queue: TrackQueue,
    current: Option<Track>,
    connection: Option<Arc<dyn VoiceConnection>>,
    playback: Option<PlaybackHandle>,
    volume: f32,
}

/// One room's queue, connection and playback slot.
///
/// Invariant: `playing ⇒ current track present ⇒ live connection`.
pub struct RoomSession {
    id: RoomId,
    state: tokio::sync::Mutex<SessionState>,
    /// `true` while the queue holds items; reset when a dequeue finds it empty.
    ready: watch::Sender<bool>,
    channel: Mutex<Option<String>>,
    last_activity: Mutex<Instant>,
    queued: AtomicUsize,
    playing: AtomicBool,
    paused: AtomicBool,
    advancing: AtomicBool,
    /// Bumped by every [`RoomSession::stop_all`]; an advance started under an
    /// older epoch may not install a connection or a playback.
    stop_epoch: AtomicU64,
    closed: CancellationToken,
    idle: IdleTimer,
    throttle: EnqueueThrottle,
}

/// Held by the single task advancing a room's playback.
pub struct AdvanceGuard<'a> {
    session: &'a RoomSession,
}

impl Drop for AdvanceGuard<'_> {
    fn drop(&mut self) {
        self.session.advancing.store(false, Ordering::SeqCst);
    }
}

impl RoomSession {
    pub fn new(id: impl Into<RoomId>, capacity: usize, throttle: EnqueueThrottle) -> Self {
        let (ready, _) = watch::channel(false);
        Self {
            id: id.into(),
            state: tokio::sync::Mutex::new(SessionState {
                queue: TrackQueue::new(capacity),
                current: None,
                connection: None,
                playback: None,
                volume: DEFAULT_VOLUME,
            }),
            ready,
            channel: Mutex::new(None),
            last_activity: Mutex::new(Instant::now()),
            queued: AtomicUsize::new(0),
            playing: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            advancing: AtomicBool::new(false),
            stop_epoch: AtomicU64::new(0),
            closed: CancellationToken::new(),
            idle: IdleTimer::new(),
            throttle,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lock-free accessors
    // ─────────────────────────────────────────────────────────────────────────

    pub fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    pub fn last_activity(&self) -> Instant {
        *self.last_activity.lock()
    }

    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Queued items (ready + pending) as of the last mutation.
    pub fn queued_len(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }

    pub fn channel(&self) -> Option<String> {
        self.channel.lock().clone()
    }

    /// Records the channel the room should play in.
    pub fn set_channel(&self, channel: impl Into<String>) {
        *self.channel.lock() = Some(channel.into());
    }

    pub fn idle(&self) -> &IdleTimer {
        &self.idle
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    pub fn stop_epoch(&self) -> u64 {
        self.stop_epoch.load(Ordering::SeqCst)
    }

    /// Whether a stop or close happened since `epoch` was read.
    pub fn stopped_since(&self, epoch: u64) -> bool {
        self.is_closed() || self.stop_epoch() != epoch
    }

    /// Claims the right to advance playback; `None` if another task holds it.
    pub fn try_begin_advance(&self) -> Option<AdvanceGuard<'_>> {
        self.advancing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| AdvanceGuard { session: self })
    }

    pub fn summary(&self) -> RoomSummary {
        RoomSummary {
            room_id: self.id.clone(),
            channel: self.channel(),
            playing: self.is_playing(),
            paused: self.is_paused(),
            queued: self.queued_len(),
            idle_secs: self.last_activity().elapsed().as_secs(),
        }
    }

    fn sync_queued(&self, state: &SessionState) {
        self.queued.store(state.queue.len(), Ordering::SeqCst);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Queue
    // ─────────────────────────────────────────────────────────────────────────

    /// Enqueues items up to the remaining capacity.
    ///
    /// Each resolved track waits for the throttle delay first, inside the
    /// exclusive section. Returns the number of items actually added; items
    /// beyond capacity are dropped.
    pub async fn enqueue(&self, items: Vec<QueueItem>) -> usize {
        let offered = items.len();
        let mut state = self.state.lock().await;
        let mut added = 0;

        for item in items {
            if state.queue.is_full() || self.is_closed() {
                break;
            }
            if matches!(item, QueueItem::Track(_)) {
                let delay = self.throttle.sample();
                if !delay.is_zero() {
                    tokio::select! {
                        _ = self.closed.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
            if state.queue.push(item) {
                added += 1;
                self.sync_queued(&state);
                self.ready.send_replace(true);
            }
        }
        drop(state);

        if added < offered {
            log::info!(
                "[Session] Room {}: enqueued {} of {} item(s)",
                self.id,
                added,
                offered
            );
        } else {
            log::debug!("[Session] Room {}: enqueued {} item(s)", self.id, added);
        }
        self.touch();
        added
    }

    /// Pops the next playable track.
    ///
    /// Takes the head of the ready sequence, otherwise resolves pending
    /// playlist entries one at a time, skipping failures. When both run dry the
    /// readiness signal is reset and `None` is returned.
    pub async fn dequeue_next(&self, resolver: &dyn TrackResolver) -> Option<Track> {
        let mut state = self.state.lock().await;

        loop {
            if let Some(track) = state.queue.pop_ready() {
                self.sync_queued(&state);
                return Some(track);
            }
            let Some(entry) = state.queue.pop_pending() else {
                break;
            };
            self.sync_queued(&state);

            let resolved = tokio::select! {
                _ = self.closed.cancelled() => break,
                resolved = resolver.resolve_entry(&entry) => resolved,
            };
            match resolved {
                Ok(track) => return Some(track),
                Err(e) => log::warn!(
                    "[Session] Room {}: skipping playlist entry '{}': {}",
                    self.id,
                    entry.display_title(),
                    e
                ),
            }
        }

        self.ready.send_replace(false);
        None
    }

    /// Waits until the queue holds items. Returns `false` on timeout.
    pub async fn wait_for_tracks(&self, timeout: Option<Duration>) -> bool {
        let mut ready = self.ready.subscribe();
        let wait = async move { ready.wait_for(|ready| *ready).await.is_ok() };
        match timeout {
            Some(limit) => tokio::time::timeout(limit, wait).await.unwrap_or(false),
            None => wait.await,
        }
    }

    pub async fn snapshot(&self) -> QueueSnapshot {
        let state = self.state.lock().await;
        QueueSnapshot {
            now_playing: state.current.as_ref().map(|t| t.title.clone()),
            tracks: state.queue.ready_titles(),
            pending: state.queue.pending_len(),
            capacity: state.queue.capacity(),
            playing: self.is_playing(),
            paused: self.is_paused(),
            volume: state.volume,
        }
    }

    /// Removes the ready track at a 0-based position.
    pub async fn remove_at(&self, index: usize) -> Option<Track> {
        let mut state = self.state.lock().await;
        let removed = state.queue.remove_ready(index);
        self.sync_queued(&state);
        if state.queue.is_empty() {
            self.ready.send_replace(false);
        }
        removed
    }

    /// Empties the queue. Returns the number of items dropped.
    pub async fn clear_queue(&self) -> usize {
        let mut state = self.state.lock().await;
        let cleared = state.queue.len();
        Self::reset_queue(self, &mut state);
        cleared
    }

    fn reset_queue(&self, state: &mut MutexGuard<'_, SessionState>) {
        state.queue.clear();
        self.sync_queued(state);
        self.ready.send_replace(false);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Playback slot
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn volume(&self) -> f32 {
        self.state.lock().await.volume
    }

    /// Sets the gain used from the next track on. Returns the clamped value.
    pub async fn set_volume(&self, volume: f32) -> f32 {
        let volume = clamp_volume(volume);
        self.state.lock().await.volume = volume;
        volume
    }

    pub async fn connection(&self) -> Option<Arc<dyn VoiceConnection>> {
        self.state.lock().await.connection.clone()
    }

    pub async fn set_connection(&self, connection: Option<Arc<dyn VoiceConnection>>) {
        self.state.lock().await.connection = connection;
    }

    /// Installs a connection opened by an advance started at `epoch`.
    ///
    /// Refuses (returning `false`) when the room was stopped or closed since;
    /// the caller still owns the connection and must disconnect it.
    pub async fn adopt_connection(
        &self,
        connection: Arc<dyn VoiceConnection>,
        epoch: u64,
    ) -> bool {
        let mut state = self.state.lock().await;
        if self.stopped_since(epoch) {
            return false;
        }
        state.connection = Some(connection);
        true
    }

    /// Drops a connection handle that reports itself disconnected.
    pub async fn forget_dead_connection(&self) {
        let mut state = self.state.lock().await;
        if state
            .connection
            .as_ref()
            .is_some_and(|connection| !connection.is_connected())
        {
            state.connection = None;
        }
    }

    /// Installs a started track as the current one.
    ///
    /// Refuses (returning `false`) when the session was stopped or closed
    /// since `epoch`, or has no live connection, so the playing invariant
    /// always holds.
    pub async fn begin_playback(&self, track: Track, handle: PlaybackHandle, epoch: u64) -> bool {
        let mut state = self.state.lock().await;
        let connected = state
            .connection
            .as_ref()
            .is_some_and(|connection| connection.is_connected());
        if self.stopped_since(epoch) || !connected {
            return false;
        }

        state.current = Some(track);
        state.playback = Some(handle);
        self.playing.store(true, Ordering::SeqCst);
        self.paused.store(false, Ordering::SeqCst);
        true
    }

    /// Whether `playback_id` is still the room's current playback.
    pub async fn is_current_playback(&self, playback_id: u64) -> bool {
        self.state
            .lock()
            .await
            .playback
            .as_ref()
            .is_some_and(|handle| handle.id() == playback_id)
    }

    pub async fn playback_handle(&self) -> Option<PlaybackHandle> {
        self.state.lock().await.playback.clone()
    }

    pub async fn current_track(&self) -> Option<Track> {
        self.state.lock().await.current.clone()
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::SeqCst);
    }

    /// Clears the current track and playing flag, handing back the playback
    /// handle so the caller can stop it.
    pub async fn release_current(&self) -> Option<PlaybackHandle> {
        let mut state = self.state.lock().await;
        state.current = None;
        self.playing.store(false, Ordering::SeqCst);
        self.paused.store(false, Ordering::SeqCst);
        state.playback.take()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Teardown
    // ─────────────────────────────────────────────────────────────────────────

    /// Disconnects the room if the idle timer `generation` is still current
    /// and nothing happened since `armed_at`.
    pub async fn disconnect_if_idle(&self, generation: u64, armed_at: Instant) -> IdleOutcome {
        let mut state = self.state.lock().await;
        if !self.idle.claim(generation) || self.is_playing() || state.playback.is_some() {
            return IdleOutcome::Superseded;
        }
        if self.last_activity() > armed_at {
            return IdleOutcome::Active;
        }

        if let Some(connection) = state.connection.take() {
            if let Err(e) = connection.disconnect(false).await {
                log::warn!("[Session] Room {}: idle disconnect failed: {}", self.id, e);
            }
        }
        IdleOutcome::Disconnected
    }

    /// Stops playback, clears the queue and force-disconnects.
    ///
    /// The session stays usable; a later enqueue starts over.
    pub async fn stop_all(&self) -> Result<(), TransportError> {
        self.idle.cancel();

        let (playback, connection) = {
            let mut state = self.state.lock().await;
            self.stop_epoch.fetch_add(1, Ordering::SeqCst);
            self.reset_queue(&mut state);
            state.current = None;
            self.playing.store(false, Ordering::SeqCst);
            self.paused.store(false, Ordering::SeqCst);
            (state.playback.take(), state.connection.take())
        };

        if let Some(playback) = playback {
            playback.stop(StopReason::Stopped);
            playback.terminated().await;
        }
        match connection {
            Some(connection) => connection.disconnect(true).await,
            None => Ok(()),
        }
    }

    /// Quiesces the session for removal: no further enqueues or playback,
    /// audio drained, connection closed.
    pub async fn close(&self) -> Result<(), TransportError> {
        self.closed.cancel();
        self.stop_all().await
    }

    /// Whether the connection died while the room has nothing to do.
    ///
    /// A session busy in its exclusive section is never considered orphaned.
    pub fn is_orphaned(&self) -> bool {
        let Ok(state) = self.state.try_lock() else {
            return false;
        };
        let dead = state
            .connection
            .as_ref()
            .is_some_and(|connection| !connection.is_connected());
        dead && !self.is_playing() && state.queue.is_empty()
    }
}
