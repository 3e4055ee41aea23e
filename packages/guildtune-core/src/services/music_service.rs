//! Command surface: the operations a room's users can invoke.
//!
//! Every command touches the room's activity timestamp. Failures come back as
//! [`CommandError`]; the HTTP layer maps them to status codes.

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use super::player::Player;
use crate::events::{EventEmitter, RemovalReason, RoomEvent};
use crate::resolver::{is_playlist_query, CachedResolver, ResolutionError, Resolved, Track, TrackResolver};
use crate::session::{QueueSnapshot, RoomSession, RoomSummary, SessionRegistry};
use crate::transport::TransportError;
use crate::utils::now_millis;

/// Errors returned by room commands.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    /// The queue is at capacity.
    #[error("Queue is full ({0} items)")]
    QueueFull(usize),

    #[error("Nothing is playing")]
    NotPlaying,

    #[error("Not connected to a voice channel")]
    NotConnected,

    /// A 1-based queue position that does not exist.
    #[error("No track at position {0}")]
    InvalidIndex(usize),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The registry no longer accepts sessions.
    #[error("Service is shutting down")]
    ShuttingDown,

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Result of a successful enqueue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnqueueOutcome {
    /// Items actually added; playlists may be truncated at capacity.
    pub added: usize,
    pub is_playlist: bool,
    /// Title of a single track.
    pub title: Option<String>,
    pub queued: usize,
}

/// Result of an administrative reset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetReport {
    pub sessions: usize,
    pub cache_entries: usize,
}

/// Executes room commands against the registry and the player.
pub struct MusicService {
    registry: Arc<SessionRegistry>,
    resolver: Arc<CachedResolver>,
    player: Arc<Player>,
    emitter: Arc<dyn EventEmitter>,
}

impl MusicService {
    pub fn new(
        registry: Arc<SessionRegistry>,
        resolver: Arc<CachedResolver>,
        player: Arc<Player>,
        emitter: Arc<dyn EventEmitter>,
    ) -> Self {
        Self {
            registry,
            resolver,
            player,
            emitter,
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn resolver(&self) -> &Arc<CachedResolver> {
        &self.resolver
    }

    fn session(&self, room_id: &str) -> Option<Arc<RoomSession>> {
        let session = self.registry.get(room_id)?;
        session.touch();
        Some(session)
    }

    fn session_or_create(&self, room_id: &str) -> Result<Arc<RoomSession>, CommandError> {
        let session = self
            .registry
            .get_or_create(room_id)
            .ok_or(CommandError::ShuttingDown)?;
        session.touch();
        Ok(session)
    }

    /// Resolves `query` and appends the result to the room's queue.
    ///
    /// Playlist queries (`list=` or "playlist") are expanded into pending
    /// entries, truncated to the remaining capacity. A full queue is rejected
    /// before resolving. Starts playback when the room is idle.
    pub async fn enqueue_request(
        &self,
        room_id: &str,
        channel: &str,
        query: &str,
    ) -> Result<EnqueueOutcome, CommandError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(CommandError::InvalidRequest("query is empty".into()));
        }
        if channel.trim().is_empty() {
            return Err(CommandError::InvalidRequest("channel is empty".into()));
        }

        let capacity = self.registry.queue_capacity();
        let session = self.session_or_create(room_id)?;
        if session.queued_len() >= capacity {
            return Err(CommandError::QueueFull(capacity));
        }

        let expand = is_playlist_query(query);
        let resolved = self.resolver.resolve(query, expand).await?;
        let is_playlist = resolved.is_playlist();
        let title = match &resolved {
            Resolved::Single(track) => Some(track.title.clone()),
            Resolved::Playlist(_) => None,
        };
        let items = resolved.into_items();
        if items.is_empty() {
            return Err(ResolutionError::NotFound("playlist has no playable entries".into()).into());
        }

        // The session may have been swept or reset while resolving.
        let session = if session.is_closed() {
            self.session_or_create(room_id)?
        } else {
            session
        };

        session.set_channel(channel);
        let added = session.enqueue(items).await;
        if added == 0 {
            return Err(CommandError::QueueFull(capacity));
        }

        log::info!(
            "[Music] Room {}: queued {} item(s) for '{}'",
            room_id,
            added,
            query
        );
        self.player.start(&session);

        Ok(EnqueueOutcome {
            added,
            is_playlist,
            title,
            queued: session.queued_len(),
        })
    }

    /// Stops the current track; the loop moves on to the next one.
    ///
    /// Returns the skipped track.
    pub async fn skip(&self, room_id: &str) -> Result<Track, CommandError> {
        let session = self.session(room_id).ok_or(CommandError::NotPlaying)?;
        let handle = session
            .playback_handle()
            .await
            .ok_or(CommandError::NotPlaying)?;
        let track = session
            .current_track()
            .await
            .ok_or(CommandError::NotPlaying)?;

        handle.stop(crate::audio::StopReason::Skipped);
        log::info!("[Music] Room {}: skipped '{}'", room_id, track.title);
        Ok(track)
    }

    pub async fn pause(&self, room_id: &str) -> Result<(), CommandError> {
        let session = self.connected_session(room_id).await?;
        let handle = session
            .playback_handle()
            .await
            .ok_or(CommandError::NotPlaying)?;
        if !handle.pause() {
            return Err(CommandError::NotPlaying);
        }
        session.set_paused(true);
        Ok(())
    }

    pub async fn resume(&self, room_id: &str) -> Result<(), CommandError> {
        let session = self.connected_session(room_id).await?;
        let handle = session
            .playback_handle()
            .await
            .ok_or(CommandError::NotPlaying)?;
        if !handle.resume() {
            return Err(CommandError::NotPlaying);
        }
        session.set_paused(false);
        Ok(())
    }

    async fn connected_session(&self, room_id: &str) -> Result<Arc<RoomSession>, CommandError> {
        let session = self.session(room_id).ok_or(CommandError::NotConnected)?;
        match session.connection().await {
            Some(connection) if connection.is_connected() => Ok(session),
            _ => Err(CommandError::NotConnected),
        }
    }

    /// Leaves the channel: stops playback, clears the queue, force-disconnects.
    pub async fn stop(&self, room_id: &str) -> Result<(), CommandError> {
        let session = self.session(room_id).ok_or(CommandError::NotConnected)?;
        session.stop_all().await?;
        log::info!("[Music] Room {}: stopped", room_id);
        Ok(())
    }

    /// Empties the room's queue. Returns the number of items dropped.
    pub async fn clear_queue(&self, room_id: &str) -> usize {
        match self.session(room_id) {
            Some(session) => session.clear_queue().await,
            None => 0,
        }
    }

    /// Sets the room's volume, applied from the next track on.
    pub async fn set_volume(&self, room_id: &str, volume: f32) -> Result<f32, CommandError> {
        let session = self.session_or_create(room_id)?;
        Ok(session.set_volume(volume).await)
    }

    pub async fn list_queue(&self, room_id: &str) -> QueueSnapshot {
        match self.session(room_id) {
            Some(session) => session.snapshot().await,
            None => QueueSnapshot {
                now_playing: None,
                tracks: Vec::new(),
                pending: 0,
                capacity: self.registry.queue_capacity(),
                playing: false,
                paused: false,
                volume: crate::constants::DEFAULT_VOLUME,
            },
        }
    }

    /// Removes the ready track at a 1-based position.
    pub async fn remove_at(&self, room_id: &str, position: usize) -> Result<Track, CommandError> {
        let index = position
            .checked_sub(1)
            .ok_or(CommandError::InvalidIndex(position))?;
        let session = self
            .session(room_id)
            .ok_or(CommandError::InvalidIndex(position))?;
        session
            .remove_at(index)
            .await
            .ok_or(CommandError::InvalidIndex(position))
    }

    /// Disconnects and drops every session and clears the resolution cache.
    pub async fn reset(&self) -> ResetReport {
        let rooms: Vec<String> = self
            .registry
            .summaries()
            .into_iter()
            .map(|summary| summary.room_id)
            .collect();
        let cache_entries = self.resolver.cached_len();

        let sessions = self.registry.clear_all().await;
        self.resolver.clear();
        for room_id in rooms {
            self.emitter.emit_room(RoomEvent::SessionRemoved {
                room_id,
                reason: RemovalReason::Reset,
                timestamp: now_millis(),
            });
        }

        log::warn!(
            "[Music] Reset: dropped {} session(s) and {} cached resolution(s)",
            sessions,
            cache_entries
        );
        ResetReport {
            sessions,
            cache_entries,
        }
    }

    pub fn rooms(&self) -> Vec<RoomSummary> {
        self.registry.summaries()
    }
}
