//! Event system for real-time client communication.
//!
//! This module provides:
//! - [`EventEmitter`] trait for domain services to emit events
//! - [`BroadcastEventBridge`] for WebSocket transport
//! - Event types for playback, room lifecycle and host health
//!
//! These events are the visible reports of the playback loop: a failed track,
//! a connection that could not be established, an idle disconnect.

mod bridge;
mod emitter;

pub use bridge::BroadcastEventBridge;
pub use emitter::{EventEmitter, LoggingEventEmitter};

#[cfg(test)]
pub(crate) use emitter::tests::RecordingEmitter;

use serde::Serialize;

use crate::session::RoomId;

/// Events broadcast to clients.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "category", rename_all = "camelCase")]
pub enum BroadcastEvent {
    /// Track lifecycle within a room.
    Playback(PlaybackEvent),

    /// Room connection and session lifecycle.
    Room(RoomEvent),

    /// Host health.
    System(SystemEvent),
}

impl BroadcastEvent {
    /// The room this event concerns, if any. System events belong to no room.
    pub fn room_id(&self) -> Option<&str> {
        match self {
            Self::Playback(
                PlaybackEvent::NowPlaying { room_id, .. }
                | PlaybackEvent::TrackFailed { room_id, .. }
                | PlaybackEvent::HardCapReached { room_id, .. }
                | PlaybackEvent::QueueFinished { room_id, .. },
            ) => Some(room_id),
            Self::Room(
                RoomEvent::ConnectionFailed { room_id, .. }
                | RoomEvent::IdleDisconnected { room_id, .. }
                | RoomEvent::SessionRemoved { room_id, .. },
            ) => Some(room_id),
            Self::System(_) => None,
        }
    }
}

/// Track lifecycle events.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PlaybackEvent {
    /// A track started streaming.
    #[serde(rename_all = "camelCase")]
    NowPlaying {
        room_id: RoomId,
        title: String,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
    /// A track failed to start or ended with an error.
    #[serde(rename_all = "camelCase")]
    TrackFailed {
        room_id: RoomId,
        title: Option<String>,
        error: String,
        timestamp: u64,
    },
    /// A track was cut off by the hard playback cap.
    #[serde(rename_all = "camelCase")]
    HardCapReached {
        room_id: RoomId,
        title: String,
        timestamp: u64,
    },
    /// The queue ran dry.
    #[serde(rename_all = "camelCase")]
    QueueFinished { room_id: RoomId, timestamp: u64 },
}

/// Room lifecycle events.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RoomEvent {
    /// The voice connection could not be established; the cycle was abandoned.
    #[serde(rename_all = "camelCase")]
    ConnectionFailed {
        room_id: RoomId,
        channel: String,
        error: String,
        timestamp: u64,
    },
    /// The room was disconnected after sitting idle.
    #[serde(rename_all = "camelCase")]
    IdleDisconnected { room_id: RoomId, timestamp: u64 },
    /// The session was removed from the registry.
    #[serde(rename_all = "camelCase")]
    SessionRemoved {
        room_id: RoomId,
        reason: RemovalReason,
        timestamp: u64,
    },
}

/// Why a session left the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RemovalReason {
    Stale,
    Orphaned,
    Reset,
}

/// Host health events.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SystemEvent {
    /// Free space in the temp directory is below a threshold.
    #[serde(rename_all = "camelCase")]
    StorageLow {
        free_bytes: u64,
        critical: bool,
        timestamp: u64,
    },
}
