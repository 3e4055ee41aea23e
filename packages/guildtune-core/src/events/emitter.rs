//! Event emitter abstraction for decoupling services from transport.
//!
//! Services depend on the [`EventEmitter`] trait rather than concrete broadcast
//! channels, so tests can count events and the server can fan them out.

use super::{PlaybackEvent, RoomEvent, SystemEvent};

/// Trait for emitting domain events without knowledge of transport.
///
/// # Example
///
/// ```ignore
/// struct MyService {
///     emitter: Arc<dyn EventEmitter>,
/// }
///
/// impl MyService {
///     fn finish(&self, room_id: &str) {
///         self.emitter.emit_playback(PlaybackEvent::QueueFinished { ... });
///     }
/// }
/// ```
pub trait EventEmitter: Send + Sync {
    /// Emits a track lifecycle event.
    fn emit_playback(&self, event: PlaybackEvent);

    /// Emits a room lifecycle event.
    fn emit_room(&self, event: RoomEvent);

    /// Emits a host health event.
    fn emit_system(&self, event: SystemEvent);
}

/// Logs all events at debug level.
pub struct LoggingEventEmitter;

impl EventEmitter for LoggingEventEmitter {
    fn emit_playback(&self, event: PlaybackEvent) {
        tracing::debug!(?event, "playback_event");
    }

    fn emit_room(&self, event: RoomEvent) {
        tracing::debug!(?event, "room_event");
    }

    fn emit_system(&self, event: SystemEvent) {
        tracing::debug!(?event, "system_event");
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use parking_lot::Mutex;

    /// Test emitter that records every event.
    #[derive(Default)]
    pub(crate) struct RecordingEmitter {
        pub playback: Mutex<Vec<PlaybackEvent>>,
        pub room: Mutex<Vec<RoomEvent>>,
        pub system: Mutex<Vec<SystemEvent>>,
    }

    impl RecordingEmitter {
        pub(crate) fn playback(&self) -> Vec<PlaybackEvent> {
            self.playback.lock().clone()
        }

        pub(crate) fn room(&self) -> Vec<RoomEvent> {
            self.room.lock().clone()
        }
    }

    impl EventEmitter for RecordingEmitter {
        fn emit_playback(&self, event: PlaybackEvent) {
            self.playback.lock().push(event);
        }

        fn emit_room(&self, event: RoomEvent) {
            self.room.lock().push(event);
        }

        fn emit_system(&self, event: SystemEvent) {
            self.system.lock().push(event);
        }
    }

    #[test]
    fn recording_emitter_tracks_events() {
        let emitter = RecordingEmitter::default();

        emitter.emit_playback(PlaybackEvent::QueueFinished {
            room_id: "a".into(),
            timestamp: 0,
        });
        emitter.emit_room(RoomEvent::IdleDisconnected {
            room_id: "a".into(),
            timestamp: 0,
        });

        assert_eq!(emitter.playback().len(), 1);
        assert_eq!(emitter.room().len(), 1);
        assert!(emitter.system.lock().is_empty());
    }
}
