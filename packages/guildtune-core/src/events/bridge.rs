//! Bridge implementation that maps domain events to broadcast transport.
//!
//! The [`BroadcastEventBridge`] lives at the boundary between domain services
//! and transport concerns, mapping typed domain events to the WebSocket
//! broadcast channel.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;

use super::emitter::EventEmitter;
use super::{BroadcastEvent, PlaybackEvent, RoomEvent, SystemEvent};

/// Bridges domain events to the WebSocket broadcast channel.
///
/// This adapter implements [`EventEmitter`] by forwarding events to
/// a `tokio::sync::broadcast` channel that WebSocket handlers subscribe to.
///
/// The bridge can also forward to a secondary emitter (the server installs a
/// [`LoggingEventEmitter`](super::LoggingEventEmitter) at debug level).
#[derive(Clone)]
pub struct BroadcastEventBridge {
    tx: broadcast::Sender<BroadcastEvent>,
    external_emitter: Arc<RwLock<Option<Arc<dyn EventEmitter>>>>,
}

impl BroadcastEventBridge {
    /// Creates a new bridge with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            external_emitter: Arc::new(RwLock::new(None)),
        }
    }

    /// Sets a secondary emitter that receives every event before broadcast.
    pub fn set_external_emitter(&self, emitter: Arc<dyn EventEmitter>) {
        *self.external_emitter.write() = Some(emitter);
    }

    /// Returns a new receiver for the broadcast channel.
    ///
    /// WebSocket handlers use this to subscribe to events.
    pub fn subscribe(&self) -> broadcast::Receiver<BroadcastEvent> {
        self.tx.subscribe()
    }

    /// Number of live subscribers.
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// Generates an [`EventEmitter`] method that forwards to the external emitter
/// (if set) and then sends to the broadcast channel.
macro_rules! impl_emit {
    ($method:ident, $event_ty:ty, $variant:ident) => {
        fn $method(&self, event: $event_ty) {
            if let Some(ref emitter) = *self.external_emitter.read() {
                emitter.$method(event.clone());
            }
            if let Err(e) = self.tx.send(BroadcastEvent::$variant(event)) {
                log::trace!("[EventBridge] No broadcast receivers: {}", e);
            }
        }
    };
}

impl EventEmitter for BroadcastEventBridge {
    impl_emit!(emit_playback, PlaybackEvent, Playback);
    impl_emit!(emit_room, RoomEvent, Room);
    impl_emit!(emit_system, SystemEvent, System);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::emitter::tests::RecordingEmitter;

    #[tokio::test]
    async fn forwards_to_subscribers_and_external_emitter() {
        let bridge = BroadcastEventBridge::new(8);
        let external = Arc::new(RecordingEmitter::default());
        bridge.set_external_emitter(external.clone());
        let mut rx = bridge.subscribe();

        bridge.emit_room(RoomEvent::IdleDisconnected {
            room_id: "guild-1".into(),
            timestamp: 1,
        });

        match rx.recv().await.unwrap() {
            BroadcastEvent::Room(RoomEvent::IdleDisconnected { room_id, .. }) => {
                assert_eq!(room_id, "guild-1")
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert_eq!(external.room().len(), 1);
    }

    #[test]
    fn emitting_without_subscribers_is_harmless() {
        let bridge = BroadcastEventBridge::new(8);
        assert_eq!(bridge.receiver_count(), 0);
        bridge.emit_system(SystemEvent::StorageLow {
            free_bytes: 1,
            critical: true,
            timestamp: 0,
        });
    }
}
