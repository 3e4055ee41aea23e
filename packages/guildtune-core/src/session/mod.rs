//! Room sessions and the registry that owns them.
//!
//! - [`RoomSession`]: one room's queue, connection and playback slot
//! - [`SessionRegistry`]: lazily created sessions, sweeping and shutdown
//! - [`TrackQueue`]: bounded ready/pending queue
//! - [`IdleTimer`]: cancellable idle-disconnect timer

mod idle;
mod queue;
mod registry;
mod room;

pub use idle::IdleTimer;
pub use queue::TrackQueue;
pub use registry::{SessionRegistry, SweepReport};
pub use room::{
    AdvanceGuard, EnqueueThrottle, IdleOutcome, QueueSnapshot, RoomId, RoomSession, RoomSummary,
};
