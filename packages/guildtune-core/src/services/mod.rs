//! Application services layer.
//!
//! This module contains the services that orchestrate between the API layer
//! and the room sessions, resolver, transport and audio supervisor.

pub mod maintenance;
pub mod music_service;
pub mod player;
pub mod storage;

pub use maintenance::{MaintenanceReport, MaintenanceService};
pub use music_service::{CommandError, EnqueueOutcome, MusicService, ResetReport};
pub use player::Player;
pub use storage::{StorageProbe, StorageStatus, TempDirProbe};
