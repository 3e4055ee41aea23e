//! Guildtune Core - per-room playback orchestration.
//!
//! Many independent rooms each own a bounded queue of tracks and stream them,
//! one at a time, into a voice channel. This crate holds all of that logic;
//! the server binary only loads configuration, supplies the real external
//! adapters and serves the API.
//!
//! # Architecture
//!
//! - [`session`]: per-room state, the bounded queue, idle timers and the registry
//! - [`services`]: the playback loop, room commands, maintenance and storage checks
//! - [`resolver`]: query → track resolution, with caching and bounded concurrency
//! - [`transport`]: voice connections with reuse, move and bounded retry
//! - [`audio`]: audio process lifecycle (start, pause, stop, hard cap)
//! - [`events`]: event system for real-time client communication
//! - [`api`]: HTTP and WebSocket surface
//! - [`error`]: centralized error types
//!
//! # Abstraction Traits
//!
//! The external systems are reached only through traits, each with a default
//! adapter for the standalone server:
//!
//! - [`TrackResolver`](resolver::TrackResolver): [`YtDlpResolver`](resolver::YtDlpResolver)
//! - [`VoiceTransport`](transport::VoiceTransport): [`EndpointTransport`](transport::EndpointTransport)
//! - [`AudioLauncher`](audio::AudioLauncher): [`FfmpegLauncher`](audio::FfmpegLauncher)
//! - [`StorageProbe`](services::StorageProbe): [`TempDirProbe`](services::TempDirProbe)
//! - [`EventEmitter`](events::EventEmitter): [`BroadcastEventBridge`](events::BroadcastEventBridge)

#![allow(missing_docs)]
#![warn(clippy::all)]

pub mod api;
pub mod audio;
pub mod bootstrap;
pub mod cache;
pub mod constants;
pub mod error;
pub mod events;
pub mod resolver;
pub mod retry;
pub mod runtime;
pub mod services;
pub mod session;
pub mod state;
pub mod transport;
pub mod utils;

// Re-export commonly used types at the crate root
pub use error::{ErrorCode, GuildtuneError, GuildtuneResult};
pub use events::{
    BroadcastEvent, BroadcastEventBridge, EventEmitter, PlaybackEvent, RoomEvent, SystemEvent,
};
pub use runtime::TaskSpawner;
pub use state::Config;
pub use utils::now_millis;

// Re-export collaborator adapters
pub use audio::FfmpegLauncher;
pub use resolver::YtDlpResolver;
pub use services::TempDirProbe;
pub use transport::EndpointTransport;

// Re-export service types
pub use services::{CommandError, MusicService};
pub use session::{RoomSession, SessionRegistry};

// Re-export bootstrap types
pub use bootstrap::{bootstrap_services, BootstrappedServices, Collaborators};

// Re-export API types
pub use api::{start_server, AppState, ServerError};
