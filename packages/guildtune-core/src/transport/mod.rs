//! Voice transport: the external link a room streams audio into.
//!
//! The transport is a collaborator behind [`VoiceTransport`] and
//! [`VoiceConnection`]. [`ConnectionManager`] layers the room-facing contract on
//! top: reuse, move, and bounded-retry fresh connects.

mod connection;
mod endpoint;

pub use connection::{ConnectionError, ConnectionManager};
pub use endpoint::EndpointTransport;

#[cfg(test)]
pub(crate) use connection::tests;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Errors reported by a transport implementation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The channel reference is not known to the transport.
    #[error("Unknown channel: {0}")]
    UnknownChannel(String),

    /// The channel's endpoint could not be reached.
    #[error("Endpoint unreachable: {0}")]
    Unreachable(String),

    /// The connection handle has already been closed.
    #[error("Connection closed")]
    Closed,

    #[error("Transport error: {0}")]
    Other(String),
}

/// A live link to one voice channel.
#[async_trait]
pub trait VoiceConnection: Send + Sync {
    /// Channel the connection is currently attached to.
    fn channel(&self) -> String;

    /// Output URL the audio process should write to.
    fn sink_url(&self) -> String;

    fn is_connected(&self) -> bool;

    /// Moves the connection to another channel.
    async fn move_to(&self, channel: &str) -> Result<(), TransportError>;

    /// Closes the connection. `force` skips any graceful handshake.
    async fn disconnect(&self, force: bool) -> Result<(), TransportError>;
}

/// Establishes voice connections.
#[async_trait]
pub trait VoiceTransport: Send + Sync {
    async fn connect(
        &self,
        channel: &str,
        timeout: Duration,
    ) -> Result<Arc<dyn VoiceConnection>, TransportError>;
}
