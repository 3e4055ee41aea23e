//! Centralized error types for the guildtune core library.
//!
//! This module provides a unified error handling system that:
//! - Gives every component error a machine-readable code via [`ErrorCode`]
//! - Maps errors to appropriate HTTP status codes
//! - Implements `IntoResponse` for automatic JSON error responses

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use crate::audio::{AudioError, ProcessStartError};
use crate::resolver::ResolutionError;
use crate::services::CommandError;
use crate::transport::{ConnectionError, TransportError};

/// Trait for error types that provide machine-readable error codes.
pub trait ErrorCode {
    /// Returns a machine-readable error code for API responses.
    fn code(&self) -> &'static str;
}

impl ErrorCode for ResolutionError {
    fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "track_not_found",
            Self::Restricted(_) => "track_restricted",
            Self::RateLimited(_) => "rate_limited",
            Self::Timeout(_) => "resolver_timeout",
            Self::Unavailable(_) => "resolver_unavailable",
            Self::Other(_) => "resolution_failed",
        }
    }
}

impl ErrorCode for TransportError {
    fn code(&self) -> &'static str {
        match self {
            Self::UnknownChannel(_) => "unknown_channel",
            Self::Unreachable(_) => "endpoint_unreachable",
            Self::Closed => "connection_closed",
            Self::Other(_) => "transport_error",
        }
    }
}

impl ErrorCode for ConnectionError {
    fn code(&self) -> &'static str {
        match self {
            Self::Exhausted { .. } => "connection_failed",
            Self::NotConnected => "not_connected",
            Self::Transport(e) => e.code(),
        }
    }
}

impl ErrorCode for AudioError {
    fn code(&self) -> &'static str {
        match self {
            Self::Spawn(_) => "audio_spawn_failed",
            Self::ExitedEarly => "audio_exited_early",
            Self::Signal(_) => "audio_signal_failed",
            Self::Unsupported(_) => "unsupported",
            Self::Io(_) => "audio_io_error",
        }
    }
}

impl ErrorCode for ProcessStartError {
    fn code(&self) -> &'static str {
        "audio_start_failed"
    }
}

impl ErrorCode for CommandError {
    fn code(&self) -> &'static str {
        match self {
            Self::Resolution(e) => e.code(),
            Self::QueueFull(_) => "queue_full",
            Self::NotPlaying => "not_playing",
            Self::NotConnected => "not_connected",
            Self::InvalidIndex(_) => "invalid_index",
            Self::InvalidRequest(_) => "invalid_request",
            Self::ShuttingDown => "shutting_down",
            Self::Transport(e) => e.code(),
        }
    }
}

/// Application-wide error type for the guildtune server.
#[derive(Debug, Error, Serialize)]
#[serde(tag = "type", content = "details")]
pub enum GuildtuneError {
    /// Nothing matched the query.
    #[error("Track not found: {0}")]
    TrackNotFound(String),

    /// The track is private, age-gated, live or too long.
    #[error("Track is restricted: {0}")]
    Restricted(String),

    /// The upstream service throttled the resolver.
    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Resolver timed out: {0}")]
    ResolverTimeout(String),

    /// Any other resolver failure.
    #[error("Resolution failed: {0}")]
    Resolution(String),

    #[error("Queue is full ({0} items)")]
    QueueFull(usize),

    #[error("Nothing is playing")]
    NotPlaying,

    #[error("Not connected to a voice channel")]
    NotConnected,

    /// Client sent an invalid or malformed request.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Service is shutting down")]
    ShuttingDown,

    /// Server configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl GuildtuneError {
    /// Returns a machine-readable error code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::TrackNotFound(_) => "track_not_found",
            Self::Restricted(_) => "track_restricted",
            Self::RateLimited(_) => "rate_limited",
            Self::ResolverTimeout(_) => "resolver_timeout",
            Self::Resolution(_) => "resolution_failed",
            Self::QueueFull(_) => "queue_full",
            Self::NotPlaying => "not_playing",
            Self::NotConnected => "not_connected",
            Self::InvalidRequest(_) => "invalid_request",
            Self::ShuttingDown => "shutting_down",
            Self::Configuration(_) => "configuration_error",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Maps the error to an appropriate HTTP status code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::TrackNotFound(_) => StatusCode::NOT_FOUND,
            Self::Restricted(_) => StatusCode::FORBIDDEN,
            Self::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            Self::ResolverTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::Resolution(_) => StatusCode::BAD_GATEWAY,
            Self::QueueFull(_) | Self::NotPlaying | Self::NotConnected => StatusCode::CONFLICT,
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::ShuttingDown | Self::Configuration(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Result Type Aliases
// ─────────────────────────────────────────────────────────────────────────────

/// Convenient Result alias for application-wide operations.
pub type GuildtuneResult<T> = Result<T, GuildtuneError>;

/// JSON response body for error responses.
#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
    status: u16,
}

impl IntoResponse for GuildtuneError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: self.code(),
            message: self.to_string(),
            status: status.as_u16(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<ResolutionError> for GuildtuneError {
    fn from(err: ResolutionError) -> Self {
        match err {
            ResolutionError::NotFound(msg) => Self::TrackNotFound(msg),
            ResolutionError::Restricted(msg) => Self::Restricted(msg),
            ResolutionError::RateLimited(msg) => Self::RateLimited(msg),
            ResolutionError::Timeout(msg) => Self::ResolverTimeout(msg),
            other => Self::Resolution(other.to_string()),
        }
    }
}

impl From<CommandError> for GuildtuneError {
    fn from(err: CommandError) -> Self {
        match err {
            CommandError::Resolution(e) => e.into(),
            CommandError::QueueFull(capacity) => Self::QueueFull(capacity),
            CommandError::NotPlaying => Self::NotPlaying,
            CommandError::NotConnected => Self::NotConnected,
            e @ CommandError::InvalidIndex(_) => Self::InvalidRequest(e.to_string()),
            CommandError::InvalidRequest(msg) => Self::InvalidRequest(msg),
            CommandError::ShuttingDown => Self::ShuttingDown,
            CommandError::Transport(e) => Self::Internal(e.to_string()),
        }
    }
}
