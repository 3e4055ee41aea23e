//! Track resolution: turning a user query into playable tracks.
//!
//! The extraction itself is an external collaborator behind the
//! [`TrackResolver`] trait. This module defines the values that cross that
//! boundary and the error taxonomy, plus two implementations:
//!
//! - [`YtDlpResolver`]: adapter around an external `yt-dlp` executable
//! - [`CachedResolver`]: TTL cache, single-flight and bounded concurrency on top
//!   of any other resolver

mod cached;
mod ytdlp;

pub use cached::CachedResolver;
pub use ytdlp::YtDlpResolver;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A playable track. Produced by the resolver and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    /// Direct URL of the audio stream.
    pub stream_url: String,
    pub title: String,
}

impl Track {
    pub fn new(stream_url: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            stream_url: stream_url.into(),
            title: title.into(),
        }
    }
}

/// An unresolved reference to one item of an expanded playlist.
///
/// Entries are resolved lazily, one at a time, when the ready queue runs dry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistEntry {
    /// Page URL of the item, fed back to the resolver.
    pub url: String,
    pub title: Option<String>,
    pub duration_secs: Option<u64>,
}

impl PlaylistEntry {
    /// Title if known, otherwise the URL.
    pub fn display_title(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.url)
    }
}

/// One item accepted by the queue: a ready track or a pending playlist entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueItem {
    Track(Track),
    Entry(PlaylistEntry),
}

/// Result of resolving a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolved {
    /// A single playable track.
    Single(Track),
    /// An expanded playlist; may mix ready tracks and pending entries.
    Playlist(Vec<QueueItem>),
}

impl Resolved {
    pub fn is_playlist(&self) -> bool {
        matches!(self, Self::Playlist(_))
    }

    pub fn into_items(self) -> Vec<QueueItem> {
        match self {
            Self::Single(track) => vec![QueueItem::Track(track)],
            Self::Playlist(items) => items,
        }
    }
}

/// Errors reported by a resolver.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResolutionError {
    /// Nothing matched the query, or the item no longer exists.
    #[error("Nothing found: {0}")]
    NotFound(String),

    /// The item is private, age-gated, live, too long or otherwise refused.
    #[error("Track is restricted: {0}")]
    Restricted(String),

    /// The upstream service throttled the request.
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// The resolver did not answer in time.
    #[error("Resolution timed out: {0}")]
    Timeout(String),

    /// The resolver could not be reached or is shutting down.
    #[error("Resolver unavailable: {0}")]
    Unavailable(String),

    #[error("Resolution failed: {0}")]
    Other(String),
}

impl ResolutionError {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RateLimited(_) | Self::Timeout(_) | Self::Unavailable(_) | Self::Other(_)
        )
    }
}

/// Turns queries into playable tracks.
#[async_trait]
pub trait TrackResolver: Send + Sync {
    /// Resolves a URL or free-text query.
    ///
    /// With `expand_playlist`, a playlist URL yields [`Resolved::Playlist`];
    /// otherwise only a single track is returned.
    async fn resolve(&self, query: &str, expand_playlist: bool)
        -> Result<Resolved, ResolutionError>;

    /// Resolves one pending playlist entry into a playable track.
    async fn resolve_entry(&self, entry: &PlaylistEntry) -> Result<Track, ResolutionError>;
}

/// Whether a query should be expanded as a playlist.
pub fn is_playlist_query(query: &str) -> bool {
    query.contains("list=") || query.to_lowercase().contains("playlist")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn playlist_detection() {
        assert!(is_playlist_query(
            "https://www.youtube.com/watch?v=abc&list=PL123"
        ));
        assert!(is_playlist_query("https://example.com/PlayList/42"));
        assert!(!is_playlist_query("https://www.youtube.com/watch?v=abc"));
        assert!(!is_playlist_query("lofi beats"));
    }

    #[test]
    fn single_resolves_into_one_item() {
        let track = Track::new("https://cdn/a.m4a", "A");
        let resolved = Resolved::Single(track.clone());
        assert!(!resolved.is_playlist());
        assert_eq!(resolved.into_items(), vec![QueueItem::Track(track)]);
    }

    #[test]
    fn entry_display_title_falls_back_to_url() {
        let entry = PlaylistEntry {
            url: "https://youtu.be/x".into(),
            title: None,
            duration_secs: None,
        };
        assert_eq!(entry.display_title(), "https://youtu.be/x");
    }

    #[test]
    fn transient_classification() {
        assert!(ResolutionError::RateLimited("429".into()).is_transient());
        assert!(ResolutionError::Timeout("60s".into()).is_transient());
        assert!(!ResolutionError::NotFound("x".into()).is_transient());
        assert!(!ResolutionError::Restricted("private".into()).is_transient());
    }
}
