//! [`TrackResolver`] backed by an external `yt-dlp` executable.
//!
//! The executable does the extraction; this adapter only builds the command
//! line, parses the `--dump-single-json` output and maps failures onto
//! [`ResolutionError`].

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;

use super::{PlaylistEntry, QueueItem, ResolutionError, Resolved, Track, TrackResolver};
use crate::constants::{MAX_TRACK_DURATION_SECS, PLAYLIST_ENTRY_LIMIT};

/// Subset of the `yt-dlp` info JSON that the adapter reads.
///
/// The same shape describes videos, playlists and flat playlist entries.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Info {
    #[serde(rename = "_type")]
    kind: Option<String>,
    title: Option<String>,
    fulltitle: Option<String>,
    url: Option<String>,
    webpage_url: Option<String>,
    duration: Option<f64>,
    is_live: Option<bool>,
    availability: Option<String>,
    formats: Vec<Format>,
    entries: Vec<Option<Info>>,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
struct Format {
    url: Option<String>,
    ext: Option<String>,
    acodec: Option<String>,
    protocol: Option<String>,
    abr: Option<f64>,
    asr: Option<f64>,
    filesize: Option<f64>,
}

/// Resolves queries by shelling out to `yt-dlp`.
pub struct YtDlpResolver {
    binary: PathBuf,
    cookies: Option<PathBuf>,
    timeout: Duration,
}

impl YtDlpResolver {
    /// Creates a resolver using `binary`, an optional cookie file, and a
    /// per-invocation timeout.
    pub fn new(binary: impl Into<PathBuf>, cookies: Option<PathBuf>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            cookies,
            timeout,
        }
    }

    /// Runs `yt-dlp` against `target` and parses its JSON output.
    async fn dump_json(&self, target: &str, flat_playlist: bool) -> Result<Info, ResolutionError> {
        let mut cmd = Command::new(&self.binary);
        cmd.args([
            "--dump-single-json",
            "--no-warnings",
            "--quiet",
            "--format",
            "bestaudio/best",
            "--socket-timeout",
            "15",
            "--retries",
            "5",
        ]);
        if flat_playlist {
            cmd.args(["--flat-playlist", "--playlist-end"])
                .arg(PLAYLIST_ENTRY_LIMIT.to_string());
        } else {
            cmd.arg("--no-playlist");
        }
        if let Some(cookies) = self.usable_cookies() {
            cmd.arg("--cookies").arg(cookies);
        }
        cmd.arg("--")
            .arg(target)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        log::debug!("[Resolver] yt-dlp {}", target);
        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(ResolutionError::Unavailable(format!(
                    "failed to run {}: {}",
                    self.binary.display(),
                    e
                )))
            }
            Err(_) => {
                return Err(ResolutionError::Timeout(format!(
                    "no answer within {}s",
                    self.timeout.as_secs()
                )))
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_failure(stderr.trim()));
        }

        serde_json::from_slice(&output.stdout)
            .map_err(|e| ResolutionError::Other(format!("unreadable resolver output: {}", e)))
    }

    fn usable_cookies(&self) -> Option<&PathBuf> {
        let path = self.cookies.as_ref()?;
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > 0 => Some(path),
            _ => None,
        }
    }
}

#[async_trait]
impl TrackResolver for YtDlpResolver {
    async fn resolve(
        &self,
        query: &str,
        expand_playlist: bool,
    ) -> Result<Resolved, ResolutionError> {
        let target = normalize_query(query);
        let info = self.dump_json(&target, expand_playlist).await?;

        let is_playlist = info.kind.as_deref() == Some("playlist");
        if expand_playlist && is_playlist {
            let items = playlist_items(info);
            if items.is_empty() {
                return Err(ResolutionError::NotFound(
                    "playlist has no playable entries".into(),
                ));
            }
            log::info!("[Resolver] Expanded playlist into {} entries", items.len());
            return Ok(Resolved::Playlist(items));
        }

        // Searches come back as a one-entry playlist with full info.
        let info = if is_playlist {
            info.entries
                .into_iter()
                .flatten()
                .next()
                .ok_or_else(|| ResolutionError::NotFound(format!("no results for '{}'", query)))?
        } else {
            info
        };

        track_from_info(info).map(Resolved::Single)
    }

    async fn resolve_entry(&self, entry: &PlaylistEntry) -> Result<Track, ResolutionError> {
        if entry
            .duration_secs
            .is_some_and(|secs| secs > MAX_TRACK_DURATION_SECS)
        {
            return Err(ResolutionError::Restricted(format!(
                "'{}' is longer than {} minutes",
                entry.display_title(),
                MAX_TRACK_DURATION_SECS / 60
            )));
        }

        let info = self.dump_json(&entry.url, false).await?;
        track_from_info(info)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Parsing Helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Repairs truncated URLs and turns free text into a search.
fn normalize_query(query: &str) -> String {
    let query = query.trim();
    let query = if query.starts_with("ttps://") {
        format!("h{}", query)
    } else {
        query.to_string()
    };

    if query.starts_with("http://") || query.starts_with("https://") {
        query
    } else {
        format!("ytsearch1:{}", query)
    }
}

/// Maps `yt-dlp` stderr onto the error taxonomy.
fn classify_failure(stderr: &str) -> ResolutionError {
    let lower = stderr.to_lowercase();
    let message = stderr
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .unwrap_or("resolver exited with an error")
        .to_string();

    if lower.contains("private video") || lower.contains("sign in") || lower.contains("members-only")
    {
        ResolutionError::Restricted(message)
    } else if lower.contains("http error 429") || lower.contains("too many requests") {
        ResolutionError::RateLimited(message)
    } else if lower.contains("unavailable") || lower.contains("not found") || lower.contains("404")
    {
        ResolutionError::NotFound(message)
    } else {
        ResolutionError::Other(message)
    }
}

/// Converts flat playlist entries into pending queue items.
///
/// Private and auth-gated entries are skipped.
fn playlist_items(info: Info) -> Vec<QueueItem> {
    info.entries
        .into_iter()
        .flatten()
        .filter(|entry| {
            let restricted = matches!(
                entry.availability.as_deref(),
                Some("private") | Some("needs_auth") | Some("subscriber_only")
            );
            if restricted {
                log::debug!(
                    "[Resolver] Skipping restricted entry {:?}",
                    entry.title.as_deref()
                );
            }
            !restricted
        })
        .filter_map(|entry| {
            let url = entry.webpage_url.or(entry.url)?;
            Some(QueueItem::Entry(PlaylistEntry {
                url,
                title: entry.title,
                duration_secs: entry.duration.map(|d| d.max(0.0) as u64),
            }))
        })
        .take(PLAYLIST_ENTRY_LIMIT)
        .collect()
}

fn track_from_info(info: Info) -> Result<Track, ResolutionError> {
    let title = info
        .title
        .clone()
        .or_else(|| info.fulltitle.clone())
        .unwrap_or_else(|| "Untitled".to_string());

    if info.is_live == Some(true) {
        return Err(ResolutionError::Restricted(format!(
            "'{}' is a live stream",
            title
        )));
    }
    if info
        .duration
        .is_some_and(|d| d > MAX_TRACK_DURATION_SECS as f64)
    {
        return Err(ResolutionError::Restricted(format!(
            "'{}' is longer than {} minutes",
            title,
            MAX_TRACK_DURATION_SECS / 60
        )));
    }

    let stream_url = best_audio_url(&info.formats)
        .or(info.url)
        .ok_or_else(|| ResolutionError::NotFound(format!("no audio stream for '{}'", title)))?;

    Ok(Track { stream_url, title })
}

/// Picks the best progressive audio format.
///
/// Prefers m4a, then highest bitrate, then smallest file. DASH/HLS formats and
/// silent formats are skipped. Falls back to any format with audio.
fn best_audio_url(formats: &[Format]) -> Option<String> {
    let has_audio = |f: &&Format| f.url.is_some() && f.acodec.as_deref() != Some("none");

    let mut candidates: Vec<&Format> = formats
        .iter()
        .filter(has_audio)
        .filter(|f| {
            let protocol = f.protocol.as_deref().unwrap_or_default();
            !protocol.contains("dash") && !protocol.contains("hls")
        })
        .filter(|f| f.abr.unwrap_or(0.0) > 0.0 || f.asr.unwrap_or(0.0) > 0.0)
        .collect();

    candidates.sort_by(|a, b| {
        let a_m4a = a.ext.as_deref() == Some("m4a");
        let b_m4a = b.ext.as_deref() == Some("m4a");
        b_m4a
            .cmp(&a_m4a)
            .then_with(|| b.abr.unwrap_or(0.0).total_cmp(&a.abr.unwrap_or(0.0)))
            .then_with(|| {
                a.filesize
                    .unwrap_or(f64::MAX)
                    .total_cmp(&b.filesize.unwrap_or(f64::MAX))
            })
    });

    candidates
        .first()
        .and_then(|f| f.url.clone())
        .or_else(|| formats.iter().find(has_audio).and_then(|f| f.url.clone()))
}
