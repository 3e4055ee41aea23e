//! Disk headroom check for the temp directory.
//!
//! Resolver and audio processes leave scratch files behind. After every track
//! the player asks a [`StorageProbe`] for the free space; below the warning
//! threshold the probe purges known scratch files and measures again. The
//! result is only reported, playback never waits on it.

use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::constants::PURGEABLE_TEMP_PREFIXES;
use crate::state::Config;

/// Free-space status of the scratch directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum StorageStatus {
    #[serde(rename_all = "camelCase")]
    Ok { free_bytes: u64 },
    #[serde(rename_all = "camelCase")]
    Low { free_bytes: u64 },
    #[serde(rename_all = "camelCase")]
    Critical { free_bytes: u64 },
    /// Free space could not be measured.
    Unknown { reason: String },
}

/// Checks (and where possible restores) disk headroom.
pub trait StorageProbe: Send + Sync {
    fn check(&self) -> StorageStatus;
}

/// [`StorageProbe`] for a temp directory, measured with `statvfs`.
pub struct TempDirProbe {
    dir: PathBuf,
    warn_below: u64,
    critical_below: u64,
    prefixes: Vec<String>,
}

impl TempDirProbe {
    pub fn new(dir: impl Into<PathBuf>, config: &Config) -> Self {
        Self {
            dir: dir.into(),
            warn_below: config.storage_warn_bytes,
            critical_below: config.storage_critical_bytes,
            prefixes: PURGEABLE_TEMP_PREFIXES
                .iter()
                .map(|prefix| prefix.to_string())
                .collect(),
        }
    }

    /// Probe for the system temp directory.
    pub fn system(config: &Config) -> Self {
        Self::new(std::env::temp_dir(), config)
    }

    /// Deletes scratch entries matching a known prefix. Returns how many were
    /// removed.
    fn purge(&self) -> usize {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                log::warn!("[Storage] Cannot list {}: {}", self.dir.display(), e);
                return 0;
            }
        };

        let mut removed = 0;
        for entry in entries.flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if !self.prefixes.iter().any(|prefix| name.starts_with(prefix)) {
                continue;
            }

            let path = entry.path();
            let result = match entry.file_type() {
                Ok(kind) if kind.is_dir() => std::fs::remove_dir_all(&path),
                Ok(_) => std::fs::remove_file(&path),
                Err(e) => Err(e),
            };
            match result {
                Ok(()) => removed += 1,
                Err(e) => log::debug!("[Storage] Could not remove {}: {}", path.display(), e),
            }
        }
        removed
    }

    fn classify(&self, free_bytes: u64) -> StorageStatus {
        if free_bytes < self.critical_below {
            StorageStatus::Critical { free_bytes }
        } else if free_bytes < self.warn_below {
            StorageStatus::Low { free_bytes }
        } else {
            StorageStatus::Ok { free_bytes }
        }
    }
}

impl StorageProbe for TempDirProbe {
    fn check(&self) -> StorageStatus {
        let free = match free_bytes(&self.dir) {
            Ok(free) => free,
            Err(e) => {
                log::warn!("[Storage] Cannot measure {}: {}", self.dir.display(), e);
                return StorageStatus::Unknown {
                    reason: e.to_string(),
                };
            }
        };
        if free >= self.warn_below {
            return StorageStatus::Ok { free_bytes: free };
        }

        log::warn!(
            "[Storage] Low disk space: {} MiB free in {}, purging scratch files",
            free / MIB,
            self.dir.display()
        );
        let removed = self.purge();
        let free = free_bytes(&self.dir).unwrap_or(free);

        let status = self.classify(free);
        match &status {
            StorageStatus::Critical { .. } => log::error!(
                "[Storage] Critically low disk space after purging {} item(s): {} MiB free",
                removed,
                free / MIB
            ),
            StorageStatus::Low { .. } => log::warn!(
                "[Storage] Still low after purging {} item(s): {} MiB free",
                removed,
                free / MIB
            ),
            _ => log::info!(
                "[Storage] Purged {} item(s), {} MiB free",
                removed,
                free / MIB
            ),
        }
        status
    }
}

const MIB: u64 = 1024 * 1024;

#[cfg(unix)]
fn free_bytes(path: &Path) -> io::Result<u64> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    // SAFETY: statvfs is plain old data; an all-zero value is valid.
    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    // SAFETY: c_path is NUL-terminated and stat is a valid out-pointer.
    let rc = unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok((stat.f_bavail as u64).saturating_mul(stat.f_frsize as u64))
}

#[cfg(not(unix))]
fn free_bytes(_path: &Path) -> io::Result<u64> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "free space is only measured on unix",
    ))
}
