//! Startup check of the resolver credential (cookie) file.

use std::fs::OpenOptions;
use std::io::ErrorKind;
use std::path::Path;

use anyhow::{Context, Result};

/// Files smaller than this are unlikely to hold a usable session.
const MIN_CREDENTIAL_BYTES: u64 = 100;

/// What the startup check found.
#[derive(Debug, PartialEq, Eq)]
pub enum CredentialStatus {
    /// The file was missing and an empty one was created.
    Created,
    /// The file exists but is suspiciously small.
    TooSmall(u64),
    Present(u64),
}

/// Makes sure the credential file exists.
///
/// A missing file is created empty; a small one is only warned about.
/// Fails when the file can neither be inspected nor created.
pub fn check_credentials(path: &Path) -> Result<CredentialStatus> {
    match std::fs::metadata(path) {
        Ok(meta) if meta.len() < MIN_CREDENTIAL_BYTES => {
            log::warn!(
                "Credential file {} is empty or too small ({} bytes); restricted tracks may fail",
                path.display(),
                meta.len()
            );
            Ok(CredentialStatus::TooSmall(meta.len()))
        }
        Ok(meta) => Ok(CredentialStatus::Present(meta.len())),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            log::warn!(
                "Credential file {} not found, creating an empty one",
                path.display()
            );
            OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(path)
                .with_context(|| format!("Failed to create credential file {}", path.display()))?;
            Ok(CredentialStatus::Created)
        }
        Err(e) => Err(e)
            .with_context(|| format!("Failed to inspect credential file {}", path.display())),
    }
}
