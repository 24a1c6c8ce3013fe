//! Read-only filesystem checks deciding whether an artifact is already on disk.

use std::path::Path;

use tracing::debug;

use crate::error::PresenceCheckError;
use crate::registry::{ArtifactDescriptor, PresenceProbe};

/// Answers whether a descriptor's artifact is materialised locally.
///
/// Probing never fails: any error while reading the filesystem counts as
/// "not present", which forces a fetch attempt instead of skipping one.
#[derive(Debug, Clone, Copy, Default)]
pub struct PresenceChecker;

impl PresenceChecker {
    /// Create a presence checker
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Check whether `descriptor` is already materialised
    #[must_use]
    pub fn is_present(&self, descriptor: &ArtifactDescriptor) -> bool {
        let result = match &descriptor.presence_probe {
            PresenceProbe::File(path) => file_present(path),
            PresenceProbe::Directory(path) => dir_present(path),
            PresenceProbe::Pattern(pattern) => Ok(pattern_present(pattern)),
        };

        match result {
            Ok(present) => {
                debug!(
                    artifact = %descriptor.name,
                    probe = %descriptor.presence_probe.display(),
                    present,
                    "presence probe evaluated"
                );
                present
            }
            Err(err) => {
                debug!(artifact = %descriptor.name, "{err}; treating as absent");
                false
            }
        }
    }
}

/// A regular file with at least one byte
fn file_present(path: &Path) -> Result<bool, PresenceCheckError> {
    match std::fs::metadata(path) {
        Ok(meta) => Ok(meta.is_file() && meta.len() > 0),
        Err(err) if is_absence(&err) => Ok(false),
        Err(source) => Err(PresenceCheckError {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// A directory with at least one entry. Fetch tools may create the directory
/// before populating it, so an empty one is not proof of anything.
fn dir_present(path: &Path) -> Result<bool, PresenceCheckError> {
    match std::fs::read_dir(path) {
        Ok(mut entries) => Ok(entries.next().is_some()),
        Err(err) if is_absence(&err) => Ok(false),
        Err(source) => Err(PresenceCheckError {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn pattern_present(pattern: &str) -> bool {
    let Ok(paths) = glob::glob(pattern) else {
        debug!(pattern, "invalid glob pattern; treating as absent");
        return false;
    };

    paths.flatten().any(|path| {
        if path.is_dir() {
            dir_present(&path).unwrap_or(false)
        } else {
            file_present(&path).unwrap_or(false)
        }
    })
}

fn is_absence(err: &std::io::Error) -> bool {
    // A file standing where a parent directory should be is NotADirectory,
    // which stable std still reports through the raw OS error.
    err.kind() == std::io::ErrorKind::NotFound || err.raw_os_error() == Some(ENOTDIR)
}

#[cfg(unix)]
const ENOTDIR: i32 = 20;
#[cfg(not(unix))]
const ENOTDIR: i32 = 267;
