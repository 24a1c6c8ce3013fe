//! Post-fetch verification of downloaded artifacts.
//!
//! Files are named relative to the artifact. Each backend supplies a resolver
//! mapping that name to a path on disk: flat checkpoint directories join it
//! onto the destination, snapshot caches look it up in the current snapshot.

use std::io::{self, Read};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::{FetchError, FetchErrorKind};
use crate::registry::ArtifactDescriptor;

/// Fail with `Incomplete` if any expected file is missing or empty under the
/// descriptor's destination
pub fn verify_expected_files(descriptor: &ArtifactDescriptor) -> Result<(), FetchError> {
    verify_expected_files_with(descriptor, |file| Some(descriptor.destination.join(file)))
}

/// Like [`verify_expected_files`], resolving each file through `resolve`.
/// A file that does not resolve counts as missing.
pub fn verify_expected_files_with<F>(descriptor: &ArtifactDescriptor, resolve: F) -> Result<(), FetchError>
where
    F: Fn(&str) -> Option<PathBuf>,
{
    let missing: Vec<String> = descriptor
        .expected_files
        .iter()
        .filter(|file| !resolve(file).is_some_and(|path| non_empty_file(&path)))
        .cloned()
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        warn!(artifact = %descriptor.name, ?missing, "expected files missing after fetch");
        Err(FetchError::new(
            &descriptor.name,
            FetchErrorKind::Incomplete { missing },
        ))
    }
}

/// Compare every configured sha256 against the file under the destination.
///
/// A mismatching file is removed so the next run downloads it again.
pub fn verify_checksums(descriptor: &ArtifactDescriptor) -> Result<(), FetchError> {
    verify_checksums_with(descriptor, |file| Some(descriptor.destination.join(file)))
}

/// Like [`verify_checksums`], resolving each file through `resolve`.
///
/// When the resolved path is a symlink (snapshot caches link into a blob
/// store), the blob it points to is removed along with the link.
pub fn verify_checksums_with<F>(descriptor: &ArtifactDescriptor, resolve: F) -> Result<(), FetchError>
where
    F: Fn(&str) -> Option<PathBuf>,
{
    for (file, expected) in &descriptor.checksums {
        let Some(path) = resolve(file) else {
            return Err(FetchError::new(
                &descriptor.name,
                FetchErrorKind::Incomplete {
                    missing: vec![file.clone()],
                },
            ));
        };
        let actual = sha256_hex(&path).map_err(|e| FetchError::io(&descriptor.name, &path, &e))?;

        if !actual.eq_ignore_ascii_case(expected) {
            warn!(
                artifact = %descriptor.name,
                path = %path.display(),
                expected = %expected,
                actual = %actual,
                "checksum mismatch, removing file"
            );
            remove_corrupt(&path);
            return Err(FetchError::new(
                &descriptor.name,
                FetchErrorKind::Integrity {
                    file: file.clone(),
                    expected: expected.clone(),
                    actual,
                },
            ));
        }
        debug!(artifact = %descriptor.name, file = %file, "checksum ok");
    }
    Ok(())
}

fn remove_corrupt(path: &Path) {
    let is_link = std::fs::symlink_metadata(path).is_ok_and(|m| m.file_type().is_symlink());
    if is_link {
        match std::fs::canonicalize(path) {
            Ok(blob) => {
                if let Err(e) = std::fs::remove_file(&blob) {
                    warn!(path = %blob.display(), "failed to remove corrupt blob: {e}");
                }
            }
            Err(e) => warn!(path = %path.display(), "cannot resolve link target: {e}"),
        }
    }
    if let Err(e) = std::fs::remove_file(path) {
        warn!(path = %path.display(), "failed to remove corrupt file: {e}");
    }
}

/// Compute the SHA-256 hex digest of a file's contents, 64 KiB at a time.
pub fn sha256_hex(path: &Path) -> io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 65_536];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect())
}

pub(crate) fn non_empty_file(path: &Path) -> bool {
    std::fs::metadata(path).is_ok_and(|m| m.is_file() && m.len() > 0)
}
