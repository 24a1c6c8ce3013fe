//! Artifact retrieval backends.
//!
//! [`ArtifactFetcher`] is the seam the orchestrator depends on. Production
//! code uses [`BackendFetcher`], which routes each descriptor to the backend
//! named by its source.

/// Post-fetch verification
pub mod integrity;
/// Snapshot-cache downloads through the hub client
pub mod mirror;
/// Flat checkpoint-directory downloads
pub mod primary;

use async_trait::async_trait;
use tracing::debug;

use crate::config::PreflightConfig;
use crate::error::{FetchError, PreflightResult};
use crate::registry::{ArtifactDescriptor, SourceKind};

pub use mirror::MirrorCacheFetcher;
pub use primary::PrimaryRepositoryFetcher;

/// Retrieves one artifact into its destination.
///
/// Implementations must be idempotent: fetching an artifact that is already
/// fully present is a no-op or a quick verification, never a destructive
/// re-download.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ArtifactFetcher: Send + Sync {
    /// Fetch `descriptor`, reporting failures without judging their severity
    async fn fetch(&self, descriptor: &ArtifactDescriptor) -> Result<(), FetchError>;
}

/// Dispatches on `descriptor.source.kind`
#[derive(Debug)]
pub struct BackendFetcher {
    primary: PrimaryRepositoryFetcher,
    mirror: MirrorCacheFetcher,
}

impl BackendFetcher {
    /// Combine two backends
    #[must_use]
    pub const fn new(primary: PrimaryRepositoryFetcher, mirror: MirrorCacheFetcher) -> Self {
        Self { primary, mirror }
    }

    /// Build both backends from configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn from_config(config: &PreflightConfig) -> PreflightResult<Self> {
        Ok(Self::new(
            PrimaryRepositoryFetcher::new(&config.primary)?,
            MirrorCacheFetcher::new(&config.mirror),
        ))
    }
}

#[async_trait]
impl ArtifactFetcher for BackendFetcher {
    async fn fetch(&self, descriptor: &ArtifactDescriptor) -> Result<(), FetchError> {
        debug!(
            artifact = %descriptor.name,
            backend = descriptor.source.kind.as_str(),
            repo = %descriptor.source.repo_id,
            "dispatching fetch"
        );
        match descriptor.source.kind {
            SourceKind::PrimaryRepository => self.primary.fetch(descriptor).await,
            SourceKind::MirrorCache => self.mirror.fetch(descriptor).await,
        }
    }
}

/// Repository files selected by the descriptor's include patterns
pub(crate) fn select_files(descriptor: &ArtifactDescriptor, files: Vec<String>) -> Vec<String> {
    if descriptor.source.include.is_empty() {
        return files;
    }
    let patterns: Vec<glob::Pattern> = descriptor
        .source
        .include
        .iter()
        .filter_map(|p| glob::Pattern::new(p).ok())
        .collect();
    files
        .into_iter()
        .filter(|file| patterns.iter().any(|p| p.matches(file)))
        .collect()
}

/// Whether the include list names files literally, so no listing is needed
pub(crate) fn include_is_literal(descriptor: &ArtifactDescriptor) -> bool {
    !descriptor.source.include.is_empty()
        && descriptor
            .source
            .include
            .iter()
            .all(|p| !p.contains(['*', '?', '[']))
}

/// Map an HTTP status to the matching fetch failure
pub(crate) fn status_error(descriptor: &str, status: u16, url: &str) -> FetchError {
    match status {
        401 | 403 => FetchError::authorization(descriptor, format!("HTTP {status} from {url}")),
        404 => FetchError::not_found(descriptor, url.to_string()),
        _ => FetchError::network(descriptor, format!("HTTP {status} from {url}")),
    }
}
