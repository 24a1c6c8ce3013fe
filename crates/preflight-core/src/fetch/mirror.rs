//! Mirror-cache backend: auxiliary repositories materialised in the hub's
//! content-addressed snapshot layout, shared with the service's own lazy
//! downloads.

use async_trait::async_trait;
use hf_hub::api::tokio::{ApiBuilder, ApiError};
use hf_hub::{Cache, CacheRepo, Repo, RepoType};
use tracing::{debug, info};

use super::integrity::{verify_checksums_with, verify_expected_files_with};
use super::{include_is_literal, select_files, status_error, ArtifactFetcher};
use crate::config::EndpointConfig;
use crate::error::FetchError;
use crate::registry::ArtifactDescriptor;

/// Downloads into `<destination>/models--<org>--<repo>/snapshots/<commit>/`
#[derive(Debug, Clone)]
pub struct MirrorCacheFetcher {
    endpoint: String,
    token: Option<String>,
}

impl MirrorCacheFetcher {
    /// Create a fetcher for the given endpoint
    #[must_use]
    pub fn new(config: &EndpointConfig) -> Self {
        Self {
            endpoint: config.base_url().to_string(),
            token: config.token.clone(),
        }
    }

    fn repo(descriptor: &ArtifactDescriptor) -> Repo {
        Repo::with_revision(
            descriptor.source.repo_id.clone(),
            RepoType::Model,
            descriptor.source.revision.clone(),
        )
    }
}

fn map_api_error(descriptor: &ArtifactDescriptor, err: ApiError) -> FetchError {
    match err {
        ApiError::IoError(e) => FetchError::io(&descriptor.name, &descriptor.destination, &e),
        ApiError::RequestError(e) => match e.status() {
            Some(status) => status_error(
                &descriptor.name,
                status.as_u16(),
                &descriptor.source.repo_id,
            ),
            None => FetchError::network(&descriptor.name, e.to_string()),
        },
        other => FetchError::network(&descriptor.name, other.to_string()),
    }
}

#[async_trait]
impl ArtifactFetcher for MirrorCacheFetcher {
    async fn fetch(&self, descriptor: &ArtifactDescriptor) -> Result<(), FetchError> {
        info!(
            artifact = %descriptor.name,
            repo = %descriptor.source.repo_id,
            cache = %descriptor.destination.display(),
            "pre-warming cache"
        );

        let cache = Cache::new(descriptor.destination.clone());
        let cached = cache.repo(Self::repo(descriptor));

        // Literal file lists resolve entirely from the cache when warm.
        let literal = include_is_literal(descriptor);
        if literal
            && descriptor
                .source
                .include
                .iter()
                .all(|file| cached.get(file).is_some())
        {
            debug!(artifact = %descriptor.name, "all files already cached");
            return verify_snapshot(descriptor, &cached);
        }

        let api = ApiBuilder::from_cache(cache)
            .with_endpoint(self.endpoint.clone())
            .with_token(self.token.clone())
            .with_progress(false)
            .build()
            .map_err(|e| map_api_error(descriptor, e))?;
        let remote = api.repo(Self::repo(descriptor));

        let files = if literal {
            descriptor.source.include.clone()
        } else {
            let info = remote.info().await.map_err(|e| map_api_error(descriptor, e))?;
            select_files(
                descriptor,
                info.siblings.into_iter().map(|s| s.rfilename).collect(),
            )
        };
        if files.is_empty() {
            return Err(FetchError::not_found(
                &descriptor.name,
                format!(
                    "no files in {} match {:?}",
                    descriptor.source.repo_id, descriptor.source.include
                ),
            ));
        }

        let mut downloaded = 0usize;
        for file in &files {
            if cached.get(file).is_some() {
                debug!(artifact = %descriptor.name, file = %file, "cached");
                continue;
            }
            let path = remote
                .get(file)
                .await
                .map_err(|e| map_api_error(descriptor, e))?;
            debug!(artifact = %descriptor.name, path = %path.display(), "downloaded");
            downloaded += 1;
        }

        info!(
            artifact = %descriptor.name,
            downloaded,
            cached = files.len() - downloaded,
            "cache pre-warm complete"
        );
        verify_snapshot(descriptor, &cached)
    }
}

/// Check expected files and checksums against the current snapshot
fn verify_snapshot(descriptor: &ArtifactDescriptor, cached: &CacheRepo) -> Result<(), FetchError> {
    verify_expected_files_with(descriptor, |file| cached.get(file))?;
    verify_checksums_with(descriptor, |file| cached.get(file))
}
