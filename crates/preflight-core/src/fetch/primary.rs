//! Primary-repository backend: a whole model repository downloaded flat into
//! a checkpoint directory.
//!
//! Files already present with non-zero size are skipped, so re-running after
//! an interrupted download only transfers what is missing. Each file streams
//! into `<name>.part` and is renamed into place once complete, and the
//! descriptor's marker file is always fetched last.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use super::integrity::{non_empty_file, verify_checksums, verify_expected_files};
use super::{select_files, status_error, ArtifactFetcher};
use crate::config::EndpointConfig;
use crate::error::{FetchError, PreflightError, PreflightResult};
use crate::registry::{ArtifactDescriptor, PresenceProbe};

#[derive(Debug, Deserialize)]
struct RepoInfoWire {
    #[serde(default)]
    siblings: Vec<SiblingWire>,
}

#[derive(Debug, Deserialize)]
struct SiblingWire {
    rfilename: String,
}

/// Downloads repositories through the hub REST API
#[derive(Debug, Clone)]
pub struct PrimaryRepositoryFetcher {
    client: reqwest::Client,
    endpoint: String,
    token: Option<String>,
}

impl PrimaryRepositoryFetcher {
    /// Create a fetcher for the given endpoint
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the HTTP client cannot be built.
    pub fn new(config: &EndpointConfig) -> PreflightResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .user_agent(concat!("preflight/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| PreflightError::configuration(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: config.base_url().to_string(),
            token: config.token.clone(),
        })
    }

    fn get(&self, url: &str) -> reqwest::RequestBuilder {
        let request = self.client.get(url);
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// List the repository's files, filtered by the descriptor's include patterns
    async fn list_files(&self, descriptor: &ArtifactDescriptor) -> Result<Vec<String>, FetchError> {
        let source = &descriptor.source;
        let url = format!(
            "{}/api/models/{}/revision/{}",
            self.endpoint, source.repo_id, source.revision
        );

        let resp = self
            .get(&url)
            .send()
            .await
            .map_err(|e| FetchError::network(&descriptor.name, e.to_string()))?;
        if !resp.status().is_success() {
            return Err(status_error(&descriptor.name, resp.status().as_u16(), &url));
        }
        let info: RepoInfoWire = resp.json().await.map_err(|e| {
            FetchError::network(&descriptor.name, format!("invalid repository listing: {e}"))
        })?;

        let files = select_files(
            descriptor,
            info.siblings.into_iter().map(|s| s.rfilename).collect(),
        );
        if files.is_empty() {
            return Err(FetchError::not_found(
                &descriptor.name,
                format!("no files in {} match {:?}", source.repo_id, source.include),
            ));
        }
        Ok(files)
    }

    /// Download one file unless it is already in place
    async fn download_file(
        &self,
        descriptor: &ArtifactDescriptor,
        file: &str,
    ) -> Result<bool, FetchError> {
        let dest = descriptor.destination.join(file);
        if non_empty_file(&dest) {
            debug!(artifact = %descriptor.name, file, "already present, skipping");
            return Ok(false);
        }

        let name = &descriptor.name;
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| FetchError::io(name, parent, &e))?;
        }

        let source = &descriptor.source;
        let url = format!(
            "{}/{}/resolve/{}/{file}",
            self.endpoint, source.repo_id, source.revision
        );
        let resp = self
            .get(&url)
            .send()
            .await
            .map_err(|e| FetchError::network(name, e.to_string()))?;
        if !resp.status().is_success() {
            return Err(status_error(name, resp.status().as_u16(), &url));
        }
        let total_bytes = resp.content_length();

        let tmp = part_path(&dest);
        let result = stream_to_file(name, resp, &tmp, total_bytes).await;
        if let Err(err) = result {
            if let Err(e) = tokio::fs::remove_file(&tmp).await {
                debug!(path = %tmp.display(), "failed to clean up partial file: {e}");
            }
            return Err(err);
        }

        tokio::fs::rename(&tmp, &dest)
            .await
            .map_err(|e| FetchError::io(name, &dest, &e))?;
        info!(artifact = %name, file, "downloaded");
        Ok(true)
    }
}

async fn stream_to_file(
    descriptor: &str,
    resp: reqwest::Response,
    tmp: &Path,
    total_bytes: Option<u64>,
) -> Result<(), FetchError> {
    let mut file = tokio::fs::File::create(tmp)
        .await
        .map_err(|e| FetchError::io(descriptor, tmp, &e))?;

    let mut written: u64 = 0;
    let mut stream = resp.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| FetchError::network(descriptor, format!("download read error: {e}")))?;
        file.write_all(&chunk)
            .await
            .map_err(|e| FetchError::io(descriptor, tmp, &e))?;
        written += chunk.len() as u64;
    }
    file.flush()
        .await
        .map_err(|e| FetchError::io(descriptor, tmp, &e))?;
    file.sync_all()
        .await
        .map_err(|e| FetchError::io(descriptor, tmp, &e))?;

    if let Some(expected) = total_bytes {
        if written != expected {
            return Err(FetchError::network(
                descriptor,
                format!("truncated download: got {written} of {expected} bytes"),
            ));
        }
    }
    Ok(())
}

fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".part");
    dest.with_file_name(name)
}

/// The marker file relative to the destination, if the probe is one
fn marker_file(descriptor: &ArtifactDescriptor) -> Option<String> {
    let PresenceProbe::File(path) = &descriptor.presence_probe else {
        return None;
    };
    let relative = path.strip_prefix(&descriptor.destination).ok()?;
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    (!parts.is_empty()).then(|| parts.join("/"))
}

/// Move the marker to the end so it appears only after everything else
fn order_marker_last(files: &mut [String], marker: Option<&str>) {
    if let Some(marker) = marker {
        files.sort_by_key(|f| f == marker);
    }
}

#[async_trait]
impl ArtifactFetcher for PrimaryRepositoryFetcher {
    async fn fetch(&self, descriptor: &ArtifactDescriptor) -> Result<(), FetchError> {
        let source = &descriptor.source;
        info!(
            artifact = %descriptor.name,
            repo = %source.repo_id,
            revision = %source.revision,
            destination = %descriptor.destination.display(),
            "fetching repository"
        );

        let mut files = self.list_files(descriptor).await?;
        let marker = marker_file(descriptor);
        order_marker_last(&mut files, marker.as_deref());

        let mut downloaded = 0usize;
        for file in &files {
            if self.download_file(descriptor, file).await? {
                downloaded += 1;
            }
        }
        info!(
            artifact = %descriptor.name,
            downloaded,
            skipped = files.len() - downloaded,
            "repository fetch complete"
        );

        let verified = verify_expected_files(descriptor).and_then(|()| verify_checksums(descriptor));
        if let Err(err) = verified {
            // Without the marker the next run sees the set as absent and retries.
            if let Some(marker) = &marker {
                let path = descriptor.destination.join(marker);
                if let Err(e) = std::fs::remove_file(&path) {
                    warn!(path = %path.display(), "failed to remove marker: {e}");
                }
            }
            return Err(err);
        }
        Ok(())
    }
}
