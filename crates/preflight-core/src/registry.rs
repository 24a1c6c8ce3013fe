//! Declarative registry of the artifacts a service needs before it can start.
//!
//! The registry is configuration, not state: it is built once at process start
//! and iterated in declaration order so that logs and failure points are the
//! same on every run.

use std::collections::{BTreeMap, HashSet};
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{PreflightError, PreflightResult};

/// Whether a missing artifact blocks startup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Criticality {
    /// Must exist before launch, otherwise the bootstrap aborts
    Required,
    /// Pre-warmed when possible; the service can fetch it lazily on first use
    BestEffort,
}

impl Criticality {
    /// Get criticality name as string
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Required => "required",
            Self::BestEffort => "best_effort",
        }
    }
}

/// Which backend retrieves an artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Whole repository downloaded flat into a checkpoint directory
    PrimaryRepository,
    /// Repository materialised in the shared snapshot cache
    MirrorCache,
}

impl SourceKind {
    /// Get backend name as string
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::PrimaryRepository => "primary",
            Self::MirrorCache => "mirror",
        }
    }
}

/// Coordinates of an artifact in its backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactSource {
    /// Backend used to fetch
    pub kind: SourceKind,
    /// Repository id in `organization/name` form
    pub repo_id: String,
    /// Branch, tag or commit
    pub revision: String,
    /// Glob filters on repository-relative paths; empty means every file
    pub include: Vec<String>,
}

impl ArtifactSource {
    /// Source pinned to the `main` revision with no file filter
    #[must_use]
    pub fn new<S: Into<String>>(kind: SourceKind, repo_id: S) -> Self {
        Self {
            kind,
            repo_id: repo_id.into(),
            revision: DEFAULT_REVISION.to_string(),
            include: Vec::new(),
        }
    }

    /// Restrict the fetch to files matching these patterns
    #[must_use]
    pub fn with_include<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.include = patterns.into_iter().map(Into::into).collect();
        self
    }

    /// Pin a revision other than `main`
    #[must_use]
    pub fn with_revision<S: Into<String>>(mut self, revision: S) -> Self {
        self.revision = revision.into();
        self
    }
}

/// Default branch fetched when a source does not pin one
pub const DEFAULT_REVISION: &str = "main";

/// Filesystem check proving an artifact is materialised
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceProbe {
    /// Present iff the file exists with non-zero size
    File(PathBuf),
    /// Present iff the directory exists and has at least one entry
    Directory(PathBuf),
    /// Present iff any glob match is a non-empty file or directory
    Pattern(String),
}

impl PresenceProbe {
    /// Human-readable location for logs
    #[must_use]
    pub fn display(&self) -> String {
        match self {
            Self::File(path) | Self::Directory(path) => path.display().to_string(),
            Self::Pattern(pattern) => pattern.clone(),
        }
    }
}

/// One unit of required external state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactDescriptor {
    /// Stable identifier used in logs and error messages
    pub name: String,
    /// How to tell the artifact is already on disk
    pub presence_probe: PresenceProbe,
    /// Where to fetch it from
    pub source: ArtifactSource,
    /// Whether a fetch failure aborts startup
    pub criticality: Criticality,
    /// Root directory the artifact lands under
    pub destination: PathBuf,
    /// Files (relative to `destination`) that must exist after a fetch
    pub expected_files: Vec<String>,
    /// Optional sha256 digests keyed by file relative to `destination`
    pub checksums: BTreeMap<String, String>,
}

impl ArtifactDescriptor {
    /// Repository downloaded flat into `destination`, proven by `marker`
    #[must_use]
    pub fn primary<S, R>(name: S, repo_id: R, destination: &Path, marker: &str) -> Self
    where
        S: Into<String>,
        R: Into<String>,
    {
        Self {
            name: name.into(),
            presence_probe: PresenceProbe::File(destination.join(marker)),
            source: ArtifactSource::new(SourceKind::PrimaryRepository, repo_id),
            criticality: Criticality::Required,
            destination: destination.to_path_buf(),
            expected_files: Vec::new(),
            checksums: BTreeMap::new(),
        }
    }

    /// Repository materialised in the snapshot cache under `cache_root`
    #[must_use]
    pub fn mirror<S, R>(name: S, repo_id: R, cache_root: &Path) -> Self
    where
        S: Into<String>,
        R: Into<String>,
    {
        let repo_id = repo_id.into();
        Self {
            name: name.into(),
            presence_probe: PresenceProbe::Directory(snapshots_dir(cache_root, &repo_id)),
            source: ArtifactSource::new(SourceKind::MirrorCache, repo_id),
            criticality: Criticality::BestEffort,
            destination: cache_root.to_path_buf(),
            expected_files: Vec::new(),
            checksums: BTreeMap::new(),
        }
    }

    /// Override criticality
    #[must_use]
    pub const fn with_criticality(mut self, criticality: Criticality) -> Self {
        self.criticality = criticality;
        self
    }

    /// Restrict the fetch to files matching these patterns
    #[must_use]
    pub fn with_include<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.source = self.source.with_include(patterns);
        self
    }

    /// Require these files to be present after a fetch
    #[must_use]
    pub fn with_expected_files<I, S>(mut self, files: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.expected_files = files.into_iter().map(Into::into).collect();
        self
    }

    /// Replace the presence probe
    #[must_use]
    pub fn with_probe(mut self, probe: PresenceProbe) -> Self {
        self.presence_probe = probe;
        self
    }

    /// Attach sha256 digests for downloaded files
    #[must_use]
    pub fn with_checksums(mut self, checksums: BTreeMap<String, String>) -> Self {
        self.checksums = checksums;
        self
    }

    /// Whether a fetch failure must abort the bootstrap
    #[must_use]
    pub fn is_required(&self) -> bool {
        self.criticality == Criticality::Required
    }
}

/// `path` without `.` components, so `./ckpt` and `ckpt` compare equal
fn lexical(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect()
}

/// Directory name the hub cache uses for a model repository
#[must_use]
pub fn repo_cache_name(repo_id: &str) -> String {
    format!("models--{}", repo_id.replace('/', "--"))
}

/// `snapshots` directory of a repository inside a hub cache root
#[must_use]
pub fn snapshots_dir(cache_root: &Path, repo_id: &str) -> PathBuf {
    cache_root.join(repo_cache_name(repo_id)).join("snapshots")
}

/// Files the IndexTTS2 service checks for before loading
pub const INDEXTTS2_CHECKPOINT_FILES: &[&str] = &[
    "bpe.model",
    "gpt.pth",
    "config.yaml",
    "s2mel.pth",
    "wav2vec2bert_stats.pt",
];

/// Immutable, ordered list of artifact descriptors
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactRegistry {
    descriptors: Vec<ArtifactDescriptor>,
}

impl ArtifactRegistry {
    /// Build a registry, rejecting inconsistent declarations
    ///
    /// # Errors
    ///
    /// Returns a configuration error on duplicate names, malformed repository
    /// ids, or a primary destination shared with the mirror cache.
    pub fn new(descriptors: Vec<ArtifactDescriptor>) -> PreflightResult<Self> {
        let mut seen = HashSet::new();
        for descriptor in &descriptors {
            if descriptor.name.trim().is_empty() {
                return Err(PreflightError::configuration("artifact name must not be empty"));
            }
            if !seen.insert(descriptor.name.as_str()) {
                return Err(PreflightError::configuration(format!(
                    "duplicate artifact name '{}'",
                    descriptor.name
                )));
            }
            let repo_id = &descriptor.source.repo_id;
            let valid_repo = repo_id
                .split_once('/')
                .is_some_and(|(org, name)| !org.is_empty() && !name.is_empty());
            if !valid_repo {
                return Err(PreflightError::configuration(format!(
                    "artifact '{}' has invalid repository id '{repo_id}' (expected organization/name)",
                    descriptor.name
                )));
            }
            if let Some(bad) = descriptor
                .source
                .include
                .iter()
                .find(|p| glob::Pattern::new(p).is_err())
            {
                return Err(PreflightError::configuration(format!(
                    "artifact '{}' has invalid include pattern '{bad}'",
                    descriptor.name
                )));
            }
        }

        // Flat downloads and the snapshot cache must not share a subtree.
        let mirror_roots: Vec<PathBuf> = descriptors
            .iter()
            .filter(|d| d.source.kind == SourceKind::MirrorCache)
            .map(|d| lexical(&d.destination))
            .collect();
        for primary in descriptors
            .iter()
            .filter(|d| d.source.kind == SourceKind::PrimaryRepository)
        {
            let destination = lexical(&primary.destination);
            if let Some(root) = mirror_roots
                .iter()
                .find(|root| destination.starts_with(root) || root.starts_with(&destination))
            {
                return Err(PreflightError::configuration(format!(
                    "artifact '{}' destination {} overlaps the shared cache root {}",
                    primary.name,
                    primary.destination.display(),
                    root.display()
                )));
            }
        }

        Ok(Self { descriptors })
    }

    /// The IndexTTS2 artifact set: the checkpoint repository plus the
    /// auxiliary models the service loads from the hub cache.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `checkpoint_dir` and `cache_dir` are
    /// the same directory.
    pub fn indextts2(checkpoint_dir: &Path, cache_dir: &Path) -> PreflightResult<Self> {
        Self::new(vec![
            ArtifactDescriptor::primary(
                "primary-checkpoint-set",
                "IndexTeam/IndexTTS-2",
                checkpoint_dir,
                "gpt.pth",
            )
            .with_expected_files(INDEXTTS2_CHECKPOINT_FILES.iter().copied()),
            ArtifactDescriptor::mirror(
                "feature-extractor-weights",
                "facebook/w2v-bert-2.0",
                cache_dir,
            ),
            ArtifactDescriptor::mirror("semantic-codec", "amphion/MaskGCT", cache_dir)
                .with_include(["semantic_codec/model.safetensors"]),
            ArtifactDescriptor::mirror("speaker-embedding", "funasr/campplus", cache_dir)
                .with_include(["campplus_cn_common.bin"]),
            ArtifactDescriptor::mirror(
                "vocoder",
                "nvidia/bigvgan_v2_22khz_80band_256x",
                cache_dir,
            ),
        ])
    }

    /// Descriptors in declaration order
    pub fn iter(&self) -> std::slice::Iter<'_, ArtifactDescriptor> {
        self.descriptors.iter()
    }

    /// Look up a descriptor by name
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ArtifactDescriptor> {
        self.descriptors.iter().find(|d| d.name == name)
    }

    /// Number of descriptors
    #[must_use]
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    /// Whether the registry declares nothing
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

impl<'a> IntoIterator for &'a ArtifactRegistry {
    type Item = &'a ArtifactDescriptor;
    type IntoIter = std::slice::Iter<'a, ArtifactDescriptor>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_repo_cache_name() {
        assert_eq!(
            repo_cache_name("facebook/w2v-bert-2.0"),
            "models--facebook--w2v-bert-2.0"
        );
        assert_eq!(
            snapshots_dir(Path::new("/cache"), "funasr/campplus"),
            PathBuf::from("/cache/models--funasr--campplus/snapshots")
        );
    }

    #[test]
    fn test_indextts2_registry_order_and_policy() {
        let registry =
            ArtifactRegistry::indextts2(Path::new("/app/checkpoints"), Path::new("/cache/hub"))
                .unwrap();
        let names: Vec<&str> = registry.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(
            names,
            [
                "primary-checkpoint-set",
                "feature-extractor-weights",
                "semantic-codec",
                "speaker-embedding",
                "vocoder"
            ]
        );

        let ckpt = registry.get("primary-checkpoint-set").unwrap();
        assert!(ckpt.is_required());
        assert_eq!(
            ckpt.presence_probe,
            PresenceProbe::File(PathBuf::from("/app/checkpoints/gpt.pth"))
        );
        assert_eq!(ckpt.expected_files.len(), INDEXTTS2_CHECKPOINT_FILES.len());

        let codec = registry.get("semantic-codec").unwrap();
        assert_eq!(codec.criticality, Criticality::BestEffort);
        assert_eq!(codec.destination, PathBuf::from("/cache/hub"));
        assert_eq!(codec.source.include, ["semantic_codec/model.safetensors"]);
        assert_eq!(
            codec.presence_probe,
            PresenceProbe::Directory(PathBuf::from(
                "/cache/hub/models--amphion--MaskGCT/snapshots"
            ))
        );
    }

    #[test]
    fn test_rejects_duplicate_names() {
        let root = Path::new("/cache");
        let err = ArtifactRegistry::new(vec![
            ArtifactDescriptor::mirror("aux", "a/b", root),
            ArtifactDescriptor::mirror("aux", "c/d", root),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("duplicate artifact name 'aux'"));
    }

    #[test]
    fn test_rejects_malformed_repo_id() {
        let err = ArtifactRegistry::new(vec![ArtifactDescriptor::mirror(
            "aux",
            "no-slash",
            Path::new("/cache"),
        )])
        .unwrap_err();
        assert_eq!(err.category(), "configuration");
    }

    #[test]
    fn test_rejects_conflated_destinations() {
        let shared = Path::new("/data");
        let result = ArtifactRegistry::indextts2(shared, shared);
        assert!(result.is_err());
    }

    #[rstest]
    #[case::checkpoints_inside_cache("/data/hf/checkpoints", "/data/hf")]
    #[case::cache_inside_checkpoints("/app/checkpoints", "/app/checkpoints/hf_cache")]
    #[case::dot_prefixed_same_dir("./checkpoints", "checkpoints")]
    fn test_rejects_overlapping_destinations(#[case] checkpoint_dir: &str, #[case] cache_dir: &str) {
        let err = ArtifactRegistry::indextts2(Path::new(checkpoint_dir), Path::new(cache_dir)).unwrap_err();
        assert_eq!(err.category(), "configuration");
        assert!(err.to_string().contains("overlaps"));
    }

    #[test]
    fn test_sibling_destinations_are_accepted() {
        // "/data/hf2" shares a string prefix with "/data/hf" but not a path prefix
        let registry = ArtifactRegistry::indextts2(Path::new("/data/hf2"), Path::new("/data/hf"));
        assert!(registry.is_ok());
    }
}
