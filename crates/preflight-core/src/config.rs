//! Bootstrap configuration.
//!
//! Values come from, lowest precedence first: built-in defaults, an optional
//! TOML file, then environment overrides. The environment is read only here;
//! everything downstream receives explicit paths and endpoints.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{PreflightError, PreflightResult};
use crate::registry::{
    ArtifactDescriptor, ArtifactRegistry, Criticality, PresenceProbe, SourceKind,
};

/// Public hub endpoint used when nothing else is configured
pub const DEFAULT_HUB_ENDPOINT: &str = "https://huggingface.co";

/// Config file consulted when `PREFLIGHT_CONFIG` is unset
pub const DEFAULT_CONFIG_PATH: &str = "/etc/preflight.toml";

/// Environment variable naming the config file
pub const CONFIG_PATH_ENV: &str = "PREFLIGHT_CONFIG";

/// Connection details for one fetch backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// Base URL of the repository service
    pub endpoint: String,
    /// Bearer token for gated repositories
    #[serde(skip_serializing)]
    pub token: Option<String>,
    /// TCP connect timeout in seconds
    pub connect_timeout_secs: u64,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_HUB_ENDPOINT.to_string(),
            token: None,
            connect_timeout_secs: 30,
        }
    }
}

impl EndpointConfig {
    /// Endpoint without a trailing slash
    #[must_use]
    pub fn base_url(&self) -> &str {
        self.endpoint.trim_end_matches('/')
    }
}

/// How the inference service is started once artifacts are in place
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Executable to run
    pub program: PathBuf,
    /// Arguments placed before the fixed flags
    pub args: Vec<String>,
    /// Flags that are always passed and cannot be overridden
    pub fixed_flags: Vec<String>,
    /// Working directory for the service
    pub working_dir: Option<PathBuf>,
    /// Export the cache root and mirror endpoint so the service's lazy
    /// fetches land in the same cache
    pub export_cache_env: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("uv"),
            args: vec!["run".to_string(), "webui.py".to_string()],
            fixed_flags: vec!["--enable_api".to_string()],
            working_dir: None,
            export_cache_env: true,
        }
    }
}

/// One `[[artifacts]]` entry in the config file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactSpec {
    /// Stable identifier
    pub name: String,
    /// Fetch backend
    pub backend: SourceKind,
    /// Repository id in `organization/name` form
    pub repo_id: String,
    /// Branch, tag or commit; defaults to `main`
    #[serde(default)]
    pub revision: Option<String>,
    /// Glob filters on repository files
    #[serde(default)]
    pub include: Vec<String>,
    /// Defaults to `required` for the primary backend, `best_effort` for the mirror
    #[serde(default)]
    pub criticality: Option<Criticality>,
    /// Marker file (relative to the checkpoint dir) proving a primary download
    #[serde(default)]
    pub marker: Option<String>,
    /// Glob (relative to the destination) replacing the default probe
    #[serde(default)]
    pub probe: Option<String>,
    /// Files that must exist after a primary download
    #[serde(default)]
    pub expected_files: Vec<String>,
    /// sha256 digests keyed by destination-relative path
    #[serde(default)]
    pub checksums: BTreeMap<String, String>,
}

impl ArtifactSpec {
    fn resolve(&self, config: &PreflightConfig) -> ArtifactDescriptor {
        let mut descriptor = match self.backend {
            SourceKind::PrimaryRepository => {
                let marker = self
                    .marker
                    .as_deref()
                    .or_else(|| self.expected_files.first().map(String::as_str));
                let descriptor = ArtifactDescriptor::primary(
                    &self.name,
                    &self.repo_id,
                    &config.checkpoint_dir,
                    marker.unwrap_or_default(),
                );
                if marker.is_some() {
                    descriptor
                } else {
                    descriptor.with_probe(PresenceProbe::Directory(config.checkpoint_dir.clone()))
                }
            }
            SourceKind::MirrorCache => {
                ArtifactDescriptor::mirror(&self.name, &self.repo_id, &config.cache_dir)
            }
        };

        if let Some(criticality) = self.criticality {
            descriptor = descriptor.with_criticality(criticality);
        }
        if let Some(revision) = &self.revision {
            descriptor.source = descriptor.source.with_revision(revision);
        }
        if let Some(pattern) = &self.probe {
            let pattern = descriptor.destination.join(pattern);
            descriptor =
                descriptor.with_probe(PresenceProbe::Pattern(pattern.to_string_lossy().into_owned()));
        }

        descriptor
            .with_include(self.include.iter().cloned())
            .with_expected_files(self.expected_files.iter().cloned())
            .with_checksums(self.checksums.clone())
    }
}

/// Complete bootstrap configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreflightConfig {
    /// Flat checkpoint directory for the primary repository
    pub checkpoint_dir: PathBuf,
    /// Hub snapshot cache root shared with the service
    pub cache_dir: PathBuf,
    /// Primary repository backend
    pub primary: EndpointConfig,
    /// Mirror cache backend
    pub mirror: EndpointConfig,
    /// Service launch settings
    pub service: ServiceConfig,
    /// Replaces the built-in registry when present
    pub artifacts: Option<Vec<ArtifactSpec>>,
}

impl Default for PreflightConfig {
    fn default() -> Self {
        Self {
            checkpoint_dir: PathBuf::from("checkpoints"),
            cache_dir: default_hub_cache(),
            primary: EndpointConfig::default(),
            mirror: EndpointConfig::default(),
            service: ServiceConfig::default(),
            artifacts: None,
        }
    }
}

fn default_hub_cache() -> PathBuf {
    BaseDirs::new().map_or_else(
        || PathBuf::from(".cache/huggingface/hub"),
        |dirs| dirs.home_dir().join(".cache").join("huggingface").join("hub"),
    )
}

impl PreflightConfig {
    /// Parse a TOML document on top of the defaults
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the document is not valid TOML or
    /// does not match the schema.
    pub fn from_toml_str(content: &str) -> PreflightResult<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Read and parse a TOML config file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> PreflightResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            PreflightError::configuration(format!("cannot read {}: {e}", path.display()))
        })?;
        let config = Self::from_toml_str(&content)?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Load configuration from the process environment
    ///
    /// # Errors
    ///
    /// Returns an error if an explicitly named config file is missing or
    /// invalid, or if the resulting configuration does not validate.
    pub fn load() -> PreflightResult<Self> {
        Self::load_with(|key| std::env::var(key).ok())
    }

    /// Load configuration using `lookup` in place of the process environment
    ///
    /// # Errors
    ///
    /// See [`PreflightConfig::load`].
    pub fn load_with<F>(lookup: F) -> PreflightResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match lookup(CONFIG_PATH_ENV) {
            Some(path) => Self::from_file(Path::new(&path))?,
            None if Path::new(DEFAULT_CONFIG_PATH).is_file() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_PATH))?
            }
            None => {
                debug!("No config file, using built-in defaults");
                Self::default()
            }
        };
        config.apply_env_overrides(lookup);
        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides on top of file/default values
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(dir) = lookup("PREFLIGHT_CHECKPOINT_DIR") {
            self.checkpoint_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup("HF_HUB_CACHE") {
            self.cache_dir = PathBuf::from(dir);
        } else if let Some(home) = lookup("HF_HOME") {
            self.cache_dir = PathBuf::from(home).join("hub");
        }
        if let Some(endpoint) = lookup("HF_ENDPOINT") {
            self.mirror.endpoint = endpoint;
        }
        if let Some(endpoint) = lookup("PREFLIGHT_PRIMARY_ENDPOINT") {
            self.primary.endpoint = endpoint;
        }
        if let Some(token) = lookup("HF_TOKEN") {
            self.primary.token = Some(token.clone());
            self.mirror.token = Some(token);
        }
    }

    /// Check endpoints and the service command
    ///
    /// # Errors
    ///
    /// Returns a configuration error describing the first problem found.
    pub fn validate(&self) -> PreflightResult<()> {
        for (label, endpoint) in [("primary", &self.primary), ("mirror", &self.mirror)] {
            if !(endpoint.endpoint.starts_with("http://") || endpoint.endpoint.starts_with("https://"))
            {
                return Err(PreflightError::configuration(format!(
                    "{label} endpoint must be an http(s) URL, got '{}'",
                    endpoint.endpoint
                )));
            }
        }
        if self.service.program.as_os_str().is_empty() {
            return Err(PreflightError::configuration("service program must not be empty"));
        }
        Ok(())
    }

    /// Build the artifact registry this configuration describes
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the declared artifacts are
    /// inconsistent.
    pub fn registry(&self) -> PreflightResult<ArtifactRegistry> {
        match &self.artifacts {
            Some(specs) => {
                ArtifactRegistry::new(specs.iter().map(|spec| spec.resolve(self)).collect())
            }
            None => ArtifactRegistry::indextts2(&self.checkpoint_dir, &self.cache_dir),
        }
    }

    /// Environment exported to the service so it shares the pre-warmed cache
    #[must_use]
    pub fn service_env(&self) -> Vec<(String, String)> {
        if !self.service.export_cache_env {
            return Vec::new();
        }
        vec![
            (
                "HF_HUB_CACHE".to_string(),
                self.cache_dir.to_string_lossy().into_owned(),
            ),
            ("HF_ENDPOINT".to_string(), self.mirror.base_url().to_string()),
        ]
    }
}
