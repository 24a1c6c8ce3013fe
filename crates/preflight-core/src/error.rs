//! Error types for the artifact bootstrap.

use std::path::PathBuf;

/// Result type alias for preflight operations
pub type PreflightResult<T> = Result<T, PreflightError>;

/// Main error type for preflight operations
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PreflightError {
    /// Configuration could not be loaded or is inconsistent
    #[error("Configuration error: {message}")]
    ConfigurationError {
        /// Error message describing the configuration issue
        message: String,
    },

    /// An artifact could not be fetched
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// The service could not be started
    #[error(transparent)]
    Launch(#[from] LaunchError),
}

impl PreflightError {
    /// Create a new configuration error
    #[must_use]
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::ConfigurationError {
            message: message.into(),
        }
    }

    /// Get the error category for logging
    #[must_use]
    pub const fn category(&self) -> &'static str {
        match self {
            Self::ConfigurationError { .. } => "configuration",
            Self::Fetch(err) => err.kind.category(),
            Self::Launch(_) => "launch",
        }
    }
}

impl From<toml::de::Error> for PreflightError {
    fn from(err: toml::de::Error) -> Self {
        Self::configuration(format!("TOML parse error: {err}"))
    }
}

/// Why a single fetch failed
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchErrorKind {
    /// Transport-level failure or unexpected server status
    #[error("network error: {message}")]
    Network {
        /// Error message describing the network issue
        message: String,
    },

    /// Writing to the destination failed
    #[error("storage error: {message}")]
    Storage {
        /// Error message describing the storage issue
        message: String,
    },

    /// Repository refused our credentials (401/403)
    #[error("authorization failed: {message}")]
    Authorization {
        /// Error message returned by the repository
        message: String,
    },

    /// Repository or file does not exist upstream
    #[error("not found: {message}")]
    NotFound {
        /// What was missing upstream
        message: String,
    },

    /// Fetch returned but expected files are still missing
    #[error("incomplete download, missing: {}", missing.join(", "))]
    Incomplete {
        /// Relative paths that are absent or empty
        missing: Vec<String>,
    },

    /// A downloaded file does not match its configured checksum
    #[error("checksum mismatch for {file}: expected {expected}, got {actual}")]
    Integrity {
        /// Relative path of the file
        file: String,
        /// Configured sha256
        expected: String,
        /// Computed sha256
        actual: String,
    },
}

impl FetchErrorKind {
    /// Get the error category for logging
    #[must_use]
    pub const fn category(&self) -> &'static str {
        match self {
            Self::Network { .. } => "network",
            Self::Storage { .. } => "storage",
            Self::Authorization { .. } => "authorization",
            Self::NotFound { .. } => "not_found",
            Self::Incomplete { .. } => "incomplete",
            Self::Integrity { .. } => "integrity",
        }
    }
}

/// A fetch failure carrying the identity of the descriptor being fetched.
///
/// The fetcher never decides whether this is fatal; the orchestrator does,
/// based on the descriptor's criticality.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("failed to fetch '{descriptor}': {kind}")]
pub struct FetchError {
    /// Name of the descriptor that failed
    pub descriptor: String,
    /// Underlying cause
    pub kind: FetchErrorKind,
}

impl FetchError {
    /// Wrap a cause with the descriptor it belongs to
    #[must_use]
    pub fn new<S: Into<String>>(descriptor: S, kind: FetchErrorKind) -> Self {
        Self {
            descriptor: descriptor.into(),
            kind,
        }
    }

    /// Create a new network error
    #[must_use]
    pub fn network<S: Into<String>, M: Into<String>>(descriptor: S, message: M) -> Self {
        Self::new(
            descriptor,
            FetchErrorKind::Network {
                message: message.into(),
            },
        )
    }

    /// Create a new storage error
    #[must_use]
    pub fn storage<S: Into<String>, M: Into<String>>(descriptor: S, message: M) -> Self {
        Self::new(
            descriptor,
            FetchErrorKind::Storage {
                message: message.into(),
            },
        )
    }

    /// Create a new authorization error
    #[must_use]
    pub fn authorization<S: Into<String>, M: Into<String>>(descriptor: S, message: M) -> Self {
        Self::new(
            descriptor,
            FetchErrorKind::Authorization {
                message: message.into(),
            },
        )
    }

    /// Create a new not-found error
    #[must_use]
    pub fn not_found<S: Into<String>, M: Into<String>>(descriptor: S, message: M) -> Self {
        Self::new(
            descriptor,
            FetchErrorKind::NotFound {
                message: message.into(),
            },
        )
    }

    /// Storage error built from an I/O failure on `path`
    #[must_use]
    pub fn io<S: Into<String>>(descriptor: S, path: &std::path::Path, err: &std::io::Error) -> Self {
        Self::storage(descriptor, format!("{}: {err}", path.display()))
    }

    /// Check if a container restart could plausibly fix this error
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        matches!(
            self.kind,
            FetchErrorKind::Network { .. } | FetchErrorKind::Incomplete { .. }
        )
    }
}

/// Failure to hand control to the service process
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("failed to launch '{}': {message}", program.display())]
pub struct LaunchError {
    /// Executable that was being started
    pub program: PathBuf,
    /// Error message describing the launch failure
    pub message: String,
}

impl LaunchError {
    /// Create a new launch error
    #[must_use]
    pub fn new<P: Into<PathBuf>, S: Into<String>>(program: P, message: S) -> Self {
        Self {
            program: program.into(),
            message: message.into(),
        }
    }
}

/// A probe could not be evaluated.
///
/// Never propagated past the presence checker: it is logged and the artifact
/// is treated as absent so a fetch is attempted rather than skipped.
#[derive(thiserror::Error, Debug)]
#[error("cannot probe {}: {source}", path.display())]
pub struct PresenceCheckError {
    /// Path being probed
    pub path: PathBuf,
    /// Underlying filesystem error
    #[source]
    pub source: std::io::Error,
}
