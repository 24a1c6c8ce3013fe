//! # Preflight Core
//!
//! Artifact bootstrap for containerised TTS inference services.
//!
//! Before the service starts, every model artifact it needs is checked for on
//! disk and fetched when absent. Required artifacts that cannot be obtained
//! stop the container; best-effort artifacts are left for the service to fetch
//! lazily on first use.
//!
//! ## Features
//!
//! - Declarative artifact registry with the IndexTTS2 set built in
//! - File, directory and glob presence probes
//! - Flat checkpoint downloads resumable at file granularity
//! - Hub snapshot-cache pre-warming shared with the service
//! - Single-shot launch decision with process replacement on Unix
//!
//! ## Example
//!
//! ```rust,no_run
//! use preflight_core::{
//!     handoff, BackendFetcher, BootstrapOrchestrator, ExecLauncher, PreflightConfig,
//!     ServiceInvocation,
//! };
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> anyhow::Result<()> {
//!     let config = PreflightConfig::load()?;
//!     let orchestrator =
//!         BootstrapOrchestrator::new(config.registry()?, BackendFetcher::from_config(&config)?);
//!     let report = orchestrator.run().await;
//!
//!     let invocation = ServiceInvocation::from_config(&config, &["--port", "7860"]);
//!     std::process::exit(handoff(&report, &ExecLauncher, &invocation));
//! }
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod fetch;
pub mod launcher;
pub mod logging;
pub mod orchestrator;
pub mod presence;
pub mod registry;

// Re-export main types for convenience
pub use config::{EndpointConfig, PreflightConfig, ServiceConfig};
pub use error::{FetchError, FetchErrorKind, LaunchError, PreflightError, PreflightResult};
pub use fetch::{ArtifactFetcher, BackendFetcher, MirrorCacheFetcher, PrimaryRepositoryFetcher};
pub use launcher::{handoff, ExecLauncher, ServiceInvocation, ServiceLauncher};
pub use orchestrator::{
    BootstrapOrchestrator, BootstrapOutcome, BootstrapReport, BootstrapState, Decision,
    OutcomeRecord,
};
pub use presence::PresenceChecker;
pub use registry::{
    ArtifactDescriptor, ArtifactRegistry, ArtifactSource, Criticality, PresenceProbe, SourceKind,
};

/// Version information for the preflight-core crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Exit code when the service was launched or would be
pub const EXIT_OK: i32 = 0;

/// Exit code when a required artifact could not be obtained
pub const EXIT_ARTIFACT_MISSING: i32 = 1;

/// Exit code when configuration is invalid
pub const EXIT_CONFIGURATION: i32 = 2;

/// Exit code when the service executable could not be started
pub const EXIT_LAUNCH_FAILED: i32 = 127;
