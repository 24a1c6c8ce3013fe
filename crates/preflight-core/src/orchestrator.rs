//! Single-pass bootstrap state machine.
//!
//! ```text
//! Init → Checking(d) → [Fetching(d)] → … → Decide → Launch | Abort
//! ```
//!
//! Descriptors are visited strictly in registry order and fetched one at a
//! time. A failed fetch of a required artifact stops the pass immediately;
//! a failed fetch of a best-effort artifact is downgraded to a warning.

use std::fmt;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::error::FetchError;
use crate::fetch::ArtifactFetcher;
use crate::presence::PresenceChecker;
use crate::registry::{ArtifactDescriptor, ArtifactRegistry, Criticality};
use crate::{EXIT_ARTIFACT_MISSING, EXIT_OK};

/// What happened to one descriptor during a pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BootstrapOutcome {
    /// Probe found the artifact; nothing fetched
    AlreadyPresent,
    /// Artifact was absent and the fetch succeeded
    Fetched,
    /// Best-effort fetch failed; the service will fetch lazily
    FetchFailedTolerated,
    /// Required fetch failed; the pass aborted here
    FetchFailedFatal,
}

impl BootstrapOutcome {
    /// Get outcome name as string
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::AlreadyPresent => "already_present",
            Self::Fetched => "fetched",
            Self::FetchFailedTolerated => "fetch_failed_tolerated",
            Self::FetchFailedFatal => "fetch_failed_fatal",
        }
    }
}

/// Outcome of one descriptor, with timing and the error if any
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutcomeRecord {
    /// Descriptor name
    pub name: String,
    /// Descriptor criticality
    pub criticality: Criticality,
    /// What happened
    pub outcome: BootstrapOutcome,
    /// Fetch failure, for the two failed outcomes
    pub error: Option<FetchError>,
    /// Time spent probing and fetching
    pub elapsed: Duration,
}

/// Where the pass ends
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Every required artifact is present; start the service
    Launch,
    /// A required artifact could not be obtained
    Abort {
        /// The descriptor's fetch failure
        error: FetchError,
    },
}

/// State machine positions, recorded in order for diagnostics
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootstrapState {
    /// Before the first descriptor
    Init,
    /// Evaluating a presence probe
    Checking(String),
    /// Fetching an absent artifact
    Fetching(String),
    /// All descriptors handled without a fatal failure
    Decide,
    /// Terminal: hand off to the service
    Launch,
    /// Terminal: exit without starting the service
    Abort,
}

impl fmt::Display for BootstrapState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Init => write!(f, "INIT"),
            Self::Checking(name) => write!(f, "CHECKING({name})"),
            Self::Fetching(name) => write!(f, "FETCHING({name})"),
            Self::Decide => write!(f, "DECIDE"),
            Self::Launch => write!(f, "LAUNCH"),
            Self::Abort => write!(f, "ABORT"),
        }
    }
}

/// Result of one bootstrap pass. Lives only for the current process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapReport {
    run_id: Uuid,
    records: Vec<OutcomeRecord>,
    trace: Vec<BootstrapState>,
    decision: Decision,
}

impl BootstrapReport {
    /// Identifier attached to this pass's log span
    #[must_use]
    pub const fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Per-descriptor records in processing order
    #[must_use]
    pub fn records(&self) -> &[OutcomeRecord] {
        &self.records
    }

    /// Outcomes in processing order
    #[must_use]
    pub fn outcomes(&self) -> Vec<BootstrapOutcome> {
        self.records.iter().map(|r| r.outcome).collect()
    }

    /// Outcome recorded for `name`, if it was reached
    #[must_use]
    pub fn outcome_of(&self, name: &str) -> Option<BootstrapOutcome> {
        self.records
            .iter()
            .find(|r| r.name == name)
            .map(|r| r.outcome)
    }

    /// Every state the machine passed through
    #[must_use]
    pub fn trace(&self) -> &[BootstrapState] {
        &self.trace
    }

    /// Final decision
    #[must_use]
    pub const fn decision(&self) -> &Decision {
        &self.decision
    }

    /// Whether the service should be started
    #[must_use]
    pub const fn should_launch(&self) -> bool {
        matches!(self.decision, Decision::Launch)
    }

    /// Process exit code implied by the decision
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self.decision {
            Decision::Launch => EXIT_OK,
            Decision::Abort { .. } => EXIT_ARTIFACT_MISSING,
        }
    }

    /// Number of records with the given outcome
    #[must_use]
    pub fn count(&self, outcome: BootstrapOutcome) -> usize {
        self.records.iter().filter(|r| r.outcome == outcome).count()
    }

    /// One-line summary for logs
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "present={} fetched={} tolerated={} fatal={}",
            self.count(BootstrapOutcome::AlreadyPresent),
            self.count(BootstrapOutcome::Fetched),
            self.count(BootstrapOutcome::FetchFailedTolerated),
            self.count(BootstrapOutcome::FetchFailedFatal),
        )
    }
}

/// Drives presence checks and fetches over a registry
#[derive(Debug)]
pub struct BootstrapOrchestrator<F> {
    registry: ArtifactRegistry,
    checker: PresenceChecker,
    fetcher: F,
}

impl<F: ArtifactFetcher> BootstrapOrchestrator<F> {
    /// Create an orchestrator over `registry`
    #[must_use]
    pub const fn new(registry: ArtifactRegistry, fetcher: F) -> Self {
        Self {
            registry,
            checker: PresenceChecker::new(),
            fetcher,
        }
    }

    /// The registry being processed
    #[must_use]
    pub const fn registry(&self) -> &ArtifactRegistry {
        &self.registry
    }

    /// Run one bootstrap pass
    pub async fn run(&self) -> BootstrapReport {
        let run_id = Uuid::new_v4();
        self.run_pass(run_id)
            .instrument(info_span!("bootstrap", %run_id))
            .await
    }

    async fn run_pass(&self, run_id: Uuid) -> BootstrapReport {
        let started = Instant::now();
        let mut pass = Pass::default();
        info!(artifacts = self.registry.len(), "bootstrap pass starting");

        let mut fatal = None;
        for descriptor in &self.registry {
            let record = self.process(descriptor, &mut pass).await;
            let is_fatal = record.outcome == BootstrapOutcome::FetchFailedFatal;
            if is_fatal {
                fatal = record.error.clone();
            }
            pass.records.push(record);
            if is_fatal {
                break;
            }
        }

        let decision = match fatal {
            Some(error) => {
                pass.transition(BootstrapState::Abort);
                Decision::Abort { error }
            }
            None => {
                pass.transition(BootstrapState::Decide);
                pass.transition(BootstrapState::Launch);
                Decision::Launch
            }
        };

        let report = BootstrapReport {
            run_id,
            records: pass.records,
            trace: pass.trace,
            decision,
        };
        match report.decision() {
            Decision::Launch => info!(
                elapsed = ?started.elapsed(),
                "bootstrap complete: {}",
                report.summary()
            ),
            Decision::Abort { error } => error!(
                elapsed = ?started.elapsed(),
                "bootstrap aborted: {error} ({})",
                report.summary()
            ),
        }
        report
    }

    async fn process(&self, descriptor: &ArtifactDescriptor, pass: &mut Pass) -> OutcomeRecord {
        let started = Instant::now();
        let record = |outcome, error| OutcomeRecord {
            name: descriptor.name.clone(),
            criticality: descriptor.criticality,
            outcome,
            error,
            elapsed: started.elapsed(),
        };

        pass.transition(BootstrapState::Checking(descriptor.name.clone()));
        if self.checker.is_present(descriptor) {
            info!(artifact = %descriptor.name, "already present");
            return record(BootstrapOutcome::AlreadyPresent, None);
        }

        pass.transition(BootstrapState::Fetching(descriptor.name.clone()));
        match self.fetcher.fetch(descriptor).await {
            Ok(()) => {
                info!(
                    artifact = %descriptor.name,
                    elapsed = ?started.elapsed(),
                    "fetched"
                );
                record(BootstrapOutcome::Fetched, None)
            }
            Err(err) if descriptor.is_required() => {
                error!(
                    artifact = %descriptor.name,
                    category = err.kind.category(),
                    retriable = err.is_retriable(),
                    "required artifact unavailable: {err}"
                );
                record(BootstrapOutcome::FetchFailedFatal, Some(err))
            }
            Err(err) => {
                warn!(
                    artifact = %descriptor.name,
                    category = err.kind.category(),
                    retriable = err.is_retriable(),
                    "best-effort pre-warm failed, service will fetch on first use: {err}"
                );
                record(BootstrapOutcome::FetchFailedTolerated, Some(err))
            }
        }
    }
}

#[derive(Debug)]
struct Pass {
    records: Vec<OutcomeRecord>,
    trace: Vec<BootstrapState>,
}

impl Default for Pass {
    fn default() -> Self {
        Self {
            records: Vec::new(),
            trace: vec![BootstrapState::Init],
        }
    }
}

impl Pass {
    fn transition(&mut self, next: BootstrapState) {
        if let Some(current) = self.trace.last() {
            debug!("{current} -> {next}");
        }
        self.trace.push(next);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::MockArtifactFetcher;
    use crate::registry::PresenceProbe;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn required(name: &str, root: &Path) -> ArtifactDescriptor {
        ArtifactDescriptor::primary(name, "IndexTeam/IndexTTS-2", &root.join(name), "gpt.pth")
    }

    fn best_effort(name: &str, root: &Path) -> ArtifactDescriptor {
        ArtifactDescriptor::mirror(name, format!("org/{name}"), &root.join("cache"))
    }

    #[tokio::test]
    async fn test_present_artifact_is_never_fetched() {
        let dir = TempDir::new().unwrap();
        let d = required("ckpt", dir.path());
        fs::create_dir_all(&d.destination).unwrap();
        fs::write(d.destination.join("gpt.pth"), b"weights").unwrap();

        let mut fetcher = MockArtifactFetcher::new();
        fetcher.expect_fetch().never();

        let registry = ArtifactRegistry::new(vec![d]).unwrap();
        let report = BootstrapOrchestrator::new(registry, fetcher).run().await;
        assert_eq!(report.outcomes(), [BootstrapOutcome::AlreadyPresent]);
        assert!(report.should_launch());
    }

    #[tokio::test]
    async fn test_required_failure_stops_the_pass() {
        let dir = TempDir::new().unwrap();
        let registry = ArtifactRegistry::new(vec![
            required("ckpt", dir.path()),
            best_effort("aux", dir.path()),
        ])
        .unwrap();

        let mut fetcher = MockArtifactFetcher::new();
        fetcher
            .expect_fetch()
            .withf(|d| d.name == "ckpt")
            .times(1)
            .returning(|d| Err(FetchError::network(&d.name, "connection reset")));

        let report = BootstrapOrchestrator::new(registry, fetcher).run().await;
        assert_eq!(report.outcomes(), [BootstrapOutcome::FetchFailedFatal]);
        assert_eq!(report.outcome_of("aux"), None);
        assert!(!report
            .trace()
            .contains(&BootstrapState::Checking("aux".to_string())));
        assert_eq!(report.trace().last(), Some(&BootstrapState::Abort));
        assert_ne!(report.exit_code(), 0);
        match report.decision() {
            Decision::Abort { error } => assert_eq!(error.descriptor, "ckpt"),
            Decision::Launch => panic!("expected abort"),
        }
    }

    #[test_log::test(tokio::test)]
    async fn test_abort_keeps_retriability_of_cause() {
        let dir = TempDir::new().unwrap();
        let registry = ArtifactRegistry::new(vec![required("ckpt", dir.path())]).unwrap();

        let mut fetcher = MockArtifactFetcher::new();
        fetcher
            .expect_fetch()
            .times(1)
            .returning(|d| Err(FetchError::authorization(&d.name, "HTTP 401")));

        let report = BootstrapOrchestrator::new(registry, fetcher).run().await;
        let Decision::Abort { error } = report.decision() else {
            panic!("expected abort");
        };
        assert_eq!(error.kind.category(), "authorization");
        assert!(!error.is_retriable());
    }

    #[tokio::test]
    async fn test_best_effort_failure_is_tolerated() {
        let dir = TempDir::new().unwrap();
        let registry = ArtifactRegistry::new(vec![
            best_effort("aux1", dir.path()),
            best_effort("aux2", dir.path()),
        ])
        .unwrap();

        let mut fetcher = MockArtifactFetcher::new();
        fetcher
            .expect_fetch()
            .times(2)
            .returning(|d| match d.name.as_str() {
                "aux1" => Err(FetchError::not_found(&d.name, "gone")),
                _ => Ok(()),
            });

        let report = BootstrapOrchestrator::new(registry, fetcher).run().await;
        assert_eq!(
            report.outcomes(),
            [BootstrapOutcome::FetchFailedTolerated, BootstrapOutcome::Fetched]
        );
        assert!(report.records()[0].error.is_some());
        assert_eq!(report.exit_code(), 0);
        assert_eq!(report.summary(), "present=0 fetched=1 tolerated=1 fatal=0");
    }

    #[tokio::test]
    async fn test_empty_directory_triggers_fetch() {
        let dir = TempDir::new().unwrap();
        let d = best_effort("aux", dir.path());
        let PresenceProbe::Directory(snapshots) = &d.presence_probe else {
            panic!("mirror descriptors probe a directory");
        };
        fs::create_dir_all(snapshots).unwrap();

        let mut fetcher = MockArtifactFetcher::new();
        fetcher.expect_fetch().times(1).returning(|_| Ok(()));

        let registry = ArtifactRegistry::new(vec![d]).unwrap();
        let report = BootstrapOrchestrator::new(registry, fetcher).run().await;
        assert_eq!(report.outcomes(), [BootstrapOutcome::Fetched]);
    }

    #[tokio::test]
    async fn test_trace_for_clean_pass() {
        let registry = ArtifactRegistry::new(Vec::new()).unwrap();
        let mut fetcher = MockArtifactFetcher::new();
        fetcher.expect_fetch().never();

        let report = BootstrapOrchestrator::new(registry, fetcher).run().await;
        assert_eq!(
            report.trace(),
            [BootstrapState::Init, BootstrapState::Decide, BootstrapState::Launch]
        );
        assert_eq!(BootstrapState::Fetching("x".into()).to_string(), "FETCHING(x)");
    }
}
