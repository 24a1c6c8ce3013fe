//! Container entrypoint.
//!
//! Ensures the model artifacts are on disk, then replaces itself with the
//! inference service. Every command-line argument is forwarded to the service
//! untouched, after the service's fixed flags.

use std::ffi::OsString;

use anyhow::Context;
use preflight_core::{
    handoff, logging, BackendFetcher, BootstrapOrchestrator, BootstrapReport, ExecLauncher,
    PreflightConfig, ServiceInvocation, EXIT_CONFIGURATION,
};
use tracing::{error, info};

fn main() {
    logging::init();
    info!(version = preflight_core::VERSION, "preflight starting");

    let config = match PreflightConfig::load() {
        Ok(config) => config,
        Err(err) => {
            error!(category = err.category(), "{err}");
            std::process::exit(EXIT_CONFIGURATION);
        }
    };

    let report = match bootstrap(&config) {
        Ok(report) => report,
        Err(err) => {
            error!("{err:#}");
            std::process::exit(EXIT_CONFIGURATION);
        }
    };

    let passthrough: Vec<OsString> = std::env::args_os().skip(1).collect();
    let invocation = ServiceInvocation::from_config(&config, &passthrough);
    std::process::exit(handoff(&report, &ExecLauncher, &invocation));
}

/// Run the bootstrap pass on a runtime that is torn down before the hand-off
fn bootstrap(config: &PreflightConfig) -> anyhow::Result<BootstrapReport> {
    let registry = config.registry().context("invalid artifact registry")?;
    let fetcher = BackendFetcher::from_config(config).context("failed to set up fetchers")?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    let orchestrator = BootstrapOrchestrator::new(registry, fetcher);
    let report = runtime.block_on(orchestrator.run());
    drop(runtime);

    Ok(report)
}
