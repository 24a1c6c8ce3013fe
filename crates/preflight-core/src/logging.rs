//! Diagnostic output.
//!
//! Everything goes to stderr. The service inherits stdout after the hand-off.

use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset
pub const DEFAULT_DIRECTIVES: &str = "preflight=info,preflight_core=info,hf_hub=warn";

/// Install the global subscriber with [`DEFAULT_DIRECTIVES`]
pub fn init() {
    init_with_default(DEFAULT_DIRECTIVES);
}

/// Install the global subscriber, falling back to `directives` when
/// `RUST_LOG` is unset or unparsable.
///
/// Calling this more than once is harmless; later calls are ignored.
pub fn init_with_default(directives: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directives));
    let installed = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
    if let Err(_already_set) = installed {
        // Keep the first subscriber; tests install their own.
        tracing::debug!("global subscriber already installed");
    }
}
