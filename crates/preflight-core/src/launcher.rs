//! Hand-off from the bootstrap to the inference service.
//!
//! On Unix the service replaces this process (`exec`), so container signals
//! go straight to it and nothing of the orchestrator remains afterwards.

use std::ffi::{OsStr, OsString};
use std::path::PathBuf;
use std::process::Command;

use tracing::{error, info};

use crate::config::PreflightConfig;
use crate::error::LaunchError;
use crate::orchestrator::{BootstrapReport, Decision};
use crate::EXIT_LAUNCH_FAILED;

/// Fully assembled service command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceInvocation {
    /// Executable to run
    pub program: PathBuf,
    /// Arguments in final order, not required to be UTF-8
    pub args: Vec<OsString>,
    /// Extra environment variables
    pub env: Vec<(String, String)>,
    /// Working directory, if not inherited
    pub working_dir: Option<PathBuf>,
}

impl ServiceInvocation {
    /// Build `program prefix_args.. fixed_flags.. passthrough..`.
    ///
    /// Fixed flags always precede passthrough arguments and are never
    /// deduplicated against them. Passthrough arguments are copied as raw OS
    /// strings.
    #[must_use]
    pub fn assemble<P, S>(
        program: P,
        prefix_args: &[String],
        fixed_flags: &[String],
        passthrough: &[S],
    ) -> Self
    where
        P: Into<PathBuf>,
        S: AsRef<OsStr>,
    {
        let args = prefix_args
            .iter()
            .chain(fixed_flags)
            .map(OsString::from)
            .chain(passthrough.iter().map(|a| a.as_ref().to_os_string()))
            .collect();
        Self {
            program: program.into(),
            args,
            env: Vec::new(),
            working_dir: None,
        }
    }

    /// Invocation described by the service section of `config`
    #[must_use]
    pub fn from_config<S: AsRef<OsStr>>(config: &PreflightConfig, passthrough: &[S]) -> Self {
        let service = &config.service;
        let mut invocation = Self::assemble(
            service.program.clone(),
            &service.args,
            &service.fixed_flags,
            passthrough,
        );
        invocation.env = config.service_env();
        invocation.working_dir.clone_from(&service.working_dir);
        invocation
    }

    /// Program followed by its arguments, lossily decoded for display
    #[must_use]
    pub fn argv(&self) -> Vec<String> {
        std::iter::once(self.program.as_os_str())
            .chain(self.args.iter().map(OsString::as_os_str))
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        command.envs(self.env.iter().map(|(k, v)| (k, v)));
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }
        command
    }
}

/// Transfers control to the service
#[cfg_attr(test, mockall::automock)]
pub trait ServiceLauncher {
    /// Start the service.
    ///
    /// Process-replacing launchers only return on failure. Launchers that run
    /// the service as a child return its exit code.
    ///
    /// # Errors
    ///
    /// Returns a [`LaunchError`] if the service could not be started.
    fn launch(&self, invocation: &ServiceInvocation) -> Result<i32, LaunchError>;
}

/// Production launcher: `exec` on Unix, spawn-and-wait elsewhere
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecLauncher;

impl ServiceLauncher for ExecLauncher {
    #[cfg(unix)]
    fn launch(&self, invocation: &ServiceInvocation) -> Result<i32, LaunchError> {
        use std::os::unix::process::CommandExt;

        info!(argv = ?invocation.argv(), "exec service");
        let err = invocation.command().exec();
        Err(LaunchError::new(invocation.program.clone(), err.to_string()))
    }

    #[cfg(not(unix))]
    fn launch(&self, invocation: &ServiceInvocation) -> Result<i32, LaunchError> {
        info!(argv = ?invocation.argv(), "starting service");
        let status = invocation
            .command()
            .status()
            .map_err(|e| LaunchError::new(invocation.program.clone(), e.to_string()))?;
        Ok(status.code().unwrap_or(EXIT_LAUNCH_FAILED))
    }
}

/// Act on a bootstrap report: launch exactly once, or refuse to.
///
/// Returns the process exit code for the paths that come back here.
pub fn handoff<L>(report: &BootstrapReport, launcher: &L, invocation: &ServiceInvocation) -> i32
where
    L: ServiceLauncher + ?Sized,
{
    match report.decision() {
        Decision::Abort { error } => {
            error!(
                artifact = %error.descriptor,
                "not starting service: required artifact '{}' unavailable: {}",
                error.descriptor,
                error.kind
            );
            report.exit_code()
        }
        Decision::Launch => match launcher.launch(invocation) {
            Ok(code) => code,
            Err(err) => {
                error!("{err}");
                EXIT_LAUNCH_FAILED
            }
        },
    }
}
