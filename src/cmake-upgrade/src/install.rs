//! Platform-specific installation of a downloaded installer.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::config::UpgradeConfig;
use crate::error::RunnerError;
use crate::host::{ProcessRunner, ToolResolver, UpgradeHost};

/// Exit status used by pkexec when the user dismissed the authorization dialog.
const EXIT_AUTH_DISMISSED: i32 = 126;
/// Exit status used by pkexec when authorization could not be obtained.
const EXIT_AUTH_DENIED: i32 = 127;

/// Bytes of stderr kept in [`InstallOutcome::InstallerFailed`].
const STDERR_EXCERPT_BYTES: usize = 2048;

/// Classified result of running the installer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallOutcome {
    /// Installed successfully
    Success,
    /// The elevation helper could not obtain authorization
    AuthorizationDenied,
    /// The user dismissed the authorization prompt
    AuthorizationDeclined,
    /// No elevation helper on this system
    AuthorizationToolMissing,
    /// The installer itself failed
    InstallerFailed { exit_code: i32, stderr_excerpt: String },
}

impl InstallOutcome {
    /// Map an elevation helper exit status to an outcome.
    pub fn from_exit_code(exit_code: i32, stderr: &str) -> Self {
        match exit_code {
            0 => Self::Success,
            EXIT_AUTH_DISMISSED => Self::AuthorizationDeclined,
            EXIT_AUTH_DENIED => Self::AuthorizationDenied,
            code => Self::InstallerFailed {
                exit_code: code,
                stderr_excerpt: excerpt(stderr),
            },
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

/// Keep the tail of the installer's stderr, where the failure usually is.
fn excerpt(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.len() <= STDERR_EXCERPT_BYTES {
        return trimmed.to_string();
    }
    let mut start = trimmed.len() - STDERR_EXCERPT_BYTES;
    while !trimmed.is_char_boundary(start) {
        start += 1;
    }
    format!("...{}", &trimmed[start..])
}

/// A way of running an installer on one platform.
#[async_trait]
pub trait InstallerStrategy: Send + Sync {
    /// Short platform name for logs.
    fn platform(&self) -> &'static str;

    /// Run the installer and classify the result. Blocks until the installer
    /// exits; there is no timeout.
    async fn install(&self, artifact: &Path) -> Result<InstallOutcome, RunnerError>;
}

/// Installer strategy for the current platform, if one exists.
///
/// `os` is a `std::env::consts::OS` value.
pub fn strategy_for_platform(
    os: &str,
    host: &UpgradeHost,
    config: &UpgradeConfig,
) -> Option<Arc<dyn InstallerStrategy>> {
    match os {
        "linux" => Some(Arc::new(ElevatedShellInstaller::new(host, config))),
        _ => None,
    }
}

/// Runs the self-extracting shell installer through an elevation helper.
pub struct ElevatedShellInstaller {
    resolver: Arc<dyn ToolResolver>,
    process: Arc<dyn ProcessRunner>,
    helper: String,
    prefix: PathBuf,
}

impl ElevatedShellInstaller {
    pub fn new(host: &UpgradeHost, config: &UpgradeConfig) -> Self {
        Self {
            resolver: host.resolver.clone(),
            process: host.process.clone(),
            helper: config.elevation_helper.clone(),
            prefix: config.install_prefix.clone(),
        }
    }

    /// Arguments passed to the elevation helper.
    pub fn installer_args(&self, artifact: &Path) -> Vec<OsString> {
        let mut prefix = OsString::from("--prefix=");
        prefix.push(&self.prefix);

        vec![
            artifact.as_os_str().to_owned(),
            OsString::from("--skip-license"),
            OsString::from("--exclude-subdir"),
            prefix,
        ]
    }
}

#[async_trait]
impl InstallerStrategy for ElevatedShellInstaller {
    fn platform(&self) -> &'static str {
        "linux"
    }

    async fn install(&self, artifact: &Path) -> Result<InstallOutcome, RunnerError> {
        let Some(helper) = self.resolver.which(&self.helper).await else {
            warn!(helper = %self.helper, "Elevation helper not found on PATH");
            return Ok(InstallOutcome::AuthorizationToolMissing);
        };

        let args = self.installer_args(artifact);
        info!(helper = %helper.display(), ?args, "Running installer");

        let output = self
            .process
            .execute(&helper, &args)
            .await
            .map_err(|source| RunnerError::Spawn {
                program: helper.display().to_string(),
                source,
            })?;

        let Some(exit_code) = output.exit_code else {
            return Err(RunnerError::Terminated {
                program: helper.display().to_string(),
            });
        };

        let outcome = InstallOutcome::from_exit_code(exit_code, &output.stderr);
        match &outcome {
            InstallOutcome::Success => info!("Installer finished successfully"),
            InstallOutcome::InstallerFailed { .. } => {
                warn!(exit_code, stderr = %output.stderr, "Installer failed")
            }
            other => warn!(exit_code, outcome = ?other, "Installer authorization failed"),
        }

        Ok(outcome)
    }
}
