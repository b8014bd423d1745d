//! Upgrade workflow: eligibility check, prompt, download and install.
//!
//! One call to [`UpgradeWorkflow::run`] drives the whole state machine from
//! `Idle` back to `Idle`:
//!
//! ```text
//! Idle -> Checking -> Eligible -> Prompting -> Downloading -> Installing -> Completed
//!                                           \-> Deferred
//!                                           \-> OptedOut
//! ```
//!
//! Internal failures before the prompt are reported to telemetry and end the
//! run quietly. Failures after the user agreed to upgrade are shown to the
//! user. The stored preference only changes on an explicit "later" or
//! "never" answer.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use crate::config::UpgradeConfig;
use crate::download::{ArtifactDownloader, DownloadedArtifact};
use crate::error::{DownloadError, UpgradeResult};
use crate::host::{PromptChoice, UpgradeHost};
use crate::install::{InstallOutcome, InstallerStrategy, strategy_for_platform};
use crate::preference::{PreferenceStore, UpgradePreference};
use crate::release::ArtifactSource;
use crate::verify::verify_sha256;
use crate::version::{Version, VersionError};

const TELEMETRY_CONTEXT: &str = "cmake.upgrade";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WorkflowState {
    Idle,
    Checking,
    Eligible,
    Prompting,
    Downloading,
    Installing,
    Completed,
    Deferred,
    OptedOut,
}

/// Result of the pre-prompt checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Eligibility {
    Eligible { current: Version, advertised: Version },
    /// The user chose "never"
    OptedOut,
    /// The user chose "later" and the cooldown has not elapsed
    CoolingDown { remaining: Duration },
    /// The advertised version is not newer
    UpToDate,
    InvalidVersion(VersionError),
}

/// Decide whether the user should be prompted.
pub fn check_eligibility(
    preference: UpgradePreference,
    now: DateTime<Utc>,
    cooldown: Duration,
    current: &str,
    advertised: &str,
) -> Eligibility {
    match preference {
        UpgradePreference::Never => return Eligibility::OptedOut,
        UpgradePreference::Deferred { last_nag } if !preference.allows_prompt(now, cooldown) => {
            return Eligibility::CoolingDown {
                remaining: cooldown - (now - last_nag),
            };
        }
        _ => {}
    }

    let (current, advertised) = match (Version::parse(current), Version::parse(advertised)) {
        (Ok(current), Ok(advertised)) => (current, advertised),
        (Err(e), _) | (_, Err(e)) => return Eligibility::InvalidVersion(e),
    };

    if advertised > current {
        Eligibility::Eligible {
            current,
            advertised,
        }
    } else {
        Eligibility::UpToDate
    }
}

/// Input of one upgrade check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradeRequest {
    /// Locally detected version
    pub current_version: String,
    /// Remotely advertised latest version
    pub advertised_version: String,
    /// Installer for the advertised version
    pub artifact: ArtifactSource,
}

impl UpgradeRequest {
    pub fn new(
        current_version: impl Into<String>,
        advertised_version: impl Into<String>,
        artifact: ArtifactSource,
    ) -> Self {
        Self {
            current_version: current_version.into(),
            advertised_version: advertised_version.into(),
            artifact,
        }
    }
}

/// How a workflow run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkflowOutcome {
    /// No installer strategy for this platform
    Unsupported,
    /// Another run on this workflow is in progress
    AlreadyRunning,
    /// A stored "never" answer suppressed the prompt
    OptedOut,
    /// A stored "later" answer is still cooling down
    CoolingDown,
    /// A version string could not be parsed
    InvalidVersion,
    UpToDate,
    /// The prompt was closed without an answer
    Dismissed,
    /// The user chose "later"
    Deferred,
    /// The user chose "never"
    NeverAgain,
    /// The user cancelled the download
    Cancelled,
    DownloadFailed,
    /// The installer could not be run at all
    RunnerFailed,
    InstallFailed(InstallOutcome),
    Installed { restart_requested: bool },
}

impl fmt::Display for WorkflowOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unsupported => f.write_str("upgrades are not supported on this platform"),
            Self::AlreadyRunning => f.write_str("an upgrade check is already running"),
            Self::OptedOut => f.write_str("upgrade prompts are disabled"),
            Self::CoolingDown => f.write_str("upgrade was postponed recently"),
            Self::InvalidVersion => f.write_str("version could not be determined"),
            Self::UpToDate => f.write_str("CMake is up to date"),
            Self::Dismissed => f.write_str("upgrade prompt dismissed"),
            Self::Deferred => f.write_str("upgrade postponed"),
            Self::NeverAgain => f.write_str("upgrade prompts disabled"),
            Self::Cancelled => f.write_str("download cancelled"),
            Self::DownloadFailed => f.write_str("download failed"),
            Self::RunnerFailed => f.write_str("installer could not be started"),
            Self::InstallFailed(outcome) => write!(f, "installation failed ({outcome:?})"),
            Self::Installed { .. } => f.write_str("CMake upgraded"),
        }
    }
}

/// Resets the in-flight flag when a run ends.
struct FlightGuard<'a>(&'a AtomicBool);

impl<'a> FlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Orchestrates one upgrade check at a time.
pub struct UpgradeWorkflow {
    host: UpgradeHost,
    config: UpgradeConfig,
    preferences: PreferenceStore,
    downloader: ArtifactDownloader,
    installer: Option<Arc<dyn InstallerStrategy>>,
    in_flight: AtomicBool,
}

impl UpgradeWorkflow {
    /// Create a workflow for the running platform.
    pub fn new(host: UpgradeHost, config: UpgradeConfig) -> UpgradeResult<Self> {
        config.validate()?;
        let downloader = ArtifactDownloader::new(&config)?;
        let installer = strategy_for_platform(std::env::consts::OS, &host, &config);
        Ok(Self::with_parts(host, config, downloader, installer))
    }

    /// Create a workflow from explicit parts.
    pub fn with_parts(
        host: UpgradeHost,
        config: UpgradeConfig,
        downloader: ArtifactDownloader,
        installer: Option<Arc<dyn InstallerStrategy>>,
    ) -> Self {
        let preferences = PreferenceStore::new(host.store.clone(), config.preference_key.clone());
        Self {
            host,
            config,
            preferences,
            downloader,
            installer,
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn preferences(&self) -> &PreferenceStore {
        &self.preferences
    }

    /// Run the full check. Never fails; every ending is a [`WorkflowOutcome`].
    pub async fn run(&self, request: &UpgradeRequest) -> WorkflowOutcome {
        let Some(_guard) = FlightGuard::acquire(&self.in_flight) else {
            debug!("Upgrade check already in progress");
            return WorkflowOutcome::AlreadyRunning;
        };

        let outcome = self.run_once(request).await;
        debug!(%outcome, "Upgrade check finished");
        outcome
    }

    async fn run_once(&self, request: &UpgradeRequest) -> WorkflowOutcome {
        let mut state = WorkflowState::Idle;

        let Some(installer) = self.installer.clone() else {
            debug!(os = std::env::consts::OS, "No installer for this platform");
            return WorkflowOutcome::Unsupported;
        };

        advance(&mut state, WorkflowState::Checking);
        let preference = match self.preferences.load().await {
            Ok(preference) => preference,
            Err(e) => {
                self.host.telemetry.report_exception(
                    TELEMETRY_CONTEXT,
                    &e,
                    &[("key", self.preferences.key().to_string())],
                );
                UpgradePreference::Unset
            }
        };
        let now = self.host.clock.now();

        let (current, advertised) = match check_eligibility(
            preference,
            now,
            self.config.cooldown(),
            &request.current_version,
            &request.advertised_version,
        ) {
            Eligibility::Eligible {
                current,
                advertised,
            } => (current, advertised),
            Eligibility::OptedOut => return WorkflowOutcome::OptedOut,
            Eligibility::CoolingDown { remaining } => {
                debug!(remaining_minutes = remaining.num_minutes(), "Upgrade prompt postponed");
                return WorkflowOutcome::CoolingDown;
            }
            Eligibility::UpToDate => return WorkflowOutcome::UpToDate,
            Eligibility::InvalidVersion(e) => {
                self.host.telemetry.report_exception(
                    TELEMETRY_CONTEXT,
                    &e,
                    &[
                        ("current", request.current_version.clone()),
                        ("advertised", request.advertised_version.clone()),
                    ],
                );
                return WorkflowOutcome::InvalidVersion;
            }
        };

        advance(&mut state, WorkflowState::Eligible);
        advance(&mut state, WorkflowState::Prompting);

        let message = format!(
            "CMake {advertised} is available (installed: {current}). Would you like to upgrade?"
        );
        let choice = self
            .host
            .notifier
            .prompt(
                &message,
                &[PromptChoice::Upgrade, PromptChoice::Later, PromptChoice::Never],
            )
            .await;

        match choice {
            Some(PromptChoice::Upgrade) => info!(%advertised, "User accepted upgrade"),
            Some(PromptChoice::Later) => {
                info!("User postponed upgrade");
                self.save_preference(UpgradePreference::Deferred { last_nag: now })
                    .await;
                advance(&mut state, WorkflowState::Deferred);
                return WorkflowOutcome::Deferred;
            }
            Some(PromptChoice::Never) => {
                info!("User disabled upgrade prompts");
                self.save_preference(UpgradePreference::Never).await;
                advance(&mut state, WorkflowState::OptedOut);
                return WorkflowOutcome::NeverAgain;
            }
            Some(PromptChoice::Restart) | None => {
                debug!(?choice, "Upgrade prompt dismissed");
                return WorkflowOutcome::Dismissed;
            }
        }

        advance(&mut state, WorkflowState::Downloading);
        let artifact = match self.download(request).await {
            Ok(artifact) => artifact,
            Err(DownloadError::Cancelled) => {
                self.host.notifier.info("CMake download was cancelled.").await;
                return WorkflowOutcome::Cancelled;
            }
            Err(e) => {
                warn!(
                    error = %e,
                    url = %request.artifact.url,
                    transient = e.is_transient(),
                    "Installer download failed"
                );
                self.host.notifier.error(&self.download_error_message(&e)).await;
                return WorkflowOutcome::DownloadFailed;
            }
        };

        advance(&mut state, WorkflowState::Installing);
        let result = installer.install(artifact.path()).await;
        discard(artifact);

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                self.host.telemetry.report_exception(
                    TELEMETRY_CONTEXT,
                    &e,
                    &[("platform", installer.platform().to_string())],
                );
                self.host
                    .notifier
                    .error(&format!("Failed to run the CMake installer: {e}"))
                    .await;
                return WorkflowOutcome::RunnerFailed;
            }
        };

        if !outcome.is_success() {
            self.host
                .notifier
                .error(&self.install_error_message(&outcome))
                .await;
            return WorkflowOutcome::InstallFailed(outcome);
        }

        advance(&mut state, WorkflowState::Completed);
        let restart_requested = self
            .host
            .notifier
            .prompt(
                &format!("CMake {advertised} was installed. Restart to start using it."),
                &[PromptChoice::Restart],
            )
            .await
            == Some(PromptChoice::Restart);
        if restart_requested {
            self.host.notifier.restart_host().await;
        }

        WorkflowOutcome::Installed { restart_requested }
    }

    async fn download(&self, request: &UpgradeRequest) -> Result<DownloadedArtifact, DownloadError> {
        let source = &request.artifact;
        if source.sha256.is_none() {
            if self.config.require_checksum {
                return Err(DownloadError::ChecksumUnavailable {
                    artifact: source.file_name.clone(),
                });
            }
            warn!(artifact = %source.file_name, "Installing without checksum verification");
        }

        let surface = self
            .host
            .notifier
            .progress(&format!("Downloading CMake {}", request.advertised_version));
        let artifact = self
            .downloader
            .download(
                &source.url,
                &source.temp_file_hint(),
                surface.sink.as_ref(),
                &surface.cancel,
            )
            .await?;

        if let Some(expected) = &source.sha256
            && let Err(e) = verify_sha256(artifact.path(), expected).await
        {
            discard(artifact);
            return Err(e);
        }

        Ok(artifact)
    }

    async fn save_preference(&self, preference: UpgradePreference) {
        if let Err(e) = self.preferences.set(preference).await {
            self.host.telemetry.report_exception(
                TELEMETRY_CONTEXT,
                &e,
                &[("key", self.preferences.key().to_string())],
            );
        }
    }

    fn download_error_message(&self, error: &DownloadError) -> String {
        match error {
            DownloadError::NonSuccessStatus { status } => format!(
                "Failed to download the CMake installer: the server responded with HTTP {status}."
            ),
            DownloadError::Transport(e) => format!(
                "Failed to download the CMake installer: {e}. Check your network connection and try again."
            ),
            DownloadError::Io(e) => format!("Failed to save the CMake installer: {e}."),
            DownloadError::ChecksumMismatch { .. } => {
                "The downloaded CMake installer failed SHA-256 verification and was discarded."
                    .to_string()
            }
            DownloadError::ChecksumUnavailable { artifact } => format!(
                "No SHA-256 checksum is published for {artifact}; refusing to install it."
            ),
            DownloadError::Cancelled => "CMake download was cancelled.".to_string(),
        }
    }

    fn install_error_message(&self, outcome: &InstallOutcome) -> String {
        match outcome {
            InstallOutcome::AuthorizationDenied => {
                "CMake upgrade failed: administrator authorization could not be obtained."
                    .to_string()
            }
            InstallOutcome::AuthorizationDeclined => {
                "CMake upgrade cancelled: the authorization request was dismissed.".to_string()
            }
            InstallOutcome::AuthorizationToolMissing => format!(
                "CMake upgrade requires '{}' to run the installer with administrator rights. \
                 Install it or upgrade CMake manually.",
                self.config.elevation_helper
            ),
            InstallOutcome::InstallerFailed { exit_code, .. } => format!(
                "The CMake installer failed with exit code {exit_code}. See the log for details."
            ),
            InstallOutcome::Success => "CMake upgrade succeeded.".to_string(),
        }
    }
}

fn advance(state: &mut WorkflowState, next: WorkflowState) {
    debug!(from = ?*state, to = ?next, "Upgrade workflow transition");
    *state = next;
}

fn discard(artifact: DownloadedArtifact) {
    let path = artifact.path().display().to_string();
    if let Err(e) = artifact.discard() {
        warn!(%path, error = %e, "Failed to remove downloaded installer");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn now() -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp_millis(1_700_000_000_000).unwrap()
    }

    fn check(preference: UpgradePreference, current: &str, advertised: &str) -> Eligibility {
        check_eligibility(preference, now(), Duration::hours(48), current, advertised)
    }

    #[test]
    fn test_eligible_when_newer() {
        assert!(matches!(
            check(UpgradePreference::Unset, "3.10.0", "3.19.2"),
            Eligibility::Eligible { .. }
        ));
        assert_eq!(
            check(UpgradePreference::Unset, "3.10.0", "3.10.0"),
            Eligibility::UpToDate
        );
        assert_eq!(
            check(UpgradePreference::Unset, "3.10.0", "3.9.0"),
            Eligibility::UpToDate
        );
    }

    #[test]
    fn test_preference_checked_before_versions() {
        assert_eq!(
            check(UpgradePreference::Never, "garbage", "3.19.2"),
            Eligibility::OptedOut
        );
    }

    #[test]
    fn test_cooldown_window() {
        let recent = UpgradePreference::Deferred {
            last_nag: now() - Duration::hours(47),
        };
        assert_eq!(
            check(recent, "3.10.0", "3.19.2"),
            Eligibility::CoolingDown {
                remaining: Duration::hours(1)
            }
        );

        let old = UpgradePreference::Deferred {
            last_nag: now() - Duration::hours(49),
        };
        assert!(matches!(
            check(old, "3.10.0", "3.19.2"),
            Eligibility::Eligible { .. }
        ));
    }

    #[test]
    fn test_invalid_versions() {
        assert!(matches!(
            check(UpgradePreference::Unset, "v3.10.0", "3.19.2"),
            Eligibility::InvalidVersion(_)
        ));
        assert!(matches!(
            check(UpgradePreference::Unset, "3.10.0", ""),
            Eligibility::InvalidVersion(_)
        ));
    }

    #[test]
    fn test_flight_guard() {
        let flag = AtomicBool::new(false);
        let guard = FlightGuard::acquire(&flag).unwrap();
        assert!(FlightGuard::acquire(&flag).is_none());
        drop(guard);
        assert!(FlightGuard::acquire(&flag).is_some());
    }
}
