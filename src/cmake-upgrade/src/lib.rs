//! CMake Upgrade - Auto-upgrade coordinator for CMake installations.
//!
//! Decides whether a locally installed CMake should be upgraded and drives
//! the upgrade when the user agrees:
//! - Dotted version parsing and comparison
//! - Persisted "ask later" / "never ask" preference with a cooldown window
//! - Streaming installer download with throttled progress and cancellation
//! - Elevated installer execution with exit-code classification
//!
//! The coordinator never talks to a UI directly. Hosts plug in through the
//! traits in [`host`] (prompts, key-value storage, process execution, tool
//! lookup, telemetry).
//!
//! # Example
//!
//! ```rust,ignore
//! use cmake_upgrade::{UpgradeConfig, UpgradeHost, UpgradeRequest, UpgradeWorkflow};
//!
//! let workflow = UpgradeWorkflow::new(host, UpgradeConfig::load()?)?;
//! let outcome = workflow
//!     .run(UpgradeRequest::new("3.10.0", "3.19.2", artifact))
//!     .await;
//! println!("{outcome}");
//! ```

mod config;
mod download;
mod error;
pub mod host;
mod install;
mod preference;
mod release;
mod verify;
mod version;
mod workflow;

pub use config::{ConfigError, UpgradeConfig};
pub use download::{
    ArtifactDownloader, DownloadProgress, DownloadedArtifact, ProgressThrottle, TempFileHint,
};
pub use error::{
    DownloadError, ReleaseError, RunnerError, StoreError, UpgradeError, UpgradeResult,
};
pub use host::{
    Clock, KeyValueStore, MemoryStore, Notifier, PathToolResolver, ProcessOutput, ProcessRunner,
    ProgressSink, ProgressSurface, PromptChoice, SystemClock, Telemetry, TokioProcessRunner,
    ToolResolver, TracingTelemetry, UpgradeHost,
};
pub use install::{ElevatedShellInstaller, InstallOutcome, InstallerStrategy, strategy_for_platform};
pub use preference::{PreferenceStore, UpgradePreference};
pub use release::{ArtifactSource, GithubReleaseClient, LatestRelease};
pub use verify::{calculate_sha256, verify_sha256};
pub use version::{Version, VersionError, version_less};
pub use workflow::{Eligibility, UpgradeRequest, UpgradeWorkflow, WorkflowOutcome, check_eligibility};

/// Default GitHub API endpoint for the latest CMake release
pub const RELEASE_FEED_URL: &str = "https://api.github.com/repos/Kitware/CMake/releases/latest";

/// Default storage key for the upgrade preference record
pub const PREFERENCE_KEY: &str = "cmake.upgrade.preference";
