//! Error types for cmake-upgrade.

use thiserror::Error;

use crate::config::ConfigError;

/// Result type for setting up the upgrade machinery.
pub type UpgradeResult<T> = std::result::Result<T, UpgradeError>;

/// Errors raised while constructing the coordinator.
#[derive(Debug, Error)]
pub enum UpgradeError {
    #[error("Failed to build HTTP client: {0}")]
    HttpClient(#[source] reqwest::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Errors that can occur while downloading the installer artifact.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("Download server returned HTTP {status}")]
    NonSuccessStatus { status: u16 },

    #[error("Network error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Download cancelled by user")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SHA256 verification failed: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("No SHA256 checksum published for {artifact}")]
    ChecksumUnavailable { artifact: String },
}

impl DownloadError {
    /// Check if this error is worth retrying on the next check.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::NonSuccessStatus { status } => *status >= 500,
            _ => false,
        }
    }
}

/// Infrastructure failures of the installer runner.
///
/// Authorization and installer failures are not errors; they are reported
/// through [`crate::InstallOutcome`].
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("Failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} was terminated before reporting an exit code")]
    Terminated { program: String },
}

/// Errors from the persistent key-value store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Could not determine data directory")]
    NoDataDir,
}

/// Errors from the release feed.
#[derive(Debug, Error)]
pub enum ReleaseError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Release server returned error {status}: {message}")]
    ServerError { status: u16, message: String },

    #[error("Release tag {tag} is not a version")]
    InvalidTag { tag: String },

    #[error("No installer published for platform {platform}")]
    NoPlatformAsset { platform: String },
}
