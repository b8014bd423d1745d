//! Host collaborators consumed by the upgrade workflow.
//!
//! The coordinator owns no UI, storage or process plumbing. A host provides
//! these through the traits below; default implementations cover everything
//! except the [`Notifier`], which is always host specific.

use std::collections::HashMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::process::Command;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::download::DownloadProgress;
use crate::error::StoreError;

/// A choice offered to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PromptChoice {
    /// Download and install now
    Upgrade,
    /// Ask again after the cooldown window
    Later,
    /// Never ask again
    Never,
    /// Restart the host after a successful install
    Restart,
}

impl PromptChoice {
    /// Button label shown to the user.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Upgrade => "Yes",
            Self::Later => "Not now",
            Self::Never => "Don't ask again",
            Self::Restart => "Restart",
        }
    }
}

impl std::fmt::Display for PromptChoice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Receives download progress. Called from the download task; must not block.
pub trait ProgressSink: Send + Sync {
    fn report(&self, progress: &DownloadProgress);
}

impl<F> ProgressSink for F
where
    F: Fn(&DownloadProgress) + Send + Sync,
{
    fn report(&self, progress: &DownloadProgress) {
        self(progress)
    }
}

/// A cancellable progress surface handed out by the host.
#[derive(Clone)]
pub struct ProgressSurface {
    pub sink: Arc<dyn ProgressSink>,
    pub cancel: CancellationToken,
}

impl ProgressSurface {
    pub fn new(sink: Arc<dyn ProgressSink>, cancel: CancellationToken) -> Self {
        Self { sink, cancel }
    }
}

/// Notification and prompt service.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Ask the user to pick one of `choices`. `None` means the prompt was
    /// dismissed.
    async fn prompt(&self, message: &str, choices: &[PromptChoice]) -> Option<PromptChoice>;

    async fn info(&self, message: &str);

    async fn error(&self, message: &str);

    /// Open a progress surface for a long-running unit of work.
    fn progress(&self, title: &str) -> ProgressSurface;

    /// Restart the host application after an upgrade.
    async fn restart_host(&self) {}
}

/// Persistent key-value store scoped to the user installation.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;

    /// Must be atomic from the caller's point of view.
    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError>;
}

/// Captured result of a finished child process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    /// `None` when the process was killed by a signal
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

/// Process execution facility.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn execute(&self, program: &Path, args: &[OsString]) -> std::io::Result<ProcessOutput>;
}

/// Resolves tools on the system path.
#[async_trait]
pub trait ToolResolver: Send + Sync {
    async fn which(&self, name: &str) -> Option<PathBuf>;
}

/// Sink for internal errors that must not reach the user.
pub trait Telemetry: Send + Sync {
    fn report_exception(
        &self,
        context: &str,
        error: &(dyn std::error::Error + Send + Sync),
        metadata: &[(&str, String)],
    );
}

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Runs processes with tokio, capturing stdout and stderr.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioProcessRunner;

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn execute(&self, program: &Path, args: &[OsString]) -> std::io::Result<ProcessOutput> {
        let output = Command::new(program)
            .args(args)
            .stdin(std::process::Stdio::null())
            .kill_on_drop(false)
            .output()
            .await?;

        Ok(ProcessOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Looks tools up on `PATH` with the `which` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct PathToolResolver;

#[async_trait]
impl ToolResolver for PathToolResolver {
    async fn which(&self, name: &str) -> Option<PathBuf> {
        which::which(name).ok()
    }
}

/// Forwards exceptions to `tracing` at error level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingTelemetry;

impl Telemetry for TracingTelemetry {
    fn report_exception(
        &self,
        context: &str,
        error: &(dyn std::error::Error + Send + Sync),
        metadata: &[(&str, String)],
    ) {
        tracing::error!(context, error = %error, metadata = ?metadata, "Upgrade check failed");
    }
}

/// In-memory store, for tests and hosts without persistence.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.values.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        self.values.lock().await.insert(key.to_string(), value);
        Ok(())
    }
}

/// Bundle of collaborators handed to the workflow.
#[derive(Clone)]
pub struct UpgradeHost {
    pub notifier: Arc<dyn Notifier>,
    pub store: Arc<dyn KeyValueStore>,
    pub process: Arc<dyn ProcessRunner>,
    pub resolver: Arc<dyn ToolResolver>,
    pub telemetry: Arc<dyn Telemetry>,
    pub clock: Arc<dyn Clock>,
}

impl UpgradeHost {
    /// Create a host with default process, resolver, telemetry and clock.
    pub fn new(notifier: Arc<dyn Notifier>, store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            notifier,
            store,
            process: Arc::new(TokioProcessRunner),
            resolver: Arc::new(PathToolResolver),
            telemetry: Arc::new(TracingTelemetry),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_process_runner(mut self, process: Arc<dyn ProcessRunner>) -> Self {
        self.process = process;
        self
    }

    pub fn with_tool_resolver(mut self, resolver: Arc<dyn ToolResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_telemetry(mut self, telemetry: Arc<dyn Telemetry>) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_roundtrip() {
        let store = MemoryStore::new();
        assert!(store.get("k").await.unwrap().is_none());
        store.set("k", Value::from("never")).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(Value::from("never")));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_tokio_runner_captures_exit_code() {
        let output = TokioProcessRunner
            .execute(
                Path::new("sh"),
                &["-c".into(), "echo oops >&2; exit 3".into()],
            )
            .await
            .unwrap();
        assert_eq!(output.exit_code, Some(3));
        assert_eq!(output.stderr.trim(), "oops");
    }

    #[test]
    fn test_choice_labels_are_distinct() {
        let labels = [
            PromptChoice::Upgrade.label(),
            PromptChoice::Later.label(),
            PromptChoice::Never.label(),
            PromptChoice::Restart.label(),
        ];
        let unique: std::collections::HashSet<_> = labels.iter().collect();
        assert_eq!(unique.len(), labels.len());
    }
}
