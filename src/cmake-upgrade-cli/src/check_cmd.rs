//! Check command - look for a newer CMake and offer to install it.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use cmake_upgrade::{
    GithubReleaseClient, UpgradeConfig, UpgradeHost, UpgradeRequest, UpgradeWorkflow,
    WorkflowOutcome,
};
use tracing::debug;

use crate::cmake_probe;
use crate::state_store::JsonFileStore;
use crate::terminal::TerminalNotifier;

/// Check CLI.
#[derive(Debug, Parser)]
pub struct CheckCli {
    /// Installed CMake version, instead of asking `cmake --version`
    #[arg(long, value_name = "VERSION")]
    pub current: Option<String>,

    /// cmake executable to query (defaults to the one on PATH)
    #[arg(long, value_name = "PATH", conflicts_with = "current")]
    pub cmake: Option<PathBuf>,

    /// Accept the upgrade offer without prompting
    #[arg(long, short = 'y')]
    pub yes: bool,
}

impl CheckCli {
    pub async fn run(self, config: UpgradeConfig, store: JsonFileStore) -> Result<()> {
        let notifier = Arc::new(TerminalNotifier::new().assume_yes(self.yes));
        let host = UpgradeHost::new(notifier, Arc::new(store));

        let current = match self.current {
            Some(version) => version,
            None => {
                let Some(cmake) =
                    cmake_probe::locate(self.cmake.as_deref(), host.resolver.as_ref()).await
                else {
                    println!("cmake was not found on PATH. Nothing to upgrade.");
                    return Ok(());
                };
                cmake_probe::installed_version(&cmake, host.process.as_ref()).await?
            }
        };

        let releases = GithubReleaseClient::new(&config)?;
        println!("Installed CMake: {current}");
        println!("Checking {}...", releases.feed_url());
        let latest = releases
            .latest()
            .await
            .context("Failed to resolve the latest CMake release")?;
        println!("Latest CMake:    {}", latest.version);

        let workflow =
            UpgradeWorkflow::new(host, config).context("Failed to initialize upgrade workflow")?;
        let request = UpgradeRequest::new(current, latest.version, latest.artifact);

        let outcome = workflow.run(&request).await;
        debug!(%outcome, "Check finished");

        print_outcome(&outcome);
        Ok(())
    }
}

fn print_outcome(outcome: &WorkflowOutcome) {
    match outcome {
        WorkflowOutcome::UpToDate => println!("\nCMake is up to date."),
        WorkflowOutcome::OptedOut => {
            println!("\nUpgrade prompts are disabled. Run `cmake-upgrade reset` to enable them.")
        }
        WorkflowOutcome::CoolingDown => println!(
            "\nYou postponed this upgrade recently. Run `cmake-upgrade reset` to be asked now."
        ),
        WorkflowOutcome::Unsupported => {
            println!("\nAutomatic CMake upgrades are only supported on Linux.")
        }
        WorkflowOutcome::Installed { .. } => println!("\nCMake upgraded."),
        // Failures were already reported by the notifier.
        WorkflowOutcome::DownloadFailed
        | WorkflowOutcome::RunnerFailed
        | WorkflowOutcome::InstallFailed(_)
        | WorkflowOutcome::Cancelled => {}
        other => println!("\n{}.", capitalize(&other.to_string())),
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
