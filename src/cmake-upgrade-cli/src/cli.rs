//! Command-line arguments and dispatch.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::check_cmd::CheckCli;
use crate::preference_cmd::{ResetCli, StatusCli};

/// Log verbosity level for CLI output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogLevel {
    /// Only show errors
    Error,
    /// Show warnings and errors (default)
    #[default]
    Warn,
    /// Show informational messages, warnings, and errors
    Info,
    /// Show debug messages and above
    Debug,
    /// Show all messages including trace-level details
    Trace,
}

impl LogLevel {
    /// Convert to tracing filter string.
    pub fn as_filter_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }

    /// Parse from string (case-insensitive).
    pub fn from_str_loose(s: &str) -> Option<LogLevel> {
        match s.to_lowercase().as_str() {
            "error" => Some(LogLevel::Error),
            "warn" | "warning" => Some(LogLevel::Warn),
            "info" => Some(LogLevel::Info),
            "debug" => Some(LogLevel::Debug),
            "trace" => Some(LogLevel::Trace),
            _ => None,
        }
    }
}

/// Keep a local CMake installation up to date.
#[derive(Debug, Parser)]
#[command(name = "cmake-upgrade", version, about)]
pub struct Cli {
    /// Path to the configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Path to the state file holding the stored answer
    #[arg(long, global = true, value_name = "PATH", hide = true)]
    pub state: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    /// Enable trace logging
    #[arg(long, global = true, conflicts_with = "verbose")]
    pub trace: bool,

    /// Log level when neither --verbose nor --trace is given
    #[arg(long, global = true, value_enum, default_value_t = LogLevel::Warn)]
    pub log_level: LogLevel,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Check for a newer CMake and offer to install it
    Check(CheckCli),
    /// Show the stored upgrade answer
    Status(StatusCli),
    /// Forget the stored upgrade answer so the next check prompts again
    Reset(ResetCli),
}

/// Run the selected command.
pub async fn dispatch_command(cli: Cli) -> Result<()> {
    let config = crate::load_config(cli.config.as_deref())?;
    let store = match cli.state {
        Some(path) => crate::JsonFileStore::new(path),
        None => crate::JsonFileStore::open_default()?,
    };

    match cli.command {
        Commands::Check(cmd) => cmd.run(config, store).await,
        Commands::Status(cmd) => cmd.run(config, store).await,
        Commands::Reset(cmd) => cmd.run(config, store).await,
    }
}
