//! cmake-upgrade - Main entry point.
//!
//! Detects the installed CMake, compares it with the latest Kitware release
//! and offers to upgrade it. Also inspects and resets the stored
//! "ask later" / "never ask" answer.

use anyhow::Result;
use clap::Parser;

use cmake_upgrade_cli::cli::{Cli, LogLevel, dispatch_command};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.trace {
        LogLevel::Trace
    } else if cli.verbose {
        LogLevel::Debug
    } else if let Ok(env_level) = std::env::var("CMAKE_UPGRADE_LOG_LEVEL") {
        LogLevel::from_str_loose(&env_level).unwrap_or(cli.log_level)
    } else {
        cli.log_level
    };

    // An explicit RUST_LOG wins over the flags.
    let filter = match std::env::var("RUST_LOG") {
        Ok(directives) if !directives.is_empty() => directives,
        _ => log_level.as_filter_str().to_string(),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    dispatch_command(cli).await
}
