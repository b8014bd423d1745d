//! Command-line host for the CMake auto-upgrade coordinator.
//!
//! - `cli` - Argument parsing and dispatch
//! - `*_cmd.rs` - Individual command implementations
//! - `terminal` - Prompts and progress on the terminal
//! - `state_store` - JSON file backed key-value store
//! - `cmake_probe` - Installed CMake detection

pub mod check_cmd;
pub mod cli;
pub mod cmake_probe;
pub mod preference_cmd;
pub mod state_store;
pub mod terminal;

use std::path::Path;

use anyhow::{Context, Result};
use cmake_upgrade::UpgradeConfig;

pub use state_store::JsonFileStore;
pub use terminal::TerminalNotifier;

/// Load the configuration from `path`, or from the default location.
pub fn load_config(path: Option<&Path>) -> Result<UpgradeConfig> {
    let config = match path {
        Some(path) => UpgradeConfig::load_from(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => UpgradeConfig::load().context("Failed to load config")?,
    };
    config.validate().context("Invalid configuration")?;
    Ok(config)
}
