//! Status and reset commands for the stored upgrade answer.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Local, Utc};
use clap::Parser;
use cmake_upgrade::{PreferenceStore, UpgradeConfig, UpgradePreference};

use crate::state_store::JsonFileStore;

/// Status CLI.
#[derive(Debug, Parser)]
pub struct StatusCli {}

impl StatusCli {
    pub async fn run(self, config: UpgradeConfig, store: JsonFileStore) -> Result<()> {
        println!("State file: {}", store.path().display());
        let preferences = PreferenceStore::new(Arc::new(store), config.preference_key.clone());
        let preference = preferences.get().await;
        println!("{}", describe(&preference, Utc::now(), config.cooldown()));
        Ok(())
    }
}

/// Reset CLI.
#[derive(Debug, Parser)]
pub struct ResetCli {}

impl ResetCli {
    pub async fn run(self, config: UpgradeConfig, store: JsonFileStore) -> Result<()> {
        let path = store.path().to_path_buf();
        let preferences = PreferenceStore::new(Arc::new(store), config.preference_key.clone());
        preferences
            .set(UpgradePreference::Unset)
            .await
            .with_context(|| format!("Failed to update {}", path.display()))?;
        println!("Stored answer cleared. The next check will ask again.");
        Ok(())
    }
}

/// Human-readable summary of the stored answer.
pub fn describe(preference: &UpgradePreference, now: DateTime<Utc>, cooldown: Duration) -> String {
    match preference {
        UpgradePreference::Unset => "No stored answer: upgrades are offered when available.".to_string(),
        UpgradePreference::Never => "Upgrade prompts are disabled (\"Don't ask again\").".to_string(),
        UpgradePreference::Deferred { last_nag } => {
            let next = *last_nag + cooldown;
            let asked = last_nag.with_timezone(&Local).format("%Y-%m-%d %H:%M");
            if now >= next {
                format!("Upgrade postponed on {asked}; the next check will ask again.")
            } else {
                format!(
                    "Upgrade postponed on {asked}; next prompt after {}.",
                    next.with_timezone(&Local).format("%Y-%m-%d %H:%M")
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cmake_upgrade::KeyValueStore;
    use serde_json::json;
    use tempfile::tempdir;

    fn now() -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp_millis(1_700_000_000_000).unwrap()
    }

    #[test]
    fn test_describe() {
        let cooldown = Duration::hours(48);
        assert!(describe(&UpgradePreference::Unset, now(), cooldown).contains("No stored answer"));
        assert!(describe(&UpgradePreference::Never, now(), cooldown).contains("disabled"));

        let recent = UpgradePreference::Deferred {
            last_nag: now() - Duration::hours(1),
        };
        assert!(describe(&recent, now(), cooldown).contains("next prompt after"));

        let old = UpgradePreference::Deferred {
            last_nag: now() - Duration::hours(49),
        };
        assert!(describe(&old, now(), cooldown).contains("will ask again"));
    }

    #[tokio::test]
    async fn test_reset_writes_null() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        let config = UpgradeConfig::default();

        let store = JsonFileStore::new(&path);
        store.set(&config.preference_key, json!("never")).await.unwrap();

        ResetCli {}
            .run(config.clone(), JsonFileStore::new(&path))
            .await
            .unwrap();

        let store = JsonFileStore::new(&path);
        assert_eq!(
            store.get(&config.preference_key).await.unwrap(),
            Some(serde_json::Value::Null)
        );
        let preferences = PreferenceStore::new(Arc::new(store), config.preference_key);
        assert_eq!(preferences.get().await, UpgradePreference::Unset);
    }
}
