//! Persisted upgrade preference.
//!
//! The record lives under a single key of the host's [`KeyValueStore`] and is
//! serialized as `"never"` or `{ "lastNag": <epoch-millis> }`. Anything else
//! (including a missing record) reads back as [`UpgradePreference::Unset`].

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::host::KeyValueStore;

const NEVER_TAG: &str = "never";
const LAST_NAG_FIELD: &str = "lastNag";

/// The user's standing answer to the upgrade prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpgradePreference {
    /// No decision recorded
    #[default]
    Unset,
    /// Never prompt again
    Never,
    /// Asked to be reminded later
    Deferred { last_nag: DateTime<Utc> },
}

impl UpgradePreference {
    /// Whether this preference allows prompting at `now`.
    pub fn allows_prompt(&self, now: DateTime<Utc>, cooldown: Duration) -> bool {
        match self {
            Self::Unset => true,
            Self::Never => false,
            Self::Deferred { last_nag } => now - *last_nag >= cooldown,
        }
    }

    fn to_json(self) -> Value {
        match self {
            Self::Unset => Value::Null,
            Self::Never => Value::from(NEVER_TAG),
            Self::Deferred { last_nag } => {
                let mut record = Map::new();
                record.insert(
                    LAST_NAG_FIELD.to_string(),
                    Value::from(last_nag.timestamp_millis()),
                );
                Value::Object(record)
            }
        }
    }

    fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Null => Some(Self::Unset),
            Value::String(s) if s == NEVER_TAG => Some(Self::Never),
            Value::Object(map) => {
                let millis = map.get(LAST_NAG_FIELD)?.as_i64()?;
                let last_nag = DateTime::<Utc>::from_timestamp_millis(millis)?;
                Some(Self::Deferred { last_nag })
            }
            _ => None,
        }
    }
}

/// Typed view over the preference slot of a key-value store.
#[derive(Clone)]
pub struct PreferenceStore {
    store: Arc<dyn KeyValueStore>,
    key: String,
}

impl PreferenceStore {
    pub fn new(store: Arc<dyn KeyValueStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Read the preference. Missing or unrecognized records are `Unset`;
    /// only a failing store is an error.
    pub async fn load(&self) -> Result<UpgradePreference, StoreError> {
        let Some(value) = self.store.get(&self.key).await? else {
            return Ok(UpgradePreference::Unset);
        };

        Ok(UpgradePreference::from_json(&value).unwrap_or_else(|| {
            warn!(key = %self.key, value = %value, "Ignoring unrecognized upgrade preference");
            UpgradePreference::Unset
        }))
    }

    /// Like [`load`](Self::load), with store failures also read as `Unset`.
    pub async fn get(&self) -> UpgradePreference {
        self.load().await.unwrap_or_else(|e| {
            warn!(key = %self.key, error = %e, "Failed to read upgrade preference");
            UpgradePreference::Unset
        })
    }

    /// Persist the preference.
    pub async fn set(&self, preference: UpgradePreference) -> Result<(), StoreError> {
        debug!(key = %self.key, ?preference, "Saving upgrade preference");
        self.store.set(&self.key, preference.to_json()).await
    }
}
