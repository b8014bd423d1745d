//! JSON file backed key-value store.
//!
//! All keys live in one JSON object. Writes go to a uniquely named temp file
//! in the same directory which is then renamed over the state file, so
//! readers never see a partial write. Writers to the same path within the
//! process are serialized, whichever handle they come from.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use cmake_upgrade::{KeyValueStore, StoreError};
use serde_json::{Map, Value};
use tokio::fs;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, warn};

const STATE_DIR: &str = "cmake-upgrade";
const STATE_FILE: &str = "state.json";

/// Per-path write locks shared by every handle in the process.
static WRITE_LOCKS: LazyLock<std::sync::Mutex<HashMap<PathBuf, Arc<AsyncMutex<()>>>>> =
    LazyLock::new(|| std::sync::Mutex::new(HashMap::new()));

fn write_lock(path: &Path) -> Arc<AsyncMutex<()>> {
    let mut locks = WRITE_LOCKS
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    locks
        .entry(path.to_path_buf())
        .or_insert_with(|| Arc::new(AsyncMutex::new(())))
        .clone()
}

/// Key-value store persisted as a single JSON object on disk.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    write_lock: Arc<AsyncMutex<()>>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let write_lock = write_lock(&path);
        Self { path, write_lock }
    }

    /// `<data_dir>/cmake-upgrade/state.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::data_dir().map(|d| d.join(STATE_DIR).join(STATE_FILE))
    }

    pub fn open_default() -> Result<Self, StoreError> {
        Self::default_path()
            .map(Self::new)
            .ok_or(StoreError::NoDataDir)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_all(&self) -> Result<Map<String, Value>, StoreError> {
        let content = match fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Map::new()),
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_str::<Value>(&content)? {
            Value::Object(map) => Ok(map),
            other => {
                warn!(path = %self.path.display(), kind = ?other, "State file is not a JSON object");
                Ok(Map::new())
            }
        }
    }
}

#[async_trait]
impl KeyValueStore for JsonFileStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.read_all().await?.remove(key))
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;

        let mut state = match self.read_all().await {
            Ok(state) => state,
            Err(StoreError::Json(e)) => {
                warn!(path = %self.path.display(), error = %e, "Replacing corrupt state file");
                Map::new()
            }
            Err(e) => return Err(e),
        };
        state.insert(key.to_string(), value);

        let content = serde_json::to_vec_pretty(&Value::Object(state))?;
        atomic_write(&self.path, content).await?;
        debug!(path = %self.path.display(), key, "Saved state");
        Ok(())
    }
}

/// Write `content` to a fresh sibling temp file, then rename it over `path`.
/// The temp file is removed if any step fails.
async fn atomic_write(path: &Path, content: Vec<u8>) -> std::io::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "Cannot determine parent directory",
            )
        })?
        .to_path_buf();
    fs::create_dir_all(&parent).await?;

    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let mut temp = tempfile::Builder::new()
            .prefix(".state.")
            .suffix(".tmp")
            .tempfile_in(&parent)?;
        temp.write_all(&content)?;
        temp.as_file().sync_all()?;
        temp.persist(&path).map_err(|e| e.error)?;
        Ok(())
    })
    .await
    .map_err(std::io::Error::other)?
}
