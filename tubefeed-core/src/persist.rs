use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::config::{read_json_with_tmp_fallback, tmp_path};
use crate::error::StoreError;
use crate::store::CacheSnapshot;

/// Durable home for cache snapshots.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn save(&self, snapshot: &CacheSnapshot) -> Result<(), StoreError>;
    async fn load(&self) -> Result<Option<CacheSnapshot>, StoreError>;
}

/// Snapshot kept in a single JSON file, written atomically through a `.tmp` sibling.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self::new(dir.as_ref().join("video_cache.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl SnapshotStore for JsonFileStore {
    async fn save(&self, snapshot: &CacheSnapshot) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(snapshot)?;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = tmp_path(&self.path);
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    async fn load(&self) -> Result<Option<CacheSnapshot>, StoreError> {
        let tmp = tmp_path(&self.path);
        if !tokio::fs::try_exists(&self.path).await? && !tokio::fs::try_exists(&tmp).await? {
            debug!(path = %self.path.display(), "no snapshot on disk");
            return Ok(None);
        }
        let snapshot: Option<CacheSnapshot> = read_json_with_tmp_fallback(&self.path).await;
        if snapshot.is_none() {
            warn!(path = %self.path.display(), "snapshot unreadable, starting empty");
        }
        Ok(snapshot)
    }
}

/// Keeps the last saved snapshot in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    saved: Mutex<Option<CacheSnapshot>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot(snapshot: CacheSnapshot) -> Self {
        Self {
            saved: Mutex::new(Some(snapshot)),
        }
    }

    pub fn last_saved(&self) -> Option<CacheSnapshot> {
        self.saved
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl SnapshotStore for MemoryStore {
    async fn save(&self, snapshot: &CacheSnapshot) -> Result<(), StoreError> {
        *self.saved.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(snapshot.clone());
        Ok(())
    }

    async fn load(&self) -> Result<Option<CacheSnapshot>, StoreError> {
        Ok(self.last_saved())
    }
}
