//! # Persisted State
//!
//! A small key-value slot store shared by the background worker and the
//! foreground agent. It is the only state the two sides have in common.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, warn};

use crate::error::SyncError;

/// Keys owned by the sync engine
pub mod keys {
    pub const LAST_COMMITTED_VERSION: &str = "sync.last_committed_version";
    pub const LAST_CHECKED_AT: &str = "sync.last_checked_at";
    pub const LAST_RECONCILIATION_OUTCOME: &str = "sync.last_reconciliation_outcome";

    /// The only keys a bulk clear may touch
    pub const SYNC_KEYS: [&str; 3] = [
        LAST_COMMITTED_VERSION,
        LAST_CHECKED_AT,
        LAST_RECONCILIATION_OUTCOME,
    ];
}

#[async_trait]
pub trait StateStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, SyncError>;

    async fn set(&self, key: &str, value: String) -> Result<(), SyncError>;

    async fn remove(&self, key: &str) -> Result<(), SyncError>;

    /// Remove the engine's own keys and leave every other application key in place
    async fn clear_sync_keys(&self) -> Result<(), SyncError> {
        for key in keys::SYNC_KEYS {
            self.remove(key).await?;
        }
        Ok(())
    }
}

/// Outcome of the last reconciliation, persisted for diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconciliationOutcome {
    Applied,
    AppliedAfterTimeout,
    Dismissed,
}

impl ReconciliationOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconciliationOutcome::Applied => "applied",
            ReconciliationOutcome::AppliedAfterTimeout => "applied_after_timeout",
            ReconciliationOutcome::Dismissed => "dismissed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "applied" => Some(ReconciliationOutcome::Applied),
            "applied_after_timeout" => Some(ReconciliationOutcome::AppliedAfterTimeout),
            "dismissed" => Some(ReconciliationOutcome::Dismissed),
            _ => None,
        }
    }
}

/// In-memory state store, used in tests and for ephemeral sessions
#[derive(Debug, Default, Clone)]
pub struct MemoryStateStore {
    slots: Arc<Mutex<BTreeMap<String, String>>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn get(&self, key: &str) -> Result<Option<String>, SyncError> {
        Ok(self.slots.lock().get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<(), SyncError> {
        self.slots.lock().insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), SyncError> {
        self.slots.lock().remove(key);
        Ok(())
    }
}

/// JSON file backed state store. Writes go through a temp file and a rename.
#[derive(Debug, Clone)]
pub struct FileStateStore {
    path: PathBuf,
    slots: Arc<tokio::sync::Mutex<Option<BTreeMap<String, String>>>>,
}

impl FileStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            slots: Arc::new(tokio::sync::Mutex::new(None)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<BTreeMap<String, String>, SyncError> {
        match fs::read(&self.path).await {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(map) => Ok(map),
                Err(e) => {
                    warn!(path = ?self.path, error = %e, "State file is corrupt, starting empty");
                    Ok(BTreeMap::new())
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn persist(&self, map: &BTreeMap<String, String>) -> Result<(), SyncError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(map)?).await?;
        fs::rename(&tmp, &self.path).await?;
        debug!(path = ?self.path, "State file written");
        Ok(())
    }

    async fn update<F>(&self, f: F) -> Result<(), SyncError>
    where
        F: FnOnce(&mut BTreeMap<String, String>) -> bool + Send,
    {
        let mut guard = self.slots.lock().await;
        if guard.is_none() {
            *guard = Some(self.load().await?);
        }
        let Some(map) = guard.as_mut() else {
            return Ok(());
        };
        if f(map) {
            self.persist(map).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn get(&self, key: &str) -> Result<Option<String>, SyncError> {
        let mut guard = self.slots.lock().await;
        if guard.is_none() {
            *guard = Some(self.load().await?);
        }
        Ok(guard.as_ref().and_then(|map| map.get(key).cloned()))
    }

    async fn set(&self, key: &str, value: String) -> Result<(), SyncError> {
        self.update(|map| map.insert(key.to_string(), value.clone()).as_ref() != Some(&value))
            .await
    }

    async fn remove(&self, key: &str) -> Result<(), SyncError> {
        self.update(|map| map.remove(key).is_some()).await
    }
}
