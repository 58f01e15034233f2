//! # Memory Cache Store
//!
//! In-memory namespaces, each backed by a Moka cache.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use moka::future::Cache as MokaCache;
use parking_lot::RwLock;
use tokio::sync::RwLock as AsyncRwLock;
use tracing::{debug, warn};

use crate::cache::providers::CacheStore;
use crate::cache::utils::KeyLocks;
use crate::cache::types::{CacheResult, CacheRole, CachedResponse, NamespaceHandle, NamespaceId};
use crate::error::SyncError;
use crate::version::Version;

/// Entries of one namespace. Readers clone the `Arc` and never block writers.
struct Namespace {
    entries: MokaCache<String, CachedResponse>,
    writers: KeyLocks<String>,
    /// Shared by puts, taken exclusively by `delete`. False once deleted.
    live: AsyncRwLock<bool>,
}

impl Namespace {
    fn new() -> Self {
        Self {
            entries: MokaCache::builder().build(),
            writers: KeyLocks::new(),
            live: AsyncRwLock::new(true),
        }
    }

    fn total_bytes(&self) -> u64 {
        self.entries.iter().map(|(_, entry)| entry.size()).sum()
    }
}

/// Memory cache store with a shared byte budget
pub struct MemoryCacheStore {
    namespaces: RwLock<HashMap<NamespaceId, Arc<Namespace>>>,
    max_bytes: u64,
    used_bytes: AtomicU64,
}

impl MemoryCacheStore {
    /// Create a new store with the specified byte budget.
    ///
    /// A zero budget is raised to one byte, so every non-empty put fails
    /// with `QuotaExceeded`.
    pub fn new(max_bytes: u64) -> Self {
        if max_bytes == 0 {
            warn!("Memory cache size of zero, nothing will be stored");
        }
        let max_bytes = max_bytes.max(1);
        debug!(max_bytes, "Memory cache store created");
        Self {
            namespaces: RwLock::new(HashMap::new()),
            max_bytes,
            used_bytes: AtomicU64::new(0),
        }
    }

    fn namespace(&self, handle: &NamespaceHandle) -> Option<Arc<Namespace>> {
        self.namespaces.read().get(handle).cloned()
    }

    /// Reserve room for `size` bytes replacing `previous` bytes
    fn reserve(&self, size: u64, previous: u64) -> CacheResult<()> {
        let max = self.max_bytes;
        self.used_bytes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |used| {
                let next = used.saturating_sub(previous) + size;
                (next <= max).then_some(next)
            })
            .map(|_| ())
            .map_err(|used| SyncError::QuotaExceeded {
                requested: size,
                available: max.saturating_sub(used.saturating_sub(previous)),
            })
    }

    fn release(&self, bytes: u64) {
        let _ = self
            .used_bytes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |used| {
                Some(used.saturating_sub(bytes))
            });
    }
}

impl Default for MemoryCacheStore {
    fn default() -> Self {
        Self::new(crate::config::CacheConfig::default().max_total_bytes)
    }
}

#[async_trait::async_trait]
impl CacheStore for MemoryCacheStore {
    async fn open(&self, role: CacheRole, version: &Version) -> CacheResult<NamespaceHandle> {
        let id = NamespaceId::new(role, version.clone());
        let mut namespaces = self.namespaces.write();
        if !namespaces.contains_key(&id) {
            namespaces.insert(id.clone(), Arc::new(Namespace::new()));
            debug!(namespace = %id, "Created cache namespace");
        }
        Ok(id)
    }

    async fn put(
        &self,
        handle: &NamespaceHandle,
        key: &str,
        entry: CachedResponse,
    ) -> CacheResult<()> {
        let namespace = self
            .namespace(handle)
            .ok_or_else(|| SyncError::NamespaceNotFound(handle.to_string()))?;

        let live = namespace.live.read().await;
        if !*live {
            return Err(SyncError::NamespaceNotFound(handle.to_string()));
        }
        let _writer = namespace.writers.lock(key.to_string()).await;

        let previous = namespace
            .entries
            .get(key)
            .await
            .map(|old| old.size())
            .unwrap_or(0);

        if let Err(e) = self.reserve(entry.size(), previous) {
            warn!(namespace = %handle, key, size = entry.size(), "Cache quota exceeded");
            return Err(e);
        }

        namespace.entries.insert(key.to_string(), entry).await;
        Ok(())
    }

    async fn get(&self, handle: &NamespaceHandle, key: &str) -> CacheResult<Option<CachedResponse>> {
        let Some(namespace) = self.namespace(handle) else {
            return Ok(None);
        };
        Ok(namespace.entries.get(key).await)
    }

    async fn delete(&self, handle: &NamespaceHandle) -> CacheResult<bool> {
        let removed = self.namespaces.write().remove(handle);
        match removed {
            Some(namespace) => {
                // Waits for in-flight puts so their bytes are released too
                *namespace.live.write().await = false;
                self.release(namespace.total_bytes());
                debug!(namespace = %handle, "Deleted cache namespace");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list_namespaces(&self) -> CacheResult<Vec<NamespaceId>> {
        let mut ids: Vec<NamespaceId> = self.namespaces.read().keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    async fn entry_count(&self, handle: &NamespaceHandle) -> CacheResult<usize> {
        Ok(self
            .namespace(handle)
            .map(|namespace| namespace.entries.iter().count())
            .unwrap_or(0))
    }

    fn used_bytes(&self) -> u64 {
        self.used_bytes.load(Ordering::SeqCst)
    }
}
