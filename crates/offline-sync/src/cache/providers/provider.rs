//! # Cache Store
//!
//! The trait every namespace store implements.

use async_trait::async_trait;
use tracing::debug;

use crate::cache::types::{CacheResult, CacheRole, CachedResponse, NamespaceHandle, NamespaceId};
use crate::version::Version;

/// Store of named, versioned cache namespaces.
///
/// Reads never touch the network. Deleting a namespace is atomic to readers:
/// a concurrent `get` sees either the old entry or a miss.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Open `(role, version)`, creating it empty when missing
    async fn open(&self, role: CacheRole, version: &Version) -> CacheResult<NamespaceHandle>;

    /// Store `entry` under `key`, overwriting any previous value.
    ///
    /// Fails with `NamespaceNotFound` when the namespace was deleted and with
    /// `QuotaExceeded` when the byte budget would be exceeded.
    async fn put(
        &self,
        handle: &NamespaceHandle,
        key: &str,
        entry: CachedResponse,
    ) -> CacheResult<()>;

    /// Local lookup. A missing namespace is a miss.
    async fn get(&self, handle: &NamespaceHandle, key: &str) -> CacheResult<Option<CachedResponse>>;

    /// Delete a namespace with all of its entries. Returns whether it existed.
    async fn delete(&self, handle: &NamespaceHandle) -> CacheResult<bool>;

    async fn list_namespaces(&self) -> CacheResult<Vec<NamespaceId>>;

    async fn entry_count(&self, handle: &NamespaceHandle) -> CacheResult<usize>;

    /// Bytes currently accounted against the quota
    fn used_bytes(&self) -> u64;

    /// Look `key` up in every namespace of `role`, trying `preferred` first
    async fn lookup_any_version(
        &self,
        role: CacheRole,
        key: &str,
        preferred: Option<&Version>,
    ) -> CacheResult<Option<CachedResponse>> {
        let mut candidates: Vec<NamespaceId> = self
            .list_namespaces()
            .await?
            .into_iter()
            .filter(|ns| ns.role == role)
            .collect();
        // Preferred version first, the rest newest-looking first
        candidates.sort_by(|a, b| {
            let a_pref = Some(&a.version) == preferred;
            let b_pref = Some(&b.version) == preferred;
            b_pref.cmp(&a_pref).then_with(|| b.version.cmp(&a.version))
        });

        for ns in candidates {
            if let Some(entry) = self.get(&ns, key).await? {
                debug!(namespace = %ns, key, "Found entry in fallback namespace");
                return Ok(Some(entry));
            }
        }
        Ok(None)
    }
}
