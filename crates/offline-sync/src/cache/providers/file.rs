//! # File Cache Store
//!
//! Persistent namespaces on disk. Every namespace is a directory under the
//! root and every entry a single file holding its metadata and body.
//!
//! Layout:
//!
//! ```text
//! <root>/static--<hex version>/<sha256 of key>.entry
//! <root>/.trash-<uuid>/            (namespace being removed)
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::{Bytes, BytesMut};
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::cache::providers::CacheStore;
use crate::cache::utils::KeyLocks;
use crate::cache::types::{
    CacheMetadata, CacheResult, CacheRole, CachedResponse, NamespaceHandle, NamespaceId,
};
use crate::error::SyncError;
use crate::version::Version;

const ENTRY_EXTENSION: &str = "entry";
const TRASH_PREFIX: &str = ".trash-";
const NAMESPACE_SEPARATOR: &str = "--";

#[derive(Debug, Clone)]
pub struct FileCacheStore {
    root: PathBuf,
    max_bytes: u64,
    used_bytes: Arc<AtomicU64>,
    /// Serializes writes to one entry file
    writers: Arc<KeyLocks<PathBuf>>,
    initialized: Arc<OnceCell<()>>,
}

impl FileCacheStore {
    /// Create a store rooted at `root` with the specified byte budget
    pub fn new(root: impl Into<PathBuf>, max_bytes: u64) -> Self {
        Self {
            root: root.into(),
            max_bytes,
            used_bytes: Arc::new(AtomicU64::new(0)),
            writers: Arc::new(KeyLocks::new()),
            initialized: Arc::new(OnceCell::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the root, drop leftovers of interrupted writes and deletes, and
    /// account the bytes already on disk.
    async fn ensure_initialized(&self) -> io::Result<()> {
        self.initialized
            .get_or_try_init(|| async {
                fs::create_dir_all(&self.root).await?;
                let mut total = 0u64;
                let mut dirs = fs::read_dir(&self.root).await?;
                while let Some(dir) = dirs.next_entry().await? {
                    let name = dir.file_name().to_string_lossy().into_owned();
                    let path = dir.path();
                    if name.starts_with(TRASH_PREFIX) {
                        if let Err(e) = fs::remove_dir_all(&path).await {
                            warn!(path = ?path, error = %e, "Failed to remove stale trash directory");
                        }
                        continue;
                    }
                    if parse_namespace_dir(&name).is_none() {
                        continue;
                    }
                    total += scan_namespace_dir(&path).await?;
                }
                self.used_bytes.store(total, Ordering::SeqCst);
                debug!(root = ?self.root, used_bytes = total, "File cache store initialized");
                Ok::<(), io::Error>(())
            })
            .await
            .map(|_| ())
    }

    fn namespace_dir(&self, id: &NamespaceId) -> PathBuf {
        self.root.join(namespace_dir_name(id))
    }

    fn entry_path(&self, id: &NamespaceId, key: &str) -> PathBuf {
        let digest = hex::encode(Sha256::digest(key.as_bytes()));
        self.namespace_dir(id)
            .join(format!("{digest}.{ENTRY_EXTENSION}"))
    }

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

    /// Undo a reservation made by `reserve(size, previous)`
    fn unreserve(&self, size: u64, previous: u64) {
        let _ = self
            .used_bytes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |used| {
                Some(used.saturating_sub(size) + previous)
            });
    }

    fn release(&self, bytes: u64) {
        let _ = self
            .used_bytes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |used| {
                Some(used.saturating_sub(bytes))
            });
    }
}

fn namespace_dir_name(id: &NamespaceId) -> String {
    format!(
        "{}{NAMESPACE_SEPARATOR}{}",
        id.role,
        hex::encode(id.version.as_str())
    )
}

fn parse_namespace_dir(name: &str) -> Option<NamespaceId> {
    let (role, version) = name.split_once(NAMESPACE_SEPARATOR)?;
    let role = CacheRole::parse(role)?;
    let version = String::from_utf8(hex::decode(version).ok()?).ok()?;
    Some(NamespaceId::new(role, Version::new(version)))
}

/// Sum entry sizes in a namespace directory, removing partial writes
async fn scan_namespace_dir(path: &Path) -> io::Result<u64> {
    let mut total = 0;
    let mut entries = fs::read_dir(path).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ENTRY_EXTENSION) => total += entry.metadata().await?.len(),
            _ => {
                let _ = fs::remove_file(&path).await;
            }
        }
    }
    Ok(total)
}

/// `[meta len: u32 LE][meta json][body]`
fn encode_entry(entry: &CachedResponse) -> CacheResult<Bytes> {
    let meta = serde_json::to_vec(&entry.metadata)?;
    let mut buf = BytesMut::with_capacity(4 + meta.len() + entry.body.len());
    buf.extend_from_slice(&(meta.len() as u32).to_le_bytes());
    buf.extend_from_slice(&meta);
    buf.extend_from_slice(&entry.body);
    Ok(buf.freeze())
}

fn decode_entry(raw: Bytes) -> Option<CachedResponse> {
    let len_bytes: [u8; 4] = raw.get(..4)?.try_into().ok()?;
    let meta_len = u32::from_le_bytes(len_bytes) as usize;
    let meta_end = 4usize.checked_add(meta_len)?;
    let meta: CacheMetadata = serde_json::from_slice(raw.get(4..meta_end)?).ok()?;
    let body = raw.slice(meta_end..);
    if body.len() as u64 != meta.size {
        return None;
    }
    Some(CachedResponse {
        body,
        metadata: meta,
    })
}

fn missing_namespace(e: io::Error, handle: &NamespaceHandle) -> SyncError {
    if e.kind() == io::ErrorKind::NotFound {
        SyncError::NamespaceNotFound(handle.to_string())
    } else {
        e.into()
    }
}

#[async_trait::async_trait]
impl CacheStore for FileCacheStore {
    async fn open(&self, role: CacheRole, version: &Version) -> CacheResult<NamespaceHandle> {
        self.ensure_initialized().await?;
        let id = NamespaceId::new(role, version.clone());
        fs::create_dir_all(self.namespace_dir(&id)).await?;
        Ok(id)
    }

    async fn put(
        &self,
        handle: &NamespaceHandle,
        key: &str,
        entry: CachedResponse,
    ) -> CacheResult<()> {
        self.ensure_initialized().await?;

        let dir = self.namespace_dir(handle);
        if !fs::try_exists(&dir).await? {
            return Err(SyncError::NamespaceNotFound(handle.to_string()));
        }

        let path = self.entry_path(handle, key);
        let encoded = encode_entry(&entry)?;
        let size = encoded.len() as u64;
        // Held until the rename, so `previous` is the size being replaced
        let _writer = self.writers.lock(path.clone()).await;
        let previous = match fs::metadata(&path).await {
            Ok(meta) => meta.len(),
            Err(_) => 0,
        };

        if let Err(e) = self.reserve(size, previous) {
            warn!(namespace = %handle, key, size, "Cache quota exceeded");
            return Err(e);
        }

        // Write to a temporary file then rename so readers never see a partial entry
        let temp_path = path.with_extension(format!("{}.tmp", uuid::Uuid::new_v4().simple()));
        if let Err(e) = fs::write(&temp_path, &encoded).await {
            self.unreserve(size, previous);
            let _ = fs::remove_file(&temp_path).await;
            return Err(missing_namespace(e, handle));
        }

        if let Err(e) = fs::rename(&temp_path, &path).await {
            warn!(from = ?temp_path, to = ?path, error = %e, "Failed to rename temporary entry file");
            self.unreserve(size, previous);
            let _ = fs::remove_file(&temp_path).await;
            return Err(missing_namespace(e, handle));
        }

        debug!(namespace = %handle, key, size, "Stored cache entry");
        Ok(())
    }

    async fn get(&self, handle: &NamespaceHandle, key: &str) -> CacheResult<Option<CachedResponse>> {
        self.ensure_initialized().await?;

        let path = self.entry_path(handle, key);
        let raw = match fs::read(&path).await {
            Ok(raw) => Bytes::from(raw),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                warn!(path = ?path, error = %e, "Failed to read cache entry");
                return Ok(None);
            }
        };

        match decode_entry(raw) {
            Some(entry) => Ok(Some(entry)),
            None => {
                warn!(path = ?path, "Corrupt cache entry, removing");
                let store = self.clone();
                tokio::spawn(async move {
                    if let Ok(meta) = fs::metadata(&path).await {
                        if fs::remove_file(&path).await.is_ok() {
                            store.release(meta.len());
                        }
                    }
                });
                Ok(None)
            }
        }
    }

    async fn delete(&self, handle: &NamespaceHandle) -> CacheResult<bool> {
        self.ensure_initialized().await?;

        let dir = self.namespace_dir(handle);
        let trash = self
            .root
            .join(format!("{TRASH_PREFIX}{}", uuid::Uuid::new_v4().simple()));

        // The rename makes the namespace disappear for readers in one step
        match fs::rename(&dir, &trash).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        }

        let freed = scan_namespace_dir(&trash).await.unwrap_or(0);
        self.release(freed);
        if let Err(e) = fs::remove_dir_all(&trash).await {
            warn!(path = ?trash, error = %e, "Failed to remove deleted namespace directory");
        }
        info!(namespace = %handle, freed, "Deleted cache namespace");
        Ok(true)
    }

    async fn list_namespaces(&self) -> CacheResult<Vec<NamespaceId>> {
        self.ensure_initialized().await?;

        let mut ids = Vec::new();
        let mut dirs = fs::read_dir(&self.root).await?;
        while let Some(dir) = dirs.next_entry().await? {
            if let Some(id) = parse_namespace_dir(&dir.file_name().to_string_lossy()) {
                ids.push(id);
            }
        }
        ids.sort();
        Ok(ids)
    }

    async fn entry_count(&self, handle: &NamespaceHandle) -> CacheResult<usize> {
        self.ensure_initialized().await?;

        let mut entries = match fs::read_dir(self.namespace_dir(handle)).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        let mut count = 0;
        while let Some(entry) = entries.next_entry().await? {
            if entry.path().extension().and_then(|ext| ext.to_str()) == Some(ENTRY_EXTENSION) {
                count += 1;
            }
        }
        Ok(count)
    }

    fn used_bytes(&self) -> u64 {
        self.used_bytes.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry(content: &str) -> CachedResponse {
        CachedResponse::new(
            Bytes::from(content.to_string()),
            200,
            Some("text/html".to_string()),
        )
    }

    fn v(version: &str) -> Version {
        Version::from(version)
    }

    #[test]
    fn test_namespace_dir_name_roundtrip() {
        let id = NamespaceId::new(CacheRole::AudioMeta, v("2.1.0-beta+7"));
        let name = namespace_dir_name(&id);
        assert!(name.starts_with("audio-meta--"));
        assert_eq!(parse_namespace_dir(&name), Some(id));
        assert_eq!(parse_namespace_dir(".trash-abc"), None);
        assert_eq!(parse_namespace_dir("video--31"), None);
    }

    #[tokio::test]
    async fn test_put_get_and_persist_across_instances() {
        let dir = TempDir::new().unwrap();
        let store = FileCacheStore::new(dir.path(), 1024 * 1024);
        let handle = store.open(CacheRole::Static, &v("1")).await.unwrap();
        store.put(&handle, "/", entry("<html>v1</html>")).await.unwrap();

        let hit = store.get(&handle, "/").await.unwrap().unwrap();
        assert_eq!(hit.body, Bytes::from("<html>v1</html>"));
        assert_eq!(hit.metadata.content_type.as_deref(), Some("text/html"));
        assert!(store.get(&handle, "/missing").await.unwrap().is_none());

        let used = store.used_bytes();
        assert!(used > 0);

        let reopened = FileCacheStore::new(dir.path(), 1024 * 1024);
        assert_eq!(reopened.list_namespaces().await.unwrap(), vec![handle.clone()]);
        assert_eq!(reopened.used_bytes(), used);
        let hit = reopened.get(&handle, "/").await.unwrap().unwrap();
        assert_eq!(hit.body, Bytes::from("<html>v1</html>"));
    }

    #[tokio::test]
    async fn test_delete_is_atomic_and_put_after_delete_fails() {
        let dir = TempDir::new().unwrap();
        let store = FileCacheStore::new(dir.path(), 1024 * 1024);
        let handle = store.open(CacheRole::Dynamic, &v("1")).await.unwrap();
        store.put(&handle, "/api/modules/1", entry("m1")).await.unwrap();
        assert_eq!(store.entry_count(&handle).await.unwrap(), 1);

        assert!(store.delete(&handle).await.unwrap());
        assert!(!store.delete(&handle).await.unwrap());
        assert_eq!(store.used_bytes(), 0);
        assert_eq!(store.entry_count(&handle).await.unwrap(), 0);
        assert!(store.get(&handle, "/api/modules/1").await.unwrap().is_none());

        let err = store.put(&handle, "/api/modules/1", entry("m1")).await.unwrap_err();
        assert!(matches!(err, SyncError::NamespaceNotFound(_)));
        assert!(store.list_namespaces().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_quota_exceeded_leaves_store_unchanged() {
        let dir = TempDir::new().unwrap();
        let store = FileCacheStore::new(dir.path(), 256);
        let handle = store.open(CacheRole::Static, &v("1")).await.unwrap();
        store.put(&handle, "/small", entry("ok")).await.unwrap();
        let used = store.used_bytes();

        let err = store
            .put(&handle, "/big", entry(&"x".repeat(512)))
            .await
            .unwrap_err();
        assert!(err.is_quota());
        assert_eq!(store.used_bytes(), used);
        assert!(store.get(&handle, "/big").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_a_miss() {
        let dir = TempDir::new().unwrap();
        let store = FileCacheStore::new(dir.path(), 1024 * 1024);
        let handle = store.open(CacheRole::Static, &v("1")).await.unwrap();
        store.put(&handle, "/app.js", entry("console.log(1)")).await.unwrap();

        let path = store.entry_path(&handle, "/app.js");
        fs::write(&path, b"\xff\xff\xff\xffgarbage").await.unwrap();

        assert!(store.get(&handle, "/app.js").await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_puts_to_one_key_account_once() {
        let dir = TempDir::new().unwrap();
        let store = FileCacheStore::new(dir.path(), 1024 * 1024);
        let handle = store.open(CacheRole::Static, &v("1")).await.unwrap();

        let writers: Vec<_> = (0..32)
            .map(|_| {
                let store = store.clone();
                let handle = handle.clone();
                tokio::spawn(async move {
                    store
                        .put(&handle, "/app.js", entry("console.log('v1')"))
                        .await
                })
            })
            .collect();
        for writer in writers {
            writer.await.unwrap().unwrap();
        }

        let on_disk = fs::metadata(store.entry_path(&handle, "/app.js"))
            .await
            .unwrap()
            .len();
        assert_eq!(store.entry_count(&handle).await.unwrap(), 1);
        assert_eq!(store.used_bytes(), on_disk);

        // A fresh scan agrees with the running total
        let reopened = FileCacheStore::new(dir.path(), 1024 * 1024);
        reopened.list_namespaces().await.unwrap();
        assert_eq!(reopened.used_bytes(), on_disk);
    }

    #[tokio::test]
    async fn test_overwrite_reaccounts() {
        let dir = TempDir::new().unwrap();
        let store = FileCacheStore::new(dir.path(), 1024 * 1024);
        let handle = store.open(CacheRole::Static, &v("1")).await.unwrap();
        store.put(&handle, "/app.css", entry(&"a".repeat(64))).await.unwrap();
        store.put(&handle, "/app.css", entry("b")).await.unwrap();

        let on_disk = fs::metadata(store.entry_path(&handle, "/app.css"))
            .await
            .unwrap()
            .len();
        assert_eq!(store.used_bytes(), on_disk);
    }

    #[tokio::test]
    async fn test_initialization_clears_leftovers() {
        let dir = TempDir::new().unwrap();
        let trash = dir.path().join(".trash-leftover");
        std::fs::create_dir_all(&trash).unwrap();
        std::fs::write(trash.join("x.entry"), b"old").unwrap();

        let store = FileCacheStore::new(dir.path(), 1024);
        assert!(store.list_namespaces().await.unwrap().is_empty());
        assert!(!trash.exists());
        assert_eq!(store.used_bytes(), 0);
    }
}
