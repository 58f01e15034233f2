//! # Cache System
//!
//! Versioned, named cache namespaces. One namespace exists per
//! `(role, version)` pair; the lifecycle controller creates them during
//! install and deletes the obsolete ones during activation.

pub mod providers;
mod types;
mod utils;

pub use types::{
    CacheMetadata, CacheResult, CacheRole, CachedResponse, NamespaceHandle, NamespaceId,
};
pub use utils::normalize_cache_key;

pub use providers::{CacheStore, FileCacheStore, MemoryCacheStore};
