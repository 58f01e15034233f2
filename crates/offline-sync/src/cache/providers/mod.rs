//! # Cache Providers
//!
//! This module contains different cache store implementations.

// Re-export providers for easier access
pub use self::file::FileCacheStore;
pub use self::memory::MemoryCacheStore;
pub use self::provider::CacheStore;

// Store interface
pub mod provider;

// Individual provider implementations
pub mod file;
pub mod memory;
