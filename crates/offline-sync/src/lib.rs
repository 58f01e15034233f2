//! # Offline Sync
//!
//! Offline cache and update synchronization engine for a content-heavy web
//! app. Decides what is cached, how stale caches are dropped when a new
//! version is deployed, what is served without a network, and how a running
//! client is moved onto the latest version without breaking the user's
//! session.
//!
//! ## Components
//!
//! - [`VersionOracle`]: remote and locally committed version
//! - [`CacheStore`]: versioned namespaces per role (memory or file backed)
//! - [`FetchStrategyRouter`]: per-class cache-first / network-first / network-only
//! - [`OfflineFallbackSynthesizer`]: substitutes when nothing else answers
//! - [`UpdateLifecycleController`]: install → activate state machine
//! - [`BackgroundWorker`]: owns the cache, answers control requests
//! - [`ForegroundSyncAgent`]: notify → confirm → apply → reload

pub mod agent;
pub mod builder;
pub mod cache;
pub mod config;
pub mod error;
pub mod fallback;
pub mod lifecycle;
pub mod net;
pub mod protocol;
pub mod response;
pub mod router;
pub mod state;
pub mod version;
pub mod worker;

#[cfg(test)]
mod test_utils;

pub use agent::{
    AgentCommand, AgentExit, AgentHandle, ForegroundHost, ForegroundSyncAgent,
    ReconciliationState, Trigger, UpdateSession,
};
pub use builder::SyncConfigBuilder;
pub use cache::{CacheRole, CacheStore, FileCacheStore, MemoryCacheStore, NamespaceId};
pub use config::SyncConfig;
pub use error::SyncError;
pub use fallback::OfflineFallbackSynthesizer;
pub use lifecycle::{
    ActiveVersion, CacheStatusReport, InstallReport, LifecycleEvent, LifecyclePhase,
    UpdateLifecycleController,
};
pub use net::{FetchRequest, HttpNetwork, Network, NetworkResponse};
pub use protocol::{ControlRequest, ControlResponse, WorkerLink};
pub use response::{Response, ResponseSource};
pub use router::{FetchStrategyRouter, ResourceClass, Strategy};
pub use state::{FileStateStore, MemoryStateStore, ReconciliationOutcome, StateStore};
pub use version::{HttpVersionOracle, RemoteVersion, Version, VersionOracle};
pub use worker::{BackgroundWorker, WorkerHandle};
