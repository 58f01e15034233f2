//! # Control Protocol
//!
//! Request/response messages between the foreground agent and the background
//! worker. Every request carries a correlation id that its reply echoes.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::oneshot;

use crate::error::SyncError;
use crate::lifecycle::{ActivationReport, CacheStatusReport, InstallReport};
use crate::version::Version;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlRequest {
    /// Re-warm every resource of the active version
    CacheAll,
    ActivateVersion { version: Version },
    GetCacheStatus,
    /// Drop every namespace and the engine's persisted keys
    ClearCache,
}

impl ControlRequest {
    pub fn name(&self) -> &'static str {
        match self {
            ControlRequest::CacheAll => "cache_all",
            ControlRequest::ActivateVersion { .. } => "activate_version",
            ControlRequest::GetCacheStatus => "get_cache_status",
            ControlRequest::ClearCache => "clear_cache",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlResponse {
    CacheAll(InstallReport),
    Activated(ActivationReport),
    CacheStatus(CacheStatusReport),
    Cleared,
}

/// A request on its way to the worker
#[derive(Debug)]
pub struct ControlEnvelope {
    pub id: u64,
    pub request: ControlRequest,
    pub reply: oneshot::Sender<ControlReply>,
}

/// The worker's answer to the envelope with the same id
#[derive(Debug)]
pub struct ControlReply {
    pub id: u64,
    pub result: Result<ControlResponse, SyncError>,
}

/// Sending side of the control channel, as seen by the agent
#[async_trait]
pub trait WorkerLink: Send + Sync {
    /// Send `request` and wait at most `timeout` for the correlated reply
    async fn request(
        &self,
        request: ControlRequest,
        timeout: Duration,
    ) -> Result<ControlResponse, SyncError>;
}
