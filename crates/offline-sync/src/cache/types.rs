//! # Cache Types
//!
//! This module defines common types used across the caching system.

use std::fmt;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SyncError;
use crate::version::Version;

/// Role of a cache namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
#[serde(rename_all = "kebab-case")]
pub enum CacheRole {
    /// Shell and static assets, changes only on deploy
    Static,
    /// Module payloads and the version endpoint
    Dynamic,
    /// Voice catalogue and other audio metadata
    AudioMeta,
}

impl CacheRole {
    pub const ALL: [CacheRole; 3] = [CacheRole::Static, CacheRole::Dynamic, CacheRole::AudioMeta];

    pub fn as_str(&self) -> &'static str {
        match self {
            CacheRole::Static => "static",
            CacheRole::Dynamic => "dynamic",
            CacheRole::AudioMeta => "audio-meta",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|role| role.as_str() == value)
    }
}

impl fmt::Display for CacheRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies a namespace: `(role, version)`. Also serves as the handle returned by `open`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NamespaceId {
    pub role: CacheRole,
    pub version: Version,
}

impl NamespaceId {
    pub fn new(role: CacheRole, version: Version) -> Self {
        Self { role, version }
    }
}

impl fmt::Display for NamespaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-v{}", self.role, self.version)
    }
}

/// Handle to an opened namespace
pub type NamespaceHandle = NamespaceId;

/// Metadata stored next to every cached payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheMetadata {
    /// HTTP status the payload was served with
    pub status: u16,
    pub content_type: Option<String>,
    pub fetched_at: DateTime<Utc>,
    /// Size of the payload in bytes
    pub size: u64,
}

impl CacheMetadata {
    pub fn new(size: u64) -> Self {
        Self {
            status: 200,
            content_type: None,
            fetched_at: Utc::now(),
            size,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    /// Set the content type as an Option
    pub fn with_content_type_option(mut self, content_type: Option<String>) -> Self {
        self.content_type = content_type;
        self
    }
}

/// A stored response payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponse {
    pub body: Bytes,
    pub metadata: CacheMetadata,
}

impl CachedResponse {
    pub fn new(body: Bytes, status: u16, content_type: Option<String>) -> Self {
        let metadata = CacheMetadata::new(body.len() as u64)
            .with_status(status)
            .with_content_type_option(content_type);
        Self { body, metadata }
    }

    pub fn size(&self) -> u64 {
        self.body.len() as u64
    }
}

/// Result of a cache operation
pub type CacheResult<T> = std::result::Result<T, SyncError>;
