use std::sync::Arc;
use std::time::Duration;

/// Error type shared by every component of the sync engine.
#[derive(Debug, thiserror::Error, Clone)]
pub enum SyncError {
    /// Transport failure, timeout, non-success status or unparseable body.
    #[error("Network error: {0}")]
    Network(String),

    #[error("Storage quota exceeded: {requested} bytes requested, {available} bytes available")]
    QuotaExceeded { requested: u64, available: u64 },

    /// Remote version has a format we do not recognise. Treated as "update available".
    #[error("Unrecognized remote version format: {0:?}")]
    VersionMismatchUnresolvable(String),

    #[error("Background worker did not acknowledge activation of {version} within {timeout:?}")]
    ActivationTimeout { version: String, timeout: Duration },

    #[error("Cache namespace not found: {0}")]
    NamespaceNotFound(String),

    #[error("Install failed: {0}")]
    InstallFailed(String),

    #[error("Invalid lifecycle state: {0}")]
    InvalidState(String),

    #[error("Control channel closed")]
    ChannelClosed,

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: Arc<std::io::Error>,
    },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl SyncError {
    pub fn network(msg: impl Into<String>) -> Self {
        SyncError::Network(msg.into())
    }

    pub fn is_network(&self) -> bool {
        matches!(self, SyncError::Network(_) | SyncError::Timeout(_))
    }

    pub fn is_quota(&self) -> bool {
        matches!(self, SyncError::QuotaExceeded { .. })
    }
}

// reqwest errors are collapsed into the string form so fakes can build the same variant.
impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SyncError::Timeout(err.to_string())
        } else {
            SyncError::Network(err.to_string())
        }
    }
}

// Manual implementation because of the Arc wrapping.
impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::StorageFull | std::io::ErrorKind::QuotaExceeded => {
                SyncError::QuotaExceeded {
                    requested: 0,
                    available: 0,
                }
            }
            _ => SyncError::Io {
                source: Arc::new(err),
            },
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Io {
            source: Arc::new(std::io::Error::new(std::io::ErrorKind::InvalidData, err)),
        }
    }
}

impl From<url::ParseError> for SyncError {
    fn from(err: url::ParseError) -> Self {
        SyncError::Config(format!("invalid URL: {err}"))
    }
}
