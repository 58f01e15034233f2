//! # Version Oracle
//!
//! Resolves the authoritative deployed version and owns the locally
//! committed one. Versions are opaque: equality is exact string equality and
//! any difference means "update available".

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::SyncConfig;
use crate::error::SyncError;
use crate::net::{FetchRequest, Network, fetch_success};
use crate::state::{StateStore, keys};

/// Opaque deployed version identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Version(String);

impl Version {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the identifier only uses the characters deploy tooling emits
    pub fn is_well_formed(&self) -> bool {
        !self.0.is_empty()
            && self
                .0
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '+' | '_'))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Version {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Wire body of the version endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionPayload {
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub offline: bool,
}

/// A version reported by the remote source of truth
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteVersion {
    pub version: Version,
    /// Set when the body was synthesized offline. Never an update signal.
    pub offline: bool,
}

impl RemoteVersion {
    /// Decode a version endpoint body. Anything that is not a JSON object with
    /// a non-empty `version` string is a network error.
    pub fn from_body(body: &[u8]) -> Result<Self, SyncError> {
        let payload: VersionPayload = serde_json::from_slice(body)
            .map_err(|e| SyncError::network(format!("malformed version body: {e}")))?;
        let version = payload
            .version
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| SyncError::network("version body has no version"))?;

        Ok(Self {
            version: Version::new(version),
            offline: payload.offline,
        })
    }

    /// Decide whether this remote version asks the client to update
    pub fn is_update_for(&self, local: Option<&Version>) -> bool {
        if self.offline {
            return false;
        }
        if !self.version.is_well_formed() {
            let err = SyncError::VersionMismatchUnresolvable(self.version.to_string());
            warn!(error = %err, "Treating unrecognized version as an update");
        }
        local != Some(&self.version)
    }
}

#[async_trait]
pub trait VersionOracle: Send + Sync {
    /// Query the version endpoint, bypassing every cache on the way
    async fn fetch_remote_version(&self) -> Result<RemoteVersion, SyncError>;

    async fn read_local_version(&self) -> Result<Option<Version>, SyncError>;

    /// Persist `version` as the last applied one. Idempotent.
    async fn commit_local_version(&self, version: &Version) -> Result<(), SyncError>;
}

/// Oracle backed by the version endpoint and the persisted state store
pub struct HttpVersionOracle {
    config: Arc<SyncConfig>,
    network: Arc<dyn Network>,
    state: Arc<dyn StateStore>,
}

impl HttpVersionOracle {
    pub fn new(
        config: Arc<SyncConfig>,
        network: Arc<dyn Network>,
        state: Arc<dyn StateStore>,
    ) -> Self {
        Self {
            config,
            network,
            state,
        }
    }
}

#[async_trait]
impl VersionOracle for HttpVersionOracle {
    async fn fetch_remote_version(&self) -> Result<RemoteVersion, SyncError> {
        let request = FetchRequest::get(self.config.routes.version_path.clone()).bypassing_cache();
        let response = fetch_success(
            self.network.as_ref(),
            &request,
            self.config.network.version_check_timeout,
        )
        .await?;

        let remote = RemoteVersion::from_body(&response.body)?;
        debug!(version = %remote.version, offline = remote.offline, "Fetched remote version");
        Ok(remote)
    }

    async fn read_local_version(&self) -> Result<Option<Version>, SyncError> {
        Ok(self
            .state
            .get(keys::LAST_COMMITTED_VERSION)
            .await?
            .map(Version::new))
    }

    async fn commit_local_version(&self, version: &Version) -> Result<(), SyncError> {
        if self.read_local_version().await?.as_ref() == Some(version) {
            return Ok(());
        }
        self.state
            .set(keys::LAST_COMMITTED_VERSION, version.to_string())
            .await?;
        info!(%version, "Committed local version");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::MemoryStateStore;
    use crate::test_utils::FakeNetwork;

    fn oracle(network: Arc<FakeNetwork>) -> (HttpVersionOracle, Arc<MemoryStateStore>) {
        let state = Arc::new(MemoryStateStore::new());
        let oracle = HttpVersionOracle::new(Arc::new(SyncConfig::default()), network, state.clone());
        (oracle, state)
    }

    #[tokio::test]
    async fn test_fetch_remote_version_bypasses_cache() {
        let network = Arc::new(FakeNetwork::new());
        network.respond_json("/api/version", r#"{"version":"3.0.2"}"#);
        let (oracle, _) = oracle(network.clone());

        let remote = oracle.fetch_remote_version().await.unwrap();
        assert_eq!(remote.version, Version::from("3.0.2"));
        assert!(!remote.offline);

        let requests = network.requests();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].bypass_cache);
    }

    #[tokio::test]
    async fn test_malformed_body_is_network_error() {
        let network = Arc::new(FakeNetwork::new());
        network.respond_text("/api/version", 200, "<html>maintenance</html>");
        let (oracle, _) = oracle(network);

        let err = oracle.fetch_remote_version().await.unwrap_err();
        assert!(matches!(err, SyncError::Network(_)));
    }

    #[tokio::test]
    async fn test_missing_or_empty_version_is_network_error() {
        for body in [r#"{}"#, r#"{"version":"  "}"#, r#"{"version":null}"#, r#"[1,2]"#] {
            let network = Arc::new(FakeNetwork::new());
            network.respond_json("/api/version", body);
            let (oracle, _) = oracle(network);
            assert!(
                matches!(oracle.fetch_remote_version().await, Err(SyncError::Network(_))),
                "body {body} should be rejected"
            );
        }
    }

    #[tokio::test]
    async fn test_error_status_is_network_error() {
        let network = Arc::new(FakeNetwork::new());
        network.respond_text("/api/version", 502, "bad gateway");
        let (oracle, _) = oracle(network);
        assert!(oracle.fetch_remote_version().await.unwrap_err().is_network());
    }

    #[tokio::test]
    async fn test_offline_network_is_network_error() {
        let network = Arc::new(FakeNetwork::new());
        network.set_online(false);
        let (oracle, _) = oracle(network);
        assert!(oracle.fetch_remote_version().await.unwrap_err().is_network());
    }

    #[tokio::test]
    async fn test_commit_and_read_local_version() {
        let (oracle, state) = oracle(Arc::new(FakeNetwork::new()));
        assert_eq!(oracle.read_local_version().await.unwrap(), None);

        let version = Version::from("3.0.1");
        oracle.commit_local_version(&version).await.unwrap();
        oracle.commit_local_version(&version).await.unwrap();

        assert_eq!(oracle.read_local_version().await.unwrap(), Some(version));
        assert_eq!(
            state.get(keys::LAST_COMMITTED_VERSION).await.unwrap().as_deref(),
            Some("3.0.1")
        );
    }

    #[test]
    fn test_update_detection_is_exact_equality() {
        let local = Version::from("3.0.1");
        let remote = |v: &str| RemoteVersion {
            version: Version::from(v),
            offline: false,
        };

        assert!(!remote("3.0.1").is_update_for(Some(&local)));
        assert!(remote("3.0.2").is_update_for(Some(&local)));
        // Formatting differences still count as an update
        assert!(remote("v3.0.1").is_update_for(Some(&local)));
        assert!(remote("3.0.1 (hotfix)").is_update_for(Some(&local)));
        assert!(remote("3.0.1").is_update_for(None));
    }

    #[test]
    fn test_offline_payload_is_never_an_update() {
        let remote = RemoteVersion::from_body(br#"{"version":"3.0.1","offline":true}"#).unwrap();
        assert!(remote.offline);
        assert!(!remote.is_update_for(Some(&Version::from("2.9.0"))));
    }

    #[test]
    fn test_well_formed_versions() {
        assert!(Version::from("3.0.2").is_well_formed());
        assert!(Version::from("2026.10.16-build_7+sha").is_well_formed());
        assert!(!Version::from("3.0.1 (hotfix)").is_well_formed());
        assert!(!Version::from("").is_well_formed());
    }
}
