//! # Offline Fallback
//!
//! Well-formed substitutes for requests that neither the network nor the
//! cache could answer. Nothing produced here is ever written to a cache.

use std::sync::Arc;

use serde_json::json;
use tracing::{debug, warn};

use crate::cache::{CacheRole, CacheStore};
use crate::lifecycle::ActiveVersion;
use crate::response::{Response, ResponseSource};
use crate::router::ResourceClass;
use crate::version::VersionOracle;

const OFFLINE_PAGE: &str = "<!DOCTYPE html>\n<html lang=\"en\">\n<head><meta charset=\"utf-8\">\
<meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\
<title>Offline</title></head>\n<body><main><h1>You are offline</h1>\
<p>This page has not been saved for offline use yet. Reconnect and try again.</p>\
</main></body>\n</html>\n";

const OFFLINE_TEXT: &str = "Offline: this resource is not available without a network connection.";

pub struct OfflineFallbackSynthesizer {
    store: Arc<dyn CacheStore>,
    oracle: Arc<dyn VersionOracle>,
    active: ActiveVersion,
}

impl OfflineFallbackSynthesizer {
    pub fn new(
        store: Arc<dyn CacheStore>,
        oracle: Arc<dyn VersionOracle>,
        active: ActiveVersion,
    ) -> Self {
        Self {
            store,
            oracle,
            active,
        }
    }

    /// Build a substitute response for `class`. Never fails.
    ///
    /// `key` is the normalized cache key of the original request.
    pub async fn synthesize(&self, class: &ResourceClass, key: &str) -> Response {
        debug!(%class, key, "Synthesizing offline response");
        match class {
            ResourceClass::VersionEndpoint => self.version_body().await,
            ResourceClass::ModulePayload(id) => module_placeholder(id),
            ResourceClass::CoreShell => self.shell(key).await,
            _ => Response::synthesized(503, "text/plain; charset=utf-8", OFFLINE_TEXT),
        }
    }

    async fn version_body(&self) -> Response {
        let committed = match self.oracle.read_local_version().await {
            Ok(version) => version,
            Err(e) => {
                warn!(error = %e, "Failed to read committed version for offline body");
                None
            }
        };
        let body = json!({
            "version": committed.map(|v| v.to_string()),
            "offline": true,
        });
        Response::synthesized(200, "application/json", body.to_string())
    }

    async fn shell(&self, key: &str) -> Response {
        let active = self.active.get();
        match self
            .store
            .lookup_any_version(CacheRole::Static, key, active.as_ref())
            .await
        {
            Ok(Some(entry)) => {
                let mut response = Response::from(entry);
                response.source = ResponseSource::Fallback;
                response
            }
            Ok(None) => Response::synthesized(503, "text/html; charset=utf-8", OFFLINE_PAGE),
            Err(e) => {
                warn!(key, error = %e, "Shell lookup failed, serving offline page");
                Response::synthesized(503, "text/html; charset=utf-8", OFFLINE_PAGE)
            }
        }
    }
}

fn module_placeholder(id: &str) -> Response {
    let body = json!({
        "id": id,
        "offline": true,
        "available": false,
        "message": format!(
            "Module {id} has not been downloaded yet. Connect to the internet to load it."
        ),
    });
    Response::synthesized(200, "application/json", body.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CachedResponse, MemoryCacheStore};
    use crate::config::SyncConfig;
    use crate::state::MemoryStateStore;
    use crate::test_utils::FakeNetwork;
    use crate::version::{HttpVersionOracle, Version};
    use bytes::Bytes;

    struct Fixture {
        store: Arc<MemoryCacheStore>,
        oracle: Arc<HttpVersionOracle>,
        active: ActiveVersion,
        synthesizer: OfflineFallbackSynthesizer,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryCacheStore::new(1024 * 1024));
        let oracle = Arc::new(HttpVersionOracle::new(
            Arc::new(SyncConfig::default()),
            Arc::new(FakeNetwork::new()),
            Arc::new(MemoryStateStore::new()),
        ));
        let active = ActiveVersion::new();
        let synthesizer = OfflineFallbackSynthesizer::new(store.clone(), oracle.clone(), active.clone());
        Fixture {
            store,
            oracle,
            active,
            synthesizer,
        }
    }

    fn json_body(response: &Response) -> serde_json::Value {
        serde_json::from_slice(&response.body).unwrap()
    }

    #[tokio::test]
    async fn test_module_placeholder_is_labeled() {
        let f = fixture();
        let response = f
            .synthesizer
            .synthesize(&ResourceClass::ModulePayload("4".into()), "/api/modules/4")
            .await;

        assert_eq!(response.status, 200);
        assert!(response.is_fallback());
        let body = json_body(&response);
        assert_eq!(body["id"], "4");
        assert_eq!(body["offline"], true);
        assert_eq!(body["available"], false);
        assert!(body["message"].as_str().unwrap().contains("4"));
    }

    #[tokio::test]
    async fn test_version_body_without_commit() {
        let f = fixture();
        let response = f
            .synthesizer
            .synthesize(&ResourceClass::VersionEndpoint, "/api/version")
            .await;
        let body = json_body(&response);
        assert!(body["version"].is_null());
        assert_eq!(body["offline"], true);
    }

    #[tokio::test]
    async fn test_version_body_uses_committed_version() {
        let f = fixture();
        f.oracle
            .commit_local_version(&Version::from("3.0.1"))
            .await
            .unwrap();
        let response = f
            .synthesizer
            .synthesize(&ResourceClass::VersionEndpoint, "/api/version")
            .await;
        assert_eq!(json_body(&response)["version"], "3.0.1");
    }

    #[tokio::test]
    async fn test_shell_from_any_static_namespace() {
        let f = fixture();
        let old = f.store.open(CacheRole::Static, &Version::from("1")).await.unwrap();
        f.store
            .put(
                &old,
                "/",
                CachedResponse::new(Bytes::from("<html>v1</html>"), 200, Some("text/html".into())),
            )
            .await
            .unwrap();
        f.active.set(Version::from("2"));

        let response = f.synthesizer.synthesize(&ResourceClass::CoreShell, "/").await;
        assert_eq!(response.status, 200);
        assert_eq!(response.body, Bytes::from("<html>v1</html>"));
    }

    #[tokio::test]
    async fn test_shell_without_cache_is_offline_page() {
        let f = fixture();
        let response = f
            .synthesizer
            .synthesize(&ResourceClass::CoreShell, "/manifest.json")
            .await;
        assert_eq!(response.status, 503);
        assert!(response.text().contains("You are offline"));
    }

    #[tokio::test]
    async fn test_other_classes_get_plain_text() {
        let f = fixture();
        for class in [
            ResourceClass::GenericStatic,
            ResourceClass::GenericDynamic,
            ResourceClass::AudioMeta,
        ] {
            let response = f.synthesizer.synthesize(&class, "/x").await;
            assert_eq!(response.status, 503);
            assert!(response.content_type.unwrap().starts_with("text/plain"));
        }
    }

    #[tokio::test]
    async fn test_synthesized_responses_are_not_cached() {
        let f = fixture();
        f.store.open(CacheRole::Dynamic, &Version::from("1")).await.unwrap();
        f.active.set(Version::from("1"));
        f.synthesizer
            .synthesize(&ResourceClass::ModulePayload("9".into()), "/api/modules/9")
            .await;
        assert_eq!(f.store.used_bytes(), 0);
    }
}
