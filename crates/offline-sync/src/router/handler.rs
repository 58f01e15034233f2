use std::sync::Arc;
use std::time::Duration;

use reqwest::Method;
use tracing::{debug, warn};

use crate::SyncConfig;
use crate::cache::{CacheRole, CacheStore, CachedResponse, NamespaceId, normalize_cache_key};
use crate::error::SyncError;
use crate::fallback::OfflineFallbackSynthesizer;
use crate::lifecycle::ActiveVersion;
use crate::net::{FetchRequest, Network, NetworkResponse, fetch_success};
use crate::response::Response;
use crate::router::classify::{ResourceClass, Strategy, classify_path, select_strategy};

/// Request-time strategy dispatch. Every request gets a response.
pub struct FetchStrategyRouter {
    config: Arc<SyncConfig>,
    store: Arc<dyn CacheStore>,
    network: Arc<dyn Network>,
    active: ActiveVersion,
    fallback: OfflineFallbackSynthesizer,
}

impl FetchStrategyRouter {
    pub fn new(
        config: Arc<SyncConfig>,
        store: Arc<dyn CacheStore>,
        network: Arc<dyn Network>,
        active: ActiveVersion,
        fallback: OfflineFallbackSynthesizer,
    ) -> Self {
        Self {
            config,
            store,
            network,
            active,
            fallback,
        }
    }

    pub fn classify(&self, request: &FetchRequest) -> ResourceClass {
        classify_path(&self.config.routes, &request.url)
    }

    pub fn select_strategy(&self, class: &ResourceClass) -> Strategy {
        select_strategy(class)
    }

    /// Serve `request` with the strategy of its class
    pub async fn handle(&self, request: &FetchRequest) -> Response {
        let class = self.classify(request);
        let key = normalize_cache_key(&request.url);

        // Only GETs are ever cached
        let strategy = if request.method == Method::GET {
            self.select_strategy(&class)
        } else {
            Strategy::NetworkOnly
        };
        debug!(url = %request.url, %class, ?strategy, "Routing request");

        match strategy {
            Strategy::CacheFirst(role) => self.cache_first(request, &class, role, &key).await,
            Strategy::NetworkFirst(role) => self.network_first(request, &class, role, &key).await,
            Strategy::NetworkOnly => self.network_only(request, &class, &key).await,
        }
    }

    async fn cache_first(
        &self,
        request: &FetchRequest,
        class: &ResourceClass,
        role: CacheRole,
        key: &str,
    ) -> Response {
        if let Some(ns) = self.active_namespace(role) {
            match self.store.get(&ns, key).await {
                Ok(Some(entry)) => {
                    debug!(namespace = %ns, key, "Cache hit");
                    return entry.into();
                }
                Ok(None) => debug!(namespace = %ns, key, "Cache miss"),
                Err(e) => warn!(namespace = %ns, key, error = %e, "Cache lookup failed"),
            }
        }

        match self.fetch(request, self.config.network.fetch_timeout).await {
            Ok(response) => {
                self.store_response(role, key, &response).await;
                response.into()
            }
            Err(e) => {
                debug!(key, error = %e, "Network failed after cache miss");
                self.fallback.synthesize(class, key).await
            }
        }
    }

    async fn network_first(
        &self,
        request: &FetchRequest,
        class: &ResourceClass,
        role: CacheRole,
        key: &str,
    ) -> Response {
        let request = if *class == ResourceClass::VersionEndpoint {
            request.clone().bypassing_cache()
        } else {
            request.clone()
        };

        match self
            .fetch(&request, self.config.network.network_first_timeout)
            .await
        {
            Ok(response) => {
                self.store_response(role, key, &response).await;
                return response.into();
            }
            Err(e) => debug!(key, error = %e, "Network-first fetch failed, trying cache"),
        }

        let active = self.active.get();
        match self
            .store
            .lookup_any_version(role, key, active.as_ref())
            .await
        {
            Ok(Some(entry)) => entry.into(),
            Ok(None) => self.fallback.synthesize(class, key).await,
            Err(e) => {
                warn!(key, error = %e, "Cache lookup failed");
                self.fallback.synthesize(class, key).await
            }
        }
    }

    async fn network_only(
        &self,
        request: &FetchRequest,
        class: &ResourceClass,
        key: &str,
    ) -> Response {
        match self.fetch(request, self.config.network.fetch_timeout).await {
            Ok(response) => response.into(),
            Err(e) => {
                debug!(url = %request.url, method = %request.method, error = %e, "Network-only fetch failed");
                // A write that never reached the origin must not read as success
                if request.method != Method::GET {
                    return self
                        .fallback
                        .synthesize(&ResourceClass::GenericDynamic, key)
                        .await;
                }
                self.fallback.synthesize(class, key).await
            }
        }
    }

    async fn fetch(
        &self,
        request: &FetchRequest,
        timeout: Duration,
    ) -> Result<NetworkResponse, SyncError> {
        fetch_success(self.network.as_ref(), request, timeout).await
    }

    fn active_namespace(&self, role: CacheRole) -> Option<NamespaceId> {
        self.active.get().map(|version| NamespaceId::new(role, version))
    }

    /// Write a successful response into the active namespace of `role`.
    /// Failures are logged and never affect the response.
    async fn store_response(&self, role: CacheRole, key: &str, response: &NetworkResponse) {
        let Some(ns) = self.active_namespace(role) else {
            debug!(key, "No active version, response not stored");
            return;
        };

        let entry = CachedResponse::new(
            response.body.clone(),
            response.status,
            response.content_type.clone(),
        );
        match self.store.put(&ns, key, entry).await {
            Ok(()) => debug!(namespace = %ns, key, "Stored response"),
            Err(SyncError::NamespaceNotFound(_)) => {
                debug!(namespace = %ns, key, "Namespace gone, response not stored")
            }
            Err(e) => warn!(namespace = %ns, key, error = %e, "Failed to store response"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCacheStore;
    use crate::response::ResponseSource;
    use crate::state::MemoryStateStore;
    use crate::test_utils::FakeNetwork;
    use crate::version::{HttpVersionOracle, Version};
    use bytes::Bytes;

    struct Fixture {
        store: Arc<MemoryCacheStore>,
        network: Arc<FakeNetwork>,
        active: ActiveVersion,
        router: FetchStrategyRouter,
    }

    fn fixture() -> Fixture {
        let config = Arc::new(SyncConfig::default());
        let store = Arc::new(MemoryCacheStore::new(1024 * 1024));
        let network = Arc::new(FakeNetwork::new());
        let active = ActiveVersion::new();
        let oracle = Arc::new(HttpVersionOracle::new(
            config.clone(),
            network.clone(),
            Arc::new(MemoryStateStore::new()),
        ));
        let fallback = OfflineFallbackSynthesizer::new(store.clone(), oracle, active.clone());
        let router = FetchStrategyRouter::new(
            config,
            store.clone(),
            network.clone(),
            active.clone(),
            fallback,
        );
        Fixture {
            store,
            network,
            active,
            router,
        }
    }

    async fn activate(f: &Fixture, version: &str) {
        let version = Version::from(version);
        for role in CacheRole::ALL {
            f.store.open(role, &version).await.unwrap();
        }
        f.active.set(version);
    }

    #[tokio::test]
    async fn test_cache_first_round_trip_offline() {
        let f = fixture();
        activate(&f, "1").await;
        f.network.respond("/assets/app.js", 200, "text/javascript", "console.log('v1')");

        let online = f.router.handle(&FetchRequest::get("/assets/app.js")).await;
        assert_eq!(online.source, ResponseSource::Network);

        f.network.set_online(false);
        let offline = f.router.handle(&FetchRequest::get("/assets/app.js?cb=2")).await;
        assert_eq!(offline.source, ResponseSource::Cache);
        assert_eq!(offline.body, online.body);
        assert_eq!(offline.content_type.as_deref(), Some("text/javascript"));
        assert_eq!(f.network.calls_to("/assets/app.js"), 1);
    }

    #[tokio::test]
    async fn test_cache_first_hit_skips_network() {
        let f = fixture();
        activate(&f, "1").await;
        f.network.respond("/", 200, "text/html", "<html>shell</html>");

        f.router.handle(&FetchRequest::get("/")).await;
        let second = f.router.handle(&FetchRequest::get("/index.html")).await;

        assert_eq!(second.source, ResponseSource::Cache);
        assert_eq!(f.network.calls_to("/"), 1);
    }

    #[tokio::test]
    async fn test_non_success_is_never_cached() {
        let f = fixture();
        activate(&f, "1").await;
        f.network.respond_text("/assets/missing.css", 404, "not here");

        let response = f.router.handle(&FetchRequest::get("/assets/missing.css")).await;
        assert!(response.is_fallback());
        assert_eq!(response.status, 503);
        assert_eq!(f.store.used_bytes(), 0);
    }

    #[tokio::test]
    async fn test_network_first_prefers_fresh_copy() {
        let f = fixture();
        activate(&f, "1").await;
        f.network.respond_json("/api/modules/3", r#"{"id":"3","rev":1}"#);
        f.router.handle(&FetchRequest::get("/api/modules/3")).await;

        f.network.respond_json("/api/modules/3", r#"{"id":"3","rev":2}"#);
        let fresh = f.router.handle(&FetchRequest::get("/api/modules/3")).await;
        assert_eq!(fresh.source, ResponseSource::Network);
        assert_eq!(fresh.body, Bytes::from(r#"{"id":"3","rev":2}"#));

        f.network.set_online(false);
        let cached = f.router.handle(&FetchRequest::get("/api/modules/3")).await;
        assert_eq!(cached.source, ResponseSource::Cache);
        assert_eq!(cached.body, Bytes::from(r#"{"id":"3","rev":2}"#));
    }

    #[tokio::test(start_paused = true)]
    async fn test_network_first_times_out_to_cache() {
        let f = fixture();
        activate(&f, "1").await;
        f.network.respond_json("/api/audio/voices", r#"["es-ES"]"#);
        f.router.handle(&FetchRequest::get("/api/audio/voices")).await;

        f.network.set_delay(Some(Duration::from_secs(60)));
        let response = f.router.handle(&FetchRequest::get("/api/audio/voices")).await;
        assert_eq!(response.source, ResponseSource::Cache);
        assert_eq!(response.body, Bytes::from(r#"["es-ES"]"#));
    }

    #[tokio::test]
    async fn test_version_endpoint_bypasses_and_is_keyed_without_param() {
        let f = fixture();
        activate(&f, "1").await;
        f.network.respond_version("3.0.2");

        f.router.handle(&FetchRequest::get("/api/version")).await;
        assert!(f.network.requests()[0].bypass_cache);

        let ns = NamespaceId::new(CacheRole::Dynamic, Version::from("1"));
        assert!(f.store.get(&ns, "/api/version").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_no_active_version_returns_without_storing() {
        let f = fixture();
        f.network.respond("/assets/app.js", 200, "text/javascript", "x");

        let response = f.router.handle(&FetchRequest::get("/assets/app.js")).await;
        assert_eq!(response.status, 200);
        assert!(f.store.list_namespaces().await.unwrap().is_empty());
        assert_eq!(f.store.used_bytes(), 0);
    }

    #[tokio::test]
    async fn test_non_get_is_network_only() {
        let f = fixture();
        activate(&f, "1").await;
        f.network.respond_json("/api/modules/1", r#"{"saved":true}"#);

        let request = FetchRequest::new(Method::POST, "/api/modules/1");
        let response = f.router.handle(&request).await;
        assert_eq!(response.source, ResponseSource::Network);
        assert_eq!(f.store.used_bytes(), 0);

        f.network.set_online(false);
        let offline = f.router.handle(&request).await;
        assert!(offline.is_fallback());
        assert_eq!(offline.status, 503);
        assert_eq!(offline.content_type.as_deref(), Some("text/plain; charset=utf-8"));
    }

    #[tokio::test]
    async fn test_offline_write_is_never_success_shaped() {
        let f = fixture();
        activate(&f, "1").await;
        f.network.set_online(false);

        for (method, path) in [
            (Method::POST, "/api/modules/1"),
            (Method::PUT, "/api/version"),
            (Method::POST, "/"),
            (Method::DELETE, "/api/audio/voices"),
        ] {
            let response = f.router.handle(&FetchRequest::new(method.clone(), path)).await;
            assert!(response.is_fallback(), "{method} {path}");
            assert_eq!(response.status, 503, "{method} {path}");
        }

        // The same module fetched with GET still gets its placeholder
        let placeholder = f.router.handle(&FetchRequest::get("/api/modules/1")).await;
        assert_eq!(placeholder.status, 200);
    }

    #[tokio::test]
    async fn test_generic_dynamic_is_never_cached() {
        let f = fixture();
        activate(&f, "1").await;
        f.network.respond_json("/api/progress", r#"{"done":3}"#);

        f.router.handle(&FetchRequest::get("/api/progress")).await;
        assert_eq!(f.store.used_bytes(), 0);

        f.network.set_online(false);
        let response = f.router.handle(&FetchRequest::get("/api/progress")).await;
        assert_eq!(response.status, 503);
    }

    #[tokio::test]
    async fn test_every_class_answers_offline_with_empty_cache() {
        let f = fixture();
        f.network.set_online(false);

        for path in [
            "/",
            "/manifest.json",
            "/api/modules/4",
            "/api/version",
            "/api/audio/voices",
            "/assets/app.js",
            "/api/progress",
        ] {
            let response = f.router.handle(&FetchRequest::get(path)).await;
            assert!(response.is_fallback(), "{path} should be synthesized");
        }
    }

    #[tokio::test]
    async fn test_quota_failure_still_returns_response() {
        let config = Arc::new(SyncConfig::default());
        let store = Arc::new(MemoryCacheStore::new(4));
        let network = Arc::new(FakeNetwork::new());
        let active = ActiveVersion::new();
        let oracle = Arc::new(HttpVersionOracle::new(
            config.clone(),
            network.clone(),
            Arc::new(MemoryStateStore::new()),
        ));
        let fallback = OfflineFallbackSynthesizer::new(store.clone(), oracle, active.clone());
        let router =
            FetchStrategyRouter::new(config, store.clone(), network.clone(), active.clone(), fallback);
        store.open(CacheRole::Static, &Version::from("1")).await.unwrap();
        active.set(Version::from("1"));
        network.respond("/big.css", 200, "text/css", "body { color: red }");

        let response = router.handle(&FetchRequest::get("/big.css")).await;
        assert_eq!(response.status, 200);
        assert_eq!(response.source, ResponseSource::Network);
        assert_eq!(store.used_bytes(), 0);
    }
}
