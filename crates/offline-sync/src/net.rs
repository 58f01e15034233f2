//! # Network
//!
//! The single seam between the engine and the origin server. Everything that
//! leaves the process goes through a [`Network`] so the strategies can be
//! exercised against a scripted fake.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, Method};
use tracing::debug;
use url::Url;

use crate::SyncConfig;
use crate::error::SyncError;

/// Query parameter appended to cache-bypassing requests
pub const CACHE_BUST_PARAM: &str = "_sync_ts";

/// An outgoing request, as seen by the router and the oracle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub method: Method,
    /// Absolute URL or origin-relative path
    pub url: String,
    /// Defeat intermediary caches (unique query parameter + no-cache headers)
    pub bypass_cache: bool,
}

impl FetchRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            url: url.into(),
            bypass_cache: false,
        }
    }

    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            bypass_cache: false,
        }
    }

    pub fn bypassing_cache(mut self) -> Self {
        self.bypass_cache = true;
        self
    }
}

/// Raw response received from the network, before any strategy decision
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Bytes,
}

impl NetworkResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[async_trait]
pub trait Network: Send + Sync {
    /// Perform the request. Any status is returned as `Ok`; only transport
    /// failures are errors.
    async fn fetch(&self, request: &FetchRequest) -> Result<NetworkResponse, SyncError>;
}

/// Run `fetch` with a hard deadline. Elapsed deadlines surface as [`SyncError::Timeout`].
pub async fn fetch_with_timeout(
    network: &dyn Network,
    request: &FetchRequest,
    timeout: Duration,
) -> Result<NetworkResponse, SyncError> {
    match tokio::time::timeout(timeout, network.fetch(request)).await {
        Ok(result) => result,
        Err(_) => Err(SyncError::Timeout(format!(
            "{} {} after {timeout:?}",
            request.method, request.url
        ))),
    }
}

/// Like [`fetch_with_timeout`], but non-2xx statuses are failures too.
pub async fn fetch_success(
    network: &dyn Network,
    request: &FetchRequest,
    timeout: Duration,
) -> Result<NetworkResponse, SyncError> {
    let response = fetch_with_timeout(network, request, timeout).await?;
    if response.is_success() {
        Ok(response)
    } else {
        Err(SyncError::network(format!(
            "server returned status {} for {}",
            response.status, request.url
        )))
    }
}

/// Create a reqwest Client with the provided configuration
pub fn create_client(config: &SyncConfig) -> Result<Client, SyncError> {
    let mut client_builder = Client::builder()
        .pool_max_idle_per_host(5)
        .user_agent(&config.network.user_agent)
        .default_headers(config.network.headers.clone())
        .redirect(reqwest::redirect::Policy::limited(10));

    if !config.network.connect_timeout.is_zero() {
        client_builder = client_builder.connect_timeout(config.network.connect_timeout);
    }

    client_builder.build().map_err(SyncError::from)
}

/// [`Network`] implementation backed by reqwest
#[derive(Clone)]
pub struct HttpNetwork {
    client: Client,
    origin: Arc<Url>,
}

impl HttpNetwork {
    pub fn new(config: &SyncConfig) -> Result<Self, SyncError> {
        Ok(Self {
            client: create_client(config)?,
            origin: Arc::new(config.origin.clone()),
        })
    }

    pub fn with_client(client: Client, origin: Url) -> Self {
        Self {
            client,
            origin: Arc::new(origin),
        }
    }

    fn resolve(&self, request: &FetchRequest) -> Result<Url, SyncError> {
        let mut url = match Url::parse(&request.url) {
            Ok(url) => url,
            // Relative to the origin's path, which may be a subpath deployment
            Err(url::ParseError::RelativeUrlWithoutBase) => {
                self.origin.join(request.url.trim_start_matches('/'))?
            }
            Err(e) => return Err(SyncError::network(format!("invalid URL {}: {e}", request.url))),
        };

        if request.bypass_cache {
            let stamp = chrono::Utc::now().timestamp_millis();
            url.query_pairs_mut()
                .append_pair(CACHE_BUST_PARAM, &stamp.to_string());
        }
        Ok(url)
    }
}

#[async_trait]
impl Network for HttpNetwork {
    async fn fetch(&self, request: &FetchRequest) -> Result<NetworkResponse, SyncError> {
        let url = self.resolve(request)?;
        let mut builder = self.client.request(request.method.clone(), url.clone());
        if request.bypass_cache {
            builder = builder
                .header(reqwest::header::CACHE_CONTROL, "no-cache, no-store")
                .header(reqwest::header::PRAGMA, "no-cache");
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        let body = response.bytes().await?;

        debug!(%url, status, size = body.len(), "Network fetch completed");
        Ok(NetworkResponse {
            status,
            content_type,
            body,
        })
    }
}
