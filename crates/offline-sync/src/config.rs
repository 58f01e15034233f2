use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue};
use url::Url;

const DEFAULT_USER_AGENT: &str = concat!("offline-sync/", env!("CARGO_PKG_VERSION"));
const DEFAULT_ORIGIN: &str = "http://localhost:8080/";

// --- Top-Level Configuration ---
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Single origin every request is resolved against
    pub origin: Url,
    pub network: NetworkConfig,
    pub routes: RouteConfig,
    pub cache: CacheConfig,
    pub lifecycle: LifecycleConfig,
    pub agent: AgentConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            origin: Url::parse(DEFAULT_ORIGIN).expect("default origin is a valid URL"),
            network: NetworkConfig::default(),
            routes: RouteConfig::default(),
            cache: CacheConfig::default(),
            lifecycle: LifecycleConfig::default(),
            agent: AgentConfig::default(),
        }
    }
}

impl SyncConfig {
    pub fn builder() -> crate::builder::SyncConfigBuilder {
        crate::builder::SyncConfigBuilder::new()
    }

    /// Path of the module payload endpoint for `id`
    pub fn module_path(&self, id: &str) -> String {
        format!("{}{}", self.routes.module_prefix, id)
    }
}

// --- Network Configuration ---
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Timeout for cache-first and pre-cache fetches
    pub fetch_timeout: Duration,
    /// Short timeout used by network-first strategies before falling back to cache
    pub network_first_timeout: Duration,
    /// Timeout for the version endpoint
    pub version_check_timeout: Duration,
    /// Connection timeout (time to establish initial connection)
    pub connect_timeout: Duration,
    pub user_agent: String,
    /// Custom HTTP headers for requests
    pub headers: HeaderMap,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            fetch_timeout: Duration::from_secs(10),
            network_first_timeout: Duration::from_secs(3),
            version_check_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(5),
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            headers: NetworkConfig::get_default_headers(),
        }
    }
}

impl NetworkConfig {
    pub fn get_default_headers() -> HeaderMap {
        let mut default_headers = HeaderMap::new();

        default_headers.insert(
            reqwest::header::ACCEPT_ENCODING,
            HeaderValue::from_static("gzip, deflate"),
        );

        default_headers.insert(
            reqwest::header::ACCEPT,
            HeaderValue::from_static("text/html,application/json;q=0.9,*/*;q=0.8"),
        );
        default_headers
    }
}

// --- Route Configuration ---
#[derive(Debug, Clone)]
pub struct RouteConfig {
    pub version_path: String,
    /// Prefix of `GET {prefix}{id}` module payload endpoints
    pub module_prefix: String,
    /// Enumerated module ids pre-cached on install
    pub module_ids: Vec<String>,
    /// Entry page, manifest, offline page. All of them are required for an install.
    pub core_shell_paths: Vec<String>,
    /// Prefix of the audio metadata endpoints (voice catalogue)
    pub audio_meta_prefix: String,
    /// Audio metadata paths pre-cached on install
    pub audio_meta_paths: Vec<String>,
    /// File extensions classified as generic static assets
    pub static_extensions: Vec<String>,
}

impl Default for RouteConfig {
    fn default() -> Self {
        Self {
            version_path: "/api/version".to_string(),
            module_prefix: "/api/modules/".to_string(),
            module_ids: (1..=12).map(|id| id.to_string()).collect(),
            core_shell_paths: vec![
                "/".to_string(),
                "/manifest.json".to_string(),
                "/offline.html".to_string(),
            ],
            audio_meta_prefix: "/api/audio/".to_string(),
            audio_meta_paths: vec!["/api/audio/voices".to_string()],
            static_extensions: [
                "js", "mjs", "css", "html", "png", "jpg", "jpeg", "gif", "svg", "webp", "ico",
                "woff", "woff2", "ttf", "mp3", "ogg", "wav", "webmanifest",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

// --- Cache Configuration ---
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Byte budget shared by every namespace
    pub max_total_bytes: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_total_bytes: 50 * 1024 * 1024, // 50MB
        }
    }
}

// --- Lifecycle Configuration ---
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    /// Max concurrent pre-cache fetches during install
    pub precache_concurrency: usize,
    /// Interval of the obsolete namespace sweep. `None` disables it.
    pub maintenance_interval: Option<Duration>,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            precache_concurrency: 4,
            maintenance_interval: Some(Duration::from_secs(10 * 60)),
        }
    }
}

// --- Agent Configuration ---
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Steady-state polling interval
    pub poll_interval: Duration,
    /// Upper bound for the failure backoff of the periodic poll
    pub max_poll_backoff: Duration,
    /// Triggers inside this window collapse into a single check
    pub debounce_window: Duration,
    /// Time a notification stays up before auto-apply is considered
    pub grace_period: Duration,
    /// How often a busy host is re-checked while awaiting confirmation
    pub busy_recheck_interval: Duration,
    /// Bound on waiting for the worker's activation acknowledgement
    pub activation_ack_timeout: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5 * 60),
            max_poll_backoff: Duration::from_secs(30 * 60),
            debounce_window: Duration::from_millis(500),
            grace_period: Duration::from_secs(60),
            busy_recheck_interval: Duration::from_secs(15),
            activation_ack_timeout: Duration::from_secs(10),
        }
    }
}
