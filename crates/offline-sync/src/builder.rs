//! # Builder for SyncConfig
//!
//! Fluent construction of a [`SyncConfig`].
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use offline_sync::SyncConfig;
//!
//! let config = SyncConfig::builder()
//!     .with_origin("https://lessons.example.com")
//!     .unwrap()
//!     .with_module_ids(["1", "2", "3"])
//!     .with_poll_interval(Duration::from_secs(600))
//!     .with_header("X-Client", "offline-sync")
//!     .build();
//!
//! assert_eq!(config.routes.module_ids.len(), 3);
//! ```

use std::time::Duration;

use reqwest::header::HeaderValue;
use url::Url;

use crate::SyncConfig;
use crate::error::SyncError;

/// Builder for creating SyncConfig instances with a fluent API
#[derive(Debug, Clone)]
pub struct SyncConfigBuilder {
    config: SyncConfig,
}

impl SyncConfigBuilder {
    /// Create a new builder with default configuration
    pub fn new() -> Self {
        Self {
            config: SyncConfig::default(),
        }
    }

    /// Set the origin all relative paths are resolved against.
    ///
    /// A deployment below a subpath keeps it: `https://host/app` resolves
    /// `/api/version` to `https://host/app/api/version`.
    pub fn with_origin(mut self, origin: impl AsRef<str>) -> Result<Self, SyncError> {
        let mut url = Url::parse(origin.as_ref())?;
        if url.cannot_be_a_base() {
            return Err(SyncError::Config(format!(
                "origin {} cannot be used as a base URL",
                origin.as_ref()
            )));
        }
        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }
        url.set_query(None);
        url.set_fragment(None);
        self.config.origin = url;
        Ok(self)
    }

    pub fn with_module_ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.routes.module_ids = ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_core_shell_paths<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.routes.core_shell_paths = paths.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_audio_meta_paths<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.routes.audio_meta_paths = paths.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_version_path(mut self, path: impl Into<String>) -> Self {
        self.config.routes.version_path = path.into();
        self
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.config.network.fetch_timeout = timeout;
        self
    }

    pub fn with_network_first_timeout(mut self, timeout: Duration) -> Self {
        self.config.network.network_first_timeout = timeout;
        self
    }

    pub fn with_version_check_timeout(mut self, timeout: Duration) -> Self {
        self.config.network.version_check_timeout = timeout;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.network.connect_timeout = timeout;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.network.user_agent = user_agent.into();
        self
    }

    /// Add a custom HTTP header. Invalid names or values are ignored.
    pub fn with_header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        if let (Ok(name), Ok(value)) = (
            name.as_ref().parse::<reqwest::header::HeaderName>(),
            HeaderValue::from_str(value.as_ref()),
        ) {
            self.config.network.headers.insert(name, value);
        }
        self
    }

    pub fn with_max_cache_bytes(mut self, bytes: u64) -> Self {
        self.config.cache.max_total_bytes = bytes;
        self
    }

    pub fn with_precache_concurrency(mut self, concurrency: usize) -> Self {
        self.config.lifecycle.precache_concurrency = concurrency.max(1);
        self
    }

    pub fn with_maintenance_interval(mut self, interval: Option<Duration>) -> Self {
        self.config.lifecycle.maintenance_interval = interval;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.config.agent.poll_interval = interval;
        self
    }

    pub fn with_max_poll_backoff(mut self, backoff: Duration) -> Self {
        self.config.agent.max_poll_backoff = backoff;
        self
    }

    pub fn with_debounce_window(mut self, window: Duration) -> Self {
        self.config.agent.debounce_window = window;
        self
    }

    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.config.agent.grace_period = grace;
        self
    }

    pub fn with_busy_recheck_interval(mut self, interval: Duration) -> Self {
        self.config.agent.busy_recheck_interval = interval;
        self
    }

    pub fn with_activation_ack_timeout(mut self, timeout: Duration) -> Self {
        self.config.agent.activation_ack_timeout = timeout;
        self
    }

    /// Build the SyncConfig instance
    pub fn build(self) -> SyncConfig {
        self.config
    }
}

impl Default for SyncConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let config = SyncConfigBuilder::new().build();
        assert_eq!(config.origin.as_str(), "http://localhost:8080/");
        assert_eq!(config.routes.version_path, "/api/version");
        assert_eq!(config.routes.core_shell_paths.len(), 3);
        assert_eq!(config.network.network_first_timeout, Duration::from_secs(3));
        assert_eq!(config.agent.poll_interval, Duration::from_secs(300));
    }

    #[test]
    fn test_builder_customization() {
        let config = SyncConfigBuilder::new()
            .with_origin("https://lessons.example.com/app?x=1#top")
            .unwrap()
            .with_module_ids(["4", "7"])
            .with_grace_period(Duration::from_secs(5))
            .with_precache_concurrency(0)
            .with_header("X-Custom-Header", "CustomValue")
            .build();

        assert_eq!(config.origin.as_str(), "https://lessons.example.com/app/");
        assert_eq!(config.routes.module_ids, vec!["4", "7"]);
        assert_eq!(config.agent.grace_period, Duration::from_secs(5));
        assert_eq!(config.lifecycle.precache_concurrency, 1);
        let header_value = config.network.headers.get("X-Custom-Header").unwrap();
        assert_eq!(header_value.to_str().unwrap(), "CustomValue");
    }

    #[test]
    fn test_origin_trailing_slash_normalized() {
        for (input, expected) in [
            ("https://lessons.example.com", "https://lessons.example.com/"),
            ("https://lessons.example.com/", "https://lessons.example.com/"),
            ("https://lessons.example.com/es/app/", "https://lessons.example.com/es/app/"),
            ("https://lessons.example.com/es/app", "https://lessons.example.com/es/app/"),
        ] {
            let config = SyncConfigBuilder::new().with_origin(input).unwrap().build();
            assert_eq!(config.origin.as_str(), expected, "input: {input}");
        }
    }

    #[test]
    fn test_invalid_origin_rejected() {
        let result = SyncConfigBuilder::new().with_origin("not a url");
        assert!(matches!(result, Err(SyncError::Config(_))));

        let result = SyncConfigBuilder::new().with_origin("mailto:someone@example.com");
        assert!(matches!(result, Err(SyncError::Config(_))));
    }
}
