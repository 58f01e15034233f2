use anyhow::{Context, Result};
use offline_sync::{SyncConfig, SyncError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

const APP_NAME: &str = "offsync";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Origin of the deployed app
    pub origin: String,

    /// Directory for the cache and the sync state (defaults next to the config file)
    pub data_dir: Option<PathBuf>,

    /// Byte budget of the cache in megabytes
    pub max_cache_mb: u64,

    /// Timeout in seconds for cache-first and pre-cache fetches
    pub fetch_timeout: u64,

    /// Timeout in seconds before network-first requests fall back to the cache
    pub network_first_timeout: u64,

    /// Timeout in seconds for the version endpoint
    pub version_check_timeout: u64,

    /// Max concurrent fetches while pre-caching a version
    pub precache_concurrency: usize,

    /// Module ids pre-cached on install
    pub module_ids: Vec<String>,

    /// Seconds between version polls in `watch`
    pub poll_interval: u64,

    /// Seconds an update notice stays up before it is applied on an idle host
    pub grace_period: u64,

    /// Seconds to wait for the worker to acknowledge an activation
    pub activation_timeout: u64,

    /// User agent string for requests
    pub user_agent: Option<String>,

    /// Extra request headers
    pub headers: BTreeMap<String, String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        let defaults = SyncConfig::default();
        Self {
            origin: defaults.origin.to_string(),
            data_dir: None,
            max_cache_mb: defaults.cache.max_total_bytes / (1024 * 1024),
            fetch_timeout: defaults.network.fetch_timeout.as_secs(),
            network_first_timeout: defaults.network.network_first_timeout.as_secs(),
            version_check_timeout: defaults.network.version_check_timeout.as_secs(),
            precache_concurrency: defaults.lifecycle.precache_concurrency,
            module_ids: defaults.routes.module_ids,
            poll_interval: defaults.agent.poll_interval.as_secs(),
            grace_period: defaults.agent.grace_period.as_secs(),
            activation_timeout: defaults.agent.activation_ack_timeout.as_secs(),
            user_agent: None,
            headers: BTreeMap::new(),
        }
    }
}

impl AppConfig {
    /// Load configuration from file, falling back to the confy default location
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        match config_path {
            Some(path) => {
                if path.exists() {
                    let content = std::fs::read_to_string(path)
                        .context("Failed to read configuration file")?;
                    toml::from_str(&content).context("Failed to parse configuration file")
                } else {
                    Ok(Self::default())
                }
            }
            None => confy::load(APP_NAME, None).context("Failed to load configuration"),
        }
    }

    /// Get default configuration file path
    pub fn default_config_path() -> Option<PathBuf> {
        confy::get_configuration_file_path(APP_NAME, None).ok()
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let toml_string =
            toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        std::fs::write(path, toml_string).context("Failed to write configuration file")?;

        Ok(())
    }

    /// Reset configuration to defaults and save
    pub fn reset(config_path: Option<&Path>) -> Result<PathBuf> {
        let path = config_path
            .map(|p| p.to_path_buf())
            .or_else(Self::default_config_path)
            .context("No configuration path available")?;

        Self::default().save(&path)?;
        Ok(path)
    }

    /// Show current configuration as a formatted string
    pub fn show(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration for display")
    }

    /// Where the cache and sync state live. `--data-dir` wins over the file.
    pub fn resolve_data_dir(&self, cli_override: Option<&Path>) -> PathBuf {
        if let Some(dir) = cli_override.or(self.data_dir.as_deref()) {
            return dir.to_path_buf();
        }
        Self::default_config_path()
            .and_then(|p| p.parent().map(|parent| parent.join("data")))
            .unwrap_or_else(|| PathBuf::from(".offsync"))
    }

    /// Build the engine configuration. `origin` overrides the configured origin.
    pub fn to_sync_config(&self, origin: Option<&str>) -> Result<SyncConfig, SyncError> {
        let origin = origin.unwrap_or(&self.origin);
        if self.max_cache_mb == 0 {
            return Err(SyncError::Config(
                "max_cache_mb must be greater than zero".to_string(),
            ));
        }

        let mut builder = SyncConfig::builder()
            .with_origin(origin)?
            .with_max_cache_bytes(self.max_cache_mb * 1024 * 1024)
            .with_fetch_timeout(Duration::from_secs(self.fetch_timeout))
            .with_network_first_timeout(Duration::from_secs(self.network_first_timeout))
            .with_version_check_timeout(Duration::from_secs(self.version_check_timeout))
            .with_precache_concurrency(self.precache_concurrency.max(1))
            .with_module_ids(self.module_ids.iter())
            .with_poll_interval(Duration::from_secs(self.poll_interval.max(1)))
            .with_grace_period(Duration::from_secs(self.grace_period))
            .with_activation_ack_timeout(Duration::from_secs(self.activation_timeout.max(1)));

        if let Some(user_agent) = &self.user_agent {
            builder = builder.with_user_agent(user_agent);
        }
        for (name, value) in &self.headers {
            builder = builder.with_header(name, value);
        }
        Ok(builder.build())
    }
}
