use std::fmt;

use crate::cache::{CacheRole, normalize_cache_key};
use crate::config::RouteConfig;

/// Class of a request, decides the fetch strategy
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResourceClass {
    /// Entry page, manifest, offline page
    CoreShell,
    ModulePayload(String),
    VersionEndpoint,
    AudioMeta,
    GenericStatic,
    GenericDynamic,
}

impl ResourceClass {
    /// Namespace role responses of this class are stored in
    pub fn role(&self) -> Option<CacheRole> {
        match self {
            ResourceClass::CoreShell | ResourceClass::GenericStatic => Some(CacheRole::Static),
            ResourceClass::ModulePayload(_) | ResourceClass::VersionEndpoint => {
                Some(CacheRole::Dynamic)
            }
            ResourceClass::AudioMeta => Some(CacheRole::AudioMeta),
            ResourceClass::GenericDynamic => None,
        }
    }
}

impl fmt::Display for ResourceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceClass::CoreShell => f.write_str("core-shell"),
            ResourceClass::ModulePayload(id) => write!(f, "module-payload({id})"),
            ResourceClass::VersionEndpoint => f.write_str("version-endpoint"),
            ResourceClass::AudioMeta => f.write_str("audio-meta"),
            ResourceClass::GenericStatic => f.write_str("generic-static"),
            ResourceClass::GenericDynamic => f.write_str("generic-dynamic"),
        }
    }
}

/// How a request is served
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Serve from the namespace, fall through to the network on a miss
    CacheFirst(CacheRole),
    /// Short-timeout network attempt, then the most recent cached copy
    NetworkFirst(CacheRole),
    NetworkOnly,
}

pub fn select_strategy(class: &ResourceClass) -> Strategy {
    match class {
        ResourceClass::CoreShell | ResourceClass::GenericStatic => {
            Strategy::CacheFirst(CacheRole::Static)
        }
        ResourceClass::ModulePayload(_) | ResourceClass::VersionEndpoint => {
            Strategy::NetworkFirst(CacheRole::Dynamic)
        }
        ResourceClass::AudioMeta => Strategy::NetworkFirst(CacheRole::AudioMeta),
        ResourceClass::GenericDynamic => Strategy::NetworkOnly,
    }
}

/// Classify a normalized request path
pub fn classify_path(routes: &RouteConfig, path: &str) -> ResourceClass {
    let key = normalize_cache_key(path);

    if key == normalize_cache_key(&routes.version_path) {
        return ResourceClass::VersionEndpoint;
    }

    if routes
        .core_shell_paths
        .iter()
        .any(|shell| normalize_cache_key(shell) == key)
    {
        return ResourceClass::CoreShell;
    }

    if let Some(id) = key.strip_prefix(routes.module_prefix.as_str()) {
        let id = id.trim_end_matches('/');
        if !id.is_empty() && !id.contains('/') {
            return ResourceClass::ModulePayload(id.to_string());
        }
    }

    if key.starts_with(routes.audio_meta_prefix.as_str()) {
        return ResourceClass::AudioMeta;
    }

    let file_name = key.rsplit('/').next().unwrap_or_default();
    if let Some((_, ext)) = file_name.rsplit_once('.') {
        let ext = ext.to_ascii_lowercase();
        if routes.static_extensions.iter().any(|s| *s == ext) {
            return ResourceClass::GenericStatic;
        }
    }

    ResourceClass::GenericDynamic
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(path: &str) -> ResourceClass {
        classify_path(&RouteConfig::default(), path)
    }

    #[test]
    fn test_classify_known_routes() {
        assert_eq!(classify("/"), ResourceClass::CoreShell);
        assert_eq!(classify("/index.html"), ResourceClass::CoreShell);
        assert_eq!(classify("/manifest.json"), ResourceClass::CoreShell);
        assert_eq!(classify("/offline.html"), ResourceClass::CoreShell);
        assert_eq!(classify("/api/version?_sync_ts=17"), ResourceClass::VersionEndpoint);
        assert_eq!(
            classify("https://lessons.example.com/api/modules/4"),
            ResourceClass::ModulePayload("4".to_string())
        );
        assert_eq!(classify("/api/audio/voices"), ResourceClass::AudioMeta);
        assert_eq!(classify("/api/audio/voices/es-ES"), ResourceClass::AudioMeta);
    }

    #[test]
    fn test_classify_generic_routes() {
        assert_eq!(classify("/assets/app.3f2a.js"), ResourceClass::GenericStatic);
        assert_eq!(classify("/img/Logo.PNG"), ResourceClass::GenericStatic);
        assert_eq!(classify("/api/progress"), ResourceClass::GenericDynamic);
        assert_eq!(classify("/api/modules/"), ResourceClass::GenericDynamic);
        assert_eq!(classify("/api/modules/4/exercises"), ResourceClass::GenericDynamic);
    }

    #[test]
    fn test_strategy_table() {
        assert_eq!(
            select_strategy(&ResourceClass::CoreShell),
            Strategy::CacheFirst(CacheRole::Static)
        );
        assert_eq!(
            select_strategy(&ResourceClass::GenericStatic),
            Strategy::CacheFirst(CacheRole::Static)
        );
        assert_eq!(
            select_strategy(&ResourceClass::ModulePayload("1".into())),
            Strategy::NetworkFirst(CacheRole::Dynamic)
        );
        assert_eq!(
            select_strategy(&ResourceClass::VersionEndpoint),
            Strategy::NetworkFirst(CacheRole::Dynamic)
        );
        assert_eq!(
            select_strategy(&ResourceClass::AudioMeta),
            Strategy::NetworkFirst(CacheRole::AudioMeta)
        );
        assert_eq!(select_strategy(&ResourceClass::GenericDynamic), Strategy::NetworkOnly);
    }
}
