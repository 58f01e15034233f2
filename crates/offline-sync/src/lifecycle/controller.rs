use std::collections::BTreeMap;
use std::sync::Arc;

use futures::StreamExt;
use futures::future::join_all;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::SyncConfig;
use crate::cache::{CacheRole, CacheStore, CachedResponse, NamespaceId, normalize_cache_key};
use crate::error::SyncError;
use crate::lifecycle::{ActiveVersion, LifecycleEvent};
use crate::net::{FetchRequest, Network, fetch_success};
use crate::state::StateStore;
use crate::version::{Version, VersionOracle};

const EVENT_CHANNEL_CAPACITY: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecyclePhase {
    Idle,
    Installing,
    Installed,
    Activating,
    Active,
}

/// A resource that could not be pre-cached
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedResource {
    pub path: String,
    pub reason: String,
}

/// Outcome of an install or re-warm
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstallReport {
    pub version: Version,
    pub stored: usize,
    pub skipped: Vec<SkippedResource>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActivationReport {
    pub version: Version,
    /// The version was already active and nothing changed
    pub already_active: bool,
}

/// Snapshot answered to `GetCacheStatus`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheStatusReport {
    pub active_version: Option<Version>,
    pub phase: LifecyclePhase,
    /// Entry count of the active namespace of every role
    pub entries: BTreeMap<CacheRole, usize>,
}

#[derive(Debug)]
struct ControllerState {
    phase: LifecyclePhase,
    /// Installed but not yet active
    installed: Option<Version>,
    /// Install in progress
    installing: Option<Version>,
}

/// One pre-cache job
struct Precache {
    role: CacheRole,
    path: String,
    required: bool,
}

/// Install → activate state machine of the background worker.
///
/// Owns namespace creation and deletion. Operations are serialized by the
/// worker loop that drives it.
pub struct UpdateLifecycleController {
    config: Arc<SyncConfig>,
    store: Arc<dyn CacheStore>,
    network: Arc<dyn Network>,
    oracle: Arc<dyn VersionOracle>,
    state_store: Arc<dyn StateStore>,
    active: ActiveVersion,
    state: Mutex<ControllerState>,
    events: broadcast::Sender<LifecycleEvent>,
}

impl UpdateLifecycleController {
    pub fn new(
        config: Arc<SyncConfig>,
        store: Arc<dyn CacheStore>,
        network: Arc<dyn Network>,
        oracle: Arc<dyn VersionOracle>,
        state_store: Arc<dyn StateStore>,
        active: ActiveVersion,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            config,
            store,
            network,
            oracle,
            state_store,
            active,
            state: Mutex::new(ControllerState {
                phase: LifecyclePhase::Idle,
                installed: None,
                installing: None,
            }),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.events.subscribe()
    }

    pub fn phase(&self) -> LifecyclePhase {
        self.state.lock().phase
    }

    pub fn active_version(&self) -> Option<Version> {
        self.active.get()
    }

    fn set_phase(&self, phase: LifecyclePhase) {
        let mut state = self.state.lock();
        if state.phase != phase {
            debug!(from = ?state.phase, to = ?phase, "Lifecycle phase change");
            state.phase = phase;
        }
    }

    /// Phase to fall back to when an install is abandoned
    fn resting_phase(&self) -> LifecyclePhase {
        if self.active.get().is_some() {
            LifecyclePhase::Active
        } else {
            LifecyclePhase::Idle
        }
    }

    /// Re-adopt the committed version after a restart when its static
    /// namespace is still on disk
    pub async fn restore(&self) -> Result<Option<Version>, SyncError> {
        let Some(committed) = self.oracle.read_local_version().await? else {
            return Ok(None);
        };
        let static_ns = NamespaceId::new(CacheRole::Static, committed.clone());
        if !self.store.list_namespaces().await?.contains(&static_ns) {
            debug!(version = %committed, "Committed version has no cache, staying idle");
            return Ok(None);
        }

        self.active.set(committed.clone());
        self.set_phase(LifecyclePhase::Active);
        info!(version = %committed, "Restored active version");
        Ok(Some(committed))
    }

    /// Pre-cache every resource of `version` into fresh namespaces.
    ///
    /// A failing core-shell resource fails the install and removes the new
    /// namespaces; the active version keeps serving.
    pub async fn install(&self, version: &Version) -> Result<InstallReport, SyncError> {
        {
            let mut state = self.state.lock();
            state.installing = Some(version.clone());
            state.phase = LifecyclePhase::Installing;
        }
        info!(%version, "Installing version");

        let result = self.install_inner(version).await;

        let mut state = self.state.lock();
        state.installing = None;
        match &result {
            Ok(report) => {
                state.installed = Some(version.clone());
                state.phase = LifecyclePhase::Installed;
                info!(
                    %version,
                    stored = report.stored,
                    skipped = report.skipped.len(),
                    "Install complete"
                );
            }
            Err(e) => {
                state.phase = self.resting_phase();
                error!(%version, error = %e, "Install failed");
            }
        }
        result
    }

    async fn install_inner(&self, version: &Version) -> Result<InstallReport, SyncError> {
        let mut handles = Vec::with_capacity(CacheRole::ALL.len());
        for role in CacheRole::ALL {
            handles.push(self.store.open(role, version).await?);
        }

        let report = self.precache(version).await;
        let shell_failures: Vec<&SkippedResource> = report
            .skipped
            .iter()
            .filter(|skipped| self.is_core_shell(&skipped.path))
            .collect();

        if shell_failures.is_empty() {
            return Ok(report);
        }

        let detail = shell_failures
            .iter()
            .map(|s| format!("{} ({})", s.path, s.reason))
            .collect::<Vec<_>>()
            .join(", ");

        // Never discard the namespaces of the version currently serving
        if !self.active.is(version) {
            for handle in &handles {
                if let Err(e) = self.store.delete(handle).await {
                    warn!(namespace = %handle, error = %e, "Failed to remove namespace of failed install");
                }
            }
        }
        Err(SyncError::InstallFailed(format!(
            "core shell for {version} could not be cached: {detail}"
        )))
    }

    fn is_core_shell(&self, path: &str) -> bool {
        self.config.routes.core_shell_paths.iter().any(|p| p == path)
    }

    fn precache_plan(&self) -> Vec<Precache> {
        let routes = &self.config.routes;
        let shell = routes.core_shell_paths.iter().map(|path| Precache {
            role: CacheRole::Static,
            path: path.clone(),
            required: true,
        });
        let modules = routes.module_ids.iter().map(|id| Precache {
            role: CacheRole::Dynamic,
            path: self.config.module_path(id),
            required: false,
        });
        let audio = routes.audio_meta_paths.iter().map(|path| Precache {
            role: CacheRole::AudioMeta,
            path: path.clone(),
            required: false,
        });
        shell.chain(modules).chain(audio).collect()
    }

    /// Fetch and store every planned resource with bounded concurrency
    async fn precache(&self, version: &Version) -> InstallReport {
        let concurrency = self.config.lifecycle.precache_concurrency.max(1);
        let outcomes: Vec<(Precache, Result<(), SyncError>)> =
            futures::stream::iter(self.precache_plan())
                .map(|job| async move {
                    let result = self.precache_one(version, &job).await;
                    (job, result)
                })
                .buffer_unordered(concurrency)
                .collect()
                .await;

        let mut report = InstallReport {
            version: version.clone(),
            stored: 0,
            skipped: Vec::new(),
        };
        for (job, result) in outcomes {
            match result {
                Ok(()) => report.stored += 1,
                Err(e) => {
                    if job.required {
                        error!(path = %job.path, error = %e, "Failed to pre-cache core shell resource");
                    } else {
                        warn!(path = %job.path, error = %e, "Skipping resource that could not be pre-cached");
                    }
                    report.skipped.push(SkippedResource {
                        path: job.path,
                        reason: e.to_string(),
                    });
                }
            }
        }
        report
    }

    async fn precache_one(&self, version: &Version, job: &Precache) -> Result<(), SyncError> {
        let request = FetchRequest::get(job.path.clone()).bypassing_cache();
        let response = fetch_success(
            self.network.as_ref(),
            &request,
            self.config.network.fetch_timeout,
        )
        .await?;

        let handle = NamespaceId::new(job.role, version.clone());
        let key = normalize_cache_key(&job.path);
        let entry = CachedResponse::new(response.body, response.status, response.content_type);
        self.store.put(&handle, &key, entry).await?;
        debug!(namespace = %handle, key, "Pre-cached resource");
        Ok(())
    }

    /// Make `version` the one serving requests.
    ///
    /// Installs it first when needed, deletes every namespace of every other
    /// version, commits it and broadcasts `OfflineReady` then `Activated`.
    /// Activating the active version again changes nothing.
    pub async fn activate(&self, version: &Version) -> Result<ActivationReport, SyncError> {
        if self.active.is(version) && self.phase() == LifecyclePhase::Active {
            debug!(%version, "Version already active");
            return Ok(ActivationReport {
                version: version.clone(),
                already_active: true,
            });
        }

        let installed = self.state.lock().installed.as_ref() == Some(version);
        if !installed {
            self.install(version).await?;
        }

        self.set_phase(LifecyclePhase::Activating);
        self.active.set(version.clone());
        info!(%version, "Activating version");

        self.delete_obsolete(version).await?;
        if let Err(e) = self.oracle.commit_local_version(version).await {
            self.set_phase(LifecyclePhase::Active);
            return Err(e);
        }

        {
            let mut state = self.state.lock();
            state.installed = None;
            state.phase = LifecyclePhase::Active;
        }

        // No subscribers is fine
        let _ = self.events.send(LifecycleEvent::OfflineReady {
            version: version.clone(),
        });
        let _ = self.events.send(LifecycleEvent::Activated {
            version: version.clone(),
        });
        info!(%version, "Version active");

        Ok(ActivationReport {
            version: version.clone(),
            already_active: false,
        })
    }

    /// Delete every namespace whose version differs from `current`, concurrently
    async fn delete_obsolete(&self, current: &Version) -> Result<usize, SyncError> {
        let obsolete: Vec<NamespaceId> = self
            .store
            .list_namespaces()
            .await?
            .into_iter()
            .filter(|ns| &ns.version != current)
            .collect();

        let results = join_all(obsolete.iter().map(|ns| self.store.delete(ns))).await;
        let mut deleted = 0;
        for (ns, result) in obsolete.iter().zip(results) {
            match result {
                Ok(true) => deleted += 1,
                Ok(false) => {}
                Err(e) => warn!(namespace = %ns, error = %e, "Failed to delete obsolete namespace"),
            }
        }
        if deleted > 0 {
            info!(deleted, "Deleted obsolete namespaces");
        }
        Ok(deleted)
    }

    /// Re-warm the active version's namespaces in place
    pub async fn cache_all(&self) -> Result<InstallReport, SyncError> {
        let version = self
            .active
            .get()
            .ok_or_else(|| SyncError::InvalidState("no active version to cache".to_string()))?;
        for role in CacheRole::ALL {
            self.store.open(role, &version).await?;
        }
        let report = self.precache(&version).await;
        info!(
            %version,
            stored = report.stored,
            skipped = report.skipped.len(),
            "Re-warmed active version"
        );
        Ok(report)
    }

    pub async fn status(&self) -> Result<CacheStatusReport, SyncError> {
        let active_version = self.active.get();
        let mut entries = BTreeMap::new();
        for role in CacheRole::ALL {
            let count = match &active_version {
                Some(version) => {
                    self.store
                        .entry_count(&NamespaceId::new(role, version.clone()))
                        .await?
                }
                None => 0,
            };
            entries.insert(role, count);
        }
        Ok(CacheStatusReport {
            active_version,
            phase: self.phase(),
            entries,
        })
    }

    /// Delete every namespace and forget the committed version. Other
    /// application state is left alone.
    pub async fn clear(&self) -> Result<(), SyncError> {
        self.active.clear();
        {
            let mut state = self.state.lock();
            state.installed = None;
            state.phase = LifecyclePhase::Idle;
        }

        let namespaces = self.store.list_namespaces().await?;
        for result in join_all(namespaces.iter().map(|ns| self.store.delete(ns))).await {
            result?;
        }
        self.state_store.clear_sync_keys().await?;
        info!(deleted = namespaces.len(), "Cleared all caches");
        Ok(())
    }

    /// Remove namespaces that are neither active, installed nor installing
    pub async fn sweep_orphans(&self) -> Result<usize, SyncError> {
        let keep: Vec<Version> = {
            let state = self.state.lock();
            self.active
                .get()
                .into_iter()
                .chain(state.installed.clone())
                .chain(state.installing.clone())
                .collect()
        };

        let orphans: Vec<NamespaceId> = self
            .store
            .list_namespaces()
            .await?
            .into_iter()
            .filter(|ns| !keep.contains(&ns.version))
            .collect();

        let mut removed = 0;
        for ns in &orphans {
            if self.store.delete(ns).await? {
                removed += 1;
            }
        }
        if removed > 0 {
            info!(removed, "Swept orphaned namespaces");
        }
        Ok(removed)
    }
}
