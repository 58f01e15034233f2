//! # Background Worker
//!
//! The long-lived task that owns the cache. It serves fetches concurrently
//! through the router and runs lifecycle operations one at a time as they
//! arrive on the control channel.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval};
use tracing::{debug, info, warn};

use crate::SyncConfig;
use crate::cache::CacheStore;
use crate::error::SyncError;
use crate::fallback::OfflineFallbackSynthesizer;
use crate::lifecycle::{ActiveVersion, LifecycleEvent, UpdateLifecycleController};
use crate::net::{FetchRequest, Network};
use crate::protocol::{ControlEnvelope, ControlReply, ControlRequest, ControlResponse, WorkerLink};
use crate::response::Response;
use crate::router::FetchStrategyRouter;
use crate::state::StateStore;
use crate::version::{HttpVersionOracle, VersionOracle};

const CONTROL_CHANNEL_CAPACITY: usize = 32;

/// Assembles the worker's components and runs its control loop
pub struct BackgroundWorker {
    config: Arc<SyncConfig>,
    controller: Arc<UpdateLifecycleController>,
    router: Arc<FetchStrategyRouter>,
    oracle: Arc<dyn VersionOracle>,
}

impl BackgroundWorker {
    pub fn new(
        config: Arc<SyncConfig>,
        store: Arc<dyn CacheStore>,
        network: Arc<dyn Network>,
        state_store: Arc<dyn StateStore>,
    ) -> Self {
        let oracle: Arc<dyn VersionOracle> = Arc::new(HttpVersionOracle::new(
            config.clone(),
            network.clone(),
            state_store.clone(),
        ));
        Self::with_oracle(config, store, network, state_store, oracle)
    }

    pub fn with_oracle(
        config: Arc<SyncConfig>,
        store: Arc<dyn CacheStore>,
        network: Arc<dyn Network>,
        state_store: Arc<dyn StateStore>,
        oracle: Arc<dyn VersionOracle>,
    ) -> Self {
        let active = ActiveVersion::new();
        let fallback =
            OfflineFallbackSynthesizer::new(store.clone(), oracle.clone(), active.clone());
        let router = Arc::new(FetchStrategyRouter::new(
            config.clone(),
            store.clone(),
            network.clone(),
            active.clone(),
            fallback,
        ));
        let controller = Arc::new(UpdateLifecycleController::new(
            config.clone(),
            store,
            network,
            oracle.clone(),
            state_store,
            active,
        ));
        Self {
            config,
            controller,
            router,
            oracle,
        }
    }

    pub fn oracle(&self) -> Arc<dyn VersionOracle> {
        self.oracle.clone()
    }

    /// Spawn the control loop. The returned handle is the only way in.
    pub fn spawn(self) -> (WorkerHandle, JoinHandle<()>) {
        let (control_tx, control_rx) = mpsc::channel(CONTROL_CHANNEL_CAPACITY);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let (restored_tx, restored_rx) = watch::channel(false);

        let handle = WorkerHandle {
            control_tx,
            next_id: Arc::new(AtomicU64::new(1)),
            restored: restored_rx,
            router: self.router.clone(),
            controller: self.controller.clone(),
            shutdown_tx,
        };

        let maintenance = self.config.lifecycle.maintenance_interval;
        let controller = self.controller;
        let join = tokio::spawn(async move {
            run_control_loop(controller, control_rx, shutdown_rx, restored_tx, maintenance).await;
        });
        (handle, join)
    }
}

fn maintenance_timer(period: Option<Duration>) -> Option<Interval> {
    period
        .filter(|p| !p.is_zero())
        .map(|p| tokio::time::interval_at(Instant::now() + p, p))
}

async fn next_tick(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn run_control_loop(
    controller: Arc<UpdateLifecycleController>,
    mut control_rx: mpsc::Receiver<ControlEnvelope>,
    mut shutdown_rx: broadcast::Receiver<()>,
    restored: watch::Sender<bool>,
    maintenance: Option<Duration>,
) {
    if let Err(e) = controller.restore().await {
        warn!(error = %e, "Failed to restore active version");
    }
    restored.send_replace(true);

    let mut maintenance = maintenance_timer(maintenance);
    info!("Background worker started");

    loop {
        tokio::select! {
            biased;

            _ = shutdown_rx.recv() => {
                debug!("Shutdown signal received");
                break;
            }

            envelope = control_rx.recv() => {
                let Some(envelope) = envelope else {
                    debug!("Control channel closed");
                    break;
                };
                let ControlEnvelope { id, request, reply } = envelope;
                debug!(id, request = request.name(), "Control request received");
                let result = dispatch(&controller, request).await;
                if reply.send(ControlReply { id, result }).is_err() {
                    debug!(id, "Requester gone before the reply was sent");
                }
            }

            _ = next_tick(&mut maintenance) => {
                if let Err(e) = controller.sweep_orphans().await {
                    warn!(error = %e, "Cache maintenance failed");
                }
            }
        }
    }
    info!("Background worker stopped");
}

async fn dispatch(
    controller: &UpdateLifecycleController,
    request: ControlRequest,
) -> Result<ControlResponse, SyncError> {
    match request {
        ControlRequest::CacheAll => controller.cache_all().await.map(ControlResponse::CacheAll),
        ControlRequest::ActivateVersion { version } => controller
            .activate(&version)
            .await
            .map(ControlResponse::Activated),
        ControlRequest::GetCacheStatus => {
            controller.status().await.map(ControlResponse::CacheStatus)
        }
        ControlRequest::ClearCache => controller.clear().await.map(|_| ControlResponse::Cleared),
    }
}

/// Cloneable handle to a running worker
#[derive(Clone)]
pub struct WorkerHandle {
    control_tx: mpsc::Sender<ControlEnvelope>,
    next_id: Arc<AtomicU64>,
    /// Flips to true once the committed version has been restored
    restored: watch::Receiver<bool>,
    router: Arc<FetchStrategyRouter>,
    controller: Arc<UpdateLifecycleController>,
    shutdown_tx: broadcast::Sender<()>,
}

impl WorkerHandle {
    /// Serve a page request. Runs concurrently with every other fetch and
    /// with the control loop, but not before the worker has restored the
    /// committed version.
    pub async fn fetch(&self, request: &FetchRequest) -> Response {
        let mut restored = self.restored.clone();
        if restored.wait_for(|done| *done).await.is_err() {
            debug!("Worker stopped before restoring, serving without an active version");
        }
        self.router.handle(request).await
    }

    pub fn router(&self) -> &FetchStrategyRouter {
        &self.router
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.controller.subscribe()
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

#[async_trait]
impl WorkerLink for WorkerHandle {
    async fn request(
        &self,
        request: ControlRequest,
        timeout: Duration,
    ) -> Result<ControlResponse, SyncError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (reply_tx, reply_rx) = oneshot::channel();
        let activating = match &request {
            ControlRequest::ActivateVersion { version } => Some(version.to_string()),
            _ => None,
        };
        let name = request.name();

        let exchange = async {
            self.control_tx
                .send(ControlEnvelope {
                    id,
                    request,
                    reply: reply_tx,
                })
                .await
                .map_err(|_| SyncError::ChannelClosed)?;
            reply_rx.await.map_err(|_| SyncError::ChannelClosed)
        };

        let reply = match tokio::time::timeout(timeout, exchange).await {
            Ok(reply) => reply?,
            Err(_) => {
                return Err(match activating {
                    Some(version) => SyncError::ActivationTimeout { version, timeout },
                    None => SyncError::Timeout(format!("{name} after {timeout:?}")),
                });
            }
        };

        if reply.id != id {
            return Err(SyncError::InvalidState(format!(
                "reply {} does not match request {id}",
                reply.id
            )));
        }
        reply.result
    }
}
