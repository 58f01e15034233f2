use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use offline_sync::{
    AgentExit, AgentHandle, BackgroundWorker, CacheRole, ControlRequest, ControlResponse,
    FetchRequest, FileCacheStore, FileStateStore, ForegroundSyncAgent, HttpNetwork,
    HttpVersionOracle, LifecycleEvent, Network, NetworkResponse, StateStore, SyncConfig,
    SyncError, Trigger, Version, VersionOracle, WorkerHandle, WorkerLink,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cli::{Args, OutputFormat};
use crate::config::AppConfig;
use crate::error::{AppError, Result};
use crate::host::ConsoleHost;
use crate::output::{self, CheckReport};

const CACHE_DIR: &str = "cache";
const STATE_FILE: &str = "state.json";

/// Network that is never reachable, for `fetch --offline`
struct Disconnected;

#[async_trait]
impl Network for Disconnected {
    async fn fetch(
        &self,
        request: &FetchRequest,
    ) -> std::result::Result<NetworkResponse, SyncError> {
        Err(SyncError::network(format!("offline: {}", request.url)))
    }
}

/// A spawned background worker and the oracle it was built with
struct RunningWorker {
    handle: WorkerHandle,
    join: JoinHandle<()>,
    oracle: Arc<dyn VersionOracle>,
}

impl RunningWorker {
    async fn stop(self) -> Result<()> {
        self.handle.shutdown();
        self.join.await?;
        Ok(())
    }
}

pub struct CommandExecutor {
    config: Arc<SyncConfig>,
    data_dir: PathBuf,
    request_timeout: Duration,
    format: OutputFormat,
}

impl CommandExecutor {
    pub fn new(app: &AppConfig, args: &Args) -> Result<Self> {
        let config = app.to_sync_config(args.origin.as_deref())?;
        let data_dir = app.resolve_data_dir(args.data_dir.as_deref());
        info!(origin = %config.origin, data_dir = ?data_dir, "Using configuration");

        Ok(Self {
            config: Arc::new(config),
            data_dir,
            request_timeout: Duration::from_secs(args.timeout.max(1)),
            format: args.output,
        })
    }

    fn state_store(&self) -> Arc<dyn StateStore> {
        Arc::new(FileStateStore::new(self.data_dir.join(STATE_FILE)))
    }

    fn network(&self, offline: bool) -> Result<Arc<dyn Network>> {
        if offline {
            debug!("Network disabled");
            return Ok(Arc::new(Disconnected));
        }
        Ok(Arc::new(HttpNetwork::new(&self.config)?))
    }

    fn start_worker(
        &self,
        network: Arc<dyn Network>,
        state: Arc<dyn StateStore>,
    ) -> RunningWorker {
        let store = Arc::new(FileCacheStore::new(
            self.data_dir.join(CACHE_DIR),
            self.config.cache.max_total_bytes,
        ));
        let worker = BackgroundWorker::new(self.config.clone(), store, network, state);
        let oracle = worker.oracle();
        let (handle, join) = worker.spawn();
        RunningWorker {
            handle,
            join,
            oracle,
        }
    }

    async fn request(
        &self,
        worker: &WorkerHandle,
        request: ControlRequest,
    ) -> Result<ControlResponse> {
        Ok(worker.request(request, self.request_timeout).await?)
    }

    /// Compare the deployed version with the committed one
    pub async fn check(&self) -> Result<()> {
        let oracle = HttpVersionOracle::new(
            self.config.clone(),
            self.network(false)?,
            self.state_store(),
        );
        let local = oracle.read_local_version().await?;
        let remote = oracle.fetch_remote_version().await?;

        let report = CheckReport {
            update_available: remote.is_update_for(local.as_ref()),
            offline: remote.offline,
            remote: remote.version,
            local,
        };
        output::print_check(&report, self.format)
    }

    /// Activate `version` (or the deployed one), or re-warm the active version
    pub async fn warm(&self, version: Option<String>, refresh: bool) -> Result<()> {
        let worker = self.start_worker(self.network(false)?, self.state_store());
        let mut events = worker.handle.subscribe();
        let result = self.warm_with(&worker, version, refresh).await;
        worker.stop().await?;

        if result.is_ok() && self.format == OutputFormat::Pretty {
            while let Ok(event) = events.try_recv() {
                output::print_event(&event);
            }
        }
        result
    }

    async fn warm_with(
        &self,
        worker: &RunningWorker,
        version: Option<String>,
        refresh: bool,
    ) -> Result<()> {
        if refresh {
            return match self.request(&worker.handle, ControlRequest::CacheAll).await? {
                ControlResponse::CacheAll(report) => output::print_install(&report, self.format),
                other => Err(unexpected(&other)),
            };
        }

        let version = match version {
            Some(version) => Version::new(version),
            None => {
                let remote = worker.oracle.fetch_remote_version().await?;
                if remote.offline {
                    return Err(AppError::InvalidInput(
                        "origin did not report a deployed version".to_string(),
                    ));
                }
                remote.version
            }
        };
        if !version.is_well_formed() {
            warn!(version = %version, "Activating a version with unusual characters");
        }

        info!(version = %version, "Warming version");
        match self
            .request(&worker.handle, ControlRequest::ActivateVersion { version })
            .await?
        {
            ControlResponse::Activated(report) => output::print_activation(&report, self.format),
            other => Err(unexpected(&other)),
        }
    }

    pub async fn status(&self, role: Option<CacheRole>) -> Result<()> {
        let worker = self.start_worker(self.network(true)?, self.state_store());
        let response = self.request(&worker.handle, ControlRequest::GetCacheStatus).await;
        worker.stop().await?;

        match response? {
            ControlResponse::CacheStatus(report) => {
                output::print_status(&report, role, self.format)
            }
            other => Err(unexpected(&other)),
        }
    }

    pub async fn clear(&self) -> Result<()> {
        let worker = self.start_worker(self.network(true)?, self.state_store());
        let response = self.request(&worker.handle, ControlRequest::ClearCache).await;
        worker.stop().await?;

        match response? {
            ControlResponse::Cleared => {
                if self.format == OutputFormat::Pretty {
                    println!("Cache cleared");
                }
                Ok(())
            }
            other => Err(unexpected(&other)),
        }
    }

    /// Serve one request through the router, as the page would see it
    pub async fn fetch(&self, path: &str, offline: bool, with_body: bool) -> Result<()> {
        if !path.starts_with('/') {
            return Err(AppError::InvalidInput(format!(
                "path must start with '/': {path}"
            )));
        }

        let worker = self.start_worker(self.network(offline)?, self.state_store());
        let response = worker.handle.fetch(&FetchRequest::get(path)).await;
        worker.stop().await?;

        debug!(path, status = response.status, source = ?response.source, "Fetched");
        output::print_fetch(&response, with_body, self.format)
    }

    /// Run the agent next to a worker until Ctrl-C or `quit`. A reload starts a
    /// fresh agent, the way a reloaded page would.
    pub async fn watch(&self, auto_accept: bool) -> Result<()> {
        let state = self.state_store();
        let worker = self.start_worker(self.network(false)?, state.clone());
        let mut events = worker.handle.subscribe();
        let (notice_tx, mut notice_rx) = mpsc::unbounded_channel();
        let host = Arc::new(ConsoleHost::new(notice_tx));
        let link: Arc<dyn WorkerLink> = Arc::new(worker.handle.clone());

        let mut stdin = BufReader::new(tokio::io::stdin()).lines();
        let mut stdin_open = true;
        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);

        println!(
            "Watching {} (commands: accept, dismiss, check, busy, idle, quit)",
            self.config.origin
        );

        'sessions: loop {
            let (agent, mut agent_join) = ForegroundSyncAgent::new(
                self.config.clone(),
                worker.oracle.clone(),
                link.clone(),
                host.clone(),
                state.clone(),
            )
            .spawn();
            agent.trigger(Trigger::Online).await?;

            loop {
                tokio::select! {
                    _ = &mut ctrl_c => {
                        info!("Interrupted, unloading");
                        if let Err(e) = agent.unload().await {
                            debug!(error = %e, "Agent already stopped");
                        }
                        agent_join.await?;
                        break 'sessions;
                    }

                    exit = &mut agent_join => {
                        match exit? {
                            AgentExit::Reloaded { version, degraded } => {
                                if degraded {
                                    println!("Reloaded onto {version} before the worker confirmed");
                                } else {
                                    println!("Reloaded onto {version}");
                                }
                                continue 'sessions;
                            }
                            AgentExit::Unloaded => break 'sessions,
                        }
                    }

                    Some(available) = notice_rx.recv() => {
                        if auto_accept {
                            info!(version = %available, "Accepting update");
                            if let Err(e) = agent.accept().await {
                                warn!(error = %e, "Failed to accept update");
                            }
                        } else {
                            println!("Type 'accept' to update now or 'dismiss' to stay on this version");
                        }
                    }

                    line = stdin.next_line(), if stdin_open => {
                        match line {
                            Ok(Some(line)) => {
                                if !self.handle_input(&agent, &host, line.trim()).await {
                                    if let Err(e) = agent.unload().await {
                                        debug!(error = %e, "Agent already stopped");
                                    }
                                }
                            }
                            Ok(None) => stdin_open = false,
                            Err(e) => {
                                warn!(error = %e, "Failed to read stdin");
                                stdin_open = false;
                            }
                        }
                    }

                    event = events.recv() => {
                        match event {
                            Ok(event) => print_lifecycle(&event),
                            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                                warn!(skipped, "Missed lifecycle events");
                            }
                            Err(broadcast::error::RecvError::Closed) => break 'sessions,
                        }
                    }
                }
            }
        }

        worker.stop().await
    }

    /// Returns false when the user asked to quit
    async fn handle_input(&self, agent: &AgentHandle, host: &ConsoleHost, input: &str) -> bool {
        let sent = match input {
            "" => Ok(()),
            "accept" | "a" => agent.accept().await,
            "dismiss" | "d" => agent.dismiss().await,
            "check" | "c" => agent.trigger(Trigger::Focus).await,
            "busy" => {
                host.set_busy(true);
                Ok(())
            }
            "idle" => {
                host.set_busy(false);
                Ok(())
            }
            "quit" | "q" => return false,
            other => {
                println!("Unknown command '{other}'");
                Ok(())
            }
        };
        if let Err(e) = sent {
            warn!(error = %e, "Agent did not take the command");
        }
        true
    }
}

fn print_lifecycle(event: &LifecycleEvent) {
    debug!(version = %event.version(), "Lifecycle event");
    output::print_event(event);
}

fn unexpected(response: &ControlResponse) -> AppError {
    AppError::UnexpectedResponse(format!("{response:?}"))
}
