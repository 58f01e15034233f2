use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info, warn};

use crate::SyncConfig;
use crate::agent::host::ForegroundHost;
use crate::agent::session::{
    AgentCommand, AgentExit, ReconciliationState, Trigger, UpdateSession,
};
use crate::error::SyncError;
use crate::protocol::{ControlRequest, ControlResponse, WorkerLink};
use crate::state::{ReconciliationOutcome, StateStore, keys};
use crate::version::{RemoteVersion, Version, VersionOracle};

const COMMAND_CHANNEL_CAPACITY: usize = 32;

type CheckFuture = BoxFuture<'static, Result<RemoteVersion, SyncError>>;

/// Handle used by the page to feed a running agent
#[derive(Clone)]
pub struct AgentHandle {
    commands: mpsc::Sender<AgentCommand>,
    session: watch::Receiver<UpdateSession>,
}

impl AgentHandle {
    pub async fn send(&self, command: AgentCommand) -> Result<(), SyncError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| SyncError::ChannelClosed)
    }

    pub async fn trigger(&self, trigger: Trigger) -> Result<(), SyncError> {
        self.send(AgentCommand::Trigger(trigger)).await
    }

    pub async fn accept(&self) -> Result<(), SyncError> {
        self.send(AgentCommand::Accept).await
    }

    pub async fn dismiss(&self) -> Result<(), SyncError> {
        self.send(AgentCommand::Dismiss).await
    }

    pub async fn unload(&self) -> Result<(), SyncError> {
        self.send(AgentCommand::Unload).await
    }

    /// Current snapshot of the session
    pub fn session(&self) -> UpdateSession {
        self.session.borrow().clone()
    }

    pub fn watch_session(&self) -> watch::Receiver<UpdateSession> {
        self.session.clone()
    }
}

/// Timers and bookkeeping of one agent run
struct RunState {
    session: UpdateSession,
    /// Version the host was notified about
    pending: Option<Version>,
    /// Versions the user dismissed during this session
    dismissed: HashSet<Version>,
    check_due: Option<Instant>,
    in_flight: Option<CheckFuture>,
    next_poll: Option<Instant>,
    poll_delay: Duration,
    grace_deadline: Option<Instant>,
    busy_recheck: Option<Instant>,
}

/// Page-side half of the update protocol.
///
/// Polls the version oracle on a schedule and on host events, notifies the
/// host about a new version and moves it onto that version once the user
/// agrees or the grace period runs out while nothing is in progress.
pub struct ForegroundSyncAgent {
    config: Arc<SyncConfig>,
    oracle: Arc<dyn VersionOracle>,
    link: Arc<dyn WorkerLink>,
    host: Arc<dyn ForegroundHost>,
    state_store: Arc<dyn StateStore>,
}

impl ForegroundSyncAgent {
    pub fn new(
        config: Arc<SyncConfig>,
        oracle: Arc<dyn VersionOracle>,
        link: Arc<dyn WorkerLink>,
        host: Arc<dyn ForegroundHost>,
        state_store: Arc<dyn StateStore>,
    ) -> Self {
        Self {
            config,
            oracle,
            link,
            host,
            state_store,
        }
    }

    pub fn spawn(self) -> (AgentHandle, JoinHandle<AgentExit>) {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (session_tx, session_rx) = watch::channel(UpdateSession::default());
        let join = tokio::spawn(self.run(command_rx, session_tx));
        (
            AgentHandle {
                commands: command_tx,
                session: session_rx,
            },
            join,
        )
    }

    async fn run(
        self,
        mut commands: mpsc::Receiver<AgentCommand>,
        session_tx: watch::Sender<UpdateSession>,
    ) -> AgentExit {
        let mut rs = RunState {
            session: UpdateSession::default(),
            pending: None,
            dismissed: HashSet::new(),
            check_due: None,
            in_flight: None,
            next_poll: Some(Instant::now() + self.config.agent.poll_interval),
            poll_delay: self.config.agent.poll_interval,
            grace_deadline: None,
            busy_recheck: None,
        };
        debug!("Foreground sync agent started");

        loop {
            let mut apply = None;

            tokio::select! {
                command = commands.recv() => match command {
                    None | Some(AgentCommand::Unload) => {
                        info!(state = ?rs.session.state, "Page unloaded, agent stopping");
                        return AgentExit::Unloaded;
                    }
                    Some(AgentCommand::Trigger(trigger)) => self.request_check(&mut rs, trigger),
                    Some(AgentCommand::Accept) => {
                        if matches!(
                            rs.session.state,
                            ReconciliationState::Notified | ReconciliationState::AwaitingConfirmation
                        ) {
                            apply = rs.pending.clone();
                        } else {
                            debug!(state = ?rs.session.state, "Accept ignored");
                        }
                    }
                    Some(AgentCommand::Dismiss) => self.dismiss(&mut rs).await,
                },

                _ = sleep_until_opt(rs.check_due) => {
                    rs.check_due = None;
                    self.start_check(&mut rs);
                }

                result = poll_check(&mut rs.in_flight), if rs.in_flight.is_some() => {
                    rs.in_flight = None;
                    self.on_check_result(&mut rs, result).await;
                }

                _ = sleep_until_opt(rs.next_poll) => {
                    rs.next_poll = None;
                    self.request_check(&mut rs, Trigger::Periodic);
                }

                _ = sleep_until_opt(rs.grace_deadline) => {
                    rs.grace_deadline = None;
                    if rs.session.state == ReconciliationState::Notified {
                        rs.session.state = ReconciliationState::AwaitingConfirmation;
                        debug!("Grace period over, waiting for the host to be idle");
                        apply = self.apply_when_idle(&mut rs);
                    }
                }

                _ = sleep_until_opt(rs.busy_recheck) => {
                    rs.busy_recheck = None;
                    if rs.session.state == ReconciliationState::AwaitingConfirmation {
                        apply = self.apply_when_idle(&mut rs);
                    }
                }
            }

            publish(&session_tx, &rs.session);

            if let Some(version) = apply {
                if let Some(exit) = self
                    .apply(version, &mut rs, &mut commands, &session_tx)
                    .await
                {
                    return exit;
                }
                publish(&session_tx, &rs.session);
            }
        }
    }

    /// Funnel a trigger into the single debounced check
    fn request_check(&self, rs: &mut RunState, trigger: Trigger) {
        if rs.in_flight.is_some() || rs.check_due.is_some() {
            debug!(?trigger, "Version check already pending, trigger coalesced");
            return;
        }
        debug!(?trigger, "Version check scheduled");
        rs.check_due = Some(Instant::now() + self.config.agent.debounce_window);
    }

    fn start_check(&self, rs: &mut RunState) {
        if rs.in_flight.is_some() {
            return;
        }
        let oracle = self.oracle.clone();
        rs.in_flight = Some(Box::pin(async move { oracle.fetch_remote_version().await }));
    }

    async fn on_check_result(&self, rs: &mut RunState, result: Result<RemoteVersion, SyncError>) {
        let agent_config = &self.config.agent;
        match result {
            Ok(remote) => {
                let now = chrono::Utc::now();
                rs.session.last_checked_at = Some(now);
                rs.session.last_known_remote_version = Some(remote.version.clone());
                rs.poll_delay = agent_config.poll_interval;
                if let Err(e) = self
                    .state_store
                    .set(keys::LAST_CHECKED_AT, now.to_rfc3339())
                    .await
                {
                    warn!(error = %e, "Failed to persist last check time");
                }

                match rs.session.state {
                    ReconciliationState::Idle => self.maybe_notify(rs, &remote).await,
                    ReconciliationState::Notified | ReconciliationState::AwaitingConfirmation => {
                        self.refresh_pending(rs, &remote).await
                    }
                    ReconciliationState::Applying => {}
                }
            }
            Err(e) => {
                rs.poll_delay = (rs.poll_delay * 2).min(agent_config.max_poll_backoff);
                warn!(
                    error = %e,
                    next_poll = ?rs.poll_delay,
                    "Version check failed, assuming no update"
                );
            }
        }
        rs.next_poll = Some(Instant::now() + rs.poll_delay);
    }

    async fn maybe_notify(&self, rs: &mut RunState, remote: &RemoteVersion) {
        let local = match self.oracle.read_local_version().await {
            Ok(local) => local,
            Err(e) => {
                warn!(error = %e, "Failed to read local version");
                return;
            }
        };

        if !remote.is_update_for(local.as_ref()) {
            debug!(remote = %remote.version, "No update available");
            return;
        }
        if rs.dismissed.contains(&remote.version) {
            debug!(remote = %remote.version, "Update was dismissed this session");
            return;
        }

        info!(
            local = ?local.as_ref().map(Version::as_str),
            remote = %remote.version,
            "Update available"
        );
        self.host
            .notify_update_available(local.as_ref(), &remote.version);
        rs.pending = Some(remote.version.clone());
        rs.session.state = ReconciliationState::Notified;
        rs.grace_deadline = Some(Instant::now() + self.config.agent.grace_period);
    }

    /// Follow a deploy that landed after the host was notified, so the
    /// version applied is the one the origin serves now.
    async fn refresh_pending(&self, rs: &mut RunState, remote: &RemoteVersion) {
        if remote.offline || rs.pending.as_ref() == Some(&remote.version) {
            return;
        }
        let local = match self.oracle.read_local_version().await {
            Ok(local) => local,
            Err(e) => {
                warn!(error = %e, "Failed to read local version");
                return;
            }
        };

        if !remote.is_update_for(local.as_ref()) || rs.dismissed.contains(&remote.version) {
            info!(
                pending = ?rs.pending.as_ref().map(Version::as_str),
                remote = %remote.version,
                "Pending update withdrawn by the origin"
            );
            rs.pending = None;
            rs.session.state = ReconciliationState::Idle;
            rs.grace_deadline = None;
            rs.busy_recheck = None;
            return;
        }

        info!(
            pending = ?rs.pending.as_ref().map(Version::as_str),
            remote = %remote.version,
            "Newer update replaces the pending one"
        );
        self.host
            .notify_update_available(local.as_ref(), &remote.version);
        rs.pending = Some(remote.version.clone());
    }

    async fn dismiss(&self, rs: &mut RunState) {
        if !matches!(
            rs.session.state,
            ReconciliationState::Notified | ReconciliationState::AwaitingConfirmation
        ) {
            debug!(state = ?rs.session.state, "Dismiss ignored");
            return;
        }
        if let Some(version) = rs.pending.take() {
            info!(%version, "Update dismissed");
            rs.dismissed.insert(version);
        }
        rs.session.state = ReconciliationState::Idle;
        rs.grace_deadline = None;
        rs.busy_recheck = None;
        self.record_outcome(ReconciliationOutcome::Dismissed).await;
    }

    /// Apply now when the host is idle, otherwise re-check later
    fn apply_when_idle(&self, rs: &mut RunState) -> Option<Version> {
        if self.host.is_busy() {
            debug!("Host busy, postponing update");
            rs.busy_recheck = Some(Instant::now() + self.config.agent.busy_recheck_interval);
            None
        } else {
            rs.pending.clone()
        }
    }

    /// Ask the worker to activate `version`, then reload.
    ///
    /// Returns `None` when the worker rejected the activation and the agent
    /// keeps running on the current version.
    async fn apply(
        &self,
        version: Version,
        rs: &mut RunState,
        commands: &mut mpsc::Receiver<AgentCommand>,
        session_tx: &watch::Sender<UpdateSession>,
    ) -> Option<AgentExit> {
        rs.session.state = ReconciliationState::Applying;
        rs.grace_deadline = None;
        rs.busy_recheck = None;
        publish(session_tx, &rs.session);
        info!(%version, "Applying update");

        let timeout = self.config.agent.activation_ack_timeout;
        let activation = self.link.request(
            ControlRequest::ActivateVersion {
                version: version.clone(),
            },
            timeout,
        );
        tokio::pin!(activation);

        let result = loop {
            tokio::select! {
                result = &mut activation => break result,
                command = commands.recv() => match command {
                    None | Some(AgentCommand::Unload) => {
                        info!(%version, "Page unloaded while applying, no further action");
                        return Some(AgentExit::Unloaded);
                    }
                    Some(other) => debug!(command = ?other, "Ignored while applying"),
                }
            }
        };

        let degraded = match result {
            Ok(ControlResponse::Activated(report)) => {
                debug!(version = %report.version, already_active = report.already_active, "Activation acknowledged");
                false
            }
            Ok(other) => {
                warn!(response = ?other, "Unexpected reply to activation, reloading anyway");
                true
            }
            Err(
                e @ (SyncError::ActivationTimeout { .. }
                | SyncError::Timeout(_)
                | SyncError::ChannelClosed),
            ) => {
                warn!(error = %e, "No activation acknowledgement, reloading anyway");
                true
            }
            Err(e) => {
                warn!(%version, error = %e, "Activation failed, staying on current version");
                rs.pending = None;
                rs.session.state = ReconciliationState::Idle;
                return None;
            }
        };

        let outcome = if degraded {
            ReconciliationOutcome::AppliedAfterTimeout
        } else {
            ReconciliationOutcome::Applied
        };
        self.record_outcome(outcome).await;

        self.host.reload();
        info!(%version, degraded, "Host reloaded onto new version");
        Some(AgentExit::Reloaded { version, degraded })
    }

    async fn record_outcome(&self, outcome: ReconciliationOutcome) {
        if let Err(e) = self
            .state_store
            .set(keys::LAST_RECONCILIATION_OUTCOME, outcome.as_str().to_string())
            .await
        {
            warn!(error = %e, "Failed to persist reconciliation outcome");
        }
    }
}

fn publish(session_tx: &watch::Sender<UpdateSession>, session: &UpdateSession) {
    session_tx.send_if_modified(|current| {
        if current == session {
            false
        } else {
            *current = session.clone();
            true
        }
    });
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn poll_check(in_flight: &mut Option<CheckFuture>) -> Result<RemoteVersion, SyncError> {
    match in_flight {
        Some(check) => check.await,
        None => std::future::pending().await,
    }
}
