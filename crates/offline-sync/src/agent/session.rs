use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::version::Version;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconciliationState {
    Idle,
    /// The host has been told an update is available
    Notified,
    /// Grace period over, waiting for the host to be idle
    AwaitingConfirmation,
    /// Activation requested, reload follows
    Applying,
}

/// Agent-owned view of the update process for the lifetime of a page
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpdateSession {
    pub last_checked_at: Option<DateTime<Utc>>,
    pub last_known_remote_version: Option<Version>,
    pub state: ReconciliationState,
}

impl Default for UpdateSession {
    fn default() -> Self {
        Self {
            last_checked_at: None,
            last_known_remote_version: None,
            state: ReconciliationState::Idle,
        }
    }
}

/// Events that ask for a version check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Periodic,
    Online,
    Focus,
    Visibility,
}

/// Input to a running agent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentCommand {
    Trigger(Trigger),
    /// The user accepted the update notification
    Accept,
    Dismiss,
    /// The page is going away
    Unload,
}

/// How an agent run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentExit {
    /// The host was reloaded onto `version`. `degraded` means the worker never
    /// acknowledged the activation.
    Reloaded { version: Version, degraded: bool },
    Unloaded,
}
