use serde::Serialize;

use crate::version::Version;

/// Broadcast once per successful activation, in this order
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LifecycleEvent {
    /// Every core-shell resource of `version` is cached
    OfflineReady { version: Version },
    /// `version` now serves every request
    Activated { version: Version },
}

impl LifecycleEvent {
    pub fn version(&self) -> &Version {
        match self {
            LifecycleEvent::OfflineReady { version } | LifecycleEvent::Activated { version } => {
                version
            }
        }
    }
}
