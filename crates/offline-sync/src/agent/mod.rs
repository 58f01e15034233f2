//! # Foreground Sync Agent
//!
//! Runs next to the page. Decides when to check for a new deploy, tells the
//! user about it and moves the page onto it without cutting off whatever the
//! user is doing.
//!
//! ```text
//! Idle ──mismatch──▶ Notified ──grace──▶ AwaitingConfirmation ──idle host──▶ Applying ──▶ reload
//!   ▲                  │  └──────────────accept────────────────────────────────▲
//!   └────dismiss───────┘
//! ```

mod host;
mod session;
mod sync_agent;

pub use host::ForegroundHost;
pub use session::{AgentCommand, AgentExit, ReconciliationState, Trigger, UpdateSession};
pub use sync_agent::{AgentHandle, ForegroundSyncAgent};
