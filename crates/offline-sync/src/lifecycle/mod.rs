//! # Update Lifecycle
//!
//! Install, activation and clean-up of versioned cache namespaces, as run by
//! the background worker.

mod active;
mod controller;
mod events;

pub use active::ActiveVersion;
pub use controller::{
    ActivationReport, CacheStatusReport, InstallReport, LifecyclePhase, SkippedResource,
    UpdateLifecycleController,
};
pub use events::LifecycleEvent;
