//! # Fetch Strategy Router
//!
//! Classifies requests into resource classes and serves each class with a
//! fixed strategy: cache-first for the shell and static assets,
//! network-first for module payloads, the version endpoint and audio
//! metadata, network-only for everything else.

mod classify;
mod handler;

pub use classify::{ResourceClass, Strategy, classify_path, select_strategy};
pub use handler::FetchStrategyRouter;
