use std::sync::Arc;

use parking_lot::RwLock;

use crate::version::Version;

/// Shared pointer to the version whose namespaces serve requests.
///
/// The controller is the only writer; the router and synthesizer read it on
/// every request.
#[derive(Debug, Clone, Default)]
pub struct ActiveVersion {
    inner: Arc<RwLock<Option<Version>>>,
}

impl ActiveVersion {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<Version> {
        self.inner.read().clone()
    }

    pub fn is(&self, version: &Version) -> bool {
        self.inner.read().as_ref() == Some(version)
    }

    pub(crate) fn set(&self, version: Version) {
        *self.inner.write() = Some(version);
    }

    pub(crate) fn clear(&self) {
        *self.inner.write() = None;
    }
}
