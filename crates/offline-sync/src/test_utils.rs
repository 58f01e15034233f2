//! Shared fakes for unit tests.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use crate::agent::ForegroundHost;
use crate::error::SyncError;
use crate::net::{FetchRequest, Network, NetworkResponse};
use crate::version::Version;

#[inline]
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

/// Scriptable network. Routes are matched on the request path only.
#[derive(Default)]
pub struct FakeNetwork {
    routes: Mutex<HashMap<String, NetworkResponse>>,
    offline: AtomicBool,
    delay: Mutex<Option<Duration>>,
    requests: Mutex<Vec<FetchRequest>>,
}

impl FakeNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, path: &str, status: u16, content_type: &str, body: impl Into<Bytes>) {
        self.routes.lock().insert(
            path.to_string(),
            NetworkResponse {
                status,
                content_type: Some(content_type.to_string()),
                body: body.into(),
            },
        );
    }

    pub fn respond_json(&self, path: &str, body: &str) {
        self.respond(path, 200, "application/json", body.to_string());
    }

    pub fn respond_text(&self, path: &str, status: u16, body: &str) {
        self.respond(path, status, "text/plain", body.to_string());
    }

    pub fn respond_version(&self, version: &str) {
        self.respond_json("/api/version", &format!(r#"{{"version":"{version}"}}"#));
    }

    pub fn remove(&self, path: &str) {
        self.routes.lock().remove(path);
    }

    pub fn set_online(&self, online: bool) {
        self.offline.store(!online, Ordering::SeqCst);
    }

    /// Every request sleeps this long before answering
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock() = delay;
    }

    pub fn requests(&self) -> Vec<FetchRequest> {
        self.requests.lock().clone()
    }

    pub fn calls_to(&self, path: &str) -> usize {
        self.requests
            .lock()
            .iter()
            .filter(|r| request_path(&r.url) == path)
            .count()
    }
}

fn request_path(url: &str) -> String {
    let without_origin = match url::Url::parse(url) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => url.to_string(),
    };
    without_origin
        .split(['?', '#'])
        .next()
        .unwrap_or_default()
        .to_string()
}

#[async_trait]
impl Network for FakeNetwork {
    async fn fetch(&self, request: &FetchRequest) -> Result<NetworkResponse, SyncError> {
        self.requests.lock().push(request.clone());
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.offline.load(Ordering::SeqCst) {
            return Err(SyncError::network("connection refused"));
        }
        let route = self.routes.lock().get(&request_path(&request.url)).cloned();
        Ok(route.unwrap_or(NetworkResponse {
            status: 404,
            content_type: Some("text/plain".to_string()),
            body: Bytes::from_static(b"not found"),
        }))
    }
}

/// Host that records every notification and reload
#[derive(Default)]
pub struct RecordingHost {
    pub notifications: Mutex<Vec<(Option<Version>, Version)>>,
    pub reloads: AtomicUsize,
    pub busy: AtomicBool,
}

impl RecordingHost {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn reload_count(&self) -> usize {
        self.reloads.load(Ordering::SeqCst)
    }

    pub fn notification_count(&self) -> usize {
        self.notifications.lock().len()
    }

    pub fn set_busy(&self, busy: bool) {
        self.busy.store(busy, Ordering::SeqCst);
    }
}

impl ForegroundHost for RecordingHost {
    fn notify_update_available(&self, current: Option<&Version>, available: &Version) {
        self.notifications
            .lock()
            .push((current.cloned(), available.clone()));
    }

    fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    fn reload(&self) {
        self.reloads.fetch_add(1, Ordering::SeqCst);
    }
}
