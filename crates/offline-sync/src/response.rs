use bytes::Bytes;
use serde::Serialize;

use crate::cache::CachedResponse;
use crate::net::NetworkResponse;

/// Where a response handed back to the page came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseSource {
    Network,
    Cache,
    /// Synthesized offline substitute
    Fallback,
}

/// Response produced by the router for every request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Bytes,
    pub source: ResponseSource,
}

impl Response {
    pub fn synthesized(status: u16, content_type: &str, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            content_type: Some(content_type.to_string()),
            body: body.into(),
            source: ResponseSource::Fallback,
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.source == ResponseSource::Fallback
    }

    /// Body as UTF-8 text, lossy
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

impl From<NetworkResponse> for Response {
    fn from(response: NetworkResponse) -> Self {
        Self {
            status: response.status,
            content_type: response.content_type,
            body: response.body,
            source: ResponseSource::Network,
        }
    }
}

impl From<CachedResponse> for Response {
    fn from(entry: CachedResponse) -> Self {
        Self {
            status: entry.metadata.status,
            content_type: entry.metadata.content_type,
            body: entry.body,
            source: ResponseSource::Cache,
        }
    }
}
