//! Request, response, and message contexts passed through the pipeline.

use std::collections::HashMap;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::body::Body;
use bytes::Bytes;

/// Header map with case-insensitive keys.
///
/// Keys are normalized to lowercase on insert and lookup, so handlers can
/// read `Content-Type` however the transport spelled it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Headers {
    map: HashMap<String, String>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl AsRef<str>, value: impl Into<String>) {
        self.map
            .insert(key.as_ref().to_ascii_lowercase(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.map
            .get(&key.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.map.remove(&key.to_ascii_lowercase())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.map.contains_key(&key.to_ascii_lowercase())
    }

    /// True when the header exists and its value contains `needle`,
    /// case-insensitively. Used for the content-type gate.
    pub fn value_contains(&self, key: &str, needle: &str) -> bool {
        self.get(key)
            .map(|v| v.to_ascii_lowercase().contains(&needle.to_ascii_lowercase()))
            .unwrap_or(false)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.map.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut headers = Headers::new();
        for (k, v) in iter {
            headers.insert(k, v);
        }
        headers
    }
}

/// An outbound request as seen by the pipeline. Request handlers mutate it
/// in registration order; later handlers observe earlier mutations.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub url: Url,
    pub method: String,
    pub headers: Headers,
    pub body: Option<Body>,
    /// Cancellation propagates to the underlying transport only; handler
    /// units are not independently cancellable.
    pub cancel: Option<CancellationToken>,
}

impl RequestContext {
    pub fn new(url: Url, method: impl Into<String>) -> Self {
        Self {
            url,
            method: method.into(),
            headers: Headers::new(),
            body: None,
            cancel: None,
        }
    }

    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_body(mut self, body: impl Into<Body>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// An inbound response plus the finalized request it answers.
#[derive(Debug, Clone)]
pub struct ResponseContext {
    pub status: u16,
    pub status_text: String,
    pub headers: Headers,
    pub body: Option<Body>,
    /// The request as it stood after the request stage completed.
    pub request: RequestContext,
}

/// A single message on a bidirectional stream connection.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Text(String),
    Blob(Bytes),
    Buffer(Vec<u8>),
}

/// Which way a stream message is travelling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Outbound,
    Inbound,
}
