//! The underlying-transport interface and the interception facade.
//!
//! The crate never performs network I/O itself: a [`Transport`]
//! implementation supplied by the embedding proxy does, and
//! [`facade::TransportFacade`] wraps it so every request, response, and
//! stream message passes through the pipeline.

pub mod facade;

pub use facade::TransportFacade;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use url::Url;

use crate::body::Body;
use crate::error::Result;
use crate::pipeline::{Headers, Payload, RequestContext};

/// Identity reported by a transport through `meta()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportMeta {
    pub name: String,
    pub version: String,
}

/// What a transport returns for one request. The facade attaches the
/// finalized request context before the response stage runs.
#[derive(Debug)]
pub struct TransportResponse {
    pub status: u16,
    pub status_text: String,
    pub headers: Headers,
    pub body: Option<Body>,
}

/// Callbacks delivered for a bidirectional stream connection.
pub struct ConnectionEvents {
    pub on_open: Option<Box<dyn Fn() + Send + Sync>>,
    pub on_message: Box<dyn Fn(Payload) + Send + Sync>,
    pub on_close: Option<Box<dyn Fn(u16, String) + Send + Sync>>,
    pub on_error: Option<Box<dyn Fn(String) + Send + Sync>>,
}

impl ConnectionEvents {
    pub fn new(on_message: impl Fn(Payload) + Send + Sync + 'static) -> Self {
        Self {
            on_open: None,
            on_message: Box::new(on_message),
            on_close: None,
            on_error: None,
        }
    }

    pub fn on_open(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_open = Some(Box::new(f));
        self
    }

    pub fn on_close(mut self, f: impl Fn(u16, String) + Send + Sync + 'static) -> Self {
        self.on_close = Some(Box::new(f));
        self
    }

    pub fn on_error(mut self, f: impl Fn(String) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Box::new(f));
        self
    }
}

/// The external collaborator that actually moves bytes.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn init(&self) -> Result<()>;

    fn meta(&self) -> TransportMeta;

    /// Performs one request/response exchange. Failures from here are
    /// never retried or rewritten by the pipeline layer.
    async fn request(&self, ctx: RequestContext) -> Result<TransportResponse>;

    /// Opens a bidirectional stream connection.
    async fn connect(
        &self,
        target: Url,
        protocols: Vec<String>,
        headers: Headers,
        events: ConnectionEvents,
    ) -> Result<Arc<dyn Connection>>;
}

/// A live bidirectional stream connection.
#[async_trait]
pub trait Connection: Send + Sync + 'static {
    async fn send(&self, payload: Payload) -> Result<()>;
    async fn close(&self) -> Result<()>;
    fn is_closed(&self) -> bool;
}
