//! Middleware units and their handler capabilities.

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

use crate::error::InterceptError;
use crate::pipeline::context::{Direction, Payload, RequestContext, ResponseContext};

/// Whether a unit takes part in a given invocation. A `Dynamic` predicate
/// is evaluated fresh for every invocation.
#[derive(Clone)]
pub enum Enabled {
    Flag(bool),
    Dynamic(Arc<dyn Fn() -> bool + Send + Sync>),
}

impl Enabled {
    pub fn is_enabled(&self) -> bool {
        match self {
            Enabled::Flag(flag) => *flag,
            Enabled::Dynamic(predicate) => (**predicate)(),
        }
    }
}

impl fmt::Debug for Enabled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Enabled::Flag(flag) => f.debug_tuple("Flag").field(flag).finish(),
            Enabled::Dynamic(_) => f.write_str("Dynamic(..)"),
        }
    }
}

/// What a handler wants done with the value it was given.
#[derive(Debug)]
pub enum Outcome<T> {
    /// Pass the (possibly rewritten) value on to the next unit.
    Next(T),
    /// Deliver the value as-is and skip the remaining units for this
    /// stage. Short-circuiting is a capability, not an error.
    Done(T),
}

#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn handle(
        &self,
        ctx: RequestContext,
    ) -> std::result::Result<Outcome<RequestContext>, InterceptError>;
}

#[async_trait]
pub trait ResponseHandler: Send + Sync {
    async fn handle(
        &self,
        ctx: ResponseContext,
    ) -> std::result::Result<Outcome<ResponseContext>, InterceptError>;
}

#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Returns the (possibly unmodified) payload. Implementations are
    /// expected to special-case the shapes they understand and pass the
    /// rest through unchanged.
    async fn handle(
        &self,
        payload: Payload,
        direction: Direction,
    ) -> std::result::Result<Payload, InterceptError>;
}

/// A pipeline unit: an id, an enabled switch, and any subset of the three
/// stage capabilities. Units generated from plugins use the plugin name as
/// id and are regenerated wholesale on registry reload.
#[derive(Clone)]
pub struct Middleware {
    pub id: String,
    pub(crate) enabled: Enabled,
    pub(crate) on_request: Option<Arc<dyn RequestHandler>>,
    pub(crate) on_response: Option<Arc<dyn ResponseHandler>>,
    pub(crate) on_message: Option<Arc<dyn MessageHandler>>,
}

impl Middleware {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            enabled: Enabled::Flag(true),
            on_request: None,
            on_response: None,
            on_message: None,
        }
    }

    pub fn enabled(mut self, enabled: Enabled) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn on_request(mut self, handler: Arc<dyn RequestHandler>) -> Self {
        self.on_request = Some(handler);
        self
    }

    pub fn on_response(mut self, handler: Arc<dyn ResponseHandler>) -> Self {
        self.on_response = Some(handler);
        self
    }

    pub fn on_message(mut self, handler: Arc<dyn MessageHandler>) -> Self {
        self.on_message = Some(handler);
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.is_enabled()
    }
}

impl fmt::Debug for Middleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Middleware")
            .field("id", &self.id)
            .field("enabled", &self.enabled)
            .field("on_request", &self.on_request.is_some())
            .field("on_response", &self.on_response.is_some())
            .field("on_message", &self.on_message.is_some())
            .finish()
    }
}

/// Summary row for listing registered units.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MiddlewareInfo {
    pub id: String,
    pub enabled: bool,
    pub on_request: bool,
    pub on_response: bool,
    pub on_message: bool,
}

impl From<&Middleware> for MiddlewareInfo {
    fn from(mw: &Middleware) -> Self {
        Self {
            id: mw.id.clone(),
            enabled: mw.is_enabled(),
            on_request: mw.on_request.is_some(),
            on_response: mw.on_response.is_some(),
            on_message: mw.on_message.is_some(),
        }
    }
}

// Closure adapters so callers can register plain functions without
// declaring a handler struct.

struct RequestFn<F>(F);

#[async_trait]
impl<F> RequestHandler for RequestFn<F>
where
    F: Fn(RequestContext) -> std::result::Result<Outcome<RequestContext>, InterceptError>
        + Send
        + Sync,
{
    async fn handle(
        &self,
        ctx: RequestContext,
    ) -> std::result::Result<Outcome<RequestContext>, InterceptError> {
        (self.0)(ctx)
    }
}

struct ResponseFn<F>(F);

#[async_trait]
impl<F> ResponseHandler for ResponseFn<F>
where
    F: Fn(ResponseContext) -> std::result::Result<Outcome<ResponseContext>, InterceptError>
        + Send
        + Sync,
{
    async fn handle(
        &self,
        ctx: ResponseContext,
    ) -> std::result::Result<Outcome<ResponseContext>, InterceptError> {
        (self.0)(ctx)
    }
}

struct MessageFn<F>(F);

#[async_trait]
impl<F> MessageHandler for MessageFn<F>
where
    F: Fn(Payload, Direction) -> std::result::Result<Payload, InterceptError> + Send + Sync,
{
    async fn handle(
        &self,
        payload: Payload,
        direction: Direction,
    ) -> std::result::Result<Payload, InterceptError> {
        (self.0)(payload, direction)
    }
}

pub fn request_fn<F>(f: F) -> Arc<dyn RequestHandler>
where
    F: Fn(RequestContext) -> std::result::Result<Outcome<RequestContext>, InterceptError>
        + Send
        + Sync
        + 'static,
{
    Arc::new(RequestFn(f))
}

pub fn response_fn<F>(f: F) -> Arc<dyn ResponseHandler>
where
    F: Fn(ResponseContext) -> std::result::Result<Outcome<ResponseContext>, InterceptError>
        + Send
        + Sync
        + 'static,
{
    Arc::new(ResponseFn(f))
}

pub fn message_fn<F>(f: F) -> Arc<dyn MessageHandler>
where
    F: Fn(Payload, Direction) -> std::result::Result<Payload, InterceptError>
        + Send
        + Sync
        + 'static,
{
    Arc::new(MessageFn(f))
}
