//! Control-channel RPC for plugin and middleware management.
//!
//! A thin duplex message protocol: every request is tagged with the
//! protocol marker and a version string and carries a caller-chosen
//! correlation id; every request receives exactly one `response` message
//! echoing that id. A mismatched major version produces a warning, never
//! a hard failure.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::body::{materialize, Body};
use crate::error::InterceptError;
use crate::pipeline::{Middleware, Outcome, Pipeline, ResponseContext, ResponseHandler};
use crate::plugin::{PluginRegistry, Runner, ScriptEngine, HTML_CONTENT_TYPE};

/// Protocol marker every request must carry.
pub const PROTOCOL_MARKER: &str = "tamper-proxy";
/// Version spoken by this side; only the major component is compared.
pub const PROTOCOL_VERSION: &str = "1.0";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlRequest {
    pub protocol: String,
    pub version: String,
    /// Caller-chosen correlation id, echoed on the response.
    pub id: String,
    #[serde(flatten)]
    pub op: ControlOp,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum ControlOp {
    AddPlugin {
        name: String,
        sites: Vec<String>,
        source: String,
    },
    RemovePlugin {
        name: String,
    },
    ListPlugins,
    // Middleware ops address units by `middlewareId`; the bare `id` field
    // of the envelope is the correlation id.
    #[serde(rename_all = "camelCase")]
    AddMiddleware {
        middleware_id: String,
        source: String,
    },
    #[serde(rename_all = "camelCase")]
    RemoveMiddleware {
        middleware_id: String,
    },
    #[serde(rename_all = "camelCase")]
    SetMiddlewareEnabled {
        middleware_id: String,
        enabled: bool,
    },
    ListMiddleware,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlResponse {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub id: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ControlResponse {
    fn ok(id: String, data: Option<serde_json::Value>) -> Self {
        Self {
            kind: "response",
            id,
            ok: true,
            data,
            error: None,
        }
    }

    fn err(id: String, error: impl Into<String>) -> Self {
        Self {
            kind: "response",
            id,
            ok: false,
            data: None,
            error: Some(error.into()),
        }
    }
}

/// Dispatches control requests onto the registry and pipeline.
pub struct ControlChannel {
    registry: Arc<PluginRegistry>,
    pipeline: Arc<Pipeline>,
    runner: Arc<Runner>,
}

impl ControlChannel {
    pub fn new(
        registry: Arc<PluginRegistry>,
        pipeline: Arc<Pipeline>,
        runner: Arc<Runner>,
    ) -> Self {
        Self {
            registry,
            pipeline,
            runner,
        }
    }

    /// Handles one raw request and produces its single response.
    pub async fn handle(&self, raw: &str) -> ControlResponse {
        // Pull the correlation id out first so even a malformed request
        // gets a response it can be matched to.
        let id = serde_json::from_str::<serde_json::Value>(raw)
            .ok()
            .and_then(|v| v.get("id").and_then(|id| id.as_str().map(String::from)))
            .unwrap_or_default();

        let request: ControlRequest = match serde_json::from_str(raw) {
            Ok(request) => request,
            Err(e) => return ControlResponse::err(id, format!("malformed request: {e}")),
        };

        if request.protocol != PROTOCOL_MARKER {
            warn!(
                reported = %request.protocol,
                expected = PROTOCOL_MARKER,
                "control request carries a foreign protocol marker"
            );
        }
        if major(&request.version) != major(PROTOCOL_VERSION) {
            warn!(
                reported = %request.version,
                spoken = PROTOCOL_VERSION,
                "control protocol major version mismatch, proceeding anyway"
            );
        }

        self.dispatch(request.id, request.op).await
    }

    async fn dispatch(&self, id: String, op: ControlOp) -> ControlResponse {
        match op {
            ControlOp::AddPlugin {
                name,
                sites,
                source,
            } => match self.registry.add_plugin(&name, sites, source).await {
                Ok(()) => {
                    ControlResponse::ok(id, Some(serde_json::json!({ "added": name })))
                }
                Err(e) => ControlResponse::err(id, e.to_string()),
            },

            ControlOp::RemovePlugin { name } => match self.registry.remove_plugin(&name).await {
                Ok(removed) => {
                    ControlResponse::ok(id, Some(serde_json::json!({ "removed": removed })))
                }
                Err(e) => ControlResponse::err(id, e.to_string()),
            },

            ControlOp::ListPlugins => match self.registry.list().await {
                Ok(plugins) => match serde_json::to_value(plugins) {
                    Ok(data) => ControlResponse::ok(id, Some(data)),
                    Err(e) => ControlResponse::err(id, e.to_string()),
                },
                Err(e) => ControlResponse::err(id, e.to_string()),
            },

            ControlOp::AddMiddleware {
                middleware_id,
                source,
            } => {
                debug!(unit = %middleware_id, "registering script middleware");
                self.pipeline.add(script_middleware(
                    &middleware_id,
                    source,
                    self.runner.engine(),
                ));
                ControlResponse::ok(id, Some(serde_json::json!({ "added": middleware_id })))
            }

            ControlOp::RemoveMiddleware { middleware_id } => {
                let removed = self.pipeline.remove(&middleware_id);
                ControlResponse::ok(id, Some(serde_json::json!({ "removed": removed })))
            }

            ControlOp::SetMiddlewareEnabled {
                middleware_id,
                enabled,
            } => {
                if self.pipeline.set_enabled(&middleware_id, enabled) {
                    ControlResponse::ok(id, None)
                } else {
                    ControlResponse::err(id, format!("middleware '{middleware_id}' not found"))
                }
            }

            ControlOp::ListMiddleware => match serde_json::to_value(self.pipeline.list()) {
                Ok(data) => ControlResponse::ok(id, Some(data)),
                Err(e) => ControlResponse::err(id, e.to_string()),
            },
        }
    }

    /// Serves a duplex pair until the request side closes.
    pub async fn serve(
        &self,
        mut rx: mpsc::UnboundedReceiver<String>,
        tx: mpsc::UnboundedSender<String>,
    ) {
        while let Some(raw) = rx.recv().await {
            let response = self.handle(&raw).await;
            let json = match serde_json::to_string(&response) {
                Ok(json) => json,
                Err(e) => format!(
                    "{{\"type\":\"response\",\"id\":\"\",\"ok\":false,\"error\":\"{e}\"}}"
                ),
            };
            if tx.send(json).is_err() {
                break;
            }
        }
        debug!("control channel closed");
    }
}

fn major(version: &str) -> &str {
    version.split('.').next().unwrap_or(version)
}

/// A hand-registered unit carrying a delivery-style script: HTML-gated
/// body rewrite without site scoping.
fn script_middleware(id: &str, source: String, engine: Arc<dyn ScriptEngine>) -> Middleware {
    Middleware::new(id).on_response(Arc::new(ScriptMiddlewareHandler {
        id: id.to_string(),
        source,
        engine,
    }))
}

struct ScriptMiddlewareHandler {
    id: String,
    source: String,
    engine: Arc<dyn ScriptEngine>,
}

#[async_trait]
impl ResponseHandler for ScriptMiddlewareHandler {
    async fn handle(
        &self,
        mut ctx: ResponseContext,
    ) -> std::result::Result<Outcome<ResponseContext>, InterceptError> {
        if !ctx.headers.value_contains("content-type", HTML_CONTENT_TYPE) {
            return Ok(Outcome::Next(ctx));
        }
        let Some(text) = materialize(ctx.body.as_ref()).await? else {
            return Ok(Outcome::Next(ctx));
        };

        let url = ctx.request.url.clone();
        match self
            .engine
            .eval(&self.source, &text, url.as_str(), &ctx.headers)
            .await
        {
            Ok(Some(new_body)) => {
                ctx.headers
                    .insert("content-length", new_body.len().to_string());
                ctx.body = Some(Body::Text(new_body));
                Ok(Outcome::Next(ctx))
            }
            Ok(None) => Ok(Outcome::Next(ctx)),
            Err(e) => Err(InterceptError::Handler {
                id: self.id.clone(),
                reason: e.to_string(),
            }),
        }
    }
}
