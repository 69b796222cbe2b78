//! The object handed to the proxy multiplexer in place of the raw
//! transport. Requests run through the request stage before forwarding,
//! responses through the response stage before returning, and every
//! stream message through the message stage before delivery in either
//! direction.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, Instrument};
use url::Url;
use uuid::Uuid;

use crate::config::{Config, StoreConfig};
use crate::error::Result;
use crate::pipeline::{Direction, Headers, Payload, Pipeline, RequestContext, ResponseContext};
use crate::plugin::{NodeEngine, PluginRegistry, Runner, ScriptEngine};
use crate::store::{KvStore, MemoryStore, SqliteStore};
use crate::transport::{Connection, ConnectionEvents, Transport, TransportMeta};

pub struct TransportFacade {
    inner: Arc<dyn Transport>,
    pipeline: Arc<Pipeline>,
    registry: Arc<PluginRegistry>,
}

impl TransportFacade {
    pub fn new(
        inner: Arc<dyn Transport>,
        pipeline: Arc<Pipeline>,
        registry: Arc<PluginRegistry>,
    ) -> Self {
        Self {
            inner,
            pipeline,
            registry,
        }
    }

    /// Wires up a facade from configuration: engine, store, runner,
    /// pipeline, and registry.
    pub fn from_config(config: &Config, transport: Arc<dyn Transport>) -> Result<Self> {
        let pipeline = Arc::new(Pipeline::new());

        let engine: Arc<dyn ScriptEngine> = Arc::new(NodeEngine::new(
            &config.engine.node_executable,
            config.engine.eval_timeout_ms,
        ));
        let runner = Arc::new(Runner::new(engine));

        let store: Arc<dyn KvStore> = match &config.store {
            StoreConfig::Memory => Arc::new(MemoryStore::new()),
            StoreConfig::Sqlite { path } => Arc::new(SqliteStore::open(path)?),
        };

        let registry = Arc::new(
            PluginRegistry::new(store, pipeline.clone(), runner)
                .with_max_source_bytes(config.pipeline.max_source_bytes),
        );

        Ok(Self::new(transport, pipeline, registry))
    }

    pub fn pipeline(&self) -> Arc<Pipeline> {
        self.pipeline.clone()
    }

    pub fn registry(&self) -> Arc<PluginRegistry> {
        self.registry.clone()
    }

    /// Initializes the underlying transport, then loads the plugin
    /// registry from the store.
    pub async fn init(&self) -> Result<()> {
        self.inner.init().await?;
        self.registry.load().await;
        Ok(())
    }

    /// Rebuilds the registry from persisted state. In-flight requests
    /// finish on the handler snapshot they started with.
    pub async fn reload(&self) -> usize {
        self.registry.load().await
    }

    pub fn meta(&self) -> TransportMeta {
        self.inner.meta()
    }

    /// One request lifecycle: request stage, forward, response stage.
    /// A fault from the underlying transport propagates unchanged.
    pub async fn request(&self, ctx: RequestContext) -> Result<ResponseContext> {
        let span = tracing::info_span!(
            "proxy_request",
            request_id = %Uuid::new_v4(),
            method = %ctx.method,
            url = %ctx.url,
        );

        async {
            let ctx = self.pipeline.process_request(ctx).await;
            let finalized = ctx.clone();

            debug!("forwarding to underlying transport");
            let outcome = self.inner.request(ctx).await?;

            let response = ResponseContext {
                status: outcome.status,
                status_text: outcome.status_text,
                headers: outcome.headers,
                body: outcome.body,
                request: finalized,
            };

            let response = self.pipeline.process_response(response).await;
            debug!(status = response.status, "response delivered");
            Ok(response)
        }
        .instrument(span)
        .await
    }

    /// Opens a stream connection with the message stage interposed on
    /// both directions. Inbound events funnel through a single pump task
    /// so per-connection ordering survives the async message stage.
    pub async fn connect(
        &self,
        target: Url,
        protocols: Vec<String>,
        headers: Headers,
        events: ConnectionEvents,
    ) -> Result<Arc<dyn Connection>> {
        let ConnectionEvents {
            on_open,
            on_message,
            on_close,
            on_error,
        } = events;

        let (tx, mut rx) = mpsc::unbounded_channel::<InboundEvent>();

        let pipeline = self.pipeline.clone();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match event {
                    InboundEvent::Message(payload) => {
                        let payload = pipeline.process_message(payload, Direction::Inbound).await;
                        (on_message)(payload);
                    }
                    InboundEvent::Error(reason) => {
                        if let Some(cb) = &on_error {
                            cb(reason);
                        }
                    }
                    InboundEvent::Close(code, reason) => {
                        if let Some(cb) = &on_close {
                            cb(code, reason);
                        }
                        break;
                    }
                }
            }
        });

        let msg_tx = tx.clone();
        let err_tx = tx.clone();
        let inner_events = ConnectionEvents {
            on_open,
            on_message: Box::new(move |payload| {
                let _ = msg_tx.send(InboundEvent::Message(payload));
            }),
            on_close: Some(Box::new(move |code, reason| {
                let _ = tx.send(InboundEvent::Close(code, reason));
            })),
            on_error: Some(Box::new(move |reason| {
                let _ = err_tx.send(InboundEvent::Error(reason));
            })),
        };

        let conn = self
            .inner
            .connect(target, protocols, headers, inner_events)
            .await?;

        Ok(Arc::new(FacadeConnection {
            inner: conn,
            pipeline: self.pipeline.clone(),
        }))
    }
}

enum InboundEvent {
    Message(Payload),
    Close(u16, String),
    Error(String),
}

struct FacadeConnection {
    inner: Arc<dyn Connection>,
    pipeline: Arc<Pipeline>,
}

#[async_trait]
impl Connection for FacadeConnection {
    async fn send(&self, payload: Payload) -> Result<()> {
        let payload = self
            .pipeline
            .process_message(payload, Direction::Outbound)
            .await;
        self.inner.send(payload).await
    }

    async fn close(&self) -> Result<()> {
        self.inner.close().await
    }

    fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}
