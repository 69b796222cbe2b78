//! Shared fixtures: a scriptable mock transport and facade wiring.
#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tamper_proxy::body::Body;
use tamper_proxy::error::Result;
use tamper_proxy::pipeline::{Headers, Payload, Pipeline, RequestContext};
use tamper_proxy::plugin::{PluginRegistry, Runner, StaticEngine};
use tamper_proxy::store::{KvStore, MemoryStore};
use tamper_proxy::transport::{
    Connection, ConnectionEvents, Transport, TransportFacade, TransportMeta, TransportResponse,
};
use url::Url;

type Responder = Box<dyn Fn(&RequestContext) -> TransportResponse + Send + Sync>;

/// Transport double: answers requests from a closure and records what the
/// facade forwarded.
pub struct MockTransport {
    responder: Responder,
    pub requests: Mutex<Vec<RequestContext>>,
    pub sent: Arc<Mutex<Vec<Payload>>>,
    pub events: Mutex<Option<ConnectionEvents>>,
}

impl MockTransport {
    pub fn new(
        responder: impl Fn(&RequestContext) -> TransportResponse + Send + Sync + 'static,
    ) -> Self {
        Self {
            responder: Box::new(responder),
            requests: Mutex::new(Vec::new()),
            sent: Arc::new(Mutex::new(Vec::new())),
            events: Mutex::new(None),
        }
    }

    /// Serves the same response for every request.
    pub fn html(body: &str) -> Self {
        let body = body.to_string();
        Self::new(move |_| html_response(Body::Text(body.clone())))
    }

    /// Fires an inbound message as the underlying connection would.
    pub fn push_inbound(&self, payload: Payload) {
        let events = self.events.lock().unwrap();
        if let Some(events) = events.as_ref() {
            (events.on_message)(payload);
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn init(&self) -> Result<()> {
        Ok(())
    }

    fn meta(&self) -> TransportMeta {
        TransportMeta {
            name: "mock".to_string(),
            version: "0.0".to_string(),
        }
    }

    async fn request(&self, ctx: RequestContext) -> Result<TransportResponse> {
        let response = (self.responder)(&ctx);
        self.requests.lock().unwrap().push(ctx);
        Ok(response)
    }

    async fn connect(
        &self,
        _target: Url,
        _protocols: Vec<String>,
        _headers: Headers,
        events: ConnectionEvents,
    ) -> Result<Arc<dyn Connection>> {
        *self.events.lock().unwrap() = Some(events);
        Ok(Arc::new(MockConnection {
            sent: self.sent.clone(),
        }))
    }
}

struct MockConnection {
    sent: Arc<Mutex<Vec<Payload>>>,
}

#[async_trait]
impl Connection for MockConnection {
    async fn send(&self, payload: Payload) -> Result<()> {
        self.sent.lock().unwrap().push(payload);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }

    fn is_closed(&self) -> bool {
        false
    }
}

pub fn html_response(body: Body) -> TransportResponse {
    let mut headers = Headers::new();
    headers.insert("Content-Type", "text/html; charset=utf-8");
    TransportResponse {
        status: 200,
        status_text: "OK".to_string(),
        headers,
        body: Some(body),
    }
}

pub fn response_with_type(content_type: &str, body: Body) -> TransportResponse {
    let mut headers = Headers::new();
    headers.insert("Content-Type", content_type);
    TransportResponse {
        status: 200,
        status_text: "OK".to_string(),
        headers,
        body: Some(body),
    }
}

pub struct Fixture {
    pub facade: TransportFacade,
    pub registry: Arc<PluginRegistry>,
    pub pipeline: Arc<Pipeline>,
    pub transport: Arc<MockTransport>,
    pub engine: Arc<StaticEngine>,
}

/// Wires a facade over `transport` with a fresh pipeline, a static
/// engine, and the given store.
pub fn fixture_with_store(transport: MockTransport, store: Arc<dyn KvStore>) -> Fixture {
    let pipeline = Arc::new(Pipeline::new());
    let engine = Arc::new(StaticEngine::new());
    let runner = Arc::new(Runner::new(engine.clone()));
    let registry = Arc::new(PluginRegistry::new(store, pipeline.clone(), runner));
    let transport = Arc::new(transport);

    Fixture {
        facade: TransportFacade::new(transport.clone(), pipeline.clone(), registry.clone()),
        registry,
        pipeline,
        transport,
        engine,
    }
}

pub fn fixture(transport: MockTransport) -> Fixture {
    fixture_with_store(transport, Arc::new(MemoryStore::new()))
}

pub fn get(url: &str) -> RequestContext {
    RequestContext::new(Url::parse(url).unwrap(), "GET")
}
