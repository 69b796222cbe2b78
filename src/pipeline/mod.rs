//! Interception pipeline: an ordered chain of middleware units invoked
//! for three traffic shapes (request, response, stream message).
//!
//! Units run strictly in registration order within a stage. The handler
//! list is an immutable snapshot behind [`arc_swap::ArcSwap`]; a traversal
//! loads the snapshot once at stage entry, so registry mutation or reload
//! never affects a request already in flight.
//!
//! Error policy: a failing unit is logged with its id and the stage
//! continues with the value as it stood immediately before that unit ran.
//! One misbehaving unit never blocks or corrupts traffic for the rest of
//! the chain.

pub mod context;
pub mod middleware;

pub use context::{Direction, Headers, Payload, RequestContext, ResponseContext};
pub use middleware::{
    message_fn, request_fn, response_fn, Enabled, MessageHandler, Middleware, MiddlewareInfo,
    Outcome, RequestHandler, ResponseHandler,
};

use arc_swap::ArcSwap;
use std::sync::Arc;
use tracing::{debug, error};

/// The ordered middleware chain shared by the facade and the registry.
pub struct Pipeline {
    units: ArcSwap<Vec<Middleware>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self {
            units: ArcSwap::from_pointee(Vec::new()),
        }
    }

    /// Appends a unit. A unit with the same id is replaced in place,
    /// keeping its original position in the chain.
    pub fn add(&self, mw: Middleware) {
        self.units.rcu(|units| {
            let mut next: Vec<Middleware> = (**units).clone();
            match next.iter_mut().find(|u| u.id == mw.id) {
                Some(slot) => *slot = mw.clone(),
                None => next.push(mw.clone()),
            }
            next
        });
    }

    /// Removes a unit by id. Returns true when something was removed.
    pub fn remove(&self, id: &str) -> bool {
        let mut removed = false;
        self.units.rcu(|units| {
            let next: Vec<Middleware> =
                units.iter().filter(|u| u.id != id).cloned().collect();
            removed = next.len() != units.len();
            next
        });
        removed
    }

    /// Flips a unit's enabled flag. Returns false for unknown ids.
    pub fn set_enabled(&self, id: &str, enabled: bool) -> bool {
        let mut found = false;
        self.units.rcu(|units| {
            let mut next: Vec<Middleware> = (**units).clone();
            if let Some(unit) = next.iter_mut().find(|u| u.id == id) {
                unit.enabled = Enabled::Flag(enabled);
                found = true;
            }
            next
        });
        found
    }

    pub fn list(&self) -> Vec<MiddlewareInfo> {
        self.units.load().iter().map(MiddlewareInfo::from).collect()
    }

    pub fn len(&self) -> usize {
        self.units.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.load().is_empty()
    }

    fn snapshot(&self) -> Arc<Vec<Middleware>> {
        self.units.load_full()
    }

    /// Runs the request stage. Short-circuiting stops later units only;
    /// the returned context is always forwarded by the caller.
    pub async fn process_request(&self, mut ctx: RequestContext) -> RequestContext {
        let units = self.snapshot();

        for unit in units.iter() {
            if !unit.is_enabled() {
                continue;
            }
            let Some(handler) = &unit.on_request else {
                continue;
            };

            let prior = ctx.clone();
            match handler.handle(ctx).await {
                Ok(Outcome::Next(next)) => ctx = next,
                Ok(Outcome::Done(done)) => {
                    debug!(unit = %unit.id, "request stage short-circuited");
                    return done;
                }
                Err(e) => {
                    error!(unit = %unit.id, error = %e, "request handler failed");
                    ctx = prior;
                }
            }
        }

        ctx
    }

    /// Runs the response stage with the same ordering, short-circuit, and
    /// fault-isolation rules as the request stage.
    pub async fn process_response(&self, mut ctx: ResponseContext) -> ResponseContext {
        let units = self.snapshot();

        for unit in units.iter() {
            if !unit.is_enabled() {
                continue;
            }
            let Some(handler) = &unit.on_response else {
                continue;
            };

            let prior = ctx.clone();
            match handler.handle(ctx).await {
                Ok(Outcome::Next(next)) => ctx = next,
                Ok(Outcome::Done(done)) => {
                    debug!(unit = %unit.id, "response stage short-circuited");
                    return done;
                }
                Err(e) => {
                    error!(unit = %unit.id, error = %e, "response handler failed");
                    ctx = prior;
                }
            }
        }

        ctx
    }

    /// Runs the message stage for one payload travelling `direction`.
    pub async fn process_message(&self, mut payload: Payload, direction: Direction) -> Payload {
        let units = self.snapshot();

        for unit in units.iter() {
            if !unit.is_enabled() {
                continue;
            }
            let Some(handler) = &unit.on_message else {
                continue;
            };

            let prior = payload.clone();
            match handler.handle(payload, direction).await {
                Ok(next) => payload = next,
                Err(e) => {
                    error!(unit = %unit.id, error = %e, "message handler failed");
                    payload = prior;
                }
            }
        }

        payload
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::InterceptError;
    use url::Url;

    fn request() -> RequestContext {
        RequestContext::new(Url::parse("https://example.com/").unwrap(), "GET")
    }

    #[tokio::test]
    async fn test_units_run_in_registration_order() {
        let pipeline = Pipeline::new();

        pipeline.add(Middleware::new("a").on_request(request_fn(|mut ctx| {
            ctx.headers.insert("x-trace", "a");
            Ok(Outcome::Next(ctx))
        })));
        pipeline.add(Middleware::new("b").on_request(request_fn(|mut ctx| {
            let trace = ctx.headers.get("x-trace").unwrap_or("").to_string();
            ctx.headers.insert("x-trace", format!("{trace}b"));
            Ok(Outcome::Next(ctx))
        })));

        let ctx = pipeline.process_request(request()).await;
        assert_eq!(ctx.headers.get("x-trace"), Some("ab"));
    }

    #[tokio::test]
    async fn test_later_unit_observes_earlier_mutation() {
        let pipeline = Pipeline::new();

        pipeline.add(Middleware::new("a").on_request(request_fn(|mut ctx| {
            ctx.headers.insert("x-mark", "set-by-a");
            Ok(Outcome::Next(ctx))
        })));
        pipeline.add(Middleware::new("b").on_request(request_fn(|mut ctx| {
            let seen = ctx.headers.get("x-mark") == Some("set-by-a");
            ctx.headers.insert("x-b-saw-a", seen.to_string());
            Ok(Outcome::Next(ctx))
        })));

        let ctx = pipeline.process_request(request()).await;
        assert_eq!(ctx.headers.get("x-b-saw-a"), Some("true"));
    }

    #[tokio::test]
    async fn test_short_circuit_skips_later_units() {
        let pipeline = Pipeline::new();

        pipeline.add(Middleware::new("halt").on_request(request_fn(|mut ctx| {
            ctx.headers.insert("x-halted", "yes");
            Ok(Outcome::Done(ctx))
        })));
        pipeline.add(Middleware::new("never").on_request(request_fn(|mut ctx| {
            ctx.headers.insert("x-never", "ran");
            Ok(Outcome::Next(ctx))
        })));

        let ctx = pipeline.process_request(request()).await;
        assert_eq!(ctx.headers.get("x-halted"), Some("yes"));
        assert!(!ctx.headers.contains("x-never"));
    }

    #[tokio::test]
    async fn test_failing_unit_is_isolated() {
        let pipeline = Pipeline::new();

        pipeline.add(Middleware::new("bad").on_request(request_fn(|mut ctx| {
            // Mutations before the failure must not leak through.
            ctx.headers.insert("x-partial", "leak");
            Err(InterceptError::Handler {
                id: "bad".into(),
                reason: "boom".into(),
            })
        })));
        pipeline.add(Middleware::new("after").on_request(request_fn(|mut ctx| {
            ctx.headers.insert("x-after", "ran");
            Ok(Outcome::Next(ctx))
        })));

        let ctx = pipeline.process_request(request()).await;
        assert!(!ctx.headers.contains("x-partial"));
        assert_eq!(ctx.headers.get("x-after"), Some("ran"));
    }

    #[tokio::test]
    async fn test_disabled_unit_is_skipped_entirely() {
        let pipeline = Pipeline::new();

        pipeline.add(
            Middleware::new("off")
                .enabled(Enabled::Flag(false))
                .on_request(request_fn(|mut ctx| {
                    ctx.headers.insert("x-off", "ran");
                    Ok(Outcome::Next(ctx))
                })),
        );

        let ctx = pipeline.process_request(request()).await;
        assert!(!ctx.headers.contains("x-off"));
    }

    #[tokio::test]
    async fn test_set_enabled_toggles_unit() {
        let pipeline = Pipeline::new();
        pipeline.add(Middleware::new("toggle").on_message(message_fn(|payload, _| {
            match payload {
                Payload::Text(t) => Ok(Payload::Text(format!("{t}!"))),
                other => Ok(other),
            }
        })));

        let out = pipeline
            .process_message(Payload::Text("hi".into()), Direction::Inbound)
            .await;
        assert_eq!(out, Payload::Text("hi!".into()));

        assert!(pipeline.set_enabled("toggle", false));
        let out = pipeline
            .process_message(Payload::Text("hi".into()), Direction::Inbound)
            .await;
        assert_eq!(out, Payload::Text("hi".into()));

        assert!(!pipeline.set_enabled("missing", true));
    }

    #[tokio::test]
    async fn test_unrecognized_payload_shape_passes_through() {
        let pipeline = Pipeline::new();
        pipeline.add(Middleware::new("text-only").on_message(message_fn(|payload, _| {
            match payload {
                Payload::Text(t) => Ok(Payload::Text(t.to_uppercase())),
                other => Ok(other),
            }
        })));

        let blob = Payload::Blob(bytes::Bytes::from_static(b"\x00\x01"));
        let out = pipeline.process_message(blob.clone(), Direction::Outbound).await;
        assert_eq!(out, blob);
    }

    #[tokio::test]
    async fn test_add_with_same_id_replaces_in_place() {
        let pipeline = Pipeline::new();
        pipeline.add(Middleware::new("first").on_message(message_fn(|p, _| Ok(p))));
        pipeline.add(Middleware::new("dup").on_message(message_fn(|p, _| Ok(p))));
        pipeline.add(Middleware::new("dup").on_message(message_fn(|p, _| Ok(p))));

        let infos = pipeline.list();
        assert_eq!(infos.len(), 2);
        assert_eq!(infos[1].id, "dup");
    }

    #[tokio::test]
    async fn test_remove() {
        let pipeline = Pipeline::new();
        pipeline.add(Middleware::new("gone").on_message(message_fn(|p, _| Ok(p))));

        assert!(pipeline.remove("gone"));
        assert!(!pipeline.remove("gone"));
        assert!(pipeline.is_empty());
    }
}
