//! User-script plugin system.
//!
//! A plugin is operator-supplied source text scoped to a set of sites.
//! Ingestion splits the text at a fixed marker pair into a delivery-time
//! fragment (run against the response body before delivery) and an
//! optional content-execution fragment (injected into the destination
//! content to run there). Evaluation goes through an injected
//! [`ScriptEngine`], keeping the unsafe-evaluation boundary in one
//! pluggable collaborator.
//!
//! # Modules
//!
//! - `schema`: plugin definitions, validation, and source splitting
//! - `engine`: script execution providers (Node.js subprocess, precompiled)
//! - `runner`: injection, delivery execution, and generated middleware
//! - `registry`: store-synchronized plugin set and lifecycle operations

pub mod engine;
pub mod registry;
pub mod runner;
pub mod schema;

pub use engine::{NodeEngine, ScriptEngine, StaticEngine};
pub use registry::{PluginInfo, PluginRegistry};
pub use runner::{middleware_for, Runner, HTML_CONTENT_TYPE};
pub use schema::{Plugin, PluginCode, PluginMeta, CONTENT_BEGIN_MARKER, CONTENT_END_MARKER};
