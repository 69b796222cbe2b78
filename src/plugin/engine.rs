//! Script execution providers.
//!
//! Evaluation of delivery-time plugin code is isolated behind the
//! [`ScriptEngine`] trait so the unsafe-evaluation boundary lives in one
//! pluggable collaborator. Two providers ship with the crate:
//!
//! - [`NodeEngine`] interprets source text in a warm Node.js subprocess,
//!   communicating over stdin/stdout with line-delimited JSON.
//! - [`StaticEngine`] maps exact source text to precompiled native units,
//!   for tests and embedders that do not want an interpreter at all.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tokio::time::{timeout, Duration};
use tracing::{debug, warn};

use crate::error::PluginError;
use crate::pipeline::Headers;

/// Evaluates a delivery-time fragment against a materialized body.
///
/// `Ok(Some(text))` means the fragment returned a replacement body;
/// `Ok(None)` means it returned anything else (no modification). Compile
/// and runtime faults surface as `Err` and are degraded to no-ops by the
/// caller.
#[async_trait]
pub trait ScriptEngine: Send + Sync {
    async fn eval(
        &self,
        source: &str,
        body: &str,
        url: &str,
        headers: &Headers,
    ) -> Result<Option<String>, PluginError>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EvalRequest<'a> {
    source: &'a str,
    body: &'a str,
    url: &'a str,
    headers: HashMap<&'a str, &'a str>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EvalResponse {
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Line-oriented evaluation harness executed with `node -e`. Each request
/// compiles the fragment into a `(body, url, headers)` function and
/// reports either the returned string or the fault.
const NODE_HARNESS: &str = r#"
const readline = require('readline');
const rl = readline.createInterface({ input: process.stdin, terminal: false });
rl.on('line', (line) => {
  let req;
  try { req = JSON.parse(line); } catch (e) {
    process.stdout.write(JSON.stringify({ error: String(e) }) + '\n');
    return;
  }
  try {
    const fn = new Function('body', 'url', 'headers', req.source);
    const out = fn(req.body, req.url, req.headers);
    const reply = typeof out === 'string' ? { body: out } : {};
    process.stdout.write(JSON.stringify(reply) + '\n');
  } catch (e) {
    process.stdout.write(JSON.stringify({ error: String(e) }) + '\n');
  }
});
"#;

/// One running harness process.
struct EngineProcess {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

impl EngineProcess {
    async fn spawn(node_executable: &PathBuf) -> Result<Self, PluginError> {
        let mut cmd = Command::new(node_executable);
        cmd.arg("-e")
            .arg(NODE_HARNESS)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true); // Prevent zombie processes

        let mut child = cmd.spawn().map_err(|e| PluginError::SpawnFailed {
            reason: format!("Failed to spawn script engine: {e}"),
        })?;

        let stdin = child.stdin.take().ok_or_else(|| PluginError::SpawnFailed {
            reason: "stdin is not available".to_string(),
        })?;
        let stdout = child
            .stdout
            .take()
            .map(BufReader::new)
            .ok_or_else(|| PluginError::SpawnFailed {
                reason: "stdout is not available".to_string(),
            })?;

        Ok(Self {
            child,
            stdin,
            stdout,
        })
    }

    fn is_healthy(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    async fn round_trip(&mut self, request: &EvalRequest<'_>) -> Result<EvalResponse, PluginError> {
        let json = serde_json::to_string(request).map_err(|e| PluginError::IoError {
            reason: format!("Failed to serialize eval request: {e}"),
        })?;

        self.stdin
            .write_all(json.as_bytes())
            .await
            .map_err(|e| PluginError::IoError {
                reason: format!("Failed to write to stdin: {e}"),
            })?;
        self.stdin
            .write_all(b"\n")
            .await
            .map_err(|e| PluginError::IoError {
                reason: format!("Failed to write newline to stdin: {e}"),
            })?;
        self.stdin.flush().await.map_err(|e| PluginError::IoError {
            reason: format!("Failed to flush stdin: {e}"),
        })?;

        let mut line = String::new();
        self.stdout
            .read_line(&mut line)
            .await
            .map_err(|e| PluginError::IoError {
                reason: format!("Failed to read from stdout: {e}"),
            })?;

        if line.is_empty() {
            return Err(PluginError::IoError {
                reason: "stdout closed unexpectedly".to_string(),
            });
        }

        serde_json::from_str(line.trim()).map_err(|e| PluginError::InvalidOutput {
            reason: format!("Failed to parse engine reply: {e}"),
        })
    }

    async fn kill(&mut self) {
        let _ = self.child.kill().await;
    }
}

/// Interprets delivery fragments in a pooled Node.js subprocess. The
/// process is spawned lazily, kept warm across evaluations, and replaced
/// when it dies or misses the per-evaluation deadline.
pub struct NodeEngine {
    node_executable: PathBuf,
    timeout_ms: u64,
    process: Mutex<Option<EngineProcess>>,
}

impl NodeEngine {
    pub fn new(node_executable: impl Into<PathBuf>, timeout_ms: u64) -> Self {
        Self {
            node_executable: node_executable.into(),
            timeout_ms,
            process: Mutex::new(None),
        }
    }
}

#[async_trait]
impl ScriptEngine for NodeEngine {
    async fn eval(
        &self,
        source: &str,
        body: &str,
        url: &str,
        headers: &Headers,
    ) -> Result<Option<String>, PluginError> {
        let request = EvalRequest {
            source,
            body,
            url,
            headers: headers.iter().collect(),
        };

        let mut slot = self.process.lock().await;

        let needs_spawn = match slot.as_mut() {
            Some(process) => !process.is_healthy(),
            None => true,
        };
        if needs_spawn {
            debug!("spawning script engine process");
            *slot = Some(EngineProcess::spawn(&self.node_executable).await?);
        }

        let process = slot.as_mut().ok_or_else(|| PluginError::SpawnFailed {
            reason: "engine process unavailable".to_string(),
        })?;

        let reply = match timeout(
            Duration::from_millis(self.timeout_ms),
            process.round_trip(&request),
        )
        .await
        {
            Ok(Ok(reply)) => reply,
            Ok(Err(e)) => {
                process.kill().await;
                *slot = None;
                return Err(e);
            }
            Err(_) => {
                warn!(timeout_ms = self.timeout_ms, "script evaluation timed out");
                process.kill().await;
                *slot = None;
                return Err(PluginError::Timeout {
                    timeout_ms: self.timeout_ms,
                });
            }
        };

        if let Some(reason) = reply.error {
            return Err(PluginError::Script { reason });
        }

        Ok(reply.body)
    }
}

/// A precompiled delivery unit: `(body, url, headers)` in, optional
/// replacement body out, `Err(reason)` for a unit-level fault.
pub type StaticUnit =
    Arc<dyn Fn(&str, &str, &Headers) -> Result<Option<String>, String> + Send + Sync>;

/// Maps exact source text to precompiled native units. Source text that
/// was never registered evaluates to a fault, which the runner degrades
/// to no-modification like any other script fault.
#[derive(Default)]
pub struct StaticEngine {
    units: DashMap<String, StaticUnit>,
}

impl StaticEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&self, source: impl Into<String>, unit: F)
    where
        F: Fn(&str, &str, &Headers) -> Result<Option<String>, String> + Send + Sync + 'static,
    {
        self.units.insert(source.into(), Arc::new(unit));
    }
}

#[async_trait]
impl ScriptEngine for StaticEngine {
    async fn eval(
        &self,
        source: &str,
        body: &str,
        url: &str,
        headers: &Headers,
    ) -> Result<Option<String>, PluginError> {
        let unit = self
            .units
            .get(source)
            .ok_or_else(|| PluginError::Script {
                reason: "no precompiled unit for source".to_string(),
            })?
            .clone();

        (*unit)(body, url, headers).map_err(|reason| PluginError::Script { reason })
    }
}
