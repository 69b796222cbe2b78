use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Plugin error: {0}")]
    Plugin(#[from] PluginError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Intercept error: {0}")]
    Intercept(#[from] InterceptError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Missing required field: {0}")]
    MissingField(String),
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    #[error("Transport closed")]
    Closed,

    #[error("Invalid message format")]
    InvalidFormat,
}

/// Plugin-specific errors
#[derive(Error, Debug)]
pub enum PluginError {
    /// Plugin declared no site scope at all
    #[error("Plugin '{name}' has an empty site scope")]
    EmptyScope { name: String },

    /// Plugin name is empty or otherwise unusable as a registry key
    #[error("Invalid plugin name: {reason}")]
    InvalidName { reason: String },

    /// Plugin source exceeds the configured limit
    #[error("Plugin '{name}' source exceeds {limit} bytes")]
    SourceTooLarge { name: String, limit: usize },

    /// Script evaluation timed out
    #[error("Script evaluation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// Engine process failed to spawn
    #[error("Failed to spawn script engine process: {reason}")]
    SpawnFailed { reason: String },

    /// Engine returned output that could not be parsed
    #[error("Script engine returned invalid output: {reason}")]
    InvalidOutput { reason: String },

    /// Script compile or runtime fault reported by the engine
    #[error("Script fault: {reason}")]
    Script { reason: String },

    /// Engine I/O error (stdin/stdout)
    #[error("Script engine I/O error: {reason}")]
    IoError { reason: String },

    /// Plugin not found
    #[error("Plugin '{name}' not found")]
    NotFound { name: String },
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store backend error: {0}")]
    Backend(String),

    #[error("Corrupt entry '{key}': {reason}")]
    Corrupt { key: String, reason: String },

    #[error("Serialization error: {0}")]
    Serialization(String),
}

#[derive(Error, Debug)]
pub enum InterceptError {
    /// A handler unit reported a failure; the chain continues without it
    #[error("Handler '{id}' failed: {reason}")]
    Handler { id: String, reason: String },

    /// The body stream was already drained by an earlier consumer
    #[error("Body stream already consumed")]
    BodyConsumed,

    /// Reading from a body stream failed mid-drain
    #[error("Body stream read failed: {0}")]
    Stream(String),
}

pub type Result<T> = std::result::Result<T, ProxyError>;
