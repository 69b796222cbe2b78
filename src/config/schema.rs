use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Script engine settings for delivery-fragment evaluation.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    #[serde(default = "default_node_executable")]
    pub node_executable: PathBuf,
    #[serde(default = "default_eval_timeout")]
    pub eval_timeout_ms: u64,
}

/// Where plugin definitions persist between sessions.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum StoreConfig {
    #[default]
    Memory,
    #[serde(rename_all = "camelCase")]
    Sqlite { path: PathBuf },
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineConfig {
    /// Upper bound on accepted plugin source, in bytes.
    #[serde(default = "default_max_source_bytes")]
    pub max_source_bytes: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            node_executable: default_node_executable(),
            eval_timeout_ms: default_eval_timeout(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_source_bytes: default_max_source_bytes(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// Default value functions
fn default_node_executable() -> PathBuf {
    PathBuf::from("node")
}

fn default_eval_timeout() -> u64 {
    5000
}

fn default_max_source_bytes() -> usize {
    1 << 20
}

fn default_log_level() -> String {
    "info".to_string()
}
