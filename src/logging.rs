//! Tracing subscriber setup for embedders that do not bring their own.

use tracing_subscriber::EnvFilter;

/// Initializes a formatted subscriber honoring `RUST_LOG`, with the
/// crate's own level defaulting to `level`. Safe to call more than once;
/// later calls are no-ops.
pub fn init(level: &str) {
    let mut filter = EnvFilter::from_default_env();
    if let Ok(directive) = format!("tamper_proxy={level}").parse() {
        filter = filter.add_directive(directive);
    }

    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
