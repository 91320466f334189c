//! Usage: tracing subscriber setup (stderr, `RUST_LOG` wins over the configured level).

use crate::shared::error::AppResult;
use tracing_subscriber::EnvFilter;

const QUIET_DEPENDENCIES: &[&str] = &["hyper=warn", "hyper_util=warn", "reqwest=warn", "rustls=warn"];

pub(crate) fn build_filter(rust_log: Option<&str>, configured_level: &str) -> AppResult<EnvFilter> {
    if let Some(directives) = rust_log.map(str::trim).filter(|v| !v.is_empty()) {
        return EnvFilter::try_new(directives)
            .map_err(|e| format!("CONFIG_ERROR: invalid RUST_LOG: {e}").into());
    }

    let level = configured_level.trim();
    let level = if level.is_empty() { "warn" } else { level };
    let mut directives = vec![level.to_string()];
    directives.extend(QUIET_DEPENDENCIES.iter().map(|d| d.to_string()));
    EnvFilter::try_new(directives.join(","))
        .map_err(|e| format!("CONFIG_ERROR: invalid log level '{level}': {e}").into())
}

/// Installs the global subscriber; a second call is a no-op.
pub fn init(configured_level: &str) -> AppResult<()> {
    let rust_log = std::env::var("RUST_LOG").ok();
    let filter = build_filter(rust_log.as_deref(), configured_level)?;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
    Ok(())
}
