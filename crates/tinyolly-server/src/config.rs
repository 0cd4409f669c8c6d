//! Configuration loading and environment overrides.
//!
//! Precedence (highest wins): CLI flags, environment variables, config file
//! values, built-in defaults. File loading and the env merge live here; the
//! [`ServerConfig`] type itself is in `tinyolly-core`.

use std::path::Path;
use tinyolly_core::ServerConfig;
use tracing::warn;

/// Load a [`ServerConfig`] from a YAML file at `path`.
///
/// # Errors
///
/// Returns an error if the file cannot be read or the YAML is invalid.
pub fn load_config(path: &Path) -> anyhow::Result<ServerConfig> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read config file {}: {e}", path.display()))?;
    let config: ServerConfig = serde_yaml::from_str(&contents)
        .map_err(|e| anyhow::anyhow!("failed to parse config YAML: {e}"))?;
    Ok(config)
}

/// Replace the port of a `host:port` listen address.
fn with_port(addr: &str, port: &str) -> String {
    match addr.rsplit_once(':') {
        Some((host, _)) => format!("{host}:{port}"),
        None => format!("{addr}:{port}"),
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

/// Apply environment variable overrides to a loaded configuration.
///
/// `RETENTION_SECONDS` is the canonical retention knob; `REDIS_TTL` is
/// honoured as an alias for deployments that predate the rename.
pub fn apply_env_overrides(config: &mut ServerConfig) {
    if let Some(raw) = env_var("MAX_METRIC_CARDINALITY") {
        match raw.parse() {
            Ok(v) => config.max_metric_cardinality = v,
            Err(_) => warn!(value = %raw, "ignoring unparseable MAX_METRIC_CARDINALITY"),
        }
    }
    if let Some(raw) = env_var("RETENTION_SECONDS").or_else(|| env_var("REDIS_TTL")) {
        match raw.parse() {
            Ok(v) => config.retention_seconds = v,
            Err(_) => warn!(value = %raw, "ignoring unparseable retention override"),
        }
    }
    if let Some(port) = env_var("GRPC_PORT") {
        config.grpc_listen_addr = with_port(&config.grpc_listen_addr, &port);
    }
    if let Some(port) = env_var("HTTP_PORT") {
        config.http_listen_addr = with_port(&config.http_listen_addr, &port);
    }
    if let Some(port) = env_var("OPAMP_PORT") {
        config.opamp_ws_listen_addr = with_port(&config.opamp_ws_listen_addr, &port);
    }
    if let Some(port) = env_var("OPAMP_REST_PORT") {
        config.opamp_rest_listen_addr = with_port(&config.opamp_rest_listen_addr, &port);
    }
    if let Some(path) = env_var("COLLECTOR_CONFIG_PATH") {
        config.collector_config_path = Some(path);
    }
    if let Some(level) = env_var("TINYOLLY_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(format) = env_var("TINYOLLY_LOG_FORMAT") {
        config.logging.format = format;
    }
}
