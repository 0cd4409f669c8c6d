//! Server configuration.
//!
//! Configuration is loaded from an optional YAML file, then overridden by
//! environment variables, then by CLI flags (highest precedence). The type
//! lives here so every crate can consume it; file loading and the merge
//! logic live in the server crate.

use serde::{Deserialize, Serialize};

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    pub level: String,
    /// Output format: text or json.
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

/// Top-level server configuration with built-in defaults for every field.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// OTLP gRPC receiver listen address.
    pub grpc_listen_addr: String,
    /// HTTP listen address serving both OTLP/HTTP ingest and the query API.
    pub http_listen_addr: String,
    /// OpAMP WebSocket listen address.
    pub opamp_ws_listen_addr: String,
    /// OpAMP REST listen address.
    pub opamp_rest_listen_addr: String,
    /// Retention window in seconds; records older than this are expired.
    pub retention_seconds: u64,
    /// Maximum number of distinct metric names admitted.
    pub max_metric_cardinality: usize,
    /// Maximum accepted request body size in bytes.
    pub max_request_bytes: usize,
    /// Upper bound on total encoded bytes held by the store.
    pub max_store_bytes: usize,
    /// Per-request wall clock limit in seconds for read endpoints.
    pub request_deadline_seconds: u64,
    /// OpAMP heartbeat interval; a missed interval marks the agent
    /// disconnected.
    pub opamp_heartbeat_seconds: u64,
    /// Interval of the background TTL sweep.
    pub sweep_interval_seconds: u64,
    /// The server's own `service.name`; telemetry carrying it is filtered
    /// from query responses to avoid self-amplification.
    pub self_service_name: String,
    /// Path to the default collector configuration pushed over OpAMP.
    pub collector_config_path: Option<String>,
    pub logging: LoggingConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            grpc_listen_addr: "0.0.0.0:4343".to_string(),
            http_listen_addr: "0.0.0.0:5005".to_string(),
            opamp_ws_listen_addr: "0.0.0.0:4320".to_string(),
            opamp_rest_listen_addr: "0.0.0.0:4321".to_string(),
            retention_seconds: 1800,
            max_metric_cardinality: 1000,
            max_request_bytes: 16 * 1024 * 1024,
            max_store_bytes: 256 * 1024 * 1024,
            request_deadline_seconds: 30,
            opamp_heartbeat_seconds: 30,
            sweep_interval_seconds: 30,
            self_service_name: "tinyolly".to_string(),
            collector_config_path: None,
            logging: LoggingConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Check invariants that would otherwise surface as confusing runtime
    /// failures.
    pub fn validate(&self) -> crate::Result<()> {
        if self.retention_seconds == 0 {
            return Err(crate::TinyOllyError::InvalidInput(
                "retention_seconds must be positive".to_string(),
            ));
        }
        if self.max_metric_cardinality == 0 {
            return Err(crate::TinyOllyError::InvalidInput(
                "max_metric_cardinality must be positive".to_string(),
            ));
        }
        if self.max_request_bytes == 0 || self.max_store_bytes == 0 {
            return Err(crate::TinyOllyError::InvalidInput(
                "size limits must be positive".to_string(),
            ));
        }
        if self.max_request_bytes > self.max_store_bytes {
            return Err(crate::TinyOllyError::InvalidInput(
                "max_request_bytes cannot exceed max_store_bytes".to_string(),
            ));
        }
        for (name, addr) in [
            ("grpc_listen_addr", &self.grpc_listen_addr),
            ("http_listen_addr", &self.http_listen_addr),
            ("opamp_ws_listen_addr", &self.opamp_ws_listen_addr),
            ("opamp_rest_listen_addr", &self.opamp_rest_listen_addr),
        ] {
            if addr.parse::<std::net::SocketAddr>().is_err() {
                return Err(crate::TinyOllyError::InvalidInput(format!(
                    "{name} is not a valid socket address: {addr}"
                )));
            }
        }
        Ok(())
    }

    pub fn retention_ns(&self) -> u64 {
        self.retention_seconds * 1_000_000_000
    }
}
