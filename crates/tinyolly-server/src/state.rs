//! Shared application state.

use crate::metrics::Metrics;
use crate::opamp::AgentRegistry;
use crate::shutdown::ShutdownCoordinator;
use std::sync::Arc;
use std::time::Instant;
use tinyolly_core::{ServerConfig, TelemetryStore};
use tokio::sync::Mutex;

/// State threaded through every handler via axum's `State` extractor and
/// shared with the tonic services.
pub struct AppState {
    pub config: ServerConfig,
    pub store: Arc<dyn TelemetryStore>,
    pub metrics: Metrics,
    pub agents: Arc<AgentRegistry>,
    pub shutdown: ShutdownCoordinator,
    pub started_at: Instant,
    /// Short-lived cache for the service map, which scans many traces.
    pub service_map_cache: Mutex<Option<(Instant, serde_json::Value)>>,
}

impl AppState {
    pub fn new(
        config: ServerConfig,
        store: Arc<dyn TelemetryStore>,
        agents: Arc<AgentRegistry>,
        shutdown: ShutdownCoordinator,
    ) -> Self {
        Self {
            config,
            store,
            metrics: Metrics::new(),
            agents,
            shutdown,
            started_at: Instant::now(),
            service_map_cache: Mutex::new(None),
        }
    }

    /// Nanoseconds since the Unix epoch.
    pub fn now_ns() -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0)
    }
}
