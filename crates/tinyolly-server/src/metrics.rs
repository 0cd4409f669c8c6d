//! Prometheus self-instrumentation.
//!
//! The ingestion endpoints count what they receive and reject; the counters
//! are exposed in Prometheus text format at `/metrics` on the query port.
//! A private registry keeps these collectors isolated from the global
//! default registry so tests are deterministic.
//!
//! The server's own telemetry never re-enters the OTLP path — the query
//! layer additionally filters records carrying the server's service identity
//! (see the self-filter in `api`).

use axum::body::Body;
use axum::extract::State;
use axum::http::{Response, StatusCode};
use prometheus::{Encoder, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use std::sync::Arc;

use crate::state::AppState;

/// Holds all Prometheus collectors for the server.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,

    /// Records received per signal (traces|logs|metrics) and transport
    /// (grpc|http).
    pub records_received_total: IntCounterVec,

    /// Records rejected at decode/validation, per signal and transport.
    pub records_rejected_total: IntCounterVec,

    /// Metric data points dropped by cardinality protection.
    pub metric_points_dropped_total: IntCounterVec,

    /// Current encoded bytes held by the store.
    pub store_bytes: IntGauge,

    /// Currently connected OpAMP agents.
    pub opamp_agents_connected: IntGauge,
}

impl Metrics {
    /// Create a new `Metrics` instance with all collectors registered.
    ///
    /// # Panics
    ///
    /// Panics if a collector fails to register; this runs once at startup
    /// where a panic is the right response to misconfiguration.
    pub fn new() -> Self {
        let registry = Registry::new();

        let records_received_total = IntCounterVec::new(
            Opts::new("tinyolly_records_received_total", "Records received"),
            &["signal", "transport"],
        )
        .expect("metric: records_received_total");
        registry
            .register(Box::new(records_received_total.clone()))
            .expect("register records_received_total");

        let records_rejected_total = IntCounterVec::new(
            Opts::new(
                "tinyolly_records_rejected_total",
                "Records rejected at decode or validation",
            ),
            &["signal", "transport"],
        )
        .expect("metric: records_rejected_total");
        registry
            .register(Box::new(records_rejected_total.clone()))
            .expect("register records_rejected_total");

        let metric_points_dropped_total = IntCounterVec::new(
            Opts::new(
                "tinyolly_metric_points_dropped_total",
                "Metric data points dropped by cardinality protection",
            ),
            &["transport"],
        )
        .expect("metric: metric_points_dropped_total");
        registry
            .register(Box::new(metric_points_dropped_total.clone()))
            .expect("register metric_points_dropped_total");

        let store_bytes = IntGauge::new(
            "tinyolly_store_bytes",
            "Encoded bytes currently held by the store",
        )
        .expect("metric: store_bytes");
        registry
            .register(Box::new(store_bytes.clone()))
            .expect("register store_bytes");

        let opamp_agents_connected = IntGauge::new(
            "tinyolly_opamp_agents_connected",
            "Currently connected OpAMP agents",
        )
        .expect("metric: opamp_agents_connected");
        registry
            .register(Box::new(opamp_agents_connected.clone()))
            .expect("register opamp_agents_connected");

        Self {
            registry,
            records_received_total,
            records_rejected_total,
            metric_points_dropped_total,
            store_bytes,
            opamp_agents_connected,
        }
    }

    /// Render all registered metrics in Prometheus text exposition format.
    pub fn gather_text(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }

    /// Record an ingestion outcome for one batch.
    pub fn record_ingest(
        &self,
        signal: &str,
        transport: &str,
        received: usize,
        rejected: usize,
    ) {
        if received > 0 {
            self.records_received_total
                .with_label_values(&[signal, transport])
                .inc_by(received as u64);
        }
        if rejected > 0 {
            self.records_rejected_total
                .with_label_values(&[signal, transport])
                .inc_by(rejected as u64);
        }
    }

    /// Record metric points dropped by cardinality protection.
    pub fn record_cardinality_drop(&self, transport: &str, dropped: usize) {
        if dropped > 0 {
            self.metric_points_dropped_total
                .with_label_values(&[transport])
                .inc_by(dropped as u64);
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Axum handler that returns Prometheus-format metrics. Unauthenticated, per
/// the standard convention for scraping endpoints.
pub async fn metrics_handler(State(state): State<Arc<AppState>>) -> Response<Body> {
    if let Ok(stats) = state.store.stats().await {
        state.metrics.store_bytes.set(stats.store_bytes as i64);
    }
    match state.metrics.gather_text() {
        Ok(text) => Response::builder()
            .status(StatusCode::OK)
            .header("content-type", "text/plain; version=0.0.4; charset=utf-8")
            .body(Body::from(text))
            .unwrap(),
        Err(e) => Response::builder()
            .status(StatusCode::INTERNAL_SERVER_ERROR)
            .header("content-type", "text/plain")
            .body(Body::from(format!("Failed to gather metrics: {e}")))
            .unwrap(),
    }
}
