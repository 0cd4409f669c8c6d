//! Storage contract.
//!
//! The server depends on this trait rather than on the embedded store
//! directly, keeping the ingestion, query, and aggregation paths testable
//! against any conforming backend.

use crate::attr::AttrMap;
use crate::ids::TraceId;
use crate::record::{
    DataPoint, LogRecord, MetricMeta, MetricPointRecord, ResourceEntry, ScopeEntry, SpanRecord,
};
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Interning reference for a resource (content hash).
pub type ResourceRef = u64;
/// Interning reference for an instrumentation scope (content hash).
pub type ScopeRef = u64;

/// Filters accepted by the log query.
#[derive(Debug, Clone, Default)]
pub struct LogFilter {
    pub trace_id: Option<TraceId>,
    /// Canonical severity name (`INFO`, `ERROR`, ...), case-insensitive.
    pub severity: Option<String>,
    pub limit: usize,
}

/// Filters accepted by the series query. Resource and attribute filters
/// compare against the canonical text form of the attribute value.
#[derive(Debug, Clone)]
pub struct SeriesFilter {
    pub resource: BTreeMap<String, String>,
    pub attributes: BTreeMap<String, String>,
    pub start_ns: u64,
    pub end_ns: u64,
}

/// One series of one metric, with its points in the queried range.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeriesData {
    pub fingerprint: u64,
    pub resource: AttrMap,
    pub attributes: AttrMap,
    pub points: Vec<DataPoint>,
}

/// Lightweight per-series view used by the cardinality analysis; carries no
/// decoded points.
#[derive(Debug, Clone)]
pub struct SeriesSummary {
    pub fingerprint: u64,
    pub resource_ref: ResourceRef,
    pub attributes: AttrMap,
    pub last_update_ns: u64,
}

/// Outcome of a metric batch write.
#[derive(Debug, Clone, Default)]
pub struct MetricIngestReport {
    pub accepted: usize,
    /// Points discarded because their metric name was over the cardinality
    /// limit.
    pub dropped_cardinality: usize,
    /// Metric names rejected because their kind conflicted with the catalog.
    pub kind_conflicts: Vec<String>,
}

/// Counters surfaced through `/api/stats`.
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub traces: usize,
    pub spans: usize,
    pub logs: usize,
    pub metrics: usize,
    pub metrics_max: usize,
    pub metrics_dropped: u64,
    pub dropped_metric_names: Vec<String>,
    pub store_bytes: usize,
}

/// Outcome of one TTL sweep pass.
#[derive(Debug, Clone, Default)]
pub struct SweepReport {
    pub traces_removed: usize,
    pub spans_removed: usize,
    pub logs_removed: usize,
    pub points_removed: usize,
}

/// The storage contract implemented by the embedded store.
///
/// Writes are idempotent per key; reads return a consistent snapshot of what
/// was present at call time and transparently skip expired entries.
#[async_trait]
pub trait TelemetryStore: Send + Sync {
    // -- interning ---------------------------------------------------------

    /// Intern a resource, returning its content-hash ref.
    async fn intern_resource(&self, entry: ResourceEntry) -> ResourceRef;

    /// Intern an instrumentation scope, returning its content-hash ref.
    async fn intern_scope(&self, entry: ScopeEntry) -> ScopeRef;

    /// Resolve a previously interned resource.
    async fn resource(&self, r: ResourceRef) -> Option<ResourceEntry>;

    /// Resolve a previously interned scope.
    async fn scope(&self, r: ScopeRef) -> Option<ScopeEntry>;

    // -- writes ------------------------------------------------------------

    /// Store a batch of spans atomically: capacity is checked up front so a
    /// failing batch admits nothing.
    async fn put_spans(&self, spans: Vec<SpanRecord>) -> Result<()>;

    /// Store a batch of logs atomically.
    async fn put_logs(&self, logs: Vec<LogRecord>) -> Result<()>;

    /// Store a batch of metric points, enforcing cardinality admission and
    /// kind consistency per metric name.
    async fn put_metrics(&self, points: Vec<MetricPointRecord>) -> Result<MetricIngestReport>;

    // -- reads -------------------------------------------------------------

    /// Most recently ingested trace ids, newest first.
    async fn recent_traces(&self, limit: usize) -> Result<Vec<TraceId>>;

    /// All spans of a trace, ordered by start time.
    async fn trace_spans(&self, trace_id: TraceId) -> Result<Vec<SpanRecord>>;

    /// Recent spans, newest first, optionally restricted to one service.
    async fn recent_spans(&self, service: Option<&str>, limit: usize) -> Result<Vec<SpanRecord>>;

    /// Recent logs matching the filter, newest first.
    async fn logs(&self, filter: LogFilter) -> Result<Vec<LogRecord>>;

    /// All admitted metric names, sorted.
    async fn metric_names(&self) -> Result<Vec<String>>;

    /// Catalog entry for a metric.
    async fn metric_meta(&self, name: &str) -> Result<Option<MetricMeta>>;

    /// Series of a metric with points inside the filter's time range.
    async fn metric_series(&self, name: &str, filter: &SeriesFilter) -> Result<Vec<SeriesData>>;

    /// Per-series summaries without decoding points.
    async fn series_summaries(&self, name: &str) -> Result<Vec<SeriesSummary>>;

    /// Store-wide counters.
    async fn stats(&self) -> Result<StoreStats>;

    // -- lifecycle ---------------------------------------------------------

    /// Remove every record whose TTL elapsed. Reads already skip expired
    /// entries; this reclaims their memory.
    async fn sweep_expired(&self) -> Result<SweepReport>;

    /// Cheap liveness check.
    async fn health_check(&self) -> Result<()>;
}
