//! The normalized record model.
//!
//! The OTLP normalizer turns incoming protobuf/JSON payloads into these
//! records; the store persists them encoded and never mutates them. Records
//! reference their producing resource and instrumentation scope through
//! interning refs rather than embedding the attribute maps in every record.
//!
//! All timestamps are nanoseconds since the Unix epoch.

use crate::attr::{AttrMap, AttrValue};
use crate::ids::{SpanId, TraceId};
use crate::store::{ResourceRef, ScopeRef};
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Resource & scope interning entries
// ---------------------------------------------------------------------------

/// Attributes describing a telemetry producer (`service.name`, `host.name`,
/// ...). Interned by content hash; immutable once interned.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ResourceEntry {
    pub attributes: AttrMap,
}

impl ResourceEntry {
    /// The `service.name` resource attribute, if present.
    pub fn service_name(&self) -> Option<&str> {
        self.attributes.get("service.name").and_then(AttrValue::as_str)
    }

    /// Content hash used as the interning key.
    pub fn content_hash(&self) -> ResourceRef {
        crate::attr::fingerprint_attributes(&self.attributes)
    }
}

/// Instrumentation library identity.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ScopeEntry {
    pub name: String,
    pub version: String,
}

impl ScopeEntry {
    pub fn content_hash(&self) -> ScopeRef {
        let mut attrs = AttrMap::new();
        attrs.insert("name".to_string(), AttrValue::Str(self.name.clone()));
        attrs.insert("version".to_string(), AttrValue::Str(self.version.clone()));
        crate::attr::fingerprint_attributes(&attrs)
    }
}

// ---------------------------------------------------------------------------
// Spans
// ---------------------------------------------------------------------------

/// Span kind per OTLP (`SPAN_KIND_*`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpanKind {
    Unspecified,
    Internal,
    Server,
    Client,
    Producer,
    Consumer,
}

impl SpanKind {
    pub fn from_i32(v: i32) -> Self {
        match v {
            1 => SpanKind::Internal,
            2 => SpanKind::Server,
            3 => SpanKind::Client,
            4 => SpanKind::Producer,
            5 => SpanKind::Consumer,
            _ => SpanKind::Unspecified,
        }
    }
}

/// Span status code per OTLP (`STATUS_CODE_*`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatusCode {
    Unset,
    Ok,
    Error,
}

impl StatusCode {
    pub fn from_i32(v: i32) -> Self {
        match v {
            1 => StatusCode::Ok,
            2 => StatusCode::Error,
            _ => StatusCode::Unset,
        }
    }
}

/// Span status: a code plus an optional human-readable message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanStatus {
    pub code: StatusCode,
    pub message: String,
}

impl Default for SpanStatus {
    fn default() -> Self {
        Self {
            code: StatusCode::Unset,
            message: String::new(),
        }
    }
}

/// A timestamped event attached to a span.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanEvent {
    pub time_ns: u64,
    pub name: String,
    pub attributes: AttrMap,
}

/// A link from one span to another, possibly in a different trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanLink {
    pub trace_id: TraceId,
    pub span_id: SpanId,
    pub attributes: AttrMap,
}

/// A single normalized span.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanRecord {
    pub trace_id: TraceId,
    pub span_id: SpanId,
    pub parent_span_id: Option<SpanId>,
    pub name: String,
    pub kind: SpanKind,
    pub start_time_ns: u64,
    pub end_time_ns: u64,
    pub status: SpanStatus,
    pub attributes: AttrMap,
    pub events: Vec<SpanEvent>,
    pub links: Vec<SpanLink>,
    pub resource_ref: ResourceRef,
    pub scope_ref: ScopeRef,
    /// Denormalized from the resource so index writes and service filters
    /// never need an interning lookup.
    pub service_name: String,
}

impl SpanRecord {
    pub fn duration_ns(&self) -> u64 {
        self.end_time_ns.saturating_sub(self.start_time_ns)
    }

    pub fn is_error(&self) -> bool {
        self.status.code == StatusCode::Error
    }

    /// Look up a string attribute by any of the given keys, first match wins.
    pub fn attr_str(&self, keys: &[&str]) -> Option<&str> {
        keys.iter()
            .find_map(|k| self.attributes.get(*k))
            .and_then(AttrValue::as_str)
    }
}

/// Derived per-trace view served by `GET /api/traces`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceSummary {
    pub trace_id: TraceId,
    pub span_count: usize,
    pub duration_ms: f64,
    pub start_time: u64,
    pub root_span_name: String,
    pub root_span_method: Option<String>,
    pub root_span_route: Option<String>,
    pub root_span_status: SpanStatus,
    pub service_name: String,
}

// ---------------------------------------------------------------------------
// Logs
// ---------------------------------------------------------------------------

/// A single normalized log record, optionally correlated to a span.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub timestamp_ns: u64,
    pub severity_number: i32,
    pub severity_text: String,
    pub body: AttrValue,
    pub attributes: AttrMap,
    pub trace_id: Option<TraceId>,
    pub span_id: Option<SpanId>,
    pub resource_ref: ResourceRef,
    pub scope_ref: ScopeRef,
    pub service_name: String,
}

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

/// Metric kind, detected from the populated OTLP `data` oneof. Immutable for
/// the lifetime of a metric name within the retention window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetricKind {
    Gauge,
    Sum,
    Histogram,
    Summary,
    ExponentialHistogram,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Gauge => "gauge",
            MetricKind::Sum => "sum",
            MetricKind::Histogram => "histogram",
            MetricKind::Summary => "summary",
            MetricKind::ExponentialHistogram => "exponential_histogram",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregation temporality for sums and histograms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Temporality {
    Unspecified,
    Delta,
    Cumulative,
}

impl Temporality {
    pub fn from_i32(v: i32) -> Self {
        match v {
            1 => Temporality::Delta,
            2 => Temporality::Cumulative,
            _ => Temporality::Unspecified,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Temporality::Unspecified => "unspecified",
            Temporality::Delta => "delta",
            Temporality::Cumulative => "cumulative",
        }
    }
}

/// Catalog entry for a metric name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricMeta {
    pub kind: MetricKind,
    pub unit: String,
    pub description: String,
    pub temporality: Temporality,
}

/// Identity of one series of a metric: the name plus the fingerprint of its
/// datapoint attributes combined with its resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SeriesKey {
    pub metric: String,
    pub fingerprint: u64,
}

/// A scalar value that may be integer or floating point on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum NumberValue {
    Int(i64),
    Double(f64),
}

impl NumberValue {
    pub fn as_f64(&self) -> f64 {
        match self {
            NumberValue::Int(i) => *i as f64,
            NumberValue::Double(d) => *d,
        }
    }
}

/// Histogram payload with explicit bucket bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistogramPayload {
    pub count: u64,
    pub sum: f64,
    pub bucket_counts: Vec<u64>,
    pub explicit_bounds: Vec<f64>,
}

/// One side (positive or negative) of an exponential histogram.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ExpBuckets {
    pub offset: i32,
    pub bucket_counts: Vec<u64>,
}

/// Native exponential histogram payload. Kept in base-2 exponential form in
/// storage; converted to explicit bounds only when a query renders it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpHistogramPayload {
    pub count: u64,
    pub sum: f64,
    pub scale: i32,
    pub zero_count: u64,
    pub positive: ExpBuckets,
    pub negative: ExpBuckets,
}

impl ExpHistogramPayload {
    /// Convert to an explicit-bound histogram.
    ///
    /// Bucket `i` of the positive range covers
    /// `(base^(offset+i), base^(offset+i+1)]` with `base = 2^(2^-scale)`.
    /// Negative buckets and the zero bucket are folded into a leading
    /// underflow bucket, which is sufficient for duration-style data.
    pub fn to_explicit(&self) -> HistogramPayload {
        let base = 2f64.powf(2f64.powi(-self.scale));
        let n = self.positive.bucket_counts.len();

        let mut bounds = Vec::with_capacity(n + 1);
        let mut counts = Vec::with_capacity(n + 2);

        // Underflow bucket: zero + all negative observations.
        let underflow: u64 =
            self.zero_count + self.negative.bucket_counts.iter().copied().sum::<u64>();
        counts.push(underflow);
        bounds.push(base.powi(self.positive.offset));

        for (i, c) in self.positive.bucket_counts.iter().enumerate() {
            counts.push(*c);
            bounds.push(base.powi(self.positive.offset + i as i32 + 1));
        }
        // Final +Inf bucket is empty; every positive observation fell in a
        // bounded bucket above. counts.len() == bounds.len() + 1 per the
        // OTLP convention.
        counts.push(0);

        HistogramPayload {
            count: self.count,
            sum: self.sum,
            bucket_counts: counts,
            explicit_bounds: bounds,
        }
    }
}

/// Summary quantile value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantileValue {
    pub quantile: f64,
    pub value: f64,
}

/// Summary payload (pre-aggregated quantiles).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryPayload {
    pub count: u64,
    pub sum: f64,
    pub quantiles: Vec<QuantileValue>,
}

/// Kind-appropriate payload of a data point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PointValue {
    Number(NumberValue),
    Histogram(HistogramPayload),
    Summary(SummaryPayload),
    ExpHistogram(ExpHistogramPayload),
}

/// A sampled measurement referencing a specific trace/span, enabling
/// metric-to-trace navigation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exemplar {
    pub timestamp_ns: u64,
    pub value: NumberValue,
    pub trace_id: Option<TraceId>,
    pub span_id: Option<SpanId>,
    pub filtered_attributes: AttrMap,
}

/// One point of one series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    pub timestamp_ns: u64,
    pub start_time_ns: u64,
    pub value: PointValue,
    pub exemplars: Vec<Exemplar>,
}

/// A fully normalized metric data point as handed to the store: metric
/// identity, series identity, and the point itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricPointRecord {
    pub name: String,
    pub meta: MetricMeta,
    pub resource_ref: ResourceRef,
    pub attributes: AttrMap,
    pub fingerprint: u64,
    pub point: DataPoint,
}

// ---------------------------------------------------------------------------
// OpAMP agent state
// ---------------------------------------------------------------------------

/// Connection status of a managed collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Connected,
    Disconnected,
}

/// Last-known state of a collector managed over OpAMP. Retained after
/// disconnect until the same instance id re-registers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentState {
    pub instance_id: String,
    pub agent_type: String,
    pub agent_version: String,
    pub effective_config: String,
    pub status: AgentStatus,
    pub last_seen_ns: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn span_duration_is_saturating() {
        let span = SpanRecord {
            trace_id: TraceId([1; 16]),
            span_id: SpanId([2; 8]),
            parent_span_id: None,
            name: "x".into(),
            kind: SpanKind::Server,
            start_time_ns: 100,
            end_time_ns: 50,
            status: SpanStatus::default(),
            attributes: AttrMap::new(),
            events: vec![],
            links: vec![],
            resource_ref: 0,
            scope_ref: 0,
            service_name: "svc".into(),
        };
        assert_eq!(span.duration_ns(), 0);
    }

    #[test]
    fn resource_service_name_lookup() {
        let mut attrs = AttrMap::new();
        attrs.insert("service.name".into(), AttrValue::Str("cart".into()));
        let res = ResourceEntry { attributes: attrs };
        assert_eq!(res.service_name(), Some("cart"));
        assert_eq!(ResourceEntry::default().service_name(), None);
    }

    #[test]
    fn identical_resources_hash_identically() {
        let mut attrs = AttrMap::new();
        attrs.insert("service.name".into(), AttrValue::Str("cart".into()));
        let a = ResourceEntry {
            attributes: attrs.clone(),
        };
        let b = ResourceEntry { attributes: attrs };
        assert_eq!(a.content_hash(), b.content_hash());
    }

    #[test]
    fn span_kind_and_status_from_wire_enums() {
        assert_eq!(SpanKind::from_i32(2), SpanKind::Server);
        assert_eq!(SpanKind::from_i32(99), SpanKind::Unspecified);
        assert_eq!(StatusCode::from_i32(2), StatusCode::Error);
        assert_eq!(StatusCode::from_i32(0), StatusCode::Unset);
    }

    #[test]
    fn exp_histogram_explicit_conversion_preserves_count() {
        let exp = ExpHistogramPayload {
            count: 10,
            sum: 55.0,
            scale: 0, // base 2
            zero_count: 1,
            positive: ExpBuckets {
                offset: 0,
                bucket_counts: vec![4, 3, 2],
            },
            negative: ExpBuckets::default(),
        };
        let explicit = exp.to_explicit();
        assert_eq!(explicit.count, 10);
        assert_eq!(explicit.bucket_counts.iter().sum::<u64>(), 10);
        // counts = bounds + 1 per OTLP convention
        assert_eq!(
            explicit.bucket_counts.len(),
            explicit.explicit_bounds.len() + 1
        );
        // base 2, offset 0: bucket edges at 1, 2, 4, 8
        assert_eq!(explicit.explicit_bounds, vec![1.0, 2.0, 4.0, 8.0]);
    }

    #[test]
    fn metric_kind_display() {
        assert_eq!(MetricKind::Gauge.to_string(), "gauge");
        assert_eq!(
            MetricKind::ExponentialHistogram.to_string(),
            "exponential_histogram"
        );
    }
}
