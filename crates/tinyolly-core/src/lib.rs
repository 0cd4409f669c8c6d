//! Core types, traits, and errors for TinyOlly
//!
//! This crate contains the foundational types shared across all TinyOlly
//! components: telemetry identifiers, the normalized record model for spans,
//! logs, and metrics, the error taxonomy, server configuration, and the
//! storage contract implemented by the embedded store.

pub mod attr;
pub mod config;
pub mod error;
pub mod ids;
pub mod record;
pub mod severity;
pub mod store;

pub use attr::{attrs_to_json, fingerprint_attributes, AttrMap, AttrValue};
pub use config::{LoggingConfig, ServerConfig};
pub use error::{Result, TinyOllyError};
pub use ids::{SpanId, TraceId};
pub use record::{
    AgentState, AgentStatus, DataPoint, Exemplar, ExpBuckets, ExpHistogramPayload,
    HistogramPayload, LogRecord, MetricKind, MetricMeta, MetricPointRecord, NumberValue,
    PointValue, QuantileValue, ResourceEntry, ScopeEntry, SeriesKey, SpanEvent, SpanKind,
    SpanLink, SpanRecord, SpanStatus, StatusCode, SummaryPayload, Temporality, TraceSummary,
};
pub use severity::severity_text;
pub use store::{
    LogFilter, MetricIngestReport, ResourceRef, ScopeRef, SeriesData, SeriesFilter, SeriesSummary,
    StoreStats, SweepReport, TelemetryStore,
};
