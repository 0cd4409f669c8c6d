//! OTLP/HTTP ingestion endpoints.
//!
//! Accepts traces, logs, and metrics at `POST /v1/traces|logs|metrics` in
//! both standard OTLP/HTTP encodings:
//!
//! - `application/x-protobuf` — decoded with `prost` into the generated
//!   collector request types.
//! - `application/json` — decoded with our own serde wire types. The OTLP
//!   JSON encoding hex-encodes trace/span ids and writes 64-bit integers as
//!   strings, so we define types matching the wire format exactly rather
//!   than relying on generated serde for `Vec<u8>` fields.
//!
//! Both paths converge on the generated protobuf types and share the
//! normalizer with the gRPC receiver.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use opentelemetry_proto::tonic::collector::logs::v1::ExportLogsServiceRequest;
use opentelemetry_proto::tonic::collector::metrics::v1::ExportMetricsServiceRequest;
use opentelemetry_proto::tonic::collector::trace::v1::ExportTraceServiceRequest;
use opentelemetry_proto::tonic::common::v1 as common;
use opentelemetry_proto::tonic::logs::v1 as logs;
use opentelemetry_proto::tonic::metrics::v1 as metrics;
use opentelemetry_proto::tonic::resource::v1::Resource;
use opentelemetry_proto::tonic::trace::v1 as trace;
use prost::Message;
use serde::{Deserialize, Deserializer, Serialize};
use std::sync::Arc;
use tinyolly_core::TinyOllyError;
use tracing::debug;

use crate::normalize;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Lenient JSON scalars
// ---------------------------------------------------------------------------

/// A u64 that accepts both the spec-mandated string encoding and plain JSON
/// numbers, defaulting to zero when absent.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct JsonU64(pub u64);

impl<'de> Deserialize<'de> for JsonU64 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let v = serde_json::Value::deserialize(deserializer)?;
        let n = match v {
            serde_json::Value::String(s) => s.parse().unwrap_or(0),
            serde_json::Value::Number(n) => n.as_u64().unwrap_or(0),
            _ => 0,
        };
        Ok(JsonU64(n))
    }
}

/// An i64 with the same leniency as [`JsonU64`].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct JsonI64(pub i64);

impl<'de> Deserialize<'de> for JsonI64 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let v = serde_json::Value::deserialize(deserializer)?;
        let n = match v {
            serde_json::Value::String(s) => s.parse().unwrap_or(0),
            serde_json::Value::Number(n) => n.as_i64().unwrap_or(0),
            _ => 0,
        };
        Ok(JsonI64(n))
    }
}

fn decode_hex_id(hex_str: &str) -> Vec<u8> {
    hex::decode(hex_str).unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Common wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JsonKeyValue {
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub value: Option<JsonAnyValue>,
}

/// OTLP typed value union; only one field is set.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JsonAnyValue {
    #[serde(default)]
    pub string_value: Option<String>,
    #[serde(default)]
    pub int_value: Option<JsonI64>,
    #[serde(default)]
    pub double_value: Option<f64>,
    #[serde(default)]
    pub bool_value: Option<bool>,
    #[serde(default)]
    pub bytes_value: Option<String>,
    #[serde(default)]
    pub array_value: Option<JsonArrayValue>,
    #[serde(default)]
    pub kvlist_value: Option<JsonKeyValueList>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JsonArrayValue {
    #[serde(default)]
    pub values: Vec<JsonAnyValue>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JsonKeyValueList {
    #[serde(default)]
    pub values: Vec<JsonKeyValue>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JsonResource {
    #[serde(default)]
    pub attributes: Vec<JsonKeyValue>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JsonScope {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
}

impl JsonAnyValue {
    fn into_proto(self) -> common::AnyValue {
        use common::any_value::Value;
        let value = if let Some(s) = self.string_value {
            Some(Value::StringValue(s))
        } else if let Some(b) = self.bool_value {
            Some(Value::BoolValue(b))
        } else if let Some(i) = self.int_value {
            Some(Value::IntValue(i.0))
        } else if let Some(d) = self.double_value {
            Some(Value::DoubleValue(d))
        } else if let Some(b64) = self.bytes_value {
            // OTLP JSON carries bytes values base64-encoded; undecodable
            // input is treated as unset and dropped downstream.
            let mut decoded = Vec::new();
            base64_decode(&b64, &mut decoded).then_some(Value::BytesValue(decoded))
        } else if let Some(arr) = self.array_value {
            Some(Value::ArrayValue(common::ArrayValue {
                values: arr.values.into_iter().map(JsonAnyValue::into_proto).collect(),
            }))
        } else if let Some(kvs) = self.kvlist_value {
            Some(Value::KvlistValue(common::KeyValueList {
                values: kvs.values.into_iter().map(JsonKeyValue::into_proto).collect(),
            }))
        } else {
            None
        };
        common::AnyValue { value }
    }
}

/// Minimal base64 (standard alphabet, padded) decoder for the rare
/// `bytesValue` attribute. Returns false on malformed input.
fn base64_decode(input: &str, out: &mut Vec<u8>) -> bool {
    const ALPHABET: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";
    let mut lookup = [255u8; 256];
    for (i, &c) in ALPHABET.iter().enumerate() {
        lookup[c as usize] = i as u8;
    }
    let bytes: Vec<u8> = input.bytes().filter(|&b| b != b'=').collect();
    let mut buffer = 0u32;
    let mut bits = 0u32;
    for b in bytes {
        let v = lookup[b as usize];
        if v == 255 {
            return false;
        }
        buffer = (buffer << 6) | u32::from(v);
        bits += 6;
        if bits >= 8 {
            bits -= 8;
            out.push((buffer >> bits) as u8);
        }
    }
    true
}

impl JsonKeyValue {
    fn into_proto(self) -> common::KeyValue {
        common::KeyValue {
            key: self.key,
            value: self.value.map(JsonAnyValue::into_proto),
        }
    }
}

fn attrs_into_proto(attrs: Vec<JsonKeyValue>) -> Vec<common::KeyValue> {
    attrs.into_iter().map(JsonKeyValue::into_proto).collect()
}

fn resource_into_proto(resource: Option<JsonResource>) -> Option<Resource> {
    resource.map(|r| Resource {
        attributes: attrs_into_proto(r.attributes),
        ..Default::default()
    })
}

fn scope_into_proto(scope: Option<JsonScope>) -> Option<common::InstrumentationScope> {
    scope.map(|s| common::InstrumentationScope {
        name: s.name,
        version: s.version,
        ..Default::default()
    })
}

// ---------------------------------------------------------------------------
// Trace wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JsonTraceRequest {
    #[serde(default)]
    pub resource_spans: Vec<JsonResourceSpans>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JsonResourceSpans {
    #[serde(default)]
    pub resource: Option<JsonResource>,
    #[serde(default)]
    pub scope_spans: Vec<JsonScopeSpans>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JsonScopeSpans {
    #[serde(default)]
    pub scope: Option<JsonScope>,
    #[serde(default)]
    pub spans: Vec<JsonSpan>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JsonSpan {
    #[serde(default)]
    pub trace_id: String,
    #[serde(default)]
    pub span_id: String,
    #[serde(default)]
    pub parent_span_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub kind: i32,
    #[serde(default)]
    pub start_time_unix_nano: JsonU64,
    #[serde(default)]
    pub end_time_unix_nano: JsonU64,
    #[serde(default)]
    pub attributes: Vec<JsonKeyValue>,
    #[serde(default)]
    pub events: Vec<JsonSpanEvent>,
    #[serde(default)]
    pub links: Vec<JsonSpanLink>,
    #[serde(default)]
    pub status: Option<JsonSpanStatus>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JsonSpanEvent {
    #[serde(default)]
    pub time_unix_nano: JsonU64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub attributes: Vec<JsonKeyValue>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JsonSpanLink {
    #[serde(default)]
    pub trace_id: String,
    #[serde(default)]
    pub span_id: String,
    #[serde(default)]
    pub attributes: Vec<JsonKeyValue>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JsonSpanStatus {
    #[serde(default)]
    pub code: i32,
    #[serde(default)]
    pub message: String,
}

impl JsonTraceRequest {
    pub fn into_proto(self) -> ExportTraceServiceRequest {
        ExportTraceServiceRequest {
            resource_spans: self
                .resource_spans
                .into_iter()
                .map(|rs| trace::ResourceSpans {
                    resource: resource_into_proto(rs.resource),
                    scope_spans: rs
                        .scope_spans
                        .into_iter()
                        .map(|ss| trace::ScopeSpans {
                            scope: scope_into_proto(ss.scope),
                            spans: ss.spans.into_iter().map(JsonSpan::into_proto).collect(),
                            schema_url: String::new(),
                        })
                        .collect(),
                    schema_url: String::new(),
                })
                .collect(),
        }
    }
}

impl JsonSpan {
    fn into_proto(self) -> trace::Span {
        trace::Span {
            trace_id: decode_hex_id(&self.trace_id),
            span_id: decode_hex_id(&self.span_id),
            parent_span_id: decode_hex_id(&self.parent_span_id),
            name: self.name,
            kind: self.kind,
            start_time_unix_nano: self.start_time_unix_nano.0,
            end_time_unix_nano: self.end_time_unix_nano.0,
            attributes: attrs_into_proto(self.attributes),
            events: self
                .events
                .into_iter()
                .map(|e| trace::span::Event {
                    time_unix_nano: e.time_unix_nano.0,
                    name: e.name,
                    attributes: attrs_into_proto(e.attributes),
                    ..Default::default()
                })
                .collect(),
            links: self
                .links
                .into_iter()
                .map(|l| trace::span::Link {
                    trace_id: decode_hex_id(&l.trace_id),
                    span_id: decode_hex_id(&l.span_id),
                    attributes: attrs_into_proto(l.attributes),
                    ..Default::default()
                })
                .collect(),
            status: self.status.map(|s| trace::Status {
                code: s.code,
                message: s.message,
            }),
            ..Default::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Log wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JsonLogsRequest {
    #[serde(default)]
    pub resource_logs: Vec<JsonResourceLogs>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JsonResourceLogs {
    #[serde(default)]
    pub resource: Option<JsonResource>,
    #[serde(default)]
    pub scope_logs: Vec<JsonScopeLogs>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JsonScopeLogs {
    #[serde(default)]
    pub scope: Option<JsonScope>,
    #[serde(default)]
    pub log_records: Vec<JsonLogRecord>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JsonLogRecord {
    #[serde(default)]
    pub time_unix_nano: JsonU64,
    #[serde(default)]
    pub severity_number: i32,
    #[serde(default)]
    pub severity_text: String,
    #[serde(default)]
    pub body: Option<JsonAnyValue>,
    #[serde(default)]
    pub attributes: Vec<JsonKeyValue>,
    #[serde(default)]
    pub trace_id: String,
    #[serde(default)]
    pub span_id: String,
}

impl JsonLogsRequest {
    pub fn into_proto(self) -> ExportLogsServiceRequest {
        ExportLogsServiceRequest {
            resource_logs: self
                .resource_logs
                .into_iter()
                .map(|rl| logs::ResourceLogs {
                    resource: resource_into_proto(rl.resource),
                    scope_logs: rl
                        .scope_logs
                        .into_iter()
                        .map(|sl| logs::ScopeLogs {
                            scope: scope_into_proto(sl.scope),
                            log_records: sl
                                .log_records
                                .into_iter()
                                .map(|r| logs::LogRecord {
                                    time_unix_nano: r.time_unix_nano.0,
                                    severity_number: r.severity_number,
                                    severity_text: r.severity_text,
                                    body: r.body.map(JsonAnyValue::into_proto),
                                    attributes: attrs_into_proto(r.attributes),
                                    trace_id: decode_hex_id(&r.trace_id),
                                    span_id: decode_hex_id(&r.span_id),
                                    ..Default::default()
                                })
                                .collect(),
                            schema_url: String::new(),
                        })
                        .collect(),
                    schema_url: String::new(),
                })
                .collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Metric wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JsonMetricsRequest {
    #[serde(default)]
    pub resource_metrics: Vec<JsonResourceMetrics>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JsonResourceMetrics {
    #[serde(default)]
    pub resource: Option<JsonResource>,
    #[serde(default)]
    pub scope_metrics: Vec<JsonScopeMetrics>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JsonScopeMetrics {
    #[serde(default)]
    pub scope: Option<JsonScope>,
    #[serde(default)]
    pub metrics: Vec<JsonMetric>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JsonMetric {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub unit: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub gauge: Option<JsonGauge>,
    #[serde(default)]
    pub sum: Option<JsonSum>,
    #[serde(default)]
    pub histogram: Option<JsonHistogram>,
    #[serde(default)]
    pub exponential_histogram: Option<JsonExponentialHistogram>,
    #[serde(default)]
    pub summary: Option<JsonSummary>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JsonGauge {
    #[serde(default)]
    pub data_points: Vec<JsonNumberDataPoint>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JsonSum {
    #[serde(default)]
    pub data_points: Vec<JsonNumberDataPoint>,
    #[serde(default)]
    pub aggregation_temporality: i32,
    #[serde(default)]
    pub is_monotonic: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JsonHistogram {
    #[serde(default)]
    pub data_points: Vec<JsonHistogramDataPoint>,
    #[serde(default)]
    pub aggregation_temporality: i32,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JsonExponentialHistogram {
    #[serde(default)]
    pub data_points: Vec<JsonExponentialHistogramDataPoint>,
    #[serde(default)]
    pub aggregation_temporality: i32,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JsonSummary {
    #[serde(default)]
    pub data_points: Vec<JsonSummaryDataPoint>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JsonNumberDataPoint {
    #[serde(default)]
    pub attributes: Vec<JsonKeyValue>,
    #[serde(default)]
    pub start_time_unix_nano: JsonU64,
    #[serde(default)]
    pub time_unix_nano: JsonU64,
    #[serde(default)]
    pub as_double: Option<f64>,
    #[serde(default)]
    pub as_int: Option<JsonI64>,
    #[serde(default)]
    pub exemplars: Vec<JsonExemplar>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JsonHistogramDataPoint {
    #[serde(default)]
    pub attributes: Vec<JsonKeyValue>,
    #[serde(default)]
    pub start_time_unix_nano: JsonU64,
    #[serde(default)]
    pub time_unix_nano: JsonU64,
    #[serde(default)]
    pub count: JsonU64,
    #[serde(default)]
    pub sum: Option<f64>,
    #[serde(default)]
    pub bucket_counts: Vec<JsonU64>,
    #[serde(default)]
    pub explicit_bounds: Vec<f64>,
    #[serde(default)]
    pub exemplars: Vec<JsonExemplar>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JsonExpBuckets {
    #[serde(default)]
    pub offset: i32,
    #[serde(default)]
    pub bucket_counts: Vec<JsonU64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JsonExponentialHistogramDataPoint {
    #[serde(default)]
    pub attributes: Vec<JsonKeyValue>,
    #[serde(default)]
    pub start_time_unix_nano: JsonU64,
    #[serde(default)]
    pub time_unix_nano: JsonU64,
    #[serde(default)]
    pub count: JsonU64,
    #[serde(default)]
    pub sum: Option<f64>,
    #[serde(default)]
    pub scale: i32,
    #[serde(default)]
    pub zero_count: JsonU64,
    #[serde(default)]
    pub positive: Option<JsonExpBuckets>,
    #[serde(default)]
    pub negative: Option<JsonExpBuckets>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JsonSummaryDataPoint {
    #[serde(default)]
    pub attributes: Vec<JsonKeyValue>,
    #[serde(default)]
    pub start_time_unix_nano: JsonU64,
    #[serde(default)]
    pub time_unix_nano: JsonU64,
    #[serde(default)]
    pub count: JsonU64,
    #[serde(default)]
    pub sum: f64,
    #[serde(default)]
    pub quantile_values: Vec<JsonQuantileValue>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JsonQuantileValue {
    #[serde(default)]
    pub quantile: f64,
    #[serde(default)]
    pub value: f64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JsonExemplar {
    #[serde(default)]
    pub filtered_attributes: Vec<JsonKeyValue>,
    #[serde(default)]
    pub time_unix_nano: JsonU64,
    #[serde(default)]
    pub as_double: Option<f64>,
    #[serde(default)]
    pub as_int: Option<JsonI64>,
    #[serde(default)]
    pub trace_id: String,
    #[serde(default)]
    pub span_id: String,
}

impl JsonExemplar {
    fn into_proto(self) -> metrics::Exemplar {
        let value = if let Some(d) = self.as_double {
            Some(metrics::exemplar::Value::AsDouble(d))
        } else {
            self.as_int.map(|i| metrics::exemplar::Value::AsInt(i.0))
        };
        metrics::Exemplar {
            filtered_attributes: attrs_into_proto(self.filtered_attributes),
            time_unix_nano: self.time_unix_nano.0,
            trace_id: decode_hex_id(&self.trace_id),
            span_id: decode_hex_id(&self.span_id),
            value,
        }
    }
}

impl JsonNumberDataPoint {
    fn into_proto(self) -> metrics::NumberDataPoint {
        let value = if let Some(d) = self.as_double {
            Some(metrics::number_data_point::Value::AsDouble(d))
        } else {
            self.as_int
                .map(|i| metrics::number_data_point::Value::AsInt(i.0))
        };
        metrics::NumberDataPoint {
            attributes: attrs_into_proto(self.attributes),
            start_time_unix_nano: self.start_time_unix_nano.0,
            time_unix_nano: self.time_unix_nano.0,
            exemplars: self.exemplars.into_iter().map(JsonExemplar::into_proto).collect(),
            value,
            ..Default::default()
        }
    }
}

impl JsonMetric {
    fn into_proto(self) -> metrics::Metric {
        let data = if let Some(gauge) = self.gauge {
            Some(metrics::metric::Data::Gauge(metrics::Gauge {
                data_points: gauge
                    .data_points
                    .into_iter()
                    .map(JsonNumberDataPoint::into_proto)
                    .collect(),
            }))
        } else if let Some(sum) = self.sum {
            Some(metrics::metric::Data::Sum(metrics::Sum {
                data_points: sum
                    .data_points
                    .into_iter()
                    .map(JsonNumberDataPoint::into_proto)
                    .collect(),
                aggregation_temporality: sum.aggregation_temporality,
                is_monotonic: sum.is_monotonic,
            }))
        } else if let Some(histogram) = self.histogram {
            Some(metrics::metric::Data::Histogram(metrics::Histogram {
                data_points: histogram
                    .data_points
                    .into_iter()
                    .map(|dp| metrics::HistogramDataPoint {
                        attributes: attrs_into_proto(dp.attributes),
                        start_time_unix_nano: dp.start_time_unix_nano.0,
                        time_unix_nano: dp.time_unix_nano.0,
                        count: dp.count.0,
                        sum: dp.sum,
                        bucket_counts: dp.bucket_counts.into_iter().map(|c| c.0).collect(),
                        explicit_bounds: dp.explicit_bounds,
                        exemplars: dp
                            .exemplars
                            .into_iter()
                            .map(JsonExemplar::into_proto)
                            .collect(),
                        ..Default::default()
                    })
                    .collect(),
                aggregation_temporality: histogram.aggregation_temporality,
            }))
        } else if let Some(exp) = self.exponential_histogram {
            Some(metrics::metric::Data::ExponentialHistogram(
                metrics::ExponentialHistogram {
                    data_points: exp
                        .data_points
                        .into_iter()
                        .map(|dp| metrics::ExponentialHistogramDataPoint {
                            attributes: attrs_into_proto(dp.attributes),
                            start_time_unix_nano: dp.start_time_unix_nano.0,
                            time_unix_nano: dp.time_unix_nano.0,
                            count: dp.count.0,
                            sum: dp.sum,
                            scale: dp.scale,
                            zero_count: dp.zero_count.0,
                            positive: dp.positive.map(|b| {
                                metrics::exponential_histogram_data_point::Buckets {
                                    offset: b.offset,
                                    bucket_counts: b.bucket_counts.into_iter().map(|c| c.0).collect(),
                                }
                            }),
                            negative: dp.negative.map(|b| {
                                metrics::exponential_histogram_data_point::Buckets {
                                    offset: b.offset,
                                    bucket_counts: b.bucket_counts.into_iter().map(|c| c.0).collect(),
                                }
                            }),
                            ..Default::default()
                        })
                        .collect(),
                    aggregation_temporality: exp.aggregation_temporality,
                },
            ))
        } else if let Some(summary) = self.summary {
            Some(metrics::metric::Data::Summary(metrics::Summary {
                data_points: summary
                    .data_points
                    .into_iter()
                    .map(|dp| metrics::SummaryDataPoint {
                        attributes: attrs_into_proto(dp.attributes),
                        start_time_unix_nano: dp.start_time_unix_nano.0,
                        time_unix_nano: dp.time_unix_nano.0,
                        count: dp.count.0,
                        sum: dp.sum,
                        quantile_values: dp
                            .quantile_values
                            .into_iter()
                            .map(|q| metrics::summary_data_point::ValueAtQuantile {
                                quantile: q.quantile,
                                value: q.value,
                            })
                            .collect(),
                        ..Default::default()
                    })
                    .collect(),
            }))
        } else {
            None
        };

        metrics::Metric {
            name: self.name,
            description: self.description,
            unit: self.unit,
            data,
            ..Default::default()
        }
    }
}

impl JsonMetricsRequest {
    pub fn into_proto(self) -> ExportMetricsServiceRequest {
        ExportMetricsServiceRequest {
            resource_metrics: self
                .resource_metrics
                .into_iter()
                .map(|rm| metrics::ResourceMetrics {
                    resource: resource_into_proto(rm.resource),
                    scope_metrics: rm
                        .scope_metrics
                        .into_iter()
                        .map(|sm| metrics::ScopeMetrics {
                            scope: scope_into_proto(sm.scope),
                            metrics: sm.metrics.into_iter().map(JsonMetric::into_proto).collect(),
                            schema_url: String::new(),
                        })
                        .collect(),
                    schema_url: String::new(),
                })
                .collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

/// OTLP/HTTP export response body (JSON encoding).
#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OtlpHttpResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partial_success: Option<OtlpPartialSuccess>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OtlpPartialSuccess {
    pub rejected: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

const CONTENT_TYPE_PROTOBUF: &str = "application/x-protobuf";
const CONTENT_TYPE_JSON: &str = "application/json";

enum Encoding {
    Protobuf,
    Json,
}

fn request_encoding(headers: &HeaderMap) -> Option<Encoding> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or(CONTENT_TYPE_JSON);
    if content_type.starts_with(CONTENT_TYPE_PROTOBUF) {
        Some(Encoding::Protobuf)
    } else if content_type.starts_with(CONTENT_TYPE_JSON) {
        Some(Encoding::Json)
    } else {
        None
    }
}

fn error_response(err: TinyOllyError) -> Response {
    match err {
        TinyOllyError::OutOfCapacity => (
            StatusCode::SERVICE_UNAVAILABLE,
            [(header::RETRY_AFTER, "1")],
            Json(serde_json::json!({"error": "store at capacity, retry later"})),
        )
            .into_response(),
        TinyOllyError::InvalidInput(msg) => (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": msg})),
        )
            .into_response(),
        other => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({"error": other.to_string()})),
        )
            .into_response(),
    }
}

fn ok_response(rejected: usize, error_message: Option<String>) -> Response {
    let body = if rejected > 0 {
        OtlpHttpResponse {
            partial_success: Some(OtlpPartialSuccess {
                rejected: rejected as i64,
                error_message,
            }),
        }
    } else {
        OtlpHttpResponse::default()
    };
    (StatusCode::OK, Json(body)).into_response()
}

fn oversize_response() -> Response {
    (
        StatusCode::PAYLOAD_TOO_LARGE,
        Json(serde_json::json!({"error": "payload too large"})),
    )
        .into_response()
}

async fn ingest_traces(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if body.len() > state.config.max_request_bytes {
        return oversize_response();
    }
    let request = match request_encoding(&headers) {
        Some(Encoding::Protobuf) => match ExportTraceServiceRequest::decode(body) {
            Ok(req) => req,
            Err(e) => return error_response(TinyOllyError::InvalidInput(format!("protobuf: {e}"))),
        },
        Some(Encoding::Json) => match serde_json::from_slice::<JsonTraceRequest>(&body) {
            Ok(req) => req.into_proto(),
            Err(e) => return error_response(TinyOllyError::InvalidInput(format!("json: {e}"))),
        },
        None => {
            return error_response(TinyOllyError::InvalidInput(
                "unsupported content type".to_string(),
            ))
        }
    };

    let normalized =
        match normalize::normalize_spans(state.store.as_ref(), request.resource_spans).await {
            Ok(n) => n,
            Err(e) => return error_response(e),
        };
    let received = normalized.records.len();
    if let Err(e) = state.store.put_spans(normalized.records).await {
        return error_response(e);
    }

    state
        .metrics
        .record_ingest("traces", "http", received, normalized.rejected);
    debug!(accepted = received, rejected = normalized.rejected, "HTTP trace export processed");

    ok_response(
        normalized.rejected,
        (normalized.rejected > 0).then(|| "spans failed validation".to_string()),
    )
}

async fn ingest_logs(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if body.len() > state.config.max_request_bytes {
        return oversize_response();
    }
    let request = match request_encoding(&headers) {
        Some(Encoding::Protobuf) => match ExportLogsServiceRequest::decode(body) {
            Ok(req) => req,
            Err(e) => return error_response(TinyOllyError::InvalidInput(format!("protobuf: {e}"))),
        },
        Some(Encoding::Json) => match serde_json::from_slice::<JsonLogsRequest>(&body) {
            Ok(req) => req.into_proto(),
            Err(e) => return error_response(TinyOllyError::InvalidInput(format!("json: {e}"))),
        },
        None => {
            return error_response(TinyOllyError::InvalidInput(
                "unsupported content type".to_string(),
            ))
        }
    };

    let normalized =
        match normalize::normalize_logs(state.store.as_ref(), request.resource_logs).await {
            Ok(n) => n,
            Err(e) => return error_response(e),
        };
    let received = normalized.records.len();
    if let Err(e) = state.store.put_logs(normalized.records).await {
        return error_response(e);
    }

    state
        .metrics
        .record_ingest("logs", "http", received, normalized.rejected);

    ok_response(
        normalized.rejected,
        (normalized.rejected > 0).then(|| "log records failed validation".to_string()),
    )
}

async fn ingest_metrics(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if body.len() > state.config.max_request_bytes {
        return oversize_response();
    }
    let request = match request_encoding(&headers) {
        Some(Encoding::Protobuf) => match ExportMetricsServiceRequest::decode(body) {
            Ok(req) => req,
            Err(e) => return error_response(TinyOllyError::InvalidInput(format!("protobuf: {e}"))),
        },
        Some(Encoding::Json) => match serde_json::from_slice::<JsonMetricsRequest>(&body) {
            Ok(req) => req.into_proto(),
            Err(e) => return error_response(TinyOllyError::InvalidInput(format!("json: {e}"))),
        },
        None => {
            return error_response(TinyOllyError::InvalidInput(
                "unsupported content type".to_string(),
            ))
        }
    };

    let normalized =
        match normalize::normalize_metrics(state.store.as_ref(), request.resource_metrics).await {
            Ok(n) => n,
            Err(e) => return error_response(e),
        };
    let received = normalized.records.len();
    let report = match state.store.put_metrics(normalized.records).await {
        Ok(r) => r,
        Err(e) => return error_response(e),
    };

    state
        .metrics
        .record_ingest("metrics", "http", received, normalized.rejected);
    state
        .metrics
        .record_cardinality_drop("http", report.dropped_cardinality);

    let rejected =
        normalized.rejected + report.dropped_cardinality + report.kind_conflicts.len();
    let message = if report.kind_conflicts.is_empty() {
        (rejected > 0).then(|| "metric data points rejected".to_string())
    } else {
        Some(format!(
            "kind conflict for metrics: {}",
            report.kind_conflicts.join(", ")
        ))
    };
    ok_response(rejected, message)
}

/// Routes for the OTLP/HTTP ingestion surface.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/v1/traces", post(ingest_traces))
        .route("/v1/logs", post(ingest_logs))
        .route("/v1/metrics", post(ingest_metrics))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
