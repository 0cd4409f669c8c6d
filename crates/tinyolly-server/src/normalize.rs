//! OTLP normalization.
//!
//! Converts incoming OTLP batches (`ResourceSpans`, `ResourceLogs`,
//! `ResourceMetrics`) into the internal record model:
//!
//! 1. Intern the resource by content hash over its sorted attributes.
//! 2. Intern each instrumentation scope.
//! 3. Validate and convert the individual records, counting rejects rather
//!    than failing the batch — the counts feed the OTLP partial-success
//!    response.
//!
//! Attribute values outside the OTLP schema are dropped (the record is
//! kept) and counted. Metric kind is detected from whichever `data` oneof
//! is populated; exponential histograms keep their native form.

use opentelemetry_proto::tonic::common::v1::{any_value, AnyValue, InstrumentationScope, KeyValue};
use opentelemetry_proto::tonic::logs::v1::ResourceLogs;
use opentelemetry_proto::tonic::metrics::v1::{
    exemplar, metric, number_data_point, Exemplar as ExemplarProto, Metric, ResourceMetrics,
};
use opentelemetry_proto::tonic::resource::v1::Resource;
use opentelemetry_proto::tonic::trace::v1::{span, ResourceSpans, Span, Status};
use tinyolly_core::{
    fingerprint_attributes, AttrMap, AttrValue, DataPoint, Exemplar, ExpBuckets,
    ExpHistogramPayload, HistogramPayload, LogRecord, MetricKind, MetricMeta, MetricPointRecord,
    NumberValue, PointValue, QuantileValue, ResourceEntry, ResourceRef, Result, ScopeEntry,
    ScopeRef, SpanEvent, SpanId, SpanKind, SpanLink, SpanRecord, SpanStatus, StatusCode,
    SummaryPayload, TelemetryStore, Temporality, TinyOllyError, TraceId,
};
use tracing::debug;

// ---------------------------------------------------------------------------
// Batch results
// ---------------------------------------------------------------------------

/// Outcome of normalizing one batch of a single signal.
#[derive(Debug)]
pub struct Normalized<T> {
    pub records: Vec<T>,
    /// Records rejected by validation (bad ids, inverted timestamps, ...).
    pub rejected: usize,
    /// Attributes dropped because their value type is outside the OTLP
    /// schema.
    pub dropped_attrs: usize,
}

impl<T> Default for Normalized<T> {
    fn default() -> Self {
        Self {
            records: Vec::new(),
            rejected: 0,
            dropped_attrs: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// Attribute conversion
// ---------------------------------------------------------------------------

/// Convert an OTLP `AnyValue` into a typed attribute value. Returns `None`
/// when the value is unset, which callers treat as an unsupported type.
fn convert_any_value(value: AnyValue) -> Option<AttrValue> {
    match value.value? {
        any_value::Value::StringValue(s) => Some(AttrValue::Str(s)),
        any_value::Value::BoolValue(b) => Some(AttrValue::Bool(b)),
        any_value::Value::IntValue(i) => Some(AttrValue::Int(i)),
        any_value::Value::DoubleValue(d) => Some(AttrValue::Double(d)),
        any_value::Value::BytesValue(b) => Some(AttrValue::Bytes(b)),
        any_value::Value::ArrayValue(arr) => Some(AttrValue::Array(
            arr.values.into_iter().filter_map(convert_any_value).collect(),
        )),
        any_value::Value::KvlistValue(kvs) => Some(AttrValue::Map(
            kvs.values
                .into_iter()
                .filter_map(|kv| {
                    let value = kv.value.and_then(convert_any_value)?;
                    Some((kv.key, value))
                })
                .collect(),
        )),
    }
}

/// Convert an attribute list to a sorted map, counting dropped entries.
fn convert_attributes(attrs: Vec<KeyValue>) -> (AttrMap, usize) {
    let mut map = AttrMap::new();
    let mut dropped = 0usize;
    for kv in attrs {
        match kv.value.and_then(convert_any_value) {
            Some(value) => {
                map.insert(kv.key, value);
            }
            None => {
                let err = TinyOllyError::UnsupportedAttrType(kv.key);
                debug!("dropping attribute: {err}");
                dropped += 1;
            }
        }
    }
    (map, dropped)
}

// ---------------------------------------------------------------------------
// Resource & scope interning
// ---------------------------------------------------------------------------

async fn intern_resource(
    store: &dyn TelemetryStore,
    resource: Option<Resource>,
) -> (ResourceRef, String, usize) {
    let (attributes, dropped) = match resource {
        Some(r) => convert_attributes(r.attributes),
        None => (AttrMap::new(), 0),
    };
    let entry = ResourceEntry { attributes };
    let service_name = entry.service_name().unwrap_or("unknown").to_string();
    let r = store.intern_resource(entry).await;
    (r, service_name, dropped)
}

async fn intern_scope(
    store: &dyn TelemetryStore,
    scope: Option<InstrumentationScope>,
) -> ScopeRef {
    let entry = match scope {
        Some(s) => ScopeEntry {
            name: s.name,
            version: s.version,
        },
        None => ScopeEntry::default(),
    };
    store.intern_scope(entry).await
}

// ---------------------------------------------------------------------------
// Spans
// ---------------------------------------------------------------------------

fn convert_status(status: Option<Status>) -> SpanStatus {
    match status {
        Some(s) => SpanStatus {
            code: StatusCode::from_i32(s.code),
            message: s.message,
        },
        None => SpanStatus::default(),
    }
}

fn convert_span(
    proto: Span,
    resource_ref: ResourceRef,
    scope_ref: ScopeRef,
    service_name: &str,
    dropped_attrs: &mut usize,
) -> Option<SpanRecord> {
    let trace_id = TraceId::from_bytes(&proto.trace_id)?;
    let span_id = SpanId::from_bytes(&proto.span_id)?;
    let parent_span_id = if proto.parent_span_id.is_empty() {
        None
    } else {
        // A malformed parent id invalidates the span; a parent that simply
        // is not stored is fine and resolves as "external" downstream.
        Some(SpanId::from_bytes(&proto.parent_span_id)?)
    };

    if proto.end_time_unix_nano < proto.start_time_unix_nano {
        return None;
    }

    let (attributes, dropped) = convert_attributes(proto.attributes);
    *dropped_attrs += dropped;

    let events = proto
        .events
        .into_iter()
        .map(|e: span::Event| {
            let (attrs, dropped) = convert_attributes(e.attributes);
            *dropped_attrs += dropped;
            SpanEvent {
                time_ns: e.time_unix_nano,
                name: e.name,
                attributes: attrs,
            }
        })
        .collect();

    let links = proto
        .links
        .into_iter()
        .filter_map(|l: span::Link| {
            let trace_id = TraceId::from_bytes(&l.trace_id)?;
            let span_id = SpanId::from_bytes(&l.span_id)?;
            let (attrs, dropped) = convert_attributes(l.attributes);
            *dropped_attrs += dropped;
            Some(SpanLink {
                trace_id,
                span_id,
                attributes: attrs,
            })
        })
        .collect();

    Some(SpanRecord {
        trace_id,
        span_id,
        parent_span_id,
        name: proto.name,
        kind: SpanKind::from_i32(proto.kind),
        start_time_ns: proto.start_time_unix_nano,
        end_time_ns: proto.end_time_unix_nano,
        status: convert_status(proto.status),
        attributes,
        events,
        links,
        resource_ref,
        scope_ref,
        service_name: service_name.to_string(),
    })
}

/// Normalize a batch of `ResourceSpans`.
pub async fn normalize_spans(
    store: &dyn TelemetryStore,
    resource_spans: Vec<ResourceSpans>,
) -> Result<Normalized<SpanRecord>> {
    let mut out = Normalized::default();
    for rs in resource_spans {
        let (resource_ref, service_name, dropped) = intern_resource(store, rs.resource).await;
        out.dropped_attrs += dropped;
        for ss in rs.scope_spans {
            let scope_ref = intern_scope(store, ss.scope).await;
            for span in ss.spans {
                match convert_span(
                    span,
                    resource_ref,
                    scope_ref,
                    &service_name,
                    &mut out.dropped_attrs,
                ) {
                    Some(record) => out.records.push(record),
                    None => out.rejected += 1,
                }
            }
        }
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Logs
// ---------------------------------------------------------------------------

/// Normalize a batch of `ResourceLogs`.
pub async fn normalize_logs(
    store: &dyn TelemetryStore,
    resource_logs: Vec<ResourceLogs>,
) -> Result<Normalized<LogRecord>> {
    let mut out = Normalized::default();
    for rl in resource_logs {
        let (resource_ref, service_name, dropped) = intern_resource(store, rl.resource).await;
        out.dropped_attrs += dropped;
        for sl in rl.scope_logs {
            let scope_ref = intern_scope(store, sl.scope).await;
            for record in sl.log_records {
                // Optional correlation ids: present but malformed ids
                // invalidate the record; absent ids are fine.
                let trace_id = if record.trace_id.is_empty() {
                    None
                } else {
                    match TraceId::from_bytes(&record.trace_id) {
                        Some(id) => Some(id),
                        None => {
                            out.rejected += 1;
                            continue;
                        }
                    }
                };
                let span_id = if record.span_id.is_empty() {
                    None
                } else {
                    SpanId::from_bytes(&record.span_id)
                };

                let (attributes, dropped) = convert_attributes(record.attributes);
                out.dropped_attrs += dropped;

                let body = record
                    .body
                    .and_then(convert_any_value)
                    .unwrap_or(AttrValue::Str(String::new()));

                let severity_number = record.severity_number;
                let severity_text = if record.severity_text.is_empty() {
                    tinyolly_core::severity_text(severity_number).to_string()
                } else {
                    record.severity_text
                };

                out.records.push(LogRecord {
                    timestamp_ns: record.time_unix_nano,
                    severity_number,
                    severity_text,
                    body,
                    attributes,
                    trace_id,
                    span_id,
                    resource_ref,
                    scope_ref,
                    service_name: service_name.clone(),
                });
            }
        }
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

fn convert_exemplar(proto: ExemplarProto) -> Exemplar {
    let value = match proto.value {
        Some(exemplar::Value::AsDouble(d)) => NumberValue::Double(d),
        Some(exemplar::Value::AsInt(i)) => NumberValue::Int(i),
        None => NumberValue::Double(0.0),
    };
    let (filtered_attributes, _) = convert_attributes(proto.filtered_attributes);
    Exemplar {
        timestamp_ns: proto.time_unix_nano,
        value,
        trace_id: TraceId::from_bytes(&proto.trace_id),
        span_id: SpanId::from_bytes(&proto.span_id),
        filtered_attributes,
    }
}

fn number_value(value: Option<number_data_point::Value>) -> NumberValue {
    match value {
        Some(number_data_point::Value::AsDouble(d)) => NumberValue::Double(d),
        Some(number_data_point::Value::AsInt(i)) => NumberValue::Int(i),
        None => NumberValue::Double(0.0),
    }
}

/// Convert one metric into normalized points, one per data point.
fn convert_metric(
    proto: Metric,
    resource_ref: ResourceRef,
    dropped_attrs: &mut usize,
) -> Option<Vec<MetricPointRecord>> {
    let name = proto.name;
    if name.is_empty() {
        return None;
    }

    let mut points = Vec::new();
    let mut push = |meta: MetricMeta,
                    attributes: AttrMap,
                    point: DataPoint,
                    points: &mut Vec<MetricPointRecord>| {
        let fingerprint = fingerprint_attributes(&attributes);
        points.push(MetricPointRecord {
            name: name.clone(),
            meta,
            resource_ref,
            attributes,
            fingerprint,
            point,
        });
    };

    match proto.data? {
        metric::Data::Gauge(gauge) => {
            let meta = MetricMeta {
                kind: MetricKind::Gauge,
                unit: proto.unit,
                description: proto.description,
                temporality: Temporality::Unspecified,
            };
            for dp in gauge.data_points {
                let (attributes, dropped) = convert_attributes(dp.attributes);
                *dropped_attrs += dropped;
                let point = DataPoint {
                    timestamp_ns: dp.time_unix_nano,
                    start_time_ns: dp.start_time_unix_nano,
                    value: PointValue::Number(number_value(dp.value)),
                    exemplars: dp.exemplars.into_iter().map(convert_exemplar).collect(),
                };
                push(meta.clone(), attributes, point, &mut points);
            }
        }
        metric::Data::Sum(sum) => {
            let meta = MetricMeta {
                kind: MetricKind::Sum,
                unit: proto.unit,
                description: proto.description,
                temporality: Temporality::from_i32(sum.aggregation_temporality),
            };
            for dp in sum.data_points {
                let (attributes, dropped) = convert_attributes(dp.attributes);
                *dropped_attrs += dropped;
                let point = DataPoint {
                    timestamp_ns: dp.time_unix_nano,
                    start_time_ns: dp.start_time_unix_nano,
                    value: PointValue::Number(number_value(dp.value)),
                    exemplars: dp.exemplars.into_iter().map(convert_exemplar).collect(),
                };
                push(meta.clone(), attributes, point, &mut points);
            }
        }
        metric::Data::Histogram(histogram) => {
            let meta = MetricMeta {
                kind: MetricKind::Histogram,
                unit: proto.unit,
                description: proto.description,
                temporality: Temporality::from_i32(histogram.aggregation_temporality),
            };
            for dp in histogram.data_points {
                let (attributes, dropped) = convert_attributes(dp.attributes);
                *dropped_attrs += dropped;
                let point = DataPoint {
                    timestamp_ns: dp.time_unix_nano,
                    start_time_ns: dp.start_time_unix_nano,
                    value: PointValue::Histogram(HistogramPayload {
                        count: dp.count,
                        sum: dp.sum.unwrap_or(0.0),
                        bucket_counts: dp.bucket_counts,
                        explicit_bounds: dp.explicit_bounds,
                    }),
                    exemplars: dp.exemplars.into_iter().map(convert_exemplar).collect(),
                };
                push(meta.clone(), attributes, point, &mut points);
            }
        }
        metric::Data::ExponentialHistogram(histogram) => {
            let meta = MetricMeta {
                kind: MetricKind::ExponentialHistogram,
                unit: proto.unit,
                description: proto.description,
                temporality: Temporality::from_i32(histogram.aggregation_temporality),
            };
            for dp in histogram.data_points {
                let (attributes, dropped) = convert_attributes(dp.attributes);
                *dropped_attrs += dropped;
                // Stored in native exponential form; explicit bounds are
                // derived only when a query renders the point.
                let point = DataPoint {
                    timestamp_ns: dp.time_unix_nano,
                    start_time_ns: dp.start_time_unix_nano,
                    value: PointValue::ExpHistogram(ExpHistogramPayload {
                        count: dp.count,
                        sum: dp.sum.unwrap_or(0.0),
                        scale: dp.scale,
                        zero_count: dp.zero_count,
                        positive: dp
                            .positive
                            .map(|b| ExpBuckets {
                                offset: b.offset,
                                bucket_counts: b.bucket_counts,
                            })
                            .unwrap_or_default(),
                        negative: dp
                            .negative
                            .map(|b| ExpBuckets {
                                offset: b.offset,
                                bucket_counts: b.bucket_counts,
                            })
                            .unwrap_or_default(),
                    }),
                    exemplars: dp.exemplars.into_iter().map(convert_exemplar).collect(),
                };
                push(meta.clone(), attributes, point, &mut points);
            }
        }
        metric::Data::Summary(summary) => {
            let meta = MetricMeta {
                kind: MetricKind::Summary,
                unit: proto.unit,
                description: proto.description,
                temporality: Temporality::Unspecified,
            };
            for dp in summary.data_points {
                let (attributes, dropped) = convert_attributes(dp.attributes);
                *dropped_attrs += dropped;
                let point = DataPoint {
                    timestamp_ns: dp.time_unix_nano,
                    start_time_ns: dp.start_time_unix_nano,
                    value: PointValue::Summary(SummaryPayload {
                        count: dp.count,
                        sum: dp.sum,
                        quantiles: dp
                            .quantile_values
                            .into_iter()
                            .map(|q| QuantileValue {
                                quantile: q.quantile,
                                value: q.value,
                            })
                            .collect(),
                    }),
                    exemplars: vec![],
                };
                push(meta.clone(), attributes, point, &mut points);
            }
        }
    }

    Some(points)
}

/// Normalize a batch of `ResourceMetrics`.
pub async fn normalize_metrics(
    store: &dyn TelemetryStore,
    resource_metrics: Vec<ResourceMetrics>,
) -> Result<Normalized<MetricPointRecord>> {
    let mut out = Normalized::default();
    for rm in resource_metrics {
        let (resource_ref, _service, dropped) = intern_resource(store, rm.resource).await;
        out.dropped_attrs += dropped;
        for sm in rm.scope_metrics {
            let _scope_ref = intern_scope(store, sm.scope).await;
            for metric in sm.metrics {
                match convert_metric(metric, resource_ref, &mut out.dropped_attrs) {
                    Some(points) => out.records.extend(points),
                    None => out.rejected += 1,
                }
            }
        }
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry_proto::tonic::common::v1::ArrayValue;
    use opentelemetry_proto::tonic::metrics::v1::{Gauge, NumberDataPoint, ScopeMetrics};
    use opentelemetry_proto::tonic::trace::v1::ScopeSpans;
    use tinyolly_storage::{MemoryStore, StoreConfig};

    fn str_attr(key: &str, value: &str) -> KeyValue {
        KeyValue {
            key: key.to_string(),
            value: Some(AnyValue {
                value: Some(any_value::Value::StringValue(value.to_string())),
            }),
        }
    }

    fn resource(service: &str) -> Resource {
        Resource {
            attributes: vec![str_attr("service.name", service)],
            ..Default::default()
        }
    }

    fn proto_span(trace: u8, span: u8) -> Span {
        Span {
            trace_id: vec![trace; 16],
            span_id: vec![span; 8],
            name: "GET /x".into(),
            kind: 2,
            start_time_unix_nano: 1_000_000_000_000,
            end_time_unix_nano: 1_000_000_500_000,
            status: Some(Status {
                code: 1,
                message: String::new(),
            }),
            ..Default::default()
        }
    }

    fn store() -> MemoryStore {
        MemoryStore::new(StoreConfig::default())
    }

    #[tokio::test]
    async fn spans_are_normalized_with_service_name() {
        let store = store();
        let batch = vec![ResourceSpans {
            resource: Some(resource("frontend")),
            scope_spans: vec![ScopeSpans {
                scope: Some(InstrumentationScope {
                    name: "lib".into(),
                    version: "1.0".into(),
                    ..Default::default()
                }),
                spans: vec![proto_span(1, 1)],
                schema_url: String::new(),
            }],
            schema_url: String::new(),
        }];

        let normalized = normalize_spans(&store, batch).await.unwrap();
        assert_eq!(normalized.records.len(), 1);
        assert_eq!(normalized.rejected, 0);
        let span = &normalized.records[0];
        assert_eq!(span.service_name, "frontend");
        assert_eq!(span.kind, SpanKind::Server);
        assert_eq!(span.status.code, StatusCode::Ok);
        assert_eq!(span.duration_ns(), 500_000);

        // The resource was interned and resolves back.
        let res = store.resource(span.resource_ref).await.unwrap();
        assert_eq!(res.service_name(), Some("frontend"));
    }

    #[tokio::test]
    async fn bad_ids_and_inverted_timestamps_are_rejected() {
        let store = store();
        let mut short_id = proto_span(1, 1);
        short_id.trace_id = vec![1; 4];
        let mut zero_span = proto_span(1, 2);
        zero_span.span_id = vec![0; 8];
        let mut inverted = proto_span(1, 3);
        inverted.start_time_unix_nano = 10;
        inverted.end_time_unix_nano = 5;

        let batch = vec![ResourceSpans {
            resource: Some(resource("svc")),
            scope_spans: vec![ScopeSpans {
                scope: None,
                spans: vec![short_id, zero_span, inverted, proto_span(1, 4)],
                schema_url: String::new(),
            }],
            schema_url: String::new(),
        }];

        let normalized = normalize_spans(&store, batch).await.unwrap();
        assert_eq!(normalized.records.len(), 1);
        assert_eq!(normalized.rejected, 3);
    }

    #[tokio::test]
    async fn missing_resource_maps_to_unknown_service() {
        let store = store();
        let batch = vec![ResourceSpans {
            resource: None,
            scope_spans: vec![ScopeSpans {
                scope: None,
                spans: vec![proto_span(2, 1)],
                schema_url: String::new(),
            }],
            schema_url: String::new(),
        }];
        let normalized = normalize_spans(&store, batch).await.unwrap();
        assert_eq!(normalized.records[0].service_name, "unknown");
    }

    #[tokio::test]
    async fn unset_attribute_values_are_dropped_and_counted() {
        let store = store();
        let mut span = proto_span(1, 1);
        span.attributes = vec![
            str_attr("http.method", "GET"),
            KeyValue {
                key: "broken".into(),
                value: None,
            },
            KeyValue {
                key: "empty".into(),
                value: Some(AnyValue { value: None }),
            },
        ];
        let batch = vec![ResourceSpans {
            resource: Some(resource("svc")),
            scope_spans: vec![ScopeSpans {
                scope: None,
                spans: vec![span],
                schema_url: String::new(),
            }],
            schema_url: String::new(),
        }];

        let normalized = normalize_spans(&store, batch).await.unwrap();
        assert_eq!(normalized.records.len(), 1);
        assert_eq!(normalized.dropped_attrs, 2);
        assert_eq!(normalized.records[0].attributes.len(), 1);
    }

    #[tokio::test]
    async fn array_attributes_convert_recursively() {
        let store = store();
        let mut span = proto_span(1, 1);
        span.attributes = vec![KeyValue {
            key: "tags".into(),
            value: Some(AnyValue {
                value: Some(any_value::Value::ArrayValue(ArrayValue {
                    values: vec![
                        AnyValue {
                            value: Some(any_value::Value::StringValue("a".into())),
                        },
                        AnyValue {
                            value: Some(any_value::Value::IntValue(2)),
                        },
                    ],
                })),
            }),
        }];
        let batch = vec![ResourceSpans {
            resource: Some(resource("svc")),
            scope_spans: vec![ScopeSpans {
                scope: None,
                spans: vec![span],
                schema_url: String::new(),
            }],
            schema_url: String::new(),
        }];
        let normalized = normalize_spans(&store, batch).await.unwrap();
        assert_eq!(
            normalized.records[0].attributes.get("tags"),
            Some(&AttrValue::Array(vec![
                AttrValue::Str("a".into()),
                AttrValue::Int(2)
            ]))
        );
    }

    #[tokio::test]
    async fn logs_map_severity_and_correlation() {
        let store = store();
        let batch = vec![ResourceLogs {
            resource: Some(resource("svc")),
            scope_logs: vec![opentelemetry_proto::tonic::logs::v1::ScopeLogs {
                scope: None,
                log_records: vec![opentelemetry_proto::tonic::logs::v1::LogRecord {
                    time_unix_nano: 42,
                    severity_number: 9,
                    body: Some(AnyValue {
                        value: Some(any_value::Value::StringValue("hi".into())),
                    }),
                    trace_id: vec![1; 16],
                    span_id: vec![2; 8],
                    ..Default::default()
                }],
                schema_url: String::new(),
            }],
            schema_url: String::new(),
        }];

        let normalized = normalize_logs(&store, batch).await.unwrap();
        assert_eq!(normalized.records.len(), 1);
        let log = &normalized.records[0];
        assert_eq!(log.severity_text, "INFO");
        assert_eq!(log.trace_id, Some(TraceId([1; 16])));
        assert_eq!(log.span_id, Some(SpanId([2; 8])));
        assert_eq!(log.body, AttrValue::Str("hi".into()));
    }

    #[tokio::test]
    async fn log_without_correlation_is_kept_blank() {
        let store = store();
        let batch = vec![ResourceLogs {
            resource: None,
            scope_logs: vec![opentelemetry_proto::tonic::logs::v1::ScopeLogs {
                scope: None,
                log_records: vec![opentelemetry_proto::tonic::logs::v1::LogRecord {
                    time_unix_nano: 42,
                    severity_number: 17,
                    severity_text: "ERROR".into(),
                    ..Default::default()
                }],
                schema_url: String::new(),
            }],
            schema_url: String::new(),
        }];
        let normalized = normalize_logs(&store, batch).await.unwrap();
        let log = &normalized.records[0];
        assert!(log.trace_id.is_none());
        assert!(log.span_id.is_none());
        assert_eq!(log.severity_text, "ERROR");
    }

    #[tokio::test]
    async fn gauge_metrics_produce_fingerprinted_points() {
        let store = store();
        let batch = vec![ResourceMetrics {
            resource: Some(resource("svc")),
            scope_metrics: vec![ScopeMetrics {
                scope: None,
                metrics: vec![Metric {
                    name: "cpu.usage".into(),
                    unit: "%".into(),
                    description: "cpu".into(),
                    data: Some(metric::Data::Gauge(Gauge {
                        data_points: vec![
                            NumberDataPoint {
                                attributes: vec![str_attr("core", "0")],
                                time_unix_nano: 100,
                                value: Some(number_data_point::Value::AsDouble(0.5)),
                                ..Default::default()
                            },
                            NumberDataPoint {
                                attributes: vec![str_attr("core", "1")],
                                time_unix_nano: 100,
                                value: Some(number_data_point::Value::AsInt(2)),
                                ..Default::default()
                            },
                        ],
                    })),
                    ..Default::default()
                }],
                schema_url: String::new(),
            }],
            schema_url: String::new(),
        }];

        let normalized = normalize_metrics(&store, batch).await.unwrap();
        assert_eq!(normalized.records.len(), 2);
        assert_eq!(normalized.records[0].meta.kind, MetricKind::Gauge);
        // Distinct attribute sets produce distinct series fingerprints.
        assert_ne!(
            normalized.records[0].fingerprint,
            normalized.records[1].fingerprint
        );
    }

    #[tokio::test]
    async fn nameless_metric_is_rejected() {
        let store = store();
        let batch = vec![ResourceMetrics {
            resource: None,
            scope_metrics: vec![ScopeMetrics {
                scope: None,
                metrics: vec![Metric::default()],
                schema_url: String::new(),
            }],
            schema_url: String::new(),
        }];
        let normalized = normalize_metrics(&store, batch).await.unwrap();
        assert!(normalized.records.is_empty());
        assert_eq!(normalized.rejected, 1);
    }

    #[tokio::test]
    async fn exemplars_carry_trace_references() {
        let store = store();
        let batch = vec![ResourceMetrics {
            resource: None,
            scope_metrics: vec![ScopeMetrics {
                scope: None,
                metrics: vec![Metric {
                    name: "latency".into(),
                    data: Some(metric::Data::Gauge(Gauge {
                        data_points: vec![NumberDataPoint {
                            time_unix_nano: 100,
                            value: Some(number_data_point::Value::AsDouble(1.0)),
                            exemplars: vec![ExemplarProto {
                                time_unix_nano: 99,
                                trace_id: vec![7; 16],
                                span_id: vec![8; 8],
                                value: Some(exemplar::Value::AsDouble(1.5)),
                                ..Default::default()
                            }],
                            ..Default::default()
                        }],
                    })),
                    ..Default::default()
                }],
                schema_url: String::new(),
            }],
            schema_url: String::new(),
        }];

        let normalized = normalize_metrics(&store, batch).await.unwrap();
        let exemplars = &normalized.records[0].point.exemplars;
        assert_eq!(exemplars.len(), 1);
        assert_eq!(exemplars[0].trace_id, Some(TraceId([7; 16])));
        assert_eq!(exemplars[0].span_id, Some(SpanId([8; 8])));
    }
}
