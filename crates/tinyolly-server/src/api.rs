//! Query API.
//!
//! Read-only HTTP JSON surface consumed by the web UI: traces, spans, logs,
//! the metric catalog and series, the aggregated service views, and server
//! statistics. Identifiers are lowercase hex strings and timestamps are
//! nanoseconds since the Unix epoch.
//!
//! The server's own telemetry (resource `service.name` equal to the
//! configured self identity) is filtered out of every response here, so the
//! backend observing itself cannot amplify its own traffic into the UI.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tinyolly_core::{
    attrs_to_json, DataPoint, LogFilter, LogRecord, PointValue, SeriesFilter, SpanKind,
    SpanRecord, TinyOllyError, TraceId,
};

use crate::aggregate;
use crate::metrics::metrics_handler;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Pagination defaults
// ---------------------------------------------------------------------------

const DEFAULT_TRACE_LIMIT: usize = 50;
const DEFAULT_SPAN_LIMIT: usize = 50;
const DEFAULT_LOG_LIMIT: usize = 100;
const DEFAULT_SERVICE_MAP_LIMIT: usize = 500;
const MAX_LIMIT: usize = 1000;

/// Default lookback of the metric series query when no range is given.
const DEFAULT_METRIC_WINDOW_NS: u64 = 600 * 1_000_000_000;

/// How long a computed service map is reused before rescanning.
const SERVICE_MAP_CACHE: Duration = Duration::from_secs(5);

fn clamp_limit(limit: Option<usize>, default: usize) -> usize {
    limit.unwrap_or(default).min(MAX_LIMIT)
}

// ---------------------------------------------------------------------------
// Error body
// ---------------------------------------------------------------------------

/// Map a core error to the HTTP status surface of the query API.
fn error_response(err: TinyOllyError) -> Response {
    let status = match &err {
        TinyOllyError::NotFound => StatusCode::NOT_FOUND,
        TinyOllyError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        TinyOllyError::OutOfCapacity => StatusCode::SERVICE_UNAVAILABLE,
        TinyOllyError::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(json!({ "error": err.to_string() }))).into_response()
}

// ---------------------------------------------------------------------------
// JSON rendering
// ---------------------------------------------------------------------------

fn kind_label(kind: SpanKind) -> &'static str {
    match kind {
        SpanKind::Unspecified => "unspecified",
        SpanKind::Internal => "internal",
        SpanKind::Server => "server",
        SpanKind::Client => "client",
        SpanKind::Producer => "producer",
        SpanKind::Consumer => "consumer",
    }
}

fn span_to_json(span: &SpanRecord) -> Value {
    json!({
        "trace_id": span.trace_id.to_string(),
        "span_id": span.span_id.to_string(),
        "parent_span_id": span.parent_span_id.map(|p| p.to_string()),
        "name": span.name,
        "kind": kind_label(span.kind),
        "start_time_unix_nano": span.start_time_ns,
        "end_time_unix_nano": span.end_time_ns,
        "duration_ms": span.duration_ns() as f64 / 1_000_000.0,
        "status": span.status,
        "service_name": span.service_name,
        "attributes": attrs_to_json(&span.attributes),
        "events": span.events.iter().map(|e| json!({
            "time_unix_nano": e.time_ns,
            "name": e.name,
            "attributes": attrs_to_json(&e.attributes),
        })).collect::<Vec<_>>(),
        "links": span.links.iter().map(|l| json!({
            "trace_id": l.trace_id.to_string(),
            "span_id": l.span_id.to_string(),
            "attributes": attrs_to_json(&l.attributes),
        })).collect::<Vec<_>>(),
    })
}

fn log_to_json(log: &LogRecord) -> Value {
    json!({
        "timestamp": log.timestamp_ns,
        "severity": log.severity_text,
        "severity_number": log.severity_number,
        "body": log.body.to_json(),
        "trace_id": log.trace_id.map(|t| t.to_string()),
        "span_id": log.span_id.map(|s| s.to_string()),
        "service_name": log.service_name,
        "attributes": attrs_to_json(&log.attributes),
    })
}

fn point_to_json(point: &DataPoint) -> Value {
    let mut obj = json!({ "timestamp": point.timestamp_ns });
    match &point.value {
        PointValue::Number(n) => {
            obj["value"] = json!(n.as_f64());
        }
        PointValue::Histogram(h) => {
            obj["value"] = json!(h.sum);
            obj["histogram"] = json!({
                "count": h.count,
                "sum": h.sum,
                "bucketCounts": h.bucket_counts,
                "explicitBounds": h.explicit_bounds,
            });
        }
        // Exponential histograms are stored natively and converted to
        // explicit bounds only here, at render time.
        PointValue::ExpHistogram(e) => {
            let h = e.to_explicit();
            obj["value"] = json!(h.sum);
            obj["histogram"] = json!({
                "count": h.count,
                "sum": h.sum,
                "bucketCounts": h.bucket_counts,
                "explicitBounds": h.explicit_bounds,
            });
        }
        PointValue::Summary(s) => {
            obj["value"] = json!(s.sum);
            obj["summary"] = json!({
                "count": s.count,
                "sum": s.sum,
                "quantileValues": s.quantiles.iter().map(|q| json!({
                    "quantile": q.quantile,
                    "value": q.value,
                })).collect::<Vec<_>>(),
            });
        }
    }
    if !point.exemplars.is_empty() {
        obj["exemplars"] = Value::Array(
            point
                .exemplars
                .iter()
                .map(|ex| {
                    json!({
                        "timestamp": ex.timestamp_ns,
                        "value": ex.value.as_f64(),
                        "traceId": ex.trace_id.map(|t| t.to_string()),
                        "spanId": ex.span_id.map(|s| s.to_string()),
                        "filteredAttributes": attrs_to_json(&ex.filtered_attributes),
                    })
                })
                .collect(),
        );
    }
    obj
}

// ---------------------------------------------------------------------------
// Traces
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct LimitParams {
    limit: Option<usize>,
}

/// `GET /api/traces` — recent trace summaries, newest first.
async fn list_traces(
    State(state): State<Arc<AppState>>,
    Query(params): Query<LimitParams>,
) -> Response {
    let limit = clamp_limit(params.limit, DEFAULT_TRACE_LIMIT);
    let trace_ids = match state.store.recent_traces(limit * 2).await {
        Ok(ids) => ids,
        Err(e) => return error_response(e),
    };

    let mut summaries = Vec::with_capacity(limit);
    for trace_id in trace_ids {
        if summaries.len() >= limit {
            break;
        }
        let spans = match state.store.trace_spans(trace_id).await {
            Ok(spans) => spans,
            Err(e) => return error_response(e),
        };
        let visible: Vec<SpanRecord> = spans
            .into_iter()
            .filter(|s| s.service_name != state.config.self_service_name)
            .collect();
        if let Some(summary) = aggregate::trace_summary(&visible) {
            summaries.push(summary);
        }
    }
    Json(summaries).into_response()
}

/// `GET /api/traces/{id}` — the full trace with spans ordered by start time.
async fn get_trace(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Response {
    let trace_id: TraceId = match id.parse() {
        Ok(id) => id,
        Err(_) => {
            return error_response(TinyOllyError::InvalidInput(
                "malformed trace id".to_string(),
            ))
        }
    };
    let spans = match state.store.trace_spans(trace_id).await {
        Ok(spans) => spans,
        Err(e) => return error_response(e),
    };
    let visible: Vec<SpanRecord> = spans
        .into_iter()
        .filter(|s| s.service_name != state.config.self_service_name)
        .collect();
    if visible.is_empty() {
        return error_response(TinyOllyError::NotFound);
    }
    Json(json!({
        "trace_id": trace_id.to_string(),
        "span_count": visible.len(),
        "spans": visible.iter().map(span_to_json).collect::<Vec<_>>(),
    }))
    .into_response()
}

// ---------------------------------------------------------------------------
// Spans
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct SpanParams {
    service: Option<String>,
    limit: Option<usize>,
}

/// `GET /api/spans` — recent spans, optionally filtered by service.
async fn list_spans(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SpanParams>,
) -> Response {
    let limit = clamp_limit(params.limit, DEFAULT_SPAN_LIMIT);
    if params.service.as_deref() == Some(state.config.self_service_name.as_str()) {
        return Json(Vec::<Value>::new()).into_response();
    }
    // Over-fetch when unfiltered so the self-filter cannot starve the page.
    let fetch = if params.service.is_some() { limit } else { limit * 2 };
    match state.store.recent_spans(params.service.as_deref(), fetch).await {
        Ok(spans) => {
            let body: Vec<Value> = spans
                .iter()
                .filter(|s| s.service_name != state.config.self_service_name)
                .take(limit)
                .map(span_to_json)
                .collect();
            Json(body).into_response()
        }
        Err(e) => error_response(e),
    }
}

// ---------------------------------------------------------------------------
// Logs
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct LogParams {
    trace_id: Option<String>,
    severity: Option<String>,
    limit: Option<usize>,
}

/// `GET /api/logs` — recent logs with optional trace/severity filters.
async fn list_logs(
    State(state): State<Arc<AppState>>,
    Query(params): Query<LogParams>,
) -> Response {
    let trace_id = match params.trace_id.as_deref() {
        Some(raw) => match raw.parse::<TraceId>() {
            Ok(id) => Some(id),
            Err(_) => {
                return error_response(TinyOllyError::InvalidInput(
                    "malformed trace id".to_string(),
                ))
            }
        },
        None => None,
    };
    let filter = LogFilter {
        trace_id,
        severity: params.severity,
        limit: clamp_limit(params.limit, DEFAULT_LOG_LIMIT),
    };
    match state.store.logs(filter).await {
        Ok(logs) => {
            let body: Vec<Value> = logs
                .iter()
                .filter(|l| l.service_name != state.config.self_service_name)
                .map(log_to_json)
                .collect();
            Json(body).into_response()
        }
        Err(e) => error_response(e),
    }
}

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

/// `GET /api/metrics` — the metric catalog with per-metric series counts.
async fn list_metrics(State(state): State<Arc<AppState>>) -> Response {
    let names = match state.store.metric_names().await {
        Ok(names) => names,
        Err(e) => return error_response(e),
    };

    let mut out = Vec::with_capacity(names.len());
    for name in names {
        let meta = match state.store.metric_meta(&name).await {
            Ok(Some(meta)) => meta,
            Ok(None) => continue,
            Err(e) => return error_response(e),
        };
        let summaries = match state.store.series_summaries(&name).await {
            Ok(s) => s,
            Err(e) => return error_response(e),
        };
        let resource_count = summaries
            .iter()
            .map(|s| s.resource_ref)
            .collect::<std::collections::BTreeSet<_>>()
            .len();
        out.push(json!({
            "name": name,
            "type": meta.kind.as_str(),
            "unit": meta.unit,
            "description": meta.description,
            "temporality": meta.temporality.as_str(),
            "resource_count": resource_count,
            "attribute_combinations": summaries.len(),
        }));
    }
    Json(out).into_response()
}

/// `GET /api/metrics/{name}` — series for one metric.
///
/// `resource.*` and `attribute.*` query parameters filter by resource and
/// datapoint attributes; `start`/`end` bound the range in nanoseconds,
/// defaulting to the last ten minutes.
async fn get_metric(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Query(params): Query<BTreeMap<String, String>>,
) -> Response {
    let meta = match state.store.metric_meta(&name).await {
        Ok(Some(meta)) => meta,
        Ok(None) => return error_response(TinyOllyError::NotFound),
        Err(e) => return error_response(e),
    };

    let now = AppState::now_ns();
    let start = params.get("start").and_then(|v| v.parse().ok());
    let end = params.get("end").and_then(|v| v.parse().ok());
    let mut resource = BTreeMap::new();
    let mut attributes = BTreeMap::new();
    for (key, value) in params {
        if let Some(stripped) = key.strip_prefix("resource.") {
            resource.insert(stripped.to_string(), value);
        } else if let Some(stripped) = key.strip_prefix("attribute.") {
            attributes.insert(stripped.to_string(), value);
        }
    }
    let filter = SeriesFilter {
        resource,
        attributes,
        start_ns: start.unwrap_or_else(|| now.saturating_sub(DEFAULT_METRIC_WINDOW_NS)),
        end_ns: end.unwrap_or(now),
    };

    match state.store.metric_series(&name, &filter).await {
        Ok(series) => Json(json!({
            "name": name,
            "type": meta.kind.as_str(),
            "unit": meta.unit,
            "description": meta.description,
            "series": series.iter().map(|s| json!({
                "resource": attrs_to_json(&s.resource),
                "attributes": attrs_to_json(&s.attributes),
                "datapoints": s.points.iter().map(point_to_json).collect::<Vec<_>>(),
            })).collect::<Vec<_>>(),
        }))
        .into_response(),
        Err(e) => error_response(e),
    }
}

/// `GET /api/metrics/{name}/cardinality` — label cardinality analysis.
async fn get_metric_cardinality(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Response {
    match state.store.metric_meta(&name).await {
        Ok(Some(_)) => {}
        Ok(None) => return error_response(TinyOllyError::NotFound),
        Err(e) => return error_response(e),
    }
    match aggregate::cardinality(&state, &name).await {
        Ok(report) => Json(report).into_response(),
        Err(e) => error_response(e),
    }
}

// ---------------------------------------------------------------------------
// Service views
// ---------------------------------------------------------------------------

/// `GET /api/service-catalog` — per-service RED metrics.
async fn service_catalog(State(state): State<Arc<AppState>>) -> Response {
    match aggregate::service_catalog(&state).await {
        Ok(catalog) => Json(catalog).into_response(),
        Err(e) => error_response(e),
    }
}

/// `GET /api/service-map` — the service dependency graph, briefly cached
/// because it rescans many traces.
async fn service_map(
    State(state): State<Arc<AppState>>,
    Query(params): Query<LimitParams>,
) -> Response {
    let limit = clamp_limit(params.limit, DEFAULT_SERVICE_MAP_LIMIT);

    {
        let cache = state.service_map_cache.lock().await;
        if let Some((at, value)) = cache.as_ref() {
            if at.elapsed() < SERVICE_MAP_CACHE {
                return Json(value.clone()).into_response();
            }
        }
    }

    match aggregate::service_map(&state, limit).await {
        Ok(map) => {
            let value = serde_json::to_value(&map).unwrap_or_default();
            *state.service_map_cache.lock().await = Some((Instant::now(), value.clone()));
            Json(value).into_response()
        }
        Err(e) => error_response(e),
    }
}

// ---------------------------------------------------------------------------
// Stats & health
// ---------------------------------------------------------------------------

/// `GET /api/stats` — counts, cardinality usage, uptime.
async fn stats(State(state): State<Arc<AppState>>) -> Response {
    match state.store.stats().await {
        Ok(stats) => Json(json!({
            "traces": stats.traces,
            "spans": stats.spans,
            "logs": stats.logs,
            "metrics": stats.metrics,
            "metrics_max": stats.metrics_max,
            "metrics_dropped": stats.metrics_dropped,
            "dropped_metric_names": stats.dropped_metric_names,
            "store_bytes": stats.store_bytes,
            "uptime_seconds": state.started_at.elapsed().as_secs(),
        }))
        .into_response(),
        Err(e) => error_response(e),
    }
}

/// `GET /health` — liveness.
async fn health(State(state): State<Arc<AppState>>) -> Response {
    match state.store.health_check().await {
        Ok(()) => Json(json!({ "status": "healthy" })).into_response(),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "unhealthy", "error": e.to_string() })),
        )
            .into_response(),
    }
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Routes for the query surface.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/traces", get(list_traces))
        .route("/api/traces/:id", get(get_trace))
        .route("/api/spans", get(list_spans))
        .route("/api/logs", get(list_logs))
        .route("/api/metrics", get(list_metrics))
        .route("/api/metrics/:name", get(get_metric))
        .route("/api/metrics/:name/cardinality", get(get_metric_cardinality))
        .route("/api/service-catalog", get(service_catalog))
        .route("/api/service-map", get(service_map))
        .route("/api/stats", get(stats))
        .route("/health", get(health))
        .route("/metrics", get(metrics_handler))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tinyolly_core::{
        AttrMap, AttrValue, Exemplar, HistogramPayload, NumberValue, SpanId, SpanStatus,
        StatusCode as CoreStatus,
    };

    fn sample_span() -> SpanRecord {
        let mut attributes = AttrMap::new();
        attributes.insert("http.method".into(), AttrValue::Str("GET".into()));
        SpanRecord {
            trace_id: TraceId([1; 16]),
            span_id: SpanId([2; 8]),
            parent_span_id: None,
            name: "GET /x".into(),
            kind: SpanKind::Server,
            start_time_ns: 1_000_000_000_000,
            end_time_ns: 1_000_000_500_000,
            status: SpanStatus {
                code: CoreStatus::Ok,
                message: String::new(),
            },
            attributes,
            events: vec![],
            links: vec![],
            resource_ref: 0,
            scope_ref: 0,
            service_name: "frontend".into(),
        }
    }

    #[test]
    fn span_json_uses_hex_ids_and_ms_duration() {
        let value = span_to_json(&sample_span());
        assert_eq!(value["trace_id"], "01010101010101010101010101010101");
        assert_eq!(value["span_id"], "0202020202020202");
        assert_eq!(value["parent_span_id"], Value::Null);
        assert_eq!(value["kind"], "server");
        assert!((value["duration_ms"].as_f64().unwrap() - 0.5).abs() < 1e-9);
        assert_eq!(value["attributes"]["http.method"], "GET");
    }

    #[test]
    fn log_json_carries_correlation_ids() {
        let log = LogRecord {
            timestamp_ns: 42,
            severity_number: 9,
            severity_text: "INFO".into(),
            body: AttrValue::Str("hi".into()),
            attributes: AttrMap::new(),
            trace_id: Some(TraceId([1; 16])),
            span_id: Some(SpanId([2; 8])),
            resource_ref: 0,
            scope_ref: 0,
            service_name: "svc".into(),
        };
        let value = log_to_json(&log);
        assert_eq!(value["severity"], "INFO");
        assert_eq!(value["body"], "hi");
        assert_eq!(value["trace_id"], "01010101010101010101010101010101");
    }

    #[test]
    fn number_point_renders_scalar_value() {
        let point = DataPoint {
            timestamp_ns: 7,
            start_time_ns: 0,
            value: PointValue::Number(NumberValue::Int(3)),
            exemplars: vec![],
        };
        let value = point_to_json(&point);
        assert_eq!(value["timestamp"], 7);
        assert_eq!(value["value"], 3.0);
        assert!(value.get("exemplars").is_none());
    }

    #[test]
    fn histogram_point_renders_buckets_and_exemplars() {
        let point = DataPoint {
            timestamp_ns: 7,
            start_time_ns: 0,
            value: PointValue::Histogram(HistogramPayload {
                count: 10,
                sum: 55.0,
                bucket_counts: vec![4, 3, 3],
                explicit_bounds: vec![1.0, 5.0],
            }),
            exemplars: vec![Exemplar {
                timestamp_ns: 6,
                value: NumberValue::Double(2.5),
                trace_id: Some(TraceId([9; 16])),
                span_id: None,
                filtered_attributes: AttrMap::new(),
            }],
        };
        let value = point_to_json(&point);
        assert_eq!(value["histogram"]["count"], 10);
        assert_eq!(value["histogram"]["bucketCounts"], json!([4, 3, 3]));
        assert_eq!(value["exemplars"][0]["value"], 2.5);
        assert_eq!(
            value["exemplars"][0]["traceId"],
            "09090909090909090909090909090909"
        );
    }

    #[test]
    fn limits_are_clamped() {
        assert_eq!(clamp_limit(None, 50), 50);
        assert_eq!(clamp_limit(Some(10), 50), 10);
        assert_eq!(clamp_limit(Some(10_000), 50), MAX_LIMIT);
    }
}
