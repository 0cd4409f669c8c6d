//! Aggregation engine.
//!
//! Derives the service catalog (RED metrics), the service dependency map,
//! and per-metric cardinality analyses on demand from stored records. All
//! views stream the relevant indexes under an explicit scan limit rather
//! than materializing the full store.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tinyolly_core::{
    PointValue, Result, SeriesFilter, SpanId, SpanRecord, TraceSummary,
};

use crate::state::AppState;

/// How many recent spans the service catalog scans.
const CATALOG_SPAN_SCAN: usize = 1000;

/// Metric emitted by the collector's spanmetrics connector; its histogram
/// buckets, when present, are preferred over raw span samples for
/// percentiles.
const SPANMETRICS_DURATION: &str = "traces.span.metrics.duration";

/// Window of spanmetrics data considered for RED metrics.
const RED_WINDOW_NS: u64 = 60 * 1_000_000_000;

/// A series is active when it has a point within the last hour.
const ACTIVE_SERIES_WINDOW_NS: u64 = 3600 * 1_000_000_000;

// ---------------------------------------------------------------------------
// Percentiles
// ---------------------------------------------------------------------------

/// Percentile over sorted samples, linearly interpolated between ranks.
pub fn percentile_from_sorted(sorted: &[f64], p: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let rank = (p / 100.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    if lo == hi {
        Some(sorted[lo])
    } else {
        let fraction = rank - lo as f64;
        Some(sorted[lo] + fraction * (sorted[hi] - sorted[lo]))
    }
}

/// Percentile over histogram buckets with linear interpolation inside the
/// bucket that crosses the target rank. `counts` has one more entry than
/// `bounds` (the trailing +Inf bucket), per the OTLP convention; a rank
/// landing in the +Inf bucket clamps to the last finite bound.
pub fn percentile_from_buckets(counts: &[u64], bounds: &[f64], p: f64) -> Option<f64> {
    let total: u64 = counts.iter().sum();
    if total == 0 || bounds.is_empty() {
        return None;
    }
    let rank = (p / 100.0) * total as f64;
    let mut cumulative = 0f64;
    let mut lower = 0f64;
    for (i, &count) in counts.iter().enumerate() {
        let upper = match bounds.get(i) {
            Some(&b) => b,
            None => return Some(lower),
        };
        let next = cumulative + count as f64;
        if next >= rank && count > 0 {
            let fraction = (rank - cumulative) / count as f64;
            return Some(lower + fraction * (upper - lower));
        }
        cumulative = next;
        lower = upper;
    }
    Some(lower)
}

// ---------------------------------------------------------------------------
// Trace summaries
// ---------------------------------------------------------------------------

/// Build the summary view of a trace from its member spans.
///
/// The root is the earliest span whose parent is absent or not part of the
/// trace.
pub fn trace_summary(spans: &[SpanRecord]) -> Option<TraceSummary> {
    let first = spans.first()?;
    let member_ids: BTreeSet<SpanId> = spans.iter().map(|s| s.span_id).collect();

    let root = spans
        .iter()
        .filter(|s| match s.parent_span_id {
            None => true,
            Some(parent) => !member_ids.contains(&parent),
        })
        .min_by_key(|s| s.start_time_ns)
        .unwrap_or(first);

    let min_start = spans.iter().map(|s| s.start_time_ns).min().unwrap_or(0);
    let max_end = spans.iter().map(|s| s.end_time_ns).max().unwrap_or(0);
    let duration_ns = max_end.saturating_sub(min_start);

    Some(TraceSummary {
        trace_id: first.trace_id,
        span_count: spans.len(),
        duration_ms: duration_ns as f64 / 1_000_000.0,
        start_time: min_start,
        root_span_name: root.name.clone(),
        root_span_method: root
            .attr_str(&["http.method", "http.request.method"])
            .map(str::to_string),
        root_span_route: root
            .attr_str(&["http.route", "http.target", "url.path"])
            .map(str::to_string),
        root_span_status: root.status.clone(),
        service_name: root.service_name.clone(),
    })
}

// ---------------------------------------------------------------------------
// Service catalog
// ---------------------------------------------------------------------------

/// One service's catalog entry with RED metrics.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceCatalogEntry {
    pub name: String,
    pub span_count: usize,
    pub trace_count: usize,
    pub first_seen: u64,
    pub last_seen: u64,
    /// Requests per second over the observed window.
    pub rate: Option<f64>,
    /// Percentage of spans with error status.
    pub error_rate: Option<f64>,
    pub duration_p50: Option<f64>,
    pub duration_p95: Option<f64>,
    pub duration_p99: Option<f64>,
}

struct ServiceAccumulator {
    span_count: usize,
    trace_ids: BTreeSet<tinyolly_core::TraceId>,
    first_seen: u64,
    last_seen: u64,
    error_count: usize,
    durations_ms: Vec<f64>,
}

/// Compute the service catalog from recent spans, preferring spanmetrics
/// histograms for percentiles when the collector exports them.
pub async fn service_catalog(state: &AppState) -> Result<Vec<ServiceCatalogEntry>> {
    let spans = state.store.recent_spans(None, CATALOG_SPAN_SCAN).await?;

    let mut services: HashMap<String, ServiceAccumulator> = HashMap::new();
    for span in &spans {
        // The server's own telemetry is never surfaced.
        if span.service_name == state.config.self_service_name {
            continue;
        }
        let acc = services
            .entry(span.service_name.clone())
            .or_insert_with(|| ServiceAccumulator {
                span_count: 0,
                trace_ids: BTreeSet::new(),
                first_seen: span.start_time_ns,
                last_seen: span.start_time_ns,
                error_count: 0,
                durations_ms: Vec::new(),
            });
        acc.span_count += 1;
        acc.trace_ids.insert(span.trace_id);
        acc.first_seen = acc.first_seen.min(span.start_time_ns);
        acc.last_seen = acc.last_seen.max(span.start_time_ns);
        if span.is_error() {
            acc.error_count += 1;
        }
        acc.durations_ms.push(span.duration_ns() as f64 / 1_000_000.0);
    }

    let mut out = Vec::with_capacity(services.len());
    for (name, mut acc) in services {
        let window_secs =
            ((acc.last_seen.saturating_sub(acc.first_seen)) as f64 / 1e9).max(1.0);
        let rate = Some(acc.span_count as f64 / window_secs);
        let error_rate = if acc.span_count > 0 {
            Some((acc.error_count as f64 / acc.span_count as f64) * 100.0)
        } else {
            None
        };

        let (p50, p95, p99) = match spanmetrics_percentiles(state, &name).await {
            Some(percentiles) => percentiles,
            None => {
                acc.durations_ms
                    .sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
                (
                    percentile_from_sorted(&acc.durations_ms, 50.0),
                    percentile_from_sorted(&acc.durations_ms, 95.0),
                    percentile_from_sorted(&acc.durations_ms, 99.0),
                )
            }
        };

        out.push(ServiceCatalogEntry {
            name,
            span_count: acc.span_count,
            trace_count: acc.trace_ids.len(),
            first_seen: acc.first_seen,
            last_seen: acc.last_seen,
            rate,
            error_rate,
            duration_p50: p50,
            duration_p95: p95,
            duration_p99: p99,
        });
    }
    out.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(out)
}

/// Aggregate recent spanmetrics duration histograms for one service.
///
/// Returns `None` when the collector does not export the spanmetrics
/// connector, in which case percentiles fall back to span samples.
async fn spanmetrics_percentiles(
    state: &AppState,
    service: &str,
) -> Option<(Option<f64>, Option<f64>, Option<f64>)> {
    state
        .store
        .metric_meta(SPANMETRICS_DURATION)
        .await
        .ok()
        .flatten()?;

    let now = AppState::now_ns();
    let mut resource = BTreeMap::new();
    resource.insert("service.name".to_string(), service.to_string());
    let filter = SeriesFilter {
        resource,
        attributes: BTreeMap::new(),
        start_ns: now.saturating_sub(RED_WINDOW_NS),
        end_ns: now,
    };
    let series = state
        .store
        .metric_series(SPANMETRICS_DURATION, &filter)
        .await
        .ok()?;
    if series.is_empty() {
        return None;
    }

    // Sum the latest histogram of each series; bounds are assumed identical
    // across series of one metric, which holds for spanmetrics output.
    let mut bounds: Vec<f64> = Vec::new();
    let mut counts: Vec<u64> = Vec::new();
    for s in &series {
        let histogram = s.points.iter().rev().find_map(|p| match &p.value {
            PointValue::Histogram(h) => Some(h.clone()),
            PointValue::ExpHistogram(e) => Some(e.to_explicit()),
            _ => None,
        })?;
        if bounds.is_empty() {
            bounds = histogram.explicit_bounds.clone();
            counts = vec![0; histogram.bucket_counts.len()];
        }
        if histogram.bucket_counts.len() == counts.len() {
            for (total, c) in counts.iter_mut().zip(histogram.bucket_counts.iter()) {
                *total += c;
            }
        }
    }

    Some((
        percentile_from_buckets(&counts, &bounds, 50.0),
        percentile_from_buckets(&counts, &bounds, 95.0),
        percentile_from_buckets(&counts, &bounds, 99.0),
    ))
}

// ---------------------------------------------------------------------------
// Service map
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct ServiceMapNode {
    pub id: String,
    pub label: String,
    #[serde(rename = "type")]
    pub node_type: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceMapEdge {
    pub source: String,
    pub target: String,
    pub call_count: u64,
    pub p95_ms: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceMap {
    pub nodes: Vec<ServiceMapNode>,
    pub edges: Vec<ServiceMapEdge>,
}

#[derive(Default)]
struct EdgeAccumulator {
    count: u64,
    durations_ms: Vec<f64>,
}

/// Build the service dependency graph from recent traces.
///
/// An edge `A -> B` exists when a span in service `B` has a parent span in
/// service `A`; a parent that is not stored counts as external and produces
/// no edge. Spans carrying `db.system` or `messaging.system` additionally
/// produce synthetic database/messaging target nodes, so leaf dependencies
/// show up even though they emit no telemetry of their own.
pub async fn service_map(state: &AppState, limit: usize) -> Result<ServiceMap> {
    let trace_ids = state.store.recent_traces(limit).await?;

    let mut node_types: BTreeMap<String, Option<String>> = BTreeMap::new();
    let mut edges: HashMap<(String, String), EdgeAccumulator> = HashMap::new();

    for trace_id in trace_ids {
        let spans = state.store.trace_spans(trace_id).await?;
        if spans.is_empty() {
            continue;
        }
        let by_id: HashMap<SpanId, &SpanRecord> =
            spans.iter().map(|s| (s.span_id, s)).collect();

        for span in &spans {
            let service = &span.service_name;
            if service == &state.config.self_service_name || service == "unknown" {
                continue;
            }
            node_types.entry(service.clone()).or_insert(None);

            let duration_ms = span.duration_ns() as f64 / 1_000_000.0;

            // Synthetic leaf nodes for database and messaging calls.
            if let Some(db_system) = span.attr_str(&["db.system"]) {
                let target = span
                    .attr_str(&["db.name"])
                    .unwrap_or(db_system)
                    .to_string();
                node_types.insert(target.clone(), Some("database".to_string()));
                let acc = edges.entry((service.clone(), target)).or_default();
                acc.count += 1;
                acc.durations_ms.push(duration_ms);
            }
            if let Some(messaging) = span.attr_str(&["messaging.system"]) {
                let target = span
                    .attr_str(&["messaging.destination", "messaging.destination.name"])
                    .unwrap_or(messaging)
                    .to_string();
                node_types.insert(target.clone(), Some("messaging".to_string()));
                let acc = edges.entry((service.clone(), target)).or_default();
                acc.count += 1;
                acc.durations_ms.push(duration_ms);
            }

            // Service-to-service edge via the parent span.
            if let Some(parent_id) = span.parent_span_id {
                if let Some(parent) = by_id.get(&parent_id) {
                    let parent_service = &parent.service_name;
                    if parent_service != service
                        && parent_service != "unknown"
                        && parent_service != &state.config.self_service_name
                    {
                        let acc = edges
                            .entry((parent_service.clone(), service.clone()))
                            .or_default();
                        acc.count += 1;
                        acc.durations_ms.push(duration_ms);
                    }
                }
            }
        }
    }

    // Infer node types from edge degrees; explicitly typed synthetic nodes
    // keep their type.
    let mut incoming: BTreeMap<&String, u64> = BTreeMap::new();
    let mut outgoing: BTreeMap<&String, u64> = BTreeMap::new();
    for (source, target) in edges.keys() {
        *outgoing.entry(source).or_default() += 1;
        *incoming.entry(target).or_default() += 1;
    }

    let nodes = node_types
        .iter()
        .map(|(name, explicit)| {
            let node_type = match explicit {
                Some(t) => t.clone(),
                None => {
                    let has_in = incoming.contains_key(name);
                    let has_out = outgoing.contains_key(name);
                    match (has_in, has_out) {
                        (false, true) => "client".to_string(),
                        (true, false) => "external".to_string(),
                        (true, true) => "server".to_string(),
                        (false, false) => "isolated".to_string(),
                    }
                }
            };
            ServiceMapNode {
                id: name.clone(),
                label: name.clone(),
                node_type,
            }
        })
        .collect();

    let mut edge_list: Vec<ServiceMapEdge> = edges
        .into_iter()
        .map(|((source, target), mut acc)| {
            acc.durations_ms
                .sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
            let p95 = percentile_from_sorted(&acc.durations_ms, 95.0).unwrap_or(0.0);
            ServiceMapEdge {
                source,
                target,
                call_count: acc.count,
                p95_ms: (p95 * 100.0).round() / 100.0,
            }
        })
        .collect();
    edge_list.sort_by(|a, b| (&a.source, &a.target).cmp(&(&b.source, &b.target)));

    Ok(ServiceMap {
        nodes,
        edges: edge_list,
    })
}

// ---------------------------------------------------------------------------
// Cardinality analysis
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct LabelCardinality {
    pub key: String,
    /// Distinct values observed for this label across all series.
    pub cardinality: usize,
    /// Most frequent values, by number of series carrying them.
    pub top_values: Vec<LabelValueCount>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LabelValueCount {
    pub value: String,
    pub series: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct CardinalityReport {
    pub metric: String,
    pub series_count: usize,
    /// Series with at least one datapoint in the last hour.
    pub active_series: usize,
    pub label_dimensions: usize,
    pub labels: Vec<LabelCardinality>,
}

/// How many top values each label reports.
const TOP_VALUES: usize = 10;

/// Enumerate the series of one metric and analyse its label cardinality.
pub async fn cardinality(state: &AppState, metric: &str) -> Result<CardinalityReport> {
    let summaries = state.store.series_summaries(metric).await?;
    let now = AppState::now_ns();
    let active_cutoff = now.saturating_sub(ACTIVE_SERIES_WINDOW_NS);

    let mut labels: BTreeMap<String, BTreeMap<String, usize>> = BTreeMap::new();
    let mut active = 0usize;
    for series in &summaries {
        if series.last_update_ns >= active_cutoff {
            active += 1;
        }
        for (key, value) in &series.attributes {
            *labels
                .entry(key.clone())
                .or_default()
                .entry(value.to_filter_string())
                .or_default() += 1;
        }
    }

    let label_reports = labels
        .into_iter()
        .map(|(key, values)| {
            let cardinality = values.len();
            let mut counted: Vec<LabelValueCount> = values
                .into_iter()
                .map(|(value, series)| LabelValueCount { value, series })
                .collect();
            counted.sort_by(|a, b| b.series.cmp(&a.series).then(a.value.cmp(&b.value)));
            counted.truncate(TOP_VALUES);
            LabelCardinality {
                key,
                cardinality,
                top_values: counted,
            }
        })
        .collect::<Vec<_>>();

    Ok(CardinalityReport {
        metric: metric.to_string(),
        series_count: summaries.len(),
        active_series: active,
        label_dimensions: label_reports.len(),
        labels: label_reports,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tinyolly_core::{AttrMap, SpanKind, SpanStatus, StatusCode, TraceId};

    #[test]
    fn sorted_percentile_interpolates_linearly() {
        let samples: Vec<f64> = (0..=100).map(|i| i as f64).collect();
        assert!((percentile_from_sorted(&samples, 50.0).unwrap() - 50.0).abs() < 1e-9);
        assert!((percentile_from_sorted(&samples, 95.0).unwrap() - 95.0).abs() < 1e-9);
        assert!(percentile_from_sorted(&[], 50.0).is_none());
        assert_eq!(percentile_from_sorted(&[7.0], 99.0), Some(7.0));
    }

    #[test]
    fn bucket_percentile_interpolates_within_bucket() {
        // 100 observations: 50 in (0,10], 40 in (10,20], 10 in (20,+Inf)
        let counts = [50u64, 40, 10];
        let bounds = [10.0, 20.0];
        // rank(p50) = 50 lands exactly at the end of the first bucket
        let p50 = percentile_from_buckets(&counts, &bounds, 50.0).unwrap();
        assert!((p50 - 10.0).abs() < 1e-9);
        // rank(p75) = 75 → 25/40 through the second bucket → 10 + 6.25
        let p75 = percentile_from_buckets(&counts, &bounds, 75.0).unwrap();
        assert!((p75 - 16.25).abs() < 1e-9);
        // rank(p99) lands in the +Inf bucket → clamp to the last bound
        let p99 = percentile_from_buckets(&counts, &bounds, 99.0).unwrap();
        assert!((p99 - 20.0).abs() < 1e-9);
    }

    #[test]
    fn bucket_percentile_handles_empty_histograms() {
        assert!(percentile_from_buckets(&[], &[], 50.0).is_none());
        assert!(percentile_from_buckets(&[0, 0], &[1.0], 50.0).is_none());
    }

    fn span(trace: u8, id: u8, parent: Option<u8>, service: &str, start: u64) -> SpanRecord {
        SpanRecord {
            trace_id: TraceId([trace; 16]),
            span_id: SpanId([id; 8]),
            parent_span_id: parent.map(|p| SpanId([p; 8])),
            name: format!("op-{id}"),
            kind: SpanKind::Server,
            start_time_ns: start,
            end_time_ns: start + 2_000_000,
            status: SpanStatus {
                code: StatusCode::Unset,
                message: String::new(),
            },
            attributes: AttrMap::new(),
            events: vec![],
            links: vec![],
            resource_ref: 0,
            scope_ref: 0,
            service_name: service.to_string(),
        }
    }

    #[test]
    fn trace_summary_finds_root_without_parent() {
        let spans = vec![
            span(1, 2, Some(1), "backend", 200),
            span(1, 1, None, "frontend", 100),
        ];
        let summary = trace_summary(&spans).unwrap();
        assert_eq!(summary.root_span_name, "op-1");
        assert_eq!(summary.service_name, "frontend");
        assert_eq!(summary.span_count, 2);
        assert_eq!(summary.start_time, 100);
    }

    #[test]
    fn trace_summary_treats_missing_parent_as_root() {
        // The only span's parent is not part of the trace: it is the root.
        let spans = vec![span(1, 5, Some(99), "backend", 300)];
        let summary = trace_summary(&spans).unwrap();
        assert_eq!(summary.root_span_name, "op-5");
    }

    #[test]
    fn trace_summary_duration_spans_min_to_max() {
        let spans = vec![span(1, 1, None, "a", 1_000_000), span(1, 2, Some(1), "a", 2_000_000)];
        let summary = trace_summary(&spans).unwrap();
        // max end = 2ms + 2ms span length, min start = 1ms → 3ms
        assert!((summary.duration_ms - 3.0).abs() < 1e-9);
    }

    #[test]
    fn empty_trace_has_no_summary() {
        assert!(trace_summary(&[]).is_none());
    }
}
