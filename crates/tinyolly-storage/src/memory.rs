//! Embedded ephemeral store.
//!
//! In-process implementation of [`TelemetryStore`]: keyed maps hold encoded
//! record frames, ordered indexes provide time-scored access, and every
//! write records its ingestion time to seed TTL expiry. Reads transparently
//! skip expired entries; a periodic [`MemoryStore::sweep_expired`] pass
//! reclaims their memory.
//!
//! One structure exists per logical namespace:
//!
//! | Namespace | Structure |
//! |---|---|
//! | span frames | `DashMap<(TraceId, SpanId), Stored>` |
//! | trace registry | `DashMap<TraceId, TraceEntry>` |
//! | trace index (by ingest time) | `BTreeMap<(u64, TraceId), ()>` |
//! | span index (by ingest time) | `BTreeMap<(u64, TraceId, SpanId), ()>` |
//! | spans by service (by start time) | `DashMap<String, BTreeSet<(u64, TraceId, SpanId)>>` |
//! | log frames + time index + per-trace lists | as above |
//! | metric catalog / series / points | `DashMap` keyed by name / series key |
//!
//! Keyed maps are `DashMap`s so independent keys do not contend; ordered
//! indexes sit behind `std::sync::RwLock` with short critical sections.
//! Cardinality admission is serialized per metric name through the catalog
//! map's entry lock, with the global counter kept atomic.

use crate::codec::{self, Record};
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::RwLock;
use std::time::{SystemTime, UNIX_EPOCH};
use tinyolly_core::{
    LogFilter, LogRecord, MetricIngestReport, MetricMeta, MetricPointRecord, ResourceEntry,
    ResourceRef, Result, ScopeEntry, ScopeRef, SeriesData, SeriesFilter, SeriesKey,
    SeriesSummary, SpanId, SpanRecord, StoreStats, SweepReport, TelemetryStore, TinyOllyError,
    TraceId,
};
use tracing::warn;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Store tunables, derived from the server configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub retention_seconds: u64,
    pub max_metric_cardinality: usize,
    pub max_store_bytes: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            retention_seconds: 1800,
            max_metric_cardinality: 1000,
            max_store_bytes: 256 * 1024 * 1024,
        }
    }
}

// ---------------------------------------------------------------------------
// Internal entries
// ---------------------------------------------------------------------------

/// An encoded frame plus the ingestion time that seeds its TTL.
#[derive(Debug, Clone)]
struct Stored {
    frame: Vec<u8>,
    ingest_ns: u64,
}

/// Per-trace bookkeeping: member spans and the current time-index score.
#[derive(Debug, Default)]
struct TraceEntry {
    /// Refreshed on every span write, extending the trace's TTL with
    /// activity.
    ingest_ns: u64,
    index_score: u64,
    span_ids: BTreeSet<SpanId>,
}

/// Catalog entry for an admitted metric name.
#[derive(Debug, Clone)]
struct CatalogEntry {
    meta: MetricMeta,
    last_write_ns: u64,
}

/// Registry entry for one series of a metric.
#[derive(Debug, Clone)]
struct SeriesState {
    resource_ref: ResourceRef,
    attributes: tinyolly_core::AttrMap,
    last_update_ns: u64,
    ingest_ns: u64,
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// The embedded store.
pub struct MemoryStore {
    cfg: StoreConfig,

    // Interning tables, shared by writers (normalizer) and readers.
    resources: DashMap<ResourceRef, ResourceEntry>,
    scopes: DashMap<ScopeRef, ScopeEntry>,

    // Spans.
    spans: DashMap<(TraceId, SpanId), Stored>,
    traces: DashMap<TraceId, TraceEntry>,
    trace_index: RwLock<BTreeMap<(u64, TraceId), ()>>,
    span_index: RwLock<BTreeMap<(u64, TraceId, SpanId), ()>>,
    spans_by_service: DashMap<String, BTreeSet<(u64, TraceId, SpanId)>>,

    // Logs.
    log_seq: AtomicU64,
    logs: DashMap<u64, Stored>,
    log_index: RwLock<BTreeMap<(u64, u64), ()>>,
    logs_by_trace: DashMap<TraceId, Vec<u64>>,

    // Metrics.
    metric_catalog: DashMap<String, CatalogEntry>,
    series_by_metric: DashMap<String, BTreeSet<u64>>,
    series: DashMap<SeriesKey, SeriesState>,
    point_seq: AtomicU64,
    points: DashMap<SeriesKey, BTreeMap<(u64, u64), Stored>>,

    // Cardinality protection.
    metric_count: AtomicUsize,
    metrics_dropped: AtomicU64,
    dropped_names: RwLock<BTreeSet<String>>,

    // Memory accounting over encoded frames.
    bytes_used: AtomicUsize,
}

fn now_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

impl MemoryStore {
    pub fn new(cfg: StoreConfig) -> Self {
        Self {
            cfg,
            resources: DashMap::new(),
            scopes: DashMap::new(),
            spans: DashMap::new(),
            traces: DashMap::new(),
            trace_index: RwLock::new(BTreeMap::new()),
            span_index: RwLock::new(BTreeMap::new()),
            spans_by_service: DashMap::new(),
            log_seq: AtomicU64::new(0),
            logs: DashMap::new(),
            log_index: RwLock::new(BTreeMap::new()),
            logs_by_trace: DashMap::new(),
            metric_catalog: DashMap::new(),
            series_by_metric: DashMap::new(),
            series: DashMap::new(),
            point_seq: AtomicU64::new(0),
            points: DashMap::new(),
            metric_count: AtomicUsize::new(0),
            metrics_dropped: AtomicU64::new(0),
            dropped_names: RwLock::new(BTreeSet::new()),
            bytes_used: AtomicUsize::new(0),
        }
    }

    fn retention_ns(&self) -> u64 {
        self.cfg.retention_seconds.saturating_mul(1_000_000_000)
    }

    fn is_expired(&self, ingest_ns: u64, now: u64) -> bool {
        ingest_ns.saturating_add(self.retention_ns()) < now
    }

    /// Reserve capacity for a batch of frames, failing the whole batch when
    /// the memory bound would be crossed. The reservation is released piece
    /// by piece as entries are replaced or swept.
    fn reserve_bytes(&self, additional: usize) -> Result<()> {
        let used = self.bytes_used.load(Ordering::Acquire);
        if used.saturating_add(additional) > self.cfg.max_store_bytes {
            return Err(TinyOllyError::OutOfCapacity);
        }
        self.bytes_used.fetch_add(additional, Ordering::AcqRel);
        Ok(())
    }

    fn release_bytes(&self, amount: usize) {
        self.bytes_used.fetch_sub(amount, Ordering::AcqRel);
    }

    /// Admit a metric name into the catalog, or explain why not.
    ///
    /// Admission is serialized per name by the catalog entry lock; the
    /// distinct-name counter is atomic. Returns `Ok(true)` when the point
    /// may be stored, `Ok(false)` when the name is over the cardinality
    /// limit, and `Err` on a kind conflict.
    fn admit_metric(&self, name: &str, meta: &MetricMeta, now: u64) -> Result<bool> {
        use dashmap::mapref::entry::Entry;
        match self.metric_catalog.entry(name.to_string()) {
            Entry::Occupied(mut existing) => {
                if existing.get().meta.kind != meta.kind {
                    return Err(TinyOllyError::MetricKindConflict {
                        name: name.to_string(),
                        existing: existing.get().meta.kind,
                        incoming: meta.kind,
                    });
                }
                existing.get_mut().last_write_ns = now;
                Ok(true)
            }
            Entry::Vacant(slot) => {
                let mut current = self.metric_count.load(Ordering::Acquire);
                loop {
                    if current >= self.cfg.max_metric_cardinality {
                        self.metrics_dropped.fetch_add(1, Ordering::AcqRel);
                        let first_drop = self
                            .dropped_names
                            .write()
                            .expect("dropped_names lock")
                            .insert(name.to_string());
                        if first_drop {
                            let err = TinyOllyError::CardinalityExceeded {
                                limit: self.cfg.max_metric_cardinality,
                            };
                            warn!(metric = name, "{err}; dropping new metric name");
                        }
                        return Ok(false);
                    }
                    match self.metric_count.compare_exchange(
                        current,
                        current + 1,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    ) {
                        Ok(_) => break,
                        Err(actual) => current = actual,
                    }
                }
                slot.insert(CatalogEntry {
                    meta: meta.clone(),
                    last_write_ns: now,
                });
                Ok(true)
            }
        }
    }

    /// Decode a span frame, logging and skipping on corruption.
    fn decode_span_lossy(&self, stored: &Stored) -> Option<SpanRecord> {
        match codec::decode_span(&stored.frame) {
            Ok(span) => Some(span),
            Err(e) => {
                warn!("skipping undecodable span frame: {e}");
                None
            }
        }
    }

    fn decode_log_lossy(&self, stored: &Stored) -> Option<LogRecord> {
        match codec::decode_log(&stored.frame) {
            Ok(log) => Some(log),
            Err(e) => {
                warn!("skipping undecodable log frame: {e}");
                None
            }
        }
    }
}

// ---------------------------------------------------------------------------
// TelemetryStore implementation
// ---------------------------------------------------------------------------

#[async_trait]
impl TelemetryStore for MemoryStore {
    async fn intern_resource(&self, entry: ResourceEntry) -> ResourceRef {
        let r = entry.content_hash();
        self.resources.entry(r).or_insert(entry);
        r
    }

    async fn intern_scope(&self, entry: ScopeEntry) -> ScopeRef {
        let r = entry.content_hash();
        self.scopes.entry(r).or_insert(entry);
        r
    }

    async fn resource(&self, r: ResourceRef) -> Option<ResourceEntry> {
        self.resources.get(&r).map(|e| e.clone())
    }

    async fn scope(&self, r: ScopeRef) -> Option<ScopeEntry> {
        self.scopes.get(&r).map(|e| e.clone())
    }

    async fn put_spans(&self, spans: Vec<SpanRecord>) -> Result<()> {
        if spans.is_empty() {
            return Ok(());
        }
        let now = now_ns();

        // Encode everything first so capacity can be reserved before any
        // index is touched: a failing batch admits nothing.
        let mut encoded = Vec::with_capacity(spans.len());
        let mut total = 0usize;
        for span in spans {
            let frame = codec::encode(&Record::Span(span.clone()))?;
            total += frame.len();
            encoded.push((span, frame));
        }
        self.reserve_bytes(total)?;

        for (span, frame) in encoded {
            let key = (span.trace_id, span.span_id);
            let previous = self.spans.insert(
                key,
                Stored {
                    frame,
                    ingest_ns: now,
                },
            );

            // Replacing an existing span must not leave a stale index entry
            // behind; the time-sorted indexes are keyed by ingest time.
            if let Some(old) = previous {
                self.release_bytes(old.frame.len());
                self.span_index
                    .write()
                    .expect("span_index lock")
                    .remove(&(old.ingest_ns, span.trace_id, span.span_id));
            }
            self.span_index
                .write()
                .expect("span_index lock")
                .insert((now, span.trace_id, span.span_id), ());

            self.spans_by_service
                .entry(span.service_name.clone())
                .or_default()
                .insert((span.start_time_ns, span.trace_id, span.span_id));

            let mut entry = self.traces.entry(span.trace_id).or_default();
            entry.span_ids.insert(span.span_id);
            entry.ingest_ns = now;
            let old_score = entry.index_score;
            entry.index_score = now;
            drop(entry);

            let mut index = self.trace_index.write().expect("trace_index lock");
            if old_score != 0 {
                index.remove(&(old_score, span.trace_id));
            }
            index.insert((now, span.trace_id), ());
        }
        Ok(())
    }

    async fn put_logs(&self, logs: Vec<LogRecord>) -> Result<()> {
        if logs.is_empty() {
            return Ok(());
        }
        let now = now_ns();

        let mut encoded = Vec::with_capacity(logs.len());
        let mut total = 0usize;
        for log in logs {
            let frame = codec::encode(&Record::Log(log.clone()))?;
            total += frame.len();
            encoded.push((log, frame));
        }
        self.reserve_bytes(total)?;

        for (log, frame) in encoded {
            let id = self.log_seq.fetch_add(1, Ordering::AcqRel);
            self.logs.insert(
                id,
                Stored {
                    frame,
                    ingest_ns: now,
                },
            );
            self.log_index
                .write()
                .expect("log_index lock")
                .insert((log.timestamp_ns, id), ());
            if let Some(trace_id) = log.trace_id {
                self.logs_by_trace.entry(trace_id).or_default().push(id);
            }
        }
        Ok(())
    }

    async fn put_metrics(&self, points: Vec<MetricPointRecord>) -> Result<MetricIngestReport> {
        let mut report = MetricIngestReport::default();
        if points.is_empty() {
            return Ok(report);
        }
        let now = now_ns();

        let mut encoded = Vec::with_capacity(points.len());
        let mut total = 0usize;
        for record in points {
            let frame = codec::encode(&Record::Point(record.point.clone()))?;
            total += frame.len();
            encoded.push((record, frame));
        }
        self.reserve_bytes(total)?;

        for (record, frame) in encoded {
            match self.admit_metric(&record.name, &record.meta, now) {
                Ok(true) => {}
                Ok(false) => {
                    report.dropped_cardinality += 1;
                    self.release_bytes(frame.len());
                    continue;
                }
                Err(TinyOllyError::MetricKindConflict { name, .. }) => {
                    if !report.kind_conflicts.contains(&name) {
                        report.kind_conflicts.push(name);
                    }
                    self.release_bytes(frame.len());
                    continue;
                }
                Err(e) => return Err(e),
            }

            let key = SeriesKey {
                metric: record.name.clone(),
                fingerprint: record.fingerprint,
            };
            self.series_by_metric
                .entry(record.name.clone())
                .or_default()
                .insert(record.fingerprint);

            let mut state = self.series.entry(key.clone()).or_insert_with(|| SeriesState {
                resource_ref: record.resource_ref,
                attributes: record.attributes.clone(),
                last_update_ns: 0,
                ingest_ns: now,
            });
            state.last_update_ns = record.point.timestamp_ns.max(state.last_update_ns);
            state.ingest_ns = now;
            drop(state);

            let seq = self.point_seq.fetch_add(1, Ordering::AcqRel);
            self.points.entry(key).or_default().insert(
                (record.point.timestamp_ns, seq),
                Stored {
                    frame,
                    ingest_ns: now,
                },
            );
            report.accepted += 1;
        }
        Ok(report)
    }

    async fn recent_traces(&self, limit: usize) -> Result<Vec<TraceId>> {
        let now = now_ns();
        let index = self.trace_index.read().expect("trace_index lock");
        let mut out = Vec::with_capacity(limit.min(256));
        for (&(score, trace_id), _) in index.iter().rev() {
            if out.len() >= limit {
                break;
            }
            if self.is_expired(score, now) {
                continue;
            }
            out.push(trace_id);
        }
        Ok(out)
    }

    async fn trace_spans(&self, trace_id: TraceId) -> Result<Vec<SpanRecord>> {
        let now = now_ns();
        let span_ids: Vec<SpanId> = match self.traces.get(&trace_id) {
            Some(entry) if !self.is_expired(entry.ingest_ns, now) => {
                entry.span_ids.iter().copied().collect()
            }
            _ => return Ok(Vec::new()),
        };

        let mut out = Vec::with_capacity(span_ids.len());
        for span_id in span_ids {
            if let Some(stored) = self.spans.get(&(trace_id, span_id)) {
                if self.is_expired(stored.ingest_ns, now) {
                    continue;
                }
                if let Some(span) = self.decode_span_lossy(&stored) {
                    out.push(span);
                }
            }
        }
        out.sort_by_key(|s| s.start_time_ns);
        Ok(out)
    }

    async fn recent_spans(&self, service: Option<&str>, limit: usize) -> Result<Vec<SpanRecord>> {
        let now = now_ns();
        let keys: Vec<(TraceId, SpanId)> = match service {
            Some(service) => match self.spans_by_service.get(service) {
                Some(set) => set
                    .iter()
                    .rev()
                    .take(limit)
                    .map(|&(_, t, s)| (t, s))
                    .collect(),
                None => return Ok(Vec::new()),
            },
            None => {
                let index = self.span_index.read().expect("span_index lock");
                let mut keys = Vec::with_capacity(limit.min(256));
                for (&(score, trace_id, span_id), _) in index.iter().rev() {
                    if keys.len() >= limit {
                        break;
                    }
                    if self.is_expired(score, now) {
                        continue;
                    }
                    keys.push((trace_id, span_id));
                }
                keys
            }
        };

        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(stored) = self.spans.get(&key) {
                if self.is_expired(stored.ingest_ns, now) {
                    continue;
                }
                if let Some(span) = self.decode_span_lossy(&stored) {
                    out.push(span);
                }
            }
        }
        Ok(out)
    }

    async fn logs(&self, filter: LogFilter) -> Result<Vec<LogRecord>> {
        let now = now_ns();
        let limit = if filter.limit == 0 { 100 } else { filter.limit };

        let ids: Vec<u64> = match filter.trace_id {
            // Trace-correlated logs keep their insertion order.
            Some(trace_id) => match self.logs_by_trace.get(&trace_id) {
                Some(list) => list.iter().copied().collect(),
                None => return Ok(Vec::new()),
            },
            None => {
                let index = self.log_index.read().expect("log_index lock");
                index.iter().rev().map(|(&(_, id), _)| id).collect()
            }
        };

        let severity = filter.severity.as_deref().map(str::to_ascii_uppercase);
        let mut out = Vec::new();
        for id in ids {
            if out.len() >= limit {
                break;
            }
            if let Some(stored) = self.logs.get(&id) {
                if self.is_expired(stored.ingest_ns, now) {
                    continue;
                }
                if let Some(log) = self.decode_log_lossy(&stored) {
                    if let Some(ref wanted) = severity {
                        if !log.severity_text.eq_ignore_ascii_case(wanted) {
                            continue;
                        }
                    }
                    out.push(log);
                }
            }
        }
        Ok(out)
    }

    async fn metric_names(&self) -> Result<Vec<String>> {
        let now = now_ns();
        let mut names: Vec<String> = self
            .metric_catalog
            .iter()
            .filter(|e| !self.is_expired(e.value().last_write_ns, now))
            .map(|e| e.key().clone())
            .collect();
        names.sort();
        Ok(names)
    }

    async fn metric_meta(&self, name: &str) -> Result<Option<MetricMeta>> {
        let now = now_ns();
        Ok(self.metric_catalog.get(name).and_then(|e| {
            if self.is_expired(e.last_write_ns, now) {
                None
            } else {
                Some(e.meta.clone())
            }
        }))
    }

    async fn metric_series(&self, name: &str, filter: &SeriesFilter) -> Result<Vec<SeriesData>> {
        let now = now_ns();
        let fingerprints: Vec<u64> = match self.series_by_metric.get(name) {
            Some(set) => set.iter().copied().collect(),
            None => return Ok(Vec::new()),
        };

        let mut out = Vec::new();
        for fingerprint in fingerprints {
            let key = SeriesKey {
                metric: name.to_string(),
                fingerprint,
            };
            let state = match self.series.get(&key) {
                Some(s) if !self.is_expired(s.ingest_ns, now) => s.clone(),
                _ => continue,
            };

            let resource = self
                .resources
                .get(&state.resource_ref)
                .map(|r| r.attributes.clone())
                .unwrap_or_default();

            // Equality filters over the canonical text form of each value.
            let resource_matches = filter.resource.iter().all(|(k, v)| {
                resource
                    .get(k)
                    .map(|val| val.to_filter_string() == *v)
                    .unwrap_or(false)
            });
            if !resource_matches {
                continue;
            }
            let attrs_match = filter.attributes.iter().all(|(k, v)| {
                state
                    .attributes
                    .get(k)
                    .map(|val| val.to_filter_string() == *v)
                    .unwrap_or(false)
            });
            if !attrs_match {
                continue;
            }

            let mut points = Vec::new();
            if let Some(tree) = self.points.get(&key) {
                for ((_, _), stored) in
                    tree.range((filter.start_ns, 0)..=(filter.end_ns, u64::MAX))
                {
                    if self.is_expired(stored.ingest_ns, now) {
                        continue;
                    }
                    match codec::decode_point(&stored.frame) {
                        Ok(point) => points.push(point),
                        Err(e) => warn!("skipping undecodable point frame: {e}"),
                    }
                }
            }
            if points.is_empty() {
                continue;
            }

            out.push(SeriesData {
                fingerprint,
                resource,
                attributes: state.attributes,
                points,
            });
        }
        Ok(out)
    }

    async fn series_summaries(&self, name: &str) -> Result<Vec<SeriesSummary>> {
        let now = now_ns();
        let fingerprints: Vec<u64> = match self.series_by_metric.get(name) {
            Some(set) => set.iter().copied().collect(),
            None => return Ok(Vec::new()),
        };
        let mut out = Vec::with_capacity(fingerprints.len());
        for fingerprint in fingerprints {
            let key = SeriesKey {
                metric: name.to_string(),
                fingerprint,
            };
            if let Some(state) = self.series.get(&key) {
                if self.is_expired(state.ingest_ns, now) {
                    continue;
                }
                out.push(SeriesSummary {
                    fingerprint,
                    resource_ref: state.resource_ref,
                    attributes: state.attributes.clone(),
                    last_update_ns: state.last_update_ns,
                });
            }
        }
        Ok(out)
    }

    async fn stats(&self) -> Result<StoreStats> {
        let now = now_ns();

        let traces = {
            let index = self.trace_index.read().expect("trace_index lock");
            index.keys().filter(|k| !self.is_expired(k.0, now)).count()
        };
        let spans = {
            let index = self.span_index.read().expect("span_index lock");
            index.keys().filter(|k| !self.is_expired(k.0, now)).count()
        };
        let logs = self
            .logs
            .iter()
            .filter(|e| !self.is_expired(e.value().ingest_ns, now))
            .count();
        let metrics = self
            .metric_catalog
            .iter()
            .filter(|e| !self.is_expired(e.value().last_write_ns, now))
            .count();

        Ok(StoreStats {
            traces,
            spans,
            logs,
            metrics,
            metrics_max: self.cfg.max_metric_cardinality,
            metrics_dropped: self.metrics_dropped.load(Ordering::Acquire),
            dropped_metric_names: self
                .dropped_names
                .read()
                .expect("dropped_names lock")
                .iter()
                .cloned()
                .collect(),
            store_bytes: self.bytes_used.load(Ordering::Acquire),
        })
    }

    async fn sweep_expired(&self) -> Result<SweepReport> {
        let now = now_ns();
        let mut report = SweepReport::default();

        // Spans: collect first, then remove, so no map is mutated while its
        // shards are being iterated.
        let expired_spans: Vec<(TraceId, SpanId)> = self
            .spans
            .iter()
            .filter(|e| self.is_expired(e.value().ingest_ns, now))
            .map(|e| *e.key())
            .collect();
        for key in &expired_spans {
            if let Some((_, stored)) = self.spans.remove(key) {
                self.release_bytes(stored.frame.len());
                report.spans_removed += 1;
                // Decode only to find the service index entry; a corrupt
                // frame leaves at most a dangling index key behind.
                if let Ok(span) = codec::decode_span(&stored.frame) {
                    if let Some(mut set) = self.spans_by_service.get_mut(&span.service_name) {
                        set.remove(&(span.start_time_ns, key.0, key.1));
                    }
                }
                self.span_index
                    .write()
                    .expect("span_index lock")
                    .remove(&(stored.ingest_ns, key.0, key.1));
            }
            if let Some(mut entry) = self.traces.get_mut(&key.0) {
                entry.span_ids.remove(&key.1);
            }
        }

        // Traces whose TTL elapsed or whose spans are all gone.
        let expired_traces: Vec<(TraceId, u64)> = self
            .traces
            .iter()
            .filter(|e| self.is_expired(e.value().ingest_ns, now) || e.value().span_ids.is_empty())
            .map(|e| (*e.key(), e.value().index_score))
            .collect();
        for (trace_id, score) in expired_traces {
            self.traces.remove(&trace_id);
            self.trace_index
                .write()
                .expect("trace_index lock")
                .remove(&(score, trace_id));
            self.logs_by_trace.remove(&trace_id);
            report.traces_removed += 1;
        }

        // Logs.
        let expired_logs: Vec<u64> = self
            .logs
            .iter()
            .filter(|e| self.is_expired(e.value().ingest_ns, now))
            .map(|e| *e.key())
            .collect();
        for id in expired_logs {
            if let Some((_, stored)) = self.logs.remove(&id) {
                self.release_bytes(stored.frame.len());
                report.logs_removed += 1;
                if let Ok(log) = codec::decode_log(&stored.frame) {
                    self.log_index
                        .write()
                        .expect("log_index lock")
                        .remove(&(log.timestamp_ns, id));
                }
            }
        }

        // Metric points, then empty series, then stale catalog entries.
        let series_keys: Vec<SeriesKey> = self.points.iter().map(|e| e.key().clone()).collect();
        for key in series_keys {
            let mut emptied = false;
            if let Some(mut tree) = self.points.get_mut(&key) {
                let before = tree.len();
                let mut reclaimed = 0usize;
                tree.retain(|_, stored| {
                    let keep = !self.is_expired(stored.ingest_ns, now);
                    if !keep {
                        reclaimed += stored.frame.len();
                    }
                    keep
                });
                report.points_removed += before - tree.len();
                self.release_bytes(reclaimed);
                emptied = tree.is_empty();
            }
            if emptied {
                self.points.remove(&key);
                self.series.remove(&key);
                if let Some(mut set) = self.series_by_metric.get_mut(&key.metric) {
                    set.remove(&key.fingerprint);
                }
            }
        }

        let stale_metrics: Vec<String> = self
            .metric_catalog
            .iter()
            .filter(|e| self.is_expired(e.value().last_write_ns, now))
            .map(|e| e.key().clone())
            .collect();
        for name in stale_metrics {
            self.metric_catalog.remove(&name);
            self.series_by_metric.remove(&name);
            self.metric_count.fetch_sub(1, Ordering::AcqRel);
        }

        Ok(report)
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
