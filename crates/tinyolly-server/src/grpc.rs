//! OTLP gRPC receiver.
//!
//! Implements the three OTLP collector services (`TraceService`,
//! `LogsService`, `MetricsService`) using `tonic` and the generated types
//! from `opentelemetry-proto`. Each export request is normalized and stored
//! as one atomic batch per signal; per-record validation failures are
//! reported through the OTLP partial-success counters rather than failing
//! the call.
//!
//! ## Status mapping
//!
//! | condition | gRPC status |
//! |---|---|
//! | undecodable / invalid batch | `InvalidArgument` |
//! | request over the size limit | `ResourceExhausted` |
//! | store at capacity | `Unavailable` + retry pushback |
//! | anything unexpected | `Internal` |

use opentelemetry_proto::tonic::collector::logs::v1::logs_service_server::{
    LogsService, LogsServiceServer,
};
use opentelemetry_proto::tonic::collector::logs::v1::{
    ExportLogsPartialSuccess, ExportLogsServiceRequest, ExportLogsServiceResponse,
};
use opentelemetry_proto::tonic::collector::metrics::v1::metrics_service_server::{
    MetricsService, MetricsServiceServer,
};
use opentelemetry_proto::tonic::collector::metrics::v1::{
    ExportMetricsPartialSuccess, ExportMetricsServiceRequest, ExportMetricsServiceResponse,
};
use opentelemetry_proto::tonic::collector::trace::v1::trace_service_server::{
    TraceService, TraceServiceServer,
};
use opentelemetry_proto::tonic::collector::trace::v1::{
    ExportTracePartialSuccess, ExportTraceServiceRequest, ExportTraceServiceResponse,
};
use std::sync::Arc;
use tinyolly_core::TinyOllyError;
use tonic::{Request, Response, Status};
use tracing::{debug, info};

use crate::normalize;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

/// Milliseconds a client should wait before retrying after backpressure.
const RETRY_PUSHBACK_MS: &str = "1000";

/// Map a core error to the gRPC status surface.
fn status_from_error(err: TinyOllyError) -> Status {
    match err {
        TinyOllyError::OutOfCapacity => {
            let mut status = Status::unavailable("store at capacity, apply backoff and retry");
            status.metadata_mut().insert(
                "grpc-retry-pushback-ms",
                RETRY_PUSHBACK_MS.parse().expect("static metadata value"),
            );
            status
        }
        TinyOllyError::InvalidInput(msg) => Status::invalid_argument(msg),
        TinyOllyError::NotFound => Status::not_found("not found"),
        TinyOllyError::DeadlineExceeded => Status::deadline_exceeded("request deadline exceeded"),
        TinyOllyError::CardinalityExceeded { limit } => {
            Status::resource_exhausted(format!("metric cardinality limit reached ({limit})"))
        }
        other => Status::internal(other.to_string()),
    }
}

// ---------------------------------------------------------------------------
// Service implementation
// ---------------------------------------------------------------------------

/// The OTLP receiver backed by shared [`AppState`].
pub struct OtlpGrpcReceiver {
    state: Arc<AppState>,
}

impl OtlpGrpcReceiver {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }
}

#[tonic::async_trait]
impl TraceService for OtlpGrpcReceiver {
    async fn export(
        &self,
        request: Request<ExportTraceServiceRequest>,
    ) -> Result<Response<ExportTraceServiceResponse>, Status> {
        let req = request.into_inner();
        let normalized = normalize::normalize_spans(self.state.store.as_ref(), req.resource_spans)
            .await
            .map_err(status_from_error)?;

        let received = normalized.records.len();
        self.state
            .store
            .put_spans(normalized.records)
            .await
            .map_err(status_from_error)?;

        self.state
            .metrics
            .record_ingest("traces", "grpc", received, normalized.rejected);
        debug!(
            accepted = received,
            rejected = normalized.rejected,
            "gRPC trace export processed"
        );

        let partial_success = if normalized.rejected > 0 {
            Some(ExportTracePartialSuccess {
                rejected_spans: normalized.rejected as i64,
                error_message: format!("{} spans failed validation", normalized.rejected),
            })
        } else {
            None
        };
        Ok(Response::new(ExportTraceServiceResponse { partial_success }))
    }
}

#[tonic::async_trait]
impl LogsService for OtlpGrpcReceiver {
    async fn export(
        &self,
        request: Request<ExportLogsServiceRequest>,
    ) -> Result<Response<ExportLogsServiceResponse>, Status> {
        let req = request.into_inner();
        let normalized = normalize::normalize_logs(self.state.store.as_ref(), req.resource_logs)
            .await
            .map_err(status_from_error)?;

        let received = normalized.records.len();
        self.state
            .store
            .put_logs(normalized.records)
            .await
            .map_err(status_from_error)?;

        self.state
            .metrics
            .record_ingest("logs", "grpc", received, normalized.rejected);

        let partial_success = if normalized.rejected > 0 {
            Some(ExportLogsPartialSuccess {
                rejected_log_records: normalized.rejected as i64,
                error_message: format!("{} log records failed validation", normalized.rejected),
            })
        } else {
            None
        };
        Ok(Response::new(ExportLogsServiceResponse { partial_success }))
    }
}

#[tonic::async_trait]
impl MetricsService for OtlpGrpcReceiver {
    async fn export(
        &self,
        request: Request<ExportMetricsServiceRequest>,
    ) -> Result<Response<ExportMetricsServiceResponse>, Status> {
        let req = request.into_inner();
        let normalized =
            normalize::normalize_metrics(self.state.store.as_ref(), req.resource_metrics)
                .await
                .map_err(status_from_error)?;

        let received = normalized.records.len();
        let report = self
            .state
            .store
            .put_metrics(normalized.records)
            .await
            .map_err(status_from_error)?;

        self.state
            .metrics
            .record_ingest("metrics", "grpc", received, normalized.rejected);
        self.state
            .metrics
            .record_cardinality_drop("grpc", report.dropped_cardinality);

        let rejected_points =
            normalized.rejected + report.dropped_cardinality + report.kind_conflicts.len();
        let partial_success = if rejected_points > 0 {
            let mut reasons = Vec::new();
            if normalized.rejected > 0 {
                reasons.push(format!("{} metrics failed validation", normalized.rejected));
            }
            if report.dropped_cardinality > 0 {
                reasons.push(format!(
                    "{} points dropped by cardinality protection",
                    report.dropped_cardinality
                ));
            }
            for name in &report.kind_conflicts {
                reasons.push(format!("metric {name:?} rejected: kind conflict"));
            }
            Some(ExportMetricsPartialSuccess {
                rejected_data_points: rejected_points as i64,
                error_message: reasons.join("; "),
            })
        } else {
            None
        };
        Ok(Response::new(ExportMetricsServiceResponse {
            partial_success,
        }))
    }
}

// ---------------------------------------------------------------------------
// Server startup
// ---------------------------------------------------------------------------

/// Build the three OTLP services with the configured message size limit.
pub fn build_services(
    state: Arc<AppState>,
) -> (
    TraceServiceServer<OtlpGrpcReceiver>,
    LogsServiceServer<OtlpGrpcReceiver>,
    MetricsServiceServer<OtlpGrpcReceiver>,
) {
    let limit = state.config.max_request_bytes;
    (
        TraceServiceServer::new(OtlpGrpcReceiver::new(Arc::clone(&state)))
            .max_decoding_message_size(limit),
        LogsServiceServer::new(OtlpGrpcReceiver::new(Arc::clone(&state)))
            .max_decoding_message_size(limit),
        MetricsServiceServer::new(OtlpGrpcReceiver::new(state)).max_decoding_message_size(limit),
    )
}

/// Run the gRPC receiver until the shutdown token fires. In-flight RPCs are
/// drained before the listener exits.
pub async fn run_grpc_server(state: Arc<AppState>) -> anyhow::Result<()> {
    let addr = state.config.grpc_listen_addr.parse()?;
    let shutdown_token = state.shutdown.signal();
    let (traces, logs, metrics) = build_services(state);

    info!(%addr, "OTLP gRPC receiver listening");

    tonic::transport::Server::builder()
        .add_service(traces)
        .add_service(logs)
        .add_service(metrics)
        .serve_with_shutdown(addr, async move {
            shutdown_token.cancelled().await;
            info!("gRPC receiver shutting down gracefully");
        })
        .await?;

    Ok(())
}
