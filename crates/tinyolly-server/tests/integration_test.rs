//! End-to-end tests: in-process gRPC, HTTP, and OpAMP servers exercised
//! with real clients.

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use opentelemetry_proto::tonic::collector::logs::v1::logs_service_client::LogsServiceClient;
use opentelemetry_proto::tonic::collector::logs::v1::ExportLogsServiceRequest;
use opentelemetry_proto::tonic::collector::metrics::v1::metrics_service_client::MetricsServiceClient;
use opentelemetry_proto::tonic::collector::metrics::v1::ExportMetricsServiceRequest;
use opentelemetry_proto::tonic::collector::trace::v1::trace_service_client::TraceServiceClient;
use opentelemetry_proto::tonic::collector::trace::v1::ExportTraceServiceRequest;
use opentelemetry_proto::tonic::common::v1::{any_value, AnyValue, KeyValue};
use opentelemetry_proto::tonic::logs::v1::{LogRecord, ResourceLogs, ScopeLogs};
use opentelemetry_proto::tonic::metrics::v1::{
    metric, number_data_point, Gauge, Metric, NumberDataPoint, ResourceMetrics, ScopeMetrics,
};
use opentelemetry_proto::tonic::resource::v1::Resource;
use opentelemetry_proto::tonic::trace::v1::{ResourceSpans, ScopeSpans, Span, Status};
use prost::Message as _;
use std::net::SocketAddr;
use std::sync::Arc;
use tinyolly_core::ServerConfig;
use tinyolly_server::opamp::AgentRegistry;
use tinyolly_server::shutdown::ShutdownCoordinator;
use tinyolly_server::{api, grpc, opamp, opamp_proto as pb, otlp_http, AppState};
use tinyolly_storage::{MemoryStore, StoreConfig};
use tokio_stream::wrappers::TcpListenerStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tower::ServiceExt;

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

fn test_state(mutate: impl FnOnce(&mut ServerConfig)) -> Arc<AppState> {
    let mut config = ServerConfig::default();
    mutate(&mut config);
    let store = Arc::new(MemoryStore::new(StoreConfig {
        retention_seconds: config.retention_seconds,
        max_metric_cardinality: config.max_metric_cardinality,
        max_store_bytes: config.max_store_bytes,
    }));
    let agents = Arc::new(AgentRegistry::new(None));
    Arc::new(AppState::new(
        config,
        store,
        agents,
        ShutdownCoordinator::new(std::time::Duration::from_secs(5)),
    ))
}

fn http_app(state: &Arc<AppState>) -> Router {
    Router::new()
        .merge(otlp_http::routes())
        .merge(api::routes())
        .with_state(Arc::clone(state))
}

async fn start_grpc(state: &Arc<AppState>) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (traces, logs, metrics) = grpc::build_services(Arc::clone(state));
    tokio::spawn(async move {
        tonic::transport::Server::builder()
            .add_service(traces)
            .add_service(logs)
            .add_service(metrics)
            .serve_with_incoming(TcpListenerStream::new(listener))
            .await
            .unwrap();
    });
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    addr
}

async fn get_json(app: &Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let response = app
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
    };
    (status, value)
}

async fn post_body(
    app: &Router,
    uri: &str,
    content_type: &str,
    body: Vec<u8>,
) -> (StatusCode, serde_json::Value) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header(header::CONTENT_TYPE, content_type)
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
    };
    (status, value)
}

// ---------------------------------------------------------------------------
// Payload builders
// ---------------------------------------------------------------------------

fn str_attr(key: &str, value: &str) -> KeyValue {
    KeyValue {
        key: key.to_string(),
        value: Some(AnyValue {
            value: Some(any_value::Value::StringValue(value.to_string())),
        }),
    }
}

fn service_resource(service: &str) -> Resource {
    Resource {
        attributes: vec![str_attr("service.name", service)],
        ..Default::default()
    }
}

struct SpanSpec<'a> {
    trace: [u8; 16],
    span: [u8; 8],
    parent: Option<[u8; 8]>,
    name: &'a str,
    start_ns: u64,
    end_ns: u64,
    status_code: i32,
}

fn span_request(service: &str, spans: Vec<SpanSpec<'_>>) -> ExportTraceServiceRequest {
    ExportTraceServiceRequest {
        resource_spans: vec![ResourceSpans {
            resource: Some(service_resource(service)),
            scope_spans: vec![ScopeSpans {
                scope: None,
                spans: spans
                    .into_iter()
                    .map(|s| Span {
                        trace_id: s.trace.to_vec(),
                        span_id: s.span.to_vec(),
                        parent_span_id: s.parent.map(|p| p.to_vec()).unwrap_or_default(),
                        name: s.name.to_string(),
                        kind: 2,
                        start_time_unix_nano: s.start_ns,
                        end_time_unix_nano: s.end_ns,
                        status: Some(Status {
                            code: s.status_code,
                            message: String::new(),
                        }),
                        ..Default::default()
                    })
                    .collect(),
                schema_url: String::new(),
            }],
            schema_url: String::new(),
        }],
    }
}

fn gauge_request(names: &[&str]) -> ExportMetricsServiceRequest {
    ExportMetricsServiceRequest {
        resource_metrics: vec![ResourceMetrics {
            resource: Some(service_resource("svc")),
            scope_metrics: vec![ScopeMetrics {
                scope: None,
                metrics: names
                    .iter()
                    .map(|name| Metric {
                        name: name.to_string(),
                        data: Some(metric::Data::Gauge(Gauge {
                            data_points: vec![NumberDataPoint {
                                time_unix_nano: now_ns(),
                                value: Some(number_data_point::Value::AsDouble(1.0)),
                                ..Default::default()
                            }],
                        })),
                        ..Default::default()
                    })
                    .collect(),
                schema_url: String::new(),
            }],
            schema_url: String::new(),
        }],
    }
}

fn now_ns() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos() as u64
}

// ---------------------------------------------------------------------------
// Scenario 1: trace ingest + fetch
// ---------------------------------------------------------------------------

#[tokio::test]
async fn trace_ingest_and_fetch() {
    let state = test_state(|_| {});
    let grpc_addr = start_grpc(&state).await;
    let app = http_app(&state);

    let trace: [u8; 16] = [1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16];
    let request = span_request(
        "frontend",
        vec![SpanSpec {
            trace,
            span: [0x0a; 8],
            parent: None,
            name: "GET /x",
            start_ns: 1_000_000_000_000,
            end_ns: 1_000_000_500_000,
            status_code: 1,
        }],
    );

    let mut client = TraceServiceClient::connect(format!("http://{grpc_addr}"))
        .await
        .unwrap();
    let response = client.export(request).await.unwrap().into_inner();
    assert!(response.partial_success.is_none());

    let (status, body) =
        get_json(&app, "/api/traces/0102030405060708090a0b0c0d0e0f10").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["span_count"], 1);
    let span = &body["spans"][0];
    assert_eq!(span["name"], "GET /x");
    assert_eq!(span["service_name"], "frontend");
    assert!((span["duration_ms"].as_f64().unwrap() - 0.5).abs() < 1e-9);

    // The trace also shows up in the list with a computed summary.
    let (status, list) = get_json(&app, "/api/traces").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list[0]["trace_id"], "0102030405060708090a0b0c0d0e0f10");
    assert_eq!(list[0]["span_count"], 1);
    assert_eq!(list[0]["root_span_name"], "GET /x");
}

#[tokio::test]
async fn unknown_trace_is_404() {
    let state = test_state(|_| {});
    let app = http_app(&state);
    let (status, _) = get_json(&app, "/api/traces/000102030405060708090a0b0c0d0e0f").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = get_json(&app, "/api/traces/not-hex").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

// ---------------------------------------------------------------------------
// Scenario 2: log correlation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn log_correlates_with_trace() {
    let state = test_state(|_| {});
    let grpc_addr = start_grpc(&state).await;
    let app = http_app(&state);

    let trace = [7u8; 16];
    let mut trace_client = TraceServiceClient::connect(format!("http://{grpc_addr}"))
        .await
        .unwrap();
    trace_client
        .export(span_request(
            "backend",
            vec![SpanSpec {
                trace,
                span: [1; 8],
                parent: None,
                name: "work",
                start_ns: 1_000,
                end_ns: 2_000,
                status_code: 0,
            }],
        ))
        .await
        .unwrap();

    let mut logs_client = LogsServiceClient::connect(format!("http://{grpc_addr}"))
        .await
        .unwrap();
    logs_client
        .export(ExportLogsServiceRequest {
            resource_logs: vec![ResourceLogs {
                resource: Some(service_resource("backend")),
                scope_logs: vec![ScopeLogs {
                    scope: None,
                    log_records: vec![LogRecord {
                        time_unix_nano: 1_500,
                        severity_number: 9,
                        body: Some(AnyValue {
                            value: Some(any_value::Value::StringValue("hi".into())),
                        }),
                        trace_id: trace.to_vec(),
                        span_id: vec![1; 8],
                        ..Default::default()
                    }],
                    schema_url: String::new(),
                }],
                schema_url: String::new(),
            }],
        })
        .await
        .unwrap();

    let trace_hex = hex::encode(trace);
    let (status, body) = get_json(&app, &format!("/api/logs?trace_id={trace_hex}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);
    assert_eq!(body[0]["severity"], "INFO");
    assert_eq!(body[0]["body"], "hi");
    assert_eq!(body[0]["trace_id"], trace_hex);
}

// ---------------------------------------------------------------------------
// Scenario 3: cardinality drop
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cardinality_limit_drops_excess_metric_names() {
    let state = test_state(|config| config.max_metric_cardinality = 2);
    let grpc_addr = start_grpc(&state).await;
    let app = http_app(&state);

    let mut client = MetricsServiceClient::connect(format!("http://{grpc_addr}"))
        .await
        .unwrap();
    let response = client
        .export(gauge_request(&["a", "b", "c"]))
        .await
        .unwrap()
        .into_inner();
    let partial = response.partial_success.expect("points were dropped");
    assert_eq!(partial.rejected_data_points, 1);

    let (_, stats) = get_json(&app, "/api/stats").await;
    assert_eq!(stats["metrics"], 2);
    assert!(stats["metrics_dropped"].as_u64().unwrap() >= 1);

    let (_, metrics) = get_json(&app, "/api/metrics").await;
    let names: Vec<&str> = metrics
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["a", "b"]);
}

// ---------------------------------------------------------------------------
// Scenario 4: service map edge inference
// ---------------------------------------------------------------------------

#[tokio::test]
async fn service_map_infers_parent_child_edge() {
    let state = test_state(|_| {});
    let grpc_addr = start_grpc(&state).await;
    let app = http_app(&state);

    let trace = [9u8; 16];
    let mut client = TraceServiceClient::connect(format!("http://{grpc_addr}"))
        .await
        .unwrap();
    client
        .export(span_request(
            "frontend",
            vec![SpanSpec {
                trace,
                span: [1; 8],
                parent: None,
                name: "parent",
                start_ns: 1_000,
                end_ns: 5_000,
                status_code: 0,
            }],
        ))
        .await
        .unwrap();
    client
        .export(span_request(
            "backend",
            vec![SpanSpec {
                trace,
                span: [2; 8],
                parent: Some([1; 8]),
                name: "child",
                start_ns: 2_000,
                end_ns: 4_000,
                status_code: 0,
            }],
        ))
        .await
        .unwrap();

    let (status, map) = get_json(&app, "/api/service-map").await;
    assert_eq!(status, StatusCode::OK);

    let node_ids: Vec<&str> = map["nodes"]
        .as_array()
        .unwrap()
        .iter()
        .map(|n| n["id"].as_str().unwrap())
        .collect();
    assert!(node_ids.contains(&"frontend"));
    assert!(node_ids.contains(&"backend"));

    let edges = map["edges"].as_array().unwrap();
    assert_eq!(edges.len(), 1);
    assert_eq!(edges[0]["source"], "frontend");
    assert_eq!(edges[0]["target"], "backend");
    assert_eq!(edges[0]["call_count"], 1);

    // Degree-based node typing: frontend only calls out, backend only
    // receives.
    for node in map["nodes"].as_array().unwrap() {
        match node["id"].as_str().unwrap() {
            "frontend" => assert_eq!(node["type"], "client"),
            "backend" => assert_eq!(node["type"], "external"),
            other => panic!("unexpected node {other}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Scenario 5: RED metrics percentiles
// ---------------------------------------------------------------------------

#[tokio::test]
async fn service_catalog_percentiles_from_span_samples() {
    let state = test_state(|_| {});
    let grpc_addr = start_grpc(&state).await;
    let app = http_app(&state);

    // 100 spans with durations 0..100 ms, uniformly distributed.
    let base = 1_000_000_000_000u64;
    let mut client = TraceServiceClient::connect(format!("http://{grpc_addr}"))
        .await
        .unwrap();
    for i in 0..100u64 {
        let mut trace = [0u8; 16];
        trace[..8].copy_from_slice(&i.to_be_bytes());
        trace[8] = 1;
        let mut span = [0u8; 8];
        span[..8].copy_from_slice(&(i + 1).to_be_bytes());
        client
            .export(span_request(
                "svc",
                vec![SpanSpec {
                    trace,
                    span,
                    parent: None,
                    name: "op",
                    start_ns: base,
                    end_ns: base + i * 1_000_000,
                    status_code: 0,
                }],
            ))
            .await
            .unwrap();
    }

    let (status, catalog) = get_json(&app, "/api/service-catalog").await;
    assert_eq!(status, StatusCode::OK);
    let entry = catalog
        .as_array()
        .unwrap()
        .iter()
        .find(|e| e["name"] == "svc")
        .expect("svc entry");
    assert_eq!(entry["span_count"], 100);
    assert_eq!(entry["trace_count"], 100);
    assert_eq!(entry["error_rate"], 0.0);
    let p50 = entry["duration_p50"].as_f64().unwrap();
    let p95 = entry["duration_p95"].as_f64().unwrap();
    assert!((p50 - 50.0).abs() < 5.0, "p50 was {p50}");
    assert!((p95 - 95.0).abs() < 5.0, "p95 was {p95}");
}

// ---------------------------------------------------------------------------
// Scenario 6: OpAMP config push
// ---------------------------------------------------------------------------

const COLLECTOR_CONFIG: &str =
    "receivers: {otlp: {}}\nexporters: {debug: {}}\nservice: {pipelines: {}}\n";

async fn start_opamp(state: &Arc<AppState>) -> (SocketAddr, Router) {
    let ws_app = opamp::ws_routes().with_state(Arc::clone(state));
    let rest_app = opamp::rest_routes().with_state(Arc::clone(state));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, ws_app).await.unwrap();
    });
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    (addr, rest_app)
}

fn agent_hello(uid: &[u8]) -> pb::AgentToServer {
    pb::AgentToServer {
        instance_uid: uid.to_vec(),
        agent_description: Some(pb::AgentDescription {
            identifying_attributes: vec![pb::KeyValue {
                key: "service.name".into(),
                value: Some(pb::AnyValue {
                    value: Some(pb::any_value::Value::StringValue("otel-collector".into())),
                }),
            }],
            non_identifying_attributes: vec![],
        }),
        ..Default::default()
    }
}

#[tokio::test]
async fn opamp_push_delivers_config_with_changing_hash() {
    let state = test_state(|_| {});
    let (ws_addr, rest_app) = start_opamp(&state).await;

    let (mut socket, _) =
        tokio_tungstenite::connect_async(format!("ws://{ws_addr}/v1/opamp"))
            .await
            .unwrap();

    let uid = [0xcd; 16];

    // Register the agent.
    socket
        .send(WsMessage::Binary(agent_hello(&uid).encode_to_vec()))
        .await
        .unwrap();
    let reply = socket.next().await.unwrap().unwrap();
    let s2a = match reply {
        WsMessage::Binary(bytes) => pb::ServerToAgent::decode(bytes.as_slice()).unwrap(),
        other => panic!("expected binary frame, got {other:?}"),
    };
    assert!(s2a.remote_config.is_none());

    // The agent is visible on the REST surface.
    let (status, status_body) = get_json(&rest_app, "/status").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(status_body["agent_count"], 1);

    // Push a config to all connected agents.
    let (status, push) = post_body(
        &rest_app,
        "/config",
        "application/json",
        serde_json::to_vec(&serde_json::json!({ "config": COLLECTOR_CONFIG })).unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(push["status"], "pending");
    assert_eq!(push["affected_instance_ids"][0], hex::encode(uid));

    // The next AgentToServer receives the pending config.
    socket
        .send(WsMessage::Binary(agent_hello(&uid).encode_to_vec()))
        .await
        .unwrap();
    let reply = socket.next().await.unwrap().unwrap();
    let s2a = match reply {
        WsMessage::Binary(bytes) => pb::ServerToAgent::decode(bytes.as_slice()).unwrap(),
        other => panic!("expected binary frame, got {other:?}"),
    };
    let remote = s2a.remote_config.expect("remote config expected");
    let first_hash = remote.config_hash.clone();
    assert_eq!(
        remote.config.unwrap().config_map[""].body,
        COLLECTOR_CONFIG.as_bytes()
    );

    // The slot is cleared until the next push, whose hash differs.
    socket
        .send(WsMessage::Binary(agent_hello(&uid).encode_to_vec()))
        .await
        .unwrap();
    let reply = socket.next().await.unwrap().unwrap();
    if let WsMessage::Binary(bytes) = reply {
        assert!(pb::ServerToAgent::decode(bytes.as_slice())
            .unwrap()
            .remote_config
            .is_none());
    }

    post_body(
        &rest_app,
        "/config",
        "application/json",
        serde_json::to_vec(&serde_json::json!({ "config": COLLECTOR_CONFIG })).unwrap(),
    )
    .await;
    socket
        .send(WsMessage::Binary(agent_hello(&uid).encode_to_vec()))
        .await
        .unwrap();
    let reply = socket.next().await.unwrap().unwrap();
    if let WsMessage::Binary(bytes) = reply {
        let second = pb::ServerToAgent::decode(bytes.as_slice())
            .unwrap()
            .remote_config
            .expect("second push expected");
        assert_ne!(second.config_hash, first_hash);
    }
}

#[tokio::test]
async fn opamp_rejects_structurally_invalid_config() {
    let state = test_state(|_| {});
    let rest_app = opamp::rest_routes().with_state(Arc::clone(&state));

    let (status, body) = post_body(
        &rest_app,
        "/config",
        "application/json",
        serde_json::to_vec(&serde_json::json!({ "config": "receivers: {}\n" })).unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("exporters"));

    let (status, _) = post_body(
        &rest_app,
        "/config",
        "application/json",
        serde_json::to_vec(
            &serde_json::json!({ "config": COLLECTOR_CONFIG, "instance_id": "missing" }),
        )
        .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// ---------------------------------------------------------------------------
// HTTP ingest path
// ---------------------------------------------------------------------------

#[tokio::test]
async fn http_json_ingest_reaches_query_api() {
    let state = test_state(|_| {});
    let app = http_app(&state);

    let payload = serde_json::json!({
        "resourceSpans": [{
            "resource": {"attributes": [
                {"key": "service.name", "value": {"stringValue": "web"}}
            ]},
            "scopeSpans": [{
                "spans": [{
                    "traceId": "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa",
                    "spanId": "bbbbbbbbbbbbbbbb",
                    "name": "GET /json",
                    "kind": 2,
                    "startTimeUnixNano": "1000",
                    "endTimeUnixNano": "2000"
                }]
            }]
        }]
    });
    let (status, body) = post_body(
        &app,
        "/v1/traces",
        "application/json",
        serde_json::to_vec(&payload).unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.get("partialSuccess").is_none());

    let (status, trace) =
        get_json(&app, "/api/traces/aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(trace["spans"][0]["name"], "GET /json");
}

#[tokio::test]
async fn http_protobuf_ingest_works() {
    let state = test_state(|_| {});
    let app = http_app(&state);

    let request = span_request(
        "pb-svc",
        vec![SpanSpec {
            trace: [3; 16],
            span: [4; 8],
            parent: None,
            name: "pb",
            start_ns: 1,
            end_ns: 2,
            status_code: 0,
        }],
    );
    let (status, _) = post_body(
        &app,
        "/v1/traces",
        "application/x-protobuf",
        request.encode_to_vec(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, spans) = get_json(&app, "/api/spans?service=pb-svc").await;
    assert_eq!(spans.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn http_ingest_rejects_garbage_and_oversize() {
    let state = test_state(|config| config.max_request_bytes = 1024);
    let app = http_app(&state);

    let (status, _) = post_body(
        &app,
        "/v1/traces",
        "application/json",
        b"not json".to_vec(),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = post_body(
        &app,
        "/v1/logs",
        "application/json",
        vec![b'x'; 4096],
    )
    .await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);

    let (status, _) = post_body(&app, "/v1/metrics", "text/plain", b"{}".to_vec()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

// ---------------------------------------------------------------------------
// Property checks
// ---------------------------------------------------------------------------

#[tokio::test]
async fn duplicate_span_ingest_does_not_duplicate() {
    let state = test_state(|_| {});
    let grpc_addr = start_grpc(&state).await;
    let app = http_app(&state);

    let request = span_request(
        "dup",
        vec![SpanSpec {
            trace: [5; 16],
            span: [6; 8],
            parent: None,
            name: "same",
            start_ns: 1,
            end_ns: 2,
            status_code: 0,
        }],
    );
    let mut client = TraceServiceClient::connect(format!("http://{grpc_addr}"))
        .await
        .unwrap();
    client.export(request.clone()).await.unwrap();
    client.export(request).await.unwrap();

    let (_, trace) = get_json(&app, &format!("/api/traces/{}", hex::encode([5u8; 16]))).await;
    assert_eq!(trace["span_count"], 1);

    let (_, stats) = get_json(&app, "/api/stats").await;
    assert_eq!(stats["spans"], 1);
    assert_eq!(stats["traces"], 1);
}

#[tokio::test]
async fn self_telemetry_is_filtered_from_queries() {
    let state = test_state(|_| {});
    let grpc_addr = start_grpc(&state).await;
    let app = http_app(&state);

    let mut client = TraceServiceClient::connect(format!("http://{grpc_addr}"))
        .await
        .unwrap();
    // One span from the server itself, one from a real service.
    client
        .export(span_request(
            "tinyolly",
            vec![SpanSpec {
                trace: [1; 16],
                span: [1; 8],
                parent: None,
                name: "self-span",
                start_ns: 1,
                end_ns: 2,
                status_code: 0,
            }],
        ))
        .await
        .unwrap();
    client
        .export(span_request(
            "app",
            vec![SpanSpec {
                trace: [2; 16],
                span: [2; 8],
                parent: None,
                name: "app-span",
                start_ns: 1,
                end_ns: 2,
                status_code: 0,
            }],
        ))
        .await
        .unwrap();

    let (_, spans) = get_json(&app, "/api/spans").await;
    let names: Vec<&str> = spans
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["service_name"].as_str().unwrap())
        .collect();
    assert!(names.contains(&"app"));
    assert!(!names.contains(&"tinyolly"));

    let (_, traces) = get_json(&app, "/api/traces").await;
    assert_eq!(traces.as_array().unwrap().len(), 1);

    let (_, catalog) = get_json(&app, "/api/service-catalog").await;
    assert!(catalog
        .as_array()
        .unwrap()
        .iter()
        .all(|e| e["name"] != "tinyolly"));

    // The self trace is fully hidden, not partially rendered.
    let (status, _) = get_json(&app, &format!("/api/traces/{}", hex::encode([1u8; 16]))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn expired_records_are_not_served() {
    let state = test_state(|config| config.retention_seconds = 0);
    // Store built with retention 0: everything is immediately expired.
    let grpc_addr = start_grpc(&state).await;
    let app = http_app(&state);

    let mut client = TraceServiceClient::connect(format!("http://{grpc_addr}"))
        .await
        .unwrap();
    client
        .export(span_request(
            "gone",
            vec![SpanSpec {
                trace: [8; 16],
                span: [8; 8],
                parent: None,
                name: "old",
                start_ns: 1,
                end_ns: 2,
                status_code: 0,
            }],
        ))
        .await
        .unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(10)).await;

    let (_, traces) = get_json(&app, "/api/traces").await;
    assert!(traces.as_array().unwrap().is_empty());
    let (status, _) = get_json(&app, &format!("/api/traces/{}", hex::encode([8u8; 16]))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn metric_series_and_cardinality_views() {
    let state = test_state(|_| {});
    let grpc_addr = start_grpc(&state).await;
    let app = http_app(&state);

    let mut client = MetricsServiceClient::connect(format!("http://{grpc_addr}"))
        .await
        .unwrap();
    // Two series of one metric, distinguished by the "core" attribute.
    let request = ExportMetricsServiceRequest {
        resource_metrics: vec![ResourceMetrics {
            resource: Some(service_resource("svc")),
            scope_metrics: vec![ScopeMetrics {
                scope: None,
                metrics: vec![Metric {
                    name: "cpu.usage".into(),
                    unit: "%".into(),
                    data: Some(metric::Data::Gauge(Gauge {
                        data_points: vec![
                            NumberDataPoint {
                                attributes: vec![str_attr("core", "0")],
                                time_unix_nano: now_ns(),
                                value: Some(number_data_point::Value::AsDouble(0.25)),
                                ..Default::default()
                            },
                            NumberDataPoint {
                                attributes: vec![str_attr("core", "1")],
                                time_unix_nano: now_ns(),
                                value: Some(number_data_point::Value::AsDouble(0.75)),
                                ..Default::default()
                            },
                        ],
                    })),
                    ..Default::default()
                }],
                schema_url: String::new(),
            }],
            schema_url: String::new(),
        }],
    };
    client.export(request).await.unwrap();

    let (status, detail) = get_json(&app, "/api/metrics/cpu.usage").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(detail["type"], "gauge");
    assert_eq!(detail["series"].as_array().unwrap().len(), 2);

    // Resource filters narrow the series set.
    let (_, filtered) =
        get_json(&app, "/api/metrics/cpu.usage?resource.service.name=svc").await;
    assert_eq!(filtered["series"].as_array().unwrap().len(), 2);
    let (_, none) =
        get_json(&app, "/api/metrics/cpu.usage?resource.service.name=other").await;
    assert_eq!(none["series"].as_array().unwrap().len(), 0);

    let (status, cardinality) = get_json(&app, "/api/metrics/cpu.usage/cardinality").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cardinality["series_count"], 2);
    assert_eq!(cardinality["active_series"], 2);
    assert_eq!(cardinality["label_dimensions"], 1);
    assert_eq!(cardinality["labels"][0]["key"], "core");
    assert_eq!(cardinality["labels"][0]["cardinality"], 2);

    let (status, _) = get_json(&app, "/api/metrics/unknown.metric").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn health_and_prometheus_endpoints() {
    let state = test_state(|_| {});
    let app = http_app(&state);

    let (status, health) = get_json(&app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "healthy");

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let text = String::from_utf8(
        axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec(),
    )
    .unwrap();
    assert!(text.contains("tinyolly_store_bytes"));
}
