//! OpAMP control plane.
//!
//! Remote-configures the OpenTelemetry Collectors connected to the system.
//! Collectors speak OpAMP over a WebSocket at `/v1/opamp` (binary frames
//! carrying the protobufs in [`crate::opamp_proto`]); the UI talks to a
//! small REST surface on a separate port.
//!
//! Agent state is held in a read/write-locked registry: status queries are
//! frequent readers, message handlers the few writers. A pending
//! configuration slot per instance id is last-write-wins and is drained
//! into the next `ServerToAgent` reply.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use prost::Message as _;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tinyolly_core::{AgentState, AgentStatus, TinyOllyError};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::opamp_proto as pb;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Default collector configuration
// ---------------------------------------------------------------------------

/// Pushed to collectors that have never been configured, unless a config
/// file is provided via `collector_config_path`.
const DEFAULT_COLLECTOR_CONFIG: &str = r#"receivers:
  otlp:
    protocols:
      grpc:
        endpoint: 0.0.0.0:4317
      http:
        endpoint: 0.0.0.0:4318

extensions:
  opamp:
    server:
      ws:
        endpoint: ws://tinyolly:4320/v1/opamp

processors:
  batch:
    timeout: 1s
    send_batch_size: 1024

exporters:
  debug:
    verbosity: detailed

  otlp:
    endpoint: "tinyolly:4343"
    tls:
      insecure: true

service:
  extensions: [opamp]
  pipelines:
    traces:
      receivers: [otlp]
      processors: [batch]
      exporters: [debug, otlp]

    metrics:
      receivers: [otlp]
      processors: [batch]
      exporters: [debug, otlp]

    logs:
      receivers: [otlp]
      processors: [batch]
      exporters: [debug, otlp]
"#;

/// Structural validation of a collector configuration: the YAML must parse
/// into a mapping carrying the `receivers`, `exporters`, and `service`
/// sections. Anything deeper is the collector's own business.
pub fn validate_collector_config(yaml: &str) -> Result<(), String> {
    let value: serde_yaml::Value =
        serde_yaml::from_str(yaml).map_err(|e| format!("invalid YAML: {e}"))?;
    if !value.is_mapping() {
        return Err("config must be a YAML mapping".to_string());
    }
    for required in ["receivers", "exporters", "service"] {
        if value.get(required).is_none() {
            return Err(format!("missing required section {required:?}"));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Agent registry
// ---------------------------------------------------------------------------

/// State shared between the WebSocket sessions and the REST surface.
pub struct AgentRegistry {
    agents: RwLock<HashMap<String, AgentState>>,
    pending: RwLock<HashMap<String, String>>,
    default_config: RwLock<String>,
}

impl AgentRegistry {
    /// Create a registry whose default config comes from `config_path` when
    /// set and readable, falling back to the built-in collector config.
    pub fn new(config_path: Option<&str>) -> Self {
        let default_config = config_path
            .and_then(|path| match std::fs::read_to_string(path) {
                Ok(contents) => {
                    info!(path, "loaded initial collector config");
                    Some(contents)
                }
                Err(e) => {
                    warn!(path, "could not read collector config: {e}");
                    None
                }
            })
            .unwrap_or_else(|| DEFAULT_COLLECTOR_CONFIG.to_string());
        Self {
            agents: RwLock::new(HashMap::new()),
            pending: RwLock::new(HashMap::new()),
            default_config: RwLock::new(default_config),
        }
    }

    /// Handle one `AgentToServer` message: upsert the agent's state and
    /// drain its pending config slot into the reply.
    pub async fn handle_message(&self, msg: pb::AgentToServer, now_ns: u64) -> pb::ServerToAgent {
        if msg.instance_uid.is_empty() {
            debug!("OpAMP message without instance uid");
            return pb::ServerToAgent::default();
        }
        let instance_id = hex::encode(&msg.instance_uid);

        {
            let mut agents = self.agents.write().await;
            let agent = agents
                .entry(instance_id.clone())
                .or_insert_with(|| AgentState {
                    instance_id: instance_id.clone(),
                    agent_type: "otel-collector".to_string(),
                    agent_version: String::new(),
                    effective_config: String::new(),
                    status: AgentStatus::Connected,
                    last_seen_ns: now_ns,
                });
            agent.status = AgentStatus::Connected;
            agent.last_seen_ns = now_ns;

            if let Some(description) = &msg.agent_description {
                for attr in &description.identifying_attributes {
                    let Some(value) = attr.value.as_ref().and_then(pb::AnyValue::as_str) else {
                        continue;
                    };
                    match attr.key.as_str() {
                        "service.name" => agent.agent_type = value.to_string(),
                        "service.version" => agent.agent_version = value.to_string(),
                        _ => {}
                    }
                }
            }

            if let Some(config) = &msg.effective_config {
                if let Some(map) = &config.config_map {
                    if let Some(body) = map.config_map.values().next() {
                        agent.effective_config =
                            String::from_utf8_lossy(&body.body).into_owned();
                    }
                }
            }
        }

        if msg.agent_disconnect.is_some() {
            self.mark_disconnected(&instance_id, now_ns).await;
            return pb::ServerToAgent {
                instance_uid: msg.instance_uid,
                ..Default::default()
            };
        }

        let pending = self.pending.write().await.remove(&instance_id);
        let remote_config = pending.map(|config| {
            info!(instance_id = %instance_id, "sending pending config to agent");
            pb::AgentRemoteConfig {
                config: Some(pb::AgentConfigMap {
                    config_map: [(
                        String::new(),
                        pb::AgentConfigFile {
                            body: config.into_bytes(),
                            content_type: "text/yaml".to_string(),
                        },
                    )]
                    .into_iter()
                    .collect(),
                }),
                // Unique per push so agents always observe a change.
                config_hash: now_ns.to_string().into_bytes(),
            }
        });

        pb::ServerToAgent {
            instance_uid: msg.instance_uid,
            remote_config,
            ..Default::default()
        }
    }

    /// Mark an agent disconnected, keeping its record for inspection.
    pub async fn mark_disconnected(&self, instance_id: &str, now_ns: u64) {
        let mut agents = self.agents.write().await;
        if let Some(agent) = agents.get_mut(instance_id) {
            agent.status = AgentStatus::Disconnected;
            agent.last_seen_ns = now_ns;
            info!(instance_id, "agent disconnected");
        }
    }

    /// Transition agents that missed their heartbeat to disconnected.
    pub async fn reap_stale(&self, now_ns: u64, heartbeat_ns: u64) -> usize {
        let mut agents = self.agents.write().await;
        let mut reaped = 0;
        for agent in agents.values_mut() {
            if agent.status == AgentStatus::Connected
                && agent.last_seen_ns.saturating_add(heartbeat_ns) < now_ns
            {
                agent.status = AgentStatus::Disconnected;
                reaped += 1;
                warn!(instance_id = %agent.instance_id, "agent missed heartbeat");
            }
        }
        reaped
    }

    pub async fn connected_count(&self) -> usize {
        self.agents
            .read()
            .await
            .values()
            .filter(|a| a.status == AgentStatus::Connected)
            .count()
    }

    pub async fn snapshot(&self) -> HashMap<String, AgentState> {
        self.agents.read().await.clone()
    }

    pub async fn default_config(&self) -> String {
        self.default_config.read().await.clone()
    }

    /// Store a new default config and queue it as pending for the addressed
    /// agent, or for every currently connected agent. Returns the affected
    /// instance ids, or `None` when an explicitly addressed agent is
    /// unknown.
    pub async fn push_config(
        &self,
        config: String,
        instance_id: Option<&str>,
    ) -> Option<Vec<String>> {
        let affected: Vec<String> = {
            let agents = self.agents.read().await;
            match instance_id {
                Some(id) => {
                    if !agents.contains_key(id) {
                        return None;
                    }
                    vec![id.to_string()]
                }
                None => agents
                    .values()
                    .filter(|a| a.status == AgentStatus::Connected)
                    .map(|a| a.instance_id.clone())
                    .collect(),
            }
        };

        *self.default_config.write().await = config.clone();

        let mut pending = self.pending.write().await;
        for id in &affected {
            pending.insert(id.clone(), config.clone());
            debug!(instance_id = %id, "queued config update");
        }
        Some(affected)
    }
}

// ---------------------------------------------------------------------------
// WebSocket endpoint
// ---------------------------------------------------------------------------

async fn opamp_ws(State(state): State<Arc<AppState>>, ws: WebSocketUpgrade) -> Response {
    ws.max_message_size(state.config.max_request_bytes)
        .on_upgrade(move |socket| handle_session(state, socket))
}

async fn handle_session(state: Arc<AppState>, mut socket: WebSocket) {
    let mut instance_id: Option<String> = None;
    let shutdown = state.shutdown.signal();

    loop {
        let received = tokio::select! {
            _ = shutdown.cancelled() => break,
            msg = socket.recv() => msg,
        };
        let Some(msg) = received else { break };

        match msg {
            Ok(Message::Binary(bytes)) => {
                let a2s = match pb::AgentToServer::decode(bytes.as_slice()) {
                    Ok(a2s) => a2s,
                    Err(e) => {
                        warn!("undecodable OpAMP frame: {e}");
                        continue;
                    }
                };
                if !a2s.instance_uid.is_empty() {
                    instance_id = Some(hex::encode(&a2s.instance_uid));
                }
                let disconnecting = a2s.agent_disconnect.is_some();
                let reply = state.agents.handle_message(a2s, AppState::now_ns()).await;
                state
                    .metrics
                    .opamp_agents_connected
                    .set(state.agents.connected_count().await as i64);
                if socket.send(Message::Binary(reply.encode_to_vec())).await.is_err() {
                    break;
                }
                if disconnecting {
                    break;
                }
            }
            Ok(Message::Ping(payload)) => {
                if socket.send(Message::Pong(payload)).await.is_err() {
                    break;
                }
            }
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => {}
        }
    }

    if let Some(id) = instance_id {
        state.agents.mark_disconnected(&id, AppState::now_ns()).await;
    }
    state
        .metrics
        .opamp_agents_connected
        .set(state.agents.connected_count().await as i64);
}

/// Routes for the OpAMP WebSocket listener.
pub fn ws_routes() -> Router<Arc<AppState>> {
    Router::new().route("/v1/opamp", get(opamp_ws))
}

// ---------------------------------------------------------------------------
// REST surface
// ---------------------------------------------------------------------------

async fn rest_health() -> Response {
    Json(json!({ "status": "healthy" })).into_response()
}

async fn rest_status(State(state): State<Arc<AppState>>) -> Response {
    let agents = state.agents.snapshot().await;
    Json(json!({
        "status": "ok",
        "agent_count": agents.len(),
        "agents": agents,
    }))
    .into_response()
}

/// Map a core error to the REST surface's status codes.
fn rest_error(err: TinyOllyError) -> Response {
    let status = match &err {
        TinyOllyError::NotFound => StatusCode::NOT_FOUND,
        TinyOllyError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(json!({ "error": err.to_string() }))).into_response()
}

#[derive(Debug, Deserialize)]
struct ConfigQuery {
    instance_id: Option<String>,
}

async fn rest_get_config(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ConfigQuery>,
) -> Response {
    let agents = state.agents.snapshot().await;

    if let Some(id) = query.instance_id {
        return match agents.get(&id) {
            Some(agent) => Json(json!({
                "instance_id": id,
                "config": agent.effective_config,
                "status": agent.status,
            }))
            .into_response(),
            None => rest_error(TinyOllyError::NotFound),
        };
    }

    if let Some(agent) = agents.values().find(|a| a.status == AgentStatus::Connected) {
        return Json(json!({
            "instance_id": agent.instance_id,
            "config": agent.effective_config,
            "status": agent.status,
        }))
        .into_response();
    }

    Json(json!({
        "config": state.agents.default_config().await,
        "status": "no_agents_connected",
    }))
    .into_response()
}

#[derive(Debug, Deserialize)]
struct ConfigUpdateRequest {
    config: String,
    instance_id: Option<String>,
}

async fn rest_post_config(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ConfigUpdateRequest>,
) -> Response {
    if request.config.is_empty() {
        return rest_error(TinyOllyError::InvalidInput("config is required".to_string()));
    }
    if let Err(reason) = validate_collector_config(&request.config) {
        return rest_error(TinyOllyError::InvalidInput(reason));
    }

    match state
        .agents
        .push_config(request.config, request.instance_id.as_deref())
        .await
    {
        Some(affected) => Json(json!({
            "status": "pending",
            "message": format!("Config update queued for {} agent(s)", affected.len()),
            "affected_instance_ids": affected,
        }))
        .into_response(),
        None => rest_error(TinyOllyError::NotFound),
    }
}

/// Routes for the OpAMP REST listener.
pub fn rest_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(rest_health))
        .route("/status", get(rest_status))
        .route("/config", get(rest_get_config).post(rest_post_config))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
