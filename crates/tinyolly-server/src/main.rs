//! TinyOlly server binary.
//!
//! A single process hosting four listeners: the OTLP gRPC receiver, the
//! HTTP surface (OTLP/HTTP ingest + query API + Prometheus metrics), the
//! OpAMP WebSocket endpoint, and the OpAMP REST surface. Background tasks
//! run the TTL sweep and the OpAMP heartbeat reaper.

use axum::extract::State;
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::Router;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tinyolly_core::{ServerConfig, TinyOllyError};
use tinyolly_server::opamp::AgentRegistry;
use tinyolly_server::shutdown::ShutdownCoordinator;
use tinyolly_server::{api, config, grpc, opamp, otlp_http, AppState};
use tinyolly_storage::{MemoryStore, StoreConfig};
use tracing::{debug, error, info};

// ---------------------------------------------------------------------------
// CLI definition
// ---------------------------------------------------------------------------

/// TinyOlly: a lightweight OpenTelemetry-native observability backend.
#[derive(Parser)]
#[command(name = "tinyolly-server", version, about, long_about = None)]
struct Cli {
    /// Path to YAML configuration file.
    #[arg(short, long, global = true, env = "TINYOLLY_CONFIG")]
    config: Option<PathBuf>,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Override log output format (text, json).
    #[arg(long, global = true)]
    log_format: Option<String>,

    /// Subcommand to run. If omitted, starts the server.
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a configuration file and print resolved settings.
    Validate,
}

// ---------------------------------------------------------------------------
// Entrypoint
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_and_merge_config(&cli)?;

    match cli.command {
        Some(Commands::Validate) => run_validate(&config),
        None => {
            init_logging(&config);
            config.validate()?;
            run_server(config).await
        }
    }
}

// ---------------------------------------------------------------------------
// Configuration loading
// ---------------------------------------------------------------------------

/// Load configuration from file/defaults, then apply env var and CLI
/// overrides (highest precedence last).
fn load_and_merge_config(cli: &Cli) -> anyhow::Result<ServerConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            // Logging is not initialised yet; use eprintln for early
            // diagnostics.
            eprintln!("Loading configuration from {}", path.display());
            config::load_config(path)?
        }
        None => ServerConfig::default(),
    };

    config::apply_env_overrides(&mut config);

    if let Some(ref level) = cli.log_level {
        config.logging.level.clone_from(level);
    }
    if let Some(ref format) = cli.log_format {
        config.logging.format.clone_from(format);
    }

    Ok(config)
}

fn init_logging(config: &ServerConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.logging.level.clone()));
    if config.logging.format == "json" {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

// ---------------------------------------------------------------------------
// Subcommand: validate
// ---------------------------------------------------------------------------

fn run_validate(config: &ServerConfig) -> anyhow::Result<()> {
    config.validate()?;
    println!("Configuration is valid.\n");
    println!("Resolved configuration:");
    println!("{}", serde_yaml::to_string(config)?);
    Ok(())
}

// ---------------------------------------------------------------------------
// Request deadline
// ---------------------------------------------------------------------------

/// Enforce the server-side wall-clock limit on every HTTP request.
async fn deadline_middleware(
    State(state): State<Arc<AppState>>,
    request: axum::extract::Request,
    next: Next,
) -> Response {
    let deadline = Duration::from_secs(state.config.request_deadline_seconds);
    match tokio::time::timeout(deadline, next.run(request)).await {
        Ok(response) => response,
        Err(_) => {
            let err = TinyOllyError::DeadlineExceeded;
            (
                StatusCode::GATEWAY_TIMEOUT,
                axum::Json(serde_json::json!({ "error": err.to_string() })),
            )
                .into_response()
        }
    }
}

// ---------------------------------------------------------------------------
// Server assembly
// ---------------------------------------------------------------------------

async fn serve_http(
    name: &'static str,
    addr: String,
    app: Router,
    shutdown: ShutdownCoordinator,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "{name} listening");
    let token = shutdown.signal();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            token.cancelled().await;
            info!("{name} shutting down gracefully");
        })
        .await?;
    Ok(())
}

async fn run_server(config: ServerConfig) -> anyhow::Result<()> {
    info!(
        grpc = %config.grpc_listen_addr,
        http = %config.http_listen_addr,
        opamp_ws = %config.opamp_ws_listen_addr,
        opamp_rest = %config.opamp_rest_listen_addr,
        retention_seconds = config.retention_seconds,
        max_metric_cardinality = config.max_metric_cardinality,
        "Starting TinyOlly server"
    );

    let store = Arc::new(MemoryStore::new(StoreConfig {
        retention_seconds: config.retention_seconds,
        max_metric_cardinality: config.max_metric_cardinality,
        max_store_bytes: config.max_store_bytes,
    }));
    let agents = Arc::new(AgentRegistry::new(config.collector_config_path.as_deref()));
    let shutdown = ShutdownCoordinator::new(Duration::from_secs(30));
    let state = Arc::new(AppState::new(
        config.clone(),
        store,
        agents,
        shutdown.clone(),
    ));

    // HTTP surface: OTLP/HTTP ingest + query API + Prometheus metrics.
    let http_app = Router::new()
        .merge(otlp_http::routes())
        .merge(api::routes())
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            deadline_middleware,
        ))
        .with_state(Arc::clone(&state));

    let opamp_ws_app = opamp::ws_routes().with_state(Arc::clone(&state));
    let opamp_rest_app = opamp::rest_routes().with_state(Arc::clone(&state));

    let mut tasks = tokio::task::JoinSet::new();

    {
        let state = Arc::clone(&state);
        tasks.spawn(async move { grpc::run_grpc_server(state).await });
    }
    tasks.spawn(serve_http(
        "HTTP surface",
        config.http_listen_addr.clone(),
        http_app,
        shutdown.clone(),
    ));
    tasks.spawn(serve_http(
        "OpAMP WebSocket",
        config.opamp_ws_listen_addr.clone(),
        opamp_ws_app,
        shutdown.clone(),
    ));
    tasks.spawn(serve_http(
        "OpAMP REST",
        config.opamp_rest_listen_addr.clone(),
        opamp_rest_app,
        shutdown.clone(),
    ));

    spawn_sweeper(Arc::clone(&state));
    spawn_agent_reaper(Arc::clone(&state));

    // Shut down on SIGINT/SIGTERM, or when any listener fails.
    tokio::select! {
        _ = shutdown_signal() => {
            info!("shutdown signal received");
        }
        Some(result) = tasks.join_next() => {
            match result {
                Ok(Ok(())) => info!("listener exited"),
                Ok(Err(e)) => error!("listener failed: {e}"),
                Err(e) => error!("listener task panicked: {e}"),
            }
        }
    }

    shutdown.begin_shutdown();
    shutdown.drain().await;
    while tasks.join_next().await.is_some() {}
    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

// ---------------------------------------------------------------------------
// Background tasks
// ---------------------------------------------------------------------------

/// Periodically reclaim expired records.
fn spawn_sweeper(state: Arc<AppState>) {
    let token = state.shutdown.signal();
    tokio::spawn(async move {
        let mut ticker =
            tokio::time::interval(Duration::from_secs(state.config.sweep_interval_seconds));
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let _guard = state.shutdown.guard();
            match state.store.sweep_expired().await {
                Ok(report) => {
                    if report.spans_removed + report.logs_removed + report.points_removed > 0 {
                        debug!(
                            traces = report.traces_removed,
                            spans = report.spans_removed,
                            logs = report.logs_removed,
                            points = report.points_removed,
                            "TTL sweep reclaimed expired records"
                        );
                    }
                }
                Err(e) => error!("TTL sweep failed: {e}"),
            }
        }
    });
}

/// Transition OpAMP agents that missed their heartbeat to disconnected.
fn spawn_agent_reaper(state: Arc<AppState>) {
    let token = state.shutdown.signal();
    tokio::spawn(async move {
        let heartbeat = Duration::from_secs(state.config.opamp_heartbeat_seconds);
        let mut ticker = tokio::time::interval(heartbeat);
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let reaped = state
                .agents
                .reap_stale(AppState::now_ns(), heartbeat.as_nanos() as u64)
                .await;
            if reaped > 0 {
                state
                    .metrics
                    .opamp_agents_connected
                    .set(state.agents.connected_count().await as i64);
            }
        }
    });
}
