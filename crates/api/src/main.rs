use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use axum::Router;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use remgo_api::config::ServerConfig;
use remgo_api::engine::TaskCoordinator;
use remgo_api::{routes, state, ws};
use remgo_core::gpu_config::GpuConfigFile;
use remgo_core::scheduler::GpuScheduler;
use remgo_db::MetadataStore;
use remgo_worker::{WorkerCommand, WorkerSupervisor};

use state::AppState;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "remgo_api=debug,remgo_worker=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env();
    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");

    if !config.outputs_dir.exists() {
        std::fs::create_dir_all(&config.outputs_dir).expect("Failed to create outputs directory");
    }

    // --- GPU slot table & scheduler ---
    let gpu_config = GpuConfigFile::load(&config.gpu_config_path);
    let scheduler = Arc::new(GpuScheduler::new(&gpu_config, config.worker_base_port));
    tracing::info!(
        gpu_count = scheduler.gpu_count(),
        multi_gpu = scheduler.multi_enabled(),
        "GPU scheduler ready",
    );

    // --- Worker supervisor ---
    let worker_command = WorkerCommand::parse(&config.worker_command)
        .expect("WORKER_CMD must name a worker program");
    let supervisor = WorkerSupervisor::start(worker_command, &scheduler.slots()).await;
    tracing::info!("Worker supervisor started");

    // Park the slot of any worker that never becomes healthy so the
    // scheduler stops assigning to it.
    {
        let mut events = supervisor.subscribe();
        let scheduler = Arc::clone(&scheduler);
        tokio::spawn(async move {
            while let Ok(event) = events.recv().await {
                if let remgo_worker::WorkerEvent::Unusable { device } = event {
                    tracing::warn!(device, "Parking slot of unusable worker");
                    scheduler.mark_busy(device, true);
                }
            }
        });
    }

    // --- WebSocket manager & heartbeat ---
    let ws_manager = Arc::new(ws::WsManager::new());
    let heartbeat_handle = ws::start_heartbeat(Arc::clone(&ws_manager));

    // --- Task coordinator ---
    let coordinator = TaskCoordinator::new(
        Arc::clone(&scheduler),
        Arc::clone(&supervisor),
        Arc::clone(&ws_manager),
        Duration::from_secs(config.subtask_timeout_secs),
    );

    // --- Metadata sidecar ---
    let metadata = Arc::new(MetadataStore::new(config.metadata_db_path()));

    // --- App state ---
    let state = AppState {
        config: Arc::new(config.clone()),
        scheduler,
        supervisor: Arc::clone(&supervisor),
        coordinator,
        ws_manager: Arc::clone(&ws_manager),
        metadata,
    };

    // --- CORS ---
    let cors = build_cors_layer(&config);

    // --- Request ID header name ---
    let request_id_header = axum::http::HeaderName::from_static("x-request-id");

    // --- Router ---
    let app = Router::new()
        .merge(routes::router(&config.outputs_dir))
        // -- Middleware stack (applied bottom-up) --
        // Panic recovery: catch panics and return 500 JSON.
        .layer(CatchPanicLayer::new())
        // Request timeout.
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(config.request_timeout_secs),
        ))
        // Propagate request ID to response.
        .layer(PropagateRequestIdLayer::new(request_id_header.clone()))
        // Structured request/response tracing.
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        // Set request ID on incoming requests.
        .layer(SetRequestIdLayer::new(request_id_header, MakeRequestUuid))
        // CORS.
        .layer(cors)
        // Shared state.
        .with_state(state);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");

    // Terminate workers first; in-flight tasks finalize as errors.
    supervisor.shutdown().await;
    tracing::info!("Worker supervisor shut down");

    let ws_count = ws_manager.connection_count().await;
    tracing::info!(ws_count, "Closing remaining WebSocket connections");
    ws_manager.shutdown_all().await;

    heartbeat_handle.abort();
    tracing::info!("Graceful shutdown complete");
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix) so the server
/// shuts down cleanly whether stopped interactively or by a process
/// manager (e.g. systemd, Docker, the launcher).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}

/// Build the CORS middleware layer from server configuration.
///
/// A configured `*` origin allows any origin (the backend fronts a
/// local UI by default). Invalid origins panic at startup, which is the
/// desired behaviour -- misconfiguration should fail fast.
fn build_cors_layer(config: &ServerConfig) -> CorsLayer {
    if config.cors_origins.iter().any(|o| o == "*") {
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
    }

    let origins: Vec<_> = config
        .cors_origins
        .iter()
        .map(|o| {
            o.parse()
                .unwrap_or_else(|e| panic!("Invalid CORS origin '{o}': {e}"))
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(Any)
        .allow_headers(Any)
}
