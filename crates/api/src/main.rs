use std::net::SocketAddr;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gridgen_comfyui::workflow::WorkflowTemplate;
use gridgen_comfyui::ComfyUIBackend;
use gridgen_core::preset::InMemoryPresets;
use gridgen_pipeline::{GridRunner, LocalImageStore, RunnerConfig};

use gridgen_api::config::ServerConfig;
use gridgen_api::router::build_app_router;
use gridgen_api::state::AppState;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "gridgen_api=debug,gridgen_pipeline=debug,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env();
    tracing::info!(host = %config.host, port = %config.port, user_id = %config.user_id, "Loaded server configuration");

    let runner_config = RunnerConfig::from_env().expect("Invalid grid runner configuration");
    tracing::info!(
        output_dir = %runner_config.output_dir.display(),
        max_simultaneous_gens = runner_config.max_simultaneous_gens,
        image_format = %runner_config.image_format,
        "Loaded grid runner configuration",
    );

    tokio::fs::create_dir_all(&runner_config.output_dir)
        .await
        .expect("Failed to create output directory");

    // --- Generation backend ---
    let workflow = WorkflowTemplate::load(&config.comfyui_workflow_path)
        .expect("Failed to load ComfyUI workflow template");
    let backend = Arc::new(ComfyUIBackend::new(
        &config.comfyui_api_url,
        &config.comfyui_ws_url,
        workflow,
    ));
    tracing::info!(api_url = %config.comfyui_api_url, "ComfyUI backend configured");

    // --- Presets ---
    let presets = match &config.presets_path {
        Some(path) => InMemoryPresets::load(path).expect("Failed to load presets"),
        None => InMemoryPresets::new(),
    };
    tracing::info!(count = presets.count_for(&config.user_id), "Presets loaded");

    // --- Grid runner ---
    let store = Arc::new(LocalImageStore::new(
        runner_config.output_dir.clone(),
        runner_config.output_url_base.clone(),
        runner_config.image_format.clone(),
    ));
    let shutdown = CancellationToken::new();
    let runner = GridRunner::new(runner_config, backend, store, Arc::new(presets))
        .with_shutdown(shutdown.clone());

    // --- App state ---
    let state = AppState {
        config: Arc::new(config.clone()),
        runner: Arc::new(runner),
    };

    // --- Router ---
    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    // Runs still streaming when the signal arrives are aborted so their
    // sockets close and the server can drain.
    let run_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            run_shutdown.cancel();
        })
        .await
        .expect("Server error");

    tracing::info!("Graceful shutdown complete");
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix).
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
