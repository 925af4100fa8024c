use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vstage_api::config::ServerConfig;
use vstage_api::router::build_app_router;
use vstage_api::state::AppState;
use vstage_pipeline::config::PipelineConfig;
use vstage_pipeline::orchestrator::Orchestrator;
use vstage_pipeline::template::GraphTemplate;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "vstage_api=debug,vstage_pipeline=debug,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env().context("Invalid server configuration")?;
    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");

    let pipeline = PipelineConfig::from_env().context("Invalid pipeline configuration")?;
    pipeline.ensure_directories()?;
    tracing::info!(
        engine_url = %pipeline.engine_url,
        engine_input_dir = %pipeline.engine_input_dir.display(),
        output_dir = %pipeline.output_dir.display(),
        "Loaded pipeline configuration",
    );

    // --- Workflow template ---
    let template = GraphTemplate::load(
        &pipeline.template_path,
        pipeline.nodes.clone(),
        pipeline.checkpoint_name.clone(),
    )?;

    // --- Orchestrator ---
    let orchestrator = Orchestrator::new(Arc::new(pipeline), Arc::new(template))?;
    if orchestrator.engine_reachable().await {
        tracing::info!(engine_url = %orchestrator.api().api_url(), "ComfyUI is reachable");
    } else {
        tracing::warn!(
            engine_url = %orchestrator.api().api_url(),
            "ComfyUI is not reachable yet; requests will fail until it is started",
        );
    }

    // --- App state ---
    let state = AppState {
        config: Arc::new(config.clone()),
        orchestrator: Arc::new(orchestrator),
    };
    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr = SocketAddr::new(
        config
            .host
            .parse()
            .with_context(|| format!("Invalid HOST address '{}'", config.host))?,
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Graceful shutdown complete");
    Ok(())
}

/// Wait for SIGINT or SIGTERM to initiate graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
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
