use std::sync::Arc;

use anyhow::Context;
use dotenvy::dotenv;
use tokio::net::TcpListener;
use tracing::{info, warn};

mod assets;
mod config;
mod handlers;
mod llm;
mod state;
mod utils;

use assets::AssetStore;
use config::Config;
use llm::{GeminiApi, MediaGenerator};
use state::AppState;
use utils::logging::init_logging;

async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!("Failed to install SIGTERM handler: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let _guards = init_logging(&config::load_log_level());
    let config = Arc::new(Config::load()?);

    let api = GeminiApi::new(&config)?;
    if config.has_api_key() {
        info!("Using Gemini model {}", api.model());
    } else {
        warn!("GOOGLE_API_KEY is not set; generation requests will return an error message");
    }
    if config.poll.is_bounded() {
        info!(
            "File processing wait is bounded (max_attempts={:?}, deadline={:?})",
            config.poll.max_attempts, config.poll.deadline
        );
    }

    let generator = MediaGenerator::new(Arc::new(api), &config);
    let assets = AssetStore::new(config.upload_dir.clone(), config.max_stored_uploads);
    assets.prepare().await?;

    let state = AppState::new(config.clone(), generator, assets.clone());
    let shutdown = state.shutdown.clone();
    let app = handlers::router(state);

    let bind_addr = config.bind_address();
    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;
    info!(
        "Multimodal studio listening on http://{}, available at http://localhost:{}",
        bind_addr, config.port
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            shutdown.cancel();
        })
        .await?;

    assets.clear().await;
    info!("Removed uploads from {}", assets.dir().display());
    Ok(())
}
