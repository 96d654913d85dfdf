use anyhow::{Context, Result};
use idcheck_core::Verifier;
use std::sync::Arc;
use tokio::signal;
use tracing_subscriber::EnvFilter;

mod config;
mod engine;
mod error;
mod routes;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("idcheckd starting");

    let config = config::Config::from_env();
    let settings = &config.settings;
    tracing::info!(
        listen = %config.listen_addr,
        model_dir = %settings.model_dir.display(),
        store = %settings.store_path.display(),
        threshold = settings.similarity_threshold,
        live_face = ?settings.live_face,
        store_policy = ?settings.store_policy,
        "configuration loaded"
    );

    // Fail fast if either ONNX model is missing.
    let providers = settings
        .load_providers()
        .context("failed to load verification providers")?;
    let verifier = Verifier::new(providers, settings.verifier_config());
    let engine = engine::EngineHandle::new(Arc::new(verifier), config.verify_timeout());

    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr))?;

    tracing::info!(addr = %config.listen_addr, "idcheckd ready");

    axum::serve(listener, routes::router(engine, config.max_upload_bytes))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("idcheckd shutting down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::warn!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
