mod backend;
mod config;
mod error;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::info;
use crate::backend::{app_router, build_pipeline};
use crate::config::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let config = AppConfig::load()?;
    info!(
        "Starting vidgen ({:?} backend, {:?} output, {} generation slot(s))",
        config.backend, config.codec, config.max_concurrent_generations
    );

    let pipeline = {
        let config = config.clone();
        tokio::task::spawn_blocking(move || build_pipeline(&config))
            .await
            .context("Model loading task failed")??
    };

    let app = app_router(pipeline, &config);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    info!("Listening on {}", addr);
    axum::serve(listener, app).await.context("Server failed")?;

    Ok(())
}
