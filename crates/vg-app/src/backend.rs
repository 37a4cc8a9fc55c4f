mod routes;
mod schemas;
mod state;

use std::sync::Arc;
use anyhow::Context;
use axum::extract::DefaultBodyLimit;
use axum::Router;
use burn_ndarray::NdArray;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use vg_core::codec::VideoCodec;
use vg_core::lifecycle::ModelResources;
use vg_core::model::ModelProvider;
use vg_core::pipeline::StagedPipeline;
use vg_models::{FfmpegCodec, GifCodec, RemoteProvider, SyntheticProvider, WorkerClient};
use crate::backend::routes::api_routes;
use crate::backend::state::GenState;
use crate::config::{AppConfig, CodecKind, ModelBackend};

pub use schemas::ErrorResponse;

/// Load both models and assemble the pipeline.
///
/// Blocking: the remote backend uses a blocking HTTP client, so call this
/// from `spawn_blocking`.
pub fn build_pipeline(config: &AppConfig) -> anyhow::Result<StagedPipeline> {
    let provider: Box<dyn ModelProvider> = match config.backend {
        ModelBackend::Remote => {
            let worker = WorkerClient::new(&config.worker_url, config.worker_timeout)
                .context("Failed to create inference worker client")?;
            Box::new(RemoteProvider::new(worker))
        }
        ModelBackend::Synthetic => {
            warn!("Using the synthetic model backend, output is procedural");
            Box::new(SyntheticProvider::<NdArray>::new(Default::default()))
        }
    };

    let resources = ModelResources::load(provider.as_ref(), config.resources.clone())
        .context("Failed to load models")?;
    info!(
        "Models ready: {} ({}) + {}",
        config.resources.base_model_id,
        resources.variant().id(),
        config.resources.upsampler_model_id
    );

    Ok(StagedPipeline::new(resources, select_codec(config.codec)))
}

fn select_codec(kind: CodecKind) -> Arc<dyn VideoCodec> {
    match kind {
        CodecKind::Mp4 => {
            let ffmpeg = FfmpegCodec::default();
            if ffmpeg.is_available() {
                Arc::new(ffmpeg)
            } else {
                warn!("ffmpeg not found on PATH, falling back to GIF output");
                Arc::new(GifCodec)
            }
        }
        CodecKind::Gif => Arc::new(GifCodec),
    }
}

pub fn app_router(pipeline: StagedPipeline, config: &AppConfig) -> Router {
    let state = GenState::new(pipeline, config.max_concurrent_generations);

    Router::new()
        .merge(api_routes())
        .layer(DefaultBodyLimit::max(config.max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(state))
}
