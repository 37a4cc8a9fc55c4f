use std::sync::Arc;
use axum::extract::State;
use axum::Json;
use crate::backend::schemas::HealthResponse;
use crate::backend::state::GenState;

pub async fn health(State(state): State<Arc<GenState>>) -> Json<HealthResponse> {
    let pipeline = state.pipeline();
    let resources = pipeline.resources();
    let config = resources.config();

    Json(HealthResponse {
        status: "ok",
        base_model: config.base_model_id.clone(),
        upsampler_model: config.upsampler_model_id.clone(),
        variant: resources.variant().id().to_string(),
        placement: config.placement.id().to_string(),
        device: config.device.to_string(),
        media_type: pipeline.codec().media_type(),
        available_slots: state.available_slots(),
    })
}
