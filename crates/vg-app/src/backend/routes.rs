use std::sync::Arc;
use axum::Router;
use axum::routing::{get, post};
use crate::backend::routes::health::health;
use crate::backend::routes::i2v::image_to_video;
use crate::backend::state::GenState;

mod health;
mod i2v;

pub fn api_routes() -> Router<Arc<GenState>> {
    Router::new()
        .route("/i2v", post(image_to_video))
        .route("/health", get(health))
}
