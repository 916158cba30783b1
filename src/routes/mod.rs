//! API Routes
//!
//! - `/` and `/api/health` - liveness and dependency health
//! - `/analyze` - document upload and job submission
//! - `/status/{job_id}` - job status polling

pub mod analysis;
pub mod health;
pub mod status;

use axum::extract::DefaultBodyLimit;
use axum::Router;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::middleware::apply_cors;
use crate::models::AppState;

/// Create the main application router
pub fn create_router(state: AppState) -> Router {
    info!("Creating application router");

    let body_limit = state.config.storage.max_upload_bytes;
    let origins = state.config.server.cors_allowed_origins.clone();

    let router = Router::new()
        .merge(health::router(state.clone()))
        .merge(analysis::router(state.clone()))
        .merge(status::router(state))
        .layer(DefaultBodyLimit::max(body_limit));

    apply_cors(router, &origins).layer(TraceLayer::new_for_http())
}
