use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use tracing::debug;

use crate::models::{AppState, StatusResponse};
use crate::types::AppResult;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/status/{job_id}", get(get_status))
        .with_state(state)
}

async fn get_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> AppResult<Json<StatusResponse>> {
    debug!(%job_id, "Status request");
    let job = state.status.query(&job_id).await?;
    Ok(Json(job.into()))
}
