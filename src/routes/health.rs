use axum::{extract::State, routing::get, Json, Router};
use tracing::warn;

use crate::models::{AppState, HealthResponse, RootResponse};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/api/health", get(health_check))
        .with_state(state)
}

async fn root() -> Json<RootResponse> {
    Json(RootResponse {
        message: "Financial Document Analyzer API is running".to_string(),
    })
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let database = match state.store.health_check().await {
        Ok(()) => "connected",
        Err(e) => {
            warn!(backend = state.store.backend(), error = %e, "Job store health check failed");
            "disconnected"
        }
    };

    let queue = match state.policy.queue() {
        Some(queue) => Some(match queue.probe().await {
            Ok(()) => "connected",
            Err(e) => {
                warn!(queue = queue.name(), error = %e, "Queue health check failed");
                "disconnected"
            }
        }),
        None => None,
    };

    let status = if database == "connected" && queue != Some("disconnected") {
        "ok"
    } else {
        "degraded"
    };

    Json(HealthResponse {
        status: status.to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        database: database.to_string(),
        queue: queue.map(str::to_string),
        mode: state.policy.decide().as_str().to_string(),
    })
}
