use axum::{
    extract::{multipart::MultipartError, Multipart, State},
    http::StatusCode,
    routing::post,
    Json, Router,
};
use tracing::{error, info};

use crate::jobs::{normalize_query, IntakeError};
use crate::models::{AnalyzeResponse, AppState};
use crate::types::{AppError, AppResult};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/analyze", post(analyze_document))
        .with_state(state)
}

/// The parts of an `/analyze` form we care about.
struct Upload {
    file_name: String,
    data: Vec<u8>,
    query: Option<String>,
}

fn intake_error(e: MultipartError) -> IntakeError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        IntakeError::TooLarge
    } else {
        IntakeError::Multipart(e.body_text())
    }
}

async fn read_upload(mut multipart: Multipart) -> Result<Upload, IntakeError> {
    let mut file: Option<(String, Vec<u8>)> = None;
    let mut query = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(intake_error)?
    {
        match field.name().unwrap_or("") {
            "file" => {
                let file_name = field.file_name().unwrap_or("upload.pdf").to_string();
                let data = field
                    .bytes()
                    .await
                    .map_err(intake_error)?;
                file = Some((file_name, data.to_vec()));
            }
            "query" => {
                let text = field
                    .text()
                    .await
                    .map_err(intake_error)?;
                query = Some(text);
            }
            _ => {}
        }
    }

    let (file_name, data) = file.ok_or(IntakeError::MissingFile)?;
    if data.is_empty() {
        return Err(IntakeError::EmptyFile);
    }

    Ok(Upload {
        file_name,
        data,
        query,
    })
}

async fn analyze_document(
    State(state): State<AppState>,
    multipart: Multipart,
) -> AppResult<Json<AnalyzeResponse>> {
    let upload = read_upload(multipart).await?;
    let query = normalize_query(upload.query.as_deref());
    info!(file = %upload.file_name, bytes = upload.data.len(), "Analysis request received");

    let input_reference = state.storage.save_upload(&upload.data).await.map_err(|e| {
        error!(error = %e, "Failed to store upload");
        AppError::Internal("failed to store upload".to_string())
    })?;

    let job = state.jobs.submit(&query, &input_reference).await?;
    Ok(Json(AnalyzeResponse::from_job(&job, upload.file_name)))
}
