use axum::{
    extract::{multipart::MultipartError, DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    response::Response,
    routing::post,
    Router,
};
use std::sync::Arc;

use crate::api::response::ApiResponse;
use crate::error::AppError;
use crate::ingest::IngestionJobCoordinator;

use super::commands::IngestCitiesCommand;

/// Upload routes. Bodies above `max_upload_bytes` are rejected with 413.
pub fn cities_routes(max_upload_bytes: usize) -> Router<Arc<IngestionJobCoordinator>> {
    Router::new()
        .route("/", post(upload_cities))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
}

/// Start an ingestion job from the multipart field `file`
///
/// POST /cities
#[tracing::instrument(skip(coordinator, multipart))]
async fn upload_cities(
    State(coordinator): State<Arc<IngestionJobCoordinator>>,
    mut multipart: Multipart,
) -> Result<Response, AppError> {
    let mut content: Option<Vec<u8>> = None;
    let mut filename: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error("Failed to read multipart field", e))?
    {
        if field.name() == Some("file") {
            filename = field.file_name().map(str::to_string);
            let data = field
                .bytes()
                .await
                .map_err(|e| multipart_error("Failed to read file bytes", e))?;
            content = Some(data.to_vec());
        }
    }

    let content =
        content.ok_or_else(|| AppError::Validation("No file field found in multipart data".to_string()))?;

    let command = IngestCitiesCommand { filename, content };
    let response = super::commands::ingest::handle(coordinator, command).await?;

    tracing::info!(job_id = %response.job_id, records = response.records, "Ingestion job accepted");

    Ok(ApiResponse::success(response).with_status(StatusCode::ACCEPTED))
}

fn multipart_error(context: &str, err: MultipartError) -> AppError {
    let message = format!("{context}: {}", err.body_text());
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::PayloadTooLarge(message)
    } else {
        AppError::Validation(message)
    }
}
