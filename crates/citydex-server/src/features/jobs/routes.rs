//! Job routes

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Response,
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use crate::api::response::ApiResponse;
use crate::error::AppError;
use crate::ingest::IngestionJobCoordinator;

use super::commands::{cancel, CancelJobCommand};
use super::queries::{get_job, list_running, GetJobQuery};

/// Create job routes
pub fn jobs_routes() -> Router<Arc<IngestionJobCoordinator>> {
    Router::new()
        .route("/", get(list_running_jobs))
        .route("/:job_id", get(get_job_status))
        .route("/:job_id/cancel", post(cancel_job))
}

/// Jobs running in this process
///
/// GET /jobs
async fn list_running_jobs(State(coordinator): State<Arc<IngestionJobCoordinator>>) -> Response {
    ApiResponse::success(list_running::handle(&coordinator)).with_status(StatusCode::OK)
}

/// GET /jobs/:job_id
#[tracing::instrument(skip(coordinator))]
async fn get_job_status(
    State(coordinator): State<Arc<IngestionJobCoordinator>>,
    Path(job_id): Path<String>,
) -> Result<Response, AppError> {
    let details = get_job::handle(coordinator, GetJobQuery { job_id }).await?;
    Ok(ApiResponse::success(details).with_status(StatusCode::OK))
}

/// POST /jobs/:job_id/cancel
#[tracing::instrument(skip(coordinator))]
async fn cancel_job(
    State(coordinator): State<Arc<IngestionJobCoordinator>>,
    Path(job_id): Path<String>,
) -> Result<Response, AppError> {
    let response = cancel::handle(&coordinator, CancelJobCommand { job_id })?;
    Ok(ApiResponse::success(response).with_status(StatusCode::ACCEPTED))
}
