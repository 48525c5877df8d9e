//! Cancel a running job
//!
//! Cancellation is cooperative: sinks stop between chunks and the job
//! records a `cancelled` completion once they have.

use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::ingest::IngestionJobCoordinator;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelJobCommand {
    pub job_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelJobResponse {
    pub message: String,
    pub job_id: String,
}

#[derive(Debug, thiserror::Error)]
pub enum CancelJobError {
    #[error("Job id must be an unsigned integer, got '{0}'")]
    InvalidId(String),
    #[error("Job {0} is not running")]
    NotRunning(u64),
}

impl From<CancelJobError> for AppError {
    fn from(err: CancelJobError) -> Self {
        match err {
            CancelJobError::InvalidId(_) => AppError::Validation(err.to_string()),
            CancelJobError::NotRunning(_) => AppError::NotFound(err.to_string()),
        }
    }
}

impl CancelJobCommand {
    pub fn validate(&self) -> Result<u64, CancelJobError> {
        self.job_id
            .trim()
            .parse()
            .map_err(|_| CancelJobError::InvalidId(self.job_id.clone()))
    }
}

#[tracing::instrument(skip(coordinator))]
pub fn handle(
    coordinator: &IngestionJobCoordinator,
    command: CancelJobCommand,
) -> Result<CancelJobResponse, CancelJobError> {
    let job_id = command.validate()?;

    if !coordinator.cancel(job_id) {
        return Err(CancelJobError::NotRunning(job_id));
    }

    Ok(CancelJobResponse {
        message: "cancellation requested".to_string(),
        job_id: job_id.to_string(),
    })
}
