//! Get job query
//!
//! Combines the active flag with the completion record, if any.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::AppError;
use crate::ingest::{IngestError, IngestionJobCoordinator, JobCompletion, JobState};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetJobQuery {
    pub job_id: String,
}

/// Job details
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDetails {
    pub job_id: String,
    pub state: JobState,
    pub active: bool,
    pub completion: Option<JobCompletion>,
}

#[derive(Debug, thiserror::Error)]
pub enum GetJobError {
    #[error("Job id must be an unsigned integer, got '{0}'")]
    InvalidId(String),
    #[error("Job {0} not found")]
    NotFound(u64),
    #[error(transparent)]
    Ingest(#[from] IngestError),
}

impl From<GetJobError> for AppError {
    fn from(err: GetJobError) -> Self {
        match err {
            GetJobError::InvalidId(_) => AppError::Validation(err.to_string()),
            GetJobError::NotFound(_) => AppError::NotFound(err.to_string()),
            GetJobError::Ingest(e) => AppError::Ingest(e),
        }
    }
}

impl GetJobQuery {
    pub fn parse_id(&self) -> Result<u64, GetJobError> {
        self.job_id
            .trim()
            .parse()
            .map_err(|_| GetJobError::InvalidId(self.job_id.clone()))
    }
}

pub async fn handle(
    coordinator: Arc<IngestionJobCoordinator>,
    query: GetJobQuery,
) -> Result<JobDetails, GetJobError> {
    let job_id = query.parse_id()?;
    let view = coordinator
        .job_status(job_id)
        .await?
        .ok_or(GetJobError::NotFound(job_id))?;

    // A completion record wins over a flag that has not been cleared yet
    let state = match &view.completion {
        Some(completion) => completion.state,
        None => JobState::Running,
    };

    Ok(JobDetails {
        job_id: job_id.to_string(),
        state,
        active: view.active,
        completion: view.completion,
    })
}
