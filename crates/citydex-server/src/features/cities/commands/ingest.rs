use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::AppError;
use crate::ingest::{IngestError, IngestionJobCoordinator};

/// Start an ingestion job for an uploaded file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestCitiesCommand {
    pub filename: Option<String>,
    #[serde(skip)]
    pub content: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestCitiesResponse {
    pub message: String,
    /// Snowflake ids exceed the integer range JSON clients can hold
    pub job_id: String,
    pub records: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum IngestCitiesError {
    #[error("Content is required and cannot be empty")]
    ContentRequired,
    #[error("Filename must not exceed 255 characters")]
    FilenameLength,
    #[error(transparent)]
    Ingest(#[from] IngestError),
}

impl From<IngestCitiesError> for AppError {
    fn from(err: IngestCitiesError) -> Self {
        match err {
            IngestCitiesError::Ingest(e) => AppError::Ingest(e),
            other => AppError::Validation(other.to_string()),
        }
    }
}

impl IngestCitiesCommand {
    pub fn validate(&self) -> Result<(), IngestCitiesError> {
        if self.content.iter().all(u8::is_ascii_whitespace) {
            return Err(IngestCitiesError::ContentRequired);
        }
        if self.filename.as_ref().is_some_and(|name| name.len() > 255) {
            return Err(IngestCitiesError::FilenameLength);
        }
        Ok(())
    }
}

#[tracing::instrument(skip(coordinator, command), fields(filename = ?command.filename, bytes = command.content.len()))]
pub async fn handle(
    coordinator: Arc<IngestionJobCoordinator>,
    command: IngestCitiesCommand,
) -> Result<IngestCitiesResponse, IngestCitiesError> {
    command.validate()?;

    let ticket = coordinator.start(&command.content).await?;

    Ok(IngestCitiesResponse {
        message: "job started".to_string(),
        job_id: ticket.job_id.to_string(),
        records: ticket.records,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command(content: &str) -> IngestCitiesCommand {
        IngestCitiesCommand {
            filename: Some("cities.json".to_string()),
            content: content.as_bytes().to_vec(),
        }
    }

    #[test]
    fn test_validation_success() {
        assert!(command(r#"[{"nom_com": "Paris"}]"#).validate().is_ok());
    }

    #[test]
    fn test_validation_empty_content() {
        assert!(matches!(command("").validate(), Err(IngestCitiesError::ContentRequired)));
        assert!(matches!(command(" \n\t").validate(), Err(IngestCitiesError::ContentRequired)));
    }

    #[test]
    fn test_validation_filename_length() {
        let cmd = IngestCitiesCommand {
            filename: Some("a".repeat(256)),
            content: b"[]".to_vec(),
        };
        assert!(matches!(cmd.validate(), Err(IngestCitiesError::FilenameLength)));
    }

    #[test]
    fn test_errors_map_to_app_errors() {
        assert!(matches!(AppError::from(IngestCitiesError::ContentRequired), AppError::Validation(_)));
        assert!(matches!(
            AppError::from(IngestCitiesError::Ingest(IngestError::malformed(Some(0), "x"))),
            AppError::Ingest(IngestError::MalformedRecord { .. })
        ));
    }
}
