//! Error taxonomy for the ingestion pipeline

use thiserror::Error;

use super::retrier::WideColumnItem;

/// Failure of one bulk write against one backend
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("bulk request rejected: {0}")]
    Rejected(String),

    #[error("dynamodb error: {0}")]
    DynamoDb(String),

    #[error("invalid record: {0}")]
    InvalidRecord(String),
}

/// Pipeline errors.
///
/// `MalformedRecord`, `IdServiceUnavailable` and `JobStatus` raised before a
/// job is running abort it without touching any sink. `SinkChunkWrite` is
/// counted per chunk and never aborts a job.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("malformed record{}: {reason}", .index.map(|i| format!(" at index {i}")).unwrap_or_default())]
    MalformedRecord { index: Option<usize>, reason: String },

    #[error("id service unavailable: {0}")]
    IdServiceUnavailable(String),

    #[error("{sink} sink failed to write chunk {chunk}: {source}")]
    SinkChunkWrite {
        sink: &'static str,
        chunk: usize,
        #[source]
        source: SinkError,
    },

    #[error("batch write exhausted after {passes} passes with {} items unprocessed", .remaining.len())]
    BatchWriteExhausted {
        passes: u32,
        remaining: Vec<WideColumnItem>,
        /// Failed batch calls seen before giving up
        chunk_errors: Vec<String>,
    },

    #[error("job status store error: {0}")]
    JobStatus(String),

    #[error("job log error: {0}")]
    JobLog(String),

    #[error("job cancelled")]
    Cancelled,
}

impl IngestError {
    pub fn malformed(index: Option<usize>, reason: impl Into<String>) -> Self {
        IngestError::MalformedRecord {
            index,
            reason: reason.into(),
        }
    }
}
