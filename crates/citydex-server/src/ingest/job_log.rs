//! Job completion records
//!
//! Every job that reaches `Running` ends with exactly one completion record,
//! written before its active flag is cleared. The startup sweep writes
//! `Abandoned` records for flags left behind by a crashed process.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{types::Json, PgPool};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::chunked::SinkReport;
use super::error::IngestError;

/// Ingestion job lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Created,
    Running,
    Completed,
    CompletedWithErrors,
    Failed,
    Cancelled,
    Abandoned,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Created => "created",
            JobState::Running => "running",
            JobState::Completed => "completed",
            JobState::CompletedWithErrors => "completed_with_errors",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
            JobState::Abandoned => "abandoned",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobState::Created | JobState::Running)
    }
}

/// Snowflake ids exceed the integers JSON clients hold exactly, so job ids
/// are written as decimal strings. Numeric ids in older records still load.
mod job_id_string {
    use serde::{de, Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Text(String),
        Number(u64),
    }

    pub fn serialize<S: Serializer>(job_id: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(job_id)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        match Repr::deserialize(deserializer)? {
            Repr::Text(text) => text.parse().map_err(de::Error::custom),
            Repr::Number(number) => Ok(number),
        }
    }
}

/// Outcome of one ingestion job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobCompletion {
    #[serde(with = "job_id_string")]
    pub job_id: u64,
    pub state: JobState,
    pub records: usize,
    pub sinks: Vec<SinkReport>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: DateTime<Utc>,
    pub error: Option<String>,
}

impl JobCompletion {
    /// Record for a flag whose job left no completion behind
    pub fn abandoned(job_id: u64) -> Self {
        Self {
            job_id,
            state: JobState::Abandoned,
            records: 0,
            sinks: Vec::new(),
            started_at: None,
            finished_at: Utc::now(),
            error: Some("process exited while job was running".to_string()),
        }
    }

    pub fn failed_chunks(&self) -> usize {
        self.sinks.iter().map(|s| s.chunks_failed).sum()
    }
}

/// Durable store of job completion records
#[async_trait]
pub trait JobLog: Send + Sync {
    async fn record(&self, completion: &JobCompletion) -> Result<(), IngestError>;

    async fn get(&self, job_id: u64) -> Result<Option<JobCompletion>, IngestError>;
}

/// Process-local job log
#[derive(Debug, Default, Clone)]
pub struct InMemoryJobLog {
    entries: Arc<RwLock<HashMap<u64, JobCompletion>>>,
}

impl InMemoryJobLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl JobLog for InMemoryJobLog {
    async fn record(&self, completion: &JobCompletion) -> Result<(), IngestError> {
        self.entries
            .write()
            .await
            .insert(completion.job_id, completion.clone());
        Ok(())
    }

    async fn get(&self, job_id: u64) -> Result<Option<JobCompletion>, IngestError> {
        Ok(self.entries.read().await.get(&job_id).cloned())
    }
}

/// Job log backed by the `ingest_job_log` table
#[derive(Debug, Clone)]
pub struct PgJobLog {
    pool: PgPool,
}

impl PgJobLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

pub(crate) fn db_job_id(job_id: u64) -> Result<i64, IngestError> {
    i64::try_from(job_id).map_err(|_| IngestError::JobLog(format!("job id {job_id} out of range")))
}

#[async_trait]
impl JobLog for PgJobLog {
    async fn record(&self, completion: &JobCompletion) -> Result<(), IngestError> {
        sqlx::query(
            r#"
            INSERT INTO ingest_job_log (job_id, state, completion, finished_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (job_id) DO UPDATE
            SET state = EXCLUDED.state,
                completion = EXCLUDED.completion,
                finished_at = EXCLUDED.finished_at
            "#,
        )
        .bind(db_job_id(completion.job_id)?)
        .bind(completion.state.as_str())
        .bind(Json(completion))
        .bind(completion.finished_at)
        .execute(&self.pool)
        .await
        .map_err(|e| IngestError::JobLog(format!("failed to record job {}: {e}", completion.job_id)))?;

        Ok(())
    }

    async fn get(&self, job_id: u64) -> Result<Option<JobCompletion>, IngestError> {
        let row: Option<(Json<JobCompletion>,)> =
            sqlx::query_as("SELECT completion FROM ingest_job_log WHERE job_id = $1")
                .bind(db_job_id(job_id)?)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| IngestError::JobLog(format!("failed to load job {job_id}: {e}")))?;

        Ok(row.map(|(Json(completion),)| completion))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_state_strings_match_serde() {
        for state in [
            JobState::Created,
            JobState::Running,
            JobState::Completed,
            JobState::CompletedWithErrors,
            JobState::Failed,
            JobState::Cancelled,
            JobState::Abandoned,
        ] {
            let json = serde_json::to_value(state).unwrap();
            assert_eq!(json, serde_json::Value::String(state.as_str().to_string()));
        }
    }

    #[test]
    fn test_terminal_states() {
        assert!(!JobState::Running.is_terminal());
        assert!(JobState::CompletedWithErrors.is_terminal());
        assert!(JobState::Abandoned.is_terminal());
    }

    #[test]
    fn test_job_id_is_written_as_string() {
        // Above 2^53, where a JSON number would lose digits
        let job_id = 7_301_452_003_948_185_601;
        let completion = JobCompletion::abandoned(job_id);

        let json = serde_json::to_value(&completion).unwrap();
        assert_eq!(json["job_id"], serde_json::json!("7301452003948185601"));

        let back: JobCompletion = serde_json::from_value(json).unwrap();
        assert_eq!(back, completion);
    }

    #[test]
    fn test_numeric_job_id_still_loads() {
        let mut json = serde_json::to_value(JobCompletion::abandoned(42)).unwrap();
        json["job_id"] = serde_json::json!(42);

        let completion: JobCompletion = serde_json::from_value(json).unwrap();
        assert_eq!(completion.job_id, 42);
    }

    #[test]
    fn test_non_numeric_job_id_is_rejected() {
        let mut json = serde_json::to_value(JobCompletion::abandoned(1)).unwrap();
        json["job_id"] = serde_json::json!("not-a-number");
        assert!(serde_json::from_value::<JobCompletion>(json).is_err());
    }

    #[tokio::test]
    async fn test_in_memory_log_overwrites_by_job_id() {
        let log = InMemoryJobLog::new();
        assert!(log.get(1).await.unwrap().is_none());

        log.record(&JobCompletion::abandoned(1)).await.unwrap();
        let mut done = JobCompletion::abandoned(1);
        done.state = JobState::Completed;
        log.record(&done).await.unwrap();

        assert_eq!(log.len().await, 1);
        assert_eq!(log.get(1).await.unwrap().unwrap().state, JobState::Completed);
    }

    #[test]
    fn test_db_job_id_rejects_overflow() {
        assert_eq!(db_job_id(42).unwrap(), 42);
        assert!(db_job_id(u64::MAX).is_err());
    }
}
