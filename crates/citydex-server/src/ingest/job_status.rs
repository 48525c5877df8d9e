//! Per-job active flag
//!
//! A flag is present exactly while a job is `Running`. The flag is owned by an
//! [`ActiveJobGuard`] so every exit path clears it, including panics and
//! aborted tasks. Flags that survive a process crash are reconciled at
//! startup by [`sweep_stale_flags`].
//!
//! Every flag records the worker id of the process that set it. Worker ids
//! are already unique per process for snowflake ids, so a restarting process
//! only reclaims its own flags and never those of a live peer.

use async_trait::async_trait;
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::error::IngestError;
use super::job_log::{JobCompletion, JobLog};

/// Ephemeral store of "job is in flight" flags
#[async_trait]
pub trait JobStatusStore: Send + Sync {
    async fn set_active(&self, job_id: u64) -> Result<(), IngestError>;

    async fn clear_active(&self, job_id: u64) -> Result<(), IngestError>;

    async fn is_active(&self, job_id: u64) -> Result<bool, IngestError>;

    /// Every flag, whoever set it
    async fn active_jobs(&self) -> Result<Vec<u64>, IngestError>;

    /// Flags set by this store's owner
    async fn owned_jobs(&self) -> Result<Vec<u64>, IngestError>;
}

/// Process-local flag map of job id to owning worker
#[derive(Debug, Default, Clone)]
pub struct InMemoryJobStatusStore {
    owner: u16,
    active: Arc<RwLock<HashMap<u64, u16>>>,
}

impl InMemoryJobStatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_owner(owner: u16) -> Self {
        Self {
            owner,
            active: Arc::default(),
        }
    }

    /// A view of the same flags acting as another worker
    pub fn for_owner(&self, owner: u16) -> Self {
        Self {
            owner,
            active: Arc::clone(&self.active),
        }
    }

    async fn sorted_jobs(&self, owner: Option<u16>) -> Vec<u64> {
        let mut jobs: Vec<u64> = self
            .active
            .read()
            .await
            .iter()
            .filter(|(_, set_by)| owner.is_none_or(|o| o == **set_by))
            .map(|(job_id, _)| *job_id)
            .collect();
        jobs.sort_unstable();
        jobs
    }
}

#[async_trait]
impl JobStatusStore for InMemoryJobStatusStore {
    async fn set_active(&self, job_id: u64) -> Result<(), IngestError> {
        self.active.write().await.insert(job_id, self.owner);
        Ok(())
    }

    async fn clear_active(&self, job_id: u64) -> Result<(), IngestError> {
        self.active.write().await.remove(&job_id);
        Ok(())
    }

    async fn is_active(&self, job_id: u64) -> Result<bool, IngestError> {
        Ok(self.active.read().await.contains_key(&job_id))
    }

    async fn active_jobs(&self) -> Result<Vec<u64>, IngestError> {
        Ok(self.sorted_jobs(None).await)
    }

    async fn owned_jobs(&self) -> Result<Vec<u64>, IngestError> {
        Ok(self.sorted_jobs(Some(self.owner)).await)
    }
}

/// Flags stored in the `ingest_job_flags` table, shared by every server
/// process pointed at the same database
#[derive(Debug, Clone)]
pub struct PgJobStatusStore {
    pool: PgPool,
    owner: u16,
}

impl PgJobStatusStore {
    /// `owner` is this process's worker id
    pub fn new(pool: PgPool, owner: u16) -> Self {
        Self { pool, owner }
    }
}

fn job_ids(rows: Vec<(i64,)>) -> Vec<u64> {
    // Keys are written from u64 ids, so negatives never appear.
    rows.into_iter().filter_map(|(id,)| u64::try_from(id).ok()).collect()
}

fn flag_key(job_id: u64) -> Result<i64, IngestError> {
    i64::try_from(job_id)
        .map_err(|_| IngestError::JobStatus(format!("job id {job_id} out of range")))
}

#[async_trait]
impl JobStatusStore for PgJobStatusStore {
    async fn set_active(&self, job_id: u64) -> Result<(), IngestError> {
        sqlx::query(
            r#"
            INSERT INTO ingest_job_flags (job_id, owner, set_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (job_id) DO UPDATE SET owner = EXCLUDED.owner, set_at = NOW()
            "#,
        )
        .bind(flag_key(job_id)?)
        .bind(i16::try_from(self.owner).unwrap_or(i16::MAX))
        .execute(&self.pool)
        .await
        .map_err(|e| IngestError::JobStatus(format!("failed to set flag for job {job_id}: {e}")))?;

        Ok(())
    }

    async fn clear_active(&self, job_id: u64) -> Result<(), IngestError> {
        sqlx::query("DELETE FROM ingest_job_flags WHERE job_id = $1")
            .bind(flag_key(job_id)?)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                IngestError::JobStatus(format!("failed to clear flag for job {job_id}: {e}"))
            })?;

        Ok(())
    }

    async fn is_active(&self, job_id: u64) -> Result<bool, IngestError> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT job_id FROM ingest_job_flags WHERE job_id = $1")
            .bind(flag_key(job_id)?)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| IngestError::JobStatus(format!("failed to read flag for job {job_id}: {e}")))?;

        Ok(row.is_some())
    }

    async fn active_jobs(&self) -> Result<Vec<u64>, IngestError> {
        let rows: Vec<(i64,)> = sqlx::query_as("SELECT job_id FROM ingest_job_flags ORDER BY job_id")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| IngestError::JobStatus(format!("failed to list flags: {e}")))?;

        Ok(job_ids(rows))
    }

    async fn owned_jobs(&self) -> Result<Vec<u64>, IngestError> {
        let rows: Vec<(i64,)> =
            sqlx::query_as("SELECT job_id FROM ingest_job_flags WHERE owner = $1 ORDER BY job_id")
                .bind(i16::try_from(self.owner).unwrap_or(i16::MAX))
                .fetch_all(&self.pool)
                .await
                .map_err(|e| {
                    IngestError::JobStatus(format!("failed to list flags of worker {}: {e}", self.owner))
                })?;

        Ok(job_ids(rows))
    }
}

/// Holds a job's active flag for as long as the job runs.
///
/// Call [`release`](Self::release) on the normal exit path. If the guard is
/// dropped instead (panic, aborted task), the flag is cleared by a task
/// spawned on the current runtime.
pub struct ActiveJobGuard {
    store: Arc<dyn JobStatusStore>,
    job_id: u64,
    released: bool,
}

impl ActiveJobGuard {
    pub async fn acquire(store: Arc<dyn JobStatusStore>, job_id: u64) -> Result<Self, IngestError> {
        store.set_active(job_id).await?;
        tracing::debug!(job_id, "Job marked active");

        Ok(Self {
            store,
            job_id,
            released: false,
        })
    }

    pub fn job_id(&self) -> u64 {
        self.job_id
    }

    /// Clear the flag. Failures are logged; the job outcome is already final.
    pub async fn release(mut self) {
        self.released = true;
        if let Err(e) = self.store.clear_active(self.job_id).await {
            tracing::error!(job_id = self.job_id, error = %e, "Failed to clear job active flag");
        } else {
            tracing::debug!(job_id = self.job_id, "Job flag cleared");
        }
    }
}

impl Drop for ActiveJobGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        let job_id = self.job_id;
        tracing::warn!(job_id, "Job guard dropped without release, clearing flag");

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let store = Arc::clone(&self.store);
                handle.spawn(async move {
                    if let Err(e) = store.clear_active(job_id).await {
                        tracing::error!(job_id, error = %e, "Failed to clear job active flag");
                    }
                });
            }
            Err(_) => {
                tracing::error!(job_id, "No runtime to clear job flag; startup sweep will reclaim it");
            }
        }
    }
}

impl std::fmt::Debug for ActiveJobGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveJobGuard")
            .field("job_id", &self.job_id)
            .field("released", &self.released)
            .finish()
    }
}

/// Clear the flags a previous run of this worker left set.
///
/// Must run before the server accepts uploads, when no job of this process
/// can be in flight. Flags owned by other workers are left alone. Jobs
/// without a completion record are logged as `Abandoned`. Returns the ids
/// whose flags were cleared.
#[tracing::instrument(skip_all)]
pub async fn sweep_stale_flags(
    store: &dyn JobStatusStore,
    job_log: &dyn JobLog,
) -> Result<Vec<u64>, IngestError> {
    let stale = store.owned_jobs().await?;

    for &job_id in &stale {
        let finished = job_log
            .get(job_id)
            .await?
            .is_some_and(|completion| completion.state.is_terminal());

        if !finished {
            job_log.record(&JobCompletion::abandoned(job_id)).await?;
        }

        store.clear_active(job_id).await?;
        tracing::warn!(job_id, finished, "Cleared stale job flag");
    }

    if !stale.is_empty() {
        tracing::info!(count = stale.len(), "Stale job flag sweep complete");
    }

    Ok(stale)
}
