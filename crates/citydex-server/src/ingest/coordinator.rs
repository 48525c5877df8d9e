//! Ingestion job coordinator
//!
//! Drives one upload through the pipeline:
//! 1. Created: job id obtained, upload parsed
//! 2. Records normalized and given ids (any failure here aborts the job
//!    before a flag is set or a sink is touched)
//! 3. Running: active flag held by a guard, sinks written in the background
//! 4. Terminal: completion record written, then the flag is cleared

use chrono::Utc;
use citydex_common::NormalizedRecord;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::Instrument;

use super::error::IngestError;
use super::fanout::{DualSinkFanout, FanoutReport};
use super::ids::{assign_ids, IdAssigner, IdSettings};
use super::job_log::{JobCompletion, JobLog, JobState};
use super::job_status::{ActiveJobGuard, JobStatusStore};
use super::normalize::{parse_upload, RecordNormalizer};

#[derive(Debug, Clone, Default)]
pub struct CoordinatorSettings {
    pub ids: IdSettings,
    /// Cancel a running job after this long
    pub job_deadline: Option<Duration>,
}

/// Handle to an accepted job
#[derive(Debug)]
pub struct JobTicket {
    pub job_id: u64,
    pub records: usize,
    /// Resolves once the completion record is written and the flag cleared
    pub completion: JoinHandle<JobCompletion>,
}

/// What is known about a job right now
#[derive(Debug, Clone, PartialEq)]
pub struct JobView {
    pub job_id: u64,
    pub active: bool,
    pub completion: Option<JobCompletion>,
}

type RunningJobs = Arc<Mutex<HashMap<u64, CancellationToken>>>;

fn lock_jobs(jobs: &Mutex<HashMap<u64, CancellationToken>>) -> MutexGuard<'_, HashMap<u64, CancellationToken>> {
    // The map stays consistent even if a holder panicked
    jobs.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A job's slot in the cancel registry, removed when dropped so a panicking
/// job never lingers as running
struct RunningEntry {
    jobs: RunningJobs,
    job_id: u64,
}

impl RunningEntry {
    fn register(jobs: &RunningJobs, job_id: u64, cancel: CancellationToken) -> Self {
        lock_jobs(jobs).insert(job_id, cancel);
        Self {
            jobs: Arc::clone(jobs),
            job_id,
        }
    }
}

impl Drop for RunningEntry {
    fn drop(&mut self) {
        lock_jobs(&self.jobs).remove(&self.job_id);
    }
}

pub struct IngestionJobCoordinator {
    ids: Arc<dyn IdAssigner>,
    status: Arc<dyn JobStatusStore>,
    job_log: Arc<dyn JobLog>,
    fanout: DualSinkFanout,
    normalizer: RecordNormalizer,
    settings: CoordinatorSettings,
    running: RunningJobs,
    tracker: TaskTracker,
    shutdown: CancellationToken,
}

impl IngestionJobCoordinator {
    pub fn new(
        ids: Arc<dyn IdAssigner>,
        status: Arc<dyn JobStatusStore>,
        job_log: Arc<dyn JobLog>,
        fanout: DualSinkFanout,
        settings: CoordinatorSettings,
    ) -> Self {
        Self {
            ids,
            status,
            job_log,
            fanout,
            normalizer: RecordNormalizer,
            settings,
            running: RunningJobs::default(),
            tracker: TaskTracker::new(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn status_store(&self) -> &Arc<dyn JobStatusStore> {
        &self.status
    }

    pub fn job_log(&self) -> &Arc<dyn JobLog> {
        &self.job_log
    }

    /// Accept an upload and start writing it to every sink.
    ///
    /// Returns once the job is `Running`; the sinks are written in the
    /// background and `JobTicket::completion` resolves when they are done.
    #[tracing::instrument(skip_all, fields(bytes = payload.len()))]
    pub async fn start(self: &Arc<Self>, payload: &[u8]) -> Result<JobTicket, IngestError> {
        if self.shutdown.is_cancelled() || self.tracker.is_closed() {
            return Err(IngestError::Cancelled);
        }

        let job_id = tokio::time::timeout(self.settings.ids.timeout, self.ids.next_id())
            .await
            .map_err(|_| IngestError::IdServiceUnavailable("timed out issuing job id".into()))??;

        let raw = parse_upload(payload)?;
        tracing::info!(job_id, records = raw.len(), state = JobState::Created.as_str(), "Job created");

        let fields = self.normalizer.normalize_all(&raw);
        drop(raw);
        let records: Arc<[NormalizedRecord]> = assign_ids(self.ids.as_ref(), fields, &self.settings.ids)
            .await?
            .into();
        let count = records.len();

        let guard = ActiveJobGuard::acquire(Arc::clone(&self.status), job_id).await?;
        let cancel = self.shutdown.child_token();
        let entry = RunningEntry::register(&self.running, job_id, cancel.clone());

        let this = Arc::clone(self);
        let completion = self.tracker.spawn(
            async move { this.run_job(job_id, records, guard, entry, cancel).await }
                .instrument(tracing::info_span!("ingest_job", job_id)),
        );

        Ok(JobTicket {
            job_id,
            records: count,
            completion,
        })
    }

    async fn run_job(
        self: Arc<Self>,
        job_id: u64,
        records: Arc<[NormalizedRecord]>,
        guard: ActiveJobGuard,
        entry: RunningEntry,
        cancel: CancellationToken,
    ) -> JobCompletion {
        let started_at = Utc::now();
        tracing::info!(records = records.len(), state = JobState::Running.as_str(), "Job running");

        let fanout = self.fanout.run(Arc::clone(&records), &cancel);
        let (report, deadline_hit) = match self.settings.job_deadline {
            Some(deadline) => {
                tokio::pin!(fanout);
                tokio::select! {
                    report = &mut fanout => (report, false),
                    _ = tokio::time::sleep(deadline) => {
                        tracing::warn!(?deadline, "Job deadline exceeded, cancelling");
                        cancel.cancel();
                        (fanout.await, true)
                    }
                }
            }
            None => (fanout.await, false),
        };

        let (state, error) = classify(&report, cancel.is_cancelled(), deadline_hit);
        let completion = JobCompletion {
            job_id,
            state,
            records: records.len(),
            sinks: report.sinks,
            started_at: Some(started_at),
            finished_at: Utc::now(),
            error,
        };

        if let Err(e) = self.job_log.record(&completion).await {
            tracing::error!(error = %e, "Failed to write job completion record");
        }
        drop(entry);
        guard.release().await;

        tracing::info!(
            state = completion.state.as_str(),
            failed_chunks = completion.failed_chunks(),
            "Job finished"
        );
        completion
    }

    /// Request cancellation of an in-flight job. Returns false if the job is
    /// not running in this process.
    pub fn cancel(&self, job_id: u64) -> bool {
        match self.registry().get(&job_id) {
            Some(token) => {
                tracing::info!(job_id, "Cancelling job");
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub async fn job_status(&self, job_id: u64) -> Result<Option<JobView>, IngestError> {
        let active = self.status.is_active(job_id).await?;
        let completion = self.job_log.get(job_id).await?;

        if !active && completion.is_none() {
            return Ok(None);
        }

        Ok(Some(JobView {
            job_id,
            active,
            completion,
        }))
    }

    pub fn running_jobs(&self) -> Vec<u64> {
        let mut jobs: Vec<u64> = self.registry().keys().copied().collect();
        jobs.sort_unstable();
        jobs
    }

    /// Stop accepting jobs and wait for running ones. Jobs still running
    /// after `grace` are cancelled, which lets them record their outcome.
    pub async fn shutdown(&self, grace: Duration) {
        self.tracker.close();
        if tokio::time::timeout(grace, self.tracker.wait()).await.is_err() {
            tracing::warn!(running = self.tracker.len(), "Cancelling jobs still running at shutdown");
            self.shutdown.cancel();
            self.tracker.wait().await;
        }
        tracing::info!("Ingestion coordinator stopped");
    }

    fn registry(&self) -> MutexGuard<'_, HashMap<u64, CancellationToken>> {
        lock_jobs(&self.running)
    }
}

/// Terminal state of a job from its fan-out outcome
fn classify(report: &FanoutReport, cancelled: bool, deadline_hit: bool) -> (JobState, Option<String>) {
    if cancelled && report.skipped_chunks() > 0 {
        let reason = if deadline_hit {
            "job deadline exceeded"
        } else {
            "job cancelled"
        };
        return (JobState::Cancelled, Some(reason.to_string()));
    }

    if report.is_complete_success() {
        return (JobState::Completed, None);
    }

    let failed = report.failed_chunks();
    let message = format!("{failed} chunk(s) failed");
    if report.records_written() == 0 {
        (JobState::Failed, Some(message))
    } else {
        (JobState::CompletedWithErrors, Some(message))
    }
}
