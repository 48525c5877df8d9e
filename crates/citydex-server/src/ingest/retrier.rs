//! Bounded retry of partially accepted batch writes
//!
//! A wide-column batch write may accept only part of a chunk and hand back
//! the rest as unprocessed. Unprocessed items are collected across a pass and
//! resubmitted on the next one, pausing after every call, until a pass comes
//! back clean or the pass/time budget runs out. The time budget covers the
//! retry passes only, so a large first pass never starves the retries.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::error::{IngestError, SinkError};

/// One wide-column item: attribute name to string value
pub type WideColumnItem = BTreeMap<String, String>;

/// Maximum items a single batch write accepts
pub const MAX_BATCH_ITEMS: usize = 25;

/// A store that may accept only part of a batch
#[async_trait]
pub trait BatchWriteItems: Send + Sync {
    /// Write at most [`MAX_BATCH_ITEMS`] items; returns the unprocessed subset.
    async fn batch_write(&self, items: Vec<WideColumnItem>) -> Result<Vec<WideColumnItem>, SinkError>;
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub chunk_size: usize,
    /// Pause after each call of the first pass
    pub first_pass_delay: Duration,
    /// Pause after each call of every later pass
    pub retry_pass_delay: Duration,
    pub max_passes: u32,
    /// Time allowed for the passes after the first, counted from the end of
    /// the first pass
    pub max_elapsed: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            chunk_size: MAX_BATCH_ITEMS,
            first_pass_delay: Duration::from_millis(1000),
            retry_pass_delay: Duration::from_millis(2000),
            max_passes: 8,
            max_elapsed: Some(Duration::from_secs(300)),
        }
    }
}

impl RetryPolicy {
    fn delay_for(&self, pass: u32) -> Duration {
        if pass <= 1 {
            self.first_pass_delay
        } else {
            self.retry_pass_delay
        }
    }
}

/// Outcome of a retrier run that did not exhaust its budget
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryReport {
    pub passes: u32,
    pub calls: usize,
    pub items_written: usize,
    pub chunk_errors: Vec<String>,
    /// Items still pending when the run was cancelled
    pub unprocessed: Vec<WideColumnItem>,
    pub cancelled: bool,
}

#[derive(Debug, Clone, Default)]
pub struct UnprocessedItemRetrier {
    policy: RetryPolicy,
}

impl UnprocessedItemRetrier {
    pub fn new(policy: RetryPolicy) -> Self {
        let mut policy = policy;
        policy.chunk_size = policy.chunk_size.clamp(1, MAX_BATCH_ITEMS);
        policy.max_passes = policy.max_passes.max(1);
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Write every item, resubmitting unprocessed ones pass after pass.
    ///
    /// Returns `BatchWriteExhausted` with the items still unprocessed and the
    /// chunk errors seen so far when `max_passes` or `max_elapsed` is reached
    /// first.
    #[tracing::instrument(skip_all, fields(items = items.len()))]
    pub async fn write_all<S>(
        &self,
        store: &S,
        items: Vec<WideColumnItem>,
        cancel: &CancellationToken,
    ) -> Result<RetryReport, IngestError>
    where
        S: BatchWriteItems + ?Sized,
    {
        let mut retry_started: Option<Instant> = None;
        let mut report = RetryReport::default();
        let mut pending = items;

        while !pending.is_empty() {
            if report.passes >= self.policy.max_passes || self.out_of_time(retry_started) {
                tracing::error!(
                    passes = report.passes,
                    remaining = pending.len(),
                    "Batch write retry budget exhausted"
                );
                return Err(IngestError::BatchWriteExhausted {
                    passes: report.passes,
                    remaining: pending,
                    chunk_errors: report.chunk_errors,
                });
            }

            report.passes += 1;
            let pass = report.passes;
            let delay = self.policy.delay_for(pass);
            let submitted = pending.len();
            let mut next = Vec::new();
            let mut chunks = chunk_items(pending, self.policy.chunk_size).into_iter();

            while let Some(chunk) = chunks.next() {
                if cancel.is_cancelled() {
                    next.extend(chunk);
                    next.extend(chunks.by_ref().flatten());
                    report.cancelled = true;
                    break;
                }

                let size = chunk.len();
                report.calls += 1;
                match store.batch_write(chunk.clone()).await {
                    Ok(unprocessed) => {
                        report.items_written += size.saturating_sub(unprocessed.len());
                        next.extend(unprocessed);
                    }
                    Err(e) => {
                        tracing::warn!(pass, error = %e, "Batch write failed, requeueing chunk");
                        report.chunk_errors.push(format!("pass {pass}: {e}"));
                        next.extend(chunk);
                    }
                }

                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            if report.cancelled {
                report.unprocessed = next;
                tracing::info!(pass, remaining = report.unprocessed.len(), "Batch write cancelled");
                return Ok(report);
            }

            tracing::debug!(pass, submitted, unprocessed = next.len(), "Batch write pass complete");
            pending = next;
            retry_started.get_or_insert_with(Instant::now);
        }

        Ok(report)
    }

    fn out_of_time(&self, retry_started: Option<Instant>) -> bool {
        match (self.policy.max_elapsed, retry_started) {
            (Some(limit), Some(started)) => started.elapsed() >= limit,
            _ => false,
        }
    }
}

fn chunk_items(items: Vec<WideColumnItem>, size: usize) -> Vec<Vec<WideColumnItem>> {
    let mut chunks = Vec::with_capacity(items.len().div_ceil(size));
    let mut iter = items.into_iter().peekable();
    while iter.peek().is_some() {
        chunks.push(iter.by_ref().take(size).collect());
    }
    chunks
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;

    fn items(n: usize) -> Vec<WideColumnItem> {
        (0..n)
            .map(|i| WideColumnItem::from([("id".to_string(), i.to_string())]))
            .collect()
    }

    fn id(item: &WideColumnItem) -> String {
        item["id"].clone()
    }

    /// Scripted store: the Nth time it sees an item id it rejects it while N
    /// is below `rejections_per_item`
    #[derive(Default)]
    struct ScriptedStore {
        calls: Mutex<Vec<Vec<String>>>,
        seen: Mutex<HashMap<String, usize>>,
        rejections_per_item: usize,
        fail_calls: Vec<usize>,
    }

    #[async_trait]
    impl BatchWriteItems for ScriptedStore {
        async fn batch_write(
            &self,
            items: Vec<WideColumnItem>,
        ) -> Result<Vec<WideColumnItem>, SinkError> {
            let call = {
                let mut calls = self.calls.lock().unwrap();
                calls.push(items.iter().map(id).collect());
                calls.len() - 1
            };
            if self.fail_calls.contains(&call) {
                return Err(SinkError::DynamoDb("throttled".to_string()));
            }

            let mut seen = self.seen.lock().unwrap();
            Ok(items
                .into_iter()
                .filter(|item| {
                    let count = seen.entry(id(item)).or_default();
                    *count += 1;
                    *count <= self.rejections_per_item
                })
                .collect())
        }
    }

    /// Rejects one item id the first time it is offered
    struct RejectOnceStore {
        target: String,
        rejected: Mutex<bool>,
        calls: Mutex<Vec<Vec<String>>>,
    }

    impl RejectOnceStore {
        fn new(target: &str) -> Self {
            Self {
                target: target.to_string(),
                rejected: Mutex::new(false),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl BatchWriteItems for RejectOnceStore {
        async fn batch_write(
            &self,
            items: Vec<WideColumnItem>,
        ) -> Result<Vec<WideColumnItem>, SinkError> {
            self.calls.lock().unwrap().push(items.iter().map(id).collect());
            let mut rejected = self.rejected.lock().unwrap();
            if *rejected {
                return Ok(Vec::new());
            }
            let unprocessed: Vec<_> = items.into_iter().filter(|i| id(i) == self.target).collect();
            *rejected = !unprocessed.is_empty();
            Ok(unprocessed)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_pass_issues_ceil_n_over_25_calls() {
        let store = ScriptedStore::default();
        let report = UnprocessedItemRetrier::default()
            .write_all(&store, items(60), &CancellationToken::new())
            .await
            .unwrap();

        let calls = store.calls.lock().unwrap();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls.iter().map(Vec::len).collect::<Vec<_>>(), vec![25, 25, 10]);
        assert_eq!(report.passes, 1);
        assert_eq!(report.items_written, 60);
    }

    #[tokio::test(start_paused = true)]
    async fn test_converges_after_all_unprocessed_once() {
        let store = ScriptedStore {
            rejections_per_item: 1,
            ..Default::default()
        };
        let report = UnprocessedItemRetrier::default()
            .write_all(&store, items(25), &CancellationToken::new())
            .await
            .unwrap();

        let calls = store.calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(report.passes, 2);
        assert_eq!(report.items_written, 25);

        // Second call resubmits exactly the first chunk, no duplicates
        let first: HashSet<_> = calls[0].iter().collect();
        let second: HashSet<_> = calls[1].iter().collect();
        assert_eq!(first, second);
        assert_eq!(calls[1].len(), second.len());
    }

    #[tokio::test(start_paused = true)]
    async fn test_delays_follow_pass_number() {
        let store = ScriptedStore {
            rejections_per_item: 1,
            ..Default::default()
        };
        let started = Instant::now();
        UnprocessedItemRetrier::default()
            .write_all(&store, items(30), &CancellationToken::new())
            .await
            .unwrap();

        // Pass 1: two calls at 1s each. Pass 2: two calls at 2s each.
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(6), "{elapsed:?}");
        assert!(elapsed < Duration::from_secs(7), "{elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_returns_remaining_items() {
        let store = ScriptedStore {
            rejections_per_item: usize::MAX,
            ..Default::default()
        };
        let policy = RetryPolicy {
            max_passes: 3,
            ..RetryPolicy::default()
        };

        let err = UnprocessedItemRetrier::new(policy)
            .write_all(&store, items(5), &CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            IngestError::BatchWriteExhausted {
                passes,
                remaining,
                chunk_errors,
            } => {
                assert_eq!(passes, 3);
                assert_eq!(remaining.len(), 5);
                assert!(chunk_errors.is_empty());
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(store.calls.lock().unwrap().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_elapsed_budget_is_enforced() {
        let store = ScriptedStore {
            rejections_per_item: usize::MAX,
            ..Default::default()
        };
        let policy = RetryPolicy {
            max_passes: 1_000,
            max_elapsed: Some(Duration::from_secs(10)),
            ..RetryPolicy::default()
        };

        let err = UnprocessedItemRetrier::new(policy)
            .write_all(&store, items(1), &CancellationToken::new())
            .await
            .unwrap_err();

        // The budget starts after the 1s first pass; five 2s retry passes use it up
        assert!(matches!(err, IngestError::BatchWriteExhausted { passes: 6, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_long_first_pass_leaves_retry_budget_intact() {
        // Item "0" is rejected once. 7,600 items take 304 calls, over 300s of
        // first-pass pauses alone.
        let store = RejectOnceStore::new("0");
        let policy = RetryPolicy {
            max_elapsed: Some(Duration::from_secs(300)),
            ..RetryPolicy::default()
        };

        let report = UnprocessedItemRetrier::new(policy)
            .write_all(&store, items(7_600), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.passes, 2);
        assert_eq!(report.calls, 305);
        assert_eq!(report.items_written, 7_600);
        assert_eq!(store.calls.lock().unwrap().last().unwrap(), &vec!["0".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_keeps_chunk_errors() {
        let store = ScriptedStore {
            fail_calls: vec![0, 1],
            ..Default::default()
        };
        let policy = RetryPolicy {
            max_passes: 2,
            ..RetryPolicy::default()
        };

        let err = UnprocessedItemRetrier::new(policy)
            .write_all(&store, items(3), &CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            IngestError::BatchWriteExhausted {
                remaining,
                chunk_errors,
                ..
            } => {
                assert_eq!(remaining.len(), 3);
                assert_eq!(chunk_errors.len(), 2);
                assert!(chunk_errors[0].starts_with("pass 1:"));
                assert!(chunk_errors[1].starts_with("pass 2:"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_chunk_error_requeues_items() {
        let store = ScriptedStore {
            fail_calls: vec![0],
            ..Default::default()
        };
        let report = UnprocessedItemRetrier::default()
            .write_all(&store, items(30), &CancellationToken::new())
            .await
            .unwrap();

        let calls = store.calls.lock().unwrap();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[2], calls[0]);
        assert_eq!(report.chunk_errors.len(), 1);
        assert_eq!(report.items_written, 30);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_and_reports_pending() {
        let store = ScriptedStore::default();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = UnprocessedItemRetrier::default()
            .write_all(&store, items(40), &cancel)
            .await
            .unwrap();

        assert!(report.cancelled);
        assert_eq!(report.unprocessed.len(), 40);
        assert!(store.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_chunk_size_clamped_to_batch_limit() {
        let retrier = UnprocessedItemRetrier::new(RetryPolicy {
            chunk_size: 100,
            ..RetryPolicy::default()
        });
        assert_eq!(retrier.policy().chunk_size, MAX_BATCH_ITEMS);
    }
}
