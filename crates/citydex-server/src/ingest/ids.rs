//! Record and job identifiers
//!
//! Ids are 64-bit snowflakes: 41 bits of milliseconds since 2020-01-01 UTC,
//! 10 bits of worker id, 12 bits of per-millisecond sequence. Every record of
//! a job gets its id before any sink sees it; ids are fetched in blocks with
//! bounded concurrency instead of one round trip per record.

use async_trait::async_trait;
use citydex_common::{NormalizedRecord, RecordId};
use futures::{stream, StreamExt, TryStreamExt};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use super::error::IngestError;
use super::normalize::NormalizedFields;

/// 2020-01-01T00:00:00Z in unix milliseconds
pub const SNOWFLAKE_EPOCH_MS: u64 = 1_577_836_800_000;

const WORKER_BITS: u32 = 10;
const SEQUENCE_BITS: u32 = 12;
const TIMESTAMP_BITS: u32 = 41;

pub const MAX_WORKER_ID: u16 = (1 << WORKER_BITS) - 1;
const MAX_SEQUENCE: u64 = (1 << SEQUENCE_BITS) - 1;
const MAX_TIMESTAMP: u64 = (1 << TIMESTAMP_BITS) - 1;

/// Source of unique, time ordered ids
#[async_trait]
pub trait IdAssigner: Send + Sync {
    /// `count` unique ids. Implementations must return exactly `count`.
    async fn next_block(&self, count: usize) -> Result<Vec<RecordId>, IngestError>;

    async fn next_id(&self) -> Result<RecordId, IngestError> {
        self.next_block(1)
            .await?
            .pop()
            .ok_or_else(|| IngestError::IdServiceUnavailable("empty id block".to_string()))
    }
}

#[derive(Debug, Default)]
struct SnowflakeState {
    last_ms: u64,
    sequence: u64,
}

/// In-process snowflake generator
#[derive(Debug)]
pub struct SnowflakeIdAssigner {
    worker_id: u16,
    state: Mutex<SnowflakeState>,
}

impl SnowflakeIdAssigner {
    pub fn new(worker_id: u16) -> Result<Self, IngestError> {
        if worker_id > MAX_WORKER_ID {
            return Err(IngestError::IdServiceUnavailable(format!(
                "worker id {worker_id} exceeds {MAX_WORKER_ID}"
            )));
        }

        Ok(Self {
            worker_id,
            state: Mutex::new(SnowflakeState::default()),
        })
    }

    pub fn worker_id(&self) -> u16 {
        self.worker_id
    }

    fn now_ms() -> Result<u64, IngestError> {
        let since_unix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| IngestError::IdServiceUnavailable(format!("system clock error: {e}")))?;

        (since_unix.as_millis() as u64)
            .checked_sub(SNOWFLAKE_EPOCH_MS)
            .ok_or_else(|| IngestError::IdServiceUnavailable("system clock before epoch".into()))
    }

    fn generate(&self, count: usize) -> Result<Vec<RecordId>, IngestError> {
        let now = Self::now_ms()?;
        let mut state = self
            .state
            .lock()
            .map_err(|_| IngestError::IdServiceUnavailable("id generator poisoned".into()))?;

        let mut ids = Vec::with_capacity(count);
        for _ in 0..count {
            // Never step back in time, even if the wall clock does.
            let mut ts = now.max(state.last_ms);
            if ts == state.last_ms {
                state.sequence += 1;
                if state.sequence > MAX_SEQUENCE {
                    ts += 1;
                    state.sequence = 0;
                }
            } else {
                state.sequence = 0;
            }

            if ts > MAX_TIMESTAMP {
                return Err(IngestError::IdServiceUnavailable("timestamp space exhausted".into()));
            }

            state.last_ms = ts;
            ids.push(
                (ts << (WORKER_BITS + SEQUENCE_BITS))
                    | (u64::from(self.worker_id) << SEQUENCE_BITS)
                    | state.sequence,
            );
        }

        Ok(ids)
    }
}

#[async_trait]
impl IdAssigner for SnowflakeIdAssigner {
    async fn next_block(&self, count: usize) -> Result<Vec<RecordId>, IngestError> {
        self.generate(count)
    }
}

/// Block id acquisition settings
#[derive(Debug, Clone)]
pub struct IdSettings {
    pub block_size: usize,
    pub concurrency: usize,
    /// Upper bound for a single block request
    pub timeout: Duration,
}

impl Default for IdSettings {
    fn default() -> Self {
        Self {
            block_size: 500,
            concurrency: 4,
            timeout: Duration::from_secs(2),
        }
    }
}

/// Attach ids to every record, preserving upload order.
///
/// All-or-nothing: a timeout or backend error on any block fails the whole
/// call, so no partially numbered record set can reach a sink.
#[tracing::instrument(skip(assigner, records), fields(records = records.len()))]
pub async fn assign_ids(
    assigner: &dyn IdAssigner,
    records: Vec<NormalizedFields>,
    settings: &IdSettings,
) -> Result<Vec<NormalizedRecord>, IngestError> {
    let total = records.len();
    let block_size = settings.block_size.max(1);
    let blocks: Vec<usize> = (0..total)
        .step_by(block_size)
        .map(|start| block_size.min(total - start))
        .collect();

    let fetched: Vec<Vec<RecordId>> = stream::iter(blocks)
        .map(|count| async move {
            let ids = tokio::time::timeout(settings.timeout, assigner.next_block(count))
                .await
                .map_err(|_| {
                    IngestError::IdServiceUnavailable(format!(
                        "no response within {:?}",
                        settings.timeout
                    ))
                })??;

            if ids.len() != count {
                return Err(IngestError::IdServiceUnavailable(format!(
                    "requested {count} ids, received {}",
                    ids.len()
                )));
            }
            Ok(ids)
        })
        .buffered(settings.concurrency.max(1))
        .try_collect()
        .await?;

    let mut ids: Vec<RecordId> = fetched.into_iter().flatten().collect();
    // Blocks may complete out of order; sorting keeps ids increasing in upload order.
    ids.sort_unstable();
    if ids.windows(2).any(|pair| pair[0] == pair[1]) {
        return Err(IngestError::IdServiceUnavailable("id service returned duplicates".into()));
    }

    records
        .into_iter()
        .zip(ids)
        .enumerate()
        .map(|(index, (fields, id))| {
            NormalizedRecord::new(id, fields)
                .map_err(|e| IngestError::malformed(Some(index), e.to_string()))
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::{json, Map};
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fields(n: usize) -> Vec<NormalizedFields> {
        (0..n)
            .map(|i| {
                let mut map = Map::new();
                map.insert("codgeo".to_string(), json!(format!("{i:05}")));
                map
            })
            .collect()
    }

    #[test]
    fn test_rejects_out_of_range_worker() {
        assert!(SnowflakeIdAssigner::new(MAX_WORKER_ID + 1).is_err());
        assert_eq!(SnowflakeIdAssigner::new(7).unwrap().worker_id(), 7);
    }

    #[tokio::test]
    async fn test_snowflake_ids_strictly_increase_past_sequence_space() {
        let assigner = SnowflakeIdAssigner::new(1).unwrap();
        let ids = assigner.next_block(10_000).await.unwrap();

        assert_eq!(ids.len(), 10_000);
        assert!(ids.windows(2).all(|w| w[0] < w[1]));

        let next = assigner.next_id().await.unwrap();
        assert!(next > *ids.last().unwrap());
    }

    #[tokio::test]
    async fn test_snowflake_embeds_worker_id() {
        let assigner = SnowflakeIdAssigner::new(513).unwrap();
        let id = assigner.next_id().await.unwrap();
        assert_eq!((id >> SEQUENCE_BITS) & u64::from(MAX_WORKER_ID), 513);
    }

    #[tokio::test]
    async fn test_assign_ids_gives_n_distinct_ids_in_order() {
        let assigner = SnowflakeIdAssigner::new(2).unwrap();
        let settings = IdSettings {
            block_size: 64,
            concurrency: 3,
            timeout: Duration::from_secs(1),
        };

        let records = assign_ids(&assigner, fields(1_000), &settings).await.unwrap();

        assert_eq!(records.len(), 1_000);
        let unique: HashSet<_> = records.iter().map(|r| r.id()).collect();
        assert_eq!(unique.len(), 1_000);
        assert!(records.windows(2).all(|w| w[0].id() < w[1].id()));
        assert_eq!(records[17].get("codgeo"), Some(&json!("00017")));
    }

    #[tokio::test]
    async fn test_assign_ids_empty_input() {
        let assigner = SnowflakeIdAssigner::new(0).unwrap();
        let records = assign_ids(&assigner, Vec::new(), &IdSettings::default()).await.unwrap();
        assert!(records.is_empty());
    }

    struct StalledAssigner;

    #[async_trait]
    impl IdAssigner for StalledAssigner {
        async fn next_block(&self, _count: usize) -> Result<Vec<RecordId>, IngestError> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_assign_ids_times_out() {
        let settings = IdSettings {
            timeout: Duration::from_millis(50),
            ..IdSettings::default()
        };

        let err = assign_ids(&StalledAssigner, fields(3), &settings).await.unwrap_err();
        assert!(matches!(err, IngestError::IdServiceUnavailable(_)));
    }

    /// Fails the third block it is asked for
    struct FlakyAssigner {
        inner: SnowflakeIdAssigner,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl IdAssigner for FlakyAssigner {
        async fn next_block(&self, count: usize) -> Result<Vec<RecordId>, IngestError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 2 {
                return Err(IngestError::IdServiceUnavailable("connection reset".into()));
            }
            self.inner.next_block(count).await
        }
    }

    #[tokio::test]
    async fn test_assign_ids_is_all_or_nothing() {
        let assigner = FlakyAssigner {
            inner: SnowflakeIdAssigner::new(3).unwrap(),
            calls: AtomicUsize::new(0),
        };
        let settings = IdSettings {
            block_size: 10,
            concurrency: 1,
            ..IdSettings::default()
        };

        let result = assign_ids(&assigner, fields(50), &settings).await;
        assert!(matches!(result, Err(IngestError::IdServiceUnavailable(_))));
    }
}
