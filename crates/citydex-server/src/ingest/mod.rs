//! City record ingestion pipeline
//!
//! An upload is parsed once, normalized, given snowflake ids and then fanned
//! out to the document store, the search index and (optionally) the
//! wide-column store. Each sink is written independently in chunks; a failed
//! chunk is counted, not fatal.

pub mod chunked;
pub mod coordinator;
pub mod error;
pub mod fanout;
pub mod ids;
pub mod job_log;
pub mod job_status;
pub mod normalize;
pub mod retrier;
pub mod sinks;

pub use chunked::{BulkWrite, ChunkedBatchWriter, SinkReport};
pub use coordinator::{CoordinatorSettings, IngestionJobCoordinator, JobTicket, JobView};
pub use error::{IngestError, SinkError};
pub use fanout::{DualSinkFanout, FanoutReport};
pub use ids::{assign_ids, IdAssigner, IdSettings, SnowflakeIdAssigner};
pub use job_log::{InMemoryJobLog, JobCompletion, JobLog, JobState, PgJobLog};
pub use job_status::{
    sweep_stale_flags, ActiveJobGuard, InMemoryJobStatusStore, JobStatusStore, PgJobStatusStore,
};
pub use normalize::{parse_upload, NormalizedFields, RecordNormalizer};
pub use retrier::{BatchWriteItems, RetryPolicy, RetryReport, UnprocessedItemRetrier, WideColumnItem};
pub use sinks::RecordSink;
