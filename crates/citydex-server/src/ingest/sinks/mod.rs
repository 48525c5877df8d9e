//! Downstream sinks
//!
//! Each sink owns its own copy of every record shape it writes and never
//! mutates the shared [`NormalizedRecord`]s. A sink reports per-chunk
//! outcomes instead of failing the job.

use async_trait::async_trait;
use citydex_common::NormalizedRecord;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::chunked::SinkReport;

pub mod document;
pub mod search;
pub mod wide_column;

pub use document::{DocumentSink, DocumentStore, PgDocumentStore};
pub use search::{ElasticsearchIndex, SearchIndex, SearchSink};
pub use wide_column::{DynamoDbBatchWriter, WideColumnSink};

/// One independent write pipeline over a job's records
#[async_trait]
pub trait RecordSink: Send + Sync {
    fn name(&self) -> &'static str;

    async fn write_all(&self, records: Arc<[NormalizedRecord]>, cancel: CancellationToken) -> SinkReport;
}
