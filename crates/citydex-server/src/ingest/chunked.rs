//! Sequential chunked writes to one sink
//!
//! Records are split into contiguous chunks and written one chunk at a time.
//! A failed chunk is logged and counted and the writer moves on; nothing is
//! retried here.

use async_trait::async_trait;
use citydex_common::NormalizedRecord;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::error::{IngestError, SinkError};

/// One bulk request against a backend
#[async_trait]
pub trait BulkWrite: Send + Sync {
    async fn write_chunk(&self, chunk: &[NormalizedRecord]) -> Result<(), SinkError>;
}

/// Per-sink outcome of a job
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SinkReport {
    pub sink: String,
    pub chunks_total: usize,
    pub chunks_written: usize,
    pub chunks_failed: usize,
    pub chunks_skipped: usize,
    pub records_written: usize,
    pub records_failed: usize,
    pub records_skipped: usize,
    pub errors: Vec<String>,
}

impl SinkReport {
    pub fn new(sink: &str) -> Self {
        Self {
            sink: sink.to_string(),
            ..Self::default()
        }
    }

    /// A pipeline that died before reporting (panic or abort)
    pub fn aborted(sink: &str, records: usize, reason: impl Into<String>) -> Self {
        Self {
            sink: sink.to_string(),
            chunks_total: 1,
            chunks_failed: 1,
            records_failed: records,
            errors: vec![reason.into()],
            ..Self::default()
        }
    }

    pub fn is_success(&self) -> bool {
        self.chunks_failed == 0 && self.chunks_skipped == 0
    }
}

/// Writes records to a single sink in chunks of at most `chunk_size`
#[derive(Debug, Clone)]
pub struct ChunkedBatchWriter {
    sink: &'static str,
    chunk_size: usize,
}

impl ChunkedBatchWriter {
    pub fn new(sink: &'static str, chunk_size: usize) -> Self {
        Self {
            sink,
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    #[tracing::instrument(skip_all, fields(sink = self.sink, records = records.len()))]
    pub async fn write_all<W>(
        &self,
        records: &[NormalizedRecord],
        writer: &W,
        cancel: &CancellationToken,
    ) -> SinkReport
    where
        W: BulkWrite + ?Sized,
    {
        let mut report = SinkReport::new(self.sink);
        report.chunks_total = records.len().div_ceil(self.chunk_size);

        for (index, chunk) in records.chunks(self.chunk_size).enumerate() {
            if cancel.is_cancelled() {
                report.chunks_skipped += 1;
                report.records_skipped += chunk.len();
                continue;
            }

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                result = writer.write_chunk(chunk) => Some(result),
            };

            match outcome {
                Some(Ok(())) => {
                    report.chunks_written += 1;
                    report.records_written += chunk.len();
                    tracing::debug!(chunk = index, size = chunk.len(), "Chunk written");
                }
                Some(Err(source)) => {
                    let error = IngestError::SinkChunkWrite {
                        sink: self.sink,
                        chunk: index,
                        source,
                    };
                    tracing::warn!(error = %error, "Chunk write failed");
                    report.chunks_failed += 1;
                    report.records_failed += chunk.len();
                    report.errors.push(error.to_string());
                }
                None => {
                    report.chunks_skipped += 1;
                    report.records_skipped += chunk.len();
                }
            }
        }

        if report.chunks_skipped > 0 {
            tracing::info!(skipped = report.chunks_skipped, "Sink cancelled before all chunks were written");
        }

        report
    }
}
