//! Wide-column sink (DynamoDB)
//!
//! Every record field becomes a string attribute. Writes go through
//! [`UnprocessedItemRetrier`] in batches of at most 25 items.

use async_trait::async_trait;
use aws_sdk_dynamodb::error::DisplayErrorContext;
use aws_sdk_dynamodb::types::{AttributeValue, PutRequest, ReturnItemCollectionMetrics, WriteRequest};
use aws_sdk_dynamodb::Client;
use citydex_common::{types::ID_FIELD, NormalizedRecord};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::RecordSink;
use crate::ingest::chunked::SinkReport;
use crate::ingest::error::{IngestError, SinkError};
use crate::ingest::retrier::{BatchWriteItems, UnprocessedItemRetrier, WideColumnItem};

pub const SINK_NAME: &str = "wide_column";

/// Item for one record; strings are stored as-is, anything else as JSON text
pub fn to_item(record: &NormalizedRecord) -> WideColumnItem {
    let mut item: WideColumnItem = record
        .fields()
        .iter()
        .map(|(key, value)| {
            let text = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (key.clone(), text)
        })
        .collect();
    item.insert(ID_FIELD.to_string(), record.id().to_string());
    item
}

/// `BatchWriteItem` against one table
#[derive(Debug, Clone)]
pub struct DynamoDbBatchWriter {
    client: Client,
    table: String,
}

impl DynamoDbBatchWriter {
    pub fn new(client: Client, table: impl Into<String>) -> Self {
        Self {
            client,
            table: table.into(),
        }
    }

    fn put_request(item: WideColumnItem) -> Result<WriteRequest, SinkError> {
        let attributes: HashMap<String, AttributeValue> = item
            .into_iter()
            .map(|(key, value)| (key, AttributeValue::S(value)))
            .collect();

        let put = PutRequest::builder()
            .set_item(Some(attributes))
            .build()
            .map_err(|e| SinkError::DynamoDb(e.to_string()))?;

        Ok(WriteRequest::builder().put_request(put).build())
    }
}

fn from_put_request(request: &WriteRequest) -> Option<WideColumnItem> {
    let put = request.put_request()?;
    Some(
        put.item()
            .iter()
            .filter_map(|(key, value)| value.as_s().ok().map(|s| (key.clone(), s.clone())))
            .collect(),
    )
}

#[async_trait]
impl BatchWriteItems for DynamoDbBatchWriter {
    async fn batch_write(&self, items: Vec<WideColumnItem>) -> Result<Vec<WideColumnItem>, SinkError> {
        let requests = items
            .into_iter()
            .map(Self::put_request)
            .collect::<Result<Vec<_>, _>>()?;

        let output = self
            .client
            .batch_write_item()
            .request_items(&self.table, requests)
            .return_item_collection_metrics(ReturnItemCollectionMetrics::Size)
            .send()
            .await
            .map_err(|e| SinkError::DynamoDb(DisplayErrorContext(e).to_string()))?;

        if let Some(metrics) = output.item_collection_metrics() {
            tracing::trace!(collections = metrics.len(), "Item collection metrics returned");
        }

        Ok(output
            .unprocessed_items()
            .and_then(|tables| tables.get(&self.table))
            .map(|requests| requests.iter().filter_map(from_put_request).collect())
            .unwrap_or_default())
    }
}

/// Retried batch writes of every record field
pub struct WideColumnSink {
    store: Arc<dyn BatchWriteItems>,
    retrier: UnprocessedItemRetrier,
}

impl WideColumnSink {
    pub fn new(store: Arc<dyn BatchWriteItems>, retrier: UnprocessedItemRetrier) -> Self {
        Self { store, retrier }
    }
}

#[async_trait]
impl RecordSink for WideColumnSink {
    fn name(&self) -> &'static str {
        SINK_NAME
    }

    #[tracing::instrument(skip_all, fields(sink = SINK_NAME, records = records.len()))]
    async fn write_all(&self, records: Arc<[NormalizedRecord]>, cancel: CancellationToken) -> SinkReport {
        let total = records.len();
        let chunk_size = self.retrier.policy().chunk_size;
        let items: Vec<WideColumnItem> = records.iter().map(to_item).collect();

        let mut report = SinkReport::new(SINK_NAME);
        report.chunks_total = total.div_ceil(chunk_size);

        match self.retrier.write_all(self.store.as_ref(), items, &cancel).await {
            Ok(outcome) => {
                let pending = outcome.unprocessed.len();
                report.chunks_skipped = pending.div_ceil(chunk_size);
                report.chunks_written = report.chunks_total.saturating_sub(report.chunks_skipped);
                report.records_written = outcome.items_written;
                report.records_skipped = pending;
                report.errors = outcome.chunk_errors;
                tracing::info!(
                    passes = outcome.passes,
                    calls = outcome.calls,
                    written = outcome.items_written,
                    cancelled = outcome.cancelled,
                    "Wide-column write finished"
                );
            }
            Err(error) => {
                let remaining = match &error {
                    IngestError::BatchWriteExhausted {
                        remaining, chunk_errors, ..
                    } => {
                        report.errors.extend(chunk_errors.iter().cloned());
                        remaining.len()
                    }
                    _ => total,
                };
                report.chunks_failed = remaining.div_ceil(chunk_size);
                report.chunks_written = report.chunks_total.saturating_sub(report.chunks_failed);
                report.records_failed = remaining;
                report.records_written = total.saturating_sub(remaining);
                report.errors.push(error.to_string());
                tracing::error!(error = %error, "Wide-column write gave up");
            }
        }

        report
    }
}
