//! Document store sink
//!
//! Records are stored whole, keyed by their id under `n_id`.

use async_trait::async_trait;
use citydex_common::NormalizedRecord;
use serde_json::{Map, Value};
use sqlx::{types::Json, PgPool, Postgres, QueryBuilder};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::RecordSink;
use crate::ingest::chunked::{BulkWrite, ChunkedBatchWriter, SinkReport};
use crate::ingest::error::SinkError;

/// Key the document store uses for the record id
pub const DOCUMENT_KEY: &str = "n_id";

pub const SINK_NAME: &str = "document";

/// Backend accepting many documents in one request
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Every document carries its id under [`DOCUMENT_KEY`].
    async fn insert_many(&self, documents: Vec<Map<String, Value>>) -> Result<(), SinkError>;
}

/// `city_documents` table, one JSONB body per record
#[derive(Debug, Clone)]
pub struct PgDocumentStore {
    pool: PgPool,
}

impl PgDocumentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn document_id(document: &Map<String, Value>) -> Result<i64, SinkError> {
    document
        .get(DOCUMENT_KEY)
        .and_then(Value::as_u64)
        .and_then(|id| i64::try_from(id).ok())
        .ok_or_else(|| SinkError::InvalidRecord(format!("document without a valid {DOCUMENT_KEY}")))
}

#[async_trait]
impl DocumentStore for PgDocumentStore {
    async fn insert_many(&self, documents: Vec<Map<String, Value>>) -> Result<(), SinkError> {
        if documents.is_empty() {
            return Ok(());
        }

        let rows = documents
            .into_iter()
            .map(|doc| Ok((document_id(&doc)?, doc)))
            .collect::<Result<Vec<_>, SinkError>>()?;

        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new("INSERT INTO city_documents (n_id, body) ");
        builder.push_values(rows, |mut row, (n_id, body)| {
            row.push_bind(n_id).push_bind(Json(body));
        });
        // Ids are unique per record, so a replayed chunk overwrites itself.
        builder.push(" ON CONFLICT (n_id) DO UPDATE SET body = EXCLUDED.body");

        builder.build().execute(&self.pool).await?;
        Ok(())
    }
}

/// Chunked writes of whole records to a [`DocumentStore`]
pub struct DocumentSink {
    store: Arc<dyn DocumentStore>,
    writer: ChunkedBatchWriter,
}

impl DocumentSink {
    pub fn new(store: Arc<dyn DocumentStore>, chunk_size: usize) -> Self {
        Self {
            store,
            writer: ChunkedBatchWriter::new(SINK_NAME, chunk_size),
        }
    }
}

#[async_trait]
impl BulkWrite for DocumentSink {
    async fn write_chunk(&self, chunk: &[NormalizedRecord]) -> Result<(), SinkError> {
        let documents = chunk
            .iter()
            .map(|record| record.to_document(DOCUMENT_KEY))
            .collect();
        self.store.insert_many(documents).await
    }
}

#[async_trait]
impl RecordSink for DocumentSink {
    fn name(&self) -> &'static str {
        SINK_NAME
    }

    async fn write_all(&self, records: Arc<[NormalizedRecord]>, cancel: CancellationToken) -> SinkReport {
        self.writer.write_all(&records, self, &cancel).await
    }
}
