//! Search index sink
//!
//! Each chunk becomes one Elasticsearch `_bulk` request: an `index` action
//! line followed by a fixed projection of the record.

use async_trait::async_trait;
use citydex_common::{NormalizedRecord, RecordId};
use reqwest::{header::CONTENT_TYPE, Client};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::RecordSink;
use crate::ingest::chunked::{BulkWrite, ChunkedBatchWriter, SinkReport};
use crate::ingest::error::SinkError;

pub const SINK_NAME: &str = "search";

/// Projected search field and the record field(s) it is read from, first
/// present wins
const PROJECTION: &[(&str, &[&str])] = &[
    ("insee_code", &["codgeo"]),
    ("nom_com", &["nom_com", "libgeo"]),
    ("nom_dept", &["nom_dept"]),
    ("nom_reg", &["nom_reg"]),
    ("geo_point", &["geo_point"]),
    ("geo_shape", &["geo_shape"]),
];

/// Search document for one record. Fields the record lacks are omitted.
pub fn project(record: &NormalizedRecord) -> Map<String, Value> {
    let mut body = Map::with_capacity(PROJECTION.len());
    for (target, sources) in PROJECTION {
        if let Some(value) = sources.iter().find_map(|source| record.get(source)) {
            body.insert((*target).to_string(), value.clone());
        }
    }
    body
}

/// NDJSON `_bulk` payload: one action line and one source line per document
pub fn render_bulk_body(index: &str, documents: &[(RecordId, Map<String, Value>)]) -> String {
    let mut body = String::new();
    for (id, source) in documents {
        let action = json!({ "index": { "_index": index, "_id": id.to_string() } });
        body.push_str(&action.to_string());
        body.push('\n');
        body.push_str(&Value::Object(source.clone()).to_string());
        body.push('\n');
    }
    body
}

/// Full-text index accepting bulk index requests
#[async_trait]
pub trait SearchIndex: Send + Sync {
    async fn bulk_index(
        &self,
        index: &str,
        documents: Vec<(RecordId, Map<String, Value>)>,
    ) -> Result<(), SinkError>;
}

/// Elasticsearch over HTTP
#[derive(Debug, Clone)]
pub struct ElasticsearchIndex {
    client: Client,
    base_url: String,
}

impl ElasticsearchIndex {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, SinkError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("citydex/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl SearchIndex for ElasticsearchIndex {
    async fn bulk_index(
        &self,
        index: &str,
        documents: Vec<(RecordId, Map<String, Value>)>,
    ) -> Result<(), SinkError> {
        if documents.is_empty() {
            return Ok(());
        }

        let url = format!("{}/{}/_bulk", self.base_url, index);
        let response = self
            .client
            .post(&url)
            .header(CONTENT_TYPE, "application/x-ndjson")
            .body(render_bulk_body(index, &documents))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(SinkError::Rejected(format!("{status}: {text}")));
        }

        // A 200 may still carry per-item failures.
        let result: Value = response.json().await?;
        if result.get("errors").and_then(Value::as_bool).unwrap_or(false) {
            return Err(SinkError::Rejected(first_item_error(&result)));
        }

        Ok(())
    }
}

fn first_item_error(result: &Value) -> String {
    result
        .get("items")
        .and_then(Value::as_array)
        .and_then(|items| {
            items.iter().find_map(|item| {
                item.as_object()?
                    .values()
                    .find_map(|op| op.get("error"))
                    .map(|error| error.to_string())
            })
        })
        .unwrap_or_else(|| "bulk response reported errors".to_string())
}

/// Chunked bulk indexing of the search projection
pub struct SearchSink {
    index_client: Arc<dyn SearchIndex>,
    index: String,
    writer: ChunkedBatchWriter,
}

impl SearchSink {
    pub fn new(index_client: Arc<dyn SearchIndex>, index: impl Into<String>, chunk_size: usize) -> Self {
        Self {
            index_client,
            index: index.into(),
            writer: ChunkedBatchWriter::new(SINK_NAME, chunk_size),
        }
    }
}

#[async_trait]
impl BulkWrite for SearchSink {
    async fn write_chunk(&self, chunk: &[NormalizedRecord]) -> Result<(), SinkError> {
        let documents = chunk
            .iter()
            .map(|record| (record.id(), project(record)))
            .collect();
        self.index_client.bulk_index(&self.index, documents).await
    }
}

#[async_trait]
impl RecordSink for SearchSink {
    fn name(&self) -> &'static str {
        SINK_NAME
    }

    async fn write_all(&self, records: Arc<[NormalizedRecord]>, cancel: CancellationToken) -> SinkReport {
        self.writer.write_all(&records, self, &cancel).await
    }
}
