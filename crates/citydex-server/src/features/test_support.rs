//! In-memory backends for route tests
#![allow(clippy::unwrap_used)]

use async_trait::async_trait;
use citydex_common::RecordId;
use serde_json::{Map, Value};
use std::sync::{Arc, Mutex};

use crate::ingest::sinks::{DocumentSink, DocumentStore, SearchIndex, SearchSink};
use crate::ingest::{
    CoordinatorSettings, DualSinkFanout, InMemoryJobLog, InMemoryJobStatusStore, IngestionJobCoordinator,
    SinkError, SnowflakeIdAssigner,
};

#[derive(Default)]
pub struct MemoryDocuments {
    pub calls: Mutex<Vec<Vec<Map<String, Value>>>>,
}

#[async_trait]
impl DocumentStore for MemoryDocuments {
    async fn insert_many(&self, documents: Vec<Map<String, Value>>) -> Result<(), SinkError> {
        self.calls.lock().unwrap().push(documents);
        Ok(())
    }
}

#[derive(Default)]
pub struct MemorySearch {
    pub calls: Mutex<Vec<Vec<(RecordId, Map<String, Value>)>>>,
}

#[async_trait]
impl SearchIndex for MemorySearch {
    async fn bulk_index(&self, _index: &str, documents: Vec<(RecordId, Map<String, Value>)>) -> Result<(), SinkError> {
        self.calls.lock().unwrap().push(documents);
        Ok(())
    }
}

pub struct TestBackends {
    pub coordinator: Arc<IngestionJobCoordinator>,
    pub documents: Arc<MemoryDocuments>,
    pub search: Arc<MemorySearch>,
}

pub fn backends() -> TestBackends {
    let documents = Arc::new(MemoryDocuments::default());
    let search = Arc::new(MemorySearch::default());
    let fanout = DualSinkFanout::new(
        Arc::new(DocumentSink::new(documents.clone(), 1000)),
        Arc::new(SearchSink::new(search.clone(), "cities", 1000)),
        None,
    );
    let coordinator = Arc::new(IngestionJobCoordinator::new(
        Arc::new(SnowflakeIdAssigner::new(1).unwrap()),
        Arc::new(InMemoryJobStatusStore::new()),
        Arc::new(InMemoryJobLog::new()),
        fanout,
        CoordinatorSettings::default(),
    ));

    TestBackends {
        coordinator,
        documents,
        search,
    }
}

/// Multipart body with a single part named `name`
pub fn multipart_body(boundary: &str, name: &str, content: &str) -> String {
    format!(
        "--{boundary}\r\n\
         Content-Disposition: form-data; name=\"{name}\"; filename=\"cities.json\"\r\n\
         Content-Type: application/json\r\n\
         \r\n\
         {content}\r\n\
         --{boundary}--\r\n"
    )
}
