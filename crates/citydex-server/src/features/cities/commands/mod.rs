pub mod ingest;

pub use ingest::{IngestCitiesCommand, IngestCitiesError, IngestCitiesResponse};
