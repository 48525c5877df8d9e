//! Feature modules implementing the citydex API
//!
//! Each feature is a vertical slice with its own commands, queries and
//! routes:
//!
//! - **cities**: upload of city record files for ingestion
//! - **jobs**: status, listing and cancellation of ingestion jobs

pub mod cities;
pub mod jobs;

#[cfg(test)]
pub(crate) mod test_support;

use axum::Router;
use std::sync::Arc;

use crate::ingest::IngestionJobCoordinator;

/// Shared state for all feature routes
#[derive(Clone)]
pub struct FeatureState {
    pub coordinator: Arc<IngestionJobCoordinator>,
    /// Largest accepted multipart body
    pub max_upload_bytes: usize,
}

/// Creates the API router with all feature routes mounted
///
/// - `/cities` - Record upload
/// - `/jobs` - Job status and cancellation
pub fn router(state: FeatureState) -> Router<()> {
    Router::new()
        .nest(
            "/cities",
            cities::cities_routes(state.max_upload_bytes).with_state(Arc::clone(&state.coordinator)),
        )
        .nest("/jobs", jobs::jobs_routes().with_state(state.coordinator))
}
