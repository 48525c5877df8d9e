//! Citydex Server Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! HTTP server that ingests uploaded city records into a document store, a
//! search index and, optionally, a wide-column store.
//!
//! # Overview
//!
//! - **API**: multipart upload, job status and cancellation under `/api/v1`
//! - **Ingestion**: normalization, snowflake ids, chunked fan-out to sinks
//! - **Job tracking**: active flags held by a guard, completion records, and
//!   a startup sweep for flags left by a crashed process
//! - **Configuration**: environment-based, see [`config::Config`]
//!
//! # Architecture
//!
//! Feature slices under [`features`] translate HTTP into commands and
//! queries against the [`ingest::IngestionJobCoordinator`]. The coordinator
//! owns every running job; routes only start, inspect or cancel them.
//!
//! # Example
//!
//! ```no_run
//! use citydex_server::config::Config;
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = Config::load()?;
//!     println!("binding {}:{}", config.server.host, config.server.port);
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod config;
pub mod error;
pub mod features;
pub mod ingest;
pub mod middleware;

// Re-export commonly used types
pub use error::AppError;
