//! City records feature
//!
//! Accepts a multipart upload holding a JSON array of city records and
//! starts an ingestion job for it.

pub mod commands;
pub mod routes;

#[cfg(test)]
mod routes_test;

pub use routes::cities_routes;
