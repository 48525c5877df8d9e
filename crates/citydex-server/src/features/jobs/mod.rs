//! Jobs feature module
//!
//! Status of ingestion jobs, the list of jobs running in this process, and
//! cancellation of a running job.

pub mod commands;
pub mod queries;
pub mod routes;


pub use routes::jobs_routes;
