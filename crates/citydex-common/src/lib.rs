//! Citydex Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, logging, and error handling for the Citydex workspace.
//!
//! # Overview
//!
//! - **Error Handling**: [`CitydexError`] and the crate [`Result`] alias
//! - **Logging**: `tracing` subscriber setup driven by `LOG_*` variables
//! - **Types**: raw and normalized city records and the key/value rules
//!   shared by every sink
//!
//! # Example
//!
//! ```no_run
//! use citydex_common::types::{canonical_key, is_truthy};
//! use serde_json::json;
//!
//! assert_eq!(canonical_key("Nom Dept"), "nom_dept");
//! assert!(!is_truthy(&json!("")));
//! ```

pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{CitydexError, Result};
pub use types::{NormalizedRecord, RawRecord, RecordId};
