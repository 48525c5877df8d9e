//! Upload parsing and record normalization
//!
//! The upload is buffered by the request handler and parsed exactly once
//! here into an immutable list of raw records. Normalization is pure.

use citydex_common::types::{canonical_key, is_truthy, RawRecord, ID_FIELD};
use serde_json::{Map, Value};

use super::error::IngestError;

/// Canonical fields of one record, before an id is attached
pub type NormalizedFields = Map<String, Value>;

/// Parse an uploaded payload: a JSON array of flat objects.
pub fn parse_upload(payload: &[u8]) -> Result<Vec<RawRecord>, IngestError> {
    let value: Value = serde_json::from_slice(payload)
        .map_err(|e| IngestError::malformed(None, format!("invalid JSON: {e}")))?;

    let Value::Array(items) = value else {
        return Err(IngestError::malformed(None, "upload must be a JSON array of records"));
    };

    items
        .into_iter()
        .enumerate()
        .map(|(index, item)| {
            RawRecord::from_value(item).map_err(|e| IngestError::malformed(Some(index), e.to_string()))
        })
        .collect()
}

/// Turns raw upload records into canonical field maps
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordNormalizer;

impl RecordNormalizer {
    /// Keep truthy values under canonical keys. On key collision the last
    /// value seen wins. A key that canonicalizes to `id` is dropped because
    /// the id is assigned by the pipeline.
    pub fn normalize(&self, raw: &RawRecord) -> NormalizedFields {
        let mut fields = Map::with_capacity(raw.len());

        for (key, value) in raw.fields() {
            if !is_truthy(value) {
                continue;
            }

            let key = canonical_key(key);
            if key == ID_FIELD {
                tracing::debug!("Dropping uploaded id field");
                continue;
            }

            fields.insert(key, value.clone());
        }

        fields
    }

    pub fn normalize_all(&self, raw: &[RawRecord]) -> Vec<NormalizedFields> {
        raw.iter().map(|record| self.normalize(record)).collect()
    }
}
