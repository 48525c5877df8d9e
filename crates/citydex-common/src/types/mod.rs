//! Record types shared by the ingestion pipeline and its sinks
//!
//! A [`RawRecord`] is one element of an uploaded JSON array, keys exactly as
//! the uploader wrote them. A [`NormalizedRecord`] is the canonical form every
//! sink reads: lowercase snake keys, no falsy values, and an assigned id.

use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

use crate::error::{CitydexError, Result};

/// Globally unique, time ordered record identifier
pub type RecordId = u64;

/// Field name reserved for the assigned identifier
pub const ID_FIELD: &str = "id";

/// One uploaded record, in upload key order
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord(Map<String, Value>);

impl RawRecord {
    /// Wrap a parsed JSON value; anything but an object is rejected
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(CitydexError::NotAnObject(json_kind(&other).to_string())),
        }
    }

    pub fn fields(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Map<String, Value>> for RawRecord {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// A canonical record with its assigned id. Immutable once built; sinks that
/// need a different shape copy it.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRecord {
    id: RecordId,
    fields: Map<String, Value>,
}

impl NormalizedRecord {
    /// `fields` must already be canonical and must not carry `id`.
    pub fn new(id: RecordId, fields: Map<String, Value>) -> Result<Self> {
        if fields.contains_key(ID_FIELD) {
            return Err(CitydexError::ReservedField(ID_FIELD.to_string()));
        }
        Ok(Self { id, fields })
    }

    pub fn id(&self) -> RecordId {
        self.id
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Copy of the fields with the id stored under `key`
    pub fn to_document(&self, key: &str) -> Map<String, Value> {
        let mut doc = self.fields.clone();
        doc.insert(key.to_string(), Value::from(self.id));
        doc
    }
}

/// Serializes as a flat object with `id` first.
impl Serialize for NormalizedRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;

        let mut map = serializer.serialize_map(Some(self.fields.len() + 1))?;
        map.serialize_entry(ID_FIELD, &self.id)?;
        for (key, value) in &self.fields {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

/// Lowercase `key` and collapse each whitespace run into one `_`.
pub fn canonical_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    let mut in_space = false;

    for ch in key.chars() {
        if ch.is_whitespace() {
            if !in_space {
                out.push('_');
            }
            in_space = true;
        } else {
            out.extend(ch.to_lowercase());
            in_space = false;
        }
    }

    out
}

/// JavaScript-style truthiness: `null`, `false`, `0` and `""` are falsy.
/// Arrays and objects are truthy even when empty.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
