//! # External Records
//!
//! Accessors over the JSON objects returned by the remote API.
//!
//! Remote payloads are loosely typed: ids arrive as numbers or strings,
//! levels as `"0"` or `0`, dates as `2019-01-01 10:00:00` (1.7) or with a `T`
//! separator. The helpers here absorb those differences so mappers read one
//! shape.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{CoreError, CoreResult};
use crate::types::ExternalId;

/// Field values of a local record or a mapped payload.
pub type FieldMap = Map<String, Value>;

/// Date format used by the remote API for `updated_at` filters.
pub const REMOTE_DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One record fetched from the remote API, consumed by a single import.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExternalRecord(FieldMap);

impl ExternalRecord {
    pub fn new(fields: FieldMap) -> Self {
        ExternalRecord(fields)
    }

    /// Builds a record from a JSON value, which must be an object.
    pub fn from_value(value: Value) -> CoreResult<Self> {
        match value {
            Value::Object(map) => Ok(ExternalRecord(map)),
            other => Err(CoreError::invalid(
                "record",
                format!("expected an object, got {}", other),
            )),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Returns a value rendered as text; numbers and booleans are stringified.
    pub fn get_str(&self, key: &str) -> Option<String> {
        match self.0.get(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    /// Returns a non-empty text value.
    pub fn get_non_empty(&self, key: &str) -> Option<String> {
        self.get_str(key).filter(|s| !s.trim().is_empty())
    }

    pub fn get_id(&self, key: &str) -> Option<ExternalId> {
        self.0.get(key).and_then(ExternalId::from_value)
    }

    /// Returns a numeric value; numeric strings are parsed.
    pub fn get_f64(&self, key: &str) -> Option<f64> {
        match self.0.get(key)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn get_array(&self, key: &str) -> &[Value] {
        self.0
            .get(key)
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Parses a remote timestamp, assumed UTC.
    pub fn get_datetime(&self, key: &str) -> Option<DateTime<Utc>> {
        let raw = self.get_non_empty(key)?;
        parse_remote_datetime(&raw)
    }

    /// Inserts or replaces a value.
    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.0.insert(key.into(), value);
    }

    pub fn fields(&self) -> &FieldMap {
        &self.0
    }

    pub fn into_fields(self) -> FieldMap {
        self.0
    }
}

/// Parses `2019-01-01 10:00:00`, `2019-01-01T10:00:00` or RFC 3339.
pub fn parse_remote_datetime(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, REMOTE_DATETIME_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S"))
        .ok()
        .map(|naive| naive.and_utc())
}

/// Formats a timestamp the way the remote API expects in filters.
pub fn format_remote_datetime(dt: &DateTime<Utc>) -> String {
    dt.format(REMOTE_DATETIME_FORMAT).to_string()
}
