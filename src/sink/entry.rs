//! Log entry model and its wire encoding.
//!
//! One [`LogEntry`] is built per completed request. The JSON encoding is
//! consumed by existing log readers, so field names, field order and the
//! number format of `duration_ms` are fixed.

use std::fmt::Write as _;
use std::time::Duration;

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};

/// Default timestamp layout: millisecond RFC 3339 in UTC.
pub const DEFAULT_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

/// Free-form fields attached to an entry. Keys serialize in sorted order.
pub type CustomFields = Map<String, Value>;

/// Observable facts about one completed request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub method: String,
    pub path: String,
    pub client_ip: String,
    #[serde(default)]
    pub user_agent: String,
    pub status_code: u16,
    #[serde(rename = "duration_ms", serialize_with = "serialize_millis")]
    pub duration_ms: f64,
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub custom_fields: CustomFields,
}

impl LogEntry {
    pub fn new(
        method: impl Into<String>,
        path: impl Into<String>,
        client_ip: impl Into<String>,
        user_agent: impl Into<String>,
        status_code: u16,
        elapsed: Duration,
        timestamp: impl Into<String>,
    ) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            client_ip: client_ip.into(),
            user_agent: user_agent.into(),
            status_code,
            duration_ms: elapsed.as_nanos() as f64 / 1_000_000.0,
            timestamp: timestamp.into(),
            custom_fields: CustomFields::new(),
        }
    }

    /// Set a custom field, replacing any previous value under `key`.
    pub fn set_field(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.custom_fields.insert(key.into(), value.into());
    }

    /// Copy every field of `fields` into this entry.
    pub fn merge_fields(&mut self, fields: &CustomFields) {
        for (k, v) in fields {
            self.custom_fields.insert(k.clone(), v.clone());
        }
    }

    /// Encode as one newline-terminated JSON record.
    pub fn to_json_line(&self) -> Result<Vec<u8>, serde_json::Error> {
        let mut buf = serde_json::to_vec(self)?;
        buf.push(b'\n');
        Ok(buf)
    }
}

/// Whole milliseconds are written as integers (`12`, never `12.0`) so records
/// stay byte-compatible with the existing log format.
fn serialize_millis<S: Serializer>(ms: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    if ms.is_finite() && ms.fract() == 0.0 && ms.abs() < 1e15 {
        serializer.serialize_i64(*ms as i64)
    } else {
        serializer.serialize_f64(*ms)
    }
}

/// Returns true if `format` is a strftime layout chrono can render.
pub fn is_valid_time_format(format: &str) -> bool {
    !format.is_empty() && !StrftimeItems::new(format).any(|item| matches!(item, Item::Error))
}

/// Render `at` with `format`, falling back to [`DEFAULT_TIME_FORMAT`] when the
/// layout cannot be rendered.
pub fn format_timestamp(at: DateTime<Utc>, format: &str) -> String {
    let mut out = String::with_capacity(32);
    if is_valid_time_format(format) && write!(out, "{}", at.format(format)).is_ok() {
        return out;
    }
    out.clear();
    // DEFAULT_TIME_FORMAT only uses supported specifiers.
    let _ = write!(out, "{}", at.format(DEFAULT_TIME_FORMAT));
    out
}

/// Default file name for a file sink: `access-YYYY-MM-DD.log` (UTC date).
pub fn default_log_filename() -> String {
    format!("access-{}.log", Utc::now().format("%Y-%m-%d"))
}
