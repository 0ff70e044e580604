//! Structured (JSON) log records.
//!
//! A JSON record is one object per `\n`-terminated line. Three fields are
//! special, all optional:
//!
//! - `timestamp` / `ts`: event time, either an epoch number (fractional
//!   seconds allowed) or an RFC 3339 / RFC 1123Z string.
//! - `canonical`: marks the record as the most important kind a service
//!   emits.
//! - `clevel`: explicit criticality level.
//!
//! Re-encoding always writes `"timestamp"` first, as a float epoch with
//! nanosecond digits, so downstream ingestion can order events cheaply.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

/// Canonical output name of the timestamp field.
pub const TIMESTAMP_FIELD: &str = "timestamp";

/// Fields consulted for the event time, in order.
pub const TIMESTAMP_FIELDS: [&str; 2] = [TIMESTAMP_FIELD, "ts"];

/// Field set on records replaced by the shedding filter.
pub const SHED_FIELD: &str = "shedded";

/// A decoded JSON log record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LogLine(Map<String, Value>);

impl LogLine {
    /// Create an empty record.
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Decode one line. Anything but a JSON object is an error.
    ///
    /// # Errors
    ///
    /// Returns the decoder error when `line` is not a JSON object.
    pub fn parse(line: impl AsRef<[u8]>) -> Result<Self, serde_json::Error> {
        serde_json::from_slice::<Map<String, Value>>(line.as_ref()).map(Self)
    }

    /// Look up a field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Set a field, returning the previous value.
    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(key.into(), value)
    }

    /// Whether `key` is present.
    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the record has no fields.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Replace the record with its shed form: only the timestamp field(s)
    /// survive, plus `"shedded": true`.
    pub fn shed(&mut self) {
        let mut kept = Map::new();
        for field in TIMESTAMP_FIELDS {
            if let Some(ts) = self.0.remove(field) {
                kept.insert(field.to_owned(), ts);
            }
        }
        kept.insert(SHED_FIELD.to_owned(), Value::Bool(true));
        self.0 = kept;
    }

    /// Interpret the event time.
    ///
    /// Numbers are epoch seconds; strings are tried as RFC 3339 and then
    /// RFC 1123Z. A missing or unparseable timestamp yields the current time.
    pub fn timestamp(&self) -> DateTime<Utc> {
        TIMESTAMP_FIELDS
            .iter()
            .filter_map(|field| self.0.get(*field))
            .find_map(parse_timestamp)
            .unwrap_or_else(Utc::now)
    }

    /// Encode the record, timestamp first, without a trailing newline.
    pub fn encode(&self) -> String {
        let ts = self.timestamp();
        let mut out = String::with_capacity(self.0.len().saturating_mul(16).saturating_add(32));
        out.push_str("{\"");
        out.push_str(TIMESTAMP_FIELD);
        out.push_str("\":");
        out.push_str(&format_epoch(&ts));

        for (key, value) in &self.0 {
            if key == TIMESTAMP_FIELD {
                continue;
            }
            out.push(',');
            out.push_str(&Value::String(key.clone()).to_string());
            out.push(':');
            out.push_str(&value.to_string());
        }
        out.push('}');
        out
    }
}

impl From<Map<String, Value>> for LogLine {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Format an instant as `SECONDS.NNNNNNNNN`.
fn format_epoch(ts: &DateTime<Utc>) -> String {
    let secs = ts.timestamp();
    let nanos = ts.timestamp_subsec_nanos();
    if secs >= 0 || nanos == 0 {
        return format!("{secs}.{nanos:09}");
    }
    // chrono counts the fraction up from the earlier whole second.
    let whole = secs.saturating_add(1).unsigned_abs();
    let frac = 1_000_000_000_u32.saturating_sub(nanos);
    format!("-{whole}.{frac:09}")
}

fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .or_else(|_| DateTime::parse_from_rfc2822(s))
            .ok()
            .map(|ts| ts.with_timezone(&Utc)),
        Value::Number(n) => n.as_f64().and_then(epoch_to_datetime),
        _ => None,
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn epoch_to_datetime(epoch: f64) -> Option<DateTime<Utc>> {
    if !epoch.is_finite() {
        return None;
    }
    let secs = epoch.floor();
    let nanos = ((epoch - secs) * 1e9).round().clamp(0.0, 999_999_999.0);
    DateTime::from_timestamp(secs as i64, nanos as u32)
}
