//! Timestamp prefix for text records.

use chrono::format::{Item, StrftimeItems};
use chrono::Local;

use super::Filter;
use crate::json::LogLine;

/// Default prefix format, microsecond precision in local time.
pub const DEFAULT_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// A strftime string chrono cannot render.
#[derive(Debug, thiserror::Error)]
#[error("invalid time format {0:?}")]
pub struct TimeFormatError(pub String);

/// Check that `format` only uses specifiers chrono understands.
///
/// # Errors
///
/// Returns [`TimeFormatError`] for an unknown or malformed specifier.
pub fn check_format(format: &str) -> Result<(), TimeFormatError> {
    if StrftimeItems::new(format).any(|item| matches!(item, Item::Error)) {
        return Err(TimeFormatError(format.to_owned()));
    }
    Ok(())
}

/// Prepends `[<now>] ` to text records. Structured records carry their own
/// timestamp and pass unchanged.
#[derive(Debug, Clone)]
pub struct TimePrefixFilter {
    omit: bool,
    format: String,
}

impl TimePrefixFilter {
    /// Prefix with `format` (a chrono strftime string).
    ///
    /// # Errors
    ///
    /// Returns [`TimeFormatError`] if `format` cannot be rendered.
    pub fn new(format: impl Into<String>) -> Result<Self, TimeFormatError> {
        let format = format.into();
        check_format(&format)?;
        Ok(Self {
            omit: false,
            format,
        })
    }

    /// A filter that leaves lines untouched.
    pub fn omitted() -> Self {
        Self {
            omit: true,
            format: DEFAULT_TIME_FORMAT.to_owned(),
        }
    }
}

impl Default for TimePrefixFilter {
    fn default() -> Self {
        Self {
            omit: false,
            format: DEFAULT_TIME_FORMAT.to_owned(),
        }
    }
}

impl Filter for TimePrefixFilter {
    fn filter_line(&self, line: Vec<u8>) -> Vec<u8> {
        if self.omit {
            return line;
        }
        let mut out = format!("[{}] ", Local::now().format(&self.format)).into_bytes();
        out.extend_from_slice(&line);
        out
    }

    fn filter_json(&self, _line: &mut LogLine) {}
}
