//! Record filters.
//!
//! A filter transforms a record before it is written. Records come in two
//! shapes with different field semantics (opaque text vs. a decoded mapping),
//! so every filter implements one method per shape. Filters run in the order
//! they are configured.
//!
//! Text records are raw bytes. They are never re-encoded, so bytes that are
//! not valid UTF-8 reach the output unchanged.

pub mod austerity;
pub mod timeprefix;

pub use austerity::{decide, sampling_rate, Decision, SheddingFilter, SHED_SENTINEL};
pub use timeprefix::{check_format, TimeFormatError, TimePrefixFilter, DEFAULT_TIME_FORMAT};

use crate::json::LogLine;

/// Transformation applied to each record before it is written.
pub trait Filter: Send + Sync {
    /// Transform a text record.
    fn filter_line(&self, line: Vec<u8>) -> Vec<u8>;

    /// Transform a structured record in place.
    fn filter_json(&self, line: &mut LogLine);
}

/// A text-only filter backed by a closure over `String`. Structured records,
/// and text records that are not valid UTF-8, pass unchanged.
pub struct FnFilter<F> {
    f: F,
}

impl<F> FnFilter<F>
where
    F: Fn(String) -> String + Send + Sync,
{
    /// Wrap `f`.
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> Filter for FnFilter<F>
where
    F: Fn(String) -> String + Send + Sync,
{
    fn filter_line(&self, line: Vec<u8>) -> Vec<u8> {
        match String::from_utf8(line) {
            Ok(text) => (self.f)(text).into_bytes(),
            Err(e) => e.into_bytes(),
        }
    }

    fn filter_json(&self, _line: &mut LogLine) {}
}

/// Run `line` through `filters` in order.
pub fn apply_line(filters: &[Box<dyn Filter>], line: Vec<u8>) -> Vec<u8> {
    filters
        .iter()
        .fold(line, |line, filter| filter.filter_line(line))
}

/// Run `line` through `filters` in order.
pub fn apply_json(filters: &[Box<dyn Filter>], line: &mut LogLine) {
    for filter in filters {
        filter.filter_json(line);
    }
}
