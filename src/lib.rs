//! Unilog: ships log records from stdin into a file.
//!
//! Records are read line by line on a background task, classified by
//! criticality, probabilistically shed when the host is under austerity,
//! and appended to the destination. The destination can be reopened on
//! signal for log rotation, and shutdown drains the input on a record
//! boundary so no record is ever truncated.
//!
//! See `DESIGN.md` for the architecture.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod austerity;
pub mod clevels;
pub mod config;
pub mod daemon;
pub mod filters;
pub mod json;
pub mod logging;
pub mod notify;
pub mod pipeline;
pub mod reader;
pub mod signals;
pub mod stats;

/// Daemon version, reported in notifications and by `--version`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
