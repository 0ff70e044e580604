//! Failure notification with hourly throttling.
//!
//! Every output failure is counted as a metric. Only the first failure of an
//! episode reaches a human: one exception report and one email. An episode
//! ends when a write succeeds, or restarts once it is older than an hour.

pub mod mail;
pub mod sentry;

pub use mail::{render_email, SendmailMailer};
pub use sentry::{SentryDsn, SentryReporter};

use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::stats::{Metrics, METRIC_ERRORS};

/// Action name for a failed open or reopen of the target.
pub const ACTION_REOPEN_FILE: &str = "reopen_file";

/// Action name for a failed write to the target.
pub const ACTION_WRITE_TO_LOG: &str = "write_to_log";

/// Length of one notification episode.
pub const EPISODE_WINDOW: Duration = Duration::from_secs(60 * 60);

/// Errors from notification sinks.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    /// The exception-tracker DSN could not be parsed.
    #[error("invalid DSN {dsn:?}: {reason}")]
    InvalidDsn {
        /// The rejected DSN.
        dsn: String,
        /// Why it was rejected.
        reason: String,
    },

    /// HTTP client setup or delivery failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Spawning or feeding a local process failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The mail command exited unsuccessfully.
    #[error("sendmail exited with {0}")]
    Sendmail(std::process::ExitStatus),
}

/// Context attached to every human-facing failure report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureReport {
    /// Host the daemon runs on.
    pub hostname: String,
    /// What the daemon was trying to do.
    pub action: String,
    /// Configured program name.
    pub name: String,
    /// Destination path.
    pub target: String,
    /// Rendered error.
    pub error: String,
    /// Daemon version.
    pub version: String,
}

/// Receives exception reports.
pub trait ExceptionSink: Send + Sync {
    /// Submit `report`. Fire-and-forget.
    fn capture(&self, report: &FailureReport);
}

/// Sends failure emails.
pub trait Mailer: Send + Sync {
    /// Send an email about `report`. Fire-and-forget.
    fn send(&self, report: &FailureReport);
}

/// Tracks the current failure episode.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BreakageState {
    /// Whether output is currently failing.
    pub broken: bool,
    /// When the current episode began.
    pub episode_start: Option<Instant>,
    /// Failures recorded in the current episode.
    pub failures: u64,
}

impl BreakageState {
    /// Record one failure at `now`. Returns `true` if it opens a new episode
    /// and should therefore be reported to a human.
    pub fn record_failure(&mut self, now: Instant) -> bool {
        let expired = self
            .episode_start
            .is_some_and(|start| now.saturating_duration_since(start) > EPISODE_WINDOW);

        if !self.broken || expired {
            self.broken = true;
            self.episode_start = Some(now);
            self.failures = 0;
        }

        let first = self.failures == 0;
        self.failures = self.failures.saturating_add(1);
        first
    }

    /// Record a successful write.
    pub fn record_success(&mut self) {
        self.broken = false;
    }
}

/// Identity of the daemon, used to fill in [`FailureReport`]s.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportContext {
    /// Host the daemon runs on.
    pub hostname: String,
    /// Configured program name.
    pub name: String,
    /// Destination path.
    pub target: String,
    /// Daemon version.
    pub version: String,
}

impl ReportContext {
    /// Context for `name` writing to `target`, with the local hostname.
    pub fn local(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            hostname: local_hostname(),
            name: name.into(),
            target: target.into(),
            version: crate::VERSION.to_owned(),
        }
    }
}

/// Throttles and dispatches output failures.
pub struct FailureNotifier {
    state: BreakageState,
    context: ReportContext,
    metrics: Metrics,
    exceptions: Option<Box<dyn ExceptionSink>>,
    mailer: Option<Box<dyn Mailer>>,
}

impl FailureNotifier {
    /// Notifier that only emits metrics until sinks are attached.
    pub fn new(context: ReportContext, metrics: Metrics) -> Self {
        Self {
            state: BreakageState::default(),
            context,
            metrics,
            exceptions: None,
            mailer: None,
        }
    }

    /// Attach an exception sink.
    #[must_use]
    pub fn with_exceptions(mut self, sink: Box<dyn ExceptionSink>) -> Self {
        self.exceptions = Some(sink);
        self
    }

    /// Attach a mail sink.
    #[must_use]
    pub fn with_mailer(mut self, mailer: Box<dyn Mailer>) -> Self {
        self.mailer = Some(mailer);
        self
    }

    /// Report a failure of `action` now.
    pub fn report(&mut self, action: &str, error: &dyn std::error::Error) {
        self.report_at(action, error, Instant::now());
    }

    /// Report a failure of `action` observed at `now`.
    pub fn report_at(&mut self, action: &str, error: &dyn std::error::Error, now: Instant) {
        let first = self.state.record_failure(now);
        debug!(action, error = %error, first, "output failure");

        let tag = format!("err_action:{action}");
        if let Err(e) = self.metrics.count(METRIC_ERRORS, 1, &[tag], 1.0) {
            debug!(error = %e, "failed to emit error metric");
        }

        if !first {
            return;
        }

        warn!(action, path = %self.context.target, error = %error, "log output is failing");
        let report = FailureReport {
            hostname: self.context.hostname.clone(),
            action: action.to_owned(),
            name: self.context.name.clone(),
            target: self.context.target.clone(),
            error: error.to_string(),
            version: self.context.version.clone(),
        };
        if let Some(sink) = &self.exceptions {
            sink.capture(&report);
        }
        if let Some(mailer) = &self.mailer {
            mailer.send(&report);
        }
    }

    /// Record a successful write, closing the current episode.
    pub fn record_success(&mut self) {
        self.state.record_success();
    }

    /// Current episode state.
    pub fn state(&self) -> &BreakageState {
        &self.state
    }
}

impl std::fmt::Debug for FailureNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FailureNotifier")
            .field("state", &self.state)
            .field("context", &self.context)
            .field("exceptions", &self.exceptions.is_some())
            .field("mailer", &self.mailer.is_some())
            .finish_non_exhaustive()
    }
}

/// Local hostname, or an empty string if it cannot be determined.
pub fn local_hostname() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_default()
}
