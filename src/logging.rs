//! Diagnostic logging via `tracing-subscriber` and `tracing-appender`.
//!
//! Diagnostics go to stderr through a non-blocking writer, so a slow
//! terminal never stalls the event loop. They never mix with the records
//! being shipped. The default filter is `warn`; `--debug` raises it to
//! `debug`, and `RUST_LOG` overrides both.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::{LogFormat, LoggingConfig};

/// Holds the non-blocking writer guard.
///
/// Keep it alive for the life of the process; dropping it flushes pending
/// diagnostics.
pub struct LoggingGuard {
    _guard: WorkerGuard,
}

/// Default filter directive for the given debug flag.
pub fn default_directive(debug: bool) -> &'static str {
    if debug {
        "debug"
    } else {
        "warn"
    }
}

/// Install the global subscriber.
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed.
pub fn init(config: &LoggingConfig) -> anyhow::Result<LoggingGuard> {
    let (non_blocking, guard) = tracing_appender::non_blocking(std::io::stderr());

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(config.debug)));

    let registry = tracing_subscriber::registry().with(env_filter);
    match config.format {
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(non_blocking),
            )
            .try_init(),
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().with_writer(non_blocking))
            .try_init(),
    }
    .map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))?;

    Ok(LoggingGuard { _guard: guard })
}
