//! Configuration.
//!
//! Settings come from three layers: built-in defaults, an optional TOML file
//! (`--config`), and command-line flags, later layers winning. Every file
//! section uses `#[serde(default)]` so an empty file is valid.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use crate::austerity::DEFAULT_CACHE_INTERVAL;
use crate::filters::{check_format, DEFAULT_TIME_FORMAT};
use crate::pipeline::DEFAULT_BUFFER_LINES;
use crate::stats::DEFAULT_STATSD_ADDRESS;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UnilogConfig {
    /// Record handling.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Load shedding.
    #[serde(default)]
    pub austerity: AusterityConfig,

    /// Metrics.
    #[serde(default)]
    pub stats: StatsConfig,

    /// Failure notifications.
    #[serde(default)]
    pub alerts: AlertsConfig,

    /// Diagnostic output of the daemon itself.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Record handling settings.
#[derive(Debug, Clone, Deserialize)]
pub struct GeneralConfig {
    /// Name of the logged program, used in notifications.
    #[serde(default)]
    pub name: String,

    /// Records buffered between the reader and the writer.
    #[serde(default = "default_buffer_lines")]
    pub buffer_lines: usize,

    /// Parse records as JSON objects.
    #[serde(default)]
    pub json: bool,

    /// Echo written records to standard output.
    #[serde(default)]
    pub verbose: bool,

    /// Do not prefix text records with a timestamp.
    #[serde(default)]
    pub omit_timestamps: bool,

    /// strftime format of the timestamp prefix.
    #[serde(default = "default_time_format")]
    pub time_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            buffer_lines: default_buffer_lines(),
            json: false,
            verbose: false,
            omit_timestamps: false,
            time_format: default_time_format(),
        }
    }
}

/// Load shedding settings.
#[derive(Debug, Clone, Deserialize)]
pub struct AusterityConfig {
    /// File holding the system austerity level. Unset means never shed.
    #[serde(default)]
    pub file: Option<PathBuf>,

    /// Seconds between reloads of the austerity file.
    #[serde(default = "default_cache_interval_secs")]
    pub cache_interval_secs: u64,
}

impl AusterityConfig {
    /// Reload interval.
    pub fn cache_interval(&self) -> Duration {
        Duration::from_secs(self.cache_interval_secs)
    }
}

impl Default for AusterityConfig {
    fn default() -> Self {
        Self {
            file: None,
            cache_interval_secs: default_cache_interval_secs(),
        }
    }
}

/// Metrics settings.
#[derive(Debug, Clone, Deserialize)]
pub struct StatsConfig {
    /// DogStatsD address.
    #[serde(default = "default_statsd_address")]
    pub address: String,

    /// Tags on all daemon metrics except the austerity ones.
    #[serde(default)]
    pub tags: Vec<String>,

    /// Tags on the austerity metrics.
    #[serde(default)]
    pub clevel_tags: Vec<String>,

    /// `name:value` tags that each get their own derived counter.
    #[serde(default)]
    pub independent_tags: Vec<String>,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            address: default_statsd_address(),
            tags: Vec::new(),
            clevel_tags: Vec::new(),
            independent_tags: Vec::new(),
        }
    }
}

/// Failure notification settings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AlertsConfig {
    /// Sender of failure emails.
    #[serde(default)]
    pub mail_from: Option<String>,

    /// Recipient of failure emails.
    #[serde(default)]
    pub mail_to: Option<String>,

    /// Sentry DSN for exception reports.
    #[serde(default)]
    pub sentry_dsn: Option<String>,
}

impl AlertsConfig {
    /// Sender and recipient, if both are set and non-empty.
    pub fn mail(&self) -> Option<(&str, &str)> {
        let from = self.mail_from.as_deref().filter(|s| !s.is_empty())?;
        let to = self.mail_to.as_deref().filter(|s| !s.is_empty())?;
        Some((from, to))
    }

    /// The DSN, if set and non-empty.
    pub fn sentry_dsn(&self) -> Option<&str> {
        self.sentry_dsn.as_deref().filter(|s| !s.is_empty())
    }
}

/// Diagnostic output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per event.
    Json,
}

/// Diagnostic output settings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingConfig {
    /// Enable debug diagnostics.
    #[serde(default)]
    pub debug: bool,

    /// Output format.
    #[serde(default)]
    pub format: LogFormat,
}

/// Values given on the command line. `None` and `false` leave the file
/// setting alone.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    /// `--name`.
    pub name: Option<String>,
    /// `--verbose`.
    pub verbose: bool,
    /// `--debug`.
    pub debug: bool,
    /// `--json`.
    pub json: bool,
    /// `--omit-timestamps`.
    pub omit_timestamps: bool,
    /// `--buffer-lines`.
    pub buffer_lines: Option<usize>,
    /// `--mailfrom`.
    pub mail_from: Option<String>,
    /// `--mailto`.
    pub mail_to: Option<String>,
    /// `--sentrydsn`.
    pub sentry_dsn: Option<String>,
    /// `--statsdaddress`.
    pub statsd_address: Option<String>,
    /// `--austerityfile`.
    pub austerity_file: Option<PathBuf>,
    /// `--statstags`, comma separated.
    pub stats_tags: Option<String>,
    /// `--cleveltags`, comma separated.
    pub clevel_tags: Option<String>,
    /// `--independenttags`, comma separated.
    pub independent_tags: Option<String>,
}

impl UnilogConfig {
    /// Layer `overrides` on top of this configuration.
    pub fn apply(&mut self, overrides: Overrides) {
        let general = &mut self.general;
        if let Some(name) = overrides.name {
            general.name = name;
        }
        general.verbose |= overrides.verbose;
        general.json |= overrides.json;
        general.omit_timestamps |= overrides.omit_timestamps;
        if let Some(lines) = overrides.buffer_lines {
            general.buffer_lines = lines;
        }

        self.logging.debug |= overrides.debug;

        if overrides.mail_from.is_some() {
            self.alerts.mail_from = overrides.mail_from;
        }
        if overrides.mail_to.is_some() {
            self.alerts.mail_to = overrides.mail_to;
        }
        if overrides.sentry_dsn.is_some() {
            self.alerts.sentry_dsn = overrides.sentry_dsn;
        }

        if let Some(address) = overrides.statsd_address {
            self.stats.address = address;
        }
        if let Some(tags) = overrides.stats_tags {
            self.stats.tags = crate::stats::split_tags(&tags);
        }
        if let Some(tags) = overrides.clevel_tags {
            self.stats.clevel_tags = crate::stats::split_tags(&tags);
        }
        if let Some(tags) = overrides.independent_tags {
            self.stats.independent_tags = crate::stats::split_tags(&tags);
        }

        if overrides.austerity_file.is_some() {
            self.austerity.file = overrides.austerity_file;
        }
    }

    /// Check that values are usable.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first invalid setting.
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.general.buffer_lines > 0,
            "general.buffer_lines must be > 0"
        );
        anyhow::ensure!(
            self.austerity.cache_interval_secs > 0,
            "austerity.cache_interval_secs must be > 0"
        );
        anyhow::ensure!(
            !self.stats.address.is_empty(),
            "stats.address must not be empty"
        );
        if !self.general.omit_timestamps {
            check_format(&self.general.time_format).context("general.time_format")?;
        }
        Ok(())
    }
}

fn default_buffer_lines() -> usize {
    DEFAULT_BUFFER_LINES
}
fn default_time_format() -> String {
    DEFAULT_TIME_FORMAT.to_owned()
}
fn default_cache_interval_secs() -> u64 {
    DEFAULT_CACHE_INTERVAL.as_secs()
}
fn default_statsd_address() -> String {
    DEFAULT_STATSD_ADDRESS.to_owned()
}

/// Load configuration from a TOML file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed.
pub fn load_config(path: &Path) -> anyhow::Result<UnilogConfig> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config at {}", path.display()))?;
    let config: UnilogConfig = toml::from_str(&contents)
        .with_context(|| format!("failed to parse config at {}", path.display()))?;
    Ok(config)
}
