//! Unilog CLI entry point.
//!
//! Reads records from stdin and appends them to the file named by the one
//! positional argument (`-` for stdout).

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};

use unilog::austerity::{AusterityFile, AusterityLevelService, LevelSource};
use unilog::config::{load_config, Overrides, UnilogConfig};
use unilog::daemon::{DaemonSettings, EventLoop, RecordInput};
use unilog::filters::{Filter, SheddingFilter, TimePrefixFilter};
use unilog::notify::{FailureNotifier, ReportContext, SendmailMailer, SentryReporter};
use unilog::pipeline::LinePipeline;
use unilog::reader::{shutdown_channel, ShutdownAwareReader};
use unilog::stats::{IndependentTags, Metrics, NoopStats, StatsClient, StatsdClient};
use unilog::{logging, signals, VERSION};

/// Unilog: append stdin to a log file, with rotation and load shedding.
#[derive(Parser)]
#[command(name = "unilog", about, disable_version_flag = true)]
struct Cli {
    /// Name of the logged program.
    #[arg(short = 'a', long)]
    name: Option<String>,

    /// Echo lines to stdout.
    #[arg(short, long)]
    verbose: bool,

    /// Print debug messages.
    #[arg(short, long)]
    debug: bool,

    /// Parse each line as a JSON object.
    #[arg(long)]
    json: bool,

    /// Do not prefix lines with a timestamp.
    #[arg(long)]
    omit_timestamps: bool,

    /// Lines buffered between reading and writing.
    #[arg(long)]
    buffer_lines: Option<usize>,

    /// Address to send error emails from.
    #[arg(long = "mailfrom")]
    mail_from: Option<String>,

    /// Address to send error emails to.
    #[arg(long = "mailto")]
    mail_to: Option<String>,

    /// Sentry DSN to send errors to.
    #[arg(long = "sentrydsn")]
    sentry_dsn: Option<String>,

    /// Address to send statsd metrics to.
    #[arg(long = "statsdaddress")]
    statsd_address: Option<String>,

    /// File to read the austerity level from.
    #[arg(long = "austerityfile")]
    austerity_file: Option<PathBuf>,

    /// Tags for all metrics except the austerity ones ("foo:bar,baz:quz").
    #[arg(short = 's', long = "statstags")]
    stats_tags: Option<String>,

    /// Tags to emit an independent metric for ("foo:bar" adds "<metric>.foo").
    #[arg(long = "independenttags")]
    independent_tags: Option<String>,

    /// Tags for the austerity metrics.
    #[arg(long = "cleveltags")]
    clevel_tags: Option<String>,

    /// TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print the version number and exit.
    #[arg(short = 'V', long)]
    version: bool,

    /// Destination file, or `-` for stdout.
    #[arg(value_name = "DSTFILE", required_unless_present = "version")]
    dstfile: Option<String>,
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            name: self.name.clone(),
            verbose: self.verbose,
            debug: self.debug,
            json: self.json,
            omit_timestamps: self.omit_timestamps,
            buffer_lines: self.buffer_lines,
            mail_from: self.mail_from.clone(),
            mail_to: self.mail_to.clone(),
            sentry_dsn: self.sentry_dsn.clone(),
            statsd_address: self.statsd_address.clone(),
            austerity_file: self.austerity_file.clone(),
            stats_tags: self.stats_tags.clone(),
            clevel_tags: self.clevel_tags.clone(),
            independent_tags: self.independent_tags.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.version {
        println!("This is unilog v{VERSION}");
        return Ok(());
    }
    let target = cli
        .dstfile
        .clone()
        .context("missing destination file")?;

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => UnilogConfig::default(),
    };
    config.apply(cli.overrides());
    config.validate().context("invalid configuration")?;

    let logging_guard = logging::init(&config.logging)?;

    let status = match run(target, config).await {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("unilog: {e:#}");
            1
        }
    };

    drop(logging_guard);
    // A blocking stdin read may still be parked on a runtime thread.
    std::process::exit(status);
}

async fn run(target: String, config: UnilogConfig) -> anyhow::Result<()> {
    let metrics = Metrics::new(
        connect_stats(&config.stats.address, config.stats.tags.clone()),
        IndependentTags::new(config.stats.independent_tags.clone()),
    );
    let clevel_stats = connect_stats(&config.stats.address, config.stats.clevel_tags.clone());

    let mut notifier = FailureNotifier::new(
        ReportContext::local(config.general.name.clone(), target.clone()),
        metrics.clone(),
    );
    if let Some(dsn) = config.alerts.sentry_dsn() {
        let reporter = SentryReporter::from_dsn(dsn).context("invalid Sentry DSN")?;
        notifier = notifier.with_exceptions(Box::new(reporter));
    }
    if let Some((from, to)) = config.alerts.mail() {
        notifier = notifier.with_mailer(Box::new(SendmailMailer::new(from, to)));
    }

    let source = config
        .austerity
        .file
        .clone()
        .map(|path| Arc::new(AusterityFile::new(path)) as Arc<dyn LevelSource>);
    let (service, levels) =
        AusterityLevelService::new(source, config.austerity.cache_interval(), clevel_stats);
    service.spawn();

    let time_prefix = if config.general.omit_timestamps {
        TimePrefixFilter::omitted()
    } else {
        TimePrefixFilter::new(config.general.time_format.clone())
            .context("invalid general.time_format")?
    };
    let filters: Vec<Box<dyn Filter>> =
        vec![Box::new(SheddingFilter::new(levels)), Box::new(time_prefix)];

    let signals = signals::install().context("failed to install signal handlers")?;

    let (trigger, signal) = shutdown_channel();
    let reader = ShutdownAwareReader::new(tokio::io::stdin(), signal);
    let pipeline = LinePipeline::spawn(reader, config.general.buffer_lines, metrics);

    let settings = DaemonSettings {
        target,
        verbose: config.general.verbose,
        json: config.general.json,
    };
    let input = RecordInput {
        records: pipeline.records,
        errors: pipeline.errors,
    };
    let mut event_loop =
        EventLoop::new(settings.clone(), input, signals, trigger, notifier).with_filters(filters);

    if let Err(e) = event_loop.open() {
        warn!(path = %settings.target, error = %e, "cannot open destination yet, will retry");
    }

    info!(
        path = %settings.target,
        json = settings.json,
        buffer_lines = config.general.buffer_lines,
        "unilog started"
    );

    event_loop.run().await.context("unilog stopped")?;
    Ok(())
}

fn connect_stats(address: &str, tags: Vec<String>) -> Arc<dyn StatsClient> {
    match StatsdClient::connect(address, tags) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            warn!(address, error = %e, "statsd unavailable, metrics disabled");
            Arc::new(NoopStats)
        }
    }
}
