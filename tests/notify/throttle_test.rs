//! Tests for hourly throttling in `src/notify/mod.rs`.

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use unilog::notify::{
    ExceptionSink, FailureNotifier, FailureReport, Mailer, ReportContext, ACTION_REOPEN_FILE,
    ACTION_WRITE_TO_LOG, EPISODE_WINDOW,
};
use unilog::stats::{IndependentTags, Metrics, StatsClient, StatsError, METRIC_ERRORS};

#[derive(Default)]
struct RecordingStats {
    counts: Mutex<Vec<(String, i64, Vec<String>)>>,
}

impl RecordingStats {
    fn total(&self, name: &str, tag: &str) -> i64 {
        self.counts
            .lock()
            .expect("lock")
            .iter()
            .filter(|(n, _, tags)| n == name && tags.iter().any(|t| t == tag))
            .map(|(_, v, _)| v)
            .sum()
    }
}

impl StatsClient for RecordingStats {
    fn count(&self, name: &str, value: i64, tags: &[String], _: f64) -> Result<(), StatsError> {
        self.counts
            .lock()
            .expect("lock")
            .push((name.to_owned(), value, tags.to_vec()));
        Ok(())
    }

    fn gauge(&self, _: &str, _: f64, _: &[String], _: f64) -> Result<(), StatsError> {
        Ok(())
    }
}

#[derive(Clone, Default)]
struct Counter(Arc<AtomicUsize>);

impl Counter {
    fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    fn bump(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

struct CountingSink {
    captured: Counter,
    last: Arc<Mutex<Option<FailureReport>>>,
}

impl ExceptionSink for CountingSink {
    fn capture(&self, report: &FailureReport) {
        self.captured.bump();
        *self.last.lock().expect("lock") = Some(report.clone());
    }
}

struct CountingMailer(Counter);

impl Mailer for CountingMailer {
    fn send(&self, _: &FailureReport) {
        self.0.bump();
    }
}

struct Harness {
    notifier: FailureNotifier,
    stats: Arc<RecordingStats>,
    captured: Counter,
    mailed: Counter,
    last: Arc<Mutex<Option<FailureReport>>>,
}

fn harness() -> Harness {
    let stats = Arc::new(RecordingStats::default());
    let captured = Counter::default();
    let mailed = Counter::default();
    let last = Arc::new(Mutex::new(None));

    let context = ReportContext {
        hostname: "box-1".into(),
        name: "api".into(),
        target: "/var/log/api.log".into(),
        version: "1.0.1".into(),
    };
    let notifier = FailureNotifier::new(
        context,
        Metrics::new(stats.clone(), IndependentTags::default()),
    )
    .with_exceptions(Box::new(CountingSink {
        captured: captured.clone(),
        last: Arc::clone(&last),
    }))
    .with_mailer(Box::new(CountingMailer(mailed.clone())));

    Harness {
        notifier,
        stats,
        captured,
        mailed,
        last,
    }
}

fn disk_full() -> io::Error {
    io::Error::other("no space left on device")
}

#[test]
fn a_thousand_failures_reach_a_human_once() {
    let mut h = harness();
    let start = Instant::now();
    for i in 0..1000u64 {
        h.notifier
            .report_at(ACTION_WRITE_TO_LOG, &disk_full(), start + Duration::from_secs(i));
    }

    assert_eq!(h.captured.get(), 1);
    assert_eq!(h.mailed.get(), 1);
    assert_eq!(
        h.stats.total(METRIC_ERRORS, "err_action:write_to_log"),
        1000
    );
    assert_eq!(h.notifier.state().failures, 1000);
}

#[test]
fn report_carries_daemon_context() {
    let mut h = harness();
    h.notifier.report(ACTION_REOPEN_FILE, &disk_full());

    let report = h.last.lock().expect("lock").clone().expect("captured");
    assert_eq!(report.hostname, "box-1");
    assert_eq!(report.action, "reopen_file");
    assert_eq!(report.name, "api");
    assert_eq!(report.target, "/var/log/api.log");
    assert_eq!(report.error, "no space left on device");
    assert_eq!(report.version, "1.0.1");
}

#[test]
fn failures_past_the_hour_notify_again() {
    let mut h = harness();
    let start = Instant::now();
    h.notifier.report_at(ACTION_WRITE_TO_LOG, &disk_full(), start);
    h.notifier
        .report_at(ACTION_WRITE_TO_LOG, &disk_full(), start + Duration::from_secs(60));
    h.notifier.report_at(
        ACTION_WRITE_TO_LOG,
        &disk_full(),
        start + EPISODE_WINDOW + Duration::from_secs(1),
    );

    assert_eq!(h.captured.get(), 2);
    assert_eq!(h.mailed.get(), 2);
    assert_eq!(h.stats.total(METRIC_ERRORS, "err_action:write_to_log"), 3);
}

#[test]
fn success_starts_a_new_episode() {
    let mut h = harness();
    let now = Instant::now();
    h.notifier.report_at(ACTION_WRITE_TO_LOG, &disk_full(), now);
    h.notifier.record_success();
    assert!(!h.notifier.state().broken);

    h.notifier.report_at(ACTION_REOPEN_FILE, &disk_full(), now);
    assert_eq!(h.captured.get(), 2);
    assert_eq!(h.stats.total(METRIC_ERRORS, "err_action:reopen_file"), 1);
}

#[test]
fn metrics_only_without_sinks() {
    let stats = Arc::new(RecordingStats::default());
    let mut notifier = FailureNotifier::new(
        ReportContext::local("api", "-"),
        Metrics::new(stats.clone(), IndependentTags::default()),
    );
    notifier.report(ACTION_WRITE_TO_LOG, &disk_full());
    notifier.report(ACTION_WRITE_TO_LOG, &disk_full());
    assert_eq!(stats.total(METRIC_ERRORS, "err_action:write_to_log"), 2);
}
