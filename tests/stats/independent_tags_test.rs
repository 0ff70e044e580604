//! Tests for independent-tag counters in `src/stats.rs`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use unilog::stats::{IndependentTags, Metrics, StatsClient, StatsError};

/// Sums counts keyed by `[tag][tag]name`.
#[derive(Default)]
struct MockClient {
    counts: Mutex<HashMap<String, i64>>,
}

impl MockClient {
    fn get(&self, key: &str) -> i64 {
        self.counts
            .lock()
            .expect("lock")
            .get(key)
            .copied()
            .unwrap_or_default()
    }

    fn keys(&self) -> usize {
        self.counts.lock().expect("lock").len()
    }
}

impl StatsClient for MockClient {
    fn count(&self, name: &str, value: i64, tags: &[String], _: f64) -> Result<(), StatsError> {
        let mut key: String = tags.iter().map(|t| format!("[{t}]")).collect();
        key.push_str(name);
        *self.counts.lock().expect("lock").entry(key).or_default() += value;
        Ok(())
    }

    fn gauge(&self, _: &str, _: f64, _: &[String], _: f64) -> Result<(), StatsError> {
        Ok(())
    }
}

fn metrics(independent: &[&str]) -> (Arc<MockClient>, Metrics) {
    let client = Arc::new(MockClient::default());
    let tags = independent.iter().map(|t| (*t).to_owned()).collect();
    let metrics = Metrics::new(client.clone(), IndependentTags::new(tags));
    (client, metrics)
}

fn tags(list: &[&str]) -> Vec<String> {
    list.iter().map(|t| (*t).to_owned()).collect()
}

#[test]
fn no_tags() {
    let (client, metrics) = metrics(&[]);
    for _ in 0..100 {
        metrics.count("metric", 10, &[], 1.0).expect("count");
    }
    assert_eq!(client.get("metric"), 1000);
    assert_eq!(client.keys(), 1);
}

#[test]
fn call_tags_pass_through() {
    let (client, metrics) = metrics(&[]);
    for _ in 0..100 {
        metrics
            .count("metric", 10, &tags(&["foo:bar"]), 1.0)
            .expect("count");
        metrics
            .count("metric", 5, &tags(&["baz:qaz", "veneurglobalonly:true"]), 1.0)
            .expect("count");
    }
    assert_eq!(client.get("[foo:bar]metric"), 1000);
    assert_eq!(client.get("[baz:qaz][veneurglobalonly:true]metric"), 500);
}

#[test]
fn independent_tags_emit_derived_counters() {
    let (client, metrics) = metrics(&["veneurglobalonly:true", "owner:observability"]);
    for _ in 0..100 {
        metrics.count("metric", 10, &[], 1.0).expect("count");
        metrics
            .count("metric", 5, &tags(&["baz:qaz"]), 1.0)
            .expect("count");
    }

    let expected = [
        ("metric", 1000),
        ("[veneurglobalonly:true]metric.veneurglobalonly", 1000),
        ("[owner:observability]metric.owner", 1000),
        ("[baz:qaz]metric", 500),
        ("[baz:qaz][veneurglobalonly:true]metric.veneurglobalonly", 500),
        ("[baz:qaz][owner:observability]metric.owner", 500),
    ];
    for (key, value) in expected {
        assert_eq!(client.get(key), value, "count for {key}");
    }
    assert_eq!(client.keys(), expected.len());
}

#[test]
fn expansions_are_memoized_per_metric() {
    let independent = IndependentTags::new(tags(&["owner:observability", ":nameless"]));
    let first = independent.pairs("a");
    let again = independent.pairs("a");
    assert!(Arc::ptr_eq(&first, &again));
    assert_eq!(first.len(), 1, "tags without a name are skipped");
    assert_eq!(first[0].metric, "a.owner");
    assert_eq!(first[0].tag, "owner:observability");

    independent.pairs("b");
    assert_eq!(independent.memoized(), 2);
}

#[test]
fn gauges_ignore_independent_tags() {
    let (client, metrics) = metrics(&["owner:observability"]);
    metrics.gauge("g", 1.0, &[], 1.0).expect("gauge");
    assert_eq!(client.keys(), 0);
}
