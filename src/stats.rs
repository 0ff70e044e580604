//! Fire-and-forget metrics.
//!
//! Metrics go to a local DogStatsD-compatible agent over UDP. Sends never
//! block: the socket is non-blocking, and callers on the hot path ignore
//! send failures.

use std::collections::HashMap;
use std::net::{ToSocketAddrs, UdpSocket};
use std::sync::{Arc, Mutex, PoisonError};

/// Default address of the local metrics agent.
pub const DEFAULT_STATSD_ADDRESS: &str = "127.0.0.1:8200";

/// Bytes read from the input stream.
pub const METRIC_BYTES: &str = "unilog.bytes";
/// Failed output operations, tagged `err_action:<action>`.
pub const METRIC_ERRORS: &str = "unilog.errors_total";
/// Current system austerity level.
pub const METRIC_AUSTERITY: &str = "unilog.austerity.box";
/// Failed attempts to load the austerity level.
pub const METRIC_LOAD_LEVEL_ERRORS: &str = "unilog.errors.load_level";

/// Errors from a metrics sink.
#[derive(Debug, thiserror::Error)]
pub enum StatsError {
    /// The datagram could not be sent.
    #[error("failed to send metric: {0}")]
    Io(#[from] std::io::Error),
    /// The agent address did not resolve.
    #[error("metrics address {0:?} did not resolve")]
    Unresolved(String),
}

/// A metrics sink.
pub trait StatsClient: Send + Sync {
    /// Add `value` to the counter `name`, sampled at `rate`.
    ///
    /// # Errors
    ///
    /// Returns [`StatsError`] if the metric could not be handed off.
    fn count(&self, name: &str, value: i64, tags: &[String], rate: f64) -> Result<(), StatsError>;

    /// Set the gauge `name` to `value`, sampled at `rate`.
    ///
    /// # Errors
    ///
    /// Returns [`StatsError`] if the metric could not be handed off.
    fn gauge(&self, name: &str, value: f64, tags: &[String], rate: f64) -> Result<(), StatsError>;
}

/// A sink that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopStats;

impl StatsClient for NoopStats {
    fn count(&self, _: &str, _: i64, _: &[String], _: f64) -> Result<(), StatsError> {
        Ok(())
    }

    fn gauge(&self, _: &str, _: f64, _: &[String], _: f64) -> Result<(), StatsError> {
        Ok(())
    }
}

/// DogStatsD client over a connected, non-blocking UDP socket.
#[derive(Debug)]
pub struct StatsdClient {
    socket: UdpSocket,
    global_tags: Vec<String>,
}

impl StatsdClient {
    /// Connect to the agent at `address`, attaching `global_tags` to every metric.
    ///
    /// # Errors
    ///
    /// Returns [`StatsError`] if the address does not resolve or the socket
    /// cannot be created.
    pub fn connect(address: &str, global_tags: Vec<String>) -> Result<Self, StatsError> {
        let target = address
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| StatsError::Unresolved(address.to_owned()))?;
        let bind = if target.is_ipv4() {
            "0.0.0.0:0"
        } else {
            "[::]:0"
        };
        let socket = UdpSocket::bind(bind)?;
        socket.connect(target)?;
        socket.set_nonblocking(true)?;

        let global_tags = global_tags.into_iter().filter(|t| !t.is_empty()).collect();
        Ok(Self {
            socket,
            global_tags,
        })
    }

    fn send(
        &self,
        name: &str,
        value: &str,
        kind: &str,
        tags: &[String],
        rate: f64,
    ) -> Result<(), StatsError> {
        if rate < 1.0 && rand::random::<f64>() >= rate {
            return Ok(());
        }
        let packet = format_packet(name, value, kind, &self.global_tags, tags, rate);
        self.socket.send(packet.as_bytes())?;
        Ok(())
    }
}

impl StatsClient for StatsdClient {
    fn count(&self, name: &str, value: i64, tags: &[String], rate: f64) -> Result<(), StatsError> {
        self.send(name, &value.to_string(), "c", tags, rate)
    }

    fn gauge(&self, name: &str, value: f64, tags: &[String], rate: f64) -> Result<(), StatsError> {
        self.send(name, &value.to_string(), "g", tags, rate)
    }
}

/// Render one DogStatsD datagram: `name:value|kind[|@rate][|#tags]`.
pub fn format_packet(
    name: &str,
    value: &str,
    kind: &str,
    global_tags: &[String],
    tags: &[String],
    rate: f64,
) -> String {
    let mut packet = format!("{name}:{value}|{kind}");
    if rate < 1.0 {
        packet.push_str(&format!("|@{rate}"));
    }
    let all: Vec<&str> = global_tags
        .iter()
        .chain(tags)
        .map(String::as_str)
        .collect();
    if !all.is_empty() {
        packet.push_str("|#");
        packet.push_str(&all.join(","));
    }
    packet
}

/// One derived metric: the tag to attach and the full `<metric>.<tag name>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagPair {
    /// Tag attached to the derived metric (`name:value`).
    pub tag: String,
    /// Derived metric name.
    pub metric: String,
}

/// Tags that each get their own copy of every counter.
///
/// The expansion for a metric name is computed once and memoized. The table
/// only grows; concurrent first insertions are serialized by the lock and are
/// idempotent anyway.
#[derive(Debug, Default)]
pub struct IndependentTags {
    tags: Vec<String>,
    table: Mutex<HashMap<String, Arc<[TagPair]>>>,
}

impl IndependentTags {
    /// Build from `name:value` tags. Tags with an empty name are skipped.
    pub fn new(tags: Vec<String>) -> Self {
        Self {
            tags,
            table: Mutex::new(HashMap::new()),
        }
    }

    /// The derived metrics for `metric`.
    pub fn pairs(&self, metric: &str) -> Arc<[TagPair]> {
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(pairs) = table.get(metric) {
            return Arc::clone(pairs);
        }

        let pairs: Arc<[TagPair]> = self
            .tags
            .iter()
            .filter_map(|tag| {
                let prefix = tag.split(':').next().unwrap_or_default();
                if prefix.is_empty() {
                    return None;
                }
                Some(TagPair {
                    tag: tag.clone(),
                    metric: format!("{metric}.{prefix}"),
                })
            })
            .collect();
        table.insert(metric.to_owned(), Arc::clone(&pairs));
        pairs
    }

    /// Number of memoized metric names.
    pub fn memoized(&self) -> usize {
        self.table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// The daemon's metrics handle: a sink plus the independent-tag table.
///
/// Built once at startup and shared by reference; there is no process-wide
/// client.
#[derive(Clone)]
pub struct Metrics {
    client: Arc<dyn StatsClient>,
    independent: Arc<IndependentTags>,
}

impl Metrics {
    /// Wrap a sink with an independent-tag table.
    pub fn new(client: Arc<dyn StatsClient>, independent: IndependentTags) -> Self {
        Self {
            client,
            independent: Arc::new(independent),
        }
    }

    /// A handle that drops everything.
    pub fn noop() -> Self {
        Self::new(Arc::new(NoopStats), IndependentTags::default())
    }

    /// The underlying sink.
    pub fn client(&self) -> &Arc<dyn StatsClient> {
        &self.client
    }

    /// Emit `name`, then one derived counter per independent tag.
    ///
    /// Stops at the first failed send.
    ///
    /// # Errors
    ///
    /// Returns the first [`StatsError`] from the sink.
    pub fn count(
        &self,
        name: &str,
        value: i64,
        tags: &[String],
        rate: f64,
    ) -> Result<(), StatsError> {
        self.client.count(name, value, tags, rate)?;

        let pairs = self.independent.pairs(name);
        for pair in pairs.iter() {
            let mut derived = Vec::with_capacity(tags.len().saturating_add(1));
            derived.extend_from_slice(tags);
            derived.push(pair.tag.clone());
            self.client.count(&pair.metric, value, &derived, rate)?;
        }
        Ok(())
    }

    /// Set a gauge. Independent tags do not apply to gauges.
    ///
    /// # Errors
    ///
    /// Returns the [`StatsError`] from the sink.
    pub fn gauge(
        &self,
        name: &str,
        value: f64,
        tags: &[String],
        rate: f64,
    ) -> Result<(), StatsError> {
        self.client.gauge(name, value, tags, rate)
    }
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics")
            .field("independent", &self.independent)
            .finish_non_exhaustive()
    }
}

/// Split a comma-separated tag list, dropping empty entries.
pub fn split_tags(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_owned)
        .collect()
}
