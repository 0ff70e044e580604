//! System austerity level service.
//!
//! A background task periodically reloads the austerity level from a
//! [`LevelSource`] on the blocking pool and publishes it through a `watch` cell. Readers hold an
//! [`AusterityLevels`] handle and read the most recent value without ever
//! waiting on the service task, so the per-line shedding path never blocks.
//!
//! Load failures leave the cached level untouched: a transient file error can
//! never raise the effective austerity.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::clevels::{AusterityLevel, LevelError, DEFAULT_AUSTERITY};
use crate::stats::{StatsClient, METRIC_AUSTERITY, METRIC_LOAD_LEVEL_ERRORS};

/// Default reload interval.
pub const DEFAULT_CACHE_INTERVAL: Duration = Duration::from_secs(30);

/// Where the austerity level comes from.
pub trait LevelSource: Send + Sync {
    /// Load the current level.
    ///
    /// # Errors
    ///
    /// Returns [`LevelError`] if the level could not be read or parsed.
    fn load(&self) -> Result<AusterityLevel, LevelError>;
}

/// A plain-text file holding exactly one level name.
#[derive(Debug, Clone)]
pub struct AusterityFile {
    path: PathBuf,
}

impl AusterityFile {
    /// Read levels from `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LevelSource for AusterityFile {
    fn load(&self) -> Result<AusterityLevel, LevelError> {
        let contents = std::fs::read_to_string(&self.path)?;
        contents.parse()
    }
}

/// Read-only handle to the live austerity level.
#[derive(Debug, Clone)]
pub struct AusterityLevels {
    rx: watch::Receiver<AusterityLevel>,
}

impl AusterityLevels {
    /// The most recently published level. Never blocks on the service task.
    pub fn current(&self) -> AusterityLevel {
        *self.rx.borrow()
    }

    /// A handle pinned to `level`, with no service behind it.
    pub fn fixed(level: AusterityLevel) -> Self {
        let (_tx, rx) = watch::channel(level);
        Self { rx }
    }

    /// Wait until the published level changes.
    ///
    /// Returns `None` once the service has stopped.
    pub async fn changed(&mut self) -> Option<AusterityLevel> {
        self.rx.changed().await.ok()?;
        Some(*self.rx.borrow_and_update())
    }
}

/// Owns the cached level and refreshes it from a [`LevelSource`].
pub struct AusterityLevelService {
    source: Option<Arc<dyn LevelSource>>,
    interval: Duration,
    stats: Arc<dyn StatsClient>,
    tx: watch::Sender<AusterityLevel>,
}

impl AusterityLevelService {
    /// Create the service and its first reader handle.
    ///
    /// The cache starts at [`DEFAULT_AUSTERITY`]. With no `source` the level
    /// simply stays there.
    pub fn new(
        source: Option<Arc<dyn LevelSource>>,
        interval: Duration,
        stats: Arc<dyn StatsClient>,
    ) -> (Self, AusterityLevels) {
        let (tx, rx) = watch::channel(DEFAULT_AUSTERITY);
        let service = Self {
            source,
            interval,
            stats,
            tx,
        };
        (service, AusterityLevels { rx })
    }

    /// Another reader handle.
    pub fn subscribe(&self) -> AusterityLevels {
        AusterityLevels {
            rx: self.tx.subscribe(),
        }
    }

    /// The cached level.
    pub fn cached(&self) -> AusterityLevel {
        *self.tx.borrow()
    }

    /// Reload once. Returns the cached level afterwards.
    ///
    /// On failure the cache is kept and a load-failure counter is emitted.
    /// A changed level is published and reported as a gauge.
    pub fn refresh(&self) -> AusterityLevel {
        let Some(source) = self.source.as_ref() else {
            return self.cached();
        };
        self.apply(source.load())
    }

    /// Like [`refresh`](Self::refresh), with the load on the blocking pool.
    pub async fn reload(&self) -> AusterityLevel {
        let Some(source) = self.source.clone() else {
            return self.cached();
        };

        match tokio::task::spawn_blocking(move || source.load()).await {
            Ok(result) => self.apply(result),
            Err(e) => {
                warn!(error = %e, "austerity load task failed, keeping cached value");
                self.cached()
            }
        }
    }

    fn apply(&self, result: Result<AusterityLevel, LevelError>) -> AusterityLevel {
        match result {
            Ok(level) => {
                let changed = self.tx.send_if_modified(|current| {
                    if *current == level {
                        return false;
                    }
                    *current = level;
                    true
                });
                if changed {
                    info!(level = %level, "austerity level changed");
                    let _ = self
                        .stats
                        .gauge(METRIC_AUSTERITY, f64::from(level.rank()), &[], 1.0);
                }
                level
            }
            Err(e) => {
                debug!(error = %e, "failed to load austerity level, keeping cached value");
                let _ = self.stats.count(METRIC_LOAD_LEVEL_ERRORS, 1, &[], 1.0);
                self.cached()
            }
        }
    }

    /// Refresh immediately and then every interval, until every reader
    /// handle has been dropped.
    pub async fn run(self) {
        if self.source.is_none() {
            debug!("no austerity source configured, level fixed at default");
        }

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.reload().await;
                }
                () = self.tx.closed() => {
                    debug!("all austerity readers gone, stopping refresh");
                    break;
                }
            }
        }
    }

    /// Spawn [`run`](Self::run) on the current runtime.
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run())
    }
}

impl std::fmt::Debug for AusterityLevelService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AusterityLevelService")
            .field("interval", &self.interval)
            .field("cached", &self.cached())
            .finish_non_exhaustive()
    }
}
