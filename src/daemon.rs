//! The event loop.
//!
//! [`EventLoop`] owns the output handle and multiplexes five inputs: the
//! pipeline's error slot, its record queue, and the reopen, terminate and
//! quit signal classes. Each [`tick`](EventLoop::tick) handles exactly one
//! of them.
//!
//! Shutdown is two-phase. The first terminate hands a drain request to the
//! reader and arms force-quit; only then does a quit signal end the process.
//! A quit that arrives first is ignored.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::filters::{self, Filter};
use crate::json::LogLine;
use crate::notify::{FailureNotifier, ACTION_REOPEN_FILE, ACTION_WRITE_TO_LOG};
use crate::reader::ShutdownTrigger;
use crate::signals::SignalEvents;

/// Target name that means standard output.
pub const STDOUT_TARGET: &str = "-";

/// Exit status used by force-quit.
pub const FORCE_QUIT_STATUS: i32 = 1;

/// Unrecoverable event loop failures.
#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    /// The input stream failed with something other than end-of-stream.
    #[error("input pipeline failed: {0}")]
    Pipeline(#[source] io::Error),
}

/// Where the two-phase shutdown stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShutdownProtocol {
    /// No shutdown requested. Quit signals are ignored.
    #[default]
    Running,
    /// A drain was handed to the reader. The next quit exits.
    ArmedForQuit,
    /// Force-quit fired.
    Terminated,
}

impl ShutdownProtocol {
    /// Apply a terminate signal. `accepted` says whether the reader took the
    /// drain request. Returns `true` if this armed force-quit.
    pub fn on_terminate(&mut self, accepted: bool) -> bool {
        if *self == Self::Running && accepted {
            *self = Self::ArmedForQuit;
            return true;
        }
        false
    }

    /// Apply a quit signal. Returns `true` if the process should exit now.
    pub fn on_force_quit(&mut self) -> bool {
        if *self == Self::ArmedForQuit {
            *self = Self::Terminated;
            return true;
        }
        false
    }
}

/// Outcome of one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// Keep going.
    Continue,
    /// The loop is done.
    Stop,
}

/// Static settings of the loop.
#[derive(Debug, Clone)]
pub struct DaemonSettings {
    /// Destination path, or `-` for standard output.
    pub target: String,
    /// Echo every written record to standard output.
    pub verbose: bool,
    /// Treat records as JSON objects.
    pub json: bool,
}

impl DaemonSettings {
    /// Plain-text settings writing to `target`.
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            verbose: false,
            json: false,
        }
    }
}

/// Records and the terminal error from the reading task.
#[derive(Debug)]
pub struct RecordInput {
    /// Records in input order, as raw bytes.
    pub records: mpsc::Receiver<Vec<u8>>,
    /// Terminal read error, if any.
    pub errors: mpsc::Receiver<io::Error>,
}

/// An open destination.
#[derive(Debug)]
pub enum Output {
    /// Standard output. Never closed.
    Stdout,
    /// An append-mode file.
    File(File),
}

impl Output {
    /// Open `target` for appending, creating it with mode 0644 if needed.
    ///
    /// # Errors
    ///
    /// Returns the error from opening the file.
    pub fn open(target: &str) -> io::Result<Self> {
        if target == STDOUT_TARGET {
            return Ok(Self::Stdout);
        }
        let mut options = OpenOptions::new();
        options.create(true).append(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o644);
        }
        options.open(target).map(Self::File)
    }

    /// Write all of `buf`.
    ///
    /// # Errors
    ///
    /// Returns the error from the underlying write.
    pub fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        match self {
            Self::Stdout => {
                let mut out = io::stdout().lock();
                out.write_all(buf)?;
                out.flush()
            }
            Self::File(file) => file.write_all(buf),
        }
    }
}

type ExitFn = Box<dyn Fn(i32) + Send + Sync>;

/// Single owner of the output; drives records from the pipeline into it.
pub struct EventLoop {
    settings: DaemonSettings,
    input: RecordInput,
    signals: SignalEvents,
    trigger: ShutdownTrigger,
    filters: Vec<Box<dyn Filter>>,
    notifier: FailureNotifier,
    output: Option<Output>,
    protocol: ShutdownProtocol,
    exit: ExitFn,
}

impl EventLoop {
    /// Build a loop with no filters that exits the process on force-quit.
    /// The output is opened lazily on the first record.
    pub fn new(
        settings: DaemonSettings,
        input: RecordInput,
        signals: SignalEvents,
        trigger: ShutdownTrigger,
        notifier: FailureNotifier,
    ) -> Self {
        Self {
            settings,
            input,
            signals,
            trigger,
            filters: Vec::new(),
            notifier,
            output: None,
            protocol: ShutdownProtocol::default(),
            exit: Box::new(|code| std::process::exit(code)),
        }
    }

    /// Apply `filters`, in order, to every record.
    #[must_use]
    pub fn with_filters(mut self, filters: Vec<Box<dyn Filter>>) -> Self {
        self.filters = filters;
        self
    }

    /// Call `exit` instead of [`std::process::exit`] on force-quit.
    #[must_use]
    pub fn with_exit(mut self, exit: impl Fn(i32) + Send + Sync + 'static) -> Self {
        self.exit = Box::new(exit);
        self
    }

    /// Current shutdown protocol state.
    pub fn protocol(&self) -> ShutdownProtocol {
        self.protocol
    }

    /// The failure notifier.
    pub fn notifier(&self) -> &FailureNotifier {
        &self.notifier
    }

    /// Whether an output handle is currently open.
    pub fn is_output_open(&self) -> bool {
        self.output.is_some()
    }

    /// Close the current output, unless it is standard output, and open the
    /// target again.
    ///
    /// # Errors
    ///
    /// Returns the open error; the loop is left without an output.
    pub fn open(&mut self) -> io::Result<()> {
        if matches!(self.output, Some(Output::Stdout)) {
            return Ok(());
        }
        self.output = None;
        self.output = Some(Output::open(&self.settings.target)?);
        Ok(())
    }

    /// Handle a reopen signal. Failures go to the notifier.
    pub fn rotate(&mut self) {
        debug!(path = %self.settings.target, "reopening output");
        if let Err(e) = self.open() {
            self.notifier.report(ACTION_REOPEN_FILE, &e);
        }
    }

    /// Wait for one input and handle it.
    ///
    /// # Errors
    ///
    /// Returns [`DaemonError::Pipeline`] if the input failed.
    pub async fn tick(&mut self) -> Result<Tick, DaemonError> {
        tokio::select! {
            Some(e) = self.input.errors.recv() => pipeline_error(e),
            Some(()) = self.signals.reopen.recv() => {
                self.rotate();
                Ok(Tick::Continue)
            }
            Some(()) = self.signals.terminate.recv() => {
                self.terminate();
                Ok(Tick::Continue)
            }
            Some(()) = self.signals.quit.recv() => Ok(self.force_quit()),
            record = self.input.records.recv() => match record {
                Some(line) => {
                    self.handle_record(line);
                    Ok(Tick::Continue)
                }
                None => self.input_closed(),
            },
        }
    }

    /// Tick until the input ends or force-quit fires.
    ///
    /// # Errors
    ///
    /// Returns [`DaemonError::Pipeline`] if the input failed.
    pub async fn run(mut self) -> Result<(), DaemonError> {
        while self.tick().await? == Tick::Continue {}
        debug!("event loop finished");
        Ok(())
    }

    fn terminate(&mut self) {
        let accepted = self.trigger.try_trigger();
        if self.protocol.on_terminate(accepted) {
            info!("draining input, send SIGQUIT to exit immediately");
        } else {
            debug!(accepted, "terminate ignored, drain already requested");
        }
    }

    fn force_quit(&mut self) -> Tick {
        if !self.protocol.on_force_quit() {
            debug!("quit ignored before terminate");
            return Tick::Continue;
        }
        warn!("force quit, abandoning buffered records");
        (self.exit)(FORCE_QUIT_STATUS);
        Tick::Stop
    }

    fn input_closed(&mut self) -> Result<Tick, DaemonError> {
        match self.input.errors.try_recv() {
            Ok(e) => pipeline_error(e),
            Err(_) => Ok(Tick::Stop),
        }
    }

    fn handle_record(&mut self, line: Vec<u8>) {
        if !self.settings.json {
            self.log_line(line);
            return;
        }
        match LogLine::parse(&line) {
            Ok(record) => self.log_json(record),
            Err(e) => {
                debug!(error = %e, "record is not a JSON object, logging as text");
                self.log_line(line);
            }
        }
    }

    fn log_line(&mut self, line: Vec<u8>) {
        let mut formatted = filters::apply_line(&self.filters, line);
        formatted.push(b'\n');
        self.write_record(&formatted);
    }

    fn log_json(&mut self, mut record: LogLine) {
        filters::apply_json(&self.filters, &mut record);
        let mut encoded = record.encode();
        encoded.push('\n');
        self.write_record(encoded.as_bytes());
    }

    fn write_record(&mut self, bytes: &[u8]) {
        if self.settings.verbose {
            let _ = io::stdout().lock().write_all(bytes);
        }

        if self.output.is_none() {
            if let Err(e) = self.open() {
                self.notifier.report(ACTION_REOPEN_FILE, &e);
                return;
            }
        }
        let Some(output) = self.output.as_mut() else {
            return;
        };
        match output.write_all(bytes) {
            Ok(()) => self.notifier.record_success(),
            Err(e) => self.notifier.report(ACTION_WRITE_TO_LOG, &e),
        }
    }
}

impl std::fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLoop")
            .field("settings", &self.settings)
            .field("protocol", &self.protocol)
            .field("output", &self.output)
            .field("filters", &self.filters.len())
            .finish_non_exhaustive()
    }
}

fn pipeline_error(e: io::Error) -> Result<Tick, DaemonError> {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        return Ok(Tick::Stop);
    }
    Err(DaemonError::Pipeline(e))
}
