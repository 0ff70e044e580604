//! Background line splitter.
//!
//! Reads the wrapped input on its own task, splits it on `\n`, and hands each
//! record to the event loop over a bounded queue. The queue is the in-memory
//! buffer that decouples a slow writer from the input pipe (on Linux the
//! kernel adds its own 64 KiB pipe buffer in front of it).

use std::io;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::reader::{DrainState, ShutdownAwareReader, RECORD_TERMINATOR};
use crate::stats::{Metrics, METRIC_BYTES};

/// Default queue capacity, in records.
pub const DEFAULT_BUFFER_LINES: usize = 4096;

/// Sample rate for the byte counter.
const BYTES_SAMPLE_RATE: f64 = 0.1;

/// Consumer side of a running pipeline.
#[derive(Debug)]
pub struct LinePipeline {
    /// Records in input order, terminator stripped, bytes untouched. Closed
    /// once the input ends.
    pub records: mpsc::Receiver<Vec<u8>>,
    /// Receives the terminal read error, if the input failed.
    pub errors: mpsc::Receiver<io::Error>,
    /// Shutdown state of the wrapped reader.
    pub drain: DrainState,
    /// The reading task.
    pub task: JoinHandle<()>,
}

impl LinePipeline {
    /// Start reading `reader` on a new task with a queue of `capacity` records.
    ///
    /// A `capacity` of zero is treated as one.
    pub fn spawn<R>(reader: ShutdownAwareReader<R>, capacity: usize, metrics: Metrics) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let (records_tx, records) = mpsc::channel(capacity.max(1));
        let (errors_tx, errors) = mpsc::channel(1);
        let drain = reader.drain_state();

        let task = tokio::spawn(read_records(reader, records_tx, errors_tx, metrics));

        Self {
            records,
            errors,
            drain,
            task,
        }
    }
}

async fn read_records<R>(
    reader: ShutdownAwareReader<R>,
    records: mpsc::Sender<Vec<u8>>,
    errors: mpsc::Sender<io::Error>,
    metrics: Metrics,
) where
    R: AsyncRead + Unpin + Send + 'static,
{
    let drain = reader.drain_state();
    let mut input = BufReader::new(reader);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match input.read_until(RECORD_TERMINATOR, &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let terminated = buf.last() == Some(&RECORD_TERMINATOR);
                if terminated {
                    buf.pop();
                } else if drain.is_shutting_down() {
                    debug!(bytes = buf.len(), "discarding unterminated record at drain end");
                    break;
                }

                let len = i64::try_from(buf.len()).unwrap_or(i64::MAX);
                if records.send(std::mem::take(&mut buf)).await.is_err() {
                    debug!("record queue closed, stopping reader");
                    return;
                }
                // Metrics never hold up the pipeline.
                let _ = metrics.count(METRIC_BYTES, len, &[], BYTES_SAMPLE_RATE);
            }
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(e) => {
                debug!(error = %e, "input read failed");
                let _ = errors.try_send(e);
                break;
            }
        }
    }
}
