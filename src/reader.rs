//! Shutdown-aware input wrapper.
//!
//! [`ShutdownAwareReader`] passes reads straight through to the wrapped
//! stream until a shutdown is triggered. From then on it reads one byte at a
//! time until it has returned a record terminator, and after that it reports
//! end-of-stream. Shutdown therefore never truncates a record; it only cuts
//! the stream off before a new record would start.

use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{ready, Context, Poll};

use tokio::io::{AsyncRead, ReadBuf};
use tokio::sync::mpsc;

/// Byte that terminates a record.
pub const RECORD_TERMINATOR: u8 = b'\n';

/// Lifecycle of the input stream. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ShutdownState {
    /// Transparent passthrough.
    Running,
    /// Shutdown requested; finishing the current record.
    Draining,
    /// End-of-stream has been reported after a drain.
    Terminated,
}

/// Shared, lock-guarded [`ShutdownState`].
///
/// Cloning yields another handle to the same cell.
#[derive(Debug, Clone)]
pub struct DrainState {
    inner: Arc<Mutex<ShutdownState>>,
}

impl DrainState {
    fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(ShutdownState::Running)),
        }
    }

    /// Current state.
    pub fn get(&self) -> ShutdownState {
        *self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether shutdown has been requested (draining or already terminated).
    pub fn is_shutting_down(&self) -> bool {
        self.get() != ShutdownState::Running
    }

    /// Move from `Running` to `Draining`. No effect in any later state.
    pub fn begin_draining(&self) {
        self.advance(ShutdownState::Draining);
    }

    fn terminate(&self) {
        self.advance(ShutdownState::Terminated);
    }

    fn advance(&self, next: ShutdownState) {
        let mut state = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if next > *state {
            *state = next;
        }
    }
}

/// Sending half of the shutdown handoff, held by the event loop.
#[derive(Debug, Clone)]
pub struct ShutdownTrigger {
    tx: mpsc::Sender<()>,
}

impl ShutdownTrigger {
    /// Hand the shutdown request to the reader without blocking.
    ///
    /// Returns `true` only for the handoff that was accepted. A request that
    /// is already pending, or one made after the reader consumed the first,
    /// returns `false`.
    pub fn try_trigger(&self) -> bool {
        self.tx.try_send(()).is_ok()
    }
}

/// Receiving half of the shutdown handoff, consumed by the reader.
#[derive(Debug)]
pub struct ShutdownSignal {
    rx: mpsc::Receiver<()>,
}

impl ShutdownSignal {
    /// Wait for the trigger to fire. Returns `false` if it was dropped
    /// without firing.
    pub async fn wait(&mut self) -> bool {
        self.rx.recv().await.is_some()
    }
}

/// Create a connected trigger/signal pair.
pub fn shutdown_channel() -> (ShutdownTrigger, ShutdownSignal) {
    let (tx, rx) = mpsc::channel(1);
    (ShutdownTrigger { tx }, ShutdownSignal { rx })
}

/// Wraps a byte stream so a shutdown request ends it on a record boundary.
#[derive(Debug)]
pub struct ShutdownAwareReader<R> {
    inner: R,
    signal: Option<ShutdownSignal>,
    state: DrainState,
    /// Was the last byte handed out a record terminator?
    at_boundary: bool,
}

impl<R> ShutdownAwareReader<R> {
    /// Wrap `inner`; `signal` starts the drain when its trigger fires.
    pub fn new(inner: R, signal: ShutdownSignal) -> Self {
        Self {
            inner,
            signal: Some(signal),
            state: DrainState::new(),
            at_boundary: false,
        }
    }

    /// Handle to the shared shutdown state.
    pub fn drain_state(&self) -> DrainState {
        self.state.clone()
    }

    /// Observe a pending shutdown request, if any.
    fn poll_signal(&mut self, cx: &mut Context<'_>) {
        let Some(signal) = self.signal.as_mut() else {
            return;
        };
        match signal.rx.poll_recv(cx) {
            Poll::Ready(Some(())) => {
                // Dropping the receiver makes later triggers report failure.
                self.signal = None;
                self.state.begin_draining();
            }
            // Trigger dropped without firing: no shutdown will come.
            Poll::Ready(None) => self.signal = None,
            Poll::Pending => {}
        }
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for ShutdownAwareReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        this.poll_signal(cx);

        let draining = match this.state.get() {
            ShutdownState::Running => false,
            ShutdownState::Draining => true,
            ShutdownState::Terminated => return Poll::Ready(Ok(())),
        };

        if draining && this.at_boundary {
            this.state.terminate();
            return Poll::Ready(Ok(()));
        }

        if buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }

        if draining {
            // One byte at a time so we never read past the terminator.
            let mut byte = [0u8; 1];
            let mut one = ReadBuf::new(&mut byte);
            ready!(Pin::new(&mut this.inner).poll_read(cx, &mut one))?;
            match one.filled().first() {
                Some(&b) => {
                    buf.put_slice(&[b]);
                    this.at_boundary = b == RECORD_TERMINATOR;
                }
                None => this.state.terminate(),
            }
            return Poll::Ready(Ok(()));
        }

        let before = buf.filled().len();
        ready!(Pin::new(&mut this.inner).poll_read(cx, buf))?;
        if let Some(&last) = buf.filled().get(before..).and_then(<[u8]>::last) {
            this.at_boundary = last == RECORD_TERMINATOR;
        }
        Poll::Ready(Ok(()))
    }
}
