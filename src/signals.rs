//! OS signal forwarding.
//!
//! Each signal class gets its own small queue. Deliveries that find the
//! queue full are dropped, the way a pending POSIX signal coalesces.
//!
//! | Class     | Signals            |
//! |-----------|--------------------|
//! | reopen    | `SIGHUP`, `SIGALRM` |
//! | terminate | `SIGTERM`, `SIGINT` |
//! | quit      | `SIGQUIT`           |

use std::io;

use tokio::sync::mpsc;
use tracing::debug;

/// Queue depth per signal class.
pub const SIGNAL_BUFFER: usize = 2;

/// Receiving side of the three signal classes, consumed by the event loop.
#[derive(Debug)]
pub struct SignalEvents {
    /// Reopen the output.
    pub reopen: mpsc::Receiver<()>,
    /// Begin a graceful shutdown.
    pub terminate: mpsc::Receiver<()>,
    /// Exit immediately once shutdown has begun.
    pub quit: mpsc::Receiver<()>,
}

/// Sending side of the three signal classes.
#[derive(Debug, Clone)]
pub struct SignalSenders {
    /// See [`SignalEvents::reopen`].
    pub reopen: mpsc::Sender<()>,
    /// See [`SignalEvents::terminate`].
    pub terminate: mpsc::Sender<()>,
    /// See [`SignalEvents::quit`].
    pub quit: mpsc::Sender<()>,
}

/// Connected senders and receivers with no OS signals attached. Used to
/// inject events directly.
pub fn channel() -> (SignalSenders, SignalEvents) {
    let (reopen_tx, reopen) = mpsc::channel(SIGNAL_BUFFER);
    let (terminate_tx, terminate) = mpsc::channel(SIGNAL_BUFFER);
    let (quit_tx, quit) = mpsc::channel(SIGNAL_BUFFER);
    (
        SignalSenders {
            reopen: reopen_tx,
            terminate: terminate_tx,
            quit: quit_tx,
        },
        SignalEvents {
            reopen,
            terminate,
            quit,
        },
    )
}

/// Install handlers for the process signals and forward them.
///
/// Must be called from within a tokio runtime.
///
/// # Errors
///
/// Returns an error if a signal handler cannot be registered.
#[cfg(unix)]
pub fn install() -> io::Result<SignalEvents> {
    use tokio::signal::unix::{signal, SignalKind};

    let (senders, events) = channel();

    let forwards = [
        (SignalKind::hangup(), "SIGHUP", senders.reopen.clone()),
        (SignalKind::alarm(), "SIGALRM", senders.reopen),
        (SignalKind::terminate(), "SIGTERM", senders.terminate.clone()),
        (SignalKind::interrupt(), "SIGINT", senders.terminate),
        (SignalKind::quit(), "SIGQUIT", senders.quit),
    ];

    for (kind, name, tx) in forwards {
        let mut stream = signal(kind)?;
        tokio::spawn(async move {
            while stream.recv().await.is_some() {
                if !forward(&tx, name) {
                    break;
                }
            }
        });
    }

    Ok(events)
}

/// Install handlers for the process signals and forward them.
///
/// Only Ctrl-C is available here; it maps to terminate.
///
/// # Errors
///
/// Never fails on this platform.
#[cfg(not(unix))]
pub fn install() -> io::Result<SignalEvents> {
    let (senders, events) = channel();
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if !forward(&senders.terminate, "ctrl-c") {
                break;
            }
        }
    });
    Ok(events)
}

/// Queue one delivery. Returns `false` once the receiver is gone.
fn forward(tx: &mpsc::Sender<()>, name: &'static str) -> bool {
    debug!(signal = name, "received signal");
    match tx.try_send(()) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full(())) => {
            debug!(signal = name, "signal queue full, coalescing");
            true
        }
        Err(mpsc::error::TrySendError::Closed(())) => false,
    }
}
