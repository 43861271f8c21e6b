//! Thread completion signal with a bounded wait.
//!
//! `std::thread::JoinHandle::join` blocks forever, which is the wrong tool
//! for shutting down a thread parked inside an OS event loop that may take a
//! moment to unwind.  A [`CompletionGuard`] is moved into the thread and dropped
//! when the thread function returns (or unwinds); the matching [`Completion`]
//! observes that drop as a channel disconnect and can wait for it with a
//! timeout.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TryRecvError};
use std::time::Duration;

/// Held by the worker thread; dropping it signals completion.
#[derive(Debug)]
pub struct CompletionGuard {
    _tx: SyncSender<()>,
}

/// Observer side of a [`CompletionGuard`].
#[derive(Debug)]
pub struct Completion {
    rx: Receiver<()>,
    done: AtomicBool,
}

/// Creates a linked guard/observer pair.
pub fn completion_pair() -> (CompletionGuard, Completion) {
    let (tx, rx) = mpsc::sync_channel(0);
    (
        CompletionGuard { _tx: tx },
        Completion {
            rx,
            done: AtomicBool::new(false),
        },
    )
}

impl Completion {
    /// Returns `true` once the guard has been dropped.
    pub fn is_done(&self) -> bool {
        if self.done.load(Ordering::Acquire) {
            return true;
        }
        match self.rx.try_recv() {
            Err(TryRecvError::Empty) => false,
            Ok(()) | Err(TryRecvError::Disconnected) => {
                self.done.store(true, Ordering::Release);
                true
            }
        }
    }

    /// Waits up to `timeout` for the guard to be dropped.
    ///
    /// Returns `true` if the worker finished within the timeout.
    pub fn wait(&self, timeout: Duration) -> bool {
        if self.done.load(Ordering::Acquire) {
            return true;
        }
        match self.rx.recv_timeout(timeout) {
            Err(RecvTimeoutError::Timeout) => false,
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                self.done.store(true, Ordering::Release);
                true
            }
        }
    }
}
