//! Mock capture backend for testing.
//!
//! Runs a real capture thread, just like the OS backends, but its "device" is
//! an in-process queue fed through a [`MockInjector`].  This lets session and
//! control-surface tests exercise thread lifecycle, stop and join on any OS.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tracing::{debug, trace};
use tracker_core::{EventSink, InputEvent};

use super::{
    spawn_with_handshake, BackendKind, CaptureBackend, CaptureError, CaptureHandle, StopSignal,
};

/// Name given to the mock capture thread.
pub const MOCK_THREAD_NAME: &str = "tracker-mock";

/// How often an idle mock thread re-checks for a stop request.
const IDLE_POLL: Duration = Duration::from_millis(20);

#[derive(Default)]
struct MockState {
    /// Feed of the currently running capture thread, tagged with its start generation.
    feed: Mutex<Option<(usize, Sender<InputEvent>)>>,
    generation: AtomicUsize,
    fail_with: Mutex<Option<String>>,
    live_threads: AtomicUsize,
    starts: AtomicUsize,
}

/// A [`CaptureBackend`] whose input is injected by the test.
pub struct MockBackend {
    state: Arc<MockState>,
}

/// Test-side handle for feeding and observing a [`MockBackend`].
#[derive(Clone)]
pub struct MockInjector {
    state: Arc<MockState>,
}

impl MockBackend {
    /// Creates a backend together with the injector that drives it.
    pub fn new() -> (Self, MockInjector) {
        let state = Arc::new(MockState::default());
        (
            Self {
                state: Arc::clone(&state),
            },
            MockInjector { state },
        )
    }

    /// Creates a backend whose every `start` fails with `reason`.
    pub fn failing(reason: impl Into<String>) -> (Self, MockInjector) {
        let (backend, injector) = Self::new();
        injector.fail_next_starts(Some(reason.into()));
        (backend, injector)
    }
}

impl MockInjector {
    /// Injects a synthetic event, as if captured from hardware.
    ///
    /// Returns `false` when no capture thread is running.
    pub fn inject(&self, event: InputEvent) -> bool {
        let feed = self.state.feed.lock().unwrap_or_else(PoisonError::into_inner);
        match feed.as_ref() {
            Some((_, tx)) => tx.send(event).is_ok(),
            None => false,
        }
    }

    /// Simulates the device going away: the running capture thread exits on
    /// its own, without a stop request.
    pub fn unplug(&self) {
        *self.state.feed.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Makes subsequent `start` calls fail (`Some`) or succeed (`None`).
    pub fn fail_next_starts(&self, reason: Option<String>) {
        *self
            .state
            .fail_with
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = reason;
    }

    /// Number of mock capture threads currently alive.
    pub fn live_threads(&self) -> usize {
        self.state.live_threads.load(Ordering::SeqCst)
    }

    /// Number of successful `start` calls so far.
    pub fn starts(&self) -> usize {
        self.state.starts.load(Ordering::SeqCst)
    }
}

struct MockStop {
    state: Arc<MockState>,
    /// Which feed this handle owns, so a stale handle cannot cut off a newer thread.
    generation: usize,
}

impl StopSignal for MockStop {
    fn signal_stop(&self) {
        let mut feed = self.state.feed.lock().unwrap_or_else(PoisonError::into_inner);
        if feed.as_ref().is_some_and(|(gen, _)| *gen == self.generation) {
            *feed = None;
        }
    }
}

/// Decrements the live-thread counter when the capture thread exits.
struct LiveThread(Arc<MockState>);

impl Drop for LiveThread {
    fn drop(&mut self) {
        self.0.live_threads.fetch_sub(1, Ordering::SeqCst);
    }
}

impl CaptureBackend for MockBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Mock
    }

    fn start(&self, sink: EventSink) -> Result<CaptureHandle, CaptureError> {
        let state = Arc::clone(&self.state);
        let (generation, thread, completion) =
            spawn_with_handshake(BackendKind::Mock, MOCK_THREAD_NAME, move |handshake| {
                state.live_threads.fetch_add(1, Ordering::SeqCst);
                let _live = LiveThread(Arc::clone(&state));

                let failure = state
                    .fail_with
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clone();
                if let Some(reason) = failure {
                    handshake.fail(reason);
                    return;
                }

                let (tx, rx) = mpsc::channel();
                let generation = state.generation.fetch_add(1, Ordering::SeqCst) + 1;
                *state.feed.lock().unwrap_or_else(PoisonError::into_inner) = Some((generation, tx));
                state.starts.fetch_add(1, Ordering::SeqCst);
                handshake.ready(generation);
                run_feed_loop(&state, generation, &rx, &sink);
                debug!("mock capture thread exiting");
            })?;

        Ok(CaptureHandle::new(
            BackendKind::Mock,
            Box::new(MockStop {
                state: Arc::clone(&self.state),
                generation,
            }),
            thread,
            completion,
        ))
    }
}

/// Forwards injected events until the stop signal retires this generation's feed.
fn run_feed_loop(
    state: &MockState,
    generation: usize,
    rx: &mpsc::Receiver<InputEvent>,
    sink: &EventSink,
) {
    loop {
        match rx.recv_timeout(IDLE_POLL) {
            Ok(event) => {
                if sink.push(event).is_err() {
                    trace!("channel closed, dropping mock event");
                    return;
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => return,
        }
        let still_current = state
            .feed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|(gen, _)| *gen == generation);
        if !still_current {
            return;
        }
    }
}
