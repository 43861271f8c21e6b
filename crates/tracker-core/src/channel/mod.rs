//! Ordered, synchronous hand-off of captured events to a single consumer.
//!
//! # Why a dedicated dispatch thread? (for beginners)
//!
//! Capture backends run inside OS-driven loops (`GetMessageW`, `CFRunLoopRun`,
//! a blocking `read`) on a thread the OS effectively owns.  The consumer, on the
//! other hand, expects to be called from one stable context so it never has to
//! worry about re-entrancy or concurrent calls.  The event channel bridges the
//! two: the consumer is moved onto a dedicated *dispatch thread*, and capture
//! threads hand events to it through an [`EventSink`].
//!
//! # Backpressure
//!
//! [`EventSink::push`] is a rendezvous: it blocks until the dispatch thread has
//! taken the event **and** the consumer has returned from
//! [`EventConsumer::on_event`].  A slow consumer therefore slows the capture
//! thread instead of growing an unbounded queue.  The cost is that an OS hook
//! waiting in `push` also stalls the input pipeline, so consumers must keep
//! their per-event work small.
//!
//! # Closing
//!
//! [`EventChannel::close`] waits for an in-flight push to finish delivery and
//! then refuses further pushes.  It may also be called from inside the consumer
//! itself, in which case it only marks the channel closed and returns; the
//! pushing thread tears the link down after the current delivery is
//! acknowledged.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, error, trace};

use crate::completion::{completion_pair, Completion, CompletionGuard};
use crate::domain::{EventKind, InputEvent};

/// Name given to the consumer dispatch thread.
pub const DISPATCH_THREAD_NAME: &str = "tracker-dispatch";

/// Errors returned by the event channel.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The channel was closed; the event was not delivered.
    #[error("event channel is closed")]
    Closed,
    /// The dispatch thread could not be spawned.
    #[error("failed to spawn dispatch thread: {0}")]
    Spawn(#[source] std::io::Error),
}

/// The single receiver of captured events.
///
/// Implemented for any `FnMut(EventKind, i64) + Send + 'static`, so a closure is
/// usually all a host needs to supply.
#[cfg_attr(test, mockall::automock)]
pub trait EventConsumer: Send + 'static {
    /// Called once per captured event, in capture order, on the dispatch thread.
    fn on_event(&mut self, kind: EventKind, code: i64);
}

impl<F> EventConsumer for F
where
    F: FnMut(EventKind, i64) + Send + 'static,
{
    fn on_event(&mut self, kind: EventKind, code: i64) {
        self(kind, code)
    }
}

/// Both ends the pushing side needs: the rendezvous sender and the ack receiver.
struct Link {
    events: SyncSender<InputEvent>,
    acks: Receiver<()>,
}

struct Shared {
    /// `None` once the channel is closed.  Held for the whole duration of a push.
    link: Mutex<Option<Link>>,
    closed: AtomicBool,
    delivered: AtomicU64,
    consumer_panics: AtomicU64,
}

impl Shared {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Producer handle given to a capture backend.
#[derive(Clone)]
pub struct EventSink {
    shared: Arc<Shared>,
}

impl EventSink {
    /// Hands `event` to the consumer and blocks until the consumer returns.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Closed`] if the channel has been closed; the
    /// event is dropped in that case.
    pub fn push(&self, event: InputEvent) -> Result<(), ChannelError> {
        let mut guard = self
            .shared
            .link
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if self.shared.is_closed() {
            *guard = None;
            return Err(ChannelError::Closed);
        }
        let link = guard.as_ref().ok_or(ChannelError::Closed)?;

        let outcome = link
            .events
            .send(event)
            .and_then(|()| link.acks.recv().map_err(|_| mpsc::SendError(event)));

        // A close requested from inside the consumer lands here: the current
        // event has been delivered, so the link can go.
        if outcome.is_err() || self.shared.is_closed() {
            *guard = None;
        }
        outcome.map_err(|_| ChannelError::Closed)
    }

    /// Returns `true` once the owning channel has been closed.
    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }
}

/// Owner side of the event channel: the dispatch thread and its consumer.
pub struct EventChannel {
    shared: Arc<Shared>,
    dispatcher_id: ThreadId,
    dispatcher: Option<JoinHandle<()>>,
    completion: Completion,
}

impl EventChannel {
    /// Moves `consumer` onto a new dispatch thread and returns the channel.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Spawn`] if the OS refuses to create the thread.
    pub fn open<C: EventConsumer>(consumer: C) -> Result<Self, ChannelError> {
        let (event_tx, event_rx) = mpsc::sync_channel::<InputEvent>(0);
        let (ack_tx, ack_rx) = mpsc::sync_channel::<()>(0);
        let (guard, completion) = completion_pair();

        let shared = Arc::new(Shared {
            link: Mutex::new(Some(Link {
                events: event_tx,
                acks: ack_rx,
            })),
            closed: AtomicBool::new(false),
            delivered: AtomicU64::new(0),
            consumer_panics: AtomicU64::new(0),
        });

        let loop_shared = Arc::clone(&shared);
        let dispatcher = thread::Builder::new()
            .name(DISPATCH_THREAD_NAME.to_string())
            .spawn(move || dispatch_loop(consumer, event_rx, ack_tx, loop_shared, guard))
            .map_err(ChannelError::Spawn)?;

        Ok(Self {
            shared,
            dispatcher_id: dispatcher.thread().id(),
            dispatcher: Some(dispatcher),
            completion,
        })
    }

    /// Returns a new producer handle.
    pub fn sink(&self) -> EventSink {
        EventSink {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Closes the channel.  Idempotent.
    ///
    /// Blocks until an in-flight [`EventSink::push`] has been delivered, unless
    /// called from the dispatch thread itself.
    pub fn close(&self) {
        let was_closed = self.shared.closed.swap(true, Ordering::AcqRel);
        if self.on_dispatch_thread() {
            debug!("event channel close requested from inside the consumer");
            return;
        }
        let mut guard = self
            .shared
            .link
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *guard = None;
        if !was_closed {
            debug!(
                delivered = self.delivered(),
                "event channel closed"
            );
        }
    }

    /// Returns `true` once [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Number of events handed to the consumer so far.
    pub fn delivered(&self) -> u64 {
        self.shared.delivered.load(Ordering::Acquire)
    }

    /// Number of consumer calls (including the final drop) that panicked.
    pub fn consumer_panics(&self) -> u64 {
        self.shared.consumer_panics.load(Ordering::Acquire)
    }

    /// Waits up to `timeout` for the dispatch thread to exit.
    ///
    /// Returns `true` if it exited.  Always returns `false` when called from
    /// the dispatch thread, which cannot wait for itself.
    pub fn join(&mut self, timeout: Duration) -> bool {
        if self.on_dispatch_thread() {
            return false;
        }
        if !self.completion.wait(timeout) {
            return false;
        }
        if let Some(handle) = self.dispatcher.take() {
            if handle.join().is_err() {
                error!("dispatch thread panicked outside the consumer");
            }
        }
        true
    }

    /// Returns `true` once the dispatch thread has exited.
    pub fn is_finished(&self) -> bool {
        self.completion.is_done()
    }

    fn on_dispatch_thread(&self) -> bool {
        thread::current().id() == self.dispatcher_id
    }
}

impl Drop for EventChannel {
    fn drop(&mut self) {
        self.close();
    }
}

fn dispatch_loop<C: EventConsumer>(
    mut consumer: C,
    events: Receiver<InputEvent>,
    acks: SyncSender<()>,
    shared: Arc<Shared>,
    _completion: CompletionGuard,
) {
    debug!("dispatch loop started");
    for event in events.iter() {
        trace!(kind = %event.kind, code = event.code, "delivering event");
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            consumer.on_event(event.kind, event.code)
        }));
        if outcome.is_err() {
            shared.consumer_panics.fetch_add(1, Ordering::AcqRel);
            error!(kind = %event.kind, code = event.code, "event consumer panicked");
        }
        shared.delivered.fetch_add(1, Ordering::AcqRel);
        if acks.send(()).is_err() {
            break;
        }
    }
    // Drop the consumer on the thread that used it.
    if panic::catch_unwind(AssertUnwindSafe(move || drop(consumer))).is_err() {
        shared.consumer_panics.fetch_add(1, Ordering::AcqRel);
        error!("event consumer panicked while being dropped");
    }
    debug!("dispatch loop exiting");
}
