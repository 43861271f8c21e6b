//! CaptureSession: owns one backend run and its event channel.
//!
//! # State machine
//!
//! ```text
//!   Inert ──start()──▶ Active ──stop()──▶ Inert
//!                        │
//!                        └──start() ── Reject  ─▶ AlreadyActive (stays Active)
//!                                   └─ Replace ─▶ stop + join old, start new
//! ```
//!
//! Every `start` builds a fresh [`EventChannel`] and a fresh backend run;
//! nothing survives from a previous session.  `stop` signals the capture
//! thread, then closes the channel, which waits for an in-flight event to
//! reach the consumer before refusing further pushes.  Once `stop` returns the
//! consumer is never called again for that session.
//!
//! The session lock is released before the channel is closed, so a consumer
//! may call `stop` on its own session from inside `on_event`.
//!
//! A capture thread can also end by itself (device unplugged, hook removed by
//! the OS).  Such a session no longer counts as Active: the next look at the
//! session state closes it and reports Inert.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use tracker_core::{EventChannel, EventConsumer};
use uuid::Uuid;

use crate::infrastructure::input_capture::{BackendKind, CaptureBackend, CaptureError, CaptureHandle};

/// Identifies one Inert → Active → Inert cycle.
pub type SessionId = Uuid;

/// Default bound on joining capture and dispatch threads.
pub const DEFAULT_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// What `start` does when a session is already active.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RestartPolicy {
    /// Refuse with [`CaptureError::AlreadyActive`].
    #[default]
    Reject,
    /// Stop and join the running session, then start a new one.
    Replace,
}

struct ActiveSession {
    id: SessionId,
    capture: CaptureHandle,
    channel: EventChannel,
    started_at: Instant,
}

impl ActiveSession {
    /// Closes the channel after the capture thread has been signalled.
    /// Blocks only while an in-flight event finishes delivery.
    fn close(&mut self) {
        self.capture.stop();
        self.channel.close();
        info!(
            session = %self.id,
            backend = %self.capture.kind(),
            delivered = self.channel.delivered(),
            uptime_ms = self.started_at.elapsed().as_millis() as u64,
            "capture session stopped"
        );
        if self.channel.consumer_panics() > 0 {
            warn!(
                session = %self.id,
                panics = self.channel.consumer_panics(),
                "consumer panicked during the session"
            );
        }
    }

    /// Closes a session whose capture thread has already exited.
    fn reap(&mut self) {
        warn!(
            session = %self.id,
            backend = %self.capture.kind(),
            "capture thread ended on its own, closing session"
        );
        self.close();
    }

    /// Waits for both threads, sharing one deadline.
    fn join(&mut self, timeout: Duration) -> Result<(), CaptureError> {
        let deadline = Instant::now() + timeout;
        let capture_done = self.capture.join(timeout);
        let remaining = deadline.saturating_duration_since(Instant::now());
        let dispatch_done = self.channel.join(remaining);
        if capture_done && dispatch_done {
            debug!(session = %self.id, "capture session threads joined");
            Ok(())
        } else {
            Err(CaptureError::JoinTimeout(timeout))
        }
    }
}

/// One capture backend plus the lifecycle of its sessions.
pub struct CaptureSession {
    backend: Box<dyn CaptureBackend>,
    policy: RestartPolicy,
    join_timeout: Duration,
    active: Mutex<Option<ActiveSession>>,
}

impl CaptureSession {
    pub fn new(backend: Box<dyn CaptureBackend>, policy: RestartPolicy) -> Self {
        Self {
            backend,
            policy,
            join_timeout: DEFAULT_JOIN_TIMEOUT,
            active: Mutex::new(None),
        }
    }

    /// Sets the bound used when `Replace` joins the previous session.
    pub fn with_join_timeout(mut self, timeout: Duration) -> Self {
        self.join_timeout = timeout;
        self
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }

    /// Whether a session is running.  A session whose capture thread has
    /// exited is closed here and reported as inactive.
    pub fn is_active(&self) -> bool {
        self.lock_live().is_some()
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.lock_live().as_ref().map(|s| s.id)
    }

    /// Starts capturing into `consumer`.
    ///
    /// # Errors
    ///
    /// - [`CaptureError::AlreadyActive`] under [`RestartPolicy::Reject`].
    /// - [`CaptureError::Channel`] if the dispatch thread cannot be spawned.
    /// - [`CaptureError::Acquire`] if the backend cannot get its OS resource.
    /// - [`CaptureError::JoinTimeout`] if `Replace` could not join the old session.
    ///
    /// On any error the session is Inert, except for `AlreadyActive`, which
    /// leaves the running session untouched.
    pub fn start<C: EventConsumer>(&self, consumer: C) -> Result<SessionId, CaptureError> {
        let mut active = self.lock();

        while let Some(mut previous) = active.take() {
            let ended = previous.capture.is_finished();
            if !ended && self.policy == RestartPolicy::Reject {
                debug!(session = %previous.id, "start rejected, session already active");
                *active = Some(previous);
                return Err(CaptureError::AlreadyActive);
            }
            drop(active);
            if ended {
                previous.reap();
            } else {
                info!(session = %previous.id, "replacing active capture session");
                previous.close();
            }
            previous.join(self.join_timeout)?;
            active = self.lock();
        }

        let channel = EventChannel::open(consumer)?;
        let capture = match self.backend.start(channel.sink()) {
            Ok(capture) => capture,
            Err(e) => {
                channel.close();
                warn!(backend = %self.backend.kind(), "capture session failed to start: {e}");
                return Err(e);
            }
        };

        let id = Uuid::new_v4();
        info!(session = %id, backend = %capture.kind(), "capture session started");
        *active = Some(ActiveSession {
            id,
            capture,
            channel,
            started_at: Instant::now(),
        });
        Ok(id)
    }

    /// Stops the active session, if any.  Returns whether one was active.
    ///
    /// Does not wait for the threads to exit; see [`stop_and_join`](Self::stop_and_join).
    pub fn stop(&self) -> bool {
        match self.take_active() {
            Some(mut session) => {
                session.close();
                true
            }
            None => {
                debug!("stop requested while inert");
                false
            }
        }
    }

    /// Stops the active session and waits up to `timeout` for its capture and
    /// dispatch threads.  Returns whether a session was active.
    ///
    /// Called from inside the consumer this always times out, since the
    /// dispatch thread cannot join itself.
    pub fn stop_and_join(&self, timeout: Duration) -> Result<bool, CaptureError> {
        match self.take_active() {
            Some(mut session) => {
                session.close();
                session.join(timeout)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Moves the session out and signals its capture thread, all under the lock.
    fn take_active(&self) -> Option<ActiveSession> {
        let mut active = self.lock_live();
        let mut session = active.take()?;
        session.capture.stop();
        Some(session)
    }

    /// Locks the session state after closing a session whose capture thread
    /// has already exited.
    fn lock_live(&self) -> MutexGuard<'_, Option<ActiveSession>> {
        let mut active = self.lock();
        if matches!(active.as_ref(), Some(s) if s.capture.is_finished()) {
            if let Some(mut ended) = active.take() {
                drop(active);
                ended.reap();
                active = self.lock();
            }
        }
        active
    }

    fn lock(&self) -> MutexGuard<'_, Option<ActiveSession>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.stop();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::input_capture::mock::{MockBackend, MockInjector};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::mpsc;
    use std::sync::{Arc, OnceLock};
    use std::thread;
    use tracker_core::{EventKind, InputEvent};

    const WAIT: Duration = Duration::from_secs(5);

    fn mock_session(policy: RestartPolicy) -> (CaptureSession, MockInjector) {
        let (backend, injector) = MockBackend::new();
        (CaptureSession::new(Box::new(backend), policy), injector)
    }

    fn recording_consumer() -> (
        impl FnMut(EventKind, i64) + Send + 'static,
        mpsc::Receiver<(EventKind, i64)>,
    ) {
        let (tx, rx) = mpsc::channel();
        let consumer = move |kind: EventKind, code: i64| {
            tx.send((kind, code)).ok();
        };
        (consumer, rx)
    }

    #[test]
    fn test_stop_before_start_is_noop() {
        let (session, injector) = mock_session(RestartPolicy::Reject);

        assert!(!session.stop());
        assert!(!session.stop_and_join(WAIT).unwrap());
        assert!(!session.is_active());
        assert_eq!(injector.starts(), 0);
    }

    #[test]
    fn test_start_delivers_events_and_stop_returns_to_inert() {
        // Arrange
        let (session, injector) = mock_session(RestartPolicy::Reject);
        let (consumer, rx) = recording_consumer();

        // Act
        let id = session.start(consumer).unwrap();
        injector.inject(InputEvent::key(65));
        injector.inject(InputEvent::mouse(0));
        let first = rx.recv_timeout(WAIT).unwrap();
        let second = rx.recv_timeout(WAIT).unwrap();

        // Assert
        assert_eq!(session.session_id(), Some(id));
        assert_eq!(first, (EventKind::Key, 65));
        assert_eq!(second, (EventKind::Mouse, 0));
        assert!(session.stop_and_join(WAIT).unwrap());
        assert!(!session.is_active());
        assert_eq!(injector.live_threads(), 0);
    }

    #[test]
    fn test_reject_policy_keeps_single_session() {
        // Arrange
        let (session, injector) = mock_session(RestartPolicy::Reject);
        let (first, rx) = recording_consumer();
        let (second, second_rx) = recording_consumer();
        let id = session.start(first).unwrap();

        // Act
        let result = session.start(second);
        injector.inject(InputEvent::key(1));

        // Assert
        assert!(matches!(result, Err(CaptureError::AlreadyActive)));
        assert_eq!(session.session_id(), Some(id));
        assert_eq!(injector.live_threads(), 1);
        assert_eq!(rx.recv_timeout(WAIT).unwrap(), (EventKind::Key, 1));
        session.stop_and_join(WAIT).unwrap();
        assert!(rx.try_recv().is_err(), "event must not be duplicated");
        assert!(second_rx.try_recv().is_err());
    }

    #[test]
    fn test_replace_policy_swaps_sessions() {
        // Arrange
        let (session, injector) = mock_session(RestartPolicy::Replace);
        let (first, first_rx) = recording_consumer();
        let (second, second_rx) = recording_consumer();
        let first_id = session.start(first).unwrap();

        // Act
        let second_id = session.start(second).unwrap();
        injector.inject(InputEvent::key(2));

        // Assert
        assert_ne!(first_id, second_id);
        assert_eq!(second_rx.recv_timeout(WAIT).unwrap(), (EventKind::Key, 2));
        assert!(first_rx.try_recv().is_err());
        assert_eq!(injector.live_threads(), 1);
        assert_eq!(injector.starts(), 2);
        session.stop_and_join(WAIT).unwrap();
    }

    #[test]
    fn test_backend_failure_leaves_session_inert() {
        let (backend, injector) = MockBackend::failing("permission denied");
        let session = CaptureSession::new(Box::new(backend), RestartPolicy::Reject);

        let result = session.start(|_: EventKind, _: i64| {});

        match result {
            Err(CaptureError::Acquire { reason, .. }) => assert_eq!(reason, "permission denied"),
            other => panic!("expected Acquire, got {other:?}"),
        }
        assert!(!session.is_active());
        assert_eq!(injector.live_threads(), 0);

        // The same session can start once the backend recovers.
        injector.fail_next_starts(None);
        session.start(|_: EventKind, _: i64| {}).unwrap();
        assert!(session.is_active());
    }

    #[test]
    fn test_stop_waits_for_in_flight_delivery() {
        // Arrange: a consumer that blocks until released
        let (session, injector) = mock_session(RestartPolicy::Reject);
        let session = Arc::new(session);
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let (seen_tx, seen_rx) = mpsc::channel();
        session
            .start(move |kind: EventKind, code: i64| {
                entered_tx.send(()).ok();
                release_rx.recv().ok();
                seen_tx.send((kind, code)).ok();
            })
            .unwrap();
        injector.inject(InputEvent::key(65));
        entered_rx.recv_timeout(WAIT).unwrap();

        // Act
        let stopped = Arc::new(AtomicBool::new(false));
        let stopper = {
            let session = Arc::clone(&session);
            let stopped = Arc::clone(&stopped);
            thread::spawn(move || {
                let was_active = session.stop();
                stopped.store(true, Ordering::SeqCst);
                was_active
            })
        };
        thread::sleep(Duration::from_millis(100));
        let stopped_early = stopped.load(Ordering::SeqCst);
        release_tx.send(()).unwrap();

        // Assert
        assert!(!stopped_early, "stop must wait for the in-flight event");
        assert!(stopper.join().unwrap());
        assert_eq!(seen_rx.try_recv().unwrap(), (EventKind::Key, 65));
        assert!(!session.is_active());
    }

    #[test]
    fn test_consumer_can_stop_its_own_session() {
        // Arrange
        let (session, injector) = mock_session(RestartPolicy::Reject);
        let session = Arc::new(session);
        let handle: Arc<OnceLock<Arc<CaptureSession>>> = Arc::new(OnceLock::new());
        let (tx, rx) = mpsc::channel();
        let consumer_handle = Arc::clone(&handle);
        session
            .start(move |_: EventKind, code: i64| {
                let was_active = consumer_handle.get().map(|s| s.stop());
                tx.send((code, was_active)).ok();
            })
            .unwrap();
        handle.set(Arc::clone(&session)).ok();

        // Act
        injector.inject(InputEvent::key(9));

        // Assert
        assert_eq!(rx.recv_timeout(WAIT).unwrap(), (9, Some(true)));
        assert!(!session.is_active());
        assert!(!injector.inject(InputEvent::key(10)));
    }

    /// Polls `condition` until it holds or `WAIT` elapses.
    fn eventually(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + WAIT;
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        false
    }

    #[test]
    fn test_session_whose_capture_thread_ended_is_not_active() {
        // Arrange
        let (session, injector) = mock_session(RestartPolicy::Reject);
        let (consumer, rx) = recording_consumer();
        session.start(consumer).unwrap();
        injector.inject(InputEvent::key(5));
        assert_eq!(rx.recv_timeout(WAIT).unwrap(), (EventKind::Key, 5));

        // Act: the device goes away without a stop request
        injector.unplug();

        // Assert
        assert!(eventually(|| !session.is_active()));
        assert_eq!(session.session_id(), None);
        assert!(!session.stop(), "nothing left to stop");
    }

    #[test]
    fn test_start_after_capture_thread_ended_is_not_rejected() {
        // Arrange
        let (session, injector) = mock_session(RestartPolicy::Reject);
        let first_id = session.start(|_: EventKind, _: i64| {}).unwrap();
        injector.unplug();
        assert!(eventually(|| injector.live_threads() == 0));
        thread::sleep(Duration::from_millis(50));

        // Act
        let (consumer, rx) = recording_consumer();
        let second_id = session.start(consumer).unwrap();
        injector.inject(InputEvent::mouse(1));

        // Assert
        assert_ne!(first_id, second_id);
        assert_eq!(rx.recv_timeout(WAIT).unwrap(), (EventKind::Mouse, 1));
        assert_eq!(injector.starts(), 2);
        session.stop_and_join(WAIT).unwrap();
    }

    #[test]
    fn test_drop_stops_active_session() {
        let (session, injector) = mock_session(RestartPolicy::Reject);
        session.start(|_: EventKind, _: i64| {}).unwrap();

        drop(session);

        assert!(!injector.inject(InputEvent::key(1)));
    }

    #[test]
    fn test_restart_policy_parses_lowercase() {
        #[derive(Deserialize)]
        struct Wrapper {
            policy: RestartPolicy,
        }

        let parsed: Wrapper = toml::from_str("policy = \"replace\"").unwrap();

        assert_eq!(parsed.policy, RestartPolicy::Replace);
    }
}
