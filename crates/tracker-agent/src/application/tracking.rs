//! Host control surface: `start_tracking` / `stop_tracking`.
//!
//! A [`Tracker`] wraps one [`CaptureSession`] and speaks in the status strings
//! a host shows to its user.  Hosts that do not want to own a `Tracker` can
//! use the free functions, which share one process-wide instance built from
//! the on-disk configuration on first use.

use std::sync::OnceLock;
use std::time::Duration;

use tracing::{info, warn};
use tracker_core::EventKind;

use crate::application::capture_session::CaptureSession;
use crate::infrastructure::input_capture::{create_backend, CaptureError};
use crate::infrastructure::storage::config::{self, AppConfig};

pub const STATUS_STARTED: &str = "Tracking started";
pub const STATUS_STOPPED: &str = "Tracking stopped";
pub const STATUS_NOT_ACTIVE: &str = "Tracking was not active";

/// A consumer as a host hands it over: possibly absent.
pub type BoxedConsumer = Box<dyn FnMut(EventKind, i64) + Send + 'static>;

pub struct Tracker {
    session: CaptureSession,
    join_timeout: Duration,
}

impl Tracker {
    pub fn new(session: CaptureSession, join_timeout: Duration) -> Self {
        Self {
            session,
            join_timeout,
        }
    }

    /// Builds the backend and session described by `config`.
    ///
    /// # Errors
    ///
    /// [`CaptureError::UnsupportedPlatform`] when the configured backend is not
    /// available in this build.  No OS resource is touched here.
    pub fn from_config(config: &AppConfig) -> Result<Self, CaptureError> {
        let backend = create_backend(config)?;
        let join_timeout = config.tracker.stop_join_timeout();
        let session = CaptureSession::new(backend, config.tracker.restart_policy)
            .with_join_timeout(join_timeout);
        Ok(Self::new(session, join_timeout))
    }

    pub fn session(&self) -> &CaptureSession {
        &self.session
    }

    /// Starts delivering events to `consumer`.
    ///
    /// # Errors
    ///
    /// [`CaptureError::InvalidArgument`] when `consumer` is `None`; the session
    /// is left untouched.  Otherwise whatever [`CaptureSession::start`] returns.
    pub fn start_tracking(&self, consumer: Option<BoxedConsumer>) -> Result<String, CaptureError> {
        let consumer = consumer.ok_or_else(|| {
            CaptureError::InvalidArgument("a consumer callback is required".to_string())
        })?;
        self.session.start(consumer)?;
        Ok(STATUS_STARTED.to_string())
    }

    /// Stops tracking.  Stopping while inert is not an error.
    pub fn stop_tracking(&self) -> Result<String, CaptureError> {
        if self.session.stop() {
            Ok(STATUS_STOPPED.to_string())
        } else {
            Ok(STATUS_NOT_ACTIVE.to_string())
        }
    }

    /// Like [`stop_tracking`](Self::stop_tracking), but also waits for the
    /// capture and dispatch threads, bounded by the configured timeout.
    pub fn shutdown(&self) -> Result<String, CaptureError> {
        if self.session.stop_and_join(self.join_timeout)? {
            Ok(STATUS_STOPPED.to_string())
        } else {
            Ok(STATUS_NOT_ACTIVE.to_string())
        }
    }
}

static GLOBAL: OnceLock<Tracker> = OnceLock::new();

/// The process-wide tracker, built from the platform config file on first use.
///
/// A config file that cannot be read or parsed is logged and replaced by
/// defaults.
pub fn global() -> Result<&'static Tracker, CaptureError> {
    if let Some(tracker) = GLOBAL.get() {
        return Ok(tracker);
    }
    let config = config::load_config().unwrap_or_else(|e| {
        warn!("using default configuration: {e}");
        AppConfig::default()
    });
    let tracker = Tracker::from_config(&config)?;
    // Losing a race here only discards an unstarted tracker.
    let tracker = GLOBAL.get_or_init(|| tracker);
    info!(backend = %tracker.session.backend_kind(), "process-wide tracker ready");
    Ok(tracker)
}

/// Starts tracking on the process-wide tracker.
pub fn start_tracking(consumer: Option<BoxedConsumer>) -> Result<String, CaptureError> {
    global()?.start_tracking(consumer)
}

/// Stops tracking on the process-wide tracker.
pub fn stop_tracking() -> Result<String, CaptureError> {
    match GLOBAL.get() {
        Some(tracker) => tracker.stop_tracking(),
        None => Ok(STATUS_NOT_ACTIVE.to_string()),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
