//! Platform capture backends.
//!
//! Each backend acquires one OS resource (a hook pair on Windows, an event tap
//! on macOS, an evdev device node on Linux), runs a dedicated capture thread
//! that services it, and forwards every classified event into an
//! [`EventSink`].  Backends never call the consumer themselves; the event
//! channel does that on its own dispatch thread.
//!
//! # Lifecycle
//!
//! [`CaptureBackend::start`] returns only once the OS resource is acquired, so
//! an acquisition failure comes back as [`CaptureError::Acquire`] and no
//! thread is left running.  The returned [`CaptureHandle`] is the only way to
//! stop the thread: [`CaptureHandle::stop`] signals it, [`CaptureHandle::join`]
//! waits for it with a bound.
//!
//! # Testability
//!
//! [`mock::MockBackend`] implements the same trait with a plain thread and an
//! injector, so the session and control surface are tested on every OS.

use std::fmt;
use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};
use tracker_core::{completion_pair, ChannelError, Completion, CompletionGuard, EventSink};

use crate::infrastructure::storage::config::AppConfig;

pub mod mock;

#[cfg(target_os = "linux")]
pub mod linux;

#[cfg(target_os = "macos")]
pub mod macos;

#[cfg(target_os = "windows")]
pub mod windows;

/// The OS mechanism a backend is built on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// Windows low-level hooks.
    Windows,
    /// macOS Quartz event tap.
    MacOs,
    /// Linux evdev device node.
    Linux,
    /// In-process test double.
    Mock,
}

impl BackendKind {
    /// Maps a `std::env::consts::OS` value to the backend native to it.
    pub fn for_os(os: &str) -> Option<Self> {
        match os {
            "windows" => Some(Self::Windows),
            "macos" => Some(Self::MacOs),
            "linux" => Some(Self::Linux),
            _ => None,
        }
    }

    /// The backend native to the running OS, if there is one.
    pub fn current() -> Option<Self> {
        Self::for_os(std::env::consts::OS)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Windows => "windows",
            Self::MacOs => "macos",
            Self::Linux => "linux",
            Self::Mock => "mock",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Backend selection as written in the configuration file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendChoice {
    /// Pick the backend native to the running OS.
    #[default]
    Auto,
    Windows,
    Macos,
    Linux,
}

impl BackendChoice {
    /// Resolves the choice against the running OS.
    pub fn resolve(self) -> Result<BackendKind, CaptureError> {
        match self {
            Self::Auto => BackendKind::current().ok_or_else(|| {
                CaptureError::UnsupportedPlatform(format!(
                    "no capture backend for OS '{}'",
                    std::env::consts::OS
                ))
            }),
            Self::Windows => Ok(BackendKind::Windows),
            Self::Macos => Ok(BackendKind::MacOs),
            Self::Linux => Ok(BackendKind::Linux),
        }
    }
}

/// Error type for capture and session operations.
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    /// The backend could not acquire its OS resource.  No thread was left running.
    #[error("{backend} backend failed to acquire its input source: {reason}")]
    Acquire { backend: BackendKind, reason: String },
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("a capture session is already active")]
    AlreadyActive,
    #[error("platform not supported: {0}")]
    UnsupportedPlatform(String),
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error("capture threads did not finish within {0:?}")]
    JoinTimeout(Duration),
}

/// Wakes a capture thread so it leaves its OS loop.
///
/// Called at most once per handle, from whichever thread stops the session.
#[cfg_attr(test, mockall::automock)]
pub trait StopSignal: Send {
    fn signal_stop(&self);
}

/// A source of raw OS input that can be started against an [`EventSink`].
///
/// Implementations must not return from `start` until the OS resource is
/// acquired or acquisition has failed.
pub trait CaptureBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Acquires the OS resource and starts the capture thread.
    fn start(&self, sink: EventSink) -> Result<CaptureHandle, CaptureError>;
}

/// Owner of a running capture thread.
///
/// Dropping the handle signals stop but does not wait; call
/// [`join`](Self::join) for a bounded wait.
pub struct CaptureHandle {
    kind: BackendKind,
    stopper: Box<dyn StopSignal>,
    thread: Option<JoinHandle<()>>,
    completion: Completion,
    stop_signalled: bool,
}

impl CaptureHandle {
    pub fn new(
        kind: BackendKind,
        stopper: Box<dyn StopSignal>,
        thread: JoinHandle<()>,
        completion: Completion,
    ) -> Self {
        Self {
            kind,
            stopper,
            thread: Some(thread),
            completion,
            stop_signalled: false,
        }
    }

    pub fn kind(&self) -> BackendKind {
        self.kind
    }

    /// Signals the capture thread to stop.  Idempotent and non-blocking.
    pub fn stop(&mut self) {
        if self.stop_signalled {
            return;
        }
        self.stop_signalled = true;
        debug!(backend = %self.kind, "signalling capture thread to stop");
        self.stopper.signal_stop();
    }

    /// Waits up to `timeout` for the capture thread to exit.
    ///
    /// Returns `false` on timeout; the thread is left detached in that case.
    pub fn join(&mut self, timeout: Duration) -> bool {
        if !self.completion.wait(timeout) {
            warn!(backend = %self.kind, ?timeout, "capture thread did not exit in time");
            return false;
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!(backend = %self.kind, "capture thread panicked");
            }
        }
        true
    }

    /// Returns `true` once the capture thread has exited.
    pub fn is_finished(&self) -> bool {
        self.completion.is_done()
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Reports the outcome of resource acquisition from a capture thread.
///
/// Dropping it without reporting counts as a failure.
pub struct Handshake<T> {
    tx: mpsc::SyncSender<Result<T, String>>,
}

impl<T> Handshake<T> {
    /// The OS resource is live; `value` lets the caller stop the thread later.
    pub fn ready(self, value: T) {
        self.tx.send(Ok(value)).ok();
    }

    pub fn fail(self, reason: impl Into<String>) {
        self.tx.send(Err(reason.into())).ok();
    }
}

/// Spawns a named capture thread that acquires its OS resource itself.
///
/// Blocks until `body` calls [`Handshake::ready`] or [`Handshake::fail`].  On
/// failure the thread is joined before the error is returned.  The completion
/// guard is dropped when `body` returns, panicking or not.
pub(crate) fn spawn_with_handshake<T, F>(
    kind: BackendKind,
    name: &str,
    body: F,
) -> Result<(T, JoinHandle<()>, Completion), CaptureError>
where
    T: Send + 'static,
    F: FnOnce(Handshake<T>) + Send + 'static,
{
    let (tx, rx) = mpsc::sync_channel(1);
    let (guard, completion) = completion_pair();

    let thread = thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            let _guard: CompletionGuard = guard;
            body(Handshake { tx });
        })
        .map_err(|e| CaptureError::Acquire {
            backend: kind,
            reason: format!("failed to spawn capture thread: {e}"),
        })?;

    let outcome = rx
        .recv()
        .unwrap_or_else(|_| Err("capture thread exited during startup".to_string()));

    match outcome {
        Ok(value) => Ok((value, thread, completion)),
        Err(reason) => {
            if thread.join().is_err() {
                error!(backend = %kind, "capture thread panicked during startup");
            }
            Err(CaptureError::Acquire {
                backend: kind,
                reason,
            })
        }
    }
}

/// Builds the backend named by the configuration.
///
/// Backends for other operating systems are not compiled into this build, so
/// selecting one yields [`CaptureError::UnsupportedPlatform`].
pub fn create_backend(config: &AppConfig) -> Result<Box<dyn CaptureBackend>, CaptureError> {
    let kind = config.tracker.backend.resolve()?;
    debug!(backend = %kind, "creating capture backend");
    match kind {
        BackendKind::Windows => windows_backend(),
        BackendKind::MacOs => macos_backend(),
        BackendKind::Linux => linux_backend(config),
        BackendKind::Mock => Ok(Box::new(mock::MockBackend::new().0)),
    }
}

fn not_in_this_build(kind: BackendKind) -> CaptureError {
    CaptureError::UnsupportedPlatform(format!(
        "{kind} backend is not available on {}",
        std::env::consts::OS
    ))
}

#[cfg(target_os = "windows")]
fn windows_backend() -> Result<Box<dyn CaptureBackend>, CaptureError> {
    Ok(Box::new(windows::WindowsHookBackend::new()))
}

#[cfg(not(target_os = "windows"))]
fn windows_backend() -> Result<Box<dyn CaptureBackend>, CaptureError> {
    Err(not_in_this_build(BackendKind::Windows))
}

#[cfg(target_os = "macos")]
fn macos_backend() -> Result<Box<dyn CaptureBackend>, CaptureError> {
    Ok(Box::new(macos::EventTapBackend::new()))
}

#[cfg(not(target_os = "macos"))]
fn macos_backend() -> Result<Box<dyn CaptureBackend>, CaptureError> {
    Err(not_in_this_build(BackendKind::MacOs))
}

#[cfg(target_os = "linux")]
fn linux_backend(config: &AppConfig) -> Result<Box<dyn CaptureBackend>, CaptureError> {
    Ok(Box::new(linux::EvdevBackend::from_config(&config.linux)))
}

#[cfg(not(target_os = "linux"))]
fn linux_backend(_config: &AppConfig) -> Result<Box<dyn CaptureBackend>, CaptureError> {
    Err(not_in_this_build(BackendKind::Linux))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_for_os_maps_known_operating_systems() {
        assert_eq!(BackendKind::for_os("windows"), Some(BackendKind::Windows));
        assert_eq!(BackendKind::for_os("macos"), Some(BackendKind::MacOs));
        assert_eq!(BackendKind::for_os("linux"), Some(BackendKind::Linux));
        assert_eq!(BackendKind::for_os("freebsd"), None);
    }

    #[test]
    fn test_explicit_choice_resolves_without_consulting_os() {
        assert_eq!(BackendChoice::Linux.resolve().unwrap(), BackendKind::Linux);
        assert_eq!(BackendChoice::Macos.resolve().unwrap(), BackendKind::MacOs);
    }

    #[test]
    fn test_auto_choice_matches_current_os() {
        match BackendKind::current() {
            Some(kind) => assert_eq!(BackendChoice::Auto.resolve().unwrap(), kind),
            None => assert!(matches!(
                BackendChoice::Auto.resolve(),
                Err(CaptureError::UnsupportedPlatform(_))
            )),
        }
    }

    #[test]
    fn test_backend_for_foreign_os_is_unsupported() {
        let foreign = if cfg!(target_os = "windows") {
            BackendChoice::Linux
        } else {
            BackendChoice::Windows
        };
        let mut config = AppConfig::default();
        config.tracker.backend = foreign;

        let result = create_backend(&config);

        assert!(matches!(result, Err(CaptureError::UnsupportedPlatform(_))));
    }

    #[test]
    fn test_handshake_failure_joins_thread_and_reports_reason() {
        let result = spawn_with_handshake::<(), _>(BackendKind::Mock, "test-capture", |hs| {
            hs.fail("device busy");
        });

        match result {
            Err(CaptureError::Acquire { backend, reason }) => {
                assert_eq!(backend, BackendKind::Mock);
                assert_eq!(reason, "device busy");
            }
            other => panic!("expected Acquire error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_handshake_dropped_without_report_is_a_failure() {
        let result = spawn_with_handshake::<(), _>(BackendKind::Mock, "test-capture", drop);

        assert!(matches!(result, Err(CaptureError::Acquire { .. })));
    }

    #[test]
    fn test_capture_handle_stop_is_idempotent() {
        // Arrange
        let mut stopper = MockStopSignal::new();
        stopper.expect_signal_stop().times(1).return_const(());
        let (value, thread, completion) =
            spawn_with_handshake(BackendKind::Mock, "test-capture", |hs| hs.ready(7u32)).unwrap();
        let mut handle =
            CaptureHandle::new(BackendKind::Mock, Box::new(stopper), thread, completion);

        // Act
        handle.stop();
        handle.stop();
        let joined = handle.join(Duration::from_secs(5));
        drop(handle);

        // Assert – the mock verifies the single call when it is dropped
        assert_eq!(value, 7);
        assert!(joined);
    }
}
