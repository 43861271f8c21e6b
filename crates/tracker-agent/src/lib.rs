//! tracker-agent library entry point.
//!
//! Re-exports all public modules so that integration tests in `tests/`
//! and the binary entry point in `main.rs` share the same module tree.
//!
//! Hosts embedding the tracker normally only need [`start_tracking`] and
//! [`stop_tracking`].

pub mod application;
pub mod infrastructure;

pub use application::capture_session::{CaptureSession, RestartPolicy, SessionId};
pub use application::tracking::{start_tracking, stop_tracking, BoxedConsumer, Tracker};
pub use infrastructure::input_capture::{BackendKind, CaptureBackend, CaptureError};
