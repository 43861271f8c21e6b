//! Application layer: capture session lifecycle and the host control surface.
//!
//! # What is the "application" layer? (for beginners)
//!
//! The application layer sits between the shared event types in
//! `tracker-core` and the OS-facing infrastructure.  It decides *when*
//! capture runs and *who* receives events, but never calls an OS API itself:
//! it only sees the [`CaptureBackend`] trait, so every state transition here
//! is unit-testable with the mock backend.
//!
//! # Sub-modules
//!
//! - **`capture_session`** – The Inert/Active state machine that owns one
//!   backend run and its event channel, including the restart policy.
//!
//! - **`tracking`** – `start_tracking` / `stop_tracking`, the status-string
//!   surface a host application calls.
//!
//! [`CaptureBackend`]: crate::infrastructure::input_capture::CaptureBackend

pub mod capture_session;
pub mod tracking;
