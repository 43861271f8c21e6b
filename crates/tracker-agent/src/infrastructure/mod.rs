//! Infrastructure layer for the capture agent.
//!
//! Contains OS-facing adapters: the per-platform input capture backends and
//! file-system storage for the configuration.
//!
//! **Dependency rule**: the `application` layer only reaches in here through
//! the `CaptureBackend` trait, its error type and the config schema.

pub mod input_capture;
pub mod storage;
