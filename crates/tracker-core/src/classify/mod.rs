//! Per-OS classification of raw input records into [`InputEvent`]s.
//!
//! Every backend follows the same normalization rule: pointer motion, pointer
//! buttons and scrolling become [`EventKind::Mouse`], key presses and releases
//! become [`EventKind::Key`], and the OS-native code is carried unchanged.
//! What differs per OS is only *which raw record* means what, so that part
//! lives here as pure functions that compile on every platform.  The OS
//! backends in `tracker-agent` call into these at the FFI boundary.
//!
//! [`InputEvent`]: crate::domain::InputEvent
//! [`EventKind::Mouse`]: crate::domain::EventKind::Mouse
//! [`EventKind::Key`]: crate::domain::EventKind::Key

pub mod evdev;
pub mod quartz;
pub mod win32;
