//! The normalized input event produced by every capture backend.
//!
//! Backends observe wildly different OS records (a `KBDLLHOOKSTRUCT`, a
//! `CGEventRef`, a kernel `input_event`), but all of them collapse to the same
//! two-field value before it crosses the event channel: a coarse [`EventKind`]
//! and the OS-native `code`.  The code is never translated to a portable key
//! table; a consumer that cares about which key was pressed must interpret it
//! per OS.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Coarse classification of an observed input event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// A key press or key release.
    Key,
    /// Pointer motion, a pointer button, or a scroll wheel.
    Mouse,
}

impl EventKind {
    /// Returns the wire name handed to consumers: `"key"` or `"mouse"`.
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Key => "key",
            EventKind::Mouse => "mouse",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single captured input event.
///
/// Created by a backend at the moment of observation and consumed exactly
/// once by the event channel.  It is `Copy` so that handing it across threads
/// never involves an allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputEvent {
    /// `"key"` or `"mouse"` when serialized.
    #[serde(rename = "type")]
    pub kind: EventKind,
    /// OS-native code, unchanged.
    pub code: i64,
}

impl InputEvent {
    /// Creates a key event carrying the OS-native key code.
    pub fn key(code: impl Into<i64>) -> Self {
        Self {
            kind: EventKind::Key,
            code: code.into(),
        }
    }

    /// Creates a mouse event carrying the OS-native code.
    pub fn mouse(code: impl Into<i64>) -> Self {
        Self {
            kind: EventKind::Mouse,
            code: code.into(),
        }
    }
}

impl fmt::Display for InputEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.kind, self.code)
    }
}
