//! # tracker-core
//!
//! Shared foundation for input-tracker: the normalized input event, the
//! channel that carries events from a capture thread to the consumer, and the
//! per-OS classification rules.
//!
//! It has zero dependencies on OS APIs, so everything in here compiles and is
//! tested on every platform.  The platform backends live in `tracker-agent`.
//!
//! # Architecture overview (for beginners)
//!
//! input-tracker observes keyboard and mouse activity system-wide and reports
//! each event to one registered consumer as a `(kind, code)` pair.  Three very
//! different OS mechanisms produce the raw input (a Windows hook chain, a macOS
//! event tap, a Linux device file); this crate defines what they all reduce to:
//!
//! - **`domain`** – [`InputEvent`] and [`EventKind`], the only values that ever
//!   cross from a backend to a consumer.
//!
//! - **`channel`** – [`EventChannel`] and [`EventSink`]: an ordered, synchronous
//!   hand-off from the capture thread to a dedicated consumer dispatch thread.
//!
//! - **`classify`** – which raw OS records are keys, which are mouse events,
//!   and which are ignored.
//!
//! - **`completion`** – a thread completion signal with a bounded wait, used to
//!   join capture and dispatch threads during shutdown.

pub mod channel;
pub mod classify;
pub mod completion;
pub mod domain;

pub use channel::{ChannelError, EventChannel, EventConsumer, EventSink};
pub use completion::{completion_pair, Completion, CompletionGuard};
pub use domain::{EventKind, InputEvent};
