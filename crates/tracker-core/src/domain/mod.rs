//! Domain types shared by every capture backend.
//!
//! Nothing in here touches an OS API, so the types compile and test on every
//! platform regardless of which backend the running host ends up using.

pub mod event;

pub use event::{EventKind, InputEvent};
