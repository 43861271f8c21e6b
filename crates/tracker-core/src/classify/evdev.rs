//! Linux evdev event classification.
//!
//! The agent reads devices through the `evdev` crate; this module only holds
//! the `(type, code)` rules so they can be tested on every OS.  Constants come
//! from `linux/input-event-codes.h`.

use crate::domain::InputEvent;

/// Synchronization marker between event packets.
pub const EV_SYN: u16 = 0x00;
/// Key and button state change.
pub const EV_KEY: u16 = 0x01;
/// Relative axis change (mouse motion, wheel).
pub const EV_REL: u16 = 0x02;
/// Absolute axis change (touchpad, tablet).
pub const EV_ABS: u16 = 0x03;
/// Miscellaneous (scan codes).
pub const EV_MSC: u16 = 0x04;

/// First pointer button (`BTN_LEFT`).
pub const BTN_MOUSE: u16 = 0x110;
/// Last pointer button (`BTN_TASK`).
pub const BTN_TASK: u16 = 0x117;

/// Relative X axis.
pub const REL_X: u16 = 0x00;
/// Relative Y axis.
pub const REL_Y: u16 = 0x01;
/// Vertical wheel.
pub const REL_WHEEL: u16 = 0x08;

/// Classifies one evdev event by its type and code.
///
/// - `EV_KEY` is a key event, except the pointer-button range
///   `BTN_MOUSE..=BTN_TASK`, which the kernel also reports as `EV_KEY` and is
///   a mouse event.
/// - `EV_REL` and `EV_ABS` are mouse events.
/// - Everything else (`EV_SYN`, `EV_MSC`, LEDs, ...) is ignored.
pub fn classify(event_type: u16, code: u16) -> Option<InputEvent> {
    match event_type {
        EV_KEY if (BTN_MOUSE..=BTN_TASK).contains(&code) => Some(InputEvent::mouse(code)),
        EV_KEY => Some(InputEvent::key(code)),
        EV_REL | EV_ABS => Some(InputEvent::mouse(code)),
        _ => None,
    }
}
