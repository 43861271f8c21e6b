//! Classification of macOS Quartz event-tap callbacks.
//!
//! The tap callback receives a raw `CGEventType` value.  Key events are
//! reported with the `kCGKeyboardEventKeycode` field; pointer events carry no
//! key code, so the event type value itself is used as the code.
//!
//! Values from `CGEventTypes.h`.

use crate::domain::InputEvent;

pub const LEFT_MOUSE_DOWN: u32 = 1;
pub const LEFT_MOUSE_UP: u32 = 2;
pub const RIGHT_MOUSE_DOWN: u32 = 3;
pub const RIGHT_MOUSE_UP: u32 = 4;
pub const MOUSE_MOVED: u32 = 5;
pub const LEFT_MOUSE_DRAGGED: u32 = 6;
pub const RIGHT_MOUSE_DRAGGED: u32 = 7;
pub const KEY_DOWN: u32 = 10;
pub const KEY_UP: u32 = 11;
pub const FLAGS_CHANGED: u32 = 12;
pub const SCROLL_WHEEL: u32 = 22;
pub const OTHER_MOUSE_DOWN: u32 = 25;
pub const OTHER_MOUSE_UP: u32 = 26;
pub const OTHER_MOUSE_DRAGGED: u32 = 27;
pub const TAP_DISABLED_BY_TIMEOUT: u32 = 0xFFFF_FFFE;
pub const TAP_DISABLED_BY_USER_INPUT: u32 = 0xFFFF_FFFF;

/// Event types the tap subscribes to.
pub const KEY_EVENT_TYPES: [u32; 3] = [KEY_DOWN, KEY_UP, FLAGS_CHANGED];

/// Pointer event types the tap subscribes to.
pub const MOUSE_EVENT_TYPES: [u32; 11] = [
    LEFT_MOUSE_DOWN,
    LEFT_MOUSE_UP,
    RIGHT_MOUSE_DOWN,
    RIGHT_MOUSE_UP,
    MOUSE_MOVED,
    LEFT_MOUSE_DRAGGED,
    RIGHT_MOUSE_DRAGGED,
    SCROLL_WHEEL,
    OTHER_MOUSE_DOWN,
    OTHER_MOUSE_UP,
    OTHER_MOUSE_DRAGGED,
];

/// Builds the `CGEventMask` covering every key and pointer event type.
pub fn event_mask() -> u64 {
    KEY_EVENT_TYPES
        .iter()
        .chain(MOUSE_EVENT_TYPES.iter())
        .fold(0u64, |mask, &ty| mask | (1u64 << ty))
}

/// Returns `true` for the notifications sent when the OS disabled the tap.
pub fn is_tap_disabled(event_type: u32) -> bool {
    matches!(event_type, TAP_DISABLED_BY_TIMEOUT | TAP_DISABLED_BY_USER_INPUT)
}

/// Classifies a tap callback.
///
/// `keycode` is only consulted for key event types.
pub fn classify(event_type: u32, keycode: i64) -> Option<InputEvent> {
    if KEY_EVENT_TYPES.contains(&event_type) {
        Some(InputEvent::key(keycode))
    } else if MOUSE_EVENT_TYPES.contains(&event_type) {
        Some(InputEvent::mouse(event_type))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_mask_covers_keys_and_pointer() {
        let mask = event_mask();

        assert_ne!(mask & (1 << KEY_DOWN), 0);
        assert_ne!(mask & (1 << FLAGS_CHANGED), 0);
        assert_ne!(mask & (1 << SCROLL_WHEEL), 0);
        assert_ne!(mask & (1 << OTHER_MOUSE_DRAGGED), 0);
        // NX_SYSDEFINED (14) is not requested
        assert_eq!(mask & (1 << 14), 0);
    }

    #[test]
    fn test_key_types_report_keycode() {
        assert_eq!(classify(KEY_DOWN, 0), Some(InputEvent::key(0)));
        assert_eq!(classify(KEY_UP, 53), Some(InputEvent::key(53)));
        assert_eq!(classify(FLAGS_CHANGED, 56), Some(InputEvent::key(56)));
    }

    #[test]
    fn test_pointer_types_report_event_type() {
        assert_eq!(classify(MOUSE_MOVED, 99), Some(InputEvent::mouse(MOUSE_MOVED)));
        assert_eq!(classify(SCROLL_WHEEL, 0), Some(InputEvent::mouse(SCROLL_WHEEL)));
    }

    #[test]
    fn test_tap_disabled_notifications_are_not_events() {
        assert!(is_tap_disabled(TAP_DISABLED_BY_TIMEOUT));
        assert!(is_tap_disabled(TAP_DISABLED_BY_USER_INPUT));
        assert_eq!(classify(TAP_DISABLED_BY_TIMEOUT, 0), None);
        assert!(!is_tap_disabled(KEY_DOWN));
    }
}
