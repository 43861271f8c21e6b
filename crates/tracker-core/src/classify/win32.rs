//! Classification of Windows low-level hook notifications.
//!
//! `WH_KEYBOARD_LL` and `WH_MOUSE_LL` callbacks receive the window message that
//! describes the input in `wParam`.  Message identifiers are stable Win32 ABI
//! values (`winuser.h`), so they are listed here as plain constants and the
//! classification compiles and tests on every platform.

use crate::domain::InputEvent;

pub const WM_KEYDOWN: u32 = 0x0100;
pub const WM_KEYUP: u32 = 0x0101;
pub const WM_SYSKEYDOWN: u32 = 0x0104;
pub const WM_SYSKEYUP: u32 = 0x0105;

pub const WM_MOUSEMOVE: u32 = 0x0200;
pub const WM_LBUTTONDOWN: u32 = 0x0201;
pub const WM_LBUTTONUP: u32 = 0x0202;
pub const WM_RBUTTONDOWN: u32 = 0x0204;
pub const WM_RBUTTONUP: u32 = 0x0205;
pub const WM_MBUTTONDOWN: u32 = 0x0207;
pub const WM_MBUTTONUP: u32 = 0x0208;
pub const WM_MOUSEWHEEL: u32 = 0x020A;
pub const WM_XBUTTONDOWN: u32 = 0x020B;
pub const WM_XBUTTONUP: u32 = 0x020C;
pub const WM_MOUSEHWHEEL: u32 = 0x020E;

/// Classifies a keyboard hook notification.
///
/// The event code is the virtual-key code from `KBDLLHOOKSTRUCT::vkCode`.
pub fn classify_keyboard(message: u32, vk_code: u32) -> Option<InputEvent> {
    match message {
        WM_KEYDOWN | WM_KEYUP | WM_SYSKEYDOWN | WM_SYSKEYUP => Some(InputEvent::key(vk_code)),
        _ => None,
    }
}

/// Classifies a mouse hook notification.
///
/// Low-level mouse hooks carry no key code, so the event code is the mouse
/// message identifier itself (`WM_MOUSEMOVE`, `WM_LBUTTONDOWN`, ...).
pub fn classify_mouse(message: u32) -> Option<InputEvent> {
    match message {
        WM_MOUSEMOVE
        | WM_LBUTTONDOWN
        | WM_LBUTTONUP
        | WM_RBUTTONDOWN
        | WM_RBUTTONUP
        | WM_MBUTTONDOWN
        | WM_MBUTTONUP
        | WM_MOUSEWHEEL
        | WM_XBUTTONDOWN
        | WM_XBUTTONUP
        | WM_MOUSEHWHEEL => Some(InputEvent::mouse(message)),
        _ => None,
    }
}
