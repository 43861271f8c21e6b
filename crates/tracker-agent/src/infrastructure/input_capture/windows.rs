//! Windows low-level keyboard and mouse hook backend.
//!
//! Installs `WH_KEYBOARD_LL` and `WH_MOUSE_LL` on a dedicated thread that then
//! runs a Win32 message loop.  Low-level hook callbacks are delivered on the
//! thread that installed the hook, so both callbacks find the event sink in a
//! thread-local set up by that same thread; no process-wide state is needed
//! and a later session gets a fresh sink.
//!
//! Stop posts `WM_QUIT` to the hook thread.  The loop returns, both hooks are
//! removed, and the thread exits.
//!
//! The callbacks never swallow input: every path ends in `CallNextHookEx`.
//!
//! # Safety
//!
//! This module uses `unsafe` code exclusively for Windows API FFI calls.
//! All `unsafe` blocks are annotated with `// SAFETY:` comments.

#![cfg(target_os = "windows")]

use std::cell::RefCell;

use tracing::{debug, error, trace, warn};
use tracker_core::classify::win32;
use tracker_core::{EventSink, InputEvent};
use windows::Win32::Foundation::{LPARAM, LRESULT, WPARAM};
use windows::Win32::System::Threading::GetCurrentThreadId;
use windows::Win32::UI::WindowsAndMessaging::{
    CallNextHookEx, DispatchMessageW, GetMessageW, PeekMessageW, PostThreadMessageW,
    SetWindowsHookExW, UnhookWindowsHookEx, HC_ACTION, HHOOK, KBDLLHOOKSTRUCT, MSG, PM_NOREMOVE,
    WH_KEYBOARD_LL, WH_MOUSE_LL, WM_QUIT, WM_USER,
};

use super::{
    spawn_with_handshake, BackendKind, CaptureBackend, CaptureError, CaptureHandle, Handshake,
    StopSignal,
};

/// Name given to the hook thread.
pub const HOOK_THREAD_NAME: &str = "tracker-win-hooks";

thread_local! {
    /// Sink for the hooks installed by the current thread.
    static HOOK_SINK: RefCell<Option<EventSink>> = const { RefCell::new(None) };
}

/// Capture backend built on low-level Windows hooks.
#[derive(Debug, Default)]
pub struct WindowsHookBackend;

impl WindowsHookBackend {
    pub fn new() -> Self {
        Self
    }
}

/// Posts `WM_QUIT` to the hook thread's message queue.
struct QuitHookThread {
    thread_id: u32,
}

impl StopSignal for QuitHookThread {
    fn signal_stop(&self) {
        // SAFETY: posting to a thread id is safe even if that thread has
        // already exited; the call then fails and we log it.
        let posted =
            unsafe { PostThreadMessageW(self.thread_id, WM_QUIT, WPARAM(0), LPARAM(0)) };
        if let Err(e) = posted {
            warn!(thread_id = self.thread_id, "failed to post WM_QUIT to hook thread: {e}");
        }
    }
}

impl CaptureBackend for WindowsHookBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Windows
    }

    fn start(&self, sink: EventSink) -> Result<CaptureHandle, CaptureError> {
        let (thread_id, thread, completion) =
            spawn_with_handshake(BackendKind::Windows, HOOK_THREAD_NAME, move |handshake| {
                HOOK_SINK.with(|slot| *slot.borrow_mut() = Some(sink));

                let Some(hooks) = install_hooks(handshake) else {
                    HOOK_SINK.with(|slot| slot.borrow_mut().take());
                    return;
                };
                run_message_loop();
                remove_hooks(hooks);
                HOOK_SINK.with(|slot| slot.borrow_mut().take());
                debug!("hook thread exiting");
            })?;

        Ok(CaptureHandle::new(
            BackendKind::Windows,
            Box::new(QuitHookThread { thread_id }),
            thread,
            completion,
        ))
    }
}

/// Installs both hooks and reports the outcome through `handshake`.
fn install_hooks(handshake: Handshake<u32>) -> Option<(HHOOK, HHOOK)> {
    // SAFETY: installs a global low-level hook whose procedure lives in this
    // module for the whole process lifetime.
    let keyboard = unsafe { SetWindowsHookExW(WH_KEYBOARD_LL, Some(keyboard_hook_proc), None, 0) };
    let keyboard = match keyboard {
        Ok(hook) => hook,
        Err(e) => {
            handshake.fail(format!("WH_KEYBOARD_LL installation failed: {e}"));
            return None;
        }
    };
    // SAFETY: as above.
    let mouse = unsafe { SetWindowsHookExW(WH_MOUSE_LL, Some(mouse_hook_proc), None, 0) };
    let mouse = match mouse {
        Ok(hook) => hook,
        Err(e) => {
            // SAFETY: `keyboard` was returned by SetWindowsHookExW above.
            unsafe { UnhookWindowsHookEx(keyboard).ok() };
            handshake.fail(format!("WH_MOUSE_LL installation failed: {e}"));
            return None;
        }
    };

    // Force creation of this thread's message queue so a WM_QUIT posted right
    // after startup is not lost.
    let mut msg = MSG::default();
    // SAFETY: `msg` is a valid out-parameter; PM_NOREMOVE leaves the queue untouched.
    unsafe {
        let _ = PeekMessageW(&mut msg, None, WM_USER, WM_USER, PM_NOREMOVE);
    }

    // SAFETY: trivially safe; returns the calling thread's id.
    handshake.ready(unsafe { GetCurrentThreadId() });
    Some((keyboard, mouse))
}

fn run_message_loop() {
    let mut msg = MSG::default();
    // SAFETY: Standard Win32 GetMessage/DispatchMessage loop pattern.  A
    // return of 0 means WM_QUIT, -1 means an error; both end the loop.
    unsafe {
        loop {
            let rc = GetMessageW(&mut msg, None, 0, 0).0;
            if rc == 0 {
                break;
            }
            if rc < 0 {
                error!("GetMessageW failed in hook thread");
                break;
            }
            DispatchMessageW(&msg);
        }
    }
}

fn remove_hooks((keyboard, mouse): (HHOOK, HHOOK)) {
    // SAFETY: both handles came from SetWindowsHookExW on this thread.
    unsafe {
        if let Err(e) = UnhookWindowsHookEx(keyboard) {
            warn!("failed to remove keyboard hook: {e}");
        }
        if let Err(e) = UnhookWindowsHookEx(mouse) {
            warn!("failed to remove mouse hook: {e}");
        }
    }
}

fn forward(event: InputEvent) {
    HOOK_SINK.with(|slot| {
        if let Some(sink) = slot.borrow().as_ref() {
            if sink.push(event).is_err() {
                trace!(%event, "event channel closed, dropping hook event");
            }
        }
    });
}

/// Low-level keyboard hook callback.
///
/// # Safety
///
/// Called by Windows on the hook thread while it is inside `GetMessageW`.
unsafe extern "system" fn keyboard_hook_proc(
    n_code: i32,
    w_param: WPARAM,
    l_param: LPARAM,
) -> LRESULT {
    if n_code == HC_ACTION as i32 {
        // SAFETY: l_param points to a KBDLLHOOKSTRUCT when n_code == HC_ACTION.
        let kbs = &*(l_param.0 as *const KBDLLHOOKSTRUCT);
        if let Some(event) = win32::classify_keyboard(w_param.0 as u32, kbs.vkCode) {
            forward(event);
        }
    }

    // SAFETY: Forward the event to the next hook in the chain.
    CallNextHookEx(None, n_code, w_param, l_param)
}

/// Low-level mouse hook callback.
///
/// # Safety
///
/// Called by Windows on the hook thread while it is inside `GetMessageW`.
unsafe extern "system" fn mouse_hook_proc(
    n_code: i32,
    w_param: WPARAM,
    l_param: LPARAM,
) -> LRESULT {
    if n_code == HC_ACTION as i32 {
        if let Some(event) = win32::classify_mouse(w_param.0 as u32) {
            forward(event);
        }
    }

    // SAFETY: Forward to the next hook in the chain.
    CallNextHookEx(None, n_code, w_param, l_param)
}
