//! macOS Quartz event-tap backend.
//!
//! Creates a listen-only `CGEventTap` at the session level on a dedicated
//! thread and services it from that thread's `CFRunLoop`.  The tap only
//! observes: the callback always hands the event back unchanged.
//!
//! Stop clears the running flag and calls `CFRunLoopStop` on the published
//! run loop.  The loop runs in bounded slices, so a stop that lands before the
//! loop has started is still seen on the next slice.  The thread then disables
//! the tap, removes its run-loop source and releases it.
//!
//! When the OS disables the tap (callback too slow, or user input), the
//! callback re-enables it and carries on.
//!
//! # Safety
//!
//! Raw FFI is used for `CGEventTapCreate` so the callback can receive the
//! event type as a plain `u32`; the disabled-tap notifications are not valid
//! values of the `CGEventType` enum.

#![cfg(target_os = "macos")]

use std::cell::Cell;
use std::ffi::c_void;
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use core_foundation::base::TCFType;
use core_foundation::mach_port::{CFMachPort, CFMachPortRef};
use core_foundation::runloop::{kCFRunLoopDefaultMode, CFRunLoop, CFRunLoopStop};
use core_graphics::event::{CGEventTapLocation, CGEventTapOptions, CGEventTapPlacement};
use tracing::{debug, info, trace, warn};
use tracker_core::classify::quartz;
use tracker_core::EventSink;

use super::{
    spawn_with_handshake, BackendKind, CaptureBackend, CaptureError, CaptureHandle, Handshake,
    StopSignal,
};

/// Name given to the event-tap thread.
pub const TAP_THREAD_NAME: &str = "tracker-event-tap";

/// `kCGKeyboardEventKeycode`.
const KEYBOARD_EVENT_KEYCODE: u32 = 9;

/// Longest single `CFRunLoopRunInMode` slice before the running flag is re-read.
const RUN_SLICE: Duration = Duration::from_millis(500);

type CGEventTapCallBack = unsafe extern "C" fn(
    proxy: *mut c_void,
    event_type: u32,
    event: *mut c_void,
    user_info: *mut c_void,
) -> *mut c_void;

#[link(name = "CoreGraphics", kind = "framework")]
extern "C" {
    fn CGEventTapCreate(
        tap: CGEventTapLocation,
        place: CGEventTapPlacement,
        options: CGEventTapOptions,
        events_of_interest: u64,
        callback: CGEventTapCallBack,
        user_info: *mut c_void,
    ) -> CFMachPortRef;

    fn CGEventTapEnable(tap: CFMachPortRef, enable: bool);

    fn CGEventGetIntegerValueField(event: *mut c_void, field: u32) -> i64;
}

/// State reachable from the tap callback.  Lives on the tap thread only.
struct TapContext {
    sink: EventSink,
    tap: Cell<CFMachPortRef>,
}

/// Capture backend built on a Quartz event tap.
#[derive(Debug, Default)]
pub struct EventTapBackend;

impl EventTapBackend {
    pub fn new() -> Self {
        Self
    }
}

struct StopRunLoop {
    running: Arc<AtomicBool>,
    run_loop: CFRunLoop,
}

impl StopSignal for StopRunLoop {
    fn signal_stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        // SAFETY: the run loop reference is retained by `self.run_loop`.
        unsafe { CFRunLoopStop(self.run_loop.as_concrete_TypeRef()) };
    }
}

impl CaptureBackend for EventTapBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::MacOs
    }

    fn start(&self, sink: EventSink) -> Result<CaptureHandle, CaptureError> {
        let running = Arc::new(AtomicBool::new(true));
        let thread_running = Arc::clone(&running);

        let (run_loop, thread, completion) =
            spawn_with_handshake(BackendKind::MacOs, TAP_THREAD_NAME, move |handshake| {
                run_tap(sink, &thread_running, handshake);
            })?;

        Ok(CaptureHandle::new(
            BackendKind::MacOs,
            Box::new(StopRunLoop { running, run_loop }),
            thread,
            completion,
        ))
    }
}

/// Body of the tap thread.
fn run_tap(sink: EventSink, running: &AtomicBool, handshake: Handshake<CFRunLoop>) {
    let context = Box::into_raw(Box::new(TapContext {
        sink,
        tap: Cell::new(ptr::null_mut()),
    }));

    // SAFETY: `context` stays valid until it is reclaimed at the end of this
    // function, after the tap has been disabled and released.
    let tap_ref = unsafe {
        CGEventTapCreate(
            CGEventTapLocation::Session,
            CGEventTapPlacement::HeadInsertEventTap,
            CGEventTapOptions::ListenOnly,
            quartz::event_mask(),
            tap_callback,
            context.cast(),
        )
    };

    if tap_ref.is_null() {
        // SAFETY: no tap references `context`.
        drop(unsafe { Box::from_raw(context) });
        handshake.fail("CGEventTapCreate returned null; check Input Monitoring permission");
        return;
    }

    // SAFETY: `tap_ref` is a +1 reference we now own.
    let tap = unsafe { CFMachPort::wrap_under_create_rule(tap_ref) };
    // SAFETY: the context is only touched from this thread.
    unsafe { (*context).tap.set(tap_ref) };

    let source = match tap.create_runloop_source(0) {
        Ok(source) => source,
        Err(_) => {
            drop(tap);
            // SAFETY: the tap has been released and can no longer call back.
            drop(unsafe { Box::from_raw(context) });
            handshake.fail("failed to create run-loop source for the event tap");
            return;
        }
    };

    let run_loop = CFRunLoop::get_current();
    // SAFETY: kCFRunLoopDefaultMode is an immutable CF constant.
    let mode = unsafe { kCFRunLoopDefaultMode };
    run_loop.add_source(&source, mode);
    // SAFETY: `tap_ref` is retained by `tap`.
    unsafe { CGEventTapEnable(tap_ref, true) };

    info!("event tap installed");
    handshake.ready(run_loop.clone());

    while running.load(Ordering::SeqCst) {
        let _ = CFRunLoop::run_in_mode(mode, RUN_SLICE, false);
    }

    // SAFETY: `tap_ref` is still retained by `tap`.
    unsafe { CGEventTapEnable(tap_ref, false) };
    run_loop.remove_source(&source, mode);
    drop(source);
    drop(tap);
    // SAFETY: the tap is disabled and released; no callback can run.
    drop(unsafe { Box::from_raw(context) });
    debug!("event tap thread exiting");
}

/// Tap callback.  Always returns `event` so input reaches its destination.
///
/// # Safety
///
/// Called by Quartz on the tap thread while it is inside the run loop, with
/// `user_info` pointing at the live [`TapContext`].
unsafe extern "C" fn tap_callback(
    _proxy: *mut c_void,
    event_type: u32,
    event: *mut c_void,
    user_info: *mut c_void,
) -> *mut c_void {
    let context = &*(user_info as *const TapContext);

    if quartz::is_tap_disabled(event_type) {
        warn!(event_type, "event tap disabled by the OS, re-enabling");
        let tap = context.tap.get();
        if !tap.is_null() {
            CGEventTapEnable(tap, true);
        }
        return event;
    }

    let keycode = if !event.is_null() && quartz::KEY_EVENT_TYPES.contains(&event_type) {
        CGEventGetIntegerValueField(event, KEYBOARD_EVENT_KEYCODE)
    } else {
        0
    };

    if let Some(input) = quartz::classify(event_type, keycode) {
        if context.sink.push(input).is_err() {
            trace!(%input, "event channel closed, dropping tap event");
        }
    }

    event
}
