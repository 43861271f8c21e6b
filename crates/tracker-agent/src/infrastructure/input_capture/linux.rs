//! Linux evdev capture backend.
//!
//! Reads one `/dev/input/eventN` node through the `evdev` crate on a dedicated
//! thread.  The node is resolved and opened on the caller's thread at every
//! start, before the capture thread is spawned, so a device that appears after
//! the backend was built is still found and a missing device or a permission
//! error is reported synchronously without leaving a thread behind.
//!
//! The descriptor is switched to non-blocking mode and the thread waits in
//! `poll(2)` with a timeout, so a stop request is honoured within one poll
//! interval even on a device that produces no input.
//!
//! # Safety
//!
//! `unsafe` is limited to the `fcntl(2)` and `poll(2)` calls on the device's
//! descriptor, which stays open for as long as the `Device` it belongs to.

#![cfg(target_os = "linux")]

use std::fs;
use std::io;
use std::os::fd::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use evdev::{Device, EventType};
use tracing::{debug, error, info, trace, warn};
use tracker_core::classify::evdev as table;
use tracker_core::{completion_pair, CompletionGuard, EventSink, InputEvent};

use super::{BackendKind, CaptureBackend, CaptureError, CaptureHandle, StopSignal};
use crate::infrastructure::storage::config::LinuxConfig;

/// Name given to the evdev capture thread.
pub const EVDEV_THREAD_NAME: &str = "tracker-evdev";

/// Picks the device node to read.
///
/// An explicit `device_path` always wins.  Otherwise the lowest-numbered
/// `eventN` node in `input_dir` is used, falling back to `event0` when the
/// directory cannot be listed or has no such node.
pub fn resolve_device(input_dir: &Path, device_path: Option<&Path>) -> PathBuf {
    if let Some(path) = device_path {
        return path.to_path_buf();
    }

    let lowest = fs::read_dir(input_dir).ok().and_then(|entries| {
        entries
            .filter_map(Result::ok)
            .filter_map(|entry| {
                let index = event_index(entry.file_name().to_str()?)?;
                Some((index, entry.path()))
            })
            .min_by_key(|(index, _)| *index)
            .map(|(_, path)| path)
    });

    lowest.unwrap_or_else(|| input_dir.join("event0"))
}

/// `N` for a node named `eventN`, where `N` is plain decimal digits.
fn event_index(name: &str) -> Option<u32> {
    let digits = name.strip_prefix("event")?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Maps an evdev event onto the classification table.
fn classify(event: &evdev::InputEvent) -> Option<InputEvent> {
    let event_type = match event.event_type() {
        EventType::KEY => table::EV_KEY,
        EventType::RELATIVE => table::EV_REL,
        EventType::ABSOLUTE => table::EV_ABS,
        _ => return None,
    };
    table::classify(event_type, event.code())
}

/// Capture backend reading one evdev device node.
#[derive(Debug, Clone)]
pub struct EvdevBackend {
    input_dir: PathBuf,
    device_path: Option<PathBuf>,
    poll_interval: Duration,
}

impl EvdevBackend {
    /// A backend that always reads `device`.
    pub fn new(device: PathBuf, poll_interval: Duration) -> Self {
        Self {
            input_dir: device
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("/dev/input")),
            device_path: Some(device),
            poll_interval,
        }
    }

    /// Builds the backend from the `[linux]` configuration section.  The node
    /// itself is chosen at each start.
    pub fn from_config(config: &LinuxConfig) -> Self {
        Self {
            input_dir: config.input_dir.clone(),
            device_path: config.device_path.clone(),
            poll_interval: Duration::from_millis(config.poll_interval_ms.max(1)),
        }
    }

    /// The node the next start would open.
    pub fn device(&self) -> PathBuf {
        resolve_device(&self.input_dir, self.device_path.as_deref())
    }
}

struct EvdevStop(Arc<AtomicBool>);

impl StopSignal for EvdevStop {
    fn signal_stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

impl CaptureBackend for EvdevBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Linux
    }

    fn start(&self, sink: EventSink) -> Result<CaptureHandle, CaptureError> {
        let path = self.device();
        let acquire = |e: io::Error| CaptureError::Acquire {
            backend: BackendKind::Linux,
            reason: format!("cannot open {}: {e}", path.display()),
        };
        let device = Device::open(&path).map_err(acquire)?;
        set_nonblocking(device.as_raw_fd()).map_err(acquire)?;
        info!(
            device = %path.display(),
            name = device.name().unwrap_or("unnamed"),
            "evdev device opened"
        );

        let stop = Arc::new(AtomicBool::new(false));
        let (guard, completion) = completion_pair();
        let poll_interval = self.poll_interval;
        let thread_stop = Arc::clone(&stop);

        let thread = thread::Builder::new()
            .name(EVDEV_THREAD_NAME.to_string())
            .spawn(move || {
                let _guard: CompletionGuard = guard;
                read_loop(device, &path, poll_interval, &thread_stop, &sink);
            })
            .map_err(|e| CaptureError::Acquire {
                backend: BackendKind::Linux,
                reason: format!("failed to spawn capture thread: {e}"),
            })?;

        Ok(CaptureHandle::new(
            BackendKind::Linux,
            Box::new(EvdevStop(stop)),
            thread,
            completion,
        ))
    }
}

fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    // SAFETY: `fd` belongs to a `Device` that outlives both calls.
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: as above; only the status flags are changed.
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// What a single `poll(2)` wait produced.
enum Readiness {
    Readable,
    Idle,
    Closed,
}

fn wait_readable(fd: RawFd, timeout: Duration) -> io::Result<Readiness> {
    let mut pfd = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };
    let timeout_ms = libc::c_int::try_from(timeout.as_millis()).unwrap_or(libc::c_int::MAX);

    // SAFETY: `pfd` is a valid pollfd for the duration of the call and the
    // count matches the single entry passed.
    let rc = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    if rc == 0 {
        return Ok(Readiness::Idle);
    }
    if pfd.revents & libc::POLLIN != 0 {
        Ok(Readiness::Readable)
    } else if pfd.revents & (libc::POLLERR | libc::POLLHUP | libc::POLLNVAL) != 0 {
        Ok(Readiness::Closed)
    } else {
        Ok(Readiness::Idle)
    }
}

/// Body of the capture thread.  Returns when stopped, when the device goes
/// away, or when the channel refuses an event.
fn read_loop(
    mut device: Device,
    path: &Path,
    poll_interval: Duration,
    stop: &AtomicBool,
    sink: &EventSink,
) {
    while !stop.load(Ordering::SeqCst) {
        match wait_readable(device.as_raw_fd(), poll_interval) {
            Ok(Readiness::Readable) => {}
            Ok(Readiness::Idle) => continue,
            Ok(Readiness::Closed) => {
                warn!(device = %path.display(), "evdev device hung up");
                break;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                error!(device = %path.display(), "poll failed: {e}");
                break;
            }
        }

        let events = match device.fetch_events() {
            Ok(events) => events,
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                ) =>
            {
                continue
            }
            Err(e) => {
                error!(device = %path.display(), "read failed: {e}");
                break;
            }
        };

        for event in events {
            if stop.load(Ordering::SeqCst) {
                break;
            }
            let Some(captured) = classify(&event) else {
                trace!(?event, "ignoring evdev event");
                continue;
            };
            if sink.push(captured).is_err() {
                debug!("event channel closed, leaving evdev loop");
                return;
            }
        }
    }

    debug!(device = %path.display(), "evdev capture thread exiting");
}
