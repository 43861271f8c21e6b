//! Integration tests for the classification + channel pipeline.
//!
//! These tests feed raw OS event identifiers through each platform's classification
//! rules and push the results through a real [`EventChannel`], checking what
//! the consumer finally observes.

use std::sync::mpsc;
use std::time::Duration;

use tracker_core::classify::{evdev, quartz, win32};
use tracker_core::classify::evdev::{EV_KEY, EV_REL, EV_SYN, REL_X};
use tracker_core::{EventChannel, EventKind, InputEvent};

const WAIT: Duration = Duration::from_secs(5);

/// Pushes `events` through a fresh channel and returns what the consumer saw.
fn deliver(events: impl IntoIterator<Item = InputEvent>) -> Vec<(String, i64)> {
    let (tx, rx) = mpsc::channel();
    let mut channel = EventChannel::open(move |kind: EventKind, code: i64| {
        tx.send((kind.as_str().to_string(), code)).ok();
    })
    .expect("open channel");
    let sink = channel.sink();

    for event in events {
        sink.push(event).expect("push");
    }
    channel.close();
    assert!(channel.join(WAIT), "dispatch thread must exit after close");

    rx.try_iter().collect()
}

fn expected_scenario() -> Vec<(String, i64)> {
    vec![
        ("key".to_string(), 65),
        ("mouse".to_string(), 0),
        ("key".to_string(), 65),
    ]
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[test]
fn test_evdev_press_move_release_reaches_consumer_in_order() {
    // Arrange: key press, sync, relative move, sync, key release
    let stream = [
        (EV_KEY, 65),
        (EV_SYN, 0),
        (EV_REL, REL_X),
        (EV_SYN, 0),
        (EV_KEY, 65),
    ];

    // Act
    let events = stream
        .iter()
        .filter_map(|&(event_type, code)| evdev::classify(event_type, code));
    let seen = deliver(events);

    // Assert – the two SYN events are silently dropped
    assert_eq!(seen, expected_scenario());
}

#[test]
fn test_win32_press_move_release_reaches_consumer_in_order() {
    let events = [
        win32::classify_keyboard(win32::WM_KEYDOWN, 65),
        win32::classify_mouse(win32::WM_MOUSEMOVE),
        win32::classify_keyboard(win32::WM_KEYUP, 65),
    ];

    let seen = deliver(events.into_iter().flatten());

    assert_eq!(
        seen,
        vec![
            ("key".to_string(), 65),
            ("mouse".to_string(), i64::from(win32::WM_MOUSEMOVE)),
            ("key".to_string(), 65),
        ]
    );
}

#[test]
fn test_quartz_press_move_release_reaches_consumer_in_order() {
    let events = [
        quartz::classify(quartz::KEY_DOWN, 65),
        quartz::classify(quartz::MOUSE_MOVED, 0),
        quartz::classify(quartz::TAP_DISABLED_BY_TIMEOUT, 0),
        quartz::classify(quartz::KEY_UP, 65),
    ];

    let seen = deliver(events.into_iter().flatten());

    assert_eq!(
        seen,
        vec![
            ("key".to_string(), 65),
            ("mouse".to_string(), i64::from(quartz::MOUSE_MOVED)),
            ("key".to_string(), 65),
        ]
    );
}

#[test]
fn test_n_events_produce_exactly_n_notifications() {
    let events: Vec<InputEvent> = (0..500)
        .map(|i| {
            if i % 3 == 0 {
                InputEvent::mouse(i)
            } else {
                InputEvent::key(i)
            }
        })
        .collect();

    let seen = deliver(events.clone());

    assert_eq!(seen.len(), events.len());
    for (event, (kind, code)) in events.iter().zip(&seen) {
        assert_eq!(event.kind.as_str(), kind);
        assert_eq!(event.code, *code);
    }
}
