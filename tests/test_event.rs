// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 shmsg contributors
//
// Event slot semantics: edge-triggered post/wait/clear, timeouts,
// vacant-slot behavior.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use shmsg::{Event, WaitOutcome};

fn owned_event() -> Arc<Event> {
    let event = Arc::new(Event::zeroed());
    unsafe { event.init() }.expect("init");
    event
}

#[test]
fn init_records_owner_pid() {
    let event = owned_event();
    assert_eq!(event.owner_pid(), std::process::id() as i32);
    assert!(!event.is_vacant());
    unsafe { event.fini() };
    assert_eq!(event.owner_pid(), 0);
    assert!(event.is_vacant());
}

#[test]
fn wait_times_out_without_post() {
    let event = owned_event();
    let armed = event.clear();

    let start = Instant::now();
    let outcome = event.wait(armed, Duration::from_millis(50)).expect("wait");
    assert_eq!(outcome, WaitOutcome::TimedOut);
    assert!(start.elapsed() >= Duration::from_millis(40));

    unsafe { event.fini() };
}

#[test]
fn post_before_wait_is_not_lost() {
    let event = owned_event();
    let armed = event.clear();

    // The edge lands while nobody waits; the counter must retain it.
    event.post().expect("post");

    let outcome = event.wait(armed, Duration::from_millis(50)).expect("wait");
    assert_eq!(outcome, WaitOutcome::Signaled);

    unsafe { event.fini() };
}

#[test]
fn post_wakes_blocked_waiter() {
    let event = owned_event();
    let armed = event.clear();

    let waiter = {
        let event = Arc::clone(&event);
        thread::spawn(move || event.wait(armed, Duration::from_secs(5)).expect("wait"))
    };

    thread::sleep(Duration::from_millis(20));
    event.post().expect("post");

    assert_eq!(waiter.join().unwrap(), WaitOutcome::Signaled);

    unsafe { event.fini() };
}

#[test]
fn clear_rearms_for_the_next_edge() {
    let event = owned_event();

    let first = event.clear();
    event.post().expect("post");
    assert_eq!(
        event.wait(first, Duration::from_millis(50)).expect("wait"),
        WaitOutcome::Signaled
    );

    // Re-arm: the consumed edge must not satisfy the next wait.
    let second = event.clear();
    assert_eq!(
        event.wait(second, Duration::from_millis(50)).expect("wait"),
        WaitOutcome::TimedOut
    );

    event.post().expect("post");
    assert_eq!(
        event.wait(second, Duration::from_millis(50)).expect("wait"),
        WaitOutcome::Signaled
    );

    unsafe { event.fini() };
}

#[test]
fn posting_a_vacant_slot_is_a_no_op() {
    let event = Event::zeroed();
    assert!(event.is_vacant());
    event.post().expect("post on vacant slot");

    // Claiming the slot afterwards shows no edge was recorded.
    unsafe { event.init() }.expect("init");
    assert_eq!(
        event.wait(1, Duration::from_millis(10)).expect("wait"),
        WaitOutcome::TimedOut
    );
    unsafe { event.fini() };
}

#[test]
fn each_post_is_one_edge() {
    let event = owned_event();

    let mut armed = event.clear();
    for _ in 0..10 {
        event.post().expect("post");
        assert_eq!(
            event.wait(armed, Duration::from_millis(100)).expect("wait"),
            WaitOutcome::Signaled
        );
        armed = event.clear();
    }
    assert_eq!(
        event.wait(armed, Duration::from_millis(10)).expect("wait"),
        WaitOutcome::TimedOut
    );

    unsafe { event.fini() };
}
