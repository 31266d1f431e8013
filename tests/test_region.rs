// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 shmsg contributors
//
// Region lifecycle: attach validation, single-receiver enforcement, and
// removal of the OS name once no endpoint owns a slot.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use shmsg::{
    message_variant, ChannelError, ChannelParameters, MessageReceiver, MessageSender, Pod,
};

static COUNTER: AtomicUsize = AtomicUsize::new(0);

fn unique_name(prefix: &str) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}_{nanos}_{n}")
}

fn params(physical_name: &str, kind: u16, version: u16) -> ChannelParameters {
    ChannelParameters {
        physical_name: physical_name.to_string(),
        logical_name: "RegionTest".to_string(),
        kind,
        version,
    }
}

#[repr(C)]
#[derive(Clone, Copy, Default, Debug, PartialEq)]
struct Probe {
    n: u32,
}
unsafe impl Pod for Probe {}

message_variant! {
    #[derive(Clone, Copy, Debug, PartialEq)]
    enum Wire {
        Probe(Probe),
    }
}

#[test]
fn version_mismatch_rejects_second_endpoint() {
    let name = unique_name("version_mismatch");

    let receiver = MessageReceiver::<Wire>::create(params(&name, 1, 1)).expect("receiver");

    let err = MessageSender::<Wire>::connect(params(&name, 1, 2))
        .err()
        .expect("mismatched version must be rejected");
    match err {
        ChannelError::VersionMismatch {
            expected_version,
            found_version,
            ..
        } => {
            assert_eq!(expected_version, 2);
            assert_eq!(found_version, 1);
        }
        other => panic!("unexpected error: {other}"),
    }

    // The first endpoint stays functional after the failed attach.
    let sender = MessageSender::<Wire>::connect(params(&name, 1, 1)).expect("sender");
    let consumer = std::thread::spawn(move || receiver.receive().expect("receive"));
    assert!(sender.send(&Wire::Probe(Probe { n: 11 })).expect("send"));
    assert_eq!(
        consumer.join().unwrap(),
        Some(Wire::Probe(Probe { n: 11 }))
    );
}

#[test]
fn kind_mismatch_rejects_second_endpoint() {
    let name = unique_name("kind_mismatch");

    let _receiver = MessageReceiver::<Wire>::create(params(&name, 7, 1)).expect("receiver");

    let err = MessageSender::<Wire>::connect(params(&name, 8, 1)).err();
    assert!(matches!(err, Some(ChannelError::VersionMismatch { .. })));
}

#[test]
fn second_receiver_is_rejected() {
    let name = unique_name("second_receiver");

    let _first = MessageReceiver::<Wire>::create(params(&name, 1, 1)).expect("receiver");

    let err = MessageReceiver::<Wire>::create(params(&name, 1, 1)).err();
    match err {
        Some(ChannelError::ReceiverBusy { pid, .. }) => {
            assert_eq!(pid, std::process::id() as i32);
        }
        other => panic!("expected ReceiverBusy, got {other:?}"),
    }
}

#[test]
fn receiver_role_is_reusable_after_drop() {
    let name = unique_name("receiver_reuse");

    {
        let _first = MessageReceiver::<Wire>::create(params(&name, 1, 1)).expect("receiver");
    }

    // The slot was vacated, so the role can be claimed again.
    let _second = MessageReceiver::<Wire>::create(params(&name, 1, 1)).expect("second receiver");
}

#[cfg(target_os = "linux")]
#[test]
fn region_is_unlinked_once_vacant() {
    let name = unique_name("unlink_when_vacant");
    let shm_path = format!("/dev/shm/{name}");

    let receiver = MessageReceiver::<Wire>::create(params(&name, 1, 1)).expect("receiver");
    let sender = MessageSender::<Wire>::connect(params(&name, 1, 1)).expect("sender");
    assert!(std::fs::metadata(&shm_path).is_ok(), "region must exist");

    let consumer = std::thread::spawn(move || receiver.receive().expect("receive"));
    assert!(sender.send(&Wire::Probe(Probe { n: 3 })).expect("send"));
    consumer.join().unwrap();

    // `consumer` dropped the receiver, vacating the last owned slot: the
    // OS name goes away. The sender's existing mapping remains valid.
    assert!(
        std::fs::metadata(&shm_path).is_err(),
        "region must be unlinked once both slots are vacant"
    );
    drop(sender);
}
