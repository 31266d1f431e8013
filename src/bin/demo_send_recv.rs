// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 shmsg contributors
//
// Two-process channel demo.
//
// Usage:
//   demo_send_recv consume <name>
//   demo_send_recv produce <name> <count>
//
// Start the consumer first, then one or more producers against the same
// channel name. Each producer sends <count> stamped records followed by a
// Stop; the consumer prints what it receives until Ctrl-C.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use shmsg::{message_variant, ChannelParameters, MessageReceiver, MessageSender, Pod};

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq)]
struct Record {
    producer_pid: u32,
    seq: u32,
    payload: [u8; 256],
}
unsafe impl Pod for Record {}

impl Default for Record {
    fn default() -> Self {
        Self {
            producer_pid: 0,
            seq: 0,
            payload: [0; 256],
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Default, Debug, PartialEq)]
struct Stop {
    producer_pid: u32,
}
unsafe impl Pod for Stop {}

message_variant! {
    #[derive(Clone, Copy, Debug, PartialEq)]
    enum DemoMessage {
        Record(Record),
        Stop(Stop),
    }
}

fn channel_params(name: &str) -> ChannelParameters {
    ChannelParameters {
        physical_name: name.to_string(),
        logical_name: "demo_send_recv".to_string(),
        kind: 1,
        version: 1,
    }
}

fn do_consume(name: &str, quit: Arc<AtomicBool>) {
    let receiver = Arc::new(
        MessageReceiver::<DemoMessage>::create(channel_params(name)).expect("create receiver"),
    );
    println!("consume: waiting on channel '{name}'...");

    // Ctrl-C watcher: disconnect must come from outside the receive loop.
    let watcher = {
        let receiver = Arc::clone(&receiver);
        std::thread::spawn(move || {
            while !quit.load(Ordering::Acquire) {
                if receiver.is_disconnected() {
                    return;
                }
                std::thread::sleep(std::time::Duration::from_millis(100));
            }
            receiver.disconnect();
        })
    };

    let mut records = 0u64;
    let mut stops = 0u32;
    loop {
        let message = receiver.receive().expect("receive");
        match message {
            None => break,
            Some(DemoMessage::Record(record)) => {
                records += 1;
                if records % 1000 == 0 {
                    println!(
                        "consume: {records} records (last: pid {} seq {})",
                        record.producer_pid, record.seq
                    );
                }
            }
            Some(DemoMessage::Stop(stop)) => {
                stops += 1;
                println!("consume: producer {} finished ({stops} total)", stop.producer_pid);
            }
        }
    }
    watcher.join().unwrap();
    println!("consume: done after {records} records from {stops} producers");
}

fn do_produce(name: &str, count: u32, quit: Arc<AtomicBool>) {
    let sender =
        MessageSender::<DemoMessage>::connect(channel_params(name)).expect("connect sender");
    let pid = std::process::id();
    println!("produce: sending {count} records on channel '{name}'...");

    for seq in 0..count {
        if quit.load(Ordering::Acquire) {
            break;
        }
        let mut record = Record {
            producer_pid: pid,
            seq,
            payload: [0; 256],
        };
        record.payload.fill((seq % 256) as u8);
        if !sender.send(&DemoMessage::Record(record)).expect("send") {
            eprintln!("produce: channel disconnected at seq {seq}");
            return;
        }
    }

    sender
        .send(&DemoMessage::Stop(Stop { producer_pid: pid }))
        .expect("send stop");
    println!("produce: done");
}

fn main() {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 3 {
        eprintln!("usage: demo_send_recv consume <name>");
        eprintln!("       demo_send_recv produce <name> <count>");
        std::process::exit(1);
    }

    let quit = Arc::new(AtomicBool::new(false));
    {
        let q = Arc::clone(&quit);
        on_termination_signal(move || q.store(true, Ordering::Release));
    }

    match args[1].as_str() {
        "consume" => do_consume(&args[2], quit),
        "produce" => {
            if args.len() < 4 {
                eprintln!("usage: demo_send_recv produce <name> <count>");
                std::process::exit(1);
            }
            let count: u32 = args[3].parse().expect("count");
            do_produce(&args[2], count, quit);
        }
        other => {
            eprintln!("unknown mode: {other}");
            std::process::exit(1);
        }
    }
}

// Minimal signal hook: sets the flag on SIGINT / SIGTERM / SIGHUP so the
// poll loops can wind down cleanly.
fn on_termination_signal(f: impl Fn() + Send + 'static) {
    use std::sync::{Mutex, OnceLock};
    static CB: OnceLock<Mutex<Box<dyn Fn() + Send>>> = OnceLock::new();
    CB.get_or_init(|| Mutex::new(Box::new(f)));
    extern "C" fn handler(_: libc::c_int) {
        if let Some(cb) = CB.get() {
            if let Ok(g) = cb.lock() {
                g();
            }
        }
    }
    unsafe {
        libc::signal(libc::SIGINT, handler as *const () as libc::sighandler_t);
        libc::signal(libc::SIGTERM, handler as *const () as libc::sighandler_t);
        libc::signal(libc::SIGHUP, handler as *const () as libc::sighandler_t);
    }
}
