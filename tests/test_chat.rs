// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 shmsg contributors
//
// Request/response conversations over chat endpoints.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{SystemTime, UNIX_EPOCH};

use shmsg::{message_variant, ChannelParameters, ChatClient, ChatServer, Pod};

static COUNTER: AtomicUsize = AtomicUsize::new(0);

fn unique_name(prefix: &str) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}_{nanos}_{n}")
}

fn server_params(physical_name: &str) -> ChannelParameters {
    ChannelParameters {
        physical_name: physical_name.to_string(),
        logical_name: "ChatTest".to_string(),
        kind: 2,
        version: 1,
    }
}

#[repr(C)]
#[derive(Clone, Copy, Default, Debug, PartialEq)]
struct Add {
    a: u32,
    b: u32,
}
unsafe impl Pod for Add {}

#[repr(C)]
#[derive(Clone, Copy, Default, Debug, PartialEq)]
struct Shutdown {}
unsafe impl Pod for Shutdown {}

message_variant! {
    #[derive(Clone, Copy, Debug, PartialEq)]
    enum Request {
        Add(Add),
        Shutdown(Shutdown),
    }
}

#[repr(C)]
#[derive(Clone, Copy, Default, Debug, PartialEq)]
struct Sum {
    value: u32,
}
unsafe impl Pod for Sum {}

message_variant! {
    #[derive(Clone, Copy, Debug, PartialEq)]
    enum Response {
        Sum(Sum),
    }
}

/// Serve `Add` requests until a `Shutdown` request arrives.
fn run_adder(server: ChatServer<Request, Response>) {
    while let Some((request, address)) = server.receive().expect("server receive") {
        match request {
            Request::Add(add) => {
                let response = Response::Sum(Sum {
                    value: add.a + add.b,
                });
                server.send_to(&address, response).expect("server send_to");
            }
            Request::Shutdown(_) => break,
        }
    }
}

#[test]
fn request_response_round_trip() {
    let name = unique_name("chat_round_trip");
    let server = ChatServer::<Request, Response>::create(server_params(&name)).expect("server");
    let server_thread = thread::spawn(move || run_adder(server));

    let client = ChatClient::<Request, Response>::connect(server_params(&name)).expect("client");

    let response = client
        .send_and_receive(Request::Add(Add { a: 2, b: 40 }))
        .expect("send_and_receive");
    assert_eq!(response, Some(Response::Sum(Sum { value: 42 })));

    assert!(client.send(Request::Shutdown(Shutdown {})).expect("send"));
    server_thread.join().unwrap();
}

#[test]
fn clients_get_distinct_addresses_and_answers() {
    let name = unique_name("chat_two_clients");
    let server = ChatServer::<Request, Response>::create(server_params(&name)).expect("server");
    let server_thread = thread::spawn(move || run_adder(server));

    let first = ChatClient::<Request, Response>::connect(server_params(&name)).expect("first");
    let second = ChatClient::<Request, Response>::connect(server_params(&name)).expect("second");

    assert_ne!(first.address(), second.address());

    let from_first = first
        .send_and_receive(Request::Add(Add { a: 1, b: 1 }))
        .expect("first round trip");
    let from_second = second
        .send_and_receive(Request::Add(Add { a: 10, b: 20 }))
        .expect("second round trip");

    assert_eq!(from_first, Some(Response::Sum(Sum { value: 2 })));
    assert_eq!(from_second, Some(Response::Sum(Sum { value: 30 })));

    assert!(first.send(Request::Shutdown(Shutdown {})).expect("send"));
    server_thread.join().unwrap();
}

#[test]
fn server_disconnect_stops_the_conversation() {
    let name = unique_name("chat_disconnect");
    let server = ChatServer::<Request, Response>::create(server_params(&name)).expect("server");
    let client = ChatClient::<Request, Response>::connect(server_params(&name)).expect("client");

    server.disconnect();
    assert!(server.is_disconnected());
    assert!(server.receive().expect("receive").is_none());

    // The client's request is refused once the server is down.
    let sent = client.send(Request::Add(Add { a: 1, b: 2 })).expect("send");
    assert!(!sent);
}
