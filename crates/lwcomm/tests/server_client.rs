// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! End-to-end server/client tests over a loopback TCP connection:
//! handshake, RPC round-trip, subscribe/publish fan-out, and the
//! handshake-timeout eviction path.

use std::net::SocketAddrV4;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use lwcomm::client::{Client, ClientCallbacks, ClientOptions};
use lwcomm::protocol::{Address, Status};
use lwcomm::server::{Server, ServerCallbacks, ServerOptions};

fn loopback_addr(port: u16) -> Address {
    Address::V4(SocketAddrV4::new(std::net::Ipv4Addr::LOCALHOST, port))
}

fn start_echo_server(port: u16, handshake_timeout: Duration) -> Server {
    let addr = loopback_addr(port);
    let server = Server::start(&addr, ServerOptions { handshake_timeout }, ServerCallbacks::default()).expect("server start");
    server.register_handler(
        "/echo",
        Arc::new(|_client_id, payload: &[u8]| (Status::Success, payload.to_vec())),
    );
    server
}

#[test]
fn rpc_round_trip() {
    let server = start_echo_server(17410, Duration::from_millis(5000));
    let client = Client::connect(&loopback_addr(17410), ClientOptions::default(), ClientCallbacks::default()).expect("client connect");

    let (tx, rx) = std::sync::mpsc::channel();
    client
        .rpc(
            "/echo",
            b"hello",
            Some(Box::new(move |status, payload| {
                tx.send((status, payload)).unwrap();
            })),
        )
        .expect("rpc send");

    let (status, payload) = rx.recv_timeout(Duration::from_secs(2)).expect("reply");
    assert!(matches!(status, Status::Success));
    assert_eq!(payload, b"hello");

    client.disconnect();
    server.stop();
}

#[test]
fn unknown_url_gets_invalid_status() {
    let server = start_echo_server(17411, Duration::from_millis(5000));
    let client = Client::connect(&loopback_addr(17411), ClientOptions::default(), ClientCallbacks::default()).expect("client connect");

    let (tx, rx) = std::sync::mpsc::channel();
    client
        .rpc("/does-not-exist", b"", Some(Box::new(move |status, _| tx.send(status).unwrap())))
        .unwrap();

    let status = rx.recv_timeout(Duration::from_secs(2)).expect("reply");
    assert!(matches!(status, Status::InvalidUrl));

    client.disconnect();
    server.stop();
}

#[test]
fn publish_reaches_subscribed_client() {
    let server = start_echo_server(17412, Duration::from_millis(5000));
    let client = Client::connect(&loopback_addr(17412), ClientOptions::default(), ClientCallbacks::default()).expect("client connect");

    let received: Arc<Mutex<Vec<(String, Vec<u8>)>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = received.clone();
    client.set_on_message(Arc::new(move |url, payload| {
        sink.lock().unwrap().push((url.to_string(), payload.to_vec()));
    }));

    let (tx, rx) = std::sync::mpsc::channel();
    client.subscribe("/sensors/", Some(Box::new(move |ok| tx.send(ok).unwrap()))).unwrap();
    assert!(rx.recv_timeout(Duration::from_secs(2)).unwrap());

    // Give the server a moment to observe the subscribe before publishing.
    std::thread::sleep(Duration::from_millis(100));
    server.publish("/sensors/temp0", b"21.5");

    for _ in 0..50 {
        if !received.lock().unwrap().is_empty() {
            break;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    let got = received.lock().unwrap();
    assert_eq!(got.len(), 1);
    assert_eq!(got[0].0, "/sensors/temp0");
    assert_eq!(got[0].1, b"21.5");

    client.disconnect();
    server.stop();
}

#[test]
fn connect_callback_fires_on_handshake_and_teardown() {
    let connected_count = Arc::new(AtomicU32::new(0));
    let disconnected_count = Arc::new(AtomicU32::new(0));
    let c1 = connected_count.clone();
    let c2 = disconnected_count.clone();

    let addr = loopback_addr(17413);
    let server = Server::start(
        &addr,
        ServerOptions::default(),
        ServerCallbacks {
            on_connect: Some(Arc::new(move |_id, connected| {
                if connected {
                    c1.fetch_add(1, Ordering::SeqCst);
                } else {
                    c2.fetch_add(1, Ordering::SeqCst);
                }
            })),
            ..Default::default()
        },
    )
    .unwrap();

    let client = Client::connect(&addr, ClientOptions::default(), ClientCallbacks::default()).unwrap();
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(connected_count.load(Ordering::SeqCst), 1);

    client.disconnect();
    std::thread::sleep(Duration::from_millis(200));
    assert_eq!(disconnected_count.load(Ordering::SeqCst), 1);

    server.stop();
}

#[test]
fn handshake_timeout_evicts_silent_connection() {
    let addr = loopback_addr(17414);
    let notified = Arc::new(AtomicBool::new(false));
    let flag = notified.clone();
    let server = Server::start(
        &addr,
        ServerOptions {
            handshake_timeout: Duration::from_millis(200),
        },
        ServerCallbacks {
            on_connect: Some(Arc::new(move |_id, _connected| {
                flag.store(true, Ordering::SeqCst);
            })),
            ..Default::default()
        },
    )
    .unwrap();

    // Connect the raw socket but never send `servinfo`.
    let raw = std::net::TcpStream::connect(addr.socket_addr().unwrap()).unwrap();
    std::thread::sleep(Duration::from_millis(500));

    assert!(!notified.load(Ordering::SeqCst));
    drop(raw);
    server.stop();
}
