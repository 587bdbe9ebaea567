// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Messaging client: connect/handshake, RPC with pending-table
//! correlation, subscription delivery, and timeout-driven disconnect.

mod pending;

pub use pending::{Completion, PendingTable};

use std::io::{ErrorKind, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use mio::{Events, Interest, Poll, Token, Waker};
use parking_lot::Mutex;

use crate::net::StreamSocket;
use crate::protocol::{build_frame, Address, Header, MsgType, RecvBuffer, Status, HEADER_LEN, MSG_MAX_LEN};
use crate::{Error, Result};

const STREAM_TOKEN: Token = Token(0);
const WAKER_TOKEN: Token = Token(1);
const POLL_TIMEOUT: Duration = Duration::from_millis(10);
const MAX_EVENTS: usize = 32;
const TIMER_TICK: Duration = Duration::from_millis(10);
const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_millis(500);

pub struct ClientOptions {
    pub send_timeout: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        ClientOptions {
            send_timeout: DEFAULT_SEND_TIMEOUT,
        }
    }
}

type MessageCallback = Arc<dyn Fn(&str, &[u8]) + Send + Sync>;

#[derive(Clone, Default)]
pub struct ClientCallbacks {
    pub on_disconnect: Option<Arc<dyn Fn() + Send + Sync>>,
}

struct ClientState {
    socket: StreamSocket,
    recv: RecvBuffer,
    pending: PendingTable,
    connected: bool,
    on_message: Option<MessageCallback>,
    on_datagram: Option<MessageCallback>,
}

struct Inner {
    state: Mutex<ClientState>,
    waker: Arc<Waker>,
    running: AtomicBool,
    callbacks: ClientCallbacks,
}

/// An lwcomm messaging client connection. Cheaply cloneable; clones
/// share the same socket, pending table, and background threads.
#[derive(Clone)]
pub struct Client {
    inner: Arc<Inner>,
}

impl Client {
    /// Connect, send `servinfo`, and wait (bounded by
    /// `opts.send_timeout`) for the server's reply carrying our
    /// assigned client id.
    pub fn connect(addr: &Address, opts: ClientOptions, callbacks: ClientCallbacks) -> Result<Client> {
        let (mut socket, _assigned_id) = handshake(addr, opts.send_timeout)?;

        let poll = Poll::new()?;
        poll.registry().register(&mut socket, STREAM_TOKEN, Interest::READABLE)?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER_TOKEN)?);

        let inner = Arc::new(Inner {
            state: Mutex::new(ClientState {
                socket,
                recv: RecvBuffer::new(),
                pending: PendingTable::new(),
                connected: true,
                on_message: None,
                on_datagram: None,
            }),
            waker,
            running: AtomicBool::new(true),
            callbacks,
        });

        spawn_io_thread(inner.clone(), poll);
        spawn_timer_thread(inner.clone());

        Ok(Client { inner })
    }

    pub fn is_connected(&self) -> bool {
        self.inner.state.lock().connected
    }

    /// Set the single callback invoked for every matching `publish`.
    pub fn set_on_message(&self, cb: MessageCallback) {
        self.inner.state.lock().on_message = Some(cb);
    }

    /// Set the single callback invoked for every `datagram`.
    pub fn set_on_datagram(&self, cb: MessageCallback) {
        self.inner.state.lock().on_datagram = Some(cb);
    }

    /// Issue an RPC. With `callback = None`, a fire-and-forget sequence
    /// number is allocated and no reply is tracked. With a callback, a
    /// pending slot is reserved and the callback fires once on reply or
    /// timeout.
    pub fn rpc(&self, url: &str, payload: &[u8], callback: Option<Box<dyn FnOnce(Status, Vec<u8>) + Send>>) -> Result<u16> {
        let mut state = self.inner.state.lock();
        if !state.connected {
            return Err(Error::NotConnected);
        }
        let seqno = match callback {
            Some(cb) => state.pending.allocate(Completion::Rpc(cb)).ok_or(Error::TooManyPending)?,
            None => state.pending.allocate_fire_and_forget(),
        };
        let result = send_or_fail(&mut state, MsgType::Rpc, seqno, url, payload);
        drop(state);
        match result {
            Ok(()) => Ok(seqno),
            Err((err, outcome)) => {
                fire_fail_outcome(&self.inner, outcome);
                Err(err)
            }
        }
    }

    pub fn subscribe(&self, url: &str, ack: Option<Box<dyn FnOnce(bool) + Send>>) -> Result<()> {
        self.simple_request(MsgType::Subscribe, url, ack)
    }

    pub fn unsubscribe(&self, url: &str, ack: Option<Box<dyn FnOnce(bool) + Send>>) -> Result<()> {
        self.simple_request(MsgType::Unsubscribe, url, ack)
    }

    pub fn ping(&self, ack: Option<Box<dyn FnOnce(bool) + Send>>) -> Result<()> {
        self.simple_request(MsgType::PingEcho, "", ack)
    }

    /// Send a one-shot datagram; no reply is expected or tracked.
    pub fn send_datagram(&self, url: &str, payload: &[u8]) -> Result<()> {
        let mut state = self.inner.state.lock();
        if !state.connected {
            return Err(Error::NotConnected);
        }
        let seqno = state.pending.allocate_fire_and_forget();
        let result = send_or_fail(&mut state, MsgType::Datagram, seqno, url, payload);
        drop(state);
        self.finish_send(result)
    }

    fn simple_request(&self, msg_type: MsgType, url: &str, ack: Option<Box<dyn FnOnce(bool) + Send>>) -> Result<()> {
        let mut state = self.inner.state.lock();
        if !state.connected {
            return Err(Error::NotConnected);
        }
        let seqno = match ack {
            Some(cb) => state.pending.allocate(Completion::Simple(cb)).ok_or(Error::TooManyPending)?,
            None => state.pending.allocate_fire_and_forget(),
        };
        let result = send_or_fail(&mut state, msg_type, seqno, url, b"");
        drop(state);
        self.finish_send(result)
    }

    fn finish_send(&self, result: std::result::Result<(), (Error, FailOutcome)>) -> Result<()> {
        match result {
            Ok(()) => Ok(()),
            Err((err, outcome)) => {
                fire_fail_outcome(&self.inner, outcome);
                Err(err)
            }
        }
    }

    /// Disconnect: every outstanding RPC callback fires once with a
    /// not-responding status, `connected` becomes false, and the
    /// disconnect callback fires.
    pub fn disconnect(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
        let _ = self.inner.waker.wake();
        let mut state = self.inner.state.lock();
        let outcome = fail_all(&mut state);
        drop(state);
        fire_fail_outcome(&self.inner, outcome);
    }
}

fn send_or_fail(state: &mut ClientState, msg_type: MsgType, seqno: u16, url: &str, payload: &[u8]) -> std::result::Result<(), (Error, FailOutcome)> {
    let frame = build_frame(msg_type, Status::Success, seqno, url, payload).ok_or(Error::FrameTooLarge).map_err(|e| (e, FailOutcome::none()))?;
    if let Err(e) = state.socket.write_all(&frame) {
        let outcome = fail_all(state);
        return Err((Error::Io(e), outcome));
    }
    Ok(())
}

/// What a `fail_all` call drained, to be fired once the state lock is
/// released (spec §5: callbacks invoked with the lock released).
struct FailOutcome {
    completions: Vec<Completion>,
    newly_disconnected: bool,
}

impl FailOutcome {
    fn none() -> Self {
        FailOutcome {
            completions: Vec::new(),
            newly_disconnected: false,
        }
    }
}

/// Drain the pending table and mark the client disconnected; returns
/// what needs firing. A no-op (empty outcome) if already disconnected.
fn fail_all(state: &mut ClientState) -> FailOutcome {
    if !state.connected {
        return FailOutcome::none();
    }
    state.connected = false;
    FailOutcome {
        completions: state.pending.drain_all(),
        newly_disconnected: true,
    }
}

fn fire_fail_outcome(inner: &Arc<Inner>, outcome: FailOutcome) {
    for c in outcome.completions {
        match c {
            Completion::Rpc(cb) => cb(Status::NoResponding, Vec::new()),
            Completion::Simple(cb) => cb(false),
        }
    }
    if outcome.newly_disconnected {
        if let Some(cb) = &inner.callbacks.on_disconnect {
            cb();
        }
    }
}

/// Blocking connect + `servinfo` handshake, returning the socket
/// (switched to non-blocking afterward) and the assigned client id.
fn handshake(addr: &Address, timeout: Duration) -> Result<(StreamSocket, u32)> {
    let frame = build_frame(MsgType::ServInfo, Status::Success, 0, "", b"").ok_or(Error::FrameTooLarge)?;

    match addr {
        Address::Unix(path) => {
            #[cfg(unix)]
            {
                let std_stream = std::os::unix::net::UnixStream::connect(path)?;
                std_stream.set_read_timeout(Some(timeout))?;
                std_stream.set_write_timeout(Some(timeout))?;
                let mut std_stream = std_stream;
                std_stream.write_all(&frame)?;
                let id = read_servinfo_reply(&mut std_stream)?;
                std_stream.set_nonblocking(true)?;
                Ok((StreamSocket::Unix(mio::net::UnixStream::from_std(std_stream)), id))
            }
            #[cfg(not(unix))]
            {
                let _ = (path, timeout, frame);
                Err(Error::InvalidAddress("unix sockets unsupported on this platform".to_string()))
            }
        }
        Address::V4(a) => handshake_tcp((*a).into(), timeout, &frame),
        Address::V6(a) => handshake_tcp((*a).into(), timeout, &frame),
    }
}

fn handshake_tcp(addr: std::net::SocketAddr, timeout: Duration, frame: &[u8]) -> Result<(StreamSocket, u32)> {
    let mut std_stream = std::net::TcpStream::connect_timeout(&addr, timeout)?;
    std_stream.set_read_timeout(Some(timeout))?;
    std_stream.set_write_timeout(Some(timeout))?;
    std_stream.set_nodelay(true).ok();
    std_stream.write_all(frame)?;
    let id = read_servinfo_reply(&mut std_stream)?;
    std_stream.set_nonblocking(true)?;
    Ok((StreamSocket::Tcp(mio::net::TcpStream::from_std(std_stream)), id))
}

fn read_servinfo_reply<R: Read>(stream: &mut R) -> Result<u32> {
    let mut header_buf = [0u8; HEADER_LEN];
    stream.read_exact(&mut header_buf)?;
    let header = Header::decode(&header_buf);
    let total = header.validate().ok_or(Error::ConnectionLost)?;
    if total > MSG_MAX_LEN {
        return Err(Error::FrameTooLarge);
    }
    let mut rest = vec![0u8; total - HEADER_LEN];
    stream.read_exact(&mut rest)?;
    if !matches!(header.status, Status::Success) {
        return Err(Error::Remote(header.status));
    }
    let payload = &rest[header.url_len as usize..];
    if payload.len() < 4 {
        return Err(Error::ConnectionLost);
    }
    Ok(u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]))
}

fn spawn_io_thread(inner: Arc<Inner>, mut poll: Poll) -> JoinHandle<()> {
    std::thread::spawn(move || {
        let mut events = Events::with_capacity(MAX_EVENTS);
        while inner.running.load(Ordering::SeqCst) {
            if let Err(e) = poll.poll(&mut events, Some(POLL_TIMEOUT)) {
                if e.kind() == ErrorKind::Interrupted {
                    continue;
                }
                log::error!("client poll failed: {}", e);
                break;
            }
            for event in events.iter() {
                if event.token() == STREAM_TOKEN {
                    service_stream(&inner);
                }
            }
        }
    })
}

fn service_stream(inner: &Arc<Inner>) {
    let mut buf = [0u8; 65536];
    loop {
        let mut state = inner.state.lock();
        if !state.connected {
            return;
        }
        match state.socket.read(&mut buf) {
            Ok(0) => {
                let outcome = fail_all(&mut state);
                drop(state);
                fire_fail_outcome(inner, outcome);
                return;
            }
            Ok(n) => {
                let mut messages: Vec<(String, Vec<u8>)> = Vec::new();
                let mut datagrams: Vec<(String, Vec<u8>)> = Vec::new();
                let mut replies: Vec<(u16, Status, Vec<u8>)> = Vec::new();
                let mut close = false;

                let feed_result = state.recv.feed(&buf[..n], |frame| {
                    match frame.header.msg_type {
                        MsgType::Publish => messages.push((frame.url.to_string(), frame.payload.to_vec())),
                        MsgType::Datagram => datagrams.push((frame.url.to_string(), frame.payload.to_vec())),
                        _ => replies.push((frame.header.seqno, frame.header.status, frame.payload.to_vec())),
                    }
                    true
                });
                if feed_result.is_err() {
                    close = true;
                }

                let on_message = state.on_message.clone();
                let on_datagram = state.on_datagram.clone();
                let mut completions = Vec::new();
                for (seqno, status, payload) in replies {
                    if let Some(c) = state.pending.take(seqno) {
                        completions.push((c, status, payload));
                    }
                }

                drop(state);

                if let Some(cb) = &on_message {
                    for (url, payload) in &messages {
                        cb(url, payload);
                    }
                }
                if let Some(cb) = &on_datagram {
                    for (url, payload) in &datagrams {
                        cb(url, payload);
                    }
                }
                for (completion, status, payload) in completions {
                    match completion {
                        Completion::Rpc(cb) => cb(status, payload),
                        Completion::Simple(cb) => cb(matches!(status, Status::Success)),
                    }
                }

                if close {
                    let mut state = inner.state.lock();
                    let outcome = fail_all(&mut state);
                    drop(state);
                    fire_fail_outcome(inner, outcome);
                    return;
                }
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => return,
            Err(_) => {
                let outcome = fail_all(&mut state);
                drop(state);
                fire_fail_outcome(inner, outcome);
                return;
            }
        }
    }
}

fn spawn_timer_thread(inner: Arc<Inner>) -> JoinHandle<()> {
    std::thread::spawn(move || {
        while inner.running.load(Ordering::SeqCst) {
            std::thread::sleep(TIMER_TICK);
            let expired = {
                let mut state = inner.state.lock();
                if !state.connected {
                    continue;
                }
                state.pending.tick()
            };
            for (_seqno, completion) in expired {
                match completion {
                    Completion::Rpc(cb) => cb(Status::NoResponding, Vec::new()),
                    Completion::Simple(cb) => cb(false),
                }
            }
        }
    })
}
