// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Messaging server: listen/accept, per-client framing, URL-routed RPC
//! dispatch, subscription fan-out, and eviction of clients that never
//! complete handshake.
//!
//! One dedicated event-processing thread owns the `mio::Poll` and all
//! client sockets; a second thread ticks the handshake timer. Public
//! methods (`publish`, `register_handler`, ...) lock the shared
//! `ServerState` and write to sockets directly rather than routing
//! through the I/O thread — the server has no persistent message
//! store, so a write is either accepted by the kernel now or the
//! client is torn down, matching the synchronous-handler model used
//! throughout this server.

mod connection;
mod handlers;

pub use connection::ClientConn;
pub use handlers::{subscription_matches, RpcHandler, UrlTable};

use std::collections::HashMap;
use std::io::{ErrorKind, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use mio::{Events, Interest, Poll, Token, Waker};
use parking_lot::Mutex;

use crate::net::ListenSocket;
use crate::protocol::{build_frame, Address, MsgType, Status};

const LISTENER_TOKEN: Token = Token(0);
const WAKER_TOKEN: Token = Token(1);
const CLIENT_TOKEN_START: usize = 2;
const POLL_TIMEOUT: Duration = Duration::from_millis(10);
const MAX_EVENTS: usize = 256;
const HANDSHAKE_TICK: Duration = Duration::from_millis(100);
const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_millis(5000);

/// Upward callbacks the embedding application registers with the server.
#[derive(Clone, Default)]
pub struct ServerCallbacks {
    /// Fired when a client completes handshake (`connected=true`) and
    /// when it is subsequently torn down (`connected=false`) — only if
    /// the first call was made.
    pub on_connect: Option<Arc<dyn Fn(u32, bool) + Send + Sync>>,
    /// Fired for every `datagram` frame: (client_id, url, payload).
    pub on_datagram: Option<Arc<dyn Fn(u32, &str, &[u8]) + Send + Sync>>,
    /// Fired for `auth` frames: (username, password) -> accept?
    pub on_auth: Option<Arc<dyn Fn(&str, &str) -> bool + Send + Sync>>,
}

pub struct ServerOptions {
    pub handshake_timeout: Duration,
}

impl Default for ServerOptions {
    fn default() -> Self {
        ServerOptions {
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }
}

struct ServerState {
    clients: HashMap<u32, ClientConn>,
    next_client_id: u32,
    handlers: UrlTable,
}

/// The embedded messaging server. Cheaply cloneable: clones share the
/// same underlying listener, state, and background threads.
#[derive(Clone)]
pub struct Server {
    inner: Arc<Inner>,
}

struct Inner {
    state: Mutex<ServerState>,
    callbacks: ServerCallbacks,
    handshake_timeout: Duration,
    waker: Arc<Waker>,
    running: AtomicBool,
}

impl Server {
    /// Bind and start serving. Spawns the event-processing thread and
    /// the handshake-timer thread; returns once the listener is bound.
    pub fn start(addr: &Address, opts: ServerOptions, callbacks: ServerCallbacks) -> std::io::Result<Server> {
        let mut listener = ListenSocket::bind(addr)?;
        let poll = Poll::new()?;
        poll.registry().register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER_TOKEN)?);

        let inner = Arc::new(Inner {
            state: Mutex::new(ServerState {
                clients: HashMap::new(),
                next_client_id: 1,
                handlers: UrlTable::new(),
            }),
            callbacks,
            handshake_timeout: opts.handshake_timeout,
            waker: waker.clone(),
            running: AtomicBool::new(true),
        });

        spawn_io_thread(inner.clone(), poll, listener);
        spawn_handshake_thread(inner.clone());

        Ok(Server { inner })
    }

    pub fn register_handler(&self, url: &str, handler: RpcHandler) {
        self.inner.state.lock().handlers.register(url, handler);
    }

    pub fn unregister_handler(&self, url: &str) {
        self.inner.state.lock().handlers.unregister(url);
    }

    /// Publish fan-out: send to every active client whose subscription
    /// list matches `url`. A per-client send failure destroys that
    /// client but does not stop the fan-out.
    pub fn publish(&self, url: &str, payload: &[u8]) {
        let frame = match build_frame(MsgType::Publish, Status::Success, 0, url, payload) {
            Some(f) => f,
            None => return,
        };
        let mut state = self.inner.state.lock();
        let mut dead = Vec::new();
        for (id, client) in state.clients.iter_mut() {
            if !client.active {
                continue;
            }
            if client.subscriptions.iter().any(|sub| subscription_matches(sub, url)) {
                if client.socket.write_all(&frame).is_err() {
                    dead.push(*id);
                }
            }
        }
        let mut notified = Vec::new();
        for id in dead {
            if let Some(was_notified) = remove_client(&mut state, id) {
                notified.push((id, was_notified));
            }
        }
        drop(state);
        fire_disconnects(&self.inner, notified);
    }

    pub fn stop(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
        let _ = self.inner.waker.wake();
    }
}

fn spawn_io_thread(inner: Arc<Inner>, mut poll: Poll, mut listener: ListenSocket) -> JoinHandle<()> {
    std::thread::spawn(move || {
        let registry = poll.registry().try_clone().expect("clone registry");
        let mut events = Events::with_capacity(MAX_EVENTS);
        let mut token_to_id: HashMap<Token, u32> = HashMap::new();
        let mut next_token = CLIENT_TOKEN_START;

        while inner.running.load(Ordering::SeqCst) {
            if let Err(e) = poll.poll(&mut events, Some(POLL_TIMEOUT)) {
                if e.kind() == ErrorKind::Interrupted {
                    continue;
                }
                log::error!("server poll failed: {}", e);
                break;
            }

            for event in events.iter() {
                match event.token() {
                    LISTENER_TOKEN => loop {
                        match listener.accept() {
                            Ok((mut stream, _addr)) => {
                                let token = Token(next_token);
                                next_token += 1;
                                if registry.register(&mut stream, token, Interest::READABLE).is_err() {
                                    continue;
                                }
                                let mut state = inner.state.lock();
                                let id = state.next_client_id;
                                state.next_client_id = state.next_client_id.wrapping_add(1).max(1);
                                state.clients.insert(id, ClientConn::new(id, stream, inner.handshake_timeout));
                                drop(state);
                                token_to_id.insert(token, id);
                            }
                            Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                            Err(e) => {
                                log::warn!("accept failed: {}", e);
                                break;
                            }
                        }
                    },
                    WAKER_TOKEN => {
                        destroy_expired_handshakes(&inner);
                    }
                    token => {
                        if let Some(&id) = token_to_id.get(&token) {
                            let closed = service_client(&inner, id);
                            if closed {
                                token_to_id.remove(&token);
                            }
                        }
                    }
                }
            }
        }
    })
}

/// Work pulled out of a client's receive buffer while the state lock is
/// held; handlers and upward callbacks are always invoked after the
/// lock is released (spec §5: "callbacks are invoked with the lock
/// released"), so a handler that calls back into this server (e.g.
/// `publish`) cannot deadlock against this thread.
#[derive(Default)]
struct FrameWork {
    rpcs: Vec<(u16, Option<RpcHandler>, Vec<u8>)>,
    immediate_replies: Vec<(MsgType, Status, u16, Vec<u8>)>,
    datagrams: Vec<(String, Vec<u8>)>,
    auth_checks: Vec<(u16, String, String)>,
    subscribes: Vec<String>,
    unsubscribes: Vec<String>,
    notify_connect: bool,
    close: bool,
}

/// Read and dispatch available frames for one client. Returns true if
/// the client was destroyed as a result.
fn service_client(inner: &Arc<Inner>, id: u32) -> bool {
    let mut buf = [0u8; 65536];
    loop {
        let mut state = inner.state.lock();
        let client = match state.clients.get_mut(&id) {
            Some(c) => c,
            None => return true,
        };
        let n = match client.socket.read(&mut buf) {
            Ok(0) => {
                let notified = remove_client(&mut state, id);
                drop(state);
                fire_disconnect(inner, id, notified);
                return true;
            }
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::WouldBlock => return false,
            Err(_) => {
                let notified = remove_client(&mut state, id);
                drop(state);
                fire_disconnect(inner, id, notified);
                return true;
            }
        };

        // Split-borrow so the handler table can be consulted (to clone
        // an `Arc<dyn Fn>`, not invoke it) while `client` stays mutably
        // borrowed for framing and subscription bookkeeping.
        let ServerState { clients, handlers, .. } = &mut *state;
        let client = clients.get_mut(&id).unwrap();
        let mut work = FrameWork::default();
        let feed_result = client.recv.feed(&buf[..n], |frame| {
            let url = frame.url.to_string();
            match frame.header.msg_type {
                MsgType::ServInfo => {
                    work.immediate_replies.push((MsgType::ServInfo, Status::Success, frame.header.seqno, id.to_be_bytes().to_vec()));
                    work.notify_connect = true;
                }
                MsgType::Rpc => {
                    let handler = handlers.lookup(&url).cloned();
                    work.rpcs.push((frame.header.seqno, handler, frame.payload.to_vec()));
                }
                MsgType::Subscribe => {
                    work.immediate_replies.push((MsgType::Subscribe, Status::Success, frame.header.seqno, Vec::new()));
                    work.subscribes.push(url);
                }
                MsgType::Unsubscribe => {
                    work.immediate_replies.push((MsgType::Unsubscribe, Status::Success, frame.header.seqno, Vec::new()));
                    work.unsubscribes.push(url);
                }
                MsgType::Datagram => {
                    work.datagrams.push((url, frame.payload.to_vec()));
                }
                MsgType::Auth => {
                    // payload: "<username>\0<password>"
                    let text = String::from_utf8_lossy(frame.payload);
                    let mut parts = text.splitn(2, '\0');
                    let user = parts.next().unwrap_or("").to_string();
                    let pass = parts.next().unwrap_or("").to_string();
                    work.auth_checks.push((frame.header.seqno, user, pass));
                }
                MsgType::PingEcho => {
                    work.immediate_replies.push((MsgType::PingEcho, Status::Success, frame.header.seqno, Vec::new()));
                }
                MsgType::Noop | MsgType::ReplyFlag | MsgType::Unknown(_) => {}
            }
            true
        });
        if feed_result.is_err() {
            work.close = true;
        }

        // Pure state mutation, no callback involved: apply while still
        // holding the lock rather than deferring to the re-lock below.
        for url in &work.subscribes {
            client.subscribe(url);
        }
        for url in &work.unsubscribes {
            client.unsubscribe(url);
        }

        if work.notify_connect {
            client.complete_handshake();
            client.on_conn_notified = true;
        }

        drop(state);

        // All handler/callback invocation happens here, unlocked.
        let mut replies: Vec<(MsgType, Status, u16, Vec<u8>)> = work.immediate_replies;
        for (seqno, handler, payload) in work.rpcs {
            let (status, resp) = match handler {
                Some(h) => h(id, &payload),
                None => (Status::InvalidUrl, Vec::new()),
            };
            replies.push((MsgType::Rpc, status, seqno, resp));
        }
        for (seqno, user, pass) in work.auth_checks {
            let ok = match &inner.callbacks.on_auth {
                Some(cb) => cb(&user, &pass),
                None => true,
            };
            replies.push((MsgType::Auth, if ok { Status::Success } else { Status::AuthFailed }, seqno, Vec::new()));
        }
        if work.notify_connect {
            if let Some(cb) = &inner.callbacks.on_connect {
                cb(id, true);
            }
        }
        if let Some(cb) = &inner.callbacks.on_datagram {
            for (url, payload) in &work.datagrams {
                cb(id, url, payload);
            }
        }

        // Re-lock only to write socket replies; subscribe/unsubscribe
        // bookkeeping (no callback involved) happens here too.
        let mut state = inner.state.lock();
        let mut close = work.close;
        if let Some(client) = state.clients.get_mut(&id) {
            for (mtype, status, seqno, payload) in replies {
                if let Some(frame) = build_frame(mtype, status, seqno, "", &payload) {
                    if client.socket.write_all(&frame).is_err() {
                        close = true;
                    }
                }
            }
        } else {
            close = false; // already gone; nothing left to do
        }

        if close {
            let notified = remove_client(&mut state, id);
            drop(state);
            fire_disconnect(inner, id, notified);
            return true;
        }
        drop(state);
    }
}

/// Remove a client from the table without invoking any callback.
/// Returns `Some(was_notified)` if the client existed.
fn remove_client(state: &mut ServerState, id: u32) -> Option<bool> {
    state.clients.remove(&id).map(|c| c.on_conn_notified)
}

fn fire_disconnect(inner: &Arc<Inner>, id: u32, notified: Option<bool>) {
    if notified == Some(true) {
        if let Some(cb) = &inner.callbacks.on_connect {
            cb(id, false);
        }
    }
}

fn fire_disconnects(inner: &Arc<Inner>, notified: Vec<(u32, bool)>) {
    for (id, was_notified) in notified {
        if was_notified {
            if let Some(cb) = &inner.callbacks.on_connect {
                cb(id, false);
            }
        }
    }
}

fn destroy_expired_handshakes(inner: &Arc<Inner>) {
    let now = Instant::now();
    let mut state = inner.state.lock();
    let expired: Vec<u32> = state
        .clients
        .iter()
        .filter(|(_, c)| c.handshake_expired(now))
        .map(|(id, _)| *id)
        .collect();
    for id in expired {
        // Handshake never completed: the connect-callback was never
        // fired, so destruction must not fire it either.
        state.clients.remove(&id);
    }
}

fn spawn_handshake_thread(inner: Arc<Inner>) -> JoinHandle<()> {
    std::thread::spawn(move || {
        while inner.running.load(Ordering::SeqCst) {
            std::thread::sleep(HANDSHAKE_TICK);
            let now = Instant::now();
            let any_expired = inner.state.lock().clients.values().any(|c| c.handshake_expired(now));
            if any_expired {
                let _ = inner.waker.wake();
            }
        }
    })
}
