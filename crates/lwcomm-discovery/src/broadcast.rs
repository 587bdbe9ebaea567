// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Legacy UDP broadcast discovery (spec §4.4): a lower-fidelity
//! alternative to SPDP used only by the driver SDK's "auto-discover a
//! hub" shortcut. A server periodically broadcasts `SERVER_ANNOUNCE`
//! and once, on shutdown, `SERVER_LEAVE`; a client on the same port
//! tracks the most recently announced server and can auto-connect.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use socket2::{Domain, Socket as Socket2, Type};

/// Default broadcast discovery port, shared by legacy and SPDP
/// discovery unless overridden (spec §9, "process-wide state").
pub const DEFAULT_PORT: u16 = 7400;

const NAME_LEN: usize = 64;
const TOPIC_LEN: usize = 64;
const RECORD_LEN: usize = 1 + 4 + NAME_LEN + TOPIC_LEN;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecordKind {
    Announce,
    Leave,
}

impl RecordKind {
    fn to_byte(self) -> u8 {
        match self {
            RecordKind::Announce => 0,
            RecordKind::Leave => 1,
        }
    }

    fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(RecordKind::Announce),
            1 => Some(RecordKind::Leave),
            _ => None,
        }
    }
}

/// A discovered server record, cached by a listening client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerRecord {
    pub name: String,
    pub port: u16,
    pub topic: String,
    pub address: SocketAddr,
}

fn encode_record(kind: RecordKind, name: &str, port: u16, topic: &str) -> [u8; RECORD_LEN] {
    let mut buf = [0u8; RECORD_LEN];
    buf[0] = kind.to_byte();
    buf[1..5].copy_from_slice(&(port as u32).to_be_bytes());
    write_fixed(&mut buf[5..5 + NAME_LEN], name);
    write_fixed(&mut buf[5 + NAME_LEN..5 + NAME_LEN + TOPIC_LEN], topic);
    buf
}

fn decode_record(buf: &[u8]) -> Option<(RecordKind, String, u16, String)> {
    if buf.len() < RECORD_LEN {
        return None;
    }
    let kind = RecordKind::from_byte(buf[0])?;
    let port = u32::from_be_bytes(buf[1..5].try_into().ok()?) as u16;
    let name = read_fixed(&buf[5..5 + NAME_LEN]);
    let topic = read_fixed(&buf[5 + NAME_LEN..5 + NAME_LEN + TOPIC_LEN]);
    Some((kind, name, port, topic))
}

fn write_fixed(dst: &mut [u8], s: &str) {
    let bytes = s.as_bytes();
    let n = bytes.len().min(dst.len());
    dst[..n].copy_from_slice(&bytes[..n]);
}

fn read_fixed(src: &[u8]) -> String {
    let end = src.iter().position(|&b| b == 0).unwrap_or(src.len());
    String::from_utf8_lossy(&src[..end]).into_owned()
}

pub struct BroadcastOptions {
    pub port: u16,
    pub announce_interval: Duration,
    /// Name advertised in `SERVER_ANNOUNCE`; ignored in client mode.
    pub name: String,
    /// Listen-port advertised in `SERVER_ANNOUNCE`.
    ///
    /// Spec §9 flags the source as hard-coding this to 5555 regardless
    /// of the server's actual listen port — a bug. This implementation
    /// takes the real port as authoritative, as the REDESIGN FLAGS
    /// direct.
    pub advertised_port: u16,
    pub topic: String,
}

impl Default for BroadcastOptions {
    fn default() -> Self {
        BroadcastOptions {
            port: DEFAULT_PORT,
            announce_interval: Duration::from_secs(3),
            name: String::new(),
            advertised_port: 0,
            topic: String::new(),
        }
    }
}

#[derive(Clone, Default)]
pub struct BroadcastCallbacks {
    /// Fired on the client side whenever a new or changed server
    /// record is observed.
    pub on_server_seen: Option<Arc<dyn Fn(&ServerRecord) + Send + Sync>>,
}

/// One side (server-announcer or client-listener) of legacy broadcast
/// discovery. Construct with [`BroadcastDiscovery::server`] or
/// [`BroadcastDiscovery::client`].
pub struct BroadcastDiscovery {
    inner: Arc<Inner>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

struct Inner {
    socket: UdpSocket,
    port: u16,
    running: AtomicBool,
    last_seen: Mutex<Option<ServerRecord>>,
    callbacks: BroadcastCallbacks,
}

impl BroadcastDiscovery {
    /// Start broadcasting `SERVER_ANNOUNCE` every `announce_interval`.
    pub fn server(opts: BroadcastOptions) -> std::io::Result<BroadcastDiscovery> {
        let socket = bind_broadcast(opts.port)?;
        let inner = Arc::new(Inner {
            socket,
            port: opts.port,
            running: AtomicBool::new(true),
            last_seen: Mutex::new(None),
            callbacks: BroadcastCallbacks::default(),
        });
        let thread = spawn_announce_loop(inner.clone(), opts);
        Ok(BroadcastDiscovery {
            inner,
            thread: Mutex::new(Some(thread)),
        })
    }

    /// Start listening for `SERVER_ANNOUNCE`/`SERVER_LEAVE` records on
    /// `port`, caching the most recently seen server.
    pub fn client(port: u16, callbacks: BroadcastCallbacks) -> std::io::Result<BroadcastDiscovery> {
        let socket = bind_broadcast(port)?;
        socket.set_read_timeout(Some(Duration::from_millis(500)))?;
        let inner = Arc::new(Inner {
            socket,
            port,
            running: AtomicBool::new(true),
            last_seen: Mutex::new(None),
            callbacks,
        });
        let thread = spawn_listen_loop(inner.clone());
        Ok(BroadcastDiscovery {
            inner,
            thread: Mutex::new(Some(thread)),
        })
    }

    /// The most recently cached server record, if any (client mode).
    pub fn current_server(&self) -> Option<ServerRecord> {
        self.inner.last_seen.lock().unwrap().clone()
    }

    pub fn stop(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

fn bind_broadcast(port: u16) -> std::io::Result<UdpSocket> {
    let socket2 = Socket2::new(Domain::IPV4, Type::DGRAM, None)?;
    socket2.set_reuse_address(true)?;
    socket2.set_broadcast(true)?;
    socket2.bind(&SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port).into())?;
    Ok(socket2.into())
}

fn spawn_announce_loop(inner: Arc<Inner>, opts: BroadcastOptions) -> JoinHandle<()> {
    std::thread::spawn(move || {
        let target = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::BROADCAST, inner.port));
        let announce = encode_record(RecordKind::Announce, &opts.name, opts.advertised_port, &opts.topic);
        while inner.running.load(Ordering::SeqCst) {
            let _ = inner.socket.send_to(&announce, target);
            std::thread::sleep(opts.announce_interval);
        }
        let leave = encode_record(RecordKind::Leave, &opts.name, opts.advertised_port, &opts.topic);
        let _ = inner.socket.send_to(&leave, target);
    })
}

fn spawn_listen_loop(inner: Arc<Inner>) -> JoinHandle<()> {
    std::thread::spawn(move || {
        let mut buf = [0u8; 256];
        while inner.running.load(Ordering::SeqCst) {
            match inner.socket.recv_from(&mut buf) {
                Ok((n, from)) => handle_datagram(&inner, &buf[..n], from),
                Err(e) if matches!(e.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut) => {}
                Err(e) => log::warn!("broadcast discovery recv failed: {}", e),
            }
        }
    })
}

fn handle_datagram(inner: &Arc<Inner>, data: &[u8], from: SocketAddr) {
    let (kind, name, port, topic) = match decode_record(data) {
        Some(r) => r,
        None => return,
    };
    match kind {
        RecordKind::Announce => {
            let record = ServerRecord {
                name,
                port,
                topic,
                address: from,
            };
            *inner.last_seen.lock().unwrap() = Some(record.clone());
            if let Some(cb) = &inner.callbacks.on_server_seen {
                cb(&record);
            }
        }
        RecordKind::Leave => {
            let mut last = inner.last_seen.lock().unwrap();
            if let Some(current) = last.as_ref() {
                if current.address.ip() == from.ip() {
                    *last = None;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_round_trips() {
        let encoded = encode_record(RecordKind::Announce, "hub-1", 9443, "/drv1/data");
        let (kind, name, port, topic) = decode_record(&encoded).unwrap();
        assert_eq!(kind, RecordKind::Announce);
        assert_eq!(name, "hub-1");
        assert_eq!(port, 9443);
        assert_eq!(topic, "/drv1/data");
    }

    #[test]
    fn advertised_port_is_the_real_listen_port_not_hardcoded() {
        // Spec §9: the source hard-codes 5555; the real port must be
        // authoritative here.
        let encoded = encode_record(RecordKind::Announce, "hub-1", 7411, "");
        let (_, _, port, _) = decode_record(&encoded).unwrap();
        assert_eq!(port, 7411);
        assert_ne!(port, 5555);
    }
}
