// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Device model: a named connection endpoint owning a set of tags and
//! the user timers registered against it (spec §3 "Device"; source's
//! `CDevice` in `device.h`/`device.cpp`).

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;

use crate::tag::Tag;
use crate::timer::TimerService;

/// Connection type (source's `conn_type`, referencing
/// `t_dict_conn_types`); left as an opaque integer here since its
/// enumeration is a deployment-time configuration concern out of
/// scope for the SDK itself.
pub type ConnType = i32;

/// One device: static connection configuration plus its owned tags.
pub struct Device {
    pub name: String,
    pub desc: String,
    pub conn_type: ConnType,
    pub conn_param: String,
    pub param1: String,
    pub param2: String,
    pub param3: String,
    pub param4: String,
    pub conn_timeout_ms: u32,
    pub recv_timeout_ms: u32,
    pub enable_connect: bool,

    connected: AtomicBool,
    tags: RwLock<Vec<Tag>>,
    by_address: RwLock<HashMap<String, Vec<usize>>>,
    /// TCP transport opened by `drv_connect`/closed by `drv_disconnect`.
    /// `lwconn_device`'s own backend selection by `conn_type` is not in
    /// the retrieved source; TCP is the one concrete transport this SDK
    /// ships (see DESIGN.md).
    stream: RwLock<Option<TcpStream>>,
    /// Shared timer-service handle, attached by the owning [`crate::driver::Driver`]
    /// when the device is added (spec §4.6 "shared timer-service thread").
    timer_service: RwLock<Option<Arc<TimerService>>>,
}

impl Device {
    pub fn new(name: impl Into<String>, conn_type: ConnType, conn_param: impl Into<String>) -> Device {
        Device {
            name: name.into(),
            desc: String::new(),
            conn_type,
            conn_param: conn_param.into(),
            param1: String::new(),
            param2: String::new(),
            param3: String::new(),
            param4: String::new(),
            conn_timeout_ms: 3000,
            recv_timeout_ms: 3000,
            enable_connect: true,
            connected: AtomicBool::new(false),
            tags: RwLock::new(Vec::new()),
            by_address: RwLock::new(HashMap::new()),
            stream: RwLock::new(None),
            timer_service: RwLock::new(None),
        }
    }

    pub fn attach_timer_service(&self, timers: Arc<TimerService>) {
        *self.timer_service.write() = Some(timers);
    }

    pub fn timer_service(&self) -> Option<Arc<TimerService>> {
        self.timer_service.read().clone()
    }

    /// Indices of every tag sharing `address`, in insertion order.
    pub fn tag_indices_at_address(&self, address: &str) -> Vec<usize> {
        self.by_address.read().get(address).cloned().unwrap_or_default()
    }

    /// Run `f` against the tag at `index`, if it exists.
    pub fn with_tag_at_index<R>(&self, index: usize, f: impl FnOnce(&mut Tag) -> R) -> Option<R> {
        self.tags.write().get_mut(index).map(f)
    }

    /// `AddTagOfDevice`: append a tag, indexing it by address for
    /// `GetTagsByAddr`.
    pub fn add_tag(&self, tag: Tag) {
        let mut tags = self.tags.write();
        let idx = tags.len();
        self.by_address.write().entry(tag.address.clone()).or_default().push(idx);
        tags.push(tag);
    }

    pub fn tag_count(&self) -> usize {
        self.tags.read().len()
    }

    pub fn tag_names(&self) -> Vec<String> {
        self.tags.read().iter().map(|t| t.name.clone()).collect()
    }

    /// `GetTagsByName`: run `f` against the named tag's mutable state.
    pub fn with_tag_named<R>(&self, name: &str, f: impl FnOnce(&mut Tag) -> R) -> Option<R> {
        let mut tags = self.tags.write();
        tags.iter_mut().find(|t| t.name == name).map(f)
    }

    /// Index of the named tag, for callers that need a stable handle
    /// (e.g. [`crate::abi::lwcomm_device_create_tag_handle`]) rather
    /// than a borrowed closure.
    pub fn tag_index_named(&self, name: &str) -> Option<usize> {
        self.tags.read().iter().position(|t| t.name == name)
    }

    /// `GetTagsByAddr`: run `f` against every tag sharing `address`.
    pub fn with_tags_at_address(&self, address: &str, mut f: impl FnMut(&mut Tag)) {
        let indices = self.by_address.read().get(address).cloned().unwrap_or_default();
        let mut tags = self.tags.write();
        for idx in indices {
            if let Some(tag) = tags.get_mut(idx) {
                f(tag);
            }
        }
    }

    pub fn snapshot_tags(&self) -> Vec<Tag> {
        self.tags.read().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// `SetDeviceConnected` / `OnDeviceConnStateChanged` plumbing: flip
    /// the connection flag, returning whether it actually changed (the
    /// caller only invokes the user `OnDeviceConnStateChanged` hook on
    /// a real transition).
    pub fn set_connected(&self, connected: bool) -> bool {
        self.connected.swap(connected, Ordering::SeqCst) != connected
    }

    /// `drv_connect`: open the TCP transport to `conn_param`
    /// ("host:port"). Usually unnecessary to call explicitly — the
    /// framework connects lazily on first send/recv — but available
    /// for manual reconnection after an error (`lwdrvcmn.h`'s comment
    /// on `drv_connect`).
    pub fn connect(&self, timeout_ms: u32) -> std::io::Result<()> {
        let addr = self
            .conn_param
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidInput, "no address resolved"))?;
        let stream = TcpStream::connect_timeout(&addr, Duration::from_millis(timeout_ms as u64))?;
        stream.set_read_timeout(Some(Duration::from_millis(self.recv_timeout_ms as u64)))?;
        stream.set_nodelay(true).ok();
        *self.stream.write() = Some(stream);
        self.set_connected(true);
        Ok(())
    }

    /// `drv_disconnect`.
    pub fn disconnect(&self) {
        *self.stream.write() = None;
        self.set_connected(false);
    }

    /// `drv_send`.
    pub fn send(&self, data: &[u8], timeout_ms: u32) -> std::io::Result<usize> {
        let mut guard = self.stream.write();
        let stream = guard.as_mut().ok_or_else(not_connected)?;
        stream.set_write_timeout(Some(Duration::from_millis(timeout_ms as u64)))?;
        stream.write(data)
    }

    /// `drv_recv`.
    pub fn recv(&self, buffer: &mut [u8], timeout_ms: u32) -> std::io::Result<usize> {
        let mut guard = self.stream.write();
        let stream = guard.as_mut().ok_or_else(not_connected)?;
        stream.set_read_timeout(Some(Duration::from_millis(timeout_ms as u64)))?;
        stream.read(buffer)
    }

    /// `drv_sendto`: connectionless send, independent of the TCP
    /// transport opened by [`connect`](Self::connect).
    pub fn send_to(&self, address: &str, data: &[u8], timeout_ms: u32) -> std::io::Result<usize> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.set_write_timeout(Some(Duration::from_millis(timeout_ms as u64)))?;
        socket.send_to(data, address)
    }

    /// `drv_recvfrom`.
    pub fn recv_from(&self, buffer: &mut [u8], timeout_ms: u32) -> std::io::Result<(usize, String)> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.set_read_timeout(Some(Duration::from_millis(timeout_ms as u64)))?;
        let (n, from) = socket.recv_from(buffer)?;
        Ok((n, from.to_string()))
    }

    /// `drv_clear_recv_buffer`: drain whatever is currently readable
    /// without blocking.
    pub fn clear_recv_buffer(&self) {
        let mut guard = self.stream.write();
        if let Some(stream) = guard.as_mut() {
            let _ = stream.set_read_timeout(Some(Duration::from_millis(1)));
            let mut scratch = [0u8; 4096];
            while matches!(stream.read(&mut scratch), Ok(n) if n > 0) {}
        }
    }
}

fn not_connected() -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::NotConnected, "device transport not connected")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datatype::DataType;

    #[test]
    fn tags_indexed_by_address_group_together() {
        let device = Device::new("plc1", 1, "192.168.1.10:502");
        device.add_tag(Tag::new("level", "40001", DataType::Float, 4));
        device.add_tag(Tag::new("level_raw", "40001", DataType::Int32, 4));
        device.add_tag(Tag::new("running", "10001", DataType::Bool, 1));

        let mut seen = Vec::new();
        device.with_tags_at_address("40001", |t| seen.push(t.name.clone()));
        assert_eq!(seen, vec!["level".to_string(), "level_raw".to_string()]);
    }

    #[test]
    fn set_connected_reports_only_real_transitions() {
        let device = Device::new("plc1", 1, "");
        assert!(device.set_connected(true));
        assert!(!device.set_connected(true));
        assert!(device.set_connected(false));
    }
}
