// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-client connection state held by the messaging server.

use std::time::Instant;

use crate::net::StreamSocket;
use crate::protocol::RecvBuffer;

/// A connected (or still-handshaking) client of the messaging server.
pub struct ClientConn {
    pub id: u32,
    pub socket: StreamSocket,
    pub recv: RecvBuffer,
    pub subscriptions: Vec<String>,
    /// Set once any valid message has arrived.
    pub active: bool,
    /// Set once the upward connect-callback has fired with `connected=true`.
    pub on_conn_notified: bool,
    /// `Some` while the client is in the handshake-timer list; cleared
    /// once `servinfo` is received.
    pub handshake_deadline: Option<Instant>,
}

impl ClientConn {
    pub fn new(id: u32, socket: StreamSocket, handshake_timeout: std::time::Duration) -> Self {
        ClientConn {
            id,
            socket,
            recv: RecvBuffer::new(),
            subscriptions: Vec::new(),
            active: false,
            on_conn_notified: false,
            handshake_deadline: Some(Instant::now() + handshake_timeout),
        }
    }

    pub fn handshake_expired(&self, now: Instant) -> bool {
        match self.handshake_deadline {
            Some(deadline) => now >= deadline,
            None => false,
        }
    }

    pub fn complete_handshake(&mut self) {
        self.handshake_deadline = None;
        self.active = true;
    }

    pub fn subscribe(&mut self, url: &str) {
        if !self.subscriptions.iter().any(|s| s == url) {
            self.subscriptions.push(url.to_string());
        }
    }

    pub fn unsubscribe(&mut self, url: &str) {
        self.subscriptions.retain(|s| s != url);
    }
}
