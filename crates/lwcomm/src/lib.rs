// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Wire protocol, framing, and the pub/sub + RPC messaging core that
//! every other `lwcomm` crate builds on: a `Server` embeds a listener
//! and dispatches RPC/subscribe/datagram traffic to registered
//! handlers, and a `Client` connects to one, issuing RPCs correlated
//! by sequence number and receiving publishes through a single
//! `on_message` callback.

pub mod client;
pub mod config;
pub mod error;
pub mod net;
pub mod protocol;
pub mod server;

pub use client::{Client, ClientCallbacks, ClientOptions};
pub use error::{Error, Result};
pub use protocol::{Address, AddressParseError, Header, MsgType, Status};
pub use server::{Server, ServerCallbacks, ServerOptions};
