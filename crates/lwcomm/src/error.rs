// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error types for the lwcomm messaging core.

use crate::protocol::Status;
use std::fmt;

/// Result type for lwcomm operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced at component boundaries (connect, rpc, publish).
///
/// Internal failure points treated as plain booleans
/// (resource exhaustion, malformed frames on a connection the caller
/// is about to close anyway) stay as `bool`/`Option` deeper in the
/// stack; this type is for the public API.
#[derive(Debug)]
pub enum Error {
    /// The peer closed the connection or a socket error was observed.
    ConnectionLost,
    /// An RPC or connect attempt exceeded its deadline.
    Timeout,
    /// The remote replied with a non-success status.
    Remote(Status),
    /// No URL handler matched (exact, prefix, or default).
    InvalidUrl(String),
    /// The client's in-flight RPC table is full (~255 per client).
    TooManyPending,
    /// The frame would exceed `MSG_MAX_LEN` or a length field overflowed.
    FrameTooLarge,
    /// The connection is not established.
    NotConnected,
    /// Underlying I/O error.
    Io(std::io::Error),
    /// Address or configuration could not be parsed.
    InvalidAddress(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::ConnectionLost => write!(f, "connection lost"),
            Error::Timeout => write!(f, "request timed out"),
            Error::Remote(status) => write!(f, "remote returned status {:?}", status),
            Error::InvalidUrl(url) => write!(f, "no handler for url {}", url),
            Error::TooManyPending => write!(f, "too many in-flight requests"),
            Error::FrameTooLarge => write!(f, "frame exceeds maximum length"),
            Error::NotConnected => write!(f, "not connected"),
            Error::Io(e) => write!(f, "io error: {}", e),
            Error::InvalidAddress(s) => write!(f, "invalid address: {}", s),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<crate::protocol::AddressParseError> for Error {
    fn from(e: crate::protocol::AddressParseError) -> Self {
        Error::InvalidAddress(e.to_string())
    }
}
