// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Transport addresses: UNIX-domain paths and IPv4/IPv6 sockets.

use std::fmt;
use std::net::{SocketAddr, SocketAddrV4, SocketAddrV6};
use std::path::PathBuf;

/// A transport endpoint address, constructed once and then immutable.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Address {
    /// A UNIX-domain socket path.
    Unix(PathBuf),
    /// An IPv4 socket address.
    V4(SocketAddrV4),
    /// An IPv6 socket address.
    V6(SocketAddrV6),
}

impl Address {
    /// Parse an address from a string of the form `unix:/path`,
    /// `tcp://host:port`, or a bare `host:port` (defaults to IPv4/v6
    /// depending on what it resolves to).
    pub fn parse(s: &str) -> Result<Self, AddressParseError> {
        if let Some(path) = s.strip_prefix("unix:") {
            if path.is_empty() {
                return Err(AddressParseError(s.to_string()));
            }
            return Ok(Address::Unix(PathBuf::from(path)));
        }

        let host_port = s.strip_prefix("tcp://").unwrap_or(s);
        match host_port.parse::<SocketAddr>() {
            Ok(SocketAddr::V4(v4)) => Ok(Address::V4(v4)),
            Ok(SocketAddr::V6(v6)) => Ok(Address::V6(v6)),
            Err(_) => Err(AddressParseError(s.to_string())),
        }
    }

    /// Is this a UNIX-domain address?
    pub fn is_unix(&self) -> bool {
        matches!(self, Address::Unix(_))
    }

    /// The socket address, if this is an IP address.
    pub fn socket_addr(&self) -> Option<SocketAddr> {
        match self {
            Address::Unix(_) => None,
            Address::V4(a) => Some(SocketAddr::V4(*a)),
            Address::V6(a) => Some(SocketAddr::V6(*a)),
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Unix(path) => write!(f, "unix:{}", path.display()),
            Address::V4(a) => write!(f, "{}", a),
            Address::V6(a) => write!(f, "{}", a),
        }
    }
}

/// Error returned when an address string cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressParseError(String);

impl fmt::Display for AddressParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid address: {}", self.0)
    }
}

impl std::error::Error for AddressParseError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_unix() {
        let a = Address::parse("unix:/tmp/lwcomm.sock").unwrap();
        assert!(a.is_unix());
        assert_eq!(a.to_string(), "unix:/tmp/lwcomm.sock");
    }

    #[test]
    fn parses_v4() {
        let a = Address::parse("127.0.0.1:7400").unwrap();
        assert!(!a.is_unix());
        assert!(matches!(a, Address::V4(_)));
    }

    #[test]
    fn parses_tcp_scheme() {
        let a = Address::parse("tcp://127.0.0.1:7400").unwrap();
        assert!(matches!(a, Address::V4(_)));
    }

    #[test]
    fn rejects_garbage() {
        assert!(Address::parse("not-an-address").is_err());
    }
}
