// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Socket abstraction spanning TCP, UDP-less UNIX-domain, and IPv4/IPv6,
//! so the server and client event loops can register one `mio::Poll`
//! source regardless of which kind of `Address` they were bound or
//! connected to.

use std::io::{self, Read, Write};

use mio::event::Source;
use mio::net::{TcpListener, TcpStream};
#[cfg(unix)]
use mio::net::{UnixListener, UnixStream};
use mio::{Interest, Registry, Token};
use socket2::{Domain, Socket as Socket2, Type};

use crate::protocol::Address;

/// A bound listening socket, TCP or UNIX-domain.
pub enum ListenSocket {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(UnixListener),
}

impl ListenSocket {
    pub fn bind(addr: &Address) -> io::Result<ListenSocket> {
        match addr {
            Address::Unix(path) => {
                #[cfg(unix)]
                {
                    let _ = std::fs::remove_file(path);
                    Ok(ListenSocket::Unix(UnixListener::bind(path)?))
                }
                #[cfg(not(unix))]
                {
                    let _ = path;
                    Err(io::Error::new(io::ErrorKind::Unsupported, "unix sockets unsupported on this platform"))
                }
            }
            Address::V4(a) => Ok(ListenSocket::Tcp(bind_tcp_with_reuseaddr((*a).into())?)),
            Address::V6(a) => Ok(ListenSocket::Tcp(bind_tcp_with_reuseaddr((*a).into())?)),
        }
    }

    pub fn accept(&self) -> io::Result<(StreamSocket, Option<std::net::SocketAddr>)> {
        match self {
            ListenSocket::Tcp(l) => {
                let (stream, addr) = l.accept()?;
                stream.set_nodelay(true).ok();
                Ok((StreamSocket::Tcp(stream), Some(addr)))
            }
            #[cfg(unix)]
            ListenSocket::Unix(l) => {
                let (stream, _) = l.accept()?;
                Ok((StreamSocket::Unix(stream), None))
            }
        }
    }
}

fn bind_tcp_with_reuseaddr(addr: std::net::SocketAddr) -> io::Result<TcpListener> {
    let domain = if addr.is_ipv4() { Domain::IPV4 } else { Domain::IPV6 };
    let socket = Socket2::new(domain, Type::STREAM, None)?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(32)?;
    TcpListener::from_std(socket.into())
}

impl Source for ListenSocket {
    fn register(&mut self, registry: &Registry, token: Token, interests: Interest) -> io::Result<()> {
        match self {
            ListenSocket::Tcp(s) => s.register(registry, token, interests),
            #[cfg(unix)]
            ListenSocket::Unix(s) => s.register(registry, token, interests),
        }
    }
    fn reregister(&mut self, registry: &Registry, token: Token, interests: Interest) -> io::Result<()> {
        match self {
            ListenSocket::Tcp(s) => s.reregister(registry, token, interests),
            #[cfg(unix)]
            ListenSocket::Unix(s) => s.reregister(registry, token, interests),
        }
    }
    fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        match self {
            ListenSocket::Tcp(s) => s.deregister(registry),
            #[cfg(unix)]
            ListenSocket::Unix(s) => s.deregister(registry),
        }
    }
}

/// An established connection, either end.
pub enum StreamSocket {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(UnixStream),
}

impl StreamSocket {
    pub fn connect(addr: &Address) -> io::Result<StreamSocket> {
        match addr {
            Address::Unix(path) => {
                #[cfg(unix)]
                {
                    Ok(StreamSocket::Unix(UnixStream::connect(path)?))
                }
                #[cfg(not(unix))]
                {
                    let _ = path;
                    Err(io::Error::new(io::ErrorKind::Unsupported, "unix sockets unsupported on this platform"))
                }
            }
            Address::V4(a) => {
                let stream = TcpStream::connect((*a).into())?;
                stream.set_nodelay(true).ok();
                Ok(StreamSocket::Tcp(stream))
            }
            Address::V6(a) => {
                let stream = TcpStream::connect((*a).into())?;
                stream.set_nodelay(true).ok();
                Ok(StreamSocket::Tcp(stream))
            }
        }
    }

    /// True once a non-blocking `connect()` has finished (writable and no
    /// pending socket error).
    pub fn take_error(&self) -> io::Result<Option<io::Error>> {
        match self {
            StreamSocket::Tcp(s) => s.take_error(),
            #[cfg(unix)]
            StreamSocket::Unix(_) => Ok(None),
        }
    }
}

impl Read for StreamSocket {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            StreamSocket::Tcp(s) => s.read(buf),
            #[cfg(unix)]
            StreamSocket::Unix(s) => s.read(buf),
        }
    }
}

impl Write for StreamSocket {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            StreamSocket::Tcp(s) => s.write(buf),
            #[cfg(unix)]
            StreamSocket::Unix(s) => s.write(buf),
        }
    }
    fn flush(&mut self) -> io::Result<()> {
        match self {
            StreamSocket::Tcp(s) => s.flush(),
            #[cfg(unix)]
            StreamSocket::Unix(s) => s.flush(),
        }
    }
}

impl Source for StreamSocket {
    fn register(&mut self, registry: &Registry, token: Token, interests: Interest) -> io::Result<()> {
        match self {
            StreamSocket::Tcp(s) => s.register(registry, token, interests),
            #[cfg(unix)]
            StreamSocket::Unix(s) => s.register(registry, token, interests),
        }
    }
    fn reregister(&mut self, registry: &Registry, token: Token, interests: Interest) -> io::Result<()> {
        match self {
            StreamSocket::Tcp(s) => s.reregister(registry, token, interests),
            #[cfg(unix)]
            StreamSocket::Unix(s) => s.reregister(registry, token, interests),
        }
    }
    fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        match self {
            StreamSocket::Tcp(s) => s.deregister(registry),
            #[cfg(unix)]
            StreamSocket::Unix(s) => s.deregister(registry),
        }
    }
}
