//! Socket construction and option plumbing.

use crate::socket::config::SocketOptions;
use socket2::{Domain, Protocol, SockRef, Socket, TcpKeepalive, Type};
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::OnceLock;

/// IP family of an address or socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressFamily {
    Ipv4,
    Ipv6,
}

impl AddressFamily {
    pub fn of(addr: &SocketAddr) -> Self {
        match addr {
            SocketAddr::V4(_) => AddressFamily::Ipv4,
            SocketAddr::V6(_) => AddressFamily::Ipv6,
        }
    }

    fn domain(self) -> Domain {
        match self {
            AddressFamily::Ipv4 => Domain::IPV4,
            AddressFamily::Ipv6 => Domain::IPV6,
        }
    }
}

/// Builds unconnected stream sockets.
///
/// Connect attempts ask the factory for at most one socket per family at a
/// time; a socket that fails to connect is dropped and a new one requested.
pub trait SocketFactory: Send + Sync {
    /// Whether this platform can open sockets of `family` at all.
    fn supports(&self, _family: AddressFamily) -> bool {
        true
    }

    fn create(&self, family: AddressFamily) -> io::Result<Socket>;
}

/// Plain TCP sockets. Family support is checked once per family.
#[derive(Default)]
pub struct TcpSocketFactory {
    ipv4: OnceLock<bool>,
    ipv6: OnceLock<bool>,
}

impl TcpSocketFactory {
    pub fn new() -> Self {
        Self::default()
    }

    fn open(family: AddressFamily) -> io::Result<Socket> {
        Socket::new(family.domain(), Type::STREAM, Some(Protocol::TCP))
    }
}

impl SocketFactory for TcpSocketFactory {
    fn supports(&self, family: AddressFamily) -> bool {
        let supported = || match Self::open(family) {
            Ok(_) => true,
            Err(e) => {
                tracing::debug!(?family, error = %e, "address family unavailable");
                false
            }
        };
        match family {
            AddressFamily::Ipv4 => *self.ipv4.get_or_init(supported),
            AddressFamily::Ipv6 => *self.ipv6.get_or_init(supported),
        }
    }

    fn create(&self, family: AddressFamily) -> io::Result<Socket> {
        Self::open(family)
    }
}

impl fmt::Debug for TcpSocketFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpSocketFactory")
            .field("ipv4", &self.ipv4.get())
            .field("ipv6", &self.ipv6.get())
            .finish()
    }
}

impl SocketOptions {
    /// Options that only take effect before bind/connect.
    pub(crate) fn apply_before_connect(&self, socket: &Socket) -> io::Result<()> {
        if self.reuse_address {
            socket.set_reuse_address(true)?;
        }
        Ok(())
    }

    /// Options for the winning socket, once its connect has succeeded.
    pub fn apply_connected(&self, socket: SockRef<'_>) -> io::Result<()> {
        socket.set_nodelay(self.no_delay)?;
        if let Some(size) = self.recv_buffer_size {
            socket.set_recv_buffer_size(size)?;
        }
        if let Some(keepalive) = self.keepalive {
            let params = TcpKeepalive::new()
                .with_time(keepalive.time)
                .with_interval(keepalive.interval);
            socket.set_tcp_keepalive(&params)?;
        }
        Ok(())
    }
}
