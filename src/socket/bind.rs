//! Local endpoint selection for outgoing sockets.

use crate::base::context::IoResultExt;
use crate::base::neterror::NetError;
use crate::socket::destination::Destination;
use socket2::{SockAddr, Socket};
use std::net::{IpAddr, SocketAddr};
use std::ops::RangeInclusive;

/// Chooses the local address an outgoing socket binds to.
///
/// `retry` starts at 0 and increases each time the previously returned
/// address failed to bind. Returning `None` leaves the choice to the OS.
pub trait BindStrategy: Send + Sync {
    fn local_endpoint(
        &self,
        destination: &Destination,
        remote: SocketAddr,
        retry: u32,
    ) -> Option<SocketAddr>;
}

impl<F> BindStrategy for F
where
    F: Fn(&Destination, SocketAddr, u32) -> Option<SocketAddr> + Send + Sync,
{
    fn local_endpoint(
        &self,
        destination: &Destination,
        remote: SocketAddr,
        retry: u32,
    ) -> Option<SocketAddr> {
        self(destination, remote, retry)
    }
}

/// Walk a fixed port range on one local IP, one port per retry.
///
/// Remotes of the other address family are left to the OS.
#[derive(Debug, Clone)]
pub struct LocalPortRange {
    ip: IpAddr,
    ports: RangeInclusive<u16>,
}

impl LocalPortRange {
    pub fn new(ip: IpAddr, ports: RangeInclusive<u16>) -> Self {
        Self { ip, ports }
    }
}

impl BindStrategy for LocalPortRange {
    fn local_endpoint(
        &self,
        _destination: &Destination,
        remote: SocketAddr,
        retry: u32,
    ) -> Option<SocketAddr> {
        if remote.is_ipv4() != self.ip.is_ipv4() {
            return None;
        }
        let port = u32::from(*self.ports.start()).checked_add(retry)?;
        let port = u16::try_from(port).ok()?;
        self.ports
            .contains(&port)
            .then(|| SocketAddr::new(self.ip, port))
    }
}

/// Bind `socket` using `strategy`, asking again after every failed bind.
///
/// Gives up with [`NetError::BindRetryExhausted`] once `max_retries` binds
/// have failed. Returns the bound address, or `None` if the strategy
/// declined to pick one.
pub(crate) fn bind_local(
    socket: &Socket,
    strategy: &dyn BindStrategy,
    destination: &Destination,
    remote: SocketAddr,
    max_retries: u32,
) -> Result<Option<SocketAddr>, NetError> {
    let max_retries = max_retries.max(1);
    let mut retry = 0;
    loop {
        let Some(local) = strategy.local_endpoint(destination, remote, retry) else {
            return Ok(None);
        };
        let addr = SockAddr::from(local);
        let err = match socket.bind(&addr).bind_context(remote, retry + 1) {
            Ok(()) => {
                tracing::debug!(%local, %remote, retry, "bound local endpoint");
                return Ok(Some(local));
            }
            Err(err) => err,
        };
        retry += 1;
        tracing::debug!(%local, %remote, retry, error = %err, "bind failed");
        if retry >= max_retries {
            return Err(err);
        }
    }
}
