//! Loopback classification.
//!
//! Two flavours: [`guess_loopback`] looks only at the host string and is used
//! before any resolution has happened; [`is_loopback_list`] checks resolved
//! addresses against the machine's own interface addresses.

use std::fmt;
use std::io;
use std::net::{IpAddr, Ipv6Addr};

/// Guess whether `host` names this machine without resolving it.
///
/// Recognises `localhost` (and `*.localhost`), `loopback`, literal loopback
/// IPs (including bracketed and IPv4-mapped IPv6 forms).
pub fn guess_loopback(host: &str) -> bool {
    let host = host.trim_end_matches('.');
    let host = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);

    if host.eq_ignore_ascii_case("localhost") || host.eq_ignore_ascii_case("loopback") {
        return true;
    }
    if host.len() > ".localhost".len() {
        let (_, suffix) = host.split_at(host.len() - ".localhost".len());
        if suffix.eq_ignore_ascii_case(".localhost") {
            return true;
        }
    }

    match host.parse::<IpAddr>() {
        Ok(ip) => is_loopback_ip(&ip),
        Err(_) => false,
    }
}

fn is_loopback_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_loopback(),
        IpAddr::V6(v6) => v6.is_loopback() || mapped_v4(v6).is_some_and(|v4| v4.is_loopback()),
    }
}

fn mapped_v4(v6: &Ipv6Addr) -> Option<std::net::Ipv4Addr> {
    match v6.segments() {
        [0, 0, 0, 0, 0, 0xffff, ..] => v6.to_ipv4(),
        _ => None,
    }
}

/// Source of this machine's own addresses.
pub trait LocalAddresses: Send + Sync {
    fn local_addresses(&self) -> io::Result<Vec<IpAddr>>;
}

/// Interface enumeration through `netdev`.
#[derive(Debug, Default, Clone, Copy)]
pub struct InterfaceAddresses;

impl LocalAddresses for InterfaceAddresses {
    fn local_addresses(&self) -> io::Result<Vec<IpAddr>> {
        let addrs: Vec<IpAddr> = netdev::get_interfaces()
            .into_iter()
            .flat_map(|iface| {
                let v4 = iface.ipv4.iter().map(|net| IpAddr::V4(net.addr()));
                let v6 = iface.ipv6.iter().map(|net| IpAddr::V6(net.addr()));
                v4.chain(v6).collect::<Vec<_>>()
            })
            .collect();

        if addrs.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                "no interface addresses",
            ));
        }
        Ok(addrs)
    }
}

/// Fixed address set, for tests and sandboxes without interfaces.
#[derive(Clone, Default)]
pub struct StaticAddresses(pub Vec<IpAddr>);

impl LocalAddresses for StaticAddresses {
    fn local_addresses(&self) -> io::Result<Vec<IpAddr>> {
        Ok(self.0.clone())
    }
}

impl fmt::Debug for StaticAddresses {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("StaticAddresses")
            .field(&self.0.len())
            .finish()
    }
}

/// True when every address in `addrs` is loopback or one of this machine's
/// own addresses.
///
/// An empty list is not loopback. If the local address lookup fails the
/// list is treated as non-loopback.
pub fn is_loopback_list(addrs: &[IpAddr], local: &dyn LocalAddresses) -> bool {
    if addrs.is_empty() {
        return false;
    }

    let own = match local.local_addresses() {
        Ok(own) => own,
        Err(e) => {
            tracing::debug!(error = %e, "local address lookup failed, treating as remote");
            return false;
        }
    };
    addrs
        .iter()
        .all(|ip| is_loopback_ip(ip) || own.contains(ip))
}
