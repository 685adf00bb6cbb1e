//! System DNS resolver using getaddrinfo.
//!
//! This resolver uses the operating system's native DNS resolution via
//! `getaddrinfo`.
//!
//! # When to Use
//!
//! - When you need to respect system DNS configuration (/etc/resolv.conf, etc.)
//! - When DoH/DoT is not required
//! - As the default when no resolver is configured

use super::{HostEntry, Name, Resolve};
use crate::base::context::IoResultExt;
use crate::base::neterror::NetError;
use std::{io, net::ToSocketAddrs};

/// System DNS resolver using `getaddrinfo`.
///
/// This resolver wraps the standard library's `ToSocketAddrs` trait. It
/// blocks the calling thread; the async connect path already calls it from
/// the blocking pool.
///
/// `getaddrinfo` does not report a canonical name through the standard
/// library, so the queried name is used and the entry is trusted.
#[derive(Clone, Debug, Default)]
pub struct GaiResolver;

impl GaiResolver {
    /// Creates a new `GaiResolver`.
    pub fn new() -> Self {
        Self
    }
}

impl Resolve for GaiResolver {
    fn resolve(&self, name: &Name) -> Result<HostEntry, NetError> {
        let domain = name.as_str();
        tracing::debug!(domain = %domain, "resolving via getaddrinfo");

        let addrs: Vec<_> = (domain, 0u16).to_socket_addrs().dns_context(domain)?.collect();

        if addrs.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                "No addresses returned by getaddrinfo",
            ))
            .dns_context(domain);
        }

        tracing::debug!(domain = %domain, count = addrs.len(), "DNS resolution complete");
        Ok(HostEntry::new(name, addrs))
    }
}
