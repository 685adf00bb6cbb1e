//! DNS resolver using hickory-dns.
//!
//! This resolver provides DNS resolution with support for:
//! - DNS-over-HTTPS (DoH)
//! - DNS-over-TLS (DoT)
//! - System DNS configuration auto-detection
//! - IPv4 + IPv6 lookup in one query
//! - Canonical names from the answer's owner name (CNAME chains)
//!
//! The `Resolve` seam is blocking. Lookups run on a dedicated
//! `netpoint-dns` thread and the caller waits for the answer on a channel.

use super::{HostEntry, Name, Resolve};
use crate::base::neterror::NetError;
use crate::base::timer::RuntimeThread;
use hickory_resolver::{
    config::{LookupIpStrategy, ResolverConfig},
    name_server::TokioConnectionProvider,
    TokioResolver,
};
use std::{
    fmt, io,
    net::SocketAddr,
    sync::{mpsc, Arc},
};

/// DNS resolver backed by hickory-dns.
///
/// Each instance owns its resolver and lookup thread; clones share both. It
/// automatically configures itself based on the system's DNS settings.
///
/// [`Resolve::resolve`] blocks the calling thread until the lookup thread
/// answers. From async code prefer `spawn_blocking`, which is what the
/// connector does.
///
/// # Example
///
/// ```rust,ignore
/// use netpoint::dns::{HickoryResolver, Name, Resolve};
///
/// let resolver = HickoryResolver::new()?;
/// let entry = resolver.resolve(&Name::new("example.com"))?;
/// ```
#[derive(Clone)]
pub struct HickoryResolver {
    resolver: Arc<TokioResolver>,
    thread: RuntimeThread,
}

impl HickoryResolver {
    /// Creates a new `HickoryResolver`.
    ///
    /// It will attempt to read system DNS configuration; if that fails,
    /// it falls back to sensible defaults.
    pub fn new() -> io::Result<Self> {
        let thread = RuntimeThread::spawn("netpoint-dns")?;

        let resolver = {
            let _guard = thread.handle().enter();
            let mut builder = match TokioResolver::builder_tokio() {
                Ok(builder) => {
                    tracing::debug!("Using system DNS configuration");
                    builder
                }
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        "Failed to read system DNS config, using defaults"
                    );
                    TokioResolver::builder_with_config(
                        ResolverConfig::default(),
                        TokioConnectionProvider::default(),
                    )
                }
            };

            // Both families so the connector can fail over across them
            builder.options_mut().ip_strategy = LookupIpStrategy::Ipv4AndIpv6;
            builder.build()
        };

        Ok(Self {
            resolver: Arc::new(resolver),
            thread,
        })
    }
}

impl Resolve for HickoryResolver {
    fn resolve(&self, name: &Name) -> Result<HostEntry, NetError> {
        let domain = name.as_str();
        tracing::debug!(domain = %domain, "resolving via hickory-dns");

        let (tx, rx) = mpsc::channel();
        let resolver = Arc::clone(&self.resolver);
        let query = domain.to_string();
        self.thread.handle().spawn(async move {
            let _ = tx.send(resolver.lookup_ip(query.as_str()).await);
        });

        let lookup = rx
            .recv()
            .map_err(|_| {
                NetError::dns_failed(
                    domain,
                    io::Error::new(io::ErrorKind::Interrupted, "DNS thread stopped"),
                )
            })?
            .map_err(|e| {
                tracing::debug!(domain = %domain, error = %e, "hickory-dns lookup failed");
                NetError::dns_failed(
                    domain,
                    io::Error::new(io::ErrorKind::NotFound, e.to_string()),
                )
            })?;

        let addrs: Vec<SocketAddr> = lookup.iter().map(|ip| SocketAddr::new(ip, 0)).collect();

        if addrs.is_empty() {
            return Err(NetError::dns_failed(
                domain,
                io::Error::new(io::ErrorKind::NotFound, "No addresses returned"),
            ));
        }

        // Owner name of the first address record is the end of any CNAME chain.
        let canonical_name = lookup
            .as_lookup()
            .records()
            .iter()
            .find(|r| r.record_type().is_ip_addr())
            .map(|r| r.name().to_utf8().trim_end_matches('.').to_string())
            .unwrap_or_else(|| domain.to_string());
        let trusted = canonical_name.eq_ignore_ascii_case(domain.trim_end_matches('.'));

        tracing::debug!(
            domain = %domain,
            canonical = %canonical_name,
            count = addrs.len(),
            "hickory-dns resolution complete"
        );
        Ok(HostEntry {
            addrs,
            canonical_name,
            trusted,
        })
    }
}

impl fmt::Debug for HickoryResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HickoryResolver").finish_non_exhaustive()
    }
}
