//! Immutable resolution results.

use std::net::SocketAddr;
use tokio::time::Instant;

/// One resolution of a destination's host.
///
/// Snapshots are shared as `Arc<AddressSnapshot>` and replaced wholesale on
/// refresh; nothing mutates one after construction. Identity (`Arc::ptr_eq`)
/// is what tells a caller whether it holds the current snapshot.
#[derive(Debug, Clone)]
pub struct AddressSnapshot {
    addresses: Vec<SocketAddr>,
    resolved_at: Instant,
    canonical_name: String,
    trusted: bool,
    loopback: bool,
    generation: u64,
}

impl AddressSnapshot {
    pub(crate) fn new(
        addresses: Vec<SocketAddr>,
        canonical_name: String,
        trusted: bool,
        loopback: bool,
    ) -> Self {
        Self {
            addresses,
            resolved_at: Instant::now(),
            canonical_name,
            trusted,
            loopback,
            generation: 0,
        }
    }

    /// The result of a failed resolution.
    pub(crate) fn empty(host: &str) -> Self {
        Self::new(Vec::new(), host.to_string(), false, false)
    }

    pub(crate) fn with_generation(mut self, generation: u64) -> Self {
        self.generation = generation;
        self
    }

    /// Addresses with their final ports, in connect order.
    pub fn addresses(&self) -> &[SocketAddr] {
        &self.addresses
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    pub fn resolved_at(&self) -> Instant {
        self.resolved_at
    }

    pub fn canonical_name(&self) -> &str {
        &self.canonical_name
    }

    pub fn is_trusted(&self) -> bool {
        self.trusted
    }

    pub fn is_loopback(&self) -> bool {
        self.loopback
    }

    /// Strictly increases with every refresh of the owning destination.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn has_ipv4(&self) -> bool {
        self.addresses.iter().any(SocketAddr::is_ipv4)
    }

    pub fn has_ipv6(&self) -> bool {
        self.addresses.iter().any(SocketAddr::is_ipv6)
    }
}
