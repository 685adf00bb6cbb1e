//! Address resolution for a single destination.
//!
//! [`AddressResolver`] turns a host into an [`AddressSnapshot`] (lookup,
//! port fix-up, loopback classification). [`AddressCache`] is the lock-free
//! half of the state a destination keeps about its snapshot: which snapshot
//! is current, whether it failed, and the rotation index paired with it.
//! The owning destination decides when to call one or the other; the cache
//! itself never performs I/O.

use super::loopback::{is_loopback_list, InterfaceAddresses, LocalAddresses};
use super::{AddressSnapshot, GaiResolver, Name, Resolve};
use crate::base::neterror::NetError;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Why a snapshot has to be refreshed before use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshReason {
    /// Nothing has been resolved yet, or the last resolution failed.
    Absent,
    /// The current snapshot was marked failed by a connect pass.
    Failed,
    /// The caller holds a snapshot that is no longer current.
    StaleCaller,
    /// The refresh interval elapsed.
    Expired,
}

/// Name lookup plus loopback classification.
#[derive(Clone)]
pub struct AddressResolver {
    resolver: Arc<dyn Resolve>,
    local: Arc<dyn LocalAddresses>,
}

impl Default for AddressResolver {
    fn default() -> Self {
        Self::new(Arc::new(GaiResolver::new()), Arc::new(InterfaceAddresses))
    }
}

impl AddressResolver {
    pub fn new(resolver: Arc<dyn Resolve>, local: Arc<dyn LocalAddresses>) -> Self {
        Self { resolver, local }
    }

    /// Resolve `host` and build a snapshot whose addresses carry `port`
    /// (unless the resolver pinned a non-zero port).
    ///
    /// Literal IP hosts skip the resolver. Blocks on the name lookup.
    pub fn lookup(&self, host: &str, port: u16) -> Result<AddressSnapshot, NetError> {
        let (addrs, canonical_name, trusted) = match host.parse::<IpAddr>() {
            Ok(ip) => (vec![SocketAddr::new(ip, port)], host.to_string(), true),
            Err(_) => {
                let entry = self.resolver.resolve(&Name::new(host))?;
                if entry.addrs.is_empty() {
                    return Err(NetError::NameNotResolved);
                }
                let addrs = entry
                    .addrs
                    .into_iter()
                    .map(|mut addr| {
                        if addr.port() == 0 {
                            addr.set_port(port);
                        }
                        addr
                    })
                    .collect();
                (addrs, entry.canonical_name, entry.trusted)
            }
        };

        let ips: Vec<IpAddr> = addrs.iter().map(SocketAddr::ip).collect();
        let loopback = is_loopback_list(&ips, self.local.as_ref());
        let snapshot = AddressSnapshot::new(addrs, canonical_name, trusted, loopback);
        Ok(snapshot)
    }
}

impl fmt::Debug for AddressResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AddressResolver").finish_non_exhaustive()
    }
}

/// Current snapshot and its rotation index.
#[derive(Debug)]
pub(crate) struct AddressCache {
    current: Option<Arc<AddressSnapshot>>,
    failed: bool,
    rotation: usize,
    generation: u64,
}

impl AddressCache {
    pub(crate) fn new() -> Self {
        Self {
            current: None,
            failed: false,
            rotation: 0,
            generation: 0,
        }
    }

    pub(crate) fn current(&self) -> Option<&Arc<AddressSnapshot>> {
        self.current.as_ref()
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn rotation(&self) -> usize {
        self.rotation
    }

    /// Decide whether the snapshot must be refreshed for a caller presenting
    /// `presented`.
    pub(crate) fn refresh_reason(
        &self,
        presented: Option<&Arc<AddressSnapshot>>,
        now: Instant,
        interval: Option<Duration>,
    ) -> Option<RefreshReason> {
        let Some(current) = &self.current else {
            return Some(RefreshReason::Absent);
        };
        if self.failed {
            return Some(RefreshReason::Failed);
        }
        if let Some(presented) = presented {
            if !Arc::ptr_eq(presented, current) {
                return Some(RefreshReason::StaleCaller);
            }
        }
        match interval {
            Some(interval) if now.saturating_duration_since(current.resolved_at()) > interval => {
                Some(RefreshReason::Expired)
            }
            _ => None,
        }
    }

    /// Replace the snapshot with a fresh resolution result and reset the
    /// rotation index. A failed resolution clears the cache and yields an
    /// empty snapshot.
    pub(crate) fn install(
        &mut self,
        host: &str,
        result: Result<AddressSnapshot, NetError>,
    ) -> Arc<AddressSnapshot> {
        self.generation += 1;
        self.failed = false;
        self.rotation = 0;
        match result {
            Ok(snapshot) => {
                let snapshot = Arc::new(snapshot.with_generation(self.generation));
                self.current = Some(Arc::clone(&snapshot));
                snapshot
            }
            Err(e) => {
                tracing::debug!(host = %host, error = %e, "resolution failed, clearing addresses");
                self.current = None;
                let empty = AddressSnapshot::empty(host);
                Arc::new(empty.with_generation(self.generation))
            }
        }
    }

    /// Hand out the current snapshot with the index to start from. With
    /// round-robin the index advances on every call.
    pub(crate) fn checkout(&mut self, round_robin: bool) -> Option<(Arc<AddressSnapshot>, usize)> {
        let current = self.current.as_ref()?;
        if round_robin && !current.is_empty() {
            self.rotation = (self.rotation + 1) % current.len();
        }
        Some((Arc::clone(current), self.rotation))
    }

    /// Mark `snapshot` failed if it is still current. Stale snapshots are
    /// ignored.
    pub(crate) fn mark_failed(&mut self, snapshot: &Arc<AddressSnapshot>) -> bool {
        match &self.current {
            Some(current) if Arc::ptr_eq(current, snapshot) => {
                self.failed = true;
                true
            }
            _ => false,
        }
    }

    /// Point the rotation index at `index` of `snapshot`, if that snapshot is
    /// still current and the index is in range.
    pub(crate) fn prefer(&mut self, snapshot: &Arc<AddressSnapshot>, index: usize) -> bool {
        match &self.current {
            Some(current) if Arc::ptr_eq(current, snapshot) && index < current.len() => {
                self.rotation = index;
                true
            }
            _ => false,
        }
    }
}
