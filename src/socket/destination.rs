//! Destinations and their per-destination state.
//!
//! A [`DestinationManager`] owns everything the transport layer knows about
//! one remote endpoint: the current address snapshot and its rotation index,
//! the admission limit, the active-connection count with its idle timer,
//! the TLS behavior cache, and the registry of connection groups.
//!
//! All mutable state sits behind one mutex. Nothing calls out (name lookups,
//! connection groups, eviction handlers, socket I/O) while it is held.

use crate::base::neterror::NetError;
use crate::base::timer::{TimerId, TimerThread};
use crate::dns::{AddressCache, AddressResolver, AddressSnapshot};
use crate::socket::admission::Admission;
use crate::socket::bind::BindStrategy;
use crate::socket::config::{PoolConfig, SocketOptions, TcpKeepAlive};
use crate::socket::factory::{SocketFactory, TcpSocketFactory};
use crate::socket::group::ConnectionGroup;
use crate::socket::idle::{FireCallback, IdleEviction, IdleTracker};
use crate::tls::TlsBehaviorCache;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::fmt;
use std::io;
use std::net::IpAddr;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::time::Instant;
use url::{Host, Url};

/// Identity of a remote endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Destination {
    scheme: String,
    host: String,
    port: u16,
    is_proxy: bool,
    key: String,
}

impl Destination {
    /// IPv6 hosts may be given with or without brackets.
    pub fn new(scheme: &str, host: &str, port: u16, is_proxy: bool) -> Self {
        let scheme = scheme.to_ascii_lowercase();
        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host)
            .to_ascii_lowercase();

        let authority = if host.parse::<IpAddr>().is_ok_and(|ip| ip.is_ipv6()) {
            format!("[{host}]:{port}")
        } else {
            format!("{host}:{port}")
        };
        let key = if is_proxy {
            format!("proxy:{scheme}://{authority}")
        } else {
            format!("{scheme}://{authority}")
        };

        Self {
            scheme,
            host,
            port,
            is_proxy,
            key,
        }
    }

    pub fn from_url(url: &Url, is_proxy: bool) -> Result<Self, NetError> {
        let host = match url.host() {
            Some(Host::Domain(domain)) => domain.to_string(),
            Some(Host::Ipv4(ip)) => ip.to_string(),
            Some(Host::Ipv6(ip)) => ip.to_string(),
            None => return Err(NetError::InvalidUrl),
        };
        let port = url
            .port_or_known_default()
            .or_else(|| default_port(url.scheme()))
            .ok_or(NetError::InvalidUrl)?;
        Ok(Self::new(url.scheme(), &host, port, is_proxy))
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// Host without IPv6 brackets.
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_proxy(&self) -> bool {
        self.is_proxy
    }

    /// Pool lookup key, `scheme://host:port` with a `proxy:` prefix for
    /// proxies.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn is_secure(&self) -> bool {
        matches!(self.scheme.as_str(), "https" | "wss" | "ftps")
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}

fn default_port(scheme: &str) -> Option<u16> {
    match scheme {
        "ftps" => Some(990),
        _ => None,
    }
}

/// Everything a connect attempt copies out of the manager before it starts.
#[derive(Clone)]
pub(crate) struct ConnectSettings {
    pub(crate) options: SocketOptions,
    pub(crate) bind: Option<Arc<dyn BindStrategy>>,
    pub(crate) round_robin: bool,
    pub(crate) connect_timeout: Option<Duration>,
    pub(crate) max_bind_retries: u32,
}

struct ManagerState {
    addresses: AddressCache,
    admission: Admission,
    idle: IdleTracker,
    socket_options: SocketOptions,
    bind: Option<Arc<dyn BindStrategy>>,
}

/// Per-destination state shared by every connection to one endpoint.
pub struct DestinationManager {
    destination: Destination,
    config: PoolConfig,
    resolver: AddressResolver,
    factory: Arc<dyn SocketFactory>,
    eviction: Option<Arc<dyn IdleEviction>>,
    state: Mutex<ManagerState>,
    refresh_lock: Mutex<()>,
    groups: DashMap<String, Arc<dyn ConnectionGroup>>,
    tls: TlsBehaviorCache,
    this: Weak<DestinationManager>,
}

impl DestinationManager {
    pub fn builder(destination: Destination) -> DestinationManagerBuilder {
        DestinationManagerBuilder::new(destination)
    }

    pub fn destination(&self) -> &Destination {
        &self.destination
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub(crate) fn socket_factory(&self) -> &Arc<dyn SocketFactory> {
        &self.factory
    }

    pub fn tls(&self) -> &TlsBehaviorCache {
        &self.tls
    }

    // ===== Address resolution =====

    /// Current snapshot and the index to start connecting from.
    ///
    /// `presented` is the snapshot the caller used last, if any. The snapshot
    /// is refreshed when there is none, the current one was marked failed,
    /// the caller's is not the current one, or the refresh interval elapsed.
    /// A failed refresh yields an empty snapshot. Blocks while resolving.
    pub fn resolve(
        &self,
        presented: Option<&Arc<AddressSnapshot>>,
    ) -> (Arc<AddressSnapshot>, usize) {
        let generation = match self.checkout_fresh(presented) {
            Ok(found) => return found,
            Err(generation) => generation,
        };

        let refresh = self.refresh_lock.lock();
        {
            let mut state = self.state.lock();
            if state.addresses.generation() != generation {
                // Someone else refreshed while we waited.
                return match state.addresses.checkout(self.config.round_robin) {
                    Some(found) => found,
                    None => (self.empty_snapshot(state.addresses.generation()), 0),
                };
            }
        }

        tracing::debug!(destination = %self.destination, "resolving addresses");
        let host = self.destination.host();
        let result = self.resolver.lookup(host, self.destination.port());

        let (snapshot, changed_limit) = {
            let mut state = self.state.lock();
            let snapshot = state.addresses.install(self.destination.host(), result);
            let changed_limit = state.admission.observe_resolution(&snapshot);
            (snapshot, changed_limit)
        };
        drop(refresh);

        tracing::debug!(
            destination = %self.destination,
            generation = snapshot.generation(),
            addresses = snapshot.len(),
            loopback = snapshot.is_loopback(),
            "addresses resolved"
        );
        if let Some(limit) = changed_limit {
            self.push_limit(limit);
        }
        (snapshot, 0)
    }

    /// Like [`resolve`](Self::resolve), but a refresh runs on the blocking
    /// pool.
    pub async fn resolve_async(
        self: &Arc<Self>,
        presented: Option<Arc<AddressSnapshot>>,
    ) -> (Arc<AddressSnapshot>, usize) {
        if let Ok(found) = self.checkout_fresh(presented.as_ref()) {
            return found;
        }

        let this = Arc::clone(self);
        match tokio::task::spawn_blocking(move || this.resolve(presented.as_ref())).await {
            Ok(found) => found,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(e) => {
                tracing::warn!(
                    destination = %self.destination,
                    error = %e,
                    "resolution task cancelled"
                );
                let generation = self.state.lock().addresses.generation();
                (self.empty_snapshot(generation), 0)
            }
        }
    }

    /// Check out the current snapshot if it needs no refresh, else report the
    /// generation the refresh should replace.
    fn checkout_fresh(
        &self,
        presented: Option<&Arc<AddressSnapshot>>,
    ) -> Result<(Arc<AddressSnapshot>, usize), u64> {
        let mut state = self.state.lock();
        let reason = state.addresses.refresh_reason(
            presented,
            Instant::now(),
            self.config.dns_refresh_timeout,
        );
        match reason {
            None => state
                .addresses
                .checkout(self.config.round_robin)
                .ok_or(state.addresses.generation()),
            Some(reason) => {
                tracing::debug!(destination = %self.destination, ?reason, "address refresh needed");
                Err(state.addresses.generation())
            }
        }
    }

    fn empty_snapshot(&self, generation: u64) -> Arc<AddressSnapshot> {
        let snapshot = AddressSnapshot::empty(self.destination.host());
        Arc::new(snapshot.with_generation(generation))
    }

    /// Force the next resolve to refresh, if `snapshot` is still current.
    pub fn mark_failed(&self, snapshot: &Arc<AddressSnapshot>) -> bool {
        let marked = self.state.lock().addresses.mark_failed(snapshot);
        if marked {
            tracing::debug!(
                destination = %self.destination,
                generation = snapshot.generation(),
                "snapshot marked failed"
            );
        }
        marked
    }

    /// Make later attempts start at `index` of `snapshot`.
    pub(crate) fn prefer(&self, snapshot: &Arc<AddressSnapshot>, index: usize) -> bool {
        self.state.lock().addresses.prefer(snapshot, index)
    }

    pub fn current_snapshot(&self) -> Option<Arc<AddressSnapshot>> {
        self.state.lock().addresses.current().cloned()
    }

    /// Index the next non-rotating attempt starts from.
    pub fn rotation_index(&self) -> usize {
        self.state.lock().addresses.rotation()
    }

    // ===== Admission =====

    pub fn connection_limit(&self) -> usize {
        self.state.lock().admission.limit()
    }

    pub fn has_explicit_limit(&self) -> bool {
        self.state.lock().admission.is_explicit()
    }

    /// Whether the destination currently counts as loopback.
    pub fn is_loopback(&self) -> bool {
        self.state.lock().admission.is_loopback()
    }

    /// Override the admission limit and push it to every group.
    pub fn set_connection_limit(&self, limit: usize) -> Result<(), NetError> {
        let limit = self.state.lock().admission.set_explicit(limit)?;
        tracing::debug!(destination = %self.destination, limit, "explicit connection limit set");
        self.push_limit(limit);
        Ok(())
    }

    fn push_limit(&self, limit: usize) {
        for group in self.groups() {
            group.set_connection_limit(limit);
        }
    }

    // ===== Activity and idle tracking =====

    /// A connection to this destination became active.
    pub fn on_activate(&self) {
        let active = self.state.lock().idle.activate();
        tracing::trace!(destination = %self.destination, active, "connection activated");
    }

    /// A connection to this destination went away.
    pub fn on_deactivate(&self) {
        let active = self.state.lock().idle.deactivate();
        tracing::trace!(destination = %self.destination, active, "connection deactivated");
    }

    pub fn active_connections(&self) -> usize {
        self.state.lock().idle.active()
    }

    pub fn is_idle_timer_armed(&self) -> bool {
        self.state.lock().idle.is_armed()
    }

    /// When the destination last became idle. `None` while it has active
    /// connections.
    pub fn idle_since(&self) -> Option<Instant> {
        self.state.lock().idle.idle_since()
    }

    pub fn max_idle(&self) -> Duration {
        self.state.lock().idle.max_idle()
    }

    /// Change the max idle time. A running idle period keeps its start time.
    pub fn set_max_idle(&self, duration: Duration) {
        self.state.lock().idle.set_max_idle(duration);
        tracing::debug!(destination = %self.destination, ?duration, "max idle time changed");
    }

    fn on_idle_timer(&self, id: TimerId) {
        if !self.state.lock().idle.fire_matches(id) {
            tracing::trace!(
                destination = %self.destination,
                timer = id,
                "stale idle timer ignored"
            );
            return;
        }
        tracing::debug!(destination = %self.destination, "destination idle");

        let (Some(eviction), Some(this)) = (self.eviction.clone(), self.this.upgrade()) else {
            return;
        };
        eviction.on_idle(&this, self.groups());
    }

    // ===== Connection groups =====

    /// Add a group. It is told the current admission limit right away.
    pub fn register_group(
        &self,
        name: impl Into<String>,
        group: Arc<dyn ConnectionGroup>,
    ) -> Option<Arc<dyn ConnectionGroup>> {
        let previous = self.groups.insert(name.into(), Arc::clone(&group));
        group.set_connection_limit(self.connection_limit());
        previous
    }

    pub fn group(&self, name: &str) -> Option<Arc<dyn ConnectionGroup>> {
        self.groups.get(name).map(|entry| Arc::clone(entry.value()))
    }

    pub fn remove_group(&self, name: &str) -> Option<Arc<dyn ConnectionGroup>> {
        self.groups.remove(name).map(|(_, group)| group)
    }

    pub fn groups(&self) -> Vec<Arc<dyn ConnectionGroup>> {
        self.groups
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    pub fn clear_groups(&self) {
        self.groups.clear();
    }

    // ===== Socket settings =====

    pub fn socket_options(&self) -> SocketOptions {
        self.state.lock().socket_options.clone()
    }

    /// Keepalive parameters for connections made from now on.
    pub fn set_tcp_keepalive(&self, keepalive: Option<TcpKeepAlive>) {
        self.state.lock().socket_options.keepalive = keepalive;
    }

    pub fn set_bind_strategy(&self, strategy: Option<Arc<dyn BindStrategy>>) {
        self.state.lock().bind = strategy;
    }

    pub(crate) fn connect_settings(&self) -> ConnectSettings {
        let state = self.state.lock();
        ConnectSettings {
            options: state.socket_options.clone(),
            bind: state.bind.clone(),
            round_robin: self.config.round_robin,
            connect_timeout: self.config.connect_timeout,
            max_bind_retries: self.config.max_bind_retries,
        }
    }
}

impl fmt::Debug for DestinationManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("DestinationManager")
            .field("destination", &self.destination.key())
            .field("generation", &state.addresses.generation())
            .field("limit", &state.admission.limit())
            .field("active", &state.idle.active())
            .field("groups", &self.groups.len())
            .finish()
    }
}

/// Builder for a standalone [`DestinationManager`].
///
/// Pools use this too, sharing their resolver, factory and timer thread.
pub struct DestinationManagerBuilder {
    destination: Destination,
    config: PoolConfig,
    resolver: Option<AddressResolver>,
    factory: Option<Arc<dyn SocketFactory>>,
    timers: Option<TimerThread>,
    bind: Option<Arc<dyn BindStrategy>>,
    eviction: Option<Arc<dyn IdleEviction>>,
}

impl DestinationManagerBuilder {
    pub fn new(destination: Destination) -> Self {
        Self {
            destination,
            config: PoolConfig::default(),
            resolver: None,
            factory: None,
            timers: None,
            bind: None,
            eviction: None,
        }
    }

    pub fn config(mut self, config: PoolConfig) -> Self {
        self.config = config;
        self
    }

    pub fn resolver(mut self, resolver: AddressResolver) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn socket_factory(mut self, factory: Arc<dyn SocketFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    pub fn timers(mut self, timers: TimerThread) -> Self {
        self.timers = Some(timers);
        self
    }

    pub fn bind_strategy(mut self, strategy: Arc<dyn BindStrategy>) -> Self {
        self.bind = Some(strategy);
        self
    }

    pub fn eviction(mut self, eviction: Arc<dyn IdleEviction>) -> Self {
        self.eviction = Some(eviction);
        self
    }

    /// Build the manager with its idle timer armed. Starts a timer thread
    /// if none was given.
    pub fn build(mut self) -> io::Result<Arc<DestinationManager>> {
        let timers = match self.timers.take() {
            Some(timers) => timers,
            None => TimerThread::new()?,
        };
        Ok(self.build_on(timers))
    }

    pub(crate) fn build_on(self, timers: TimerThread) -> Arc<DestinationManager> {
        let queue = timers.queue(self.config.max_idle_time);
        let limit = self.config.default_connection_limit;
        let admission = Admission::new(self.destination.host(), limit);
        let socket_options = self.config.socket_options.clone();

        Arc::new_cyclic(|this: &Weak<DestinationManager>| {
            let weak = this.clone();
            let on_fire: FireCallback = Arc::new(move |id| {
                if let Some(manager) = weak.upgrade() {
                    manager.on_idle_timer(id);
                }
            });

            DestinationManager {
                destination: self.destination,
                config: self.config,
                resolver: self.resolver.unwrap_or_default(),
                factory: self
                    .factory
                    .unwrap_or_else(|| Arc::new(TcpSocketFactory::new())),
                eviction: self.eviction,
                state: Mutex::new(ManagerState {
                    addresses: AddressCache::new(),
                    admission,
                    idle: IdleTracker::new(queue, on_fire),
                    socket_options,
                    bind: self.bind,
                }),
                refresh_lock: Mutex::new(()),
                groups: DashMap::new(),
                tls: TlsBehaviorCache::new(),
                this: this.clone(),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::{HostEntry, Name, Resolve, StaticAddresses};
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        calls: AtomicUsize,
        addrs: Vec<SocketAddr>,
    }

    impl Resolve for Counting {
        fn resolve(&self, name: &Name) -> Result<HostEntry, NetError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(HostEntry::new(name, self.addrs.clone()))
        }
    }

    #[derive(Default)]
    struct Limits(Mutex<Vec<usize>>);

    impl ConnectionGroup for Limits {
        fn set_connection_limit(&self, limit: usize) {
            self.0.lock().push(limit);
        }

        fn disable_keep_alive(&self) {}
    }

    fn manager(addrs: &[&str], config: PoolConfig) -> (Arc<DestinationManager>, Arc<Counting>) {
        let resolver = Arc::new(Counting {
            calls: AtomicUsize::new(0),
            addrs: addrs.iter().map(|a| a.parse().unwrap()).collect(),
        });
        let destination = Destination::new("http", "example.test", 80, false);
        let resolve = AddressResolver::new(resolver.clone(), Arc::new(StaticAddresses::default()));
        let manager = DestinationManager::builder(destination)
            .config(config)
            .resolver(resolve)
            .timers(TimerThread::with_handle(tokio::runtime::Handle::current()))
            .build()
            .unwrap();
        (manager, resolver)
    }

    #[test]
    fn test_destination_key() {
        let dest = Destination::new("HTTPS", "[::1]", 443, false);
        assert_eq!(dest.host(), "::1");
        assert_eq!(dest.key(), "https://[::1]:443");
        assert!(dest.is_secure());

        let proxy = Destination::new("http", "Proxy.Example", 8080, true);
        assert_eq!(proxy.key(), "proxy:http://proxy.example:8080");
        assert!(!proxy.is_secure());
    }

    #[test]
    fn test_destination_from_url() {
        let url = Url::parse("wss://example.com/chat").unwrap();
        let dest = Destination::from_url(&url, false).unwrap();
        assert_eq!(dest.port(), 443);
        assert!(dest.is_secure());

        let url = Url::parse("ftps://files.example.com/").unwrap();
        assert_eq!(Destination::from_url(&url, false).unwrap().port(), 990);

        let url = Url::parse("http://[2001:db8::1]:8080/").unwrap();
        let dest = Destination::from_url(&url, true).unwrap();
        assert_eq!(dest.host(), "2001:db8::1");
        assert_eq!(dest.key(), "proxy:http://[2001:db8::1]:8080");

        let url = Url::parse("data:text/plain,hi").unwrap();
        let result = Destination::from_url(&url, false);
        assert!(matches!(result, Err(NetError::InvalidUrl)));
    }

    #[tokio::test]
    async fn test_fresh_snapshot_is_reused() {
        let (manager, resolver) = manager(&["10.0.0.1:0", "10.0.0.2:0"], PoolConfig::default());
        let (first, index) = manager.resolve(None);
        assert_eq!(index, 0);
        assert_eq!(first.addresses()[0].port(), 80);

        let (second, _) = manager.resolve(Some(&first));
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_mark_failed_forces_refresh() {
        let (manager, resolver) = manager(&["10.0.0.1:0"], PoolConfig::default());
        let (first, _) = manager.resolve(None);
        assert!(manager.mark_failed(&first));

        let (second, _) = manager.resolve(Some(&first));
        assert!(second.generation() > first.generation());
        assert!(second.resolved_at() >= first.resolved_at());
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_loopback_resolution_lifts_limit() {
        let (manager, _) = manager(&["127.0.0.1:0"], PoolConfig::default());
        let group = Arc::new(Limits::default());
        manager.register_group("h1", group.clone());
        assert_eq!(manager.connection_limit(), 6);

        manager.resolve(None);
        assert_eq!(manager.connection_limit(), usize::MAX);
        assert_eq!(*group.0.lock(), vec![6, usize::MAX]);
    }

    #[tokio::test]
    async fn test_explicit_limit_pushed() {
        let (manager, _) = manager(&["127.0.0.1:0"], PoolConfig::default());
        let group = Arc::new(Limits::default());
        manager.register_group("h1", group.clone());

        manager.set_connection_limit(3).unwrap();
        manager.resolve(None);
        assert_eq!(manager.connection_limit(), 3);
        assert_eq!(*group.0.lock(), vec![6, 3]);
        assert!(manager.set_connection_limit(0).is_err());
    }

    #[tokio::test]
    async fn test_new_manager_is_idle_and_armed() {
        let (manager, _) = manager(&["10.0.0.1:0"], PoolConfig::default());
        assert_eq!(manager.active_connections(), 0);
        assert!(manager.is_idle_timer_armed());

        manager.on_activate();
        assert!(!manager.is_idle_timer_armed());
        assert!(manager.idle_since().is_none());
        manager.on_deactivate();
        assert!(manager.is_idle_timer_armed());
    }
}
