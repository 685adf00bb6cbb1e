//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use netpoint::base::neterror::NetError;
use netpoint::base::timer::TimerThread;
use netpoint::dns::{AddressResolver, HostEntry, Name, Resolve, StaticAddresses};
use netpoint::socket::{
    AddressFamily, ConnectionGroup, Destination, DestinationManager, PoolConfig, SocketFactory,
    TcpSocketFactory,
};
use parking_lot::Mutex;
use socket2::Socket;
use std::io;
use std::net::{SocketAddr, TcpListener};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Resolver with a swappable answer that counts lookups.
#[derive(Default)]
pub struct MockResolver {
    answer: Mutex<Option<Vec<SocketAddr>>>,
    pub lookups: AtomicUsize,
}

impl MockResolver {
    pub fn new(addrs: Vec<SocketAddr>) -> Arc<Self> {
        let resolver = Self::default();
        resolver.set(addrs);
        Arc::new(resolver)
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set(&self, addrs: Vec<SocketAddr>) {
        *self.answer.lock() = Some(addrs);
    }

    pub fn fail(&self) {
        *self.answer.lock() = None;
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

impl Resolve for MockResolver {
    fn resolve(&self, name: &Name) -> Result<HostEntry, NetError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        match self.answer.lock().clone() {
            Some(addrs) if !addrs.is_empty() => Ok(HostEntry::new(name, addrs)),
            _ => Err(NetError::NameNotResolved),
        }
    }
}

/// TCP sockets, counted, optionally without IPv6.
#[derive(Default)]
pub struct CountingFactory {
    pub created: AtomicUsize,
    pub no_ipv6: AtomicBool,
}

impl CountingFactory {
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

impl SocketFactory for CountingFactory {
    fn supports(&self, family: AddressFamily) -> bool {
        !(family == AddressFamily::Ipv6 && self.no_ipv6.load(Ordering::SeqCst))
    }

    fn create(&self, family: AddressFamily) -> io::Result<Socket> {
        self.created.fetch_add(1, Ordering::SeqCst);
        TcpSocketFactory::new().create(family)
    }
}

/// Connection group that records what the destination told it.
#[derive(Default)]
pub struct RecordingGroup {
    pub limits: Mutex<Vec<usize>>,
    pub keep_alive_disabled: AtomicBool,
}

impl ConnectionGroup for RecordingGroup {
    fn set_connection_limit(&self, limit: usize) {
        self.limits.lock().push(limit);
    }

    fn disable_keep_alive(&self) {
        self.keep_alive_disabled.store(true, Ordering::SeqCst);
    }
}

/// A loopback address nothing listens on.
pub fn closed_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap()
}

/// A listening loopback socket and its address.
pub fn listener() -> (TcpListener, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

pub fn resolver(mock: &Arc<MockResolver>) -> AddressResolver {
    AddressResolver::new(
        Arc::clone(mock) as Arc<dyn Resolve>,
        Arc::new(StaticAddresses::default()),
    )
}

/// Manager for `http://example.test:80` whose timers run on the current
/// runtime.
pub fn manager(
    mock: &Arc<MockResolver>,
    factory: &Arc<CountingFactory>,
    config: PoolConfig,
) -> Arc<DestinationManager> {
    let destination = Destination::new("http", "example.test", 80, false);
    manager_for(destination, mock, factory, config)
}

pub fn manager_for(
    destination: Destination,
    mock: &Arc<MockResolver>,
    factory: &Arc<CountingFactory>,
    config: PoolConfig,
) -> Arc<DestinationManager> {
    DestinationManager::builder(destination)
        .config(config)
        .resolver(resolver(mock))
        .socket_factory(Arc::clone(factory) as Arc<dyn SocketFactory>)
        .timers(TimerThread::with_handle(tokio::runtime::Handle::current()))
        .build()
        .unwrap()
}

/// Let spawned timer tasks run.
pub async fn settle() {
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
}
