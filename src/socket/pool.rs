use crate::base::neterror::NetError;
use crate::base::timer::TimerThread;
use crate::dns::AddressResolver;
use crate::socket::bind::BindStrategy;
use crate::socket::config::PoolConfig;
use crate::socket::destination::{Destination, DestinationManager};
use crate::socket::factory::{SocketFactory, TcpSocketFactory};
use crate::socket::group::ConnectionGroup;
use crate::socket::idle::IdleEviction;
use dashmap::DashMap;
use std::fmt;
use std::io;
use std::sync::{Arc, Weak};
use url::Url;

struct PoolInner {
    config: PoolConfig,
    managers: DashMap<String, Arc<DestinationManager>>,
    resolver: AddressResolver,
    factory: Arc<dyn SocketFactory>,
    timers: TimerThread,
    bind: Option<Arc<dyn BindStrategy>>,
}

/// Owner of every [`DestinationManager`] of one client.
///
/// Managers are created on first lookup and dropped from the pool when their
/// idle timer fires while they have no active connections. Cloning the pool
/// is cheap and shares the managers.
#[derive(Clone)]
pub struct DestinationPool {
    inner: Arc<PoolInner>,
}

impl DestinationPool {
    /// A pool with default settings and its own timer thread.
    pub fn new() -> io::Result<Self> {
        Self::builder().build()
    }

    pub fn builder() -> DestinationPoolBuilder {
        DestinationPoolBuilder::default()
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    pub fn timers(&self) -> &TimerThread {
        &self.inner.timers
    }

    /// Manager for the endpoint of `url`, created if absent.
    pub fn find_or_create(
        &self,
        url: &Url,
        via_proxy: bool,
    ) -> Result<Arc<DestinationManager>, NetError> {
        let destination = Destination::from_url(url, via_proxy)?;
        Ok(self.find_or_create_destination(destination))
    }

    pub fn find_or_create_destination(&self, destination: Destination) -> Arc<DestinationManager> {
        if let Some(manager) = self.find(destination.key()) {
            return manager;
        }

        let key = destination.key().to_string();
        let entry = self.inner.managers.entry(key).or_insert_with(|| {
            tracing::debug!(destination = %destination, "creating destination");
            self.new_manager(destination)
        });
        Arc::clone(entry.value())
    }

    fn new_manager(&self, destination: Destination) -> Arc<DestinationManager> {
        let eviction = Arc::new(PoolEviction {
            pool: Arc::downgrade(&self.inner),
        });
        let mut builder = DestinationManager::builder(destination)
            .config(self.inner.config.clone())
            .resolver(self.inner.resolver.clone())
            .socket_factory(Arc::clone(&self.inner.factory))
            .eviction(eviction);
        if let Some(bind) = &self.inner.bind {
            builder = builder.bind_strategy(Arc::clone(bind));
        }
        builder.build_on(self.inner.timers.clone())
    }

    /// Manager stored under a pool key (see [`Destination::key`]).
    pub fn find(&self, key: &str) -> Option<Arc<DestinationManager>> {
        self.inner
            .managers
            .get(key)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Drop a manager from the pool if it has no active connections.
    pub fn evict(&self, key: &str) -> bool {
        let Some(manager) = self.find(key) else {
            return false;
        };
        let groups = manager.groups();
        self.inner.evict(&manager, groups)
    }

    pub fn len(&self) -> usize {
        self.inner.managers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.managers.is_empty()
    }
}

impl PoolInner {
    fn evict(
        &self,
        manager: &Arc<DestinationManager>,
        groups: Vec<Arc<dyn ConnectionGroup>>,
    ) -> bool {
        let key = manager.destination().key();
        let removed = self.managers.remove_if(key, |_, current| {
            Arc::ptr_eq(current, manager) && manager.active_connections() == 0
        });
        if removed.is_none() {
            tracing::debug!(
                destination = %manager.destination(),
                "destination busy or gone, not evicted"
            );
            return false;
        }

        for group in &groups {
            group.disable_keep_alive();
        }
        manager.clear_groups();
        tracing::debug!(
            destination = %manager.destination(),
            groups = groups.len(),
            "destination evicted"
        );
        true
    }
}

impl fmt::Debug for DestinationPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DestinationPool")
            .field("destinations", &self.inner.managers.len())
            .field("config", &self.inner.config)
            .finish()
    }
}

struct PoolEviction {
    pool: Weak<PoolInner>,
}

impl IdleEviction for PoolEviction {
    fn on_idle(&self, manager: &Arc<DestinationManager>, groups: Vec<Arc<dyn ConnectionGroup>>) {
        if let Some(pool) = self.pool.upgrade() {
            pool.evict(manager, groups);
        }
    }
}

/// Builder for [`DestinationPool`].
#[derive(Default)]
pub struct DestinationPoolBuilder {
    config: PoolConfig,
    resolver: Option<AddressResolver>,
    factory: Option<Arc<dyn SocketFactory>>,
    timers: Option<TimerThread>,
    bind: Option<Arc<dyn BindStrategy>>,
}

impl DestinationPoolBuilder {
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

    /// Run idle timers on `timers` instead of a new dedicated thread.
    pub fn timers(mut self, timers: TimerThread) -> Self {
        self.timers = Some(timers);
        self
    }

    /// Bind strategy every new destination starts with.
    pub fn bind_strategy(mut self, strategy: Arc<dyn BindStrategy>) -> Self {
        self.bind = Some(strategy);
        self
    }

    pub fn build(self) -> io::Result<DestinationPool> {
        let timers = match self.timers {
            Some(timers) => timers,
            None => TimerThread::new()?,
        };
        Ok(DestinationPool {
            inner: Arc::new(PoolInner {
                config: self.config,
                managers: DashMap::new(),
                resolver: self.resolver.unwrap_or_default(),
                factory: self
                    .factory
                    .unwrap_or_else(|| Arc::new(TcpSocketFactory::new())),
                timers,
                bind: self.bind,
            }),
        })
    }
}
