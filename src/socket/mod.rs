//! Per-destination connection management.
//!
//! Mirrors the destination-level half of Chromium's `net/socket/`:
//! - [`destination`]: destination identity and per-destination state
//! - [`admission`]: loopback-aware admission limits
//! - [`connectjob`]: two-pass address failover, sync and async
//! - [`idle`]: idle timers and eviction
//! - [`pool`]: the pool that owns every destination

pub mod admission;
pub mod bind;
pub mod config;
pub mod connectjob;
pub mod destination;
pub mod factory;
pub mod group;
pub mod idle;
pub mod pool;

pub use bind::{BindStrategy, LocalPortRange};
pub use config::{PoolConfig, SocketOptions, TcpKeepAlive};
pub use connectjob::{ActiveConnection, ConnectAttempt, ConnectStep, Connection, ConnectionAttempt};
pub use destination::{Destination, DestinationManager, DestinationManagerBuilder};
pub use factory::{AddressFamily, SocketFactory, TcpSocketFactory};
pub use group::ConnectionGroup;
pub use idle::IdleEviction;
pub use pool::{DestinationPool, DestinationPoolBuilder};
