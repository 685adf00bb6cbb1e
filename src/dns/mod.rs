//! DNS Resolution Module
//!
//! Provides pluggable DNS resolution with support for:
//! - System resolver (getaddrinfo)
//! - hickory-dns resolver (DoH/DoT capable)
//! - Hostname-to-IP override mechanism
//! - Per-destination address snapshots with staleness and rotation
//! - Loopback classification against the machine's own addresses
//!
//! # Architecture
//!
//! This module mirrors Chromium's `HostResolver` concept but with a cleaner
//! Rust-idiomatic design. The `Resolve` trait is the core abstraction that
//! allows different resolver implementations to be used interchangeably;
//! [`AddressResolver`] layers snapshot construction on top of it.
//!
//! # Example
//!
//! ```rust,ignore
//! use netpoint::dns::{AddressResolver, GaiResolver, InterfaceAddresses};
//!
//! let resolver = AddressResolver::new(Arc::new(GaiResolver::new()), Arc::new(InterfaceAddresses));
//! let snapshot = resolver.lookup("example.com", 443)?;
//! for addr in snapshot.addresses() {
//!     println!("Resolved: {}", addr);
//! }
//! ```

mod gai;
mod hickory;
pub mod loopback;
mod resolve;
mod resolver;
mod snapshot;

pub use gai::GaiResolver;
pub use hickory::HickoryResolver;
pub use loopback::{guess_loopback, InterfaceAddresses, LocalAddresses, StaticAddresses};
pub use resolve::{DnsResolverWithOverrides, HostEntry, Name, Resolve};
pub use resolver::{AddressResolver, RefreshReason};
pub(crate) use resolver::AddressCache;
pub use snapshot::AddressSnapshot;
