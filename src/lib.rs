//! # netpoint
//!
//! The per-destination half of a Chromium-style client transport layer.
//!
//! For every remote endpoint a client talks to, `netpoint` keeps one
//! [`DestinationManager`](socket::DestinationManager) that resolves and
//! caches the endpoint's addresses, decides how many connections it may
//! have, connects to it with address failover, and evicts it once it has
//! been idle for long enough.
//!
//! ## Features
//!
//! - **Address snapshots**: staleness, failure marking, and round-robin or
//!   affinity rotation over resolved addresses
//! - **Admission limits**: 6 connections per destination, unlimited for
//!   loopback, explicit overrides pushed to every connection group
//! - **Connect failover**: dual-stack, two resolution passes, bind retries,
//!   blocking or async with cancellation
//! - **Idle eviction**: one timer per idle destination on a dedicated timer
//!   thread
//! - **TLS behavior cache**: certificates, channel binding, HTTP behavior
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use netpoint::base::cancel::CancelToken;
//! use netpoint::socket::DestinationPool;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let pool = DestinationPool::new()?;
//!     let url = url::Url::parse("http://example.com/")?;
//!     let manager = pool.find_or_create(&url, false)?;
//!
//!     let connection = manager.connect_async(&CancelToken::new()).await?;
//!     println!("connected to {}", connection.remote());
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`base`] - Errors, timers, cancellation and load states
//! - [`dns`] - Name resolution, address snapshots and loopback detection
//! - [`socket`] - Destinations, admission, connect attempts and the pool
//! - [`tls`] - Per-destination TLS behavior cache

pub mod base;
pub mod dns;
pub mod socket;
pub mod tls;
