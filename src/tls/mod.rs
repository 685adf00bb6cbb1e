//! Per-destination TLS certificate, channel-binding and behavior cache.

pub mod behavior;

pub use behavior::{CachedCertificate, ChannelBinding, HttpBehavior, TlsBehaviorCache};
