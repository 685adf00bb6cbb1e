//! Pool-wide configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Limit used for destinations that are not loopback and have no explicit
/// limit (Chromium's per-group default).
pub const DEFAULT_CONNECTION_LIMIT: usize = 6;
/// Limit reported for loopback destinations.
pub const LOOPBACK_CONNECTION_LIMIT: usize = usize::MAX;
/// How long a destination may sit with no active connections before it is
/// evicted.
pub const DEFAULT_MAX_IDLE_TIME: Duration = Duration::from_secs(100);
/// How long an address snapshot is trusted before it is re-resolved.
pub const DEFAULT_DNS_REFRESH_TIMEOUT: Duration = Duration::from_secs(120);
pub const DEFAULT_MAX_BIND_RETRIES: u32 = 5;

/// TCP keepalive parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TcpKeepAlive {
    /// Idle time before the first probe.
    pub time: Duration,
    /// Interval between probes.
    pub interval: Duration,
}

impl TcpKeepAlive {
    pub fn new(time: Duration, interval: Duration) -> Self {
        Self { time, interval }
    }
}

/// Options applied to a connected socket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SocketOptions {
    /// Disable Nagle's algorithm.
    pub no_delay: bool,
    /// SO_RCVBUF in bytes. `None` leaves the OS default.
    pub recv_buffer_size: Option<usize>,
    /// `None` leaves keepalive off.
    pub keepalive: Option<TcpKeepAlive>,
    /// SO_REUSEADDR. Set before bind/connect, unlike the other options.
    pub reuse_address: bool,
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self {
            no_delay: true,
            recv_buffer_size: None,
            keepalive: None,
            reuse_address: false,
        }
    }
}

impl SocketOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn no_delay(mut self, enabled: bool) -> Self {
        self.no_delay = enabled;
        self
    }

    pub fn recv_buffer_size(mut self, size: usize) -> Self {
        self.recv_buffer_size = Some(size);
        self
    }

    pub fn keepalive(mut self, keepalive: TcpKeepAlive) -> Self {
        self.keepalive = Some(keepalive);
        self
    }

    pub fn reuse_address(mut self, enabled: bool) -> Self {
        self.reuse_address = enabled;
        self
    }
}

/// Configuration shared by every destination of a pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Admission limit for non-loopback destinations without an explicit limit.
    pub default_connection_limit: usize,
    /// Idle time before a destination is evicted. `Duration::MAX` never evicts.
    pub max_idle_time: Duration,
    /// Snapshot lifetime. `None` never expires.
    pub dns_refresh_timeout: Option<Duration>,
    /// Rotate the preferred address on every resolution.
    pub round_robin: bool,
    /// Bind attempts per address before giving up on it.
    pub max_bind_retries: u32,
    /// Per-address connect timeout. `None` waits for the OS.
    pub connect_timeout: Option<Duration>,
    pub socket_options: SocketOptions,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            default_connection_limit: DEFAULT_CONNECTION_LIMIT,
            max_idle_time: DEFAULT_MAX_IDLE_TIME,
            dns_refresh_timeout: Some(DEFAULT_DNS_REFRESH_TIMEOUT),
            round_robin: false,
            max_bind_retries: DEFAULT_MAX_BIND_RETRIES,
            connect_timeout: None,
            socket_options: SocketOptions::default(),
        }
    }
}

impl PoolConfig {
    /// Create a new config with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn default_connection_limit(mut self, limit: usize) -> Self {
        self.default_connection_limit = limit;
        self
    }

    pub fn max_idle_time(mut self, duration: Duration) -> Self {
        self.max_idle_time = duration;
        self
    }

    pub fn dns_refresh_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.dns_refresh_timeout = timeout;
        self
    }

    pub fn round_robin(mut self, enabled: bool) -> Self {
        self.round_robin = enabled;
        self
    }

    pub fn max_bind_retries(mut self, retries: u32) -> Self {
        self.max_bind_retries = retries;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn socket_options(mut self, options: SocketOptions) -> Self {
        self.socket_options = options;
        self
    }
}
