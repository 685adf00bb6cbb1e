use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;

/// Errors surfaced by the resolver, admission and connect paths.
///
/// Underlying I/O causes are kept behind `Arc` so the error stays `Clone`
/// and can be handed to several waiters of the same attempt.
#[derive(Debug, Error, Clone)]
pub enum NetError {
    // Resolver-level errors (a single lookup)
    #[error("Name not resolved")]
    NameNotResolved,
    #[error("Name not resolved: {domain}")]
    NameNotResolvedFor {
        domain: String,
        #[source]
        source: Arc<io::Error>,
    },

    // Connect outcomes
    #[error("Name resolution failed for {host}")]
    NameResolutionFailure { host: String },
    #[error("Proxy name resolution failed for {host}")]
    ProxyNameResolutionFailure { host: String },
    #[error("Connection to {host}:{port} failed: {source}")]
    ConnectFailure {
        host: String,
        port: u16,
        #[source]
        source: Arc<io::Error>,
    },
    #[error("Request canceled")]
    RequestCanceled,
    #[error("Binding a local endpoint for {remote} failed after {attempts} attempts")]
    BindRetryExhausted {
        remote: SocketAddr,
        attempts: u32,
        #[source]
        source: Option<Arc<io::Error>>,
    },
    #[error("Address family not supported")]
    AddressFamilyNotSupported,
    #[error("Socket is already connected")]
    SocketIsConnected,

    // Caller errors
    #[error("Invalid URL")]
    InvalidUrl,
    #[error("Invalid argument: {0}")]
    InvalidArgument(&'static str),
}

impl NetError {
    /// Chromium `net_error_list.h` code closest to this error.
    pub fn as_i32(&self) -> i32 {
        match self {
            NetError::RequestCanceled => -3,
            NetError::InvalidArgument(_) => -4,
            NetError::SocketIsConnected => -23,
            NetError::ConnectFailure { .. } => -104,
            NetError::NameNotResolved => -105,
            NetError::NameNotResolvedFor { .. } => -105,
            NetError::AddressFamilyNotSupported => -108,
            NetError::ProxyNameResolutionFailure { .. } => -130,
            NetError::NameResolutionFailure { .. } => -137,
            NetError::BindRetryExhausted { .. } => -147,
            NetError::InvalidUrl => -300,
        }
    }

    /// True for both the direct and the proxy flavour of a failed resolution.
    pub fn is_name_resolution(&self) -> bool {
        matches!(
            self,
            NetError::NameNotResolved
                | NetError::NameNotResolvedFor { .. }
                | NetError::NameResolutionFailure { .. }
                | NetError::ProxyNameResolutionFailure { .. }
        )
    }

    pub(crate) fn connect_failure(host: &str, port: u16, source: io::Error) -> Self {
        NetError::ConnectFailure {
            host: host.to_string(),
            port,
            source: Arc::new(source),
        }
    }

    pub(crate) fn dns_failed(domain: &str, source: io::Error) -> Self {
        NetError::NameNotResolvedFor {
            domain: domain.to_string(),
            source: Arc::new(source),
        }
    }
}
