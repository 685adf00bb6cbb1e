//! Context adapters for `io::Result`.
//!
//! Lookups and binds fail with bare `io::Error`s; these helpers turn them
//! into the [`NetError`] kind the caller reports, keeping the I/O error as
//! the source.

use crate::base::neterror::NetError;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

pub trait IoResultExt<T> {
    /// A failed name lookup for `domain`.
    fn dns_context(self, domain: &str) -> Result<T, NetError>;

    /// A failed bind for a socket headed to `remote`, after `attempts`
    /// binds in total.
    fn bind_context(self, remote: SocketAddr, attempts: u32) -> Result<T, NetError>;
}

impl<T> IoResultExt<T> for io::Result<T> {
    fn dns_context(self, domain: &str) -> Result<T, NetError> {
        self.map_err(|e| NetError::dns_failed(domain, e))
    }

    fn bind_context(self, remote: SocketAddr, attempts: u32) -> Result<T, NetError> {
        self.map_err(|e| NetError::BindRetryExhausted {
            remote,
            attempts,
            source: Some(Arc::new(e)),
        })
    }
}
