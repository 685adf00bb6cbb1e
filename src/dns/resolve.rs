//! Core DNS resolution types and traits.
//!
//! This module defines the `Resolve` trait and supporting types that form
//! the name-resolution seam under the address resolver.

use crate::base::neterror::NetError;
use std::{borrow::Cow, collections::HashMap, fmt, net::SocketAddr, sync::Arc};

/// A domain name to resolve into IP addresses.
///
/// This is a lightweight wrapper around a hostname string that provides
/// a type-safe way to pass domain names to resolvers.
#[derive(Clone, Hash, Eq, PartialEq)]
pub struct Name {
    host: Box<str>,
}

impl Name {
    /// Creates a new [`Name`] from any string-like type.
    #[inline]
    pub fn new(host: impl Into<Box<str>>) -> Self {
        Self { host: host.into() }
    }

    /// View the hostname as a string slice.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.host
    }
}

impl From<&str> for Name {
    fn from(value: &str) -> Self {
        Name::new(value)
    }
}

impl From<String> for Name {
    fn from(value: String) -> Self {
        Name::new(value)
    }
}

impl fmt::Debug for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.host, f)
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.host, f)
    }
}

/// Result of a successful lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostEntry {
    /// Resolved addresses in resolver order. Port 0 means "use the
    /// destination port"; any other port is kept as-is.
    pub addrs: Vec<SocketAddr>,
    /// Canonical name reported by the resolver (the queried name if the
    /// resolver does not report one).
    pub canonical_name: String,
    /// Whether the resolver vouches that the answer belongs to the queried
    /// name without redirection.
    pub trusted: bool,
}

impl HostEntry {
    /// An entry for `name` whose canonical name is the name itself.
    pub fn new(name: &Name, addrs: Vec<SocketAddr>) -> Self {
        Self {
            addrs,
            canonical_name: name.as_str().to_string(),
            trusted: true,
        }
    }
}

/// Trait for DNS resolution.
///
/// This is the name-resolution function the address resolver calls,
/// equivalent to Chromium's `HostResolver`. Implementations must be
/// thread-safe.
///
/// # Design Notes
///
/// - Resolution is blocking. Async callers run it on the blocking pool.
/// - Uses `&self` for concurrent resolution without mutable access.
/// - An empty answer is an error, never `Ok` with no addresses.
pub trait Resolve: Send + Sync {
    /// Resolves a domain name to IP addresses.
    fn resolve(&self, name: &Name) -> Result<HostEntry, NetError>;
}

/// Blanket implementation for Arc-wrapped resolvers.
impl<R: Resolve + ?Sized> Resolve for Arc<R> {
    fn resolve(&self, name: &Name) -> Result<HostEntry, NetError> {
        (**self).resolve(name)
    }
}

/// Fixed host-to-address answers in front of another resolver.
///
/// Keys match case-insensitively and ignore a trailing dot. An override
/// with no addresses makes the host fail to resolve. Override addresses
/// with port 0 take the destination port like any other answer.
///
/// ```rust,ignore
/// use netpoint::dns::{DnsResolverWithOverrides, GaiResolver};
///
/// let mut overrides = HashMap::new();
/// overrides.insert("api.local".into(), vec!["127.0.0.1:0".parse()?]);
/// let resolver = DnsResolverWithOverrides::new(Arc::new(GaiResolver::new()), overrides);
/// ```
pub struct DnsResolverWithOverrides {
    inner: Arc<dyn Resolve>,
    overrides: HashMap<Cow<'static, str>, Vec<SocketAddr>>,
}

impl DnsResolverWithOverrides {
    pub fn new(
        inner: Arc<dyn Resolve>,
        overrides: HashMap<Cow<'static, str>, Vec<SocketAddr>>,
    ) -> Self {
        let overrides = overrides
            .into_iter()
            .map(|(host, addrs)| (Cow::Owned(override_key(&host)), addrs))
            .collect();
        Self { inner, overrides }
    }

    pub fn override_count(&self) -> usize {
        self.overrides.len()
    }
}

fn override_key(host: &str) -> String {
    host.trim_end_matches('.').to_ascii_lowercase()
}

impl Resolve for DnsResolverWithOverrides {
    fn resolve(&self, name: &Name) -> Result<HostEntry, NetError> {
        match self.overrides.get(override_key(name.as_str()).as_str()) {
            Some(addrs) if addrs.is_empty() => Err(NetError::NameNotResolved),
            Some(addrs) => {
                tracing::trace!(host = %name, count = addrs.len(), "resolved from overrides");
                Ok(HostEntry::new(name, addrs.clone()))
            }
            None => self.inner.resolve(name),
        }
    }
}

impl fmt::Debug for DnsResolverWithOverrides {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DnsResolverWithOverrides")
            .field("override_count", &self.overrides.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    #[test]
    fn test_name_from_str() {
        let name = Name::from("example.com");
        assert_eq!(name.as_str(), "example.com");
        assert_eq!(name.to_string(), "example.com");
    }

    #[test]
    fn test_name_equality() {
        let name1 = Name::new("example.com");
        let name2 = Name::new("example.com");
        let name3 = Name::new("other.com");

        assert_eq!(name1, name2);
        assert_ne!(name1, name3);
    }

    struct MockResolver {
        response: Vec<SocketAddr>,
    }

    impl Resolve for MockResolver {
        fn resolve(&self, name: &Name) -> Result<HostEntry, NetError> {
            Ok(HostEntry::new(name, self.response.clone()))
        }
    }

    #[test]
    fn test_override_resolver_hit() {
        let mock = Arc::new(MockResolver {
            response: vec![SocketAddr::new(IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8)), 0)],
        });

        let mut overrides = HashMap::new();
        overrides.insert(
            Cow::Borrowed("override.local"),
            vec![SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 0)],
        );

        let resolver = DnsResolverWithOverrides::new(mock, overrides);
        let entry = resolver.resolve(&Name::new("override.local")).unwrap();

        assert_eq!(entry.addrs.len(), 1);
        assert_eq!(entry.addrs[0].ip(), IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)));
        assert_eq!(entry.canonical_name, "override.local");
        assert!(entry.trusted);
    }

    #[test]
    fn test_override_resolver_miss() {
        let mock = Arc::new(MockResolver {
            response: vec![SocketAddr::new(IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8)), 0)],
        });

        let resolver = DnsResolverWithOverrides::new(mock, HashMap::new());
        let entry = resolver.resolve(&Name::new("not-overridden.com")).unwrap();

        assert_eq!(entry.addrs.len(), 1);
        assert_eq!(entry.addrs[0].ip(), IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8)));
    }

    #[test]
    fn test_empty_override_is_failure() {
        let mock = Arc::new(MockResolver { response: vec![] });
        let mut overrides = HashMap::new();
        overrides.insert(Cow::Borrowed("blackhole.local"), Vec::new());

        let resolver = DnsResolverWithOverrides::new(mock, overrides);
        assert!(resolver.resolve(&Name::new("blackhole.local")).is_err());
    }

    #[test]
    fn test_override_keys_are_normalized() {
        let mock = Arc::new(MockResolver { response: vec![] });
        let addr: SocketAddr = "10.1.1.1:0".parse().unwrap();
        let mut overrides = HashMap::new();
        overrides.insert(Cow::Borrowed("API.Local."), vec![addr]);

        let resolver = DnsResolverWithOverrides::new(mock, overrides);
        for host in ["api.local", "API.LOCAL", "api.local."] {
            let entry = resolver.resolve(&Name::new(host)).unwrap();
            assert_eq!(entry.addrs, vec![addr], "{host}");
        }
    }
}
