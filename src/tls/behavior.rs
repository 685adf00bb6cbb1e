//! What a destination's TLS sessions and HTTP responses have told us.
//!
//! The handshake layer reports certificates and the channel-binding token
//! after each handshake; the HTTP layer reports the response versions it
//! sees. Nothing here performs a handshake.

use crate::socket::destination::Destination;
use boring::hash::{hash, MessageDigest};
use boring::x509::X509;
use bytes::Bytes;
use parking_lot::RwLock;
use std::fmt;
use std::sync::{Arc, OnceLock};
use zeroize::Zeroizing;

/// What the peer is believed to support at the HTTP level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HttpBehavior {
    /// Nothing observed yet.
    #[default]
    Unknown,
    Http10,
    /// HTTP/1.1, but `Expect: 100-continue` is not honoured.
    Http11PartiallyCompliant,
    Http11,
}

impl HttpBehavior {
    /// Behavior implied by a response version.
    pub fn from_version(major: u8, minor: u8) -> Self {
        match (major, minor) {
            (0, _) | (1, 0) => HttpBehavior::Http10,
            _ => HttpBehavior::Http11,
        }
    }

    pub fn supports_pipelining(self) -> bool {
        !matches!(self, HttpBehavior::Http10)
    }

    pub fn supports_expect_continue(self) -> bool {
        matches!(self, HttpBehavior::Unknown | HttpBehavior::Http11)
    }
}

/// A DER certificate, parsed on first use.
pub struct CachedCertificate {
    raw: Bytes,
    parsed: OnceLock<Option<X509>>,
}

impl CachedCertificate {
    pub fn new(raw: impl Into<Bytes>) -> Self {
        Self {
            raw: raw.into(),
            parsed: OnceLock::new(),
        }
    }

    pub fn raw(&self) -> &Bytes {
        &self.raw
    }

    /// Parsed certificate. `None` if the bytes are not valid DER.
    pub fn parsed(&self) -> Option<&X509> {
        self.parsed
            .get_or_init(|| match X509::from_der(&self.raw) {
                Ok(cert) => Some(cert),
                Err(e) => {
                    tracing::warn!(
                        len = self.raw.len(),
                        error = %e,
                        "cached certificate is not valid DER"
                    );
                    None
                }
            })
            .as_ref()
    }

    /// Whether [`parsed`](Self::parsed) has run yet.
    pub fn is_materialized(&self) -> bool {
        self.parsed.get().is_some()
    }

    /// SHA-256 of the certificate's SubjectPublicKeyInfo.
    pub fn spki_sha256(&self) -> Option<[u8; 32]> {
        let spki = self.parsed()?.public_key().ok()?.public_key_to_der().ok()?;
        let digest = hash(MessageDigest::sha256(), &spki).ok()?;
        let mut out = [0u8; 32];
        out.copy_from_slice(&digest);
        Some(out)
    }
}

impl fmt::Debug for CachedCertificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedCertificate")
            .field("len", &self.raw.len())
            .field("materialized", &self.is_materialized())
            .finish()
    }
}

/// A TLS channel-binding token. Wiped from memory on drop.
pub struct ChannelBinding {
    token: Zeroizing<Vec<u8>>,
}

impl ChannelBinding {
    pub fn as_bytes(&self) -> &[u8] {
        &self.token
    }
}

impl fmt::Debug for ChannelBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelBinding")
            .field("len", &self.token.len())
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
struct TlsState {
    server_certificate: Option<Arc<CachedCertificate>>,
    client_certificate: Option<Arc<CachedCertificate>>,
    channel_binding: Option<Arc<ChannelBinding>>,
    behavior: HttpBehavior,
}

/// Last-seen TLS material and protocol behavior for one destination.
#[derive(Default)]
pub struct TlsBehaviorCache {
    state: RwLock<TlsState>,
}

impl TlsBehaviorCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the server certificate. Identical bytes keep the existing
    /// parsed form.
    pub fn update_server_certificate(&self, raw: impl Into<Bytes>) {
        let mut state = self.state.write();
        replace_certificate(&mut state.server_certificate, raw.into());
    }

    pub fn update_client_certificate(&self, raw: impl Into<Bytes>) {
        let mut state = self.state.write();
        replace_certificate(&mut state.client_certificate, raw.into());
    }

    pub fn server_certificate(&self) -> Option<Arc<CachedCertificate>> {
        self.state.read().server_certificate.clone()
    }

    pub fn client_certificate(&self) -> Option<Arc<CachedCertificate>> {
        self.state.read().client_certificate.clone()
    }

    /// Remember the channel-binding token of the latest handshake with
    /// `destination`. Ignored (returns `false`) for non-secure schemes.
    pub fn cache_channel_binding(
        &self,
        destination: &Destination,
        token: impl Into<Vec<u8>>,
    ) -> bool {
        if !destination.is_secure() {
            tracing::warn!(
                destination = %destination,
                "channel binding offered for a non-secure destination"
            );
            return false;
        }
        let binding = ChannelBinding {
            token: Zeroizing::new(token.into()),
        };
        self.state.write().channel_binding = Some(Arc::new(binding));
        true
    }

    pub fn channel_binding(&self) -> Option<Arc<ChannelBinding>> {
        self.state.read().channel_binding.clone()
    }

    /// Record what the latest response showed. The newest observation
    /// replaces the previous one, upgrades included.
    pub fn observe_behavior(&self, behavior: HttpBehavior) {
        let mut state = self.state.write();
        if state.behavior != behavior {
            tracing::debug!(from = ?state.behavior, to = ?behavior, "http behavior changed");
            state.behavior = behavior;
        }
    }

    /// Record the version of a response and return the behavior it implies.
    pub fn observe_version(&self, major: u8, minor: u8) -> HttpBehavior {
        let behavior = HttpBehavior::from_version(major, minor);
        self.observe_behavior(behavior);
        behavior
    }

    pub fn http_behavior(&self) -> HttpBehavior {
        self.state.read().behavior
    }

    pub fn supports_pipelining(&self) -> bool {
        self.http_behavior().supports_pipelining()
    }

    pub fn supports_expect_continue(&self) -> bool {
        self.http_behavior().supports_expect_continue()
    }
}

impl fmt::Debug for TlsBehaviorCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.read();
        f.debug_struct("TlsBehaviorCache")
            .field("server_certificate", &state.server_certificate)
            .field("client_certificate", &state.client_certificate)
            .field("channel_binding", &state.channel_binding.is_some())
            .field("behavior", &state.behavior)
            .finish()
    }
}

fn replace_certificate(slot: &mut Option<Arc<CachedCertificate>>, raw: Bytes) {
    if slot.as_ref().is_some_and(|cert| cert.raw == raw) {
        return;
    }
    *slot = Some(Arc::new(CachedCertificate::new(raw)));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_behavior_table() {
        use HttpBehavior::*;
        let table = [
            (Unknown, true, true),
            (Http11, true, true),
            (Http11PartiallyCompliant, true, false),
            (Http10, false, false),
        ];
        for (behavior, pipelining, expect) in table {
            assert_eq!(behavior.supports_pipelining(), pipelining, "{behavior:?}");
            assert_eq!(behavior.supports_expect_continue(), expect, "{behavior:?}");
        }
    }

    #[test]
    fn test_downgrade_is_not_sticky() {
        let cache = TlsBehaviorCache::new();
        assert!(cache.supports_pipelining());

        assert_eq!(cache.observe_version(1, 0), HttpBehavior::Http10);
        assert!(!cache.supports_pipelining());

        cache.observe_version(1, 1);
        assert!(cache.supports_pipelining());
        assert!(cache.supports_expect_continue());

        cache.observe_behavior(HttpBehavior::Http11PartiallyCompliant);
        assert!(cache.supports_pipelining());
        assert!(!cache.supports_expect_continue());
    }

    #[test]
    fn test_channel_binding_secure_only() {
        let cache = TlsBehaviorCache::new();
        let plain = Destination::new("http", "example.com", 80, false);
        assert!(!cache.cache_channel_binding(&plain, b"token".to_vec()));
        assert!(cache.channel_binding().is_none());

        let secure = Destination::new("https", "example.com", 443, false);
        assert!(cache.cache_channel_binding(&secure, b"token".to_vec()));
        assert_eq!(cache.channel_binding().unwrap().as_bytes(), b"token");
    }

    #[test]
    fn test_garbage_certificate_parses_to_none() {
        let cache = TlsBehaviorCache::new();
        cache.update_server_certificate(&b"not a certificate"[..]);
        let cert = cache.server_certificate().unwrap();
        assert!(!cert.is_materialized());
        assert!(cert.parsed().is_none());
        assert!(cert.is_materialized());
        assert!(cert.spki_sha256().is_none());
    }

    #[test]
    fn test_same_bytes_keep_parsed_form() {
        let cache = TlsBehaviorCache::new();
        cache.update_client_certificate(vec![1, 2, 3]);
        let first = cache.client_certificate().unwrap();
        cache.update_client_certificate(vec![1, 2, 3]);
        assert!(Arc::ptr_eq(&first, &cache.client_certificate().unwrap()));

        cache.update_client_certificate(vec![4]);
        assert!(!Arc::ptr_eq(&first, &cache.client_certificate().unwrap()));
    }
}
