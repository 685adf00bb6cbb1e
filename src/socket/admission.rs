//! Per-destination admission limit.
//!
//! The limit is either set explicitly or derived from whether the
//! destination is loopback. Before the first resolution that is a guess from
//! the host string; afterwards it follows the resolved snapshot.

use crate::base::neterror::NetError;
use crate::dns::{guess_loopback, AddressSnapshot};
use crate::socket::config::LOOPBACK_CONNECTION_LIMIT;

#[derive(Debug, Clone)]
pub(crate) struct Admission {
    explicit: Option<usize>,
    loopback: bool,
    resolved: bool,
    default_limit: usize,
}

impl Admission {
    pub(crate) fn new(host: &str, default_limit: usize) -> Self {
        Self {
            explicit: None,
            loopback: guess_loopback(host),
            resolved: false,
            default_limit,
        }
    }

    pub(crate) fn limit(&self) -> usize {
        match self.explicit {
            Some(limit) => limit,
            None if self.loopback => LOOPBACK_CONNECTION_LIMIT,
            None => self.default_limit,
        }
    }

    pub(crate) fn is_explicit(&self) -> bool {
        self.explicit.is_some()
    }

    pub(crate) fn is_loopback(&self) -> bool {
        self.loopback
    }

    /// Whether the loopback flag comes from a resolution rather than a guess.
    pub(crate) fn is_resolved(&self) -> bool {
        self.resolved
    }

    pub(crate) fn set_explicit(&mut self, limit: usize) -> Result<usize, NetError> {
        if limit == 0 {
            return Err(NetError::InvalidArgument(
                "connection limit must be positive",
            ));
        }
        self.explicit = Some(limit);
        Ok(limit)
    }

    /// Take the loopback flag of a fresh snapshot. Returns the new limit when
    /// it changed as a result, so the caller can push it to the groups.
    ///
    /// Empty snapshots (failed resolutions) leave the classification alone.
    pub(crate) fn observe_resolution(&mut self, snapshot: &AddressSnapshot) -> Option<usize> {
        if snapshot.is_empty() {
            return None;
        }
        let was_loopback = self.loopback;
        self.loopback = snapshot.is_loopback();
        self.resolved = true;

        if was_loopback == self.loopback || self.explicit.is_some() {
            return None;
        }
        tracing::debug!(
            loopback = self.loopback,
            limit = self.limit(),
            "loopback classification changed"
        );
        Some(self.limit())
    }
}
