//! Connection groups that live under a destination.

/// A sub-pool that queues requests onto the connections of one destination.
///
/// Groups are owned elsewhere; a destination only keeps them in its
/// registry so it can push admission changes and shut them down on
/// eviction. Neither method is ever called with a destination lock held.
pub trait ConnectionGroup: Send + Sync {
    /// New admission limit for this group.
    fn set_connection_limit(&self, limit: usize);

    /// Stop reusing connections once they finish their current request.
    fn disable_keep_alive(&self);
}
