use serde::{Deserialize, Serialize};

use crate::QueryKey;

/// Notification emitted by the query cache whenever an entry changes.
///
/// Subscribers receive these over a broadcast channel; the entry's current
/// state is read from the cache, the event only names what happened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CacheEvent {
    /// Pages were appended, replaced or edited in place
    Updated { key: QueryKey },
    /// Entry was marked stale and should be refetched by active views
    Invalidated { key: QueryKey },
    /// Entry was dropped (explicit removal or garbage collection)
    Removed { key: QueryKey },
}

impl CacheEvent {
    pub fn key(&self) -> &QueryKey {
        match self {
            CacheEvent::Updated { key }
            | CacheEvent::Invalidated { key }
            | CacheEvent::Removed { key } => key,
        }
    }
}

/// What caused a fetch. Drives the list footer indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FetchTrigger {
    /// First load or an explicit load-more from the user
    User,
    /// Background prefetch fired by the prefetch policy
    Eager,
    /// Pull-to-refresh or invalidation refetch
    Refresh,
}
