//! Paginated feed synchronization for the social client.
//!
//! - `core::cache` - QueryCache, the shared query key -> pages map
//! - `core::query` - PaginatedQuery, the per-key fetch coordinator
//! - `core::retry` - RetryPolicy wrapping any fetch with backoff
//! - `core::prefetch` - eager next-page policy and its event-driven driver
//! - `core::mutation` - optimistic like/delete edits across entries
//! - `list` - four-state list view model fed by viewport events
//! - `config` - YAML configuration

pub mod config;
pub mod core;
pub mod list;
pub mod testing;

pub use config::FeedlineConfig;
pub use core::cache::{QueryCache, QueryState};
pub use core::mutation::mutate_optimistically;
pub use core::prefetch::{PrefetchDriver, PrefetchPolicy, ViewportEvent};
pub use core::query::{FetchOutcome, PageFetcher, PaginatedQuery, QueryOptions, SkipReason};
pub use core::retry::RetryPolicy;
pub use list::{Footer, ListDriver, ListView};

pub use feedline_api::{
    ApiError, CacheEvent, FeedItem, FetchTrigger, ItemId, Page, PageMeta, QueryKey,
};
