//! Per-key fetch coordinator for paginated queries
//!
//! A `PaginatedQuery` binds a query key to a page fetcher and options. The
//! pages themselves live in the shared `QueryCache`, so two views of the same
//! key share data and the single in-flight request slot.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use feedline_api::{ApiError, CacheEvent, FeedItem, FetchTrigger, Page, QueryKey};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::core::cache::{
    FetchCompletion, FetchKind, FetchRefusal, ObserverGuard, QueryCache, QueryState,
};
use crate::core::prefetch::PrefetchContext;
use crate::core::retry::RetryPolicy;

/// Source of pages for one query, typically one REST resource.
#[async_trait]
pub trait PageFetcher<T>: Send + Sync {
    async fn fetch_page(&self, page: u32) -> Result<Page<T>, ApiError>;
}

#[async_trait]
impl<T, F, Fut> PageFetcher<T> for F
where
    T: Send + 'static,
    F: Fn(u32) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Page<T>, ApiError>> + Send,
{
    async fn fetch_page(&self, page: u32) -> Result<Page<T>, ApiError> {
        (self)(page).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryOptions {
    /// Cached data younger than this is served without refetching on mount
    pub stale_time: Duration,
    /// Idle entries without observers are dropped after this long
    pub gc_time: Duration,
    /// Disabled queries never fetch, e.g. while a required id is missing
    pub enabled: bool,
    pub retry: RetryPolicy,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            stale_time: Duration::ZERO,
            gc_time: Duration::from_secs(5 * 60),
            enabled: true,
            retry: RetryPolicy::default(),
        }
    }
}

impl QueryOptions {
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn stale_time(mut self, stale_time: Duration) -> Self {
        self.stale_time = stale_time;
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Disabled,
    /// Another request for this key is already running
    InFlight,
    /// The latest page is the last page
    NoNextPage,
    /// Cached data is fresh
    Fresh,
}

/// Result of a fetch request that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    Appended { page: u32 },
    Replaced,
    /// No request was issued
    Skipped(SkipReason),
    /// The response arrived after a refresh superseded it and was dropped
    Discarded,
}

impl From<FetchRefusal> for SkipReason {
    fn from(refusal: FetchRefusal) -> Self {
        match refusal {
            FetchRefusal::InFlight => SkipReason::InFlight,
            FetchRefusal::NoNextPage => SkipReason::NoNextPage,
        }
    }
}

impl From<FetchCompletion> for FetchOutcome {
    fn from(completion: FetchCompletion) -> Self {
        match completion {
            FetchCompletion::Appended { page } => FetchOutcome::Appended { page },
            FetchCompletion::Replaced => FetchOutcome::Replaced,
            FetchCompletion::Discarded => FetchOutcome::Discarded,
        }
    }
}

/// Coordinator for one paginated query key.
pub struct PaginatedQuery<T> {
    cache: QueryCache<T>,
    key: QueryKey,
    fetcher: Arc<dyn PageFetcher<T>>,
    options: QueryOptions,
    enabled: AtomicBool,
    _observer: ObserverGuard<T>,
}

impl<T: FeedItem> PaginatedQuery<T> {
    /// Register a view of `key` and bring its data up to date.
    ///
    /// With no cached data the first page is loaded before this returns. With
    /// stale cached data page 1 is refetched. A failed load is recorded in the
    /// query state rather than returned.
    pub async fn initialize(
        cache: &QueryCache<T>,
        key: impl Into<QueryKey>,
        fetcher: Arc<dyn PageFetcher<T>>,
        options: QueryOptions,
    ) -> Arc<Self> {
        let key = key.into();
        let (observer, _) = cache.observe(&key, options.gc_time);
        let query = Arc::new(Self {
            cache: cache.clone(),
            key,
            fetcher,
            options,
            enabled: AtomicBool::new(options.enabled),
            _observer: observer,
        });
        if let Err(e) = query.sync_on_mount().await {
            debug!(key = %query.key, error = %e, "Initial load failed");
        }
        query
    }

    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    pub fn options(&self) -> &QueryOptions {
        &self.options
    }

    pub fn cache(&self) -> &QueryCache<T> {
        &self.cache
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Current snapshot of the query.
    pub fn state(&self) -> QueryState<T> {
        self.cache.state(&self.key).unwrap_or_default()
    }

    /// Receiver that yields a new snapshot after every change.
    pub fn subscribe(&self) -> watch::Receiver<QueryState<T>> {
        self.cache.subscribe_state(&self.key, self.options.gc_time)
    }

    pub fn has_next_page(&self) -> bool {
        self.state().has_next_page
    }

    pub(crate) fn prefetch_context(&self) -> PrefetchContext {
        let state = self.state();
        PrefetchContext {
            item_count: state.items.len(),
            has_next_page: state.has_next_page,
            in_flight: state.is_fetching(),
        }
    }

    /// Enable or disable fetching. Enabling runs the mount logic again.
    pub async fn set_enabled(&self, enabled: bool) -> Result<FetchOutcome, ApiError> {
        let was_enabled = self.enabled.swap(enabled, Ordering::SeqCst);
        if enabled && !was_enabled {
            self.sync_on_mount().await
        } else {
            Ok(FetchOutcome::Skipped(SkipReason::Disabled))
        }
    }

    async fn sync_on_mount(&self) -> Result<FetchOutcome, ApiError> {
        if !self.is_enabled() {
            return Ok(FetchOutcome::Skipped(SkipReason::Disabled));
        }
        match self.cache.is_stale(&self.key, self.options.stale_time) {
            None => self.fetch_next_page().await,
            Some(true) => self.run(FetchKind::Refresh, FetchTrigger::Refresh).await,
            Some(false) => Ok(FetchOutcome::Skipped(SkipReason::Fresh)),
        }
    }

    /// Load the page after the latest one (page 1 when nothing is cached).
    pub async fn fetch_next_page(&self) -> Result<FetchOutcome, ApiError> {
        self.run(FetchKind::NextPage, FetchTrigger::User).await
    }

    /// Same as `fetch_next_page`, tagged with what triggered it.
    pub async fn fetch_next_page_with(
        &self,
        trigger: FetchTrigger,
    ) -> Result<FetchOutcome, ApiError> {
        self.run(FetchKind::NextPage, trigger).await
    }

    /// Refetch page 1 and replace every cached page for this key.
    pub async fn refresh(&self) -> Result<FetchOutcome, ApiError> {
        self.run(FetchKind::Refresh, FetchTrigger::Refresh).await
    }

    pub fn invalidate(&self) -> bool {
        self.cache.invalidate(&self.key)
    }

    /// Drop this key's cached pages; the next fetch starts again at page 1.
    pub fn remove(&self) -> bool {
        self.cache.remove(&self.key)
    }

    #[tracing::instrument(name = "query.fetch", skip(self), fields(key = %self.key))]
    async fn run(&self, kind: FetchKind, trigger: FetchTrigger) -> Result<FetchOutcome, ApiError> {
        if !self.is_enabled() {
            return Ok(FetchOutcome::Skipped(SkipReason::Disabled));
        }

        let ticket = match self
            .cache
            .begin_fetch(&self.key, kind, trigger, self.options.gc_time)
        {
            Ok(ticket) => ticket,
            Err(refusal) => {
                let reason = SkipReason::from(refusal);
                debug!(?reason, "Fetch skipped");
                return Ok(FetchOutcome::Skipped(reason));
            }
        };

        let page = ticket.page;
        debug!(page, "Fetching page");
        let result = self
            .options
            .retry
            .run(|_| self.fetcher.fetch_page(page))
            .await;

        match self.cache.complete_fetch(ticket, result) {
            Ok(completion) => {
                let outcome = FetchOutcome::from(completion);
                info!(page, ?outcome, "Fetch completed");
                Ok(outcome)
            }
            Err(e) => {
                if self.state().items.is_empty() {
                    warn!(page, error = %e, "Failed to load query");
                } else {
                    // Partial data stays visible
                    warn!(page, error = %e, "Failed to load page, keeping loaded items");
                }
                Err(e)
            }
        }
    }

    /// Refresh this query whenever its key is invalidated.
    ///
    /// The task ends when the query handle is dropped or the cache closes.
    pub fn spawn_invalidation_listener(self: &Arc<Self>) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        let mut events = self.cache.subscribe_events();
        let key = self.key.clone();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(CacheEvent::Invalidated { key: invalidated }) if invalidated == key => {
                        let Some(query) = weak.upgrade() else {
                            break;
                        };
                        if let Err(e) = query.refresh().await {
                            warn!(key = %key, error = %e, "Refetch after invalidation failed");
                        }
                    }
                    Ok(_) => {
                        if weak.strong_count() == 0 {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(key = %key, "Cache events lagged by {} messages, refreshing", n);
                        let Some(query) = weak.upgrade() else {
                            break;
                        };
                        if let Err(e) = query.refresh().await {
                            warn!(key = %key, error = %e, "Refetch after lagged events failed");
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeFeedServer, FakePost, posts};

    #[tokio::test]
    async fn test_initialize_loads_first_page() {
        let cache = QueryCache::new();
        let server = Arc::new(FakeFeedServer::with_pages(3, 10));

        let query = PaginatedQuery::initialize(
            &cache,
            "feed",
            server.clone(),
            QueryOptions::default(),
        )
        .await;

        let state = query.state();
        assert_eq!(state.items.len(), 10);
        assert!(state.has_next_page);
        assert!(!state.is_loading);
        assert_eq!(server.requested_pages(), vec![1]);
    }

    #[tokio::test]
    async fn test_disabled_query_waits_for_enable() {
        let cache = QueryCache::new();
        let server = Arc::new(FakeFeedServer::with_pages(2, 5));

        let query = PaginatedQuery::initialize(
            &cache,
            QueryKey::with_param("user-posts", 7),
            server.clone(),
            QueryOptions::default().enabled(false),
        )
        .await;
        assert_eq!(server.call_count(), 0);
        assert_eq!(
            query.fetch_next_page().await,
            Ok(FetchOutcome::Skipped(SkipReason::Disabled))
        );

        query.set_enabled(true).await.unwrap();
        assert_eq!(query.state().items.len(), 5);
        assert_eq!(server.call_count(), 1);
    }

    #[tokio::test]
    async fn test_fresh_cache_is_not_refetched_on_mount() {
        let cache = QueryCache::new();
        let server = Arc::new(FakeFeedServer::with_pages(2, 5));
        let options = QueryOptions::default().stale_time(Duration::from_secs(60));

        let _first = PaginatedQuery::initialize(&cache, "feed", server.clone(), options).await;
        let _second = PaginatedQuery::initialize(&cache, "feed", server.clone(), options).await;

        assert_eq!(server.call_count(), 1);
    }

    #[tokio::test]
    async fn test_stale_cache_is_refreshed_on_mount() {
        let cache = QueryCache::new();
        let server = Arc::new(FakeFeedServer::with_pages(3, 5));

        let first =
            PaginatedQuery::initialize(&cache, "feed", server.clone(), QueryOptions::default())
                .await;
        first.fetch_next_page().await.unwrap();
        assert_eq!(first.state().page_count, 2);

        // stale_time zero: the second mount refetches page 1 and replaces pages
        let second =
            PaginatedQuery::initialize(&cache, "feed", server.clone(), QueryOptions::default())
                .await;
        assert_eq!(second.state().page_count, 1);
        assert_eq!(server.requested_pages(), vec![1, 2, 1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_load_failure_surfaces_error_after_retries() {
        let cache: QueryCache<FakePost> = QueryCache::new();
        let server = Arc::new(FakeFeedServer::with_pages(1, 3));
        server.fail_next(4, ApiError::network("offline"));

        let query =
            PaginatedQuery::initialize(&cache, "feed", server.clone(), QueryOptions::default())
                .await;

        let state = query.state();
        assert!(state.items.is_empty());
        assert!(!state.is_loading);
        assert_eq!(state.error, Some(ApiError::network("offline")));
        assert_eq!(server.call_count(), 4);

        assert_eq!(query.refresh().await, Ok(FetchOutcome::Replaced));
        assert_eq!(query.state().error, None);
        assert_eq!(query.state().items.len(), 3);
    }

    #[tokio::test]
    async fn test_invalidation_listener_refetches() {
        let cache = QueryCache::new();
        let server = Arc::new(FakeFeedServer::with_pages(1, 2));
        let query = PaginatedQuery::initialize(
            &cache,
            "feed",
            server.clone(),
            QueryOptions::default().stale_time(Duration::from_secs(60)),
        )
        .await;
        let mut rx = query.subscribe();
        let listener = query.spawn_invalidation_listener();

        server.replace_page(1, posts(100..=102));
        cache.invalidate(&QueryKey::from("feed"));

        rx.wait_for(|s| s.items.len() == 3).await.unwrap();
        assert_eq!(query.state().items[0].id.as_deref(), Some("post-100"));
        listener.abort();
    }
}
