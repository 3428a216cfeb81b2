//! Shared query cache: query key -> ordered pages plus fetch status
//!
//! One `QueryCache<T>` holds every paginated query for one item type. It is a
//! cheap-to-clone handle; clones share the same entries. All mutation happens
//! in short critical sections that are never held across an `.await`.
//!
//! Each entry publishes a `QueryState` snapshot on a watch channel after every
//! change, and the cache as a whole broadcasts `CacheEvent`s naming the key
//! that changed.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use feedline_api::{ApiError, CacheEvent, FeedItem, FetchTrigger, Page, QueryKey};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::core::dedup::flatten_pages;

/// Observable state of one paginated query.
///
/// `items` is a fresh allocation whenever the collection changes.
#[derive(Debug, Clone)]
pub struct QueryState<T> {
    pub items: Arc<[T]>,
    /// First fetch with no cached data
    pub is_loading: bool,
    /// A next-page request is in flight (user or eager)
    pub is_fetching_next_page: bool,
    /// The in-flight next-page request was started by the prefetch policy
    pub is_prefetching: bool,
    /// Page 1 is being refetched while cached data is shown
    pub is_refreshing: bool,
    pub has_next_page: bool,
    pub error: Option<ApiError>,
    pub page_count: usize,
    pub updated_at: Option<Instant>,
}

impl<T> QueryState<T> {
    pub fn is_fetching(&self) -> bool {
        self.is_loading || self.is_fetching_next_page || self.is_refreshing
    }
}

impl<T> Default for QueryState<T> {
    fn default() -> Self {
        Self {
            items: Arc::from(Vec::new()),
            is_loading: false,
            is_fetching_next_page: false,
            is_prefetching: false,
            is_refreshing: false,
            has_next_page: false,
            error: None,
            page_count: 0,
            updated_at: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FetchKind {
    NextPage,
    Refresh,
}

#[derive(Debug, Clone, Copy)]
struct InFlight {
    kind: FetchKind,
    trigger: FetchTrigger,
}

/// Handed out by `begin_fetch`, returned to `complete_fetch`.
#[derive(Debug, Clone)]
pub(crate) struct FetchTicket {
    pub key: QueryKey,
    pub page: u32,
    pub kind: FetchKind,
    generation: u64,
}

#[derive(Debug)]
pub(crate) enum FetchRefusal {
    InFlight,
    NoNextPage,
}

#[derive(Debug)]
pub(crate) enum FetchCompletion {
    Appended { page: u32 },
    Replaced,
    Discarded,
}

struct CacheEntry<T> {
    pages: Vec<Page<T>>,
    items: Arc<[T]>,
    in_flight: Option<InFlight>,
    error: Option<ApiError>,
    fetched_at: Option<Instant>,
    invalidated: bool,
    generation: u64,
    gc_time: Duration,
    observers: usize,
    idle_since: Option<Instant>,
    state_tx: watch::Sender<QueryState<T>>,
}

impl<T: FeedItem> CacheEntry<T> {
    fn new(gc_time: Duration, generation: u64) -> Self {
        let (state_tx, _) = watch::channel(QueryState::default());
        Self {
            pages: Vec::new(),
            items: Arc::from(Vec::new()),
            in_flight: None,
            error: None,
            fetched_at: None,
            invalidated: false,
            generation,
            gc_time,
            observers: 0,
            idle_since: Some(Instant::now()),
            state_tx,
        }
    }

    fn has_next_page(&self) -> bool {
        self.pages
            .last()
            .is_some_and(|page| page.meta.has_next())
    }

    fn snapshot(&self) -> QueryState<T> {
        let has_data = !self.pages.is_empty();
        let next_page = self
            .in_flight
            .filter(|f| has_data && f.kind == FetchKind::NextPage);
        QueryState {
            items: Arc::clone(&self.items),
            is_loading: self.in_flight.is_some() && !has_data,
            is_fetching_next_page: next_page.is_some(),
            is_prefetching: next_page.is_some_and(|f| f.trigger == FetchTrigger::Eager),
            is_refreshing: has_data
                && self.in_flight.is_some_and(|f| f.kind == FetchKind::Refresh),
            has_next_page: self.has_next_page(),
            error: self.error.clone(),
            page_count: self.pages.len(),
            updated_at: self.fetched_at,
        }
    }

    fn publish(&self) {
        self.state_tx.send_replace(self.snapshot());
    }

    /// Recompute the flattened collection and publish it.
    fn pages_changed(&mut self) {
        self.items = flatten_pages(&self.pages);
        self.publish();
    }

    fn is_stale(&self, stale_time: Duration, now: Instant) -> bool {
        match self.fetched_at {
            None => true,
            Some(at) => self.invalidated || now.saturating_duration_since(at) >= stale_time,
        }
    }
}

struct Inner<T> {
    entries: HashMap<QueryKey, CacheEntry<T>>,
    next_generation: u64,
}

impl<T: FeedItem> Inner<T> {
    fn bump_generation(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }

    fn entry(&mut self, key: &QueryKey, gc_time: Duration) -> &mut CacheEntry<T> {
        if !self.entries.contains_key(key) {
            let generation = self.bump_generation();
            debug!(key = %key, "Creating cache entry");
            self.entries
                .insert(key.clone(), CacheEntry::new(gc_time, generation));
        }
        let entry = self
            .entries
            .get_mut(key)
            .unwrap_or_else(|| unreachable!("entry inserted above"));
        entry.gc_time = entry.gc_time.max(gc_time);
        entry
    }
}

/// Shared map of query key to cached pages.
pub struct QueryCache<T> {
    inner: Arc<Mutex<Inner<T>>>,
    events: broadcast::Sender<CacheEvent>,
}

impl<T> Clone for QueryCache<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            events: self.events.clone(),
        }
    }
}

impl<T: FeedItem> Default for QueryCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Keeps an entry alive while a view uses it.
///
/// Dropping the last guard starts the entry's garbage collection countdown.
pub(crate) struct ObserverGuard<T> {
    inner: Weak<Mutex<Inner<T>>>,
    key: QueryKey,
}

impl<T> Drop for ObserverGuard<T> {
    fn drop(&mut self) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        let mut inner = inner.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = inner.entries.get_mut(&self.key) {
            entry.observers = entry.observers.saturating_sub(1);
            if entry.observers == 0 {
                entry.idle_since = Some(Instant::now());
            }
        }
    }
}

impl<T: FeedItem> QueryCache<T> {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            inner: Arc::new(Mutex::new(Inner {
                entries: HashMap::new(),
                next_generation: 0,
            })),
            events,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: CacheEvent) {
        // No receivers is fine
        let _ = self.events.send(event);
    }

    /// Get a receiver for cache change notifications
    pub fn subscribe_events(&self) -> broadcast::Receiver<CacheEvent> {
        self.events.subscribe()
    }

    pub fn keys(&self) -> Vec<QueryKey> {
        let mut keys: Vec<QueryKey> = self.lock().entries.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn contains(&self, key: &QueryKey) -> bool {
        self.lock().entries.contains_key(key)
    }

    pub fn state(&self, key: &QueryKey) -> Option<QueryState<T>> {
        self.lock().entries.get(key).map(CacheEntry::snapshot)
    }

    /// The flattened, deduplicated collection for `key`.
    pub fn items(&self, key: &QueryKey) -> Option<Arc<[T]>> {
        self.lock().entries.get(key).map(|e| Arc::clone(&e.items))
    }

    pub fn pages(&self, key: &QueryKey) -> Option<Vec<Page<T>>> {
        self.lock().entries.get(key).map(|e| e.pages.clone())
    }

    /// Replace the pages of `key` directly, creating the entry if needed.
    ///
    /// Supersedes any in-flight fetch for that key.
    pub fn set_pages(&self, key: &QueryKey, pages: Vec<Page<T>>) {
        {
            let mut inner = self.lock();
            let generation = inner.bump_generation();
            let entry = inner.entry(key, Duration::ZERO);
            entry.generation = generation;
            entry.in_flight = None;
            entry.pages = pages;
            entry.error = None;
            entry.invalidated = false;
            entry.fetched_at = Some(Instant::now());
            entry.pages_changed();
        }
        self.emit(CacheEvent::Updated { key: key.clone() });
    }

    /// Mark `key` stale so the next mount or invalidation listener refetches.
    pub fn invalidate(&self, key: &QueryKey) -> bool {
        let found = {
            let mut inner = self.lock();
            match inner.entries.get_mut(key) {
                Some(entry) => {
                    entry.invalidated = true;
                    true
                }
                None => false,
            }
        };
        if found {
            debug!(key = %key, "Invalidated query");
            self.emit(CacheEvent::Invalidated { key: key.clone() });
        }
        found
    }

    pub fn invalidate_where(&self, mut predicate: impl FnMut(&QueryKey) -> bool) -> Vec<QueryKey> {
        let keys: Vec<QueryKey> = self.keys().into_iter().filter(|k| predicate(k)).collect();
        for key in &keys {
            self.invalidate(key);
        }
        keys
    }

    pub fn invalidate_all(&self) -> Vec<QueryKey> {
        self.invalidate_where(|_| true)
    }

    /// Drop the cached pages of `key`.
    ///
    /// An entry that a live query still observes is emptied in place so its
    /// observer count stays valid; any in-flight response for it is discarded.
    pub fn remove(&self, key: &QueryKey) -> bool {
        let removed = {
            let mut inner = self.lock();
            let generation = inner.next_generation + 1;
            match inner.entries.get_mut(key) {
                Some(entry) if entry.observers > 0 => {
                    entry.generation = generation;
                    entry.in_flight = None;
                    entry.pages.clear();
                    entry.error = None;
                    entry.invalidated = false;
                    entry.fetched_at = None;
                    entry.pages_changed();
                    inner.next_generation = generation;
                    true
                }
                Some(_) => inner.entries.remove(key).is_some(),
                None => false,
            }
        };
        if removed {
            self.emit(CacheEvent::Removed { key: key.clone() });
        }
        removed
    }

    /// Drop entries that have had no observers for longer than their gc time.
    pub fn collect_garbage(&self) -> Vec<QueryKey> {
        let now = Instant::now();
        let removed: Vec<QueryKey> = {
            let mut inner = self.lock();
            let expired: Vec<QueryKey> = inner
                .entries
                .iter()
                .filter(|(_, e)| {
                    e.observers == 0
                        && e.in_flight.is_none()
                        && e
                            .idle_since
                            .is_some_and(|since| now.saturating_duration_since(since) >= e.gc_time)
                })
                .map(|(k, _)| k.clone())
                .collect();
            for key in &expired {
                inner.entries.remove(key);
            }
            expired
        };
        for key in &removed {
            info!(key = %key, "Garbage collected idle query");
            self.emit(CacheEvent::Removed { key: key.clone() });
        }
        removed
    }

    /// Periodically collect garbage until every handle to this cache is gone.
    pub fn spawn_garbage_collector(&self, interval: Duration) -> JoinHandle<()> {
        let inner = Arc::downgrade(&self.inner);
        let events = self.events.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(inner) = inner.upgrade() else {
                    break;
                };
                let cache = QueryCache {
                    inner,
                    events: events.clone(),
                };
                cache.collect_garbage();
            }
        })
    }

    pub(crate) fn observe(
        &self,
        key: &QueryKey,
        gc_time: Duration,
    ) -> (ObserverGuard<T>, watch::Receiver<QueryState<T>>) {
        let mut inner = self.lock();
        let entry = inner.entry(key, gc_time);
        entry.observers += 1;
        entry.idle_since = None;
        let rx = entry.state_tx.subscribe();
        (
            ObserverGuard {
                inner: Arc::downgrade(&self.inner),
                key: key.clone(),
            },
            rx,
        )
    }

    pub(crate) fn subscribe_state(
        &self,
        key: &QueryKey,
        gc_time: Duration,
    ) -> watch::Receiver<QueryState<T>> {
        self.lock().entry(key, gc_time).state_tx.subscribe()
    }

    pub(crate) fn is_stale(&self, key: &QueryKey, stale_time: Duration) -> Option<bool> {
        let now = Instant::now();
        self.lock()
            .entries
            .get(key)
            .filter(|e| !e.pages.is_empty())
            .map(|e| e.is_stale(stale_time, now))
    }

    /// Reserve the single in-flight slot for `key`.
    ///
    /// A next-page fetch needs a free slot and a next page (or no data yet, in
    /// which case it loads page 1). A refresh supersedes an in-flight
    /// next-page fetch by moving the entry to a new generation.
    pub(crate) fn begin_fetch(
        &self,
        key: &QueryKey,
        kind: FetchKind,
        trigger: FetchTrigger,
        gc_time: Duration,
    ) -> Result<FetchTicket, FetchRefusal> {
        let mut inner = self.lock();
        inner.entry(key, gc_time);
        let fresh_generation = inner.next_generation + 1;
        let entry = inner.entry(key, gc_time);

        let page = match kind {
            FetchKind::NextPage => {
                if entry.in_flight.is_some() {
                    return Err(FetchRefusal::InFlight);
                }
                match entry.pages.last() {
                    None => 1,
                    Some(last) => last.meta.next_page().ok_or(FetchRefusal::NoNextPage)?,
                }
            }
            FetchKind::Refresh => {
                if entry
                    .in_flight
                    .is_some_and(|f| f.kind == FetchKind::Refresh)
                {
                    return Err(FetchRefusal::InFlight);
                }
                if entry.in_flight.is_some() {
                    debug!(key = %key, "Refresh supersedes in-flight next page");
                }
                entry.generation = fresh_generation;
                1
            }
        };

        entry.in_flight = Some(InFlight { kind, trigger });
        entry.publish();
        let generation = entry.generation;
        if kind == FetchKind::Refresh {
            inner.next_generation = fresh_generation;
        }

        Ok(FetchTicket {
            key: key.clone(),
            page,
            kind,
            generation,
        })
    }

    /// Apply the result of a fetch started with `begin_fetch`.
    ///
    /// Results from a superseded generation are dropped without touching the
    /// entry. Errors keep previously fetched pages.
    pub(crate) fn complete_fetch(
        &self,
        ticket: FetchTicket,
        result: Result<Page<T>, ApiError>,
    ) -> Result<FetchCompletion, ApiError> {
        let completion = {
            let mut inner = self.lock();
            let Some(entry) = inner.entries.get_mut(&ticket.key) else {
                debug!(key = %ticket.key, "Dropping response for removed query");
                return Ok(FetchCompletion::Discarded);
            };
            if entry.generation != ticket.generation {
                debug!(
                    key = %ticket.key,
                    page = ticket.page,
                    "Dropping response from superseded fetch"
                );
                return Ok(FetchCompletion::Discarded);
            }

            entry.in_flight = None;
            match result {
                Ok(page) => {
                    entry.error = None;
                    entry.fetched_at = Some(Instant::now());
                    let completion = if ticket.kind == FetchKind::Refresh {
                        entry.invalidated = false;
                        entry.pages = vec![page];
                        FetchCompletion::Replaced
                    } else {
                        if entry.pages.is_empty() {
                            entry.invalidated = false;
                        }
                        let number = page.number();
                        entry.pages.push(page);
                        FetchCompletion::Appended { page: number }
                    };
                    entry.pages_changed();
                    completion
                }
                Err(e) => {
                    entry.error = Some(e.clone());
                    entry.publish();
                    return Err(e);
                }
            }
        };
        self.emit(CacheEvent::Updated {
            key: ticket.key.clone(),
        });
        Ok(completion)
    }

    /// Run `edit` over the pages of every entry whose key matches.
    ///
    /// `edit` returns whether it changed anything; only changed entries are
    /// republished and reported.
    pub(crate) fn edit_pages_where(
        &self,
        mut predicate: impl FnMut(&QueryKey) -> bool,
        mut edit: impl FnMut(&mut Vec<Page<T>>) -> bool,
    ) -> Vec<QueryKey> {
        let mut changed = Vec::new();
        {
            let mut inner = self.lock();
            for (key, entry) in inner.entries.iter_mut() {
                if predicate(key) && edit(&mut entry.pages) {
                    entry.pages_changed();
                    changed.push(key.clone());
                }
            }
        }
        changed.sort();
        for key in &changed {
            self.emit(CacheEvent::Updated { key: key.clone() });
        }
        changed
    }
}
