//! View model for a virtualized feed list
//!
//! `ListView::from_state` maps a query snapshot to exactly one of four
//! screens. `ListDriver` connects viewport callbacks to the query and its
//! prefetch driver.

use std::pin::Pin;
use std::sync::Arc;

use feedline_api::{ApiError, FeedItem};
use tokio_stream::wrappers::WatchStream;
use tokio_stream::{Stream, StreamExt};
use tracing::warn;

use crate::core::cache::QueryState;
use crate::core::prefetch::{PrefetchDriver, PrefetchPolicy, ViewportEvent};
use crate::core::query::{FetchOutcome, PaginatedQuery};

/// Indicator shown below a populated list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Footer {
    FetchingNextPage,
    EagerPrefetching,
    EndOfList,
    None,
}

#[derive(Debug, Clone)]
pub enum ListView<T> {
    InitialLoading,
    ErrorWithRetry { error: ApiError },
    Empty,
    Populated { items: Arc<[T]>, footer: Footer },
}

impl<T> ListView<T> {
    /// Errors only replace the list when nothing has been loaded; once items
    /// are visible a failed page leaves them on screen.
    pub fn from_state(state: &QueryState<T>) -> Self {
        if state.items.is_empty() {
            if state.is_loading {
                return ListView::InitialLoading;
            }
            if let Some(error) = &state.error {
                return ListView::ErrorWithRetry {
                    error: error.clone(),
                };
            }
            return ListView::Empty;
        }

        let footer = if state.is_prefetching {
            Footer::EagerPrefetching
        } else if state.is_fetching_next_page {
            Footer::FetchingNextPage
        } else if !state.has_next_page {
            Footer::EndOfList
        } else {
            Footer::None
        };
        ListView::Populated {
            items: Arc::clone(&state.items),
            footer,
        }
    }

    pub fn footer(&self) -> Option<Footer> {
        match self {
            ListView::Populated { footer, .. } => Some(*footer),
            _ => None,
        }
    }
}

/// Bridges list callbacks to a paginated query.
pub struct ListDriver<T> {
    query: Arc<PaginatedQuery<T>>,
    prefetch: PrefetchDriver,
}

impl<T: FeedItem> ListDriver<T> {
    pub fn new(query: Arc<PaginatedQuery<T>>, policy: PrefetchPolicy) -> Self {
        let prefetch = PrefetchDriver::spawn(Arc::clone(&query), policy);
        Self { query, prefetch }
    }

    pub fn query(&self) -> &Arc<PaginatedQuery<T>> {
        &self.query
    }

    pub fn view(&self) -> ListView<T> {
        ListView::from_state(&self.query.state())
    }

    /// Stream of views, starting with the current one.
    pub fn views(&self) -> Pin<Box<dyn Stream<Item = ListView<T>> + Send>> {
        Box::pin(
            WatchStream::new(self.query.subscribe()).map(|state| ListView::from_state(&state)),
        )
    }

    pub fn item_rendered(&self, index: usize) {
        self.prefetch.notify(ViewportEvent::ItemRendered { index });
    }

    pub fn scroll_began(&self) {
        self.prefetch.notify(ViewportEvent::ScrollBegan);
    }

    pub fn momentum_scroll_began(&self) {
        self.prefetch.notify(ViewportEvent::MomentumScrollBegan);
    }

    /// The list reached its last rendered row: load more.
    ///
    /// A failure with items on screen is only logged; the view keeps them.
    pub async fn end_reached(&self) -> Result<FetchOutcome, ApiError> {
        let result = self.query.fetch_next_page().await;
        if let Err(e) = &result {
            warn!(key = %self.query.key(), error = %e, "Load more failed");
        }
        result
    }

    /// Retry button on the error screen.
    pub async fn retry(&self) -> Result<FetchOutcome, ApiError> {
        self.query.refresh().await
    }

    pub async fn pull_to_refresh(&self) -> Result<FetchOutcome, ApiError> {
        self.query.refresh().await
    }
}
