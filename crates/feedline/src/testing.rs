//! In-memory fakes for exercising queries without a backend
//!
//! `FakeFeedServer` plays the REST resource: it serves fixed pages, records
//! which pages were requested, and can inject latency and failures.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use feedline_api::{ApiError, FeedItem, ItemId, Page, PageMeta};
use serde::{Deserialize, Serialize};

use crate::core::query::PageFetcher;

/// Minimal likeable post used in tests and demos.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FakePost {
    pub id: Option<String>,
    pub title: String,
    pub likes_count: u64,
}

impl FakePost {
    pub fn new(id: &str) -> Self {
        Self {
            id: Some(id.to_string()),
            title: format!("Post {}", id),
            likes_count: 0,
        }
    }

    /// A post the server sent without an id.
    pub fn anonymous(title: &str) -> Self {
        Self {
            id: None,
            title: title.to_string(),
            likes_count: 0,
        }
    }
}

impl FeedItem for FakePost {
    fn item_id(&self) -> Option<ItemId> {
        self.id.as_deref().map(ItemId::from)
    }

    fn like_count(&self) -> Option<u64> {
        Some(self.likes_count)
    }

    fn set_like_count(&mut self, count: u64) {
        self.likes_count = count;
    }
}

/// Posts `post-N` for every N in `range`.
pub fn posts(range: impl IntoIterator<Item = u32>) -> Vec<FakePost> {
    range
        .into_iter()
        .map(|n| FakePost::new(&format!("post-{}", n)))
        .collect()
}

pub fn page_of<T>(current_page: u32, last_page: u32, data: Vec<T>) -> Page<T> {
    let per_page = data.len() as u32;
    Page::new(
        data,
        PageMeta {
            current_page,
            last_page,
            per_page,
            total: u64::from(per_page) * u64::from(last_page),
        },
    )
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Paginated resource served from memory.
pub struct FakeFeedServer<T> {
    pages: Mutex<Vec<Vec<T>>>,
    latency: Duration,
    failures: Mutex<VecDeque<ApiError>>,
    requested: Mutex<Vec<u32>>,
}

impl FakeFeedServer<FakePost> {
    /// `pages` pages of `per_page` posts numbered `post-1` onwards.
    pub fn with_pages(pages: u32, per_page: u32) -> Self {
        let data = (0..pages)
            .map(|p| posts(p * per_page + 1..=(p + 1) * per_page))
            .collect();
        Self::from_pages(data)
    }
}

impl<T: Clone> FakeFeedServer<T> {
    pub fn from_pages(pages: Vec<Vec<T>>) -> Self {
        Self {
            pages: Mutex::new(pages),
            latency: Duration::ZERO,
            failures: Mutex::new(VecDeque::new()),
            requested: Mutex::new(Vec::new()),
        }
    }

    /// Delay every response by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Fail the next `count` requests with `error`.
    pub fn fail_next(&self, count: usize, error: ApiError) {
        let mut failures = lock(&self.failures);
        failures.extend(std::iter::repeat_n(error, count));
    }

    /// Simulate server-side changes to page `page` (1-based).
    pub fn replace_page(&self, page: u32, items: Vec<T>) {
        let mut pages = lock(&self.pages);
        let index = page.saturating_sub(1) as usize;
        if index < pages.len() {
            pages[index] = items;
        } else {
            pages.push(items);
        }
    }

    pub fn call_count(&self) -> usize {
        lock(&self.requested).len()
    }

    pub fn requested_pages(&self) -> Vec<u32> {
        lock(&self.requested).clone()
    }

    fn serve(&self, page: u32) -> Result<Page<T>, ApiError> {
        let pages = lock(&self.pages);
        let last_page = pages.len() as u32;
        let data = match page.checked_sub(1).and_then(|i| pages.get(i as usize)) {
            Some(data) => data.clone(),
            // An empty resource still answers page 1
            None if page == 1 => Vec::new(),
            None => {
                return Err(ApiError::Http {
                    status: 404,
                    body: format!("page {} out of range", page),
                });
            }
        };
        let per_page = pages.first().map_or(0, |p| p.len() as u32);
        let total = pages.iter().map(|p| p.len() as u64).sum();
        Ok(Page::new(
            data,
            PageMeta {
                current_page: page,
                last_page,
                per_page,
                total,
            },
        ))
    }
}

#[async_trait]
impl<T: FeedItem> PageFetcher<T> for FakeFeedServer<T> {
    async fn fetch_page(&self, page: u32) -> Result<Page<T>, ApiError> {
        lock(&self.requested).push(page);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let failure = lock(&self.failures).pop_front();
        if let Some(error) = failure {
            return Err(error);
        }
        self.serve(page)
    }
}
