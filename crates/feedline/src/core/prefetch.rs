//! Eager next-page prefetching
//!
//! `PrefetchPolicy::decide` is a pure function from a viewport event and the
//! query's current status to a decision. `PrefetchDriver` owns a task that
//! receives viewport events over a channel, applies the policy, and also
//! fires the idle trigger once the collection has been stable for a while.

use std::sync::Arc;
use std::time::Duration;

use feedline_api::{FeedItem, FetchTrigger};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, trace};

use crate::core::query::PaginatedQuery;

/// Something the rendering list observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewportEvent {
    /// The item at `index` was rendered
    ItemRendered { index: usize },
    ScrollBegan,
    MomentumScrollBegan,
}

/// Query status the policy needs to decide.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrefetchContext {
    pub item_count: usize,
    pub has_next_page: bool,
    pub in_flight: bool,
}

impl PrefetchContext {
    fn can_prefetch(&self) -> bool {
        self.has_next_page && !self.in_flight
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrefetchDecision {
    Skip,
    Now,
    After(Duration),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PrefetchPolicy {
    /// Rendering this index (or a later one) always counts as near the end
    pub min_index: usize,
    /// Fraction of the loaded items after which rendering counts as near the end
    pub viewport_ratio: f64,
    /// How long the collection must stay unchanged before an idle prefetch
    pub idle_delay: Duration,
    pub scroll_debounce: Duration,
    /// Scroll-begin prefetches need more than this many items loaded
    pub scroll_min_items: usize,
    /// Momentum-scroll prefetches need more than this many items loaded
    pub momentum_min_items: usize,
}

impl Default for PrefetchPolicy {
    fn default() -> Self {
        Self {
            min_index: 10,
            viewport_ratio: 0.7,
            idle_delay: Duration::from_secs(2),
            scroll_debounce: Duration::from_millis(100),
            scroll_min_items: 5,
            momentum_min_items: 10,
        }
    }
}

impl PrefetchPolicy {
    /// Index from which a rendered item triggers a prefetch.
    pub fn proximity_threshold(&self, item_count: usize) -> f64 {
        (self.viewport_ratio * item_count as f64).max(self.min_index as f64)
    }

    pub fn decide(&self, event: ViewportEvent, ctx: &PrefetchContext) -> PrefetchDecision {
        if !ctx.can_prefetch() {
            return PrefetchDecision::Skip;
        }
        match event {
            ViewportEvent::ItemRendered { index }
                if index as f64 >= self.proximity_threshold(ctx.item_count) =>
            {
                PrefetchDecision::Now
            }
            ViewportEvent::ScrollBegan if ctx.item_count > self.scroll_min_items => {
                PrefetchDecision::After(self.scroll_debounce)
            }
            ViewportEvent::MomentumScrollBegan if ctx.item_count > self.momentum_min_items => {
                PrefetchDecision::Now
            }
            _ => PrefetchDecision::Skip,
        }
    }
}

/// Background task applying a `PrefetchPolicy` to one query.
///
/// Dropping the driver stops the task.
pub struct PrefetchDriver {
    events_tx: mpsc::UnboundedSender<ViewportEvent>,
    task: JoinHandle<()>,
}

impl PrefetchDriver {
    pub fn spawn<T: FeedItem>(query: Arc<PaginatedQuery<T>>, policy: PrefetchPolicy) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(drive(query, policy, events_rx));
        Self { events_tx, task }
    }

    /// Forward a viewport event. Returns false once the driver has stopped.
    pub fn notify(&self, event: ViewportEvent) -> bool {
        self.events_tx.send(event).is_ok()
    }
}

impl Drop for PrefetchDriver {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn drive<T: FeedItem>(
    query: Arc<PaginatedQuery<T>>,
    policy: PrefetchPolicy,
    mut events_rx: mpsc::UnboundedReceiver<ViewportEvent>,
) {
    let mut state_rx = query.subscribe();
    let mut last_count = state_rx.borrow_and_update().items.len();
    let mut idle_deadline = Some(Instant::now() + policy.idle_delay);
    let mut scroll_deadline: Option<Instant> = None;

    loop {
        tokio::select! {
            event = events_rx.recv() => {
                let Some(event) = event else {
                    break;
                };
                match policy.decide(event, &query.prefetch_context()) {
                    PrefetchDecision::Now => {
                        debug!(key = %query.key(), ?event, "Prefetching next page");
                        spawn_prefetch(&query);
                    }
                    PrefetchDecision::After(delay) => {
                        // A new scroll gesture restarts the debounce window
                        scroll_deadline = Some(Instant::now() + delay);
                    }
                    PrefetchDecision::Skip => trace!(?event, "No prefetch"),
                }
            }
            changed = state_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let count = state_rx.borrow_and_update().items.len();
                if count != last_count {
                    last_count = count;
                    idle_deadline = Some(Instant::now() + policy.idle_delay);
                }
            }
            _ = sleep_until(scroll_deadline.unwrap_or_else(Instant::now)), if scroll_deadline.is_some() => {
                scroll_deadline = None;
                if query.prefetch_context().can_prefetch() {
                    debug!(key = %query.key(), "Prefetching after scroll start");
                    spawn_prefetch(&query);
                }
            }
            _ = sleep_until(idle_deadline.unwrap_or_else(Instant::now)), if idle_deadline.is_some() => {
                idle_deadline = None;
                if query.prefetch_context().can_prefetch() {
                    debug!(key = %query.key(), "Prefetching while idle");
                    spawn_prefetch(&query);
                }
            }
        }
    }
}

fn spawn_prefetch<T: FeedItem>(query: &Arc<PaginatedQuery<T>>) {
    let query = Arc::clone(query);
    tokio::spawn(async move {
        // Failures are recorded in the query state
        let _ = query.fetch_next_page_with(FetchTrigger::Eager).await;
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(item_count: usize) -> PrefetchContext {
        PrefetchContext {
            item_count,
            has_next_page: true,
            in_flight: false,
        }
    }

    #[test]
    fn test_viewport_threshold_has_floor_of_ten() {
        let policy = PrefetchPolicy::default();
        let rendered = |index| ViewportEvent::ItemRendered { index };

        // 10 items: 0.7 * 10 = 7, floor keeps the threshold at 10
        assert_eq!(policy.decide(rendered(9), &ctx(10)), PrefetchDecision::Skip);
        assert_eq!(policy.decide(rendered(10), &ctx(12)), PrefetchDecision::Now);

        // 30 items: threshold 21
        assert_eq!(policy.decide(rendered(20), &ctx(30)), PrefetchDecision::Skip);
        assert_eq!(policy.decide(rendered(21), &ctx(30)), PrefetchDecision::Now);
    }

    #[test]
    fn test_scroll_heuristics() {
        let policy = PrefetchPolicy::default();

        assert_eq!(
            policy.decide(ViewportEvent::ScrollBegan, &ctx(5)),
            PrefetchDecision::Skip
        );
        assert_eq!(
            policy.decide(ViewportEvent::ScrollBegan, &ctx(6)),
            PrefetchDecision::After(Duration::from_millis(100))
        );
        assert_eq!(
            policy.decide(ViewportEvent::MomentumScrollBegan, &ctx(10)),
            PrefetchDecision::Skip
        );
        assert_eq!(
            policy.decide(ViewportEvent::MomentumScrollBegan, &ctx(11)),
            PrefetchDecision::Now
        );
    }

    #[test]
    fn test_never_prefetches_in_flight_or_at_end() {
        let policy = PrefetchPolicy::default();
        let event = ViewportEvent::MomentumScrollBegan;

        let busy = PrefetchContext {
            in_flight: true,
            ..ctx(50)
        };
        assert_eq!(policy.decide(event, &busy), PrefetchDecision::Skip);

        let done = PrefetchContext {
            has_next_page: false,
            ..ctx(50)
        };
        assert_eq!(policy.decide(event, &done), PrefetchDecision::Skip);
    }
}
