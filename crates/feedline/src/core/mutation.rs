//! Optimistic cache edits for likes and deletions
//!
//! These are pure cache transforms applied across every entry that may be
//! showing the item. They never touch the network; if the confirming request
//! fails, the affected keys are invalidated so a refetch reconciles them.

use std::future::Future;

use feedline_api::{ApiError, FeedItem, ItemId, QueryKey};
use tracing::{debug, warn};

use crate::core::cache::QueryCache;

impl<T: FeedItem> QueryCache<T> {
    /// Adjust the like counter of `item_id` by one in every entry.
    ///
    /// Unliking never takes the counter below zero. Returns the keys whose
    /// collections changed.
    pub fn apply_like_delta(&self, item_id: &ItemId, liked: bool) -> Vec<QueryKey> {
        self.apply_like_delta_where(item_id, liked, |_| true)
    }

    pub fn apply_like_delta_where(
        &self,
        item_id: &ItemId,
        liked: bool,
        predicate: impl FnMut(&QueryKey) -> bool,
    ) -> Vec<QueryKey> {
        let keys = self.edit_pages_where(predicate, |pages| {
            let mut changed = false;
            for item in pages.iter_mut().flat_map(|p| p.data.iter_mut()) {
                if item.item_id().as_ref() != Some(item_id) {
                    continue;
                }
                if let Some(count) = item.like_count() {
                    let updated = if liked {
                        count.saturating_add(1)
                    } else {
                        count.saturating_sub(1)
                    };
                    item.set_like_count(updated);
                    changed = true;
                }
            }
            changed
        });
        debug!(item = %item_id, liked, affected = keys.len(), "Applied optimistic like");
        keys
    }

    /// Remove `item_id` from whichever page holds it, in every entry.
    ///
    /// Other items stay on their pages; page metadata is left as fetched.
    pub fn apply_deletion(&self, item_id: &ItemId) -> Vec<QueryKey> {
        self.apply_deletion_where(item_id, |_| true)
    }

    pub fn apply_deletion_where(
        &self,
        item_id: &ItemId,
        predicate: impl FnMut(&QueryKey) -> bool,
    ) -> Vec<QueryKey> {
        let keys = self.edit_pages_where(predicate, |pages| {
            let mut changed = false;
            for page in pages.iter_mut() {
                let before = page.data.len();
                page.data
                    .retain(|item| item.item_id().as_ref() != Some(item_id));
                changed |= page.data.len() != before;
            }
            changed
        });
        debug!(item = %item_id, affected = keys.len(), "Applied optimistic deletion");
        keys
    }
}

/// Apply `edit` to the cache, then await `confirm`.
///
/// On failure the keys touched by `edit` are invalidated and the error is
/// returned unchanged. Mutations are never retried.
pub async fn mutate_optimistically<T, R, E, Fut>(
    cache: &QueryCache<T>,
    edit: E,
    confirm: Fut,
) -> Result<R, ApiError>
where
    T: FeedItem,
    E: FnOnce(&QueryCache<T>) -> Vec<QueryKey>,
    Fut: Future<Output = Result<R, ApiError>>,
{
    let affected = edit(cache);
    match confirm.await {
        Ok(value) => Ok(value),
        Err(e) => {
            warn!(error = %e, affected = affected.len(), "Mutation failed, invalidating");
            for key in &affected {
                cache.invalidate(key);
            }
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakePost, page_of, posts};

    fn seeded() -> QueryCache<FakePost> {
        let cache = QueryCache::new();
        let mut liked = FakePost::new("42");
        liked.likes_count = 3;
        cache.set_pages(
            &QueryKey::from("feed"),
            vec![
                page_of(1, 2, vec![FakePost::new("1"), liked.clone()]),
                page_of(2, 2, vec![FakePost::new("2")]),
            ],
        );
        cache.set_pages(
            &QueryKey::with_param("user-posts", 7),
            vec![page_of(1, 1, vec![liked, FakePost::new("9")])],
        );
        cache.set_pages(&QueryKey::from("trending"), vec![page_of(1, 1, posts(1..=2))]);
        cache
    }

    #[test]
    fn test_like_adjusts_every_entry_and_nothing_else() {
        let cache = seeded();
        let id = ItemId::from("42");

        let affected = cache.apply_like_delta(&id, true);
        assert_eq!(
            affected,
            vec![QueryKey::from("feed"), QueryKey::with_param("user-posts", 7)]
        );

        let feed = cache.items(&QueryKey::from("feed")).unwrap();
        let post = feed.iter().find(|p| p.id.as_deref() == Some("42")).unwrap();
        assert_eq!(post.likes_count, 4);
        assert_eq!(post.title, "Post 42");
    }

    #[test]
    fn test_unlike_floors_at_zero() {
        let cache = seeded();
        let id = ItemId::from("1");

        cache.apply_like_delta(&id, false);
        let feed = cache.items(&QueryKey::from("feed")).unwrap();
        assert_eq!(feed[0].likes_count, 0);
    }

    #[test]
    fn test_deletion_removes_from_all_entries_without_moving_pages() {
        let cache = seeded();
        let id = ItemId::from("42");

        let affected = cache.apply_deletion(&id);
        assert_eq!(affected.len(), 2);

        let pages = cache.pages(&QueryKey::from("feed")).unwrap();
        assert_eq!(pages[0].data.len(), 1);
        assert_eq!(pages[1].data.len(), 1);
        assert_eq!(pages[1].data[0].id.as_deref(), Some("2"));

        let profile = cache.items(&QueryKey::with_param("user-posts", 7)).unwrap();
        assert_eq!(profile.len(), 1);
        assert!(cache.apply_deletion(&id).is_empty());
    }

    #[test]
    fn test_scoped_edit_only_touches_matching_keys() {
        let cache = seeded();
        let affected = cache.apply_deletion_where(&ItemId::from("42"), |k| k.scope() == "feed");
        assert_eq!(affected, vec![QueryKey::from("feed")]);
        assert_eq!(
            cache
                .items(&QueryKey::with_param("user-posts", 7))
                .unwrap()
                .len(),
            2
        );
    }

    #[tokio::test]
    async fn test_failed_confirmation_invalidates_affected_keys() {
        let cache = seeded();
        let mut events = cache.subscribe_events();
        let id = ItemId::from("42");

        let result: Result<(), ApiError> = mutate_optimistically(
            &cache,
            |c| c.apply_like_delta(&id, true),
            async { Err(ApiError::network("timeout")) },
        )
        .await;
        assert!(result.is_err());

        let mut invalidated = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let feedline_api::CacheEvent::Invalidated { key } = event {
                invalidated.push(key);
            }
        }
        assert_eq!(
            invalidated,
            vec![QueryKey::from("feed"), QueryKey::with_param("user-posts", 7)]
        );
    }
}
