//! Item mutations that update every cached list before the server confirms

use feedline::{QueryCache, mutate_optimistically};
use feedline_api::{ApiError, FeedItem, ItemId};
use tracing::info;

use crate::client::ApiClient;
use crate::resource::Resource;

/// Like or unlike `id`, bumping its counter in every cached list first.
///
/// If the request fails the edited lists are invalidated and the error is
/// returned; the request is not retried.
pub async fn set_liked<T: FeedItem>(
    cache: &QueryCache<T>,
    client: &ApiClient,
    resource: &Resource,
    id: &ItemId,
    liked: bool,
) -> Result<(), ApiError> {
    let path = resource.item_path();
    let confirm = async {
        if liked {
            client.like(&path, id).await
        } else {
            client.unlike(&path, id).await
        }
    };
    mutate_optimistically(cache, |c| c.apply_like_delta(id, liked), confirm).await?;
    info!(item = %id, liked, "Like confirmed");
    Ok(())
}

/// Delete `id` on the server, removing it from every cached list first.
pub async fn delete_item<T: FeedItem>(
    cache: &QueryCache<T>,
    client: &ApiClient,
    resource: &Resource,
    id: &ItemId,
) -> Result<(), ApiError> {
    let path = resource.item_path();
    mutate_optimistically(
        cache,
        |c| c.apply_deletion(id),
        client.delete(&path, id),
    )
    .await?;
    info!(item = %id, "Deletion confirmed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Post;
    use feedline::CacheEvent;
    use feedline_api::{Page, PageMeta, QueryKey};
    use std::time::Duration;

    fn post(id: &str, likes: u64) -> Post {
        Post {
            id: Some(ItemId::from(id)),
            body: format!("post {}", id),
            image_url: None,
            likes_count: likes,
            comments_count: 0,
            is_liked: false,
            user: None,
            created_at: None,
        }
    }

    fn seeded() -> QueryCache<Post> {
        let cache = QueryCache::new();
        let meta = PageMeta {
            current_page: 1,
            last_page: 1,
            per_page: 2,
            total: 2,
        };
        cache.set_pages(
            &QueryKey::from("feed"),
            vec![Page::new(vec![post("1", 0), post("42", 5)], meta)],
        );
        cache.set_pages(
            &QueryKey::from("user-posts:7"),
            vec![Page::new(vec![post("42", 5)], meta)],
        );
        cache
    }

    fn unreachable_client() -> ApiClient {
        ApiClient::new("http://127.0.0.1:1/api", Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_failed_like_invalidates_edited_lists() {
        let cache = seeded();
        let mut events = cache.subscribe_events();
        let client = unreachable_client();

        let result = set_liked(&cache, &client, &Resource::Feed, &ItemId::from("42"), true).await;
        assert!(matches!(result, Err(ApiError::Network { .. })));

        // The optimistic edit stays until a refetch replaces it
        let feed = cache.items(&QueryKey::from("feed")).unwrap();
        assert_eq!(feed[1].likes_count, 6);

        let mut invalidated = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let CacheEvent::Invalidated { key } = event {
                invalidated.push(key);
            }
        }
        invalidated.sort();
        assert_eq!(
            invalidated,
            vec![QueryKey::from("feed"), QueryKey::from("user-posts:7")]
        );
    }

    #[tokio::test]
    async fn test_failed_delete_removes_then_invalidates() {
        let cache = seeded();
        let client = unreachable_client();

        let result = delete_item(&cache, &client, &Resource::Feed, &ItemId::from("42")).await;
        assert!(result.is_err());

        assert_eq!(cache.items(&QueryKey::from("feed")).unwrap().len(), 1);
        assert!(cache.items(&QueryKey::from("user-posts:7")).unwrap().is_empty());
    }
}
