use std::sync::Arc;
use std::time::Duration;

use feedline::{ApiError, ListView, PaginatedQuery, QueryCache, QueryOptions, RetryPolicy};
use feedline_rest::{ApiClient, Post, Resource, ResourceFetcher};

#[tokio::test]
async fn test_unreachable_backend_surfaces_error_state() {
    // Nothing listens on port 1
    let client = Arc::new(ApiClient::new("http://127.0.0.1:1/api", Duration::from_secs(5)).unwrap());
    let resource = Resource::Feed;
    let fetcher = Arc::new(ResourceFetcher::<Post>::new(client, resource.clone()));

    let cache = QueryCache::new();
    let options = QueryOptions::default().retry(RetryPolicy::none());
    let query = PaginatedQuery::initialize(&cache, resource.query_key(), fetcher, options).await;

    let state = query.state();
    assert!(matches!(state.error, Some(ApiError::Network { .. })));
    assert!(matches!(
        ListView::from_state(&state),
        ListView::ErrorWithRetry { .. }
    ));
    assert!(cache.contains(&resource.query_key()));
}
