use std::marker::PhantomData;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use feedline::PageFetcher;
use feedline_api::{ApiError, FeedItem, ItemId, Page, QueryKey};
use serde::de::DeserializeOwned;

use crate::client::ApiClient;

/// A paginated collection on the backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Resource {
    /// Home timeline
    Feed,
    UserPosts { user_id: ItemId },
    Blogs,
    UserBlogs { user_id: ItemId },
    Comments { post_id: ItemId },
    Notifications,
    Followers { user_id: ItemId },
}

impl Resource {
    /// Collection path relative to the API base URL.
    pub fn path(&self) -> String {
        match self {
            Resource::Feed => "posts".to_string(),
            Resource::UserPosts { user_id } => format!("users/{}/posts", user_id),
            Resource::Blogs => "blogs".to_string(),
            Resource::UserBlogs { user_id } => format!("users/{}/blogs", user_id),
            Resource::Comments { post_id } => format!("posts/{}/comments", post_id),
            Resource::Notifications => "notifications".to_string(),
            Resource::Followers { user_id } => format!("users/{}/followers", user_id),
        }
    }

    /// Path that like and delete requests address items under.
    pub fn item_path(&self) -> String {
        match self {
            Resource::Feed | Resource::UserPosts { .. } => "posts".to_string(),
            Resource::Blogs | Resource::UserBlogs { .. } => "blogs".to_string(),
            Resource::Comments { .. } => "comments".to_string(),
            Resource::Notifications => "notifications".to_string(),
            Resource::Followers { .. } => "users".to_string(),
        }
    }

    pub fn query_key(&self) -> QueryKey {
        match self {
            Resource::Feed => QueryKey::new("feed"),
            Resource::UserPosts { user_id } => QueryKey::with_param("user-posts", user_id),
            Resource::Blogs => QueryKey::new("blogs"),
            Resource::UserBlogs { user_id } => QueryKey::with_param("user-blogs", user_id),
            Resource::Comments { post_id } => QueryKey::with_param("comments", post_id),
            Resource::Notifications => QueryKey::new("notifications"),
            Resource::Followers { user_id } => QueryKey::with_param("followers", user_id),
        }
    }
}

/// Parses the query key form, e.g. `feed` or `user-posts:7`.
impl FromStr for Resource {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = QueryKey::from(s);
        let id = || {
            key.param()
                .filter(|p| !p.is_empty())
                .map(ItemId::from)
                .ok_or_else(|| ApiError::InvalidOperation {
                    message: format!("Resource '{}' needs an id, e.g. {}:42", s, key.scope()),
                })
        };
        match key.scope() {
            "feed" | "posts" => Ok(Resource::Feed),
            "blogs" => Ok(Resource::Blogs),
            "notifications" => Ok(Resource::Notifications),
            "user-posts" => Ok(Resource::UserPosts { user_id: id()? }),
            "user-blogs" => Ok(Resource::UserBlogs { user_id: id()? }),
            "comments" => Ok(Resource::Comments { post_id: id()? }),
            "followers" => Ok(Resource::Followers { user_id: id()? }),
            other => Err(ApiError::InvalidOperation {
                message: format!("Unknown resource '{}'", other),
            }),
        }
    }
}

/// Fetches pages of one resource through an `ApiClient`.
pub struct ResourceFetcher<T> {
    client: Arc<ApiClient>,
    resource: Resource,
    _item: PhantomData<fn() -> T>,
}

impl<T> ResourceFetcher<T> {
    pub fn new(client: Arc<ApiClient>, resource: Resource) -> Self {
        Self {
            client,
            resource,
            _item: PhantomData,
        }
    }

    pub fn resource(&self) -> &Resource {
        &self.resource
    }
}

#[async_trait]
impl<T> PageFetcher<T> for ResourceFetcher<T>
where
    T: FeedItem + DeserializeOwned,
{
    async fn fetch_page(&self, page: u32) -> Result<Page<T>, ApiError> {
        self.client.fetch_page(&self.resource.path(), page).await
    }
}
