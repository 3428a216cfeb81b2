use chrono::{DateTime, Utc};
use feedline_api::{FeedItem, ItemId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: ItemId,

    pub name: String,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub avatar_url: Option<String>,

    #[serde(default)]
    pub followers_count: u64,

    #[serde(default)]
    pub following_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    #[serde(default)]
    pub id: Option<ItemId>,

    pub body: String,

    #[serde(default)]
    pub image_url: Option<String>,

    #[serde(default)]
    pub likes_count: u64,

    #[serde(default)]
    pub comments_count: u64,

    /// Whether the signed-in user has liked this post
    #[serde(default)]
    pub is_liked: bool,

    #[serde(default)]
    pub user: Option<User>,

    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl FeedItem for Post {
    fn item_id(&self) -> Option<ItemId> {
        self.id.clone()
    }

    fn like_count(&self) -> Option<u64> {
        Some(self.likes_count)
    }

    fn set_like_count(&mut self, count: u64) {
        self.likes_count = count;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Blog {
    #[serde(default)]
    pub id: Option<ItemId>,

    pub title: String,

    #[serde(default)]
    pub excerpt: Option<String>,

    #[serde(default)]
    pub cover_url: Option<String>,

    #[serde(default)]
    pub likes_count: u64,

    #[serde(default)]
    pub user: Option<User>,

    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
}

impl FeedItem for Blog {
    fn item_id(&self) -> Option<ItemId> {
        self.id.clone()
    }

    fn like_count(&self) -> Option<u64> {
        Some(self.likes_count)
    }

    fn set_like_count(&mut self, count: u64) {
        self.likes_count = count;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    #[serde(default)]
    pub id: Option<ItemId>,

    pub post_id: ItemId,

    pub body: String,

    #[serde(default)]
    pub user: Option<User>,

    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl FeedItem for Comment {
    fn item_id(&self) -> Option<ItemId> {
        self.id.clone()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    #[serde(default)]
    pub id: Option<ItemId>,

    /// e.g. "like", "comment", "follow"
    #[serde(rename = "type")]
    pub kind: String,

    pub message: String,

    #[serde(default)]
    pub read_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl Notification {
    pub fn is_read(&self) -> bool {
        self.read_at.is_some()
    }
}

impl FeedItem for Notification {
    fn item_id(&self) -> Option<ItemId> {
        self.id.clone()
    }
}

impl FeedItem for User {
    fn item_id(&self) -> Option<ItemId> {
        Some(self.id.clone())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Body of `POST /login`.
///
/// Accounts with two-factor enabled get a challenge instead of a token.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum LoginResponse {
    Authenticated {
        token: String,
        user: User,
    },
    TwoFactorRequired {
        two_factor: bool,
        #[serde(default)]
        challenge: Option<String>,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct TwoFactorRequest {
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub challenge: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TokenResponse {
    pub token: String,
    pub user: User,
}
