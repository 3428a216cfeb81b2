use serde::{Deserialize, Serialize};
use std::fmt;

pub mod events;
pub mod page;
pub mod query_key;

pub use events::{CacheEvent, FetchTrigger};
pub use page::{Page, PageMeta};
pub use query_key::QueryKey;

/// Identifier used to deduplicate items across pages.
///
/// The backend sends either strings or integers; both are normalized to a
/// string so `"42"` and `42` refer to the same item.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "RawItemId", into = "String")]
pub struct ItemId(String);

#[derive(Deserialize)]
#[serde(untagged)]
enum RawItemId {
    Text(String),
    Signed(i64),
    Unsigned(u64),
}

impl From<RawItemId> for ItemId {
    fn from(raw: RawItemId) -> Self {
        match raw {
            RawItemId::Text(s) => ItemId(s),
            RawItemId::Signed(i) => ItemId(i.to_string()),
            RawItemId::Unsigned(u) => ItemId(u.to_string()),
        }
    }
}

impl From<ItemId> for String {
    fn from(id: ItemId) -> Self {
        id.0
    }
}

impl ItemId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ItemId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ItemId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<u64> for ItemId {
    fn from(n: u64) -> Self {
        Self(n.to_string())
    }
}

impl From<i64> for ItemId {
    fn from(n: i64) -> Self {
        Self(n.to_string())
    }
}

/// A server-owned entity that can appear in a paginated feed.
///
/// Items without an identifier are never deduplicated against each other.
/// Entities without a like counter keep the default no-op implementations.
pub trait FeedItem: Clone + Send + Sync + 'static {
    fn item_id(&self) -> Option<ItemId>;

    fn like_count(&self) -> Option<u64> {
        None
    }

    fn set_like_count(&mut self, _count: u64) {}
}

/// Untyped items read the `id` field and the `likes_count` counter.
impl FeedItem for serde_json::Value {
    fn item_id(&self) -> Option<ItemId> {
        match self.get("id")? {
            serde_json::Value::String(s) => Some(ItemId::new(s.clone())),
            serde_json::Value::Number(n) => Some(ItemId::new(n.to_string())),
            _ => None,
        }
    }

    fn like_count(&self) -> Option<u64> {
        self.get("likes_count")?.as_u64()
    }

    fn set_like_count(&mut self, count: u64) {
        if let Some(obj) = self.as_object_mut() {
            obj.insert("likes_count".to_string(), serde_json::Value::from(count));
        }
    }
}

/// Structured error type for API and cache operations.
///
/// `Clone` so the last error can be carried inside observable query state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum ApiError {
    #[error("Network error: {message}")]
    Network { message: String },

    #[error("Request timed out: {message}")]
    Timeout { message: String },

    #[error("HTTP {status} error: {body}")]
    Http { status: u16, body: String },

    #[error("Unauthorized: {message}")]
    Unauthorized { message: String },

    #[error("Decode error: {message}")]
    Decode { message: String },

    #[error("Invalid operation: {message}")]
    InvalidOperation { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl ApiError {
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Transport failures, server errors and rate limiting are worth another
    /// attempt. Client errors will fail the same way again.
    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::Network { .. } | ApiError::Timeout { .. } => true,
            ApiError::Http { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(e: serde_json::Error) -> Self {
        ApiError::Decode {
            message: e.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_item_id_accepts_numbers_and_strings() {
        let ids: Vec<ItemId> = serde_json::from_value(json!(["42", 42, -7])).unwrap();
        assert_eq!(ids[0], ids[1]);
        assert_eq!(ids[2].as_str(), "-7");
        assert_eq!(serde_json::to_value(&ids[1]).unwrap(), json!("42"));
    }

    #[test]
    fn test_json_value_feed_item() {
        let mut item = json!({ "id": 5, "likes_count": 3, "body": "hi" });
        assert_eq!(item.item_id(), Some(ItemId::from("5")));
        assert_eq!(item.like_count(), Some(3));

        item.set_like_count(4);
        assert_eq!(item["likes_count"], json!(4));
        assert_eq!(item["body"], json!("hi"));

        assert_eq!(json!({ "body": "no id" }).item_id(), None);
    }

    #[test]
    fn test_retryable_classification() {
        assert!(ApiError::network("reset").is_retryable());
        assert!(ApiError::Http {
            status: 503,
            body: String::new()
        }
        .is_retryable());
        assert!(ApiError::Http {
            status: 429,
            body: String::new()
        }
        .is_retryable());
        assert!(!ApiError::Http {
            status: 404,
            body: String::new()
        }
        .is_retryable());
        assert!(!ApiError::Unauthorized {
            message: "expired".into()
        }
        .is_retryable());
    }
}
