use serde::{Deserialize, Serialize};
use std::fmt;

/// Logical cache key identifying one paginated data source.
///
/// Keys are either a bare scope (`feed`) or a scope with a parameter
/// (`user-posts:42`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryKey(String);

impl QueryKey {
    pub fn new(scope: impl Into<String>) -> Self {
        Self(scope.into())
    }

    pub fn with_param(scope: &str, param: impl fmt::Display) -> Self {
        Self(format!("{}:{}", scope, param))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The part before the first `:`.
    pub fn scope(&self) -> &str {
        self.0.split_once(':').map_or(self.0.as_str(), |(scope, _)| scope)
    }

    pub fn param(&self) -> Option<&str> {
        self.0.split_once(':').map(|(_, param)| param)
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for QueryKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for QueryKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}
