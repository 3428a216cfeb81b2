use serde::{Deserialize, Serialize};

/// One server response unit of a paginated resource.
///
/// Mirrors the backend's `{ "data": [...], "meta": {...} }` envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub meta: PageMeta,
}

/// Pagination metadata attached to every page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageMeta {
    pub current_page: u32,
    pub last_page: u32,
    #[serde(default)]
    pub per_page: u32,
    #[serde(default)]
    pub total: u64,
}

impl PageMeta {
    pub fn has_next(&self) -> bool {
        self.current_page < self.last_page
    }

    pub fn next_page(&self) -> Option<u32> {
        self.has_next().then(|| self.current_page + 1)
    }
}

impl<T> Page<T> {
    pub fn new(data: Vec<T>, meta: PageMeta) -> Self {
        Self { data, meta }
    }

    pub fn number(&self) -> u32 {
        self.meta.current_page
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            data: self.data.into_iter().map(f).collect(),
            meta: self.meta,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_page_envelope_deserializes() {
        let page: Page<serde_json::Value> = serde_json::from_value(json!({
            "data": [{ "id": 1 }, { "id": 2 }],
            "meta": { "current_page": 1, "last_page": 3, "per_page": 2, "total": 6 }
        }))
        .unwrap();

        assert_eq!(page.data.len(), 2);
        assert_eq!(page.meta.next_page(), Some(2));
    }

    #[test]
    fn test_last_page_has_no_next() {
        let meta = PageMeta {
            current_page: 3,
            last_page: 3,
            per_page: 10,
            total: 30,
        };
        assert!(!meta.has_next());
        assert_eq!(meta.next_page(), None);

        // An empty resource reports last_page 0
        let empty = PageMeta {
            current_page: 1,
            last_page: 0,
            per_page: 10,
            total: 0,
        };
        assert!(!empty.has_next());
    }
}
