//! Flattening of fetched pages into one ordered collection.

use std::collections::HashSet;
use std::sync::Arc;

use feedline_api::{FeedItem, Page};

/// Concatenate pages in fetch order, keeping the first occurrence of every id.
///
/// Items without an id are always kept. The result is a fresh allocation so
/// consumers can detect changes by pointer identity.
pub fn flatten_pages<T: FeedItem>(pages: &[Page<T>]) -> Arc<[T]> {
    let mut seen = HashSet::new();
    pages
        .iter()
        .flat_map(|page| page.data.iter())
        .filter(|item| match item.item_id() {
            Some(id) => seen.insert(id),
            None => true,
        })
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakePost, page_of};
    use feedline_api::ItemId;
    use proptest::prelude::*;

    fn ids(items: &[FakePost]) -> Vec<String> {
        items
            .iter()
            .map(|p| p.id.clone().unwrap_or_else(|| "-".to_string()))
            .collect()
    }

    #[test]
    fn test_overlapping_pages_keep_first_occurrence() {
        let pages = vec![
            page_of(1, 2, ["A", "B", "C"].map(FakePost::new).to_vec()),
            page_of(2, 2, ["C", "D", "E"].map(FakePost::new).to_vec()),
        ];

        let flat = flatten_pages(&pages);
        assert_eq!(ids(&flat), vec!["A", "B", "C", "D", "E"]);
    }

    #[test]
    fn test_first_version_wins_over_fresher_duplicate() {
        let mut fresher = FakePost::new("C");
        fresher.likes_count = 99;
        let pages = vec![
            page_of(1, 2, vec![FakePost::new("C")]),
            page_of(2, 2, vec![fresher]),
        ];

        let flat = flatten_pages(&pages);
        assert_eq!(flat.len(), 1);
        assert_eq!(flat[0].likes_count, 0);
    }

    #[test]
    fn test_items_without_id_are_never_deduplicated() {
        let pages = vec![
            page_of(1, 2, vec![FakePost::anonymous("x"), FakePost::new("A")]),
            page_of(2, 2, vec![FakePost::anonymous("x"), FakePost::new("A")]),
        ];

        let flat = flatten_pages(&pages);
        assert_eq!(ids(&flat), vec!["-", "A", "-"]);
    }

    #[test]
    fn test_each_flatten_is_a_new_instance() {
        let pages = vec![page_of(1, 1, vec![FakePost::new("A")])];
        let a = flatten_pages(&pages);
        let b = flatten_pages(&pages);
        assert!(!Arc::ptr_eq(&a, &b));
    }

    proptest! {
        #[test]
        fn prop_flatten_is_first_occurrence_order(
            raw_pages in prop::collection::vec(
                prop::collection::vec(prop::option::weighted(0.9, 0u8..20), 0..8),
                0..6,
            )
        ) {
            let last = raw_pages.len() as u32;
            let pages: Vec<Page<FakePost>> = raw_pages
                .iter()
                .enumerate()
                .map(|(i, ids)| {
                    let items = ids
                        .iter()
                        .map(|id| match id {
                            Some(n) => FakePost::new(&n.to_string()),
                            None => FakePost::anonymous("untitled"),
                        })
                        .collect();
                    page_of(i as u32 + 1, last, items)
                })
                .collect();

            let flat = flatten_pages(&pages);

            // Reference model: walk the concatenation, keep unseen ids
            let mut seen = HashSet::new();
            let expected: Vec<Option<ItemId>> = pages
                .iter()
                .flat_map(|p| p.data.iter())
                .map(|p| p.item_id())
                .filter(|id| id.as_ref().is_none_or(|id| seen.insert(id.clone())))
                .collect();
            let actual: Vec<Option<ItemId>> = flat.iter().map(|p| p.item_id()).collect();
            prop_assert_eq!(actual, expected);

            let with_ids: Vec<ItemId> = flat.iter().filter_map(|p| p.item_id()).collect();
            let unique: HashSet<&ItemId> = with_ids.iter().collect();
            prop_assert_eq!(unique.len(), with_ids.len());
        }
    }
}
