//! Pure merge of a remote snapshot with the local cache.
//!
//! Merging and tombstone filtering are deliberately separate steps: a remote
//! snapshot can race a delete confirmation, so the filter is re-applied on
//! every snapshot event rather than baked into the merge.

use std::collections::{HashMap, HashSet};

/// Anything with a stable string identity and a canonical creation instant.
pub trait Record {
    fn record_id(&self) -> &str;
    fn created_at_millis(&self) -> i64;
}

/// Merge a remote snapshot with locally cached items, keyed by id. Remote
/// items are inserted first so the remote copy wins whole-record on any
/// collision; local items survive only for ids the remote does not know.
/// Items without an id are dropped. Output order is unspecified; callers
/// sort with [`sort_newest_first`].
pub fn merge_by_id<T: Record + Clone>(remote: &[T], local: &[T]) -> Vec<T> {
    let mut merged: HashMap<String, T> = HashMap::with_capacity(remote.len() + local.len());
    for item in remote {
        let id = item.record_id();
        if !id.is_empty() {
            merged.insert(id.to_string(), item.clone());
        }
    }
    for item in local {
        let id = item.record_id();
        if !id.is_empty() && !merged.contains_key(id) {
            merged.insert(id.to_string(), item.clone());
        }
    }
    merged.into_values().collect()
}

/// Drop every item whose id is tombstoned. Applied by the caller after each
/// merge and before the result is rendered or persisted; idempotent.
pub fn filter_deleted<T: Record>(items: Vec<T>, deleted: &HashSet<String>) -> Vec<T> {
    if deleted.is_empty() {
        return items;
    }
    items
        .into_iter()
        .filter(|item| !deleted.contains(item.record_id()))
        .collect()
}

/// Sort descending by canonical creation instant (newest first).
pub fn sort_newest_first<T: Record>(items: &mut [T]) {
    items.sort_by_key(|item| std::cmp::Reverse(item.created_at_millis()));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Item {
        id: String,
        version: u32,
        created_at: i64,
    }

    impl Item {
        fn new(id: &str, version: u32, created_at: i64) -> Self {
            Self {
                id: id.to_string(),
                version,
                created_at,
            }
        }
    }

    impl Record for Item {
        fn record_id(&self) -> &str {
            &self.id
        }
        fn created_at_millis(&self) -> i64 {
            self.created_at
        }
    }

    fn sorted_ids<T: Record>(items: &[T]) -> Vec<String> {
        let mut ids: Vec<String> = items.iter().map(|i| i.record_id().to_string()).collect();
        ids.sort();
        ids
    }

    #[test]
    fn remote_wins_on_overlapping_ids() {
        let remote = vec![Item::new("a", 1, 10)];
        let local = vec![Item::new("a", 2, 10)];
        let merged = merge_by_id(&remote, &local);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].version, 1);
    }

    #[test]
    fn merge_is_commutative_on_disjoint_ids() {
        let left = vec![Item::new("a", 1, 10), Item::new("b", 1, 20)];
        let right = vec![Item::new("c", 1, 30)];
        let one = merge_by_id(&left, &right);
        let other = merge_by_id(&right, &left);
        assert_eq!(sorted_ids(&one), sorted_ids(&other));
        assert_eq!(sorted_ids(&one), vec!["a", "b", "c"]);
    }

    #[test]
    fn local_items_missing_from_remote_are_retained() {
        let remote = vec![Item::new("a", 1, 10)];
        let local = vec![Item::new("queued", 1, 5)];
        let merged = merge_by_id(&remote, &local);
        assert_eq!(sorted_ids(&merged), vec!["a", "queued"]);
    }

    #[test]
    fn items_without_an_id_are_dropped() {
        let remote = vec![Item::new("", 1, 10)];
        let local = vec![Item::new("a", 1, 10)];
        assert_eq!(merge_by_id(&remote, &local).len(), 1);
    }

    #[test]
    fn tombstone_filter_is_idempotent() {
        let deleted: HashSet<String> = ["b".to_string()].into_iter().collect();
        let items = vec![Item::new("a", 1, 10), Item::new("b", 1, 20)];
        let once = filter_deleted(items, &deleted);
        let twice = filter_deleted(once.clone(), &deleted);
        assert_eq!(once, twice);
        assert_eq!(sorted_ids(&once), vec!["a"]);
    }

    #[test]
    fn sort_is_newest_first() {
        let mut items = vec![
            Item::new("old", 1, 10),
            Item::new("new", 1, 30),
            Item::new("mid", 1, 20),
        ];
        sort_newest_first(&mut items);
        let ids: Vec<&str> = items.iter().map(|i| i.record_id()).collect();
        assert_eq!(ids, vec!["new", "mid", "old"]);
    }
}
