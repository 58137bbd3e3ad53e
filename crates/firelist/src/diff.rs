//! Keyed diff between two ordered sequences
//!
//! Keys are unique within each side, so one key map per side is enough: every
//! key is either only in the initial sequence (deleted), only in the result
//! (inserted), or in both, where differing indices make it a move and equal
//! indices with differing payload make it a change.

use firelist_api::{Diff, DocumentChange, DocumentChangeKind, IndexedObject, Keyed, MovedObject};
use std::collections::{HashMap, HashSet};

/// Compute the diff that turns `initial` into `result`.
///
/// `hints` are the source's per-document changes relative to `initial`. When
/// given, keys the hints do not mark as modified skip the payload comparison.
/// Passing hints that are not relative to `initial` yields a wrong diff.
pub fn diff<T>(initial: &[T], result: &[T], hints: Option<&[DocumentChange]>) -> Diff<T>
where
    T: Keyed + PartialEq + Clone,
{
    let old_positions: HashMap<&str, usize> = initial
        .iter()
        .enumerate()
        .map(|(index, item)| (item.key(), index))
        .collect();
    let new_positions: HashMap<&str, usize> = result
        .iter()
        .enumerate()
        .map(|(index, item)| (item.key(), index))
        .collect();
    let modified: Option<HashSet<&str>> = hints.map(|changes| {
        changes
            .iter()
            .filter(|change| change.kind == DocumentChangeKind::Modified)
            .map(|change| change.key.as_str())
            .collect()
    });

    let mut diff = Diff::default();

    for (index, item) in initial.iter().enumerate() {
        if !new_positions.contains_key(item.key()) {
            diff.deleted.push(IndexedObject {
                index,
                object: item.clone(),
            });
        }
    }

    for (index, item) in result.iter().enumerate() {
        let Some(&from) = old_positions.get(item.key()) else {
            diff.inserted.push(IndexedObject {
                index,
                object: item.clone(),
            });
            continue;
        };

        if from != index {
            diff.moved.push(MovedObject {
                from,
                to: index,
                object: item.clone(),
            });
            continue;
        }

        let content_changed = match &modified {
            Some(modified) if !modified.contains(item.key()) => false,
            _ => initial[from] != *item,
        };
        if content_changed {
            diff.changed.push(IndexedObject {
                index,
                object: item.clone(),
            });
        }
    }

    diff
}

#[cfg(test)]
mod tests {
    use super::*;
    use firelist_api::{DiffKind, Record};
    use serde_json::json;

    fn rec(key: &str, value: i64) -> Record {
        Record::new(key, json!(value))
    }

    #[test]
    fn deletion_insertion_and_shift() {
        // [1, 2, 3] -> [2, 4, 3]: 1 deleted, 4 inserted, 2 shifted up
        let initial = vec![rec("1", 1), rec("2", 2), rec("3", 3)];
        let result = vec![rec("2", 2), rec("4", 4), rec("3", 3)];
        let diff = diff(&initial, &result, None);

        assert_eq!(diff.deleted_indexes(), vec![0]);
        assert_eq!(diff.inserted_indexes(), vec![1]);
        assert_eq!(diff.moved_indexes(), vec![(1, 0)]);
        assert!(diff.changed.is_empty());

        let kinds = diff.classify();
        assert_eq!(kinds.get("1"), Some(&DiffKind::Deleted));
        assert_eq!(kinds.get("4"), Some(&DiffKind::Inserted));
        assert_eq!(kinds.get("2"), Some(&DiffKind::Moved));
        assert_eq!(kinds.get("3"), None);

        assert_eq!(diff.apply_to(&initial).unwrap(), result);
    }

    #[test]
    fn swapped_keys_are_two_moves_in_result_order() {
        let initial = vec![rec("a", 1), rec("b", 2)];
        let result = vec![rec("b", 2), rec("a", 1)];
        let diff = diff(&initial, &result, None);

        assert_eq!(diff.moved_indexes(), vec![(1, 0), (0, 1)]);
        assert_eq!(diff.apply_to(&initial).unwrap(), result);
    }

    #[test]
    fn payload_change_at_same_index() {
        let initial = vec![rec("a", 1), rec("b", 2)];
        let result = vec![rec("a", 1), rec("b", 20)];
        let diff = diff(&initial, &result, None);

        assert_eq!(diff.changed_indexes(), vec![1]);
        assert_eq!(diff.changed[0].object, rec("b", 20));
    }

    #[test]
    fn moved_object_carries_new_content() {
        let initial = vec![rec("a", 1), rec("b", 2)];
        let result = vec![rec("b", 20), rec("a", 1)];
        let diff = diff(&initial, &result, None);

        assert_eq!(diff.moved[0].object, rec("b", 20));
        assert!(diff.changed.is_empty());
        assert_eq!(diff.apply_to(&initial).unwrap(), result);
    }

    #[test]
    fn hints_skip_comparison_for_unmarked_keys() {
        let initial = vec![rec("a", 1), rec("b", 2)];
        let result = vec![rec("a", 10), rec("b", 20)];
        let hints = vec![DocumentChange::modified("b", 1, 1)];
        let diff = diff(&initial, &result, Some(&hints));

        // "a" differs but is trusted unchanged
        assert_eq!(diff.changed_indexes(), vec![1]);
    }

    #[test]
    fn accurate_hints_match_unhinted_diff() {
        let initial = vec![rec("a", 1), rec("b", 2), rec("c", 3)];
        let result = vec![rec("a", 1), rec("b", 5), rec("d", 4)];
        let hints = vec![
            DocumentChange::removed("c", 2),
            DocumentChange::modified("b", 1, 1),
            DocumentChange::added("d", 2),
        ];
        assert_eq!(
            diff(&initial, &result, Some(&hints)),
            diff(&initial, &result, None)
        );
    }

    #[test]
    fn empty_sides() {
        let items = vec![rec("a", 1), rec("b", 2)];
        let empty: Vec<Record> = Vec::new();

        let from_empty = diff(&empty, &items, None);
        assert_eq!(from_empty.inserted_indexes(), vec![0, 1]);

        let to_empty = diff(&items, &empty, None);
        assert_eq!(to_empty.deleted_indexes(), vec![0, 1]);

        assert!(diff(&items, &items, None).is_empty());
    }
}
