use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{Result, SyncError};
use crate::record::Keyed;

/// An object together with the index it occupies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedObject<T> {
    pub index: usize,
    pub object: T,
}

/// An object that changed position; `object` carries its new content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovedObject<T> {
    pub from: usize,
    pub to: usize,
    pub object: T,
}

/// Classification of one key in a diff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DiffKind {
    Deleted,
    Inserted,
    Changed,
    Moved,
}

/// The operations that turn an initial ordered sequence into a result sequence.
///
/// `deleted` and `moved[..].from` index into the initial sequence;
/// `inserted`, `changed` and `moved[..].to` index into the result sequence.
/// Keys present on both sides at the same index with equal content appear
/// nowhere.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diff<T> {
    pub deleted: Vec<IndexedObject<T>>,
    pub inserted: Vec<IndexedObject<T>>,
    pub changed: Vec<IndexedObject<T>>,
    pub moved: Vec<MovedObject<T>>,
}

impl<T> Default for Diff<T> {
    fn default() -> Self {
        Self {
            deleted: Vec::new(),
            inserted: Vec::new(),
            changed: Vec::new(),
            moved: Vec::new(),
        }
    }
}

impl<T> Diff<T> {
    pub fn is_empty(&self) -> bool {
        self.deleted.is_empty()
            && self.inserted.is_empty()
            && self.changed.is_empty()
            && self.moved.is_empty()
    }

    pub fn deleted_indexes(&self) -> Vec<usize> {
        self.deleted.iter().map(|d| d.index).collect()
    }

    pub fn inserted_indexes(&self) -> Vec<usize> {
        self.inserted.iter().map(|i| i.index).collect()
    }

    pub fn changed_indexes(&self) -> Vec<usize> {
        self.changed.iter().map(|c| c.index).collect()
    }

    /// `(from, to)` pairs in reporting order.
    pub fn moved_indexes(&self) -> Vec<(usize, usize)> {
        self.moved.iter().map(|m| (m.from, m.to)).collect()
    }
}

impl<T: Clone> Diff<T> {
    /// Replay this diff on `initial`.
    ///
    /// Deletions and move sources are removed by descending initial index,
    /// then insertions and move destinations are placed by ascending result
    /// index, then changed contents are written. For a diff computed from
    /// `(initial, result)` the output equals `result`.
    pub fn apply_to(&self, initial: &[T]) -> Result<Vec<T>> {
        let mut removals: Vec<usize> = self
            .deleted
            .iter()
            .map(|d| d.index)
            .chain(self.moved.iter().map(|m| m.from))
            .collect();
        removals.sort_unstable_by(|a, b| b.cmp(a));

        let mut output = initial.to_vec();
        for index in removals {
            if index >= output.len() {
                return Err(SyncError::InconsistentDiff {
                    index,
                    len: output.len(),
                });
            }
            output.remove(index);
        }

        let mut insertions: Vec<(usize, &T)> = self
            .inserted
            .iter()
            .map(|i| (i.index, &i.object))
            .chain(self.moved.iter().map(|m| (m.to, &m.object)))
            .collect();
        insertions.sort_by_key(|(index, _)| *index);

        for (index, object) in insertions {
            if index > output.len() {
                return Err(SyncError::InconsistentDiff {
                    index,
                    len: output.len(),
                });
            }
            output.insert(index, object.clone());
        }

        for changed in &self.changed {
            let len = output.len();
            let slot = output
                .get_mut(changed.index)
                .ok_or(SyncError::InconsistentDiff {
                    index: changed.index,
                    len,
                })?;
            *slot = changed.object.clone();
        }

        Ok(output)
    }
}

impl<T: Keyed> Diff<T> {
    /// Map every key mentioned by this diff to its classification.
    pub fn classify(&self) -> BTreeMap<String, DiffKind> {
        let mut kinds = BTreeMap::new();
        for d in &self.deleted {
            kinds.insert(d.object.key().to_string(), DiffKind::Deleted);
        }
        for i in &self.inserted {
            kinds.insert(i.object.key().to_string(), DiffKind::Inserted);
        }
        for c in &self.changed {
            kinds.insert(c.object.key().to_string(), DiffKind::Changed);
        }
        for m in &self.moved {
            kinds.insert(m.object.key().to_string(), DiffKind::Moved);
        }
        kinds
    }
}
