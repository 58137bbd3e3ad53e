use serde::{Deserialize, Serialize};

use crate::diff::Diff;
use crate::error::QueryError;
use crate::record::Record;

/// Notification emitted by an incremental ordered collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ArrayEvent {
    Added { record: Record, index: usize },
    Changed { record: Record, index: usize },
    Removed { record: Record, index: usize },
    Moved { record: Record, from: usize, to: usize },
    Cancelled { error: QueryError },
}

impl ArrayEvent {
    /// Whether this event changes which records sit at which indices.
    pub fn is_structural(&self) -> bool {
        !matches!(self, Self::Cancelled { .. })
    }
}

/// Notification emitted by an index/data joined collection.
///
/// Structural notifications (`*Reference`) follow the index stream; content
/// notifications (`Loaded`, `LoadFailed`) follow the per-key data observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum IndexedEvent {
    AddedReference {
        reference: Record,
        index: usize,
    },
    ChangedReference {
        reference: Record,
        index: usize,
    },
    RemovedReference {
        reference: Record,
        index: usize,
    },
    MovedReference {
        reference: Record,
        from: usize,
        to: usize,
    },
    Loaded {
        reference: Record,
        object: Record,
        index: usize,
    },
    LoadFailed {
        reference: Record,
        index: usize,
        error: QueryError,
    },
    QueryCancelled {
        error: QueryError,
    },
}

/// Notification emitted by a snapshot-diffing collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BatchedEvent {
    Updated(Diff<Record>),
    QueryFailed(QueryError),
}
