//! Contract between collection engines and the remote data source
//!
//! Engines never talk to the network. They consume one of two collaborator
//! shapes supplied by the host:
//!
//! - `ObservableQuery`: per-child event streams (Realtime Database style),
//!   plus whole-node `Value` observation for per-key content lookups
//! - `SnapshotQuery`: whole-result snapshots with optional change hints
//!   (Firestore style)
//!
//! Retry, backoff and authentication are the collaborator's business. Once a
//! cancel or error callback fires, the collaborator has already dropped that
//! observer; removing it again must be harmless.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::QueryError;
use crate::record::Record;

/// Which notifications an observer receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    ChildAdded,
    ChildChanged,
    ChildRemoved,
    ChildMoved,
    /// The whole node at the query location, delivered on every change
    Value,
}

/// The four child event kinds an incremental collection observes.
pub const CHILD_EVENT_KINDS: [EventKind; 4] = [
    EventKind::ChildAdded,
    EventKind::ChildChanged,
    EventKind::ChildRemoved,
    EventKind::ChildMoved,
];

/// Receives `(record, preceding_key)` for every event of the observed kind.
pub type EventCallback = Arc<dyn Fn(Record, Option<String>) + Send + Sync>;

/// Receives the terminal error of an observer or listener.
pub type CancelCallback = Arc<dyn Fn(QueryError) + Send + Sync>;

/// Receives every whole-result snapshot of a listener.
pub type SnapshotCallback = Arc<dyn Fn(QuerySnapshot) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObserverHandle(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ListenerRegistration(pub u64);

/// A live query delivering per-child events.
pub trait ObservableQuery: Send + Sync {
    /// Register callbacks for one event kind.
    ///
    /// Implementations may invoke `on_event` synchronously from inside this call
    /// (e.g. to replay the children that already exist).
    fn observe(
        &self,
        kind: EventKind,
        on_event: EventCallback,
        on_cancel: CancelCallback,
    ) -> ObserverHandle;

    fn remove_observer(&self, handle: ObserverHandle);

    /// Query for the node stored under `key` below this location.
    fn child(&self, key: &str) -> Arc<dyn ObservableQuery>;
}

/// Per-document hint attached to a snapshot by the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DocumentChangeKind {
    Added,
    Modified,
    Removed,
}

/// What the source says happened to one document since its previous snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentChange {
    pub kind: DocumentChangeKind,
    pub key: String,
    pub old_index: Option<usize>,
    pub new_index: Option<usize>,
}

impl DocumentChange {
    pub fn added(key: impl Into<String>, new_index: usize) -> Self {
        Self {
            kind: DocumentChangeKind::Added,
            key: key.into(),
            old_index: None,
            new_index: Some(new_index),
        }
    }

    pub fn modified(key: impl Into<String>, old_index: usize, new_index: usize) -> Self {
        Self {
            kind: DocumentChangeKind::Modified,
            key: key.into(),
            old_index: Some(old_index),
            new_index: Some(new_index),
        }
    }

    pub fn removed(key: impl Into<String>, old_index: usize) -> Self {
        Self {
            kind: DocumentChangeKind::Removed,
            key: key.into(),
            old_index: Some(old_index),
            new_index: None,
        }
    }
}

/// One whole-result delivery from a `SnapshotQuery`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuerySnapshot {
    pub records: Vec<Record>,
    /// Changes relative to the listener's previous snapshot, if the source tracks them
    pub changes: Option<Vec<DocumentChange>>,
}

impl QuerySnapshot {
    pub fn new(records: Vec<Record>) -> Self {
        Self {
            records,
            changes: None,
        }
    }

    pub fn with_changes(records: Vec<Record>, changes: Vec<DocumentChange>) -> Self {
        Self {
            records,
            changes: Some(changes),
        }
    }
}

/// A live query delivering whole-result snapshots.
pub trait SnapshotQuery: Send + Sync {
    /// Start listening. The first snapshot may be delivered synchronously.
    fn listen(&self, on_snapshot: SnapshotCallback, on_error: CancelCallback)
        -> ListenerRegistration;

    fn remove_listener(&self, registration: ListenerRegistration);
}
