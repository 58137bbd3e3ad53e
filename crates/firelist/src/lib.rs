//! Ordered local collections kept in sync with remote queries
//!
//! Three engines share one delivery model (serialized, synchronous delegate
//! callbacks, explicit start/stop):
//!
//! - `OrderedArray`: applies per-child events from an `ObservableQuery`
//! - `IndexedArray`: joins an index query (order, membership) with per-key
//!   content from a data query
//! - `BatchedArray`: diffs whole-result snapshots from a `SnapshotQuery`
//!
//! Delegates can be swapped for a `tokio_stream` of tagged events through each
//! engine's `event_stream()`.

pub mod config;
pub mod core;
pub mod diff;
pub mod testing;

pub use config::{OrphanPlacement, SyncConfig};
pub use crate::core::{
    ArrayDelegate, BatchedArray, BatchedArrayDelegate, Comparator, EventSender, EventSink,
    IndexedArray, IndexedArrayDelegate, LoadState, OrderedArray, event_channel,
};
pub use diff::diff;

pub use firelist_api::{
    ArrayEvent, BatchedEvent, ChildEvent, Diff, DiffKind, DocumentChange, DocumentChangeKind,
    EventKind, IndexedEvent, IndexedObject, Keyed, ListenerRegistration, MovedObject,
    ObservableQuery, ObserverHandle, QueryError, QuerySnapshot, Record, Result, SnapshotQuery,
    SyncError,
};
