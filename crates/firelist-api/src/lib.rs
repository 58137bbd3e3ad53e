//! Shared types for firelist collections
//!
//! This crate holds the vocabulary shared by every collection engine and by
//! the hosts that feed them:
//!
//! - `record`: keyed records and the child events that carry them
//! - `query`: the observable-query contract the engines consume
//! - `events`: tagged notifications the engines emit to their delegates
//! - `diff`: the diff value produced by the batched engine
//! - `error`: query failures and engine errors

pub mod diff;
pub mod error;
pub mod events;
pub mod query;
pub mod record;

pub use diff::{Diff, DiffKind, IndexedObject, MovedObject};
pub use error::{QueryError, Result, SyncError};
pub use events::{ArrayEvent, BatchedEvent, IndexedEvent};
pub use query::{
    CancelCallback, DocumentChange, DocumentChangeKind, EventCallback, EventKind,
    ListenerRegistration, ObservableQuery, ObserverHandle, QuerySnapshot, SnapshotCallback,
    SnapshotQuery, CHILD_EVENT_KINDS,
};
pub use record::{ChildEvent, Keyed, Record};
