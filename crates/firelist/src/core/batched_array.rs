//! Ordered collection replaced wholesale by query snapshots
//!
//! Every snapshot from the bound `SnapshotQuery` is diffed against the held
//! sequence, the sequence is replaced, and the delegate gets one consolidated
//! `Diff`. Each listen gets a generation number; deliveries from an older
//! generation (a replaced, stopped or failed listener) are dropped.

use firelist_api::{
    BatchedEvent, CancelCallback, ListenerRegistration, QueryError, QuerySnapshot, Record,
    Result, SnapshotCallback, SnapshotQuery, SyncError,
};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, trace, warn};

use super::delegate::{BatchedArrayDelegate, dispatch_batched_event, event_channel};
use super::dispatch::SerialQueue;
use crate::config::SyncConfig;
use crate::diff::diff;

enum Phase {
    Idle,
    Listening,
    Failed(QueryError),
}

struct Delivery {
    generation: u64,
    kind: DeliveryKind,
}

enum DeliveryKind {
    Snapshot(QuerySnapshot),
    Failure(QueryError),
}

struct BatchedState {
    query: Arc<dyn SnapshotQuery>,
    records: Vec<Record>,
    phase: Phase,
    listener: Option<ListenerRegistration>,
    generation: u64,
    /// Change hints of a listener's first snapshot are relative to nothing
    awaiting_first: bool,
}

struct BatchedInner {
    config: SyncConfig,
    state: RwLock<BatchedState>,
    delegate: RwLock<Option<Arc<dyn BatchedArrayDelegate>>>,
    queue: SerialQueue<Delivery>,
}

impl BatchedInner {
    fn read_state(&self) -> RwLockReadGuard<'_, BatchedState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, BatchedState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn deliver(&self, delivery: Delivery) {
        self.queue.dispatch(delivery, |next| self.process(next));
    }

    fn process(&self, delivery: Delivery) {
        let mut dropped = None;
        let event = {
            let mut state = self.write_state();
            if state.generation != delivery.generation
                || !matches!(state.phase, Phase::Listening)
            {
                trace!(generation = delivery.generation, "Dropping delivery from a retired listener");
                return;
            }
            match delivery.kind {
                DeliveryKind::Snapshot(snapshot) => {
                    let hints = if state.awaiting_first || !self.config.use_change_hints {
                        None
                    } else {
                        snapshot.changes.as_deref()
                    };
                    let diff = diff(&state.records, &snapshot.records, hints);
                    trace!(
                        deleted = diff.deleted.len(),
                        inserted = diff.inserted.len(),
                        changed = diff.changed.len(),
                        moved = diff.moved.len(),
                        "Applying snapshot"
                    );
                    state.awaiting_first = false;
                    state.records = snapshot.records;
                    BatchedEvent::Updated(diff)
                }
                DeliveryKind::Failure(error) => {
                    warn!(%error, "Snapshot query failed; batched array keeps its last result");
                    state.phase = Phase::Failed(error.clone());
                    state.generation += 1;
                    dropped = state.listener.take().map(|reg| (Arc::clone(&state.query), reg));
                    BatchedEvent::QueryFailed(error)
                }
            }
        };

        if let Some((query, registration)) = dropped {
            query.remove_listener(registration);
        }
        self.notify(&event);
    }

    fn notify(&self, event: &BatchedEvent) {
        let delegate = self
            .delegate
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(delegate) = delegate {
            dispatch_batched_event(delegate.as_ref(), event);
        }
    }

    fn snapshot_callback(self: &Arc<Self>, generation: u64) -> SnapshotCallback {
        let inner = Arc::downgrade(self);
        Arc::new(move |snapshot: QuerySnapshot| {
            if let Some(inner) = inner.upgrade() {
                inner.deliver(Delivery {
                    generation,
                    kind: DeliveryKind::Snapshot(snapshot),
                });
            }
        })
    }

    fn error_callback(self: &Arc<Self>, generation: u64) -> CancelCallback {
        let inner = Arc::downgrade(self);
        Arc::new(move |error: QueryError| {
            if let Some(inner) = inner.upgrade() {
                inner.deliver(Delivery {
                    generation,
                    kind: DeliveryKind::Failure(error),
                });
            }
        })
    }

    /// Open a new listener on the current query, retiring the previous one.
    fn listen(self: &Arc<Self>) {
        let (query, generation, retired) = {
            let mut state = self.write_state();
            state.generation += 1;
            state.phase = Phase::Listening;
            state.awaiting_first = true;
            (
                Arc::clone(&state.query),
                state.generation,
                state.listener.take(),
            )
        };
        if let Some(registration) = retired {
            query.remove_listener(registration);
        }
        debug!(generation, "Listening to snapshot query");

        let registration = query.listen(
            self.snapshot_callback(generation),
            self.error_callback(generation),
        );

        let rejected = {
            let mut state = self.write_state();
            if state.generation == generation && matches!(state.phase, Phase::Listening) {
                state.listener = Some(registration);
                false
            } else {
                true
            }
        };
        if rejected {
            query.remove_listener(registration);
        }
    }
}

impl Drop for BatchedInner {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(registration) = state.listener.take() {
            state.query.remove_listener(registration);
        }
    }
}

/// An ordered local copy of a whole-result query, reported as diffs.
#[derive(Clone)]
pub struct BatchedArray {
    inner: Arc<BatchedInner>,
}

impl BatchedArray {
    pub fn new(query: Arc<dyn SnapshotQuery>) -> Self {
        Self::with_config(query, SyncConfig::default())
    }

    pub fn with_config(query: Arc<dyn SnapshotQuery>, config: SyncConfig) -> Self {
        Self {
            inner: Arc::new(BatchedInner {
                config,
                state: RwLock::new(BatchedState {
                    query,
                    records: Vec::new(),
                    phase: Phase::Idle,
                    listener: None,
                    generation: 0,
                    awaiting_first: true,
                }),
                delegate: RwLock::new(None),
                queue: SerialQueue::new(),
            }),
        }
    }

    pub fn set_delegate(&self, delegate: Option<Arc<dyn BatchedArrayDelegate>>) {
        *self
            .inner
            .delegate
            .write()
            .unwrap_or_else(PoisonError::into_inner) = delegate;
    }

    /// Replace the delegate with a channel and return its receiving end.
    pub fn event_stream(&self) -> UnboundedReceiverStream<BatchedEvent> {
        let (sender, stream) = event_channel();
        self.set_delegate(Some(sender));
        stream
    }

    /// Start listening. No-op while already listening; after a query
    /// failure this retries the same query.
    pub fn observe_query(&self) {
        if self.is_observing() {
            return;
        }
        self.inner.listen();
    }

    /// Stop listening. The last result stays readable; safe to call repeatedly.
    pub fn stop_observing(&self) {
        let retired = {
            let mut state = self.inner.write_state();
            if matches!(state.phase, Phase::Idle) {
                return;
            }
            state.phase = Phase::Idle;
            state.generation += 1;
            state
                .listener
                .take()
                .map(|registration| (Arc::clone(&state.query), registration))
        };
        debug!("Stopped listening to snapshot query");
        if let Some((query, registration)) = retired {
            query.remove_listener(registration);
        }
    }

    /// Bind another query.
    ///
    /// While listening (or after a failure) the old listener is dropped at
    /// once and the new query's first result is diffed against the current
    /// records.
    pub fn set_query(&self, query: Arc<dyn SnapshotQuery>) {
        let (resume, retired) = {
            let mut state = self.inner.write_state();
            let previous = std::mem::replace(&mut state.query, query);
            let retired = state.listener.take().map(|registration| (previous, registration));
            (!matches!(state.phase, Phase::Idle), retired)
        };
        if let Some((previous, registration)) = retired {
            previous.remove_listener(registration);
        }
        if resume {
            self.inner.listen();
        }
    }

    pub fn query(&self) -> Arc<dyn SnapshotQuery> {
        Arc::clone(&self.inner.read_state().query)
    }

    pub fn is_observing(&self) -> bool {
        matches!(self.inner.read_state().phase, Phase::Listening)
    }

    /// The error that stopped the current query, if any.
    pub fn failure(&self) -> Option<QueryError> {
        match &self.inner.read_state().phase {
            Phase::Failed(error) => Some(error.clone()),
            _ => None,
        }
    }

    pub fn count(&self) -> usize {
        self.inner.read_state().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    pub fn item(&self, index: usize) -> Record {
        let len = {
            let state = self.inner.read_state();
            if let Some(record) = state.records.get(index) {
                return record.clone();
            }
            state.records.len()
        };
        panic!("index {index} out of bounds for batched array of length {len}");
    }

    pub fn get(&self, index: usize) -> Option<Record> {
        self.inner.read_state().records.get(index).cloned()
    }

    pub fn items(&self) -> Vec<Record> {
        self.inner.read_state().records.clone()
    }

    pub fn index_for_key(&self, key: &str) -> Result<Option<usize>> {
        if key.is_empty() {
            return Err(SyncError::InvalidKey);
        }
        Ok(self
            .inner
            .read_state()
            .records
            .iter()
            .position(|record| record.key == key))
    }
}

impl fmt::Debug for BatchedArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.read_state();
        f.debug_struct("BatchedArray")
            .field("count", &state.records.len())
            .field("listening", &matches!(state.phase, Phase::Listening))
            .field("generation", &state.generation)
            .finish()
    }
}
