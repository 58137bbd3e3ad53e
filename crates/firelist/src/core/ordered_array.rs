//! Incremental ordered collection driven by per-child events
//!
//! `OrderedArray` observes the four child event kinds of one query and keeps a
//! local `Vec<Record>` (plus a key -> index map) in the order the query
//! dictates through each event's preceding key. The sorted variant ignores
//! preceding keys and orders records with a local comparator instead.
//!
//! Lifecycle:
//! - constructed inert; `start()` attaches, `stop()` detaches and keeps the
//!   records readable
//! - restarting empties the retained records first (reported as removals),
//!   since the query replays every current child as added
//! - a query cancellation freezes the array for good

use firelist_api::{
    ArrayEvent, CHILD_EVENT_KINDS, CancelCallback, ChildEvent, EventCallback, EventKind,
    ObservableQuery, ObserverHandle, QueryError, Record, Result, SyncError,
};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, trace, warn};

use super::delegate::{ArrayDelegate, dispatch_array_event, event_channel};
use super::dispatch::SerialQueue;
use crate::config::{OrphanPlacement, SyncConfig};

/// Orders records for `OrderedArray::sorted_by`.
pub type Comparator = Arc<dyn Fn(&Record, &Record) -> Ordering + Send + Sync>;

enum Placement {
    /// Position follows each event's preceding key
    QueryOrder,
    /// Position follows the comparator; preceding keys are ignored
    Sorted(Comparator),
}

enum Phase {
    Idle,
    Observing(Vec<ObserverHandle>),
    Stopped,
    Cancelled(QueryError),
}

struct Delivery {
    session: u64,
    kind: DeliveryKind,
}

enum DeliveryKind {
    Reset,
    Event(ChildEvent),
    Cancel(QueryError),
}

struct ArrayState {
    records: Vec<Record>,
    positions: HashMap<String, usize>,
    phase: Phase,
    /// Bumped on every start; deliveries from older sessions are dropped
    session: u64,
}

impl ArrayState {
    fn index_of(&self, key: &str) -> Option<usize> {
        self.positions.get(key).copied()
    }

    fn insert(&mut self, index: usize, record: Record) {
        self.records.insert(index, record);
        self.reindex_from(index);
    }

    fn remove(&mut self, index: usize) -> Record {
        let record = self.records.remove(index);
        self.positions.remove(&record.key);
        self.reindex_from(index);
        record
    }

    fn reindex_from(&mut self, start: usize) {
        for (offset, record) in self.records[start..].iter().enumerate() {
            self.positions.insert(record.key.clone(), start + offset);
        }
    }

    fn predecessor_key(&self, index: usize) -> Option<&str> {
        index
            .checked_sub(1)
            .map(|previous| self.records[previous].key.as_str())
    }

    fn target_index(
        &self,
        record: &Record,
        preceding_key: Option<&str>,
        placement: &Placement,
        config: &SyncConfig,
    ) -> usize {
        match placement {
            Placement::Sorted(compare) => self
                .records
                .partition_point(|held| compare(held, record) != Ordering::Greater),
            Placement::QueryOrder => match preceding_key {
                None => 0,
                Some(preceding) => match self.index_of(preceding) {
                    Some(index) => index + 1,
                    None => {
                        warn!(
                            key = %record.key,
                            preceding,
                            "Preceding key is not held; placing record by orphan policy"
                        );
                        match config.orphan_placement {
                            OrphanPlacement::Append => self.records.len(),
                            OrphanPlacement::Prepend => 0,
                        }
                    }
                },
            },
        }
    }

    /// Whether `record` may stay at `index` without breaking the order.
    fn fits_at(
        &self,
        index: usize,
        record: &Record,
        preceding_key: Option<&str>,
        placement: &Placement,
    ) -> bool {
        match placement {
            Placement::QueryOrder => self.predecessor_key(index) == preceding_key,
            Placement::Sorted(compare) => {
                let after_previous = index == 0
                    || compare(&self.records[index - 1], record) != Ordering::Greater;
                let before_next = index + 1 >= self.records.len()
                    || compare(record, &self.records[index + 1]) != Ordering::Greater;
                after_previous && before_next
            }
        }
    }

    fn apply(
        &mut self,
        event: ChildEvent,
        placement: &Placement,
        config: &SyncConfig,
    ) -> Vec<ArrayEvent> {
        match event {
            ChildEvent::Added {
                record,
                preceding_key,
            } => {
                if self.index_of(&record.key).is_some() {
                    warn!(key = %record.key, "Added event for a key already held; treating as change");
                    return self.relocate(record, preceding_key.as_deref(), placement, config);
                }
                self.add(record, preceding_key.as_deref(), placement, config)
            }
            ChildEvent::Changed {
                record,
                preceding_key,
            } => {
                if self.index_of(&record.key).is_none() {
                    warn!(key = %record.key, "Changed event for an unknown key; treating as add");
                    return self.add(record, preceding_key.as_deref(), placement, config);
                }
                self.relocate(record, preceding_key.as_deref(), placement, config)
            }
            ChildEvent::Removed { record, .. } => {
                let Some(index) = self.index_of(&record.key) else {
                    warn!(key = %record.key, "Removed event for an unknown key; ignoring");
                    return Vec::new();
                };
                self.remove(index);
                vec![ArrayEvent::Removed { record, index }]
            }
            ChildEvent::Moved {
                record,
                preceding_key,
            } => {
                let Some(from) = self.index_of(&record.key) else {
                    warn!(key = %record.key, "Moved event for an unknown key; ignoring");
                    return Vec::new();
                };
                if matches!(placement, Placement::Sorted(_))
                    && self.fits_at(from, &record, None, placement)
                {
                    self.records[from] = record;
                    return Vec::new();
                }
                self.remove(from);
                let to = self.target_index(&record, preceding_key.as_deref(), placement, config);
                self.insert(to, record.clone());
                if to == from {
                    return Vec::new();
                }
                vec![ArrayEvent::Moved { record, from, to }]
            }
        }
    }

    fn add(
        &mut self,
        record: Record,
        preceding_key: Option<&str>,
        placement: &Placement,
        config: &SyncConfig,
    ) -> Vec<ArrayEvent> {
        let index = self.target_index(&record, preceding_key, placement, config);
        self.insert(index, record.clone());
        vec![ArrayEvent::Added { record, index }]
    }

    /// Replace a held record, moving it when its position no longer holds.
    ///
    /// A preceding key that is not held says nothing about the position, so
    /// the record keeps its index.
    fn relocate(
        &mut self,
        record: Record,
        preceding_key: Option<&str>,
        placement: &Placement,
        config: &SyncConfig,
    ) -> Vec<ArrayEvent> {
        let Some(from) = self.index_of(&record.key) else {
            return Vec::new();
        };
        let orphaned = matches!(placement, Placement::QueryOrder)
            && preceding_key.is_some_and(|preceding| self.index_of(preceding).is_none());
        if orphaned {
            warn!(
                key = %record.key,
                preceding = ?preceding_key,
                "Preceding key is not held; changing record in place"
            );
        }
        if orphaned || self.fits_at(from, &record, preceding_key, placement) {
            self.records[from] = record.clone();
            return vec![ArrayEvent::Changed {
                record,
                index: from,
            }];
        }

        self.remove(from);
        let to = self.target_index(&record, preceding_key, placement, config);
        self.insert(to, record.clone());
        if to == from {
            return vec![ArrayEvent::Changed { record, index: to }];
        }
        vec![
            ArrayEvent::Moved {
                record: record.clone(),
                from,
                to,
            },
            ArrayEvent::Changed { record, index: to },
        ]
    }

    /// Empty the records, reporting removals from last to first.
    fn reset(&mut self) -> Vec<ArrayEvent> {
        self.positions.clear();
        std::mem::take(&mut self.records)
            .into_iter()
            .enumerate()
            .rev()
            .map(|(index, record)| ArrayEvent::Removed { record, index })
            .collect()
    }
}

struct ArrayInner {
    query: Arc<dyn ObservableQuery>,
    placement: Placement,
    config: SyncConfig,
    state: RwLock<ArrayState>,
    delegate: RwLock<Option<Arc<dyn ArrayDelegate>>>,
    queue: SerialQueue<Delivery>,
}

impl ArrayInner {
    fn read_state(&self) -> RwLockReadGuard<'_, ArrayState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, ArrayState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn delegate(&self) -> Option<Arc<dyn ArrayDelegate>> {
        self.delegate
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn deliver(&self, delivery: Delivery) {
        self.queue.dispatch(delivery, |next| self.process(next));
    }

    fn process(&self, delivery: Delivery) {
        let mut detached = Vec::new();
        let events = {
            let mut state = self.write_state();
            if state.session != delivery.session || !matches!(state.phase, Phase::Observing(_)) {
                trace!(session = delivery.session, "Dropping delivery from an inactive session");
                return;
            }
            match delivery.kind {
                DeliveryKind::Reset => state.reset(),
                DeliveryKind::Event(event) => {
                    trace!(
                        kind = ?event.kind(),
                        key = %event.record().key,
                        preceding = ?event.preceding_key(),
                        "Applying child event"
                    );
                    state.apply(event, &self.placement, &self.config)
                }
                DeliveryKind::Cancel(error) => {
                    warn!(%error, "Query cancelled; ordered array is now frozen");
                    if let Phase::Observing(handles) =
                        std::mem::replace(&mut state.phase, Phase::Cancelled(error.clone()))
                    {
                        detached = handles;
                    }
                    vec![ArrayEvent::Cancelled { error }]
                }
            }
        };

        for handle in detached {
            self.query.remove_observer(handle);
        }
        self.notify(&events);
    }

    fn notify(&self, events: &[ArrayEvent]) {
        if events.is_empty() {
            return;
        }
        let Some(delegate) = self.delegate() else {
            return;
        };
        let structural = events.iter().any(ArrayEvent::is_structural);
        if structural {
            delegate.begin_updates();
        }
        for event in events {
            dispatch_array_event(delegate.as_ref(), event);
        }
        if structural {
            delegate.end_updates();
        }
    }

    fn event_callback(self: &Arc<Self>, kind: EventKind, session: u64) -> EventCallback {
        let inner = Arc::downgrade(self);
        Arc::new(move |record: Record, preceding_key: Option<String>| {
            let Some(inner) = inner.upgrade() else {
                return;
            };
            if let Some(event) = ChildEvent::from_parts(kind, record, preceding_key) {
                inner.deliver(Delivery {
                    session,
                    kind: DeliveryKind::Event(event),
                });
            }
        })
    }

    fn cancel_callback(self: &Arc<Self>, session: u64) -> CancelCallback {
        let inner = Arc::downgrade(self);
        Arc::new(move |error: QueryError| {
            if let Some(inner) = inner.upgrade() {
                inner.deliver(Delivery {
                    session,
                    kind: DeliveryKind::Cancel(error),
                });
            }
        })
    }
}

impl Drop for ArrayInner {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Phase::Observing(handles) = &state.phase {
            for handle in handles {
                self.query.remove_observer(*handle);
            }
        }
    }
}

/// An ordered local mirror of one child-event query.
///
/// Cloning yields another handle to the same collection.
///
/// # Example
///
/// ```rust,no_run
/// use firelist::OrderedArray;
/// use firelist::testing::{FakeQuery, Recorder};
/// use serde_json::json;
///
/// let query = FakeQuery::new("messages");
/// let array = OrderedArray::new(query.clone());
/// let recorder = Recorder::<firelist::ArrayEvent>::new();
/// array.set_delegate(Some(recorder.clone()));
/// array.start()?;
///
/// query.push(firelist::Record::new("m1", json!({"text": "hi"})));
/// assert_eq!(array.count(), 1);
/// # Ok::<(), firelist::SyncError>(())
/// ```
#[derive(Clone)]
pub struct OrderedArray {
    inner: Arc<ArrayInner>,
}

impl OrderedArray {
    pub fn new(query: Arc<dyn ObservableQuery>) -> Self {
        Self::with_config(query, SyncConfig::default())
    }

    pub fn with_config(query: Arc<dyn ObservableQuery>, config: SyncConfig) -> Self {
        Self::build(query, Placement::QueryOrder, config)
    }

    /// An array ordered by `compare` instead of by the query.
    ///
    /// Records comparing equal keep their arrival order.
    pub fn sorted_by<F>(query: Arc<dyn ObservableQuery>, compare: F) -> Self
    where
        F: Fn(&Record, &Record) -> Ordering + Send + Sync + 'static,
    {
        Self::build(query, Placement::Sorted(Arc::new(compare)), SyncConfig::default())
    }

    fn build(query: Arc<dyn ObservableQuery>, placement: Placement, config: SyncConfig) -> Self {
        Self {
            inner: Arc::new(ArrayInner {
                query,
                placement,
                config,
                state: RwLock::new(ArrayState {
                    records: Vec::new(),
                    positions: HashMap::new(),
                    phase: Phase::Idle,
                    session: 0,
                }),
                delegate: RwLock::new(None),
                queue: SerialQueue::new(),
            }),
        }
    }

    pub fn set_delegate(&self, delegate: Option<Arc<dyn ArrayDelegate>>) {
        *self
            .inner
            .delegate
            .write()
            .unwrap_or_else(PoisonError::into_inner) = delegate;
    }

    /// Replace the delegate with a channel and return its receiving end.
    pub fn event_stream(&self) -> UnboundedReceiverStream<ArrayEvent> {
        let (sender, stream) = event_channel();
        self.set_delegate(Some(sender));
        stream
    }

    /// Attach to the query. No-op while already observing.
    ///
    /// Fails with `SyncError::Terminated` once the query has been cancelled.
    pub fn start(&self) -> Result<()> {
        let session = {
            let mut state = self.inner.write_state();
            match &state.phase {
                Phase::Observing(_) => return Ok(()),
                Phase::Cancelled(error) => {
                    return Err(SyncError::Terminated {
                        source: error.clone(),
                    });
                }
                Phase::Idle | Phase::Stopped => {}
            }
            state.session += 1;
            state.phase = Phase::Observing(Vec::new());
            state.session
        };
        debug!(session, "Starting ordered array");

        self.inner.deliver(Delivery {
            session,
            kind: DeliveryKind::Reset,
        });

        let on_cancel = self.inner.cancel_callback(session);
        let handles: Vec<ObserverHandle> = CHILD_EVENT_KINDS
            .iter()
            .map(|kind| {
                self.inner.query.observe(
                    *kind,
                    self.inner.event_callback(*kind, session),
                    Arc::clone(&on_cancel),
                )
            })
            .collect();

        // Stopped or cancelled while subscribing: the handles are no longer wanted
        let rejected = {
            let mut guard = self.inner.write_state();
            let state = &mut *guard;
            match &mut state.phase {
                Phase::Observing(held) if state.session == session => {
                    held.extend(handles);
                    Vec::new()
                }
                _ => handles,
            }
        };
        for handle in rejected {
            self.inner.query.remove_observer(handle);
        }
        Ok(())
    }

    /// Detach from the query. Records stay readable; safe to call repeatedly.
    pub fn stop(&self) {
        let handles = {
            let mut state = self.inner.write_state();
            match std::mem::replace(&mut state.phase, Phase::Stopped) {
                Phase::Observing(handles) => handles,
                other => {
                    state.phase = other;
                    return;
                }
            }
        };
        debug!(observers = handles.len(), "Stopping ordered array");
        for handle in handles {
            self.inner.query.remove_observer(handle);
        }
    }

    pub fn is_observing(&self) -> bool {
        matches!(self.inner.read_state().phase, Phase::Observing(_))
    }

    /// The error that terminated this array, if any.
    pub fn cancellation(&self) -> Option<QueryError> {
        match &self.inner.read_state().phase {
            Phase::Cancelled(error) => Some(error.clone()),
            _ => None,
        }
    }

    pub fn query(&self) -> Arc<dyn ObservableQuery> {
        Arc::clone(&self.inner.query)
    }

    pub fn count(&self) -> usize {
        self.inner.read_state().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// The record at `index`.
    ///
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
        panic!("index {index} out of bounds for ordered array of length {len}");
    }

    pub fn get(&self, index: usize) -> Option<Record> {
        self.inner.read_state().records.get(index).cloned()
    }

    pub fn items(&self) -> Vec<Record> {
        self.inner.read_state().records.clone()
    }

    pub fn keys(&self) -> Vec<String> {
        self.inner
            .read_state()
            .records
            .iter()
            .map(|record| record.key.clone())
            .collect()
    }

    /// Index of the record stored under `key`, or `None` if it is not held.
    pub fn index_for_key(&self, key: &str) -> Result<Option<usize>> {
        if key.is_empty() {
            return Err(SyncError::InvalidKey);
        }
        Ok(self.inner.read_state().index_of(key))
    }
}

impl fmt::Debug for OrderedArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.read_state();
        f.debug_struct("OrderedArray")
            .field("count", &state.records.len())
            .field("observing", &matches!(state.phase, Phase::Observing(_)))
            .field("session", &state.session)
            .finish()
    }
}
