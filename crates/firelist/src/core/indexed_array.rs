//! Ordered collection joined from an index query and a data query
//!
//! The index query dictates membership and order: a private `OrderedArray`
//! mirrors it, and a bridge delegate forwards its notifications into this
//! collection's own delivery queue. For every key in the index one content
//! observer (`EventKind::Value` on `data.child(key)`) resolves the entry's
//! content. Content observers are identified by a token issued per entry, so
//! callbacks from an observer whose entry is gone are discarded.

use firelist_api::{
    ArrayEvent, CancelCallback, EventCallback, EventKind, IndexedEvent, ObservableQuery,
    ObserverHandle, QueryError, Record, Result, SyncError,
};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, trace, warn};

use super::delegate::{EventSink, IndexedArrayDelegate, dispatch_indexed_event, event_channel};
use super::dispatch::SerialQueue;
use super::ordered_array::OrderedArray;
use crate::config::SyncConfig;

/// Content resolution state of one index entry.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadState {
    /// Content observer issued, nothing arrived yet
    Pending,
    Loaded(Record),
    Failed(QueryError),
}

struct ContentObserver {
    query: Arc<dyn ObservableQuery>,
    handle: ObserverHandle,
}

struct Entry {
    reference: Record,
    content: LoadState,
    token: u64,
    observer: Option<ContentObserver>,
}

enum Phase {
    Idle,
    Observing,
    Stopped,
    Cancelled(QueryError),
}

enum Delivery {
    Index(ArrayEvent),
    Content { token: u64, object: Record },
    ContentFailed { token: u64, error: QueryError },
}

struct IndexedState {
    entries: Vec<Entry>,
    phase: Phase,
    next_token: u64,
}

impl IndexedState {
    fn position_of_token(&self, token: u64) -> Option<usize> {
        self.entries.iter().position(|entry| entry.token == token)
    }

    fn detach_all(&mut self) -> Vec<ContentObserver> {
        self.entries
            .iter_mut()
            .filter_map(|entry| entry.observer.take())
            .collect()
    }
}

struct IndexedInner {
    index: OrderedArray,
    data: Arc<dyn ObservableQuery>,
    state: RwLock<IndexedState>,
    delegate: RwLock<Option<Arc<dyn IndexedArrayDelegate>>>,
    queue: SerialQueue<Delivery>,
}

/// Forwards the private index array's notifications into the owning collection.
struct IndexBridge {
    inner: Weak<IndexedInner>,
}

impl EventSink<ArrayEvent> for IndexBridge {
    fn push(&self, event: ArrayEvent) {
        if let Some(inner) = self.inner.upgrade() {
            inner.deliver(Delivery::Index(event));
        }
    }
}

impl IndexedInner {
    fn read_state(&self) -> RwLockReadGuard<'_, IndexedState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, IndexedState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn deliver(self: &Arc<Self>, delivery: Delivery) {
        self.queue.dispatch(delivery, |next| self.process(next));
    }

    fn process(self: &Arc<Self>, delivery: Delivery) {
        match delivery {
            Delivery::Index(event) => self.apply_index_event(event),
            Delivery::Content { token, object } => self.apply_content(token, object),
            Delivery::ContentFailed { token, error } => self.apply_content_failure(token, error),
        }
    }

    fn apply_index_event(self: &Arc<Self>, event: ArrayEvent) {
        let mut subscribe = None;
        let mut detached = Vec::new();
        let notification = {
            let mut state = self.write_state();
            if !matches!(state.phase, Phase::Observing) {
                trace!("Dropping index event outside an observing phase");
                return;
            }
            match event {
                ArrayEvent::Added { record, index } => {
                    let token = state.next_token;
                    state.next_token += 1;
                    let index = index.min(state.entries.len());
                    state.entries.insert(
                        index,
                        Entry {
                            reference: record.clone(),
                            content: LoadState::Pending,
                            token,
                            observer: None,
                        },
                    );
                    subscribe = Some((record.key.clone(), token));
                    IndexedEvent::AddedReference {
                        reference: record,
                        index,
                    }
                }
                ArrayEvent::Changed { record, index } => {
                    if let Some(entry) = state.entries.get_mut(index) {
                        entry.reference = record.clone();
                    }
                    IndexedEvent::ChangedReference {
                        reference: record,
                        index,
                    }
                }
                ArrayEvent::Removed { record, index } => {
                    if index < state.entries.len() {
                        let entry = state.entries.remove(index);
                        detached.extend(entry.observer);
                    }
                    IndexedEvent::RemovedReference {
                        reference: record,
                        index,
                    }
                }
                ArrayEvent::Moved { record, from, to } => {
                    if from < state.entries.len() {
                        let entry = state.entries.remove(from);
                        let to = to.min(state.entries.len());
                        state.entries.insert(to, entry);
                    }
                    IndexedEvent::MovedReference {
                        reference: record,
                        from,
                        to,
                    }
                }
                ArrayEvent::Cancelled { error } => {
                    warn!(%error, "Index query cancelled; indexed array is now frozen");
                    state.phase = Phase::Cancelled(error.clone());
                    detached = state.detach_all();
                    IndexedEvent::QueryCancelled { error }
                }
            }
        };

        for observer in detached {
            observer.query.remove_observer(observer.handle);
        }
        self.notify(&notification);
        if let Some((key, token)) = subscribe {
            self.observe_content(&key, token);
        }
    }

    fn observe_content(self: &Arc<Self>, key: &str, token: u64) {
        trace!(key, token, "Observing content");
        let query = self.data.child(key);
        let handle = query.observe(
            EventKind::Value,
            self.content_callback(token),
            self.content_failure_callback(token),
        );

        let rejected = {
            let mut state = self.write_state();
            let observing = matches!(state.phase, Phase::Observing);
            match state.position_of_token(token) {
                Some(index) if observing => {
                    state.entries[index].observer = Some(ContentObserver {
                        query: Arc::clone(&query),
                        handle,
                    });
                    false
                }
                _ => true,
            }
        };
        if rejected {
            query.remove_observer(handle);
        }
    }

    fn apply_content(&self, token: u64, object: Record) {
        let notification = {
            let mut state = self.write_state();
            if !matches!(state.phase, Phase::Observing) {
                return;
            }
            let Some(index) = state.position_of_token(token) else {
                trace!(token, key = %object.key, "Dropping content from a retired observer");
                return;
            };
            let entry = &mut state.entries[index];
            entry.content = LoadState::Loaded(object.clone());
            IndexedEvent::Loaded {
                reference: entry.reference.clone(),
                object,
                index,
            }
        };
        self.notify(&notification);
    }

    fn apply_content_failure(&self, token: u64, error: QueryError) {
        let (notification, detached) = {
            let mut state = self.write_state();
            if !matches!(state.phase, Phase::Observing) {
                return;
            }
            let Some(index) = state.position_of_token(token) else {
                return;
            };
            let entry = &mut state.entries[index];
            warn!(key = %entry.reference.key, %error, "Content observer failed");
            entry.content = LoadState::Failed(error.clone());
            let detached = entry.observer.take();
            (
                IndexedEvent::LoadFailed {
                    reference: entry.reference.clone(),
                    index,
                    error,
                },
                detached,
            )
        };
        if let Some(observer) = detached {
            observer.query.remove_observer(observer.handle);
        }
        self.notify(&notification);
    }

    fn notify(&self, event: &IndexedEvent) {
        let delegate = self
            .delegate
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(delegate) = delegate {
            dispatch_indexed_event(delegate.as_ref(), event);
        }
    }

    fn content_callback(self: &Arc<Self>, token: u64) -> EventCallback {
        let inner = Arc::downgrade(self);
        Arc::new(move |object: Record, _preceding_key: Option<String>| {
            if let Some(inner) = inner.upgrade() {
                inner.deliver(Delivery::Content { token, object });
            }
        })
    }

    fn content_failure_callback(self: &Arc<Self>, token: u64) -> CancelCallback {
        let inner = Arc::downgrade(self);
        Arc::new(move |error: QueryError| {
            if let Some(inner) = inner.upgrade() {
                inner.deliver(Delivery::ContentFailed { token, error });
            }
        })
    }
}

impl Drop for IndexedInner {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        for observer in state.detach_all() {
            observer.query.remove_observer(observer.handle);
        }
    }
}

/// Records ordered by an index query, with content looked up per key in a
/// data query.
///
/// Structural notifications (`did_*_reference`) and content notifications
/// (`did_load_object`, `did_fail_load`) arrive independently; an entry may be
/// listed long before its content resolves.
#[derive(Clone)]
pub struct IndexedArray {
    inner: Arc<IndexedInner>,
}

impl IndexedArray {
    pub fn new(index: Arc<dyn ObservableQuery>, data: Arc<dyn ObservableQuery>) -> Self {
        Self::with_config(index, data, SyncConfig::default())
    }

    pub fn with_config(
        index: Arc<dyn ObservableQuery>,
        data: Arc<dyn ObservableQuery>,
        config: SyncConfig,
    ) -> Self {
        let inner = Arc::new(IndexedInner {
            index: OrderedArray::with_config(index, config),
            data,
            state: RwLock::new(IndexedState {
                entries: Vec::new(),
                phase: Phase::Idle,
                next_token: 0,
            }),
            delegate: RwLock::new(None),
            queue: SerialQueue::new(),
        });
        inner.index.set_delegate(Some(Arc::new(IndexBridge {
            inner: Arc::downgrade(&inner),
        })));
        Self { inner }
    }

    pub fn set_delegate(&self, delegate: Option<Arc<dyn IndexedArrayDelegate>>) {
        *self
            .inner
            .delegate
            .write()
            .unwrap_or_else(PoisonError::into_inner) = delegate;
    }

    /// Replace the delegate with a channel and return its receiving end.
    pub fn event_stream(&self) -> UnboundedReceiverStream<IndexedEvent> {
        let (sender, stream) = event_channel();
        self.set_delegate(Some(sender));
        stream
    }

    /// Start observing the index query. No-op while already observing.
    pub fn observe_query(&self) -> Result<()> {
        {
            let mut state = self.inner.write_state();
            match &state.phase {
                Phase::Observing => return Ok(()),
                Phase::Cancelled(error) => {
                    return Err(SyncError::Terminated {
                        source: error.clone(),
                    });
                }
                Phase::Idle | Phase::Stopped => {}
            }
            state.phase = Phase::Observing;
        }
        debug!("Observing index query");
        self.inner.index.start()
    }

    /// Stop observing the index and tear down every content observer.
    ///
    /// References and loaded contents stay readable.
    pub fn invalidate(&self) {
        self.inner.index.stop();
        let detached = {
            let mut state = self.inner.write_state();
            if !matches!(state.phase, Phase::Observing) {
                return;
            }
            state.phase = Phase::Stopped;
            state.detach_all()
        };
        debug!(content_observers = detached.len(), "Invalidating indexed array");
        for observer in detached {
            observer.query.remove_observer(observer.handle);
        }
    }

    pub fn is_observing(&self) -> bool {
        matches!(self.inner.read_state().phase, Phase::Observing)
    }

    /// The index query error that terminated this array, if any.
    pub fn cancellation(&self) -> Option<QueryError> {
        match &self.inner.read_state().phase {
            Phase::Cancelled(error) => Some(error.clone()),
            _ => None,
        }
    }

    pub fn count(&self) -> usize {
        self.inner.read_state().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    fn with_entry<R>(&self, index: usize, read: impl FnOnce(&Entry) -> R) -> R {
        let len = {
            let state = self.inner.read_state();
            if let Some(entry) = state.entries.get(index) {
                return read(entry);
            }
            state.entries.len()
        };
        panic!("index {index} out of bounds for indexed array of length {len}");
    }

    /// Loaded content at `index`, or `None` while pending or after a failure.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    pub fn item(&self, index: usize) -> Option<Record> {
        self.with_entry(index, |entry| match &entry.content {
            LoadState::Loaded(object) => Some(object.clone()),
            LoadState::Pending | LoadState::Failed(_) => None,
        })
    }

    /// The index record at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    pub fn reference(&self, index: usize) -> Record {
        self.with_entry(index, |entry| entry.reference.clone())
    }

    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    pub fn load_state(&self, index: usize) -> LoadState {
        self.with_entry(index, |entry| entry.content.clone())
    }

    pub fn references(&self) -> Vec<Record> {
        self.inner
            .read_state()
            .entries
            .iter()
            .map(|entry| entry.reference.clone())
            .collect()
    }

    /// Loaded contents aligned with the references.
    pub fn items(&self) -> Vec<Option<Record>> {
        self.inner
            .read_state()
            .entries
            .iter()
            .map(|entry| match &entry.content {
                LoadState::Loaded(object) => Some(object.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn index_for_key(&self, key: &str) -> Result<Option<usize>> {
        if key.is_empty() {
            return Err(SyncError::InvalidKey);
        }
        Ok(self
            .inner
            .read_state()
            .entries
            .iter()
            .position(|entry| entry.reference.key == key))
    }
}

impl fmt::Debug for IndexedArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.read_state();
        let loaded = state
            .entries
            .iter()
            .filter(|entry| matches!(entry.content, LoadState::Loaded(_)))
            .count();
        f.debug_struct("IndexedArray")
            .field("count", &state.entries.len())
            .field("loaded", &loaded)
            .field("observing", &matches!(state.phase, Phase::Observing))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeQuery, Recorder};
    use serde_json::json;

    fn reference(key: &str) -> Record {
        Record::new(key, json!(true))
    }

    fn content(key: &str) -> Record {
        Record::new(key, json!({ "title": key.to_uppercase() }))
    }

    struct Fixture {
        index: Arc<FakeQuery>,
        data: Arc<FakeQuery>,
        array: IndexedArray,
        recorder: Arc<Recorder<IndexedEvent>>,
    }

    fn fixture(keys: &[&str]) -> Fixture {
        let index = FakeQuery::with_children("index", keys.iter().map(|k| reference(k)).collect());
        let data = FakeQuery::new("data");
        let array = IndexedArray::new(index.clone(), data.clone());
        let recorder = Recorder::new();
        array.set_delegate(Some(recorder.clone()));
        Fixture {
            index,
            data,
            array,
            recorder,
        }
    }

    fn loaded_count(events: &[IndexedEvent]) -> usize {
        events
            .iter()
            .filter(|event| matches!(event, IndexedEvent::Loaded { .. }))
            .count()
    }

    #[test]
    fn references_follow_index_and_content_loads_lazily() {
        let f = fixture(&["a", "b"]);
        f.data.child_query("a").set_value(content("a").value);
        f.array.observe_query().unwrap();

        assert_eq!(f.array.count(), 2);
        assert_eq!(f.array.item(0), Some(content("a")));
        assert_eq!(f.array.item(1), None);
        assert_eq!(f.array.load_state(1), LoadState::Pending);

        f.data.child_query("b").set_value(content("b").value);
        assert_eq!(f.array.items(), vec![Some(content("a")), Some(content("b"))]);
        assert_eq!(
            f.recorder.events().last(),
            Some(&IndexedEvent::Loaded {
                reference: reference("b"),
                object: content("b"),
                index: 1,
            })
        );
    }

    #[test]
    fn reference_change_with_new_predecessor_moves_the_entry() {
        let f = fixture(&["a", "b", "c"]);
        for key in ["a", "b", "c"] {
            f.data.child_query(key).set_value(content(key).value);
        }
        f.array.observe_query().unwrap();
        f.recorder.take();

        let pinned = Record::new("a", json!({ "pinned": true }));
        f.index.change_to(pinned.clone(), Some("c"));

        assert_eq!(
            f.recorder.take(),
            vec![
                IndexedEvent::MovedReference {
                    reference: pinned.clone(),
                    from: 0,
                    to: 2,
                },
                IndexedEvent::ChangedReference {
                    reference: pinned.clone(),
                    index: 2,
                },
            ]
        );
        assert_eq!(f.array.reference(2), pinned);
        assert_eq!(f.array.item(2), Some(content("a")));
        assert_eq!(f.array.item(0), Some(content("b")));
        assert_eq!(f.array.index_for_key("a"), Ok(Some(2)));
    }

    #[test]
    fn structural_notification_precedes_content() {
        let f = fixture(&["a"]);
        f.data.child_query("a").set_value(content("a").value);
        f.array.observe_query().unwrap();

        assert_eq!(
            f.recorder.events(),
            vec![
                IndexedEvent::AddedReference {
                    reference: reference("a"),
                    index: 0,
                },
                IndexedEvent::Loaded {
                    reference: reference("a"),
                    object: content("a"),
                    index: 0,
                },
            ]
        );
    }

    #[test]
    fn failed_content_is_scoped_to_its_entry() {
        let f = fixture(&["a", "b"]);
        f.array.observe_query().unwrap();
        f.data.child_query("a").set_value(content("a").value);
        let error = QueryError::permission_denied("data/b");
        f.data.child_query("b").cancel(error.clone());

        assert_eq!(f.array.item(0), Some(content("a")));
        assert_eq!(f.array.item(1), None);
        assert_eq!(f.array.load_state(1), LoadState::Failed(error.clone()));

        let events = f.recorder.events();
        let failures: Vec<_> = events
            .iter()
            .filter(|event| matches!(event, IndexedEvent::LoadFailed { .. }))
            .collect();
        assert_eq!(
            failures,
            vec![&IndexedEvent::LoadFailed {
                reference: reference("b"),
                index: 1,
                error,
            }]
        );
        assert!(
            !events
                .iter()
                .any(|event| matches!(event, IndexedEvent::QueryCancelled { .. }))
        );
        assert!(f.array.is_observing());

        // Siblings stay live
        f.data.child_query("a").set_value(json!({"title": "A2"}));
        assert_eq!(f.array.item(0), Some(Record::new("a", json!({"title": "A2"}))));
    }

    #[test]
    fn removed_reference_tears_down_its_content_observer() {
        let f = fixture(&["a", "b"]);
        f.array.observe_query().unwrap();
        assert_eq!(f.data.child_query("a").observer_count(), 1);

        f.index.remove("a");
        assert_eq!(f.data.child_query("a").observer_count(), 0);
        assert_eq!(f.array.references(), vec![reference("b")]);

        f.recorder.take();
        f.data.child_query("a").set_value(content("a").value);
        assert!(f.recorder.is_empty());
    }

    #[test]
    fn moved_reference_keeps_content_and_reports_current_index() {
        let f = fixture(&["a", "b", "c"]);
        f.array.observe_query().unwrap();
        f.data.child_query("a").set_value(content("a").value);

        f.index.move_after("a", Some("c"));
        assert_eq!(
            f.array.references(),
            vec![reference("b"), reference("c"), reference("a")]
        );
        assert_eq!(f.array.item(2), Some(content("a")));

        f.recorder.take();
        f.data.child_query("a").set_value(json!("later"));
        assert_eq!(
            f.recorder.events(),
            vec![IndexedEvent::Loaded {
                reference: reference("a"),
                object: Record::new("a", json!("later")),
                index: 2,
            }]
        );
    }

    #[test]
    fn stale_content_from_a_retired_observer_is_discarded() {
        let index = FakeQuery::with_children("index", vec![reference("a")]);
        let data = FakeQuery::misbehaving("data", Vec::new());
        let array = IndexedArray::new(index.clone(), data.clone());
        let recorder = Recorder::new();
        array.set_delegate(Some(recorder.clone()));
        array.observe_query().unwrap();

        // Re-adding the key issues a second observer; the first one never goes away
        index.remove("a");
        index.push(reference("a"));
        assert_eq!(data.child_query("a").observer_count(), 2);

        recorder.take();
        data.child_query("a").set_value(content("a").value);
        assert_eq!(loaded_count(&recorder.events()), 1);
    }

    #[test]
    fn index_cancellation_is_fatal_and_reported_once() {
        let f = fixture(&["a", "b"]);
        f.array.observe_query().unwrap();
        let error = QueryError::cancelled("index revoked");
        f.index.cancel(error.clone());

        let cancellations = f
            .recorder
            .events()
            .into_iter()
            .filter(|event| matches!(event, IndexedEvent::QueryCancelled { .. }))
            .count();
        assert_eq!(cancellations, 1);
        assert_eq!(f.data.child_query("a").observer_count(), 0);
        assert_eq!(f.data.child_query("b").observer_count(), 0);
        assert_eq!(f.array.cancellation(), Some(error.clone()));
        assert_eq!(
            f.array.observe_query(),
            Err(SyncError::Terminated { source: error })
        );
    }

    #[test]
    fn invalidate_keeps_state_and_suppresses_callbacks() {
        let f = fixture(&["a"]);
        f.array.observe_query().unwrap();
        f.data.child_query("a").set_value(content("a").value);

        f.array.invalidate();
        f.array.invalidate();
        assert_eq!(f.index.observer_count(), 0);
        assert_eq!(f.data.child_query("a").observer_count(), 0);
        assert_eq!(f.array.item(0), Some(content("a")));

        f.recorder.take();
        f.index.push(reference("b"));
        assert!(f.recorder.is_empty());
        assert_eq!(f.array.count(), 1);
    }

    #[test]
    fn reobserving_rebuilds_entries_without_duplicates() {
        let f = fixture(&["a", "b"]);
        f.array.observe_query().unwrap();
        f.array.invalidate();
        f.index.push(reference("c"));

        f.array.observe_query().unwrap();
        assert_eq!(
            f.array.references(),
            vec![reference("a"), reference("b"), reference("c")]
        );
        assert_eq!(f.data.child_query("a").observer_count(), 1);
    }

    #[test]
    fn index_for_key_and_bounds() {
        let f = fixture(&["a", "b"]);
        f.array.observe_query().unwrap();
        assert_eq!(f.array.index_for_key("b"), Ok(Some(1)));
        assert_eq!(f.array.index_for_key("zz"), Ok(None));
        assert_eq!(f.array.index_for_key(""), Err(SyncError::InvalidKey));
    }

    #[test]
    #[should_panic(expected = "out of bounds")]
    fn item_out_of_bounds_panics() {
        let f = fixture(&["a"]);
        f.array.observe_query().unwrap();
        f.array.item(1);
    }
}
