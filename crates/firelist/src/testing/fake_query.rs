//! Scriptable child-event query for tests and offline development
//!
//! `FakeQuery` keeps its own ordered children and emits the events a live
//! Realtime Database location would emit for each mutation, with correct
//! preceding keys. Like the real thing, it replays existing children to every
//! new `ChildAdded` observer and the current node value to every new `Value`
//! observer, synchronously. Raw `emit` bypasses the bookkeeping for scripting
//! arbitrary sequences.

use firelist_api::{
    CancelCallback, ChildEvent, EventCallback, EventKind, ObservableQuery, ObserverHandle,
    QueryError, Record,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

struct FakeObserver {
    kind: EventKind,
    on_event: EventCallback,
    on_cancel: CancelCallback,
}

#[derive(Default)]
struct FakeQueryState {
    children: Vec<Record>,
    value: Option<serde_json::Value>,
    observers: BTreeMap<u64, FakeObserver>,
    next_handle: u64,
    child_queries: HashMap<String, Arc<FakeQuery>>,
}

pub struct FakeQuery {
    path: String,
    key: String,
    /// Keep observers after removal or cancellation, like a buggy collaborator
    misbehaving: bool,
    state: Mutex<FakeQueryState>,
}

impl FakeQuery {
    pub fn new(path: impl Into<String>) -> Arc<Self> {
        Self::with_children(path, Vec::new())
    }

    pub fn with_children(path: impl Into<String>, children: Vec<Record>) -> Arc<Self> {
        Arc::new(Self::build(path.into(), children, false))
    }

    /// A query that never drops observers, to test suppression of stray events.
    pub fn misbehaving(path: impl Into<String>, children: Vec<Record>) -> Arc<Self> {
        Arc::new(Self::build(path.into(), children, true))
    }

    fn build(path: String, children: Vec<Record>, misbehaving: bool) -> Self {
        let key = path.rsplit('/').next().unwrap_or_default().to_string();
        Self {
            path,
            key,
            misbehaving,
            state: Mutex::new(FakeQueryState {
                children,
                ..FakeQueryState::default()
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FakeQueryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn observer_count(&self) -> usize {
        self.lock().observers.len()
    }

    pub fn observer_count_for(&self, kind: EventKind) -> usize {
        self.lock()
            .observers
            .values()
            .filter(|observer| observer.kind == kind)
            .count()
    }

    pub fn children(&self) -> Vec<Record> {
        self.lock().children.clone()
    }

    pub fn child_keys(&self) -> Vec<String> {
        self.lock()
            .children
            .iter()
            .map(|record| record.key.clone())
            .collect()
    }

    /// The cached query for `key`, created on first use.
    pub fn child_query(&self, key: &str) -> Arc<FakeQuery> {
        let mut state = self.lock();
        let path = format!("{}/{}", self.path, key);
        Arc::clone(
            state
                .child_queries
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(Self::build(path, Vec::new(), self.misbehaving))),
        )
    }

    /// Insert `record` right after `preceding_key` (first for `None`).
    pub fn add(&self, record: Record, preceding_key: Option<&str>) {
        {
            let mut state = self.lock();
            let index = position_after(&state.children, preceding_key);
            state.children.insert(index, record.clone());
        }
        self.emit(ChildEvent::Added {
            record,
            preceding_key: preceding_key.map(str::to_string),
        });
    }

    /// Append `record` after the last child.
    pub fn push(&self, record: Record) {
        let last = self.lock().children.last().map(|last| last.key.clone());
        self.add(record, last.as_deref());
    }

    /// Replace the child with the same key in place.
    pub fn change(&self, record: Record) {
        let preceding_key = {
            let mut state = self.lock();
            let Some(index) = index_of(&state.children, &record.key) else {
                return;
            };
            state.children[index] = record.clone();
            predecessor(&state.children, index)
        };
        self.emit(ChildEvent::Changed {
            record,
            preceding_key,
        });
    }

    /// Replace a child and reposition it after `preceding_key`, reporting only
    /// a change event.
    pub fn change_to(&self, record: Record, preceding_key: Option<&str>) {
        {
            let mut state = self.lock();
            let Some(index) = index_of(&state.children, &record.key) else {
                return;
            };
            state.children.remove(index);
            let target = position_after(&state.children, preceding_key);
            state.children.insert(target, record.clone());
        }
        self.emit(ChildEvent::Changed {
            record,
            preceding_key: preceding_key.map(str::to_string),
        });
    }

    pub fn remove(&self, key: &str) {
        let (record, preceding_key) = {
            let mut state = self.lock();
            let Some(index) = index_of(&state.children, key) else {
                return;
            };
            let preceding_key = predecessor(&state.children, index);
            (state.children.remove(index), preceding_key)
        };
        self.emit(ChildEvent::Removed {
            record,
            preceding_key,
        });
    }

    /// Reposition the child stored under `key` after `preceding_key`.
    pub fn move_after(&self, key: &str, preceding_key: Option<&str>) {
        let record = {
            let mut state = self.lock();
            let Some(index) = index_of(&state.children, key) else {
                return;
            };
            let record = state.children.remove(index);
            let target = position_after(&state.children, preceding_key);
            state.children.insert(target, record.clone());
            record
        };
        self.emit(ChildEvent::Moved {
            record,
            preceding_key: preceding_key.map(str::to_string),
        });
    }

    /// Deliver `event` to matching observers without touching the children.
    pub fn emit(&self, event: ChildEvent) {
        let kind = event.kind();
        let preceding_key = event.preceding_key().map(str::to_string);
        let record = event.record().clone();
        for on_event in self.callbacks_for(kind) {
            on_event(record.clone(), preceding_key.clone());
        }
    }

    /// Write the node at this location and notify `Value` observers.
    pub fn set_value(&self, value: serde_json::Value) {
        self.lock().value = Some(value.clone());
        let record = Record::new(self.key.clone(), value);
        for on_event in self.callbacks_for(EventKind::Value) {
            on_event(record.clone(), None);
        }
    }

    /// Fail every observer at this location. Observers are dropped first,
    /// as a live database does.
    pub fn cancel(&self, error: QueryError) {
        let callbacks: Vec<CancelCallback> = {
            let mut state = self.lock();
            let callbacks = state
                .observers
                .values()
                .map(|observer| Arc::clone(&observer.on_cancel))
                .collect();
            if !self.misbehaving {
                state.observers.clear();
            }
            callbacks
        };
        for on_cancel in callbacks {
            on_cancel(error.clone());
        }
    }

    fn callbacks_for(&self, kind: EventKind) -> Vec<EventCallback> {
        self.lock()
            .observers
            .values()
            .filter(|observer| observer.kind == kind)
            .map(|observer| Arc::clone(&observer.on_event))
            .collect()
    }
}

impl ObservableQuery for FakeQuery {
    fn observe(
        &self,
        kind: EventKind,
        on_event: EventCallback,
        on_cancel: CancelCallback,
    ) -> ObserverHandle {
        let (handle, replay) = {
            let mut state = self.lock();
            let handle = ObserverHandle(state.next_handle);
            state.next_handle += 1;
            state.observers.insert(
                handle.0,
                FakeObserver {
                    kind,
                    on_event: Arc::clone(&on_event),
                    on_cancel,
                },
            );
            let replay: Vec<(Record, Option<String>)> = match kind {
                EventKind::ChildAdded => state
                    .children
                    .iter()
                    .enumerate()
                    .map(|(index, record)| (record.clone(), predecessor(&state.children, index)))
                    .collect(),
                EventKind::Value => state
                    .value
                    .clone()
                    .map(|value| (Record::new(self.key.clone(), value), None))
                    .into_iter()
                    .collect(),
                _ => Vec::new(),
            };
            (handle, replay)
        };

        for (record, preceding_key) in replay {
            on_event(record, preceding_key);
        }
        handle
    }

    fn remove_observer(&self, handle: ObserverHandle) {
        if !self.misbehaving {
            self.lock().observers.remove(&handle.0);
        }
    }

    fn child(&self, key: &str) -> Arc<dyn ObservableQuery> {
        self.child_query(key)
    }
}

fn index_of(children: &[Record], key: &str) -> Option<usize> {
    children.iter().position(|record| record.key == key)
}

fn predecessor(children: &[Record], index: usize) -> Option<String> {
    index
        .checked_sub(1)
        .map(|previous| children[previous].key.clone())
}

fn position_after(children: &[Record], preceding_key: Option<&str>) -> usize {
    match preceding_key {
        None => 0,
        Some(key) => index_of(children, key).map_or(children.len(), |index| index + 1),
    }
}
