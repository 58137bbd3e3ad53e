//! Scriptable whole-result query
//!
//! Each listener gets the current result replayed on `listen`, with change
//! hints relative to an empty result, then one snapshot per `publish`, with
//! hints relative to the previous publication.

use firelist_api::{
    CancelCallback, DocumentChange, ListenerRegistration, QueryError, QuerySnapshot, Record,
    SnapshotCallback, SnapshotQuery,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

struct FakeListener {
    on_snapshot: SnapshotCallback,
    on_error: CancelCallback,
}

#[derive(Default)]
struct SnapshotState {
    records: Vec<Record>,
    listeners: BTreeMap<u64, FakeListener>,
    next_registration: u64,
}

pub struct FakeSnapshotQuery {
    name: String,
    state: Mutex<SnapshotState>,
}

impl FakeSnapshotQuery {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Self::with_records(name, Vec::new())
    }

    pub fn with_records(name: impl Into<String>, records: Vec<Record>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            state: Mutex::new(SnapshotState {
                records,
                ..SnapshotState::default()
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, SnapshotState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn listener_count(&self) -> usize {
        self.lock().listeners.len()
    }

    pub fn records(&self) -> Vec<Record> {
        self.lock().records.clone()
    }

    /// Replace the result and deliver it with change hints.
    pub fn publish(&self, records: Vec<Record>) {
        let changes = {
            let mut state = self.lock();
            let changes = document_changes(&state.records, &records);
            state.records = records.clone();
            changes
        };
        self.broadcast(QuerySnapshot::with_changes(records, changes));
    }

    /// Replace the result and deliver it without change hints.
    pub fn publish_without_hints(&self, records: Vec<Record>) {
        self.lock().records = records.clone();
        self.broadcast(QuerySnapshot::new(records));
    }

    /// Deliver `snapshot` verbatim; the stored result is not touched.
    pub fn publish_raw(&self, snapshot: QuerySnapshot) {
        self.broadcast(snapshot);
    }

    /// Fail every listener. Listeners are dropped before the error is delivered.
    pub fn fail(&self, error: QueryError) {
        let callbacks: Vec<CancelCallback> = {
            let mut state = self.lock();
            std::mem::take(&mut state.listeners)
                .into_values()
                .map(|listener| listener.on_error)
                .collect()
        };
        for on_error in callbacks {
            on_error(error.clone());
        }
    }

    fn broadcast(&self, snapshot: QuerySnapshot) {
        let callbacks: Vec<SnapshotCallback> = self
            .lock()
            .listeners
            .values()
            .map(|listener| Arc::clone(&listener.on_snapshot))
            .collect();
        for on_snapshot in callbacks {
            on_snapshot(snapshot.clone());
        }
    }
}

impl SnapshotQuery for FakeSnapshotQuery {
    fn listen(
        &self,
        on_snapshot: SnapshotCallback,
        on_error: CancelCallback,
    ) -> ListenerRegistration {
        let (registration, initial) = {
            let mut state = self.lock();
            let registration = ListenerRegistration(state.next_registration);
            state.next_registration += 1;
            state.listeners.insert(
                registration.0,
                FakeListener {
                    on_snapshot: Arc::clone(&on_snapshot),
                    on_error,
                },
            );
            let records = state.records.clone();
            let changes = document_changes(&[], &records);
            (registration, QuerySnapshot::with_changes(records, changes))
        };

        on_snapshot(initial);
        registration
    }

    fn remove_listener(&self, registration: ListenerRegistration) {
        self.lock().listeners.remove(&registration.0);
    }
}

/// Changes that turn `previous` into `next`: removals first (by old index),
/// then additions and modifications (by new index). Documents that only
/// shifted because of their neighbours are not reported.
fn document_changes(previous: &[Record], next: &[Record]) -> Vec<DocumentChange> {
    let old_positions: HashMap<&str, usize> = previous
        .iter()
        .enumerate()
        .map(|(index, record)| (record.key.as_str(), index))
        .collect();
    let new_keys: HashMap<&str, usize> = next
        .iter()
        .enumerate()
        .map(|(index, record)| (record.key.as_str(), index))
        .collect();

    let mut changes: Vec<DocumentChange> = previous
        .iter()
        .enumerate()
        .filter(|(_, record)| !new_keys.contains_key(record.key.as_str()))
        .map(|(index, record)| DocumentChange::removed(record.key.clone(), index))
        .collect();

    for (new_index, record) in next.iter().enumerate() {
        match old_positions.get(record.key.as_str()) {
            None => changes.push(DocumentChange::added(record.key.clone(), new_index)),
            Some(&old_index) if previous[old_index] != *record => changes.push(
                DocumentChange::modified(record.key.clone(), old_index, new_index),
            ),
            Some(_) => {}
        }
    }
    changes
}
