//! Delegate traits and the stream adapter
//!
//! Every notification has a default no-op body, so delegates implement only
//! what they render. Hosts that prefer a single tagged callback can install an
//! `EventSender` and consume the collection as a `tokio_stream::Stream`.

use firelist_api::{ArrayEvent, BatchedEvent, Diff, IndexedEvent, QueryError, Record};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

/// Receives mutations of an `OrderedArray`, synchronously and in order.
///
/// Callbacks run after the mutation is visible through the array's read
/// accessors, so delegates may read the array from inside a callback.
pub trait ArrayDelegate: Send + Sync {
    /// Fired before each group of notifications caused by one event.
    fn begin_updates(&self) {}

    /// Fired after each group of notifications caused by one event.
    fn end_updates(&self) {}

    fn did_add(&self, _record: &Record, _index: usize) {}

    fn did_change(&self, _record: &Record, _index: usize) {}

    fn did_remove(&self, _record: &Record, _index: usize) {}

    fn did_move(&self, _record: &Record, _from: usize, _to: usize) {}

    /// Terminal: the array will not deliver anything else.
    fn did_cancel(&self, _error: &QueryError) {}
}

/// Route a tagged event to the matching `ArrayDelegate` method.
pub fn dispatch_array_event(delegate: &dyn ArrayDelegate, event: &ArrayEvent) {
    match event {
        ArrayEvent::Added { record, index } => delegate.did_add(record, *index),
        ArrayEvent::Changed { record, index } => delegate.did_change(record, *index),
        ArrayEvent::Removed { record, index } => delegate.did_remove(record, *index),
        ArrayEvent::Moved { record, from, to } => delegate.did_move(record, *from, *to),
        ArrayEvent::Cancelled { error } => delegate.did_cancel(error),
    }
}

/// Receives structural and content notifications of an `IndexedArray`.
pub trait IndexedArrayDelegate: Send + Sync {
    fn did_add_reference(&self, _reference: &Record, _index: usize) {}

    fn did_change_reference(&self, _reference: &Record, _index: usize) {}

    fn did_remove_reference(&self, _reference: &Record, _index: usize) {}

    fn did_move_reference(&self, _reference: &Record, _from: usize, _to: usize) {}

    /// Content for the reference at `index` arrived (or changed).
    fn did_load_object(&self, _reference: &Record, _object: &Record, _index: usize) {}

    /// Content for the reference at `index` could not be observed; siblings are unaffected.
    fn did_fail_load(&self, _reference: &Record, _index: usize, _error: &QueryError) {}

    /// The index query failed; the collection is dead.
    fn query_cancelled(&self, _error: &QueryError) {}
}

pub fn dispatch_indexed_event(delegate: &dyn IndexedArrayDelegate, event: &IndexedEvent) {
    match event {
        IndexedEvent::AddedReference { reference, index } => {
            delegate.did_add_reference(reference, *index)
        }
        IndexedEvent::ChangedReference { reference, index } => {
            delegate.did_change_reference(reference, *index)
        }
        IndexedEvent::RemovedReference { reference, index } => {
            delegate.did_remove_reference(reference, *index)
        }
        IndexedEvent::MovedReference {
            reference,
            from,
            to,
        } => delegate.did_move_reference(reference, *from, *to),
        IndexedEvent::Loaded {
            reference,
            object,
            index,
        } => delegate.did_load_object(reference, object, *index),
        IndexedEvent::LoadFailed {
            reference,
            index,
            error,
        } => delegate.did_fail_load(reference, *index, error),
        IndexedEvent::QueryCancelled { error } => delegate.query_cancelled(error),
    }
}

/// Receives one consolidated diff per snapshot of a `BatchedArray`.
pub trait BatchedArrayDelegate: Send + Sync {
    fn did_update(&self, _diff: &Diff<Record>) {}

    /// The bound query failed; replace it with `BatchedArray::set_query` to resume.
    fn query_did_fail(&self, _error: &QueryError) {}
}

pub fn dispatch_batched_event(delegate: &dyn BatchedArrayDelegate, event: &BatchedEvent) {
    match event {
        BatchedEvent::Updated(diff) => delegate.did_update(diff),
        BatchedEvent::QueryFailed(error) => delegate.query_did_fail(error),
    }
}

/// Anything that accepts tagged collection events.
///
/// Every sink of `ArrayEvent`, `IndexedEvent` or `BatchedEvent` is a delegate
/// of the matching collection.
pub trait EventSink<E>: Send + Sync {
    fn push(&self, event: E);
}

/// Forwards delegate notifications as tagged events into an unbounded channel.
///
/// Sending never blocks; once the receiving stream is dropped, events are
/// discarded.
pub struct EventSender<E> {
    tx: mpsc::UnboundedSender<E>,
}

/// Create a sender/stream pair for one delegate slot.
pub fn event_channel<E>() -> (Arc<EventSender<E>>, UnboundedReceiverStream<E>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        Arc::new(EventSender { tx }),
        UnboundedReceiverStream::new(rx),
    )
}

impl<E: Send> EventSink<E> for EventSender<E> {
    fn push(&self, event: E) {
        // Receiver gone means nobody is listening anymore
        let _ = self.tx.send(event);
    }
}

impl<S: EventSink<ArrayEvent>> ArrayDelegate for S {
    fn did_add(&self, record: &Record, index: usize) {
        self.push(ArrayEvent::Added {
            record: record.clone(),
            index,
        });
    }

    fn did_change(&self, record: &Record, index: usize) {
        self.push(ArrayEvent::Changed {
            record: record.clone(),
            index,
        });
    }

    fn did_remove(&self, record: &Record, index: usize) {
        self.push(ArrayEvent::Removed {
            record: record.clone(),
            index,
        });
    }

    fn did_move(&self, record: &Record, from: usize, to: usize) {
        self.push(ArrayEvent::Moved {
            record: record.clone(),
            from,
            to,
        });
    }

    fn did_cancel(&self, error: &QueryError) {
        self.push(ArrayEvent::Cancelled {
            error: error.clone(),
        });
    }
}

impl<S: EventSink<IndexedEvent>> IndexedArrayDelegate for S {
    fn did_add_reference(&self, reference: &Record, index: usize) {
        self.push(IndexedEvent::AddedReference {
            reference: reference.clone(),
            index,
        });
    }

    fn did_change_reference(&self, reference: &Record, index: usize) {
        self.push(IndexedEvent::ChangedReference {
            reference: reference.clone(),
            index,
        });
    }

    fn did_remove_reference(&self, reference: &Record, index: usize) {
        self.push(IndexedEvent::RemovedReference {
            reference: reference.clone(),
            index,
        });
    }

    fn did_move_reference(&self, reference: &Record, from: usize, to: usize) {
        self.push(IndexedEvent::MovedReference {
            reference: reference.clone(),
            from,
            to,
        });
    }

    fn did_load_object(&self, reference: &Record, object: &Record, index: usize) {
        self.push(IndexedEvent::Loaded {
            reference: reference.clone(),
            object: object.clone(),
            index,
        });
    }

    fn did_fail_load(&self, reference: &Record, index: usize, error: &QueryError) {
        self.push(IndexedEvent::LoadFailed {
            reference: reference.clone(),
            index,
            error: error.clone(),
        });
    }

    fn query_cancelled(&self, error: &QueryError) {
        self.push(IndexedEvent::QueryCancelled {
            error: error.clone(),
        });
    }
}

impl<S: EventSink<BatchedEvent>> BatchedArrayDelegate for S {
    fn did_update(&self, diff: &Diff<Record>) {
        self.push(BatchedEvent::Updated(diff.clone()));
    }

    fn query_did_fail(&self, error: &QueryError) {
        self.push(BatchedEvent::QueryFailed(error.clone()));
    }
}
