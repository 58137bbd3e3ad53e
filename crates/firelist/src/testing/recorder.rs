use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::core::delegate::EventSink;

/// Collects every event a collection reports, for later assertions.
///
/// A `Recorder<ArrayEvent>` is an `ArrayDelegate`, a `Recorder<IndexedEvent>`
/// an `IndexedArrayDelegate` and a `Recorder<BatchedEvent>` a
/// `BatchedArrayDelegate`.
pub struct Recorder<E> {
    events: Mutex<Vec<E>>,
}

impl<E> Recorder<E> {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            events: Mutex::new(Vec::new()),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Vec<E>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drain the recorded events.
    pub fn take(&self) -> Vec<E> {
        std::mem::take(&mut *self.lock())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl<E: Clone> Recorder<E> {
    pub fn events(&self) -> Vec<E> {
        self.lock().clone()
    }
}

impl<E: Send> EventSink<E> for Recorder<E> {
    fn push(&self, event: E) {
        self.lock().push(event);
    }
}
