//! Serial delivery of query notifications
//!
//! Query collaborators may call back from any thread, and may call back
//! re-entrantly (a delegate reacting to one event can cause the collaborator
//! to emit the next one synchronously). Each collection owns one
//! `SerialQueue`: whoever delivers while nobody is draining becomes the
//! drainer and processes everything queued, in arrival order, until the
//! queue is empty. Everybody else only enqueues. The handler for event N
//! therefore always returns before event N+1 is handled.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

pub(crate) struct SerialQueue<E> {
    state: Mutex<QueueState<E>>,
}

struct QueueState<E> {
    pending: VecDeque<E>,
    draining: bool,
}

impl<E> SerialQueue<E> {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                pending: VecDeque::new(),
                draining: false,
            }),
        }
    }

    /// Enqueue `event` and drain the queue with `handle` unless another caller
    /// is already draining it.
    pub(crate) fn dispatch(&self, event: E, mut handle: impl FnMut(E)) {
        {
            let mut state = self.lock();
            state.pending.push_back(event);
            if state.draining {
                return;
            }
            state.draining = true;
        }

        let guard = DrainGuard { queue: self };
        loop {
            // The drainer role is released under the lock that saw the queue empty
            let next = {
                let mut state = self.lock();
                let next = state.pending.pop_front();
                if next.is_none() {
                    state.draining = false;
                }
                next
            };
            match next {
                Some(event) => handle(event),
                None => {
                    std::mem::forget(guard);
                    return;
                }
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState<E>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Hands the drainer role back when a handler unwinds. Deliveries still
/// queued at that point are discarded.
struct DrainGuard<'a, E> {
    queue: &'a SerialQueue<E>,
}

impl<E> Drop for DrainGuard<'_, E> {
    fn drop(&mut self) {
        let mut state = self.queue.lock();
        state.pending.clear();
        state.draining = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn drains_in_arrival_order() {
        let queue = SerialQueue::new();
        let mut seen = Vec::new();
        queue.dispatch(1, |e| seen.push(e));
        queue.dispatch(2, |e| seen.push(e));
        assert_eq!(seen, vec![1, 2]);
    }

    #[test]
    fn reentrant_dispatch_is_queued_not_nested() {
        let queue = Arc::new(SerialQueue::new());
        let log = Arc::new(Mutex::new(Vec::new()));

        let q = Arc::clone(&queue);
        let l = Arc::clone(&log);
        queue.dispatch(0u32, move |e| {
            l.lock().unwrap().push(format!("start {e}"));
            if e < 2 {
                // Delivered from inside the handler: must run after this one finishes
                q.dispatch(e + 1, |_| panic!("nested drain"));
            }
            l.lock().unwrap().push(format!("end {e}"));
        });

        assert_eq!(
            *log.lock().unwrap(),
            vec!["start 0", "end 0", "start 1", "end 1", "start 2", "end 2"]
        );
    }

    #[test]
    fn queue_recovers_after_a_panicking_handler() {
        let queue = SerialQueue::new();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            queue.dispatch(1, |_| panic!("boom"));
        }));
        assert!(result.is_err());

        let mut seen = Vec::new();
        queue.dispatch(2, |e| seen.push(e));
        assert_eq!(seen, vec![2]);
    }
}
