//! Delayed dispatch for the pool scheduler.
//!
//! A dedicated timer thread owns a min-heap of delayed entries and hands
//! each to the ready queue at its due time. The thread parks on a condvar
//! until the next deadline, or indefinitely when the heap is empty; new
//! entries and shutdown wake it. Cancelled entries are skipped when they
//! reach the front of the heap.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use smallvec::SmallVec;
use tracing::trace;

use super::PoolTask;
use crate::time::Time;

/// A delayed entry in the heap.
struct DelayedEntry {
    due: Time,
    /// Tie-break so entries with equal due times dispatch in submission
    /// order.
    sequence: u64,
    task: PoolTask,
}

impl PartialEq for DelayedEntry {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.sequence == other.sequence
    }
}

impl Eq for DelayedEntry {}

impl Ord for DelayedEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering for min-heap (earliest due first).
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

impl PartialOrd for DelayedEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct DelayState {
    heap: BinaryHeap<DelayedEntry>,
    next_sequence: u64,
    shutdown: bool,
}

/// Shared state between the timer thread and submitters.
pub(crate) struct DelayQueue {
    state: Mutex<DelayState>,
    condvar: Condvar,
}

impl DelayQueue {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(DelayState {
                heap: BinaryHeap::new(),
                next_sequence: 0,
                shutdown: false,
            }),
            condvar: Condvar::new(),
        }
    }

    /// Registers a task for dispatch at `due` and wakes the timer thread.
    pub(crate) fn push(&self, due: Time, task: PoolTask) {
        let mut state = self.state.lock().expect("delay queue lock poisoned");
        let sequence = state.next_sequence;
        state.next_sequence += 1;
        state.heap.push(DelayedEntry {
            due,
            sequence,
            task,
        });
        drop(state);
        self.condvar.notify_one();
    }

    /// Stops the timer thread. Entries not yet due are discarded.
    pub(crate) fn shutdown(&self) {
        let mut state = self.state.lock().expect("delay queue lock poisoned");
        state.shutdown = true;
        drop(state);
        self.condvar.notify_all();
    }

    /// The number of entries waiting for their due time.
    pub(crate) fn len(&self) -> usize {
        self.state.lock().expect("delay queue lock poisoned").heap.len()
    }

    /// The timer thread body: dispatches due entries through `submit`
    /// until shutdown.
    pub(crate) fn run<F>(&self, submit: F)
    where
        F: Fn(PoolTask),
    {
        let mut state = self.state.lock().expect("delay queue lock poisoned");
        loop {
            if state.shutdown {
                break;
            }

            let now = Time::wall();
            let mut due_batch: SmallVec<[PoolTask; 4]> = SmallVec::new();
            while state.heap.peek().is_some_and(|entry| entry.due <= now) {
                if let Some(entry) = state.heap.pop() {
                    if entry.task.handle().is_cancelled() {
                        trace!(due = %entry.due, "dropping cancelled delayed entry");
                    } else {
                        due_batch.push(entry.task);
                    }
                }
            }

            if !due_batch.is_empty() {
                // Dispatch outside the lock so submitters never contend
                // with the ready queue.
                drop(state);
                for task in due_batch {
                    submit(task);
                }
                state = self.state.lock().expect("delay queue lock poisoned");
                continue;
            }

            state = match state.heap.peek().map(|entry| entry.due) {
                Some(due) => {
                    let wait = Duration::from_nanos(due.duration_since(Time::wall()));
                    if wait.is_zero() {
                        continue;
                    }
                    self.condvar
                        .wait_timeout(state, wait)
                        .expect("delay queue lock poisoned")
                        .0
                }
                None => self
                    .condvar
                    .wait(state)
                    .expect("delay queue lock poisoned"),
            };
        }
    }
}
