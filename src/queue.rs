//! Ordered queue of scheduled items.
//!
//! The single-threaded engines share this structure: a binary heap of
//! (due, sequence, action) records ordered by an injected comparer over
//! the due times, with the monotonically increasing sequence number as the
//! ascending tie-break. Two items whose due times compare equal therefore
//! always run in registration order.
//!
//! Cancellation is lazy: a cancelled item stays in the heap and is
//! skipped and dropped when it reaches the front. The item's action is
//! additionally re-checked at invoke time, so cancelling between pop and
//! run is still honored.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::rc::Rc;

use crate::cancel::CancelHandle;
use crate::time::natural_order;

/// Comparer strategy over due times, injected at queue construction.
pub(crate) type Comparer<V> = Rc<dyn Fn(&V, &V) -> Ordering>;

/// Boxed action closing over the caller's state.
pub(crate) type Action<C> = Box<dyn FnOnce(&C) -> CancelHandle>;

/// A unit of work with a due time and a cancellation handle.
///
/// `C` is the engine type handed to the action for follow-up scheduling.
pub(crate) struct ScheduledItem<C, V> {
    due: V,
    sequence: u64,
    action: Action<C>,
    handle: CancelHandle,
    comparer: Comparer<V>,
}

impl<C, V: Copy> ScheduledItem<C, V> {
    /// The item's due time.
    pub(crate) fn due(&self) -> V {
        self.due
    }

    /// Runs the action unless the item was cancelled after being popped.
    ///
    /// Returns the handle the action produced for its own follow-up work,
    /// or an inert handle when the item was cancelled.
    pub(crate) fn invoke(self, engine: &C) -> CancelHandle {
        if self.handle.is_cancelled() {
            return CancelHandle::uncancellable();
        }
        (self.action)(engine)
    }

    fn compare(&self, other: &Self) -> Ordering {
        (self.comparer)(&self.due, &other.due).then_with(|| self.sequence.cmp(&other.sequence))
    }
}

impl<C, V: Copy> PartialEq for ScheduledItem<C, V> {
    fn eq(&self, other: &Self) -> bool {
        self.compare(other) == Ordering::Equal
    }
}

impl<C, V: Copy> Eq for ScheduledItem<C, V> {}

impl<C, V: Copy> Ord for ScheduledItem<C, V> {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering for min-heap behavior: the earliest due time,
        // lowest sequence wins.
        other.compare(self)
    }
}

impl<C, V: Copy> PartialOrd for ScheduledItem<C, V> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// The ordered queue shared by the trampoline and virtual-time engines.
pub(crate) struct ScheduleQueue<C, V> {
    heap: BinaryHeap<ScheduledItem<C, V>>,
    comparer: Comparer<V>,
    next_sequence: u64,
}

impl<C, V: Copy + Ord + 'static> ScheduleQueue<C, V> {
    /// Creates a queue ordered by the natural order of `V`.
    pub(crate) fn new() -> Self {
        Self::with_comparer(Rc::new(natural_order))
    }
}

impl<C, V: Copy> ScheduleQueue<C, V> {
    /// Creates a queue ordered by the given comparer.
    pub(crate) fn with_comparer(comparer: Comparer<V>) -> Self {
        Self {
            heap: BinaryHeap::new(),
            comparer,
            next_sequence: 0,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.heap.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Records an item and returns its cancellation handle.
    pub(crate) fn enqueue(&mut self, due: V, action: Action<C>) -> CancelHandle {
        let handle = CancelHandle::new();
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.heap.push(ScheduledItem {
            due,
            sequence,
            action,
            handle: handle.clone(),
            comparer: Rc::clone(&self.comparer),
        });
        handle
    }

    /// Pops the earliest live item, discarding cancelled ones on the way.
    pub(crate) fn pop_next(&mut self) -> Option<ScheduledItem<C, V>> {
        self.pop_eligible(None)
    }

    /// Pops the earliest live item due at or before `limit` under the
    /// queue's comparer, discarding cancelled ones on the way.
    pub(crate) fn pop_due(&mut self, limit: &V) -> Option<ScheduledItem<C, V>> {
        self.pop_eligible(Some(limit))
    }

    fn pop_eligible(&mut self, limit: Option<&V>) -> Option<ScheduledItem<C, V>> {
        loop {
            let (cancelled, within) = match self.heap.peek() {
                None => return None,
                Some(front) => (
                    front.handle.is_cancelled(),
                    limit.map_or(true, |l| (self.comparer)(&front.due, l) != Ordering::Greater),
                ),
            };
            if cancelled {
                let _ = self.heap.pop();
                continue;
            }
            if !within {
                return None;
            }
            return self.heap.pop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    fn noop() -> Action<()> {
        Box::new(|()| CancelHandle::uncancellable())
    }

    fn recorded(log: &Rc<RefCell<Vec<u64>>>, tag: u64) -> Action<()> {
        let log = Rc::clone(log);
        Box::new(move |()| {
            log.borrow_mut().push(tag);
            CancelHandle::uncancellable()
        })
    }

    #[test]
    fn earliest_due_pops_first() {
        let mut queue: ScheduleQueue<(), u64> = ScheduleQueue::new();
        queue.enqueue(30, noop());
        queue.enqueue(10, noop());
        queue.enqueue(20, noop());

        assert_eq!(queue.pop_next().map(|i| i.due()), Some(10));
        assert_eq!(queue.pop_next().map(|i| i.due()), Some(20));
        assert_eq!(queue.pop_next().map(|i| i.due()), Some(30));
        assert!(queue.pop_next().is_none());
    }

    #[test]
    fn equal_due_times_run_in_registration_order() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut queue: ScheduleQueue<(), u64> = ScheduleQueue::new();
        queue.enqueue(5, recorded(&log, 1));
        queue.enqueue(5, recorded(&log, 2));
        queue.enqueue(5, recorded(&log, 3));

        while let Some(item) = queue.pop_next() {
            item.invoke(&());
        }
        assert_eq!(*log.borrow(), vec![1, 2, 3]);
    }

    #[test]
    fn cancelled_items_are_skipped() {
        let mut queue: ScheduleQueue<(), u64> = ScheduleQueue::new();
        let first = queue.enqueue(1, noop());
        queue.enqueue(2, noop());
        first.cancel();

        assert_eq!(queue.pop_next().map(|i| i.due()), Some(2));
        assert!(queue.is_empty());
    }

    #[test]
    fn cancel_between_pop_and_invoke_suppresses_action() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut queue: ScheduleQueue<(), u64> = ScheduleQueue::new();
        let handle = queue.enqueue(1, recorded(&log, 1));

        let item = queue.pop_next().expect("item queued");
        handle.cancel();
        item.invoke(&());
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn pop_due_respects_limit() {
        let mut queue: ScheduleQueue<(), u64> = ScheduleQueue::new();
        queue.enqueue(1, noop());
        queue.enqueue(8, noop());
        queue.enqueue(9, noop());

        assert_eq!(queue.pop_due(&8).map(|i| i.due()), Some(1));
        assert_eq!(queue.pop_due(&8).map(|i| i.due()), Some(8));
        assert!(queue.pop_due(&8).is_none());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn custom_comparer_reverses_order() {
        let mut queue: ScheduleQueue<(), u64> =
            ScheduleQueue::with_comparer(Rc::new(|a: &u64, b: &u64| b.cmp(a)));
        queue.enqueue(1, noop());
        queue.enqueue(3, noop());
        queue.enqueue(2, noop());

        assert_eq!(queue.pop_next().map(|i| i.due()), Some(3));
        assert_eq!(queue.pop_next().map(|i| i.due()), Some(2));
        assert_eq!(queue.pop_next().map(|i| i.due()), Some(1));
    }

    #[test]
    fn tie_break_is_stable_under_custom_comparer() {
        // Comparer that collapses everything into one equivalence class:
        // only the sequence tie-break decides the order.
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut queue: ScheduleQueue<(), u64> =
            ScheduleQueue::with_comparer(Rc::new(|_: &u64, _: &u64| Ordering::Equal));
        queue.enqueue(9, recorded(&log, 1));
        queue.enqueue(1, recorded(&log, 2));
        queue.enqueue(5, recorded(&log, 3));

        while let Some(item) = queue.pop_next() {
            item.invoke(&());
        }
        assert_eq!(*log.borrow(), vec![1, 2, 3]);
    }
}
