//! Queue-draining mutual exclusion for periodic ticks.
//!
//! Unlike a blocking mutex, an [`AsyncLock`] never parks a waiter: a
//! caller enqueues its action and returns immediately unless it was first
//! in, in which case it becomes the drainer and runs queued actions FIFO
//! until the queue empties. Admission order is therefore strictly
//! first-come-first-served, with no spinning and no blocked worker
//! threads.
//!
//! A panic inside an action permanently faults the lock: the remaining
//! queue is discarded and later actions are dropped on arrival. The panic
//! itself keeps unwinding to the caller (for pool workers, into the fault
//! handler).

use std::collections::VecDeque;

use parking_lot::Mutex;

type QueuedAction = Box<dyn FnOnce() + Send>;

struct LockState {
    queue: VecDeque<QueuedAction>,
    draining: bool,
    faulted: bool,
}

/// Non-reentrant asynchronous mutual exclusion.
pub(crate) struct AsyncLock {
    state: Mutex<LockState>,
}

/// Marks the lock faulted if an action unwinds out of the drain loop.
struct FaultGuard<'a> {
    lock: &'a AsyncLock,
    armed: bool,
}

impl Drop for FaultGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let mut state = self.lock.state.lock();
            state.faulted = true;
            state.draining = false;
            state.queue.clear();
        }
    }
}

impl AsyncLock {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(LockState {
                queue: VecDeque::new(),
                draining: false,
                faulted: false,
            }),
        }
    }

    /// Returns true once an action has panicked inside the lock.
    pub(crate) fn is_faulted(&self) -> bool {
        self.state.lock().faulted
    }

    /// Runs `action` under the lock, FIFO with respect to every other
    /// `wait` call.
    ///
    /// If the lock is free, `action` runs on the calling thread before
    /// this returns, along with anything enqueued meanwhile. If another
    /// thread holds the lock, `action` is queued for that thread's drain
    /// loop and this returns immediately.
    pub(crate) fn wait<F>(&self, action: F)
    where
        F: FnOnce() + Send + 'static,
    {
        {
            let mut state = self.state.lock();
            if state.faulted {
                return;
            }
            state.queue.push_back(Box::new(action));
            if state.draining {
                return;
            }
            state.draining = true;
        }

        loop {
            let next = {
                let mut state = self.state.lock();
                match state.queue.pop_front() {
                    Some(action) => action,
                    None => {
                        state.draining = false;
                        return;
                    }
                }
            };

            let mut guard = FaultGuard {
                lock: self,
                armed: true,
            };
            next();
            guard.armed = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::{catch_unwind, AssertUnwindSafe};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{mpsc, Arc};
    use std::time::Duration;

    #[test]
    fn uncontended_action_runs_inline() {
        let lock = AsyncLock::new();
        let ran = Arc::new(AtomicU32::new(0));
        let counted = Arc::clone(&ran);
        lock.wait(move || {
            counted.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn contended_action_is_deferred_to_the_drainer() {
        let lock = Arc::new(AsyncLock::new());
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();

        let drainer = {
            let lock = Arc::clone(&lock);
            let order = Arc::clone(&order);
            std::thread::spawn(move || {
                lock.wait(move || {
                    entered_tx.send(()).expect("signal entry");
                    release_rx.recv().expect("wait for release");
                    order.lock().push("first");
                });
            })
        };

        entered_rx.recv().expect("drainer entered");

        // The lock is held: this call must enqueue and return immediately.
        let started = std::time::Instant::now();
        {
            let order = Arc::clone(&order);
            lock.wait(move || order.lock().push("second"));
        }
        assert!(
            started.elapsed() < Duration::from_millis(100),
            "waiter blocked instead of enqueueing"
        );
        assert!(order.lock().is_empty());

        release_tx.send(()).expect("release drainer");
        drainer.join().expect("drainer panicked");

        assert_eq!(*order.lock(), vec!["first", "second"]);
    }

    #[test]
    fn admission_is_fifo() {
        let lock = Arc::new(AsyncLock::new());
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();

        let drainer = {
            let lock = Arc::clone(&lock);
            std::thread::spawn(move || {
                lock.wait(move || {
                    entered_tx.send(()).expect("signal entry");
                    release_rx.recv().expect("wait for release");
                });
            })
        };
        entered_rx.recv().expect("drainer entered");

        for tag in 0..5u32 {
            let order = Arc::clone(&order);
            lock.wait(move || order.lock().push(tag));
        }

        release_tx.send(()).expect("release drainer");
        drainer.join().expect("drainer panicked");
        assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn panic_faults_the_lock_and_discards_later_actions() {
        let lock = AsyncLock::new();
        let result = catch_unwind(AssertUnwindSafe(|| {
            lock.wait(|| panic!("tick failed"));
        }));
        assert!(result.is_err());
        assert!(lock.is_faulted());

        let ran = Arc::new(AtomicU32::new(0));
        let counted = Arc::clone(&ran);
        lock.wait(move || {
            counted.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }
}
