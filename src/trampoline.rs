//! Single-threaded cooperative engine.
//!
//! The trampoline gives synchronous code the illusion of a run loop:
//! the first scheduling call on a thread activates a per-thread queue and
//! drains it iteratively; scheduling calls made from inside a running
//! action merely enqueue. A chain of actions that each schedule "the next"
//! therefore runs as a flat loop on the calling thread, with no call-stack
//! growth however long the chain gets.
//!
//! The queue is owned by the thread and reachable only through this API;
//! two threads never contend and never observe each other's items.
//!
//! # Faults
//!
//! A panicking action unwinds out of the call that activated the
//! trampoline. The remaining queued items are discarded and the trampoline
//! deactivates, so the thread can schedule again afterwards.

use std::cell::RefCell;
use std::thread;
use std::time::Duration;

use tracing::trace;

use crate::cancel::CancelHandle;
use crate::error::ScheduleError;
use crate::queue::{Action, ScheduleQueue};
use crate::scheduler::{LocalScheduler, ScheduleResult, Scheduler};
use crate::time::{Time, TimeDelta};

thread_local! {
    static QUEUE: RefCell<Option<ScheduleQueue<Trampoline, Time>>> =
        const { RefCell::new(None) };
}

/// The single-threaded cooperative scheduler.
///
/// `Trampoline` is a zero-sized access point to the calling thread's
/// queue; constructing one allocates nothing. The queue itself is created
/// lazily by the first scheduling call on the thread and torn down when it
/// drains empty (or when an action panics).
#[derive(Clone, Copy, Debug, Default)]
pub struct Trampoline;

/// Clears the thread's queue on scope exit, including unwinds: a fault
/// discards the not-yet-run remainder and deactivates the trampoline.
struct ActiveGuard;

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        QUEUE.with(|slot| *slot.borrow_mut() = None);
    }
}

impl Trampoline {
    /// Creates an access point to the calling thread's trampoline.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Returns true when no trampoline is active on the calling thread,
    /// i.e. the next scheduling call will activate one and drain it.
    #[must_use]
    pub fn is_schedule_required() -> bool {
        QUEUE.with(|slot| slot.borrow().is_none())
    }

    /// Runs `body` inside the calling thread's trampoline.
    ///
    /// If a trampoline is already active, `body` runs directly; otherwise
    /// it is scheduled, which activates the trampoline and drains it (so
    /// follow-up work `body` schedules still runs before this returns).
    ///
    /// # Errors
    ///
    /// Currently infallible; the `Result` mirrors the scheduling contract.
    pub fn ensure<F>(body: F) -> ScheduleResult
    where
        F: FnOnce(&Self) -> CancelHandle + 'static,
    {
        if Self::is_schedule_required() {
            Self.schedule((), |scheduler, ()| body(scheduler))
        } else {
            Ok(body(&Self))
        }
    }

    /// Enqueues an item; if this call activated the trampoline, drains the
    /// queue before returning.
    fn submit(self, due: Time, action: Action<Self>) -> CancelHandle {
        let (handle, activated) = QUEUE.with(|slot| {
            let mut slot = slot.borrow_mut();
            if let Some(queue) = slot.as_mut() {
                (queue.enqueue(due, action), false)
            } else {
                let mut queue = ScheduleQueue::new();
                let handle = queue.enqueue(due, action);
                *slot = Some(queue);
                (handle, true)
            }
        });

        if activated {
            trace!("trampoline activated");
            let _guard = ActiveGuard;
            Self::drain();
            trace!("trampoline drained");
        }
        handle
    }

    /// Pops and runs items until the queue is empty. Items due in the
    /// future block the calling thread until due.
    fn drain() {
        loop {
            let item = QUEUE.with(|slot| {
                slot.borrow_mut().as_mut().and_then(ScheduleQueue::pop_next)
            });
            let Some(item) = item else { break };

            let due = item.due();
            let now = Time::wall();
            if due > now {
                thread::sleep(Duration::from_nanos(due.duration_since(now)));
            }
            let _follow_up = item.invoke(&Self);
        }
    }
}

impl Scheduler for Trampoline {
    type Instant = Time;
    type Delta = TimeDelta;

    fn now(&self) -> Time {
        Time::wall()
    }
}

impl LocalScheduler for Trampoline {
    fn schedule<S, F>(&self, state: S, action: F) -> ScheduleResult
    where
        S: 'static,
        F: FnOnce(&Self, S) -> CancelHandle + 'static,
    {
        Ok(self.submit(
            Time::wall(),
            Box::new(move |scheduler: &Self| action(scheduler, state)),
        ))
    }

    fn schedule_after<S, F>(&self, state: S, delay: TimeDelta, action: F) -> ScheduleResult
    where
        S: 'static,
        F: FnOnce(&Self, S) -> CancelHandle + 'static,
    {
        if delay.is_negative() {
            return Err(ScheduleError::NegativeDelay);
        }
        Ok(self.submit(
            Time::wall().offset_by(delay),
            Box::new(move |scheduler: &Self| action(scheduler, state)),
        ))
    }

    fn schedule_at<S, F>(&self, state: S, due: Time, action: F) -> ScheduleResult
    where
        S: 'static,
        F: FnOnce(&Self, S) -> CancelHandle + 'static,
    {
        Ok(self.submit(
            due,
            Box::new(move |scheduler: &Self| action(scheduler, state)),
        ))
    }
}
