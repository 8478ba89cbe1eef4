//! Deterministic engine driven by an explicitly advanced virtual clock.
//!
//! Nothing here runs until the caller says so: `start` drains the queue to
//! exhaustion, `advance_to`/`advance_by` drain up to a target instant, and
//! `sleep` moves the clock without draining at all. Time-dependent
//! behavior can therefore be replayed exactly, with no real delays and no
//! dependence on the host clock.
//!
//! # Invariants
//!
//! - The clock never moves backward. A rewinding `advance_to` fails and
//!   leaves the clock unchanged.
//! - Items run in (due, sequence) order: stable FIFO among items whose due
//!   times compare equal under the active comparer.
//! - Drain passes never nest. `advance_to`/`advance_by` from inside a
//!   running action fail with a state error.
//! - A panicking action unwinds out of the draining call; the running flag
//!   resets and undrained items stay queued, so the engine remains usable.

use std::cell::{Cell, RefCell};
use std::cmp::Ordering;
use std::fmt;
use std::rc::Rc;

use tracing::trace;

use crate::cancel::CancelHandle;
use crate::error::ScheduleError;
use crate::queue::{Comparer, ScheduleQueue};
use crate::scheduler::{LocalScheduler, ScheduleResult, Scheduler};
use crate::time::{natural_order, VirtualInstant};

/// Resets the running flag on scope exit, including unwinds.
struct RunGuard<'a>(&'a Cell<bool>);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

/// The deterministic virtual-time scheduler.
///
/// Generic over the clock value `V`; `u64` ticks work out of the box, and
/// [`ReplayScheduler`](crate::replay::ReplayScheduler) instantiates this
/// engine over real timestamps.
///
/// The engine is single-threaded by construction (interior mutability via
/// `Cell`/`RefCell` makes it `!Sync`); all queue mutation happens on the
/// driving thread.
pub struct VirtualTimeScheduler<V: VirtualInstant> {
    queue: RefCell<ScheduleQueue<Self, V>>,
    comparer: Comparer<V>,
    clock: Cell<V>,
    enabled: Cell<bool>,
}

impl<V: VirtualInstant> VirtualTimeScheduler<V> {
    /// Creates a scheduler with the clock at the minimum sentinel.
    #[must_use]
    pub fn new() -> Self {
        Self::starting_at(V::ORIGIN)
    }

    /// Creates a scheduler with the clock at `start`.
    #[must_use]
    pub fn starting_at(start: V) -> Self {
        Self::with_parts(start, Rc::new(natural_order))
    }

    /// Creates a scheduler ordering due times with `comparer` instead of
    /// the natural order. The sequence tie-break still applies: items
    /// whose due times compare equal run in registration order.
    #[must_use]
    pub fn with_comparer<F>(start: V, comparer: F) -> Self
    where
        F: Fn(&V, &V) -> Ordering + 'static,
    {
        Self::with_parts(start, Rc::new(comparer))
    }

    fn with_parts(start: V, comparer: Comparer<V>) -> Self {
        Self {
            queue: RefCell::new(ScheduleQueue::with_comparer(Rc::clone(&comparer))),
            comparer,
            clock: Cell::new(start),
            enabled: Cell::new(false),
        }
    }

    /// The current virtual clock value.
    #[must_use]
    pub fn now(&self) -> V {
        self.clock.get()
    }

    /// Returns true while a drain pass (`start` or `advance_*`) is
    /// running. Visible from inside actions; becomes false immediately
    /// after an action calls [`stop`](Self::stop).
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled.get()
    }

    /// The number of items waiting in the queue, cancelled ones included.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.queue.borrow().len()
    }

    /// Drains the queue to exhaustion, moving the clock to each item's due
    /// time as it runs. A no-op when nothing is scheduled or when already
    /// running. Honors [`stop`](Self::stop) between items.
    pub fn start(&self) {
        if self.enabled.get() {
            return;
        }
        self.enabled.set(true);
        let _guard = RunGuard(&self.enabled);
        trace!("virtual drain started");
        while self.enabled.get() {
            let item = self.queue.borrow_mut().pop_next();
            let Some(item) = item else { break };
            self.lift_clock(item.due());
            let _follow_up = item.invoke(self);
        }
        trace!("virtual drain finished");
    }

    /// Stops the current drain pass. Idempotent; a no-op when stopped.
    pub fn stop(&self) {
        self.enabled.set(false);
    }

    /// Runs every item due at or before `target`, then sets the clock
    /// exactly to `target` even if nothing was due. Idempotent at the same
    /// target.
    ///
    /// # Errors
    ///
    /// [`ScheduleError::AdvanceInProgress`] when called from inside a
    /// running action; [`ScheduleError::ClockRewind`] when `target`
    /// precedes the current clock (the clock is left unchanged).
    pub fn advance_to(&self, target: V) -> Result<(), ScheduleError> {
        if self.enabled.get() {
            return Err(ScheduleError::AdvanceInProgress);
        }
        if (self.comparer)(&target, &self.clock.get()) == Ordering::Less {
            return Err(ScheduleError::ClockRewind);
        }

        self.enabled.set(true);
        {
            let _guard = RunGuard(&self.enabled);
            trace!("advancing virtual clock");
            while self.enabled.get() {
                let item = self.queue.borrow_mut().pop_due(&target);
                let Some(item) = item else { break };
                self.lift_clock(item.due());
                let _follow_up = item.invoke(self);
            }
        }
        self.clock.set(target);
        Ok(())
    }

    /// Advances the clock by `delta`, running everything due on the way:
    /// `advance_to(now() + delta)`.
    ///
    /// # Errors
    ///
    /// [`ScheduleError::AdvanceInProgress`] when called from inside a
    /// running action; [`ScheduleError::NegativeDelay`] when `delta` is
    /// negative.
    pub fn advance_by(&self, delta: V::Delta) -> Result<(), ScheduleError> {
        if self.enabled.get() {
            return Err(ScheduleError::AdvanceInProgress);
        }
        if V::delta_is_negative(&delta) {
            return Err(ScheduleError::NegativeDelay);
        }
        self.advance_to(self.clock.get().offset(delta))
    }

    /// Moves the clock forward by `delta` **without draining the queue**.
    ///
    /// Intended to be called from inside a running action to model time
    /// passing mid-action (a slow handler, say); items that fall due as a
    /// result run on the next drain pass, not here.
    ///
    /// # Errors
    ///
    /// [`ScheduleError::NegativeDelay`] when `delta` is negative.
    pub fn sleep(&self, delta: V::Delta) -> Result<(), ScheduleError> {
        if V::delta_is_negative(&delta) {
            return Err(ScheduleError::NegativeDelay);
        }
        self.clock.set(self.clock.get().offset(delta));
        Ok(())
    }

    /// Moves the clock up to `due`, never backward.
    fn lift_clock(&self, due: V) {
        if (self.comparer)(&due, &self.clock.get()) == Ordering::Greater {
            self.clock.set(due);
        }
    }
}

impl<V: VirtualInstant> Default for VirtualTimeScheduler<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: VirtualInstant> fmt::Debug for VirtualTimeScheduler<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VirtualTimeScheduler")
            .field("clock", &self.clock.get())
            .field("enabled", &self.enabled.get())
            .field("pending", &self.pending())
            .finish()
    }
}

impl<V: VirtualInstant> Scheduler for VirtualTimeScheduler<V> {
    type Instant = V;
    type Delta = V::Delta;

    fn now(&self) -> V {
        self.clock.get()
    }
}

impl<V: VirtualInstant> LocalScheduler for VirtualTimeScheduler<V> {
    fn schedule<S, F>(&self, state: S, action: F) -> ScheduleResult
    where
        S: 'static,
        F: FnOnce(&Self, S) -> CancelHandle + 'static,
    {
        self.schedule_at(state, self.clock.get(), action)
    }

    fn schedule_after<S, F>(&self, state: S, delay: V::Delta, action: F) -> ScheduleResult
    where
        S: 'static,
        F: FnOnce(&Self, S) -> CancelHandle + 'static,
    {
        if V::delta_is_negative(&delay) {
            return Err(ScheduleError::NegativeDelay);
        }
        self.schedule_at(state, self.clock.get().offset(delay), action)
    }

    fn schedule_at<S, F>(&self, state: S, due: V, action: F) -> ScheduleResult
    where
        S: 'static,
        F: FnOnce(&Self, S) -> CancelHandle + 'static,
    {
        let handle = self.queue.borrow_mut().enqueue(
            due,
            Box::new(move |scheduler: &Self| action(scheduler, state)),
        );
        Ok(handle)
    }
}
