//! Periodic execution with non-overlapping ticks.
//!
//! Each periodic schedule re-arms itself on a fixed cadence: the tick due
//! at `t` first arms the tick due at `t + period`, then funnels
//! `state = produce(state)` through an [`AsyncLock`]. The lock is what
//! turns the cadence into the non-overlap guarantee: a tick that fires
//! while the previous one still runs queues behind it FIFO and runs
//! immediately after, so an overrunning producer delays later ticks —
//! it never skips them and never runs them concurrently.
//!
//! Cancelling the handle stops future ticks; an in-flight tick always
//! finishes. A panicking producer faults the lock, cancels the schedule,
//! and reaches the pool's fault handler.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use super::async_lock::AsyncLock;
use super::{PoolHandle, PoolTask};
use crate::cancel::CancelHandle;
use crate::time::{Time, TimeDelta};

type Producer<S> = Box<dyn FnMut(S) -> S + Send>;

struct PeriodicCell<S> {
    /// `None` only transiently while the producer holds the state.
    state: Option<S>,
    produce: Producer<S>,
}

/// Shared state of one periodic schedule.
pub(crate) struct PeriodicCore<S> {
    lock: AsyncLock,
    cell: Mutex<PeriodicCell<S>>,
    handle: CancelHandle,
    period: TimeDelta,
}

impl<S: Send + 'static> PeriodicCore<S> {
    pub(crate) fn new(state: S, period: TimeDelta, produce: Producer<S>) -> Arc<Self> {
        Arc::new(Self {
            lock: AsyncLock::new(),
            cell: Mutex::new(PeriodicCell {
                state: Some(state),
                produce,
            }),
            handle: CancelHandle::new(),
            period,
        })
    }

    /// The handle that stops future ticks.
    pub(crate) fn handle(&self) -> &CancelHandle {
        &self.handle
    }
}

/// Runs one `produce` step under the lock.
fn run_tick<S: Send + 'static>(core: &Arc<PeriodicCore<S>>) {
    let tick = Arc::clone(core);
    core.lock.wait(move || {
        if tick.handle.is_cancelled() {
            return;
        }
        let mut cell = tick.cell.lock();
        if let Some(state) = cell.state.take() {
            let next = (cell.produce)(state);
            cell.state = Some(next);
        }
    });
}

/// Registers the tick due at `due`, which will re-arm its successor
/// before running.
pub(crate) fn arm_tick<S: Send + 'static>(pool: &PoolHandle, core: &Arc<PeriodicCore<S>>, due: Time) {
    if core.handle.is_cancelled() {
        return;
    }
    let tick_core = Arc::clone(core);
    let task = PoolTask::new(
        core.handle.clone(),
        Box::new(move |pool: &PoolHandle| {
            if tick_core.lock.is_faulted() {
                // A previous producer panicked; stop re-arming.
                tick_core.handle.cancel();
                return CancelHandle::uncancellable();
            }
            let next_due = due.offset_by(tick_core.period);
            arm_tick(pool, &tick_core, next_due);
            trace!(due = %due, "periodic tick");
            run_tick(&tick_core);
            CancelHandle::uncancellable()
        }),
    );
    pool.submit_delayed(due, task);
}
