//! Virtual-time engine over real calendar timestamps.
//!
//! A [`ReplayScheduler`] is the virtual-time engine instantiated with
//! [`Time`] as its clock value: schedules expressed in real timestamps can
//! be fast-forwarded deterministically, replaying hours of timer behavior
//! in microseconds of test time. The clock starts at the epoch sentinel
//! ([`Time::ZERO`]) or at a caller-supplied instant, and obeys every
//! virtual-time invariant (monotonic clock, FIFO tie-break, no nested
//! advance).

use std::time::Duration;

use crate::error::ScheduleError;
use crate::time::{Time, TimeDelta};
use crate::virtual_time::VirtualTimeScheduler;

/// The virtual-time engine running on real timestamps.
///
/// Construct with [`VirtualTimeScheduler::new`] for an epoch start,
/// [`VirtualTimeScheduler::starting_at`] for a specific start time, or
/// [`VirtualTimeScheduler::with_comparer`] for a custom due-time order.
pub type ReplayScheduler = VirtualTimeScheduler<Time>;

impl ReplayScheduler {
    /// Advances the clock by a `std::time::Duration`, running everything
    /// due on the way.
    ///
    /// # Errors
    ///
    /// [`ScheduleError::AdvanceInProgress`] when called from inside a
    /// running action.
    pub fn advance_by_duration(&self, duration: Duration) -> Result<(), ScheduleError> {
        self.advance_by(TimeDelta::from_duration(duration))
    }

    /// Moves the clock forward by a `std::time::Duration` without
    /// draining the queue.
    ///
    /// # Errors
    ///
    /// Currently infallible (a `Duration` cannot be negative); the
    /// `Result` mirrors [`VirtualTimeScheduler::sleep`].
    pub fn sleep_duration(&self, duration: Duration) -> Result<(), ScheduleError> {
        self.sleep(TimeDelta::from_duration(duration))
    }
}
