//! Scheduling error types.
//!
//! All scheduling errors are raised synchronously at the call that
//! received the bad input, before any side effect: a failed call never
//! enqueues an item, never moves a clock, and never spawns a thread.
//!
//! Panics escaping a scheduled *action* are deliberately not represented
//! here. For the single-threaded engines they unwind out of the call that
//! was draining the queue (with the engine's invariants restored by drop
//! guards); the pool scheduler routes them to its fault handler instead,
//! since the original caller has typically already returned.

use thiserror::Error;

/// Broad classification of a [`ScheduleError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScheduleErrorKind {
    /// An out-of-range input: negative delay, or a clock rewind.
    Range,
    /// An operation invalid in the engine's current state.
    State,
}

/// An error raised synchronously by a scheduling call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ScheduleError {
    /// A relative due time or period was negative.
    #[error("relative due time is negative")]
    NegativeDelay,

    /// An `advance_to` target preceded the current virtual clock. The
    /// clock is left unchanged.
    #[error("advance target precedes the current virtual clock")]
    ClockRewind,

    /// `advance_to`/`advance_by` was called while a drain pass was already
    /// running. Nesting is forbidden.
    #[error("advance re-entered while a drain pass is running")]
    AdvanceInProgress,

    /// The scheduler has been shut down and accepts no further work.
    #[error("scheduler has been shut down")]
    Terminated,
}

impl ScheduleError {
    /// Returns the broad classification of this error.
    #[must_use]
    pub const fn kind(&self) -> ScheduleErrorKind {
        match self {
            Self::NegativeDelay | Self::ClockRewind => ScheduleErrorKind::Range,
            Self::AdvanceInProgress | Self::Terminated => ScheduleErrorKind::State,
        }
    }
}
