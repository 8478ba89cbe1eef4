//! The scheduling contract every engine implements.
//!
//! [`Scheduler`] carries the engine's notion of time. The three scheduling
//! operations come in two flavors that differ only in thread bounds:
//!
//! - [`LocalScheduler`]: single-threaded engines (trampoline,
//!   virtual-time). Actions need not be `Send`; engines of this flavor
//!   never move work off the scheduling thread.
//! - [`SharedScheduler`]: engines that dispatch to other threads (the
//!   pool). Actions and state must be `Send`.
//!
//! Every operation returns a [`CancelHandle`] immediately; the action runs
//! later, receives the engine plus its state, and returns a fresh handle
//! covering any follow-up work it scheduled itself. That return channel is
//! what lets self-rescheduling loops run without growing the call stack.

use core::fmt;

use crate::cancel::CancelHandle;
use crate::error::ScheduleError;

/// Result of a scheduling call: a cancellation handle, or a synchronous
/// range/state error raised before any side effect.
pub type ScheduleResult = Result<CancelHandle, ScheduleError>;

/// An execution engine with its own notion of current time.
pub trait Scheduler {
    /// The engine's absolute time value.
    type Instant: Copy + fmt::Debug;
    /// The engine's signed span value.
    type Delta: Copy + fmt::Debug;

    /// The engine's current time: wall-clock for real engines, the
    /// virtual clock for virtual engines.
    fn now(&self) -> Self::Instant;
}

/// Scheduling operations for single-threaded engines.
///
/// Actions run on the thread that drives the engine, so neither the state
/// nor the action needs to be `Send`.
pub trait LocalScheduler: Scheduler + Sized {
    /// Schedules `action` to run as soon as the engine's model allows.
    fn schedule<S, F>(&self, state: S, action: F) -> ScheduleResult
    where
        S: 'static,
        F: FnOnce(&Self, S) -> CancelHandle + 'static;

    /// Schedules `action` to run no earlier than `now() + delay`.
    ///
    /// # Errors
    ///
    /// [`ScheduleError::NegativeDelay`] if `delay` is negative.
    fn schedule_after<S, F>(&self, state: S, delay: Self::Delta, action: F) -> ScheduleResult
    where
        S: 'static,
        F: FnOnce(&Self, S) -> CancelHandle + 'static;

    /// Schedules `action` to run no earlier than the absolute time `due`.
    fn schedule_at<S, F>(&self, state: S, due: Self::Instant, action: F) -> ScheduleResult
    where
        S: 'static,
        F: FnOnce(&Self, S) -> CancelHandle + 'static;
}

/// Scheduling operations for engines that dispatch to other threads.
pub trait SharedScheduler: Scheduler + Sized {
    /// Schedules `action` to run on a worker as soon as possible. The
    /// action never runs synchronously on the calling thread.
    ///
    /// # Errors
    ///
    /// [`ScheduleError::Terminated`] if the engine has shut down.
    fn schedule<S, F>(&self, state: S, action: F) -> ScheduleResult
    where
        S: Send + 'static,
        F: FnOnce(&Self, S) -> CancelHandle + Send + 'static;

    /// Schedules `action` to run on a worker no earlier than
    /// `now() + delay`.
    ///
    /// # Errors
    ///
    /// [`ScheduleError::NegativeDelay`] if `delay` is negative;
    /// [`ScheduleError::Terminated`] if the engine has shut down.
    fn schedule_after<S, F>(&self, state: S, delay: Self::Delta, action: F) -> ScheduleResult
    where
        S: Send + 'static,
        F: FnOnce(&Self, S) -> CancelHandle + Send + 'static;

    /// Schedules `action` to run on a worker no earlier than the absolute
    /// time `due`.
    ///
    /// # Errors
    ///
    /// [`ScheduleError::Terminated`] if the engine has shut down.
    fn schedule_at<S, F>(&self, state: S, due: Self::Instant, action: F) -> ScheduleResult
    where
        S: Send + 'static,
        F: FnOnce(&Self, S) -> CancelHandle + Send + 'static;
}
