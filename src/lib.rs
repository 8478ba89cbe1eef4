//! Cadenza: interchangeable execution engines for reactive pipelines.
//!
//! # Overview
//!
//! A scheduler decides *when* and *on what execution context* a unit of
//! work runs, and hands back an idempotent cancellation handle for every
//! scheduled unit of work. Cadenza provides a family of engines behind one
//! contract, so timing-sensitive pipeline code can run on real threads in
//! production and on a deterministic virtual clock under test without
//! changing shape.
//!
//! # Core Guarantees
//!
//! - **Exactly-once cancellation**: every handle is idempotent; cancelling
//!   before the due time means the action never runs, cancelling after it
//!   ran is a silent no-op
//! - **Stable ordering**: items execute in (due time, sequence) order —
//!   FIFO among equal due times, under the default or a custom comparer
//! - **Monotonic virtual clocks**: a virtual engine's clock never moves
//!   backward; rewinds fail without side effects
//! - **Reentrancy without recursion**: self-rescheduling chains drain
//!   iteratively; the call stack never grows with chain length
//! - **Periodic non-overlap**: periodic ticks for one handle never run
//!   concurrently; an overrunning tick delays its successor, never drops it
//!
//! # Module Structure
//!
//! - [`scheduler`]: the contract (current time + the three scheduling
//!   operations, in local and `Send` flavors)
//! - [`cancel`]: cancellation handles
//! - [`time`]: `Time`, `TimeDelta`, and the pluggable `VirtualInstant`
//! - [`trampoline`]: single-threaded cooperative engine
//! - [`virtual_time`]: deterministic explicitly-advanced engine
//! - [`replay`]: the virtual engine over real timestamps
//! - [`pool`]: real-concurrency worker-pool engine
//! - [`error`]: synchronous scheduling errors

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]

pub mod cancel;
pub mod error;
pub mod pool;
mod queue;
pub mod replay;
pub mod scheduler;
pub mod time;
pub mod trampoline;
pub mod virtual_time;

// Re-exports for convenient access to core types
pub use cancel::CancelHandle;
pub use error::{ScheduleError, ScheduleErrorKind};
pub use pool::{ActionPanic, PoolHandle, PoolOptions, PoolScheduler};
pub use replay::ReplayScheduler;
pub use scheduler::{LocalScheduler, ScheduleResult, Scheduler, SharedScheduler};
pub use time::{Time, TimeDelta, VirtualInstant};
pub use trampoline::Trampoline;
pub use virtual_time::VirtualTimeScheduler;
