//! Real-concurrency pool scheduler.
//!
//! This engine dispatches work to actual parallel workers. It supports:
//!
//! - **Immediate and delayed dispatch**: actions are submitted to a worker
//!   pool, never run synchronously on the calling thread; delayed items
//!   are held by a timer thread until due.
//! - **Capacity management**: configurable min/max workers with lazy
//!   spawning and idle retirement.
//! - **Long-running work**: a dedicated worker thread driven by a
//!   cooperative cancel flag.
//! - **Periodic execution**: fixed-cadence ticks with a strict
//!   non-overlap guarantee.
//! - **Fault delivery**: a panicking action is routed to the pool's fault
//!   handler together with a scheduler handle, never silently swallowed.
//!
//! # Cancellation
//!
//! Cancellation is soft everywhere: a cancelled item that has not been
//! dispatched is dropped at dequeue time, and an item that already started
//! executing runs to completion.
//!
//! # Shutdown
//!
//! [`PoolScheduler::shutdown`] stops intake, discards not-yet-due delayed
//! entries, and cancels long-running flags; already-queued ready work
//! still drains. Dropping the scheduler shuts it down with a bounded wait.

mod async_lock;
mod periodic;
mod timer;

use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle as ThreadJoinHandle};
use std::time::Duration;

use crossbeam_queue::SegQueue;
use tracing::{error, trace};

use crate::cancel::CancelHandle;
use crate::error::ScheduleError;
use crate::scheduler::{ScheduleResult, Scheduler, SharedScheduler};
use crate::time::{Time, TimeDelta};

use periodic::PeriodicCore;
use timer::DelayQueue;

/// Default idle timeout before retiring excess workers.
const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(10);

/// Bounded wait applied when the scheduler is dropped.
const DROP_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// The payload of a panic that escaped a scheduled action.
pub struct ActionPanic {
    payload: Box<dyn Any + Send>,
}

impl ActionPanic {
    fn new(payload: Box<dyn Any + Send>) -> Self {
        Self { payload }
    }

    /// A best-effort rendering of the panic message.
    #[must_use]
    pub fn message(&self) -> &str {
        if let Some(s) = self.payload.downcast_ref::<&'static str>() {
            s
        } else if let Some(s) = self.payload.downcast_ref::<String>() {
            s
        } else {
            "opaque panic payload"
        }
    }

    /// Consumes the fault, returning the raw panic payload.
    #[must_use]
    pub fn into_payload(self) -> Box<dyn Any + Send> {
        self.payload
    }
}

impl fmt::Debug for ActionPanic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionPanic")
            .field("message", &self.message())
            .finish()
    }
}

/// Fault sink invoked with a scheduler handle and the escaped panic.
pub type FaultHandler = Arc<dyn Fn(&PoolHandle, ActionPanic) + Send + Sync>;

/// Configuration options for the pool scheduler.
#[derive(Clone)]
pub struct PoolOptions {
    /// Idle timeout before retiring workers above the minimum.
    pub idle_timeout: Duration,
    /// Thread name prefix for workers, the timer, and dedicated threads.
    pub thread_name_prefix: String,
    /// Sink for panics escaping scheduled actions. `None` logs them at
    /// error level.
    pub fault_handler: Option<FaultHandler>,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            thread_name_prefix: "cadenza".to_string(),
            fault_handler: None,
        }
    }
}

impl fmt::Debug for PoolOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolOptions")
            .field("idle_timeout", &self.idle_timeout)
            .field("thread_name_prefix", &self.thread_name_prefix)
            .field("fault_handler", &self.fault_handler.is_some())
            .finish()
    }
}

type TaskAction = Box<dyn FnOnce(&PoolHandle) -> CancelHandle + Send>;

/// A unit of work queued for a worker.
pub(crate) struct PoolTask {
    action: TaskAction,
    handle: CancelHandle,
}

impl PoolTask {
    pub(crate) fn new(handle: CancelHandle, action: TaskAction) -> Self {
        Self { action, handle }
    }

    pub(crate) fn handle(&self) -> &CancelHandle {
        &self.handle
    }

    fn run(self, pool: &PoolHandle) -> CancelHandle {
        (self.action)(pool)
    }
}

struct PoolInner {
    /// Minimum number of workers to keep alive.
    min_threads: usize,
    /// Maximum number of workers allowed.
    max_threads: usize,
    /// Current number of live workers.
    active_threads: AtomicUsize,
    /// Workers currently executing an action.
    busy_threads: AtomicUsize,
    /// Tasks waiting in the ready queue.
    pending_count: AtomicUsize,
    /// Counter for dedicated thread names.
    next_dedicated_id: AtomicU64,
    /// Ready queue.
    queue: SegQueue<PoolTask>,
    /// Delayed entries waiting for their due time.
    delay_queue: DelayQueue,
    /// Shutdown flag.
    shutdown: AtomicBool,
    /// Condition variable for worker parking.
    condvar: Condvar,
    /// Mutex for the condition variable.
    mutex: Mutex<()>,
    /// Idle timeout for excess workers.
    idle_timeout: Duration,
    /// Thread name prefix.
    thread_name_prefix: String,
    /// Fault sink for panicking actions.
    fault_handler: Option<FaultHandler>,
    /// Worker and timer join handles for cleanup.
    thread_handles: Mutex<Vec<ThreadJoinHandle<()>>>,
    /// Cooperative flags of long-running threads, cancelled at shutdown.
    long_running: Mutex<Vec<CancelHandle>>,
}

/// A cloneable handle to the pool; the scheduling surface handed to
/// actions.
#[derive(Clone)]
pub struct PoolHandle {
    inner: Arc<PoolInner>,
}

impl fmt::Debug for PoolHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolHandle")
            .field(
                "active_threads",
                &self.inner.active_threads.load(Ordering::Relaxed),
            )
            .field(
                "pending_tasks",
                &self.inner.pending_count.load(Ordering::Relaxed),
            )
            .finish()
    }
}

/// The pool scheduler. Owns the workers and the timer thread; dropping it
/// shuts the pool down with a bounded wait.
pub struct PoolScheduler {
    inner: Arc<PoolInner>,
}

impl fmt::Debug for PoolScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolScheduler")
            .field("min_threads", &self.inner.min_threads)
            .field("max_threads", &self.inner.max_threads)
            .field(
                "active_threads",
                &self.inner.active_threads.load(Ordering::Relaxed),
            )
            .field(
                "pending_tasks",
                &self.inner.pending_count.load(Ordering::Relaxed),
            )
            .finish()
    }
}

impl PoolScheduler {
    /// Creates a pool with the given worker limits.
    ///
    /// # Panics
    ///
    /// Panics if `max_threads` is 0.
    #[must_use]
    pub fn new(min_threads: usize, max_threads: usize) -> Self {
        Self::with_options(min_threads, max_threads, PoolOptions::default())
    }

    /// Creates a pool with custom options.
    ///
    /// # Panics
    ///
    /// Panics if `max_threads` is 0.
    #[must_use]
    pub fn with_options(min_threads: usize, max_threads: usize, options: PoolOptions) -> Self {
        assert!(max_threads > 0, "max_threads must be at least 1");
        let max_threads = max_threads.max(min_threads);

        let inner = Arc::new(PoolInner {
            min_threads,
            max_threads,
            active_threads: AtomicUsize::new(0),
            busy_threads: AtomicUsize::new(0),
            pending_count: AtomicUsize::new(0),
            next_dedicated_id: AtomicU64::new(1),
            queue: SegQueue::new(),
            delay_queue: DelayQueue::new(),
            shutdown: AtomicBool::new(false),
            condvar: Condvar::new(),
            mutex: Mutex::new(()),
            idle_timeout: options.idle_timeout,
            thread_name_prefix: options.thread_name_prefix,
            fault_handler: options.fault_handler,
            thread_handles: Mutex::new(Vec::with_capacity(max_threads + 1)),
            long_running: Mutex::new(Vec::new()),
        });

        spawn_timer_thread(&inner);
        for _ in 0..min_threads {
            spawn_worker(&inner);
        }

        Self { inner }
    }

    /// Returns a cloneable scheduling handle to this pool.
    #[must_use]
    pub fn handle(&self) -> PoolHandle {
        PoolHandle {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Schedules `action` on a worker as soon as possible.
    ///
    /// # Errors
    ///
    /// [`ScheduleError::Terminated`] if the pool has shut down.
    pub fn schedule<S, F>(&self, state: S, action: F) -> ScheduleResult
    where
        S: Send + 'static,
        F: FnOnce(&PoolHandle, S) -> CancelHandle + Send + 'static,
    {
        self.handle().schedule(state, action)
    }

    /// Schedules `action` on a worker no earlier than `now() + delay`.
    ///
    /// # Errors
    ///
    /// [`ScheduleError::NegativeDelay`] if `delay` is negative;
    /// [`ScheduleError::Terminated`] if the pool has shut down.
    pub fn schedule_after<S, F>(&self, state: S, delay: TimeDelta, action: F) -> ScheduleResult
    where
        S: Send + 'static,
        F: FnOnce(&PoolHandle, S) -> CancelHandle + Send + 'static,
    {
        self.handle().schedule_after(state, delay, action)
    }

    /// Schedules `action` on a worker no earlier than the absolute time
    /// `due`.
    ///
    /// # Errors
    ///
    /// [`ScheduleError::Terminated`] if the pool has shut down.
    pub fn schedule_at<S, F>(&self, state: S, due: Time, action: F) -> ScheduleResult
    where
        S: Send + 'static,
        F: FnOnce(&PoolHandle, S) -> CancelHandle + Send + 'static,
    {
        self.handle().schedule_at(state, due, action)
    }

    /// Runs `action` on a dedicated thread for the lifetime of the handle.
    ///
    /// See [`PoolHandle::schedule_long_running`].
    ///
    /// # Errors
    ///
    /// [`ScheduleError::Terminated`] if the pool has shut down.
    pub fn schedule_long_running<S, F>(&self, state: S, action: F) -> ScheduleResult
    where
        S: Send + 'static,
        F: FnOnce(S, &CancelHandle) + Send + 'static,
    {
        self.handle().schedule_long_running(state, action)
    }

    /// Repeatedly computes `state = produce(state)` every `period`.
    ///
    /// See [`PoolHandle::schedule_periodic`].
    ///
    /// # Errors
    ///
    /// [`ScheduleError::NegativeDelay`] if `period` is negative;
    /// [`ScheduleError::Terminated`] if the pool has shut down.
    pub fn schedule_periodic<S, F>(&self, state: S, period: TimeDelta, produce: F) -> ScheduleResult
    where
        S: Send + 'static,
        F: FnMut(S) -> S + Send + 'static,
    {
        self.handle().schedule_periodic(state, period, produce)
    }

    /// Tasks waiting in the ready queue.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.pending_count.load(Ordering::Relaxed)
    }

    /// Entries waiting for their due time.
    #[must_use]
    pub fn delayed_count(&self) -> usize {
        self.inner.delay_queue.len()
    }

    /// Live worker threads.
    #[must_use]
    pub fn active_threads(&self) -> usize {
        self.inner.active_threads.load(Ordering::Relaxed)
    }

    /// Workers currently executing an action.
    #[must_use]
    pub fn busy_threads(&self) -> usize {
        self.inner.busy_threads.load(Ordering::Relaxed)
    }

    /// Returns true once the pool has shut down.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.inner.shutdown.load(Ordering::Acquire)
    }

    /// Initiates shutdown: no new work is accepted, not-yet-due delayed
    /// entries are discarded, and long-running cancel flags are raised.
    /// Already-queued ready work still drains.
    pub fn shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::Release);
        self.inner.delay_queue.shutdown();
        {
            let mut flags = self
                .inner
                .long_running
                .lock()
                .expect("long-running registry poisoned");
            for handle in flags.drain(..) {
                handle.cancel();
            }
        }
        notify_all(&self.inner);
    }

    /// Shuts down and waits for workers and the timer to exit.
    ///
    /// Returns `true` if everything exited within `timeout`.
    pub fn shutdown_and_wait(&self, timeout: Duration) -> bool {
        self.shutdown();

        let deadline = std::time::Instant::now() + timeout;
        while self.inner.active_threads.load(Ordering::Acquire) > 0 {
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            if remaining.is_zero() {
                return false;
            }
            // Wake parked workers so they notice the shutdown flag.
            notify_all(&self.inner);
            thread::sleep(Duration::from_millis(10).min(remaining));
        }

        let mut handles = self
            .inner
            .thread_handles
            .lock()
            .expect("thread handle registry poisoned");
        for handle in handles.drain(..) {
            let _ = handle.join();
        }
        true
    }
}

impl Scheduler for PoolScheduler {
    type Instant = Time;
    type Delta = TimeDelta;

    fn now(&self) -> Time {
        Time::wall()
    }
}

impl Drop for PoolScheduler {
    fn drop(&mut self) {
        self.shutdown();
        let _ = self.shutdown_and_wait(DROP_DRAIN_TIMEOUT);
    }
}

impl PoolHandle {
    /// Runs `action` on a dedicated thread for the lifetime of the handle.
    ///
    /// The action observes the returned handle's cooperative cancel flag;
    /// it is expected to poll [`CancelHandle::is_cancelled`] and return.
    /// Intended for loops, not one-shot work — one-shot work belongs on
    /// the shared workers.
    ///
    /// # Errors
    ///
    /// [`ScheduleError::Terminated`] if the pool has shut down.
    pub fn schedule_long_running<S, F>(&self, state: S, action: F) -> ScheduleResult
    where
        S: Send + 'static,
        F: FnOnce(S, &CancelHandle) + Send + 'static,
    {
        self.check_running()?;

        let handle = CancelHandle::new();
        let worker_flag = handle.clone();
        let id = self.inner.next_dedicated_id.fetch_add(1, Ordering::Relaxed);
        let name = format!("{}-dedicated-{}", self.inner.thread_name_prefix, id);
        let inner = Arc::clone(&self.inner);

        let thread = thread::Builder::new()
            .name(name)
            .spawn(move || {
                let result = catch_unwind(AssertUnwindSafe(|| action(state, &worker_flag)));
                if let Err(payload) = result {
                    dispatch_fault(&inner, payload);
                }
            })
            .expect("failed to spawn dedicated thread");
        // The thread exits through its cooperative flag, not a join.
        drop(thread);

        self.inner
            .long_running
            .lock()
            .expect("long-running registry poisoned")
            .push(handle.clone());
        Ok(handle)
    }

    /// Repeatedly computes `state = produce(state)` every `period`, with
    /// at most one execution in flight at any time.
    ///
    /// If a tick fires while the previous one still runs, it waits its
    /// turn behind the non-reentrant lock: delayed, never dropped, never
    /// concurrent. Cancelling the returned handle stops future ticks but
    /// lets an in-flight tick finish.
    ///
    /// # Errors
    ///
    /// [`ScheduleError::NegativeDelay`] if `period` is negative;
    /// [`ScheduleError::Terminated`] if the pool has shut down.
    pub fn schedule_periodic<S, F>(&self, state: S, period: TimeDelta, produce: F) -> ScheduleResult
    where
        S: Send + 'static,
        F: FnMut(S) -> S + Send + 'static,
    {
        if period.is_negative() {
            return Err(ScheduleError::NegativeDelay);
        }
        self.check_running()?;

        let core = PeriodicCore::new(state, period, Box::new(produce));
        let handle = core.handle().clone();
        periodic::arm_tick(self, &core, Time::wall().offset_by(period));
        Ok(handle)
    }

    /// Tasks waiting in the ready queue.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.pending_count.load(Ordering::Relaxed)
    }

    /// Live worker threads.
    #[must_use]
    pub fn active_threads(&self) -> usize {
        self.inner.active_threads.load(Ordering::Relaxed)
    }

    /// Returns true once the pool has shut down.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.inner.shutdown.load(Ordering::Acquire)
    }

    fn check_running(&self) -> Result<(), ScheduleError> {
        if self.inner.shutdown.load(Ordering::Acquire) {
            return Err(ScheduleError::Terminated);
        }
        Ok(())
    }

    fn submit_ready(&self, task: PoolTask) {
        submit_ready_on_inner(&self.inner, task);
    }

    pub(crate) fn submit_delayed(&self, due: Time, task: PoolTask) {
        self.inner.delay_queue.push(due, task);
    }
}

impl Scheduler for PoolHandle {
    type Instant = Time;
    type Delta = TimeDelta;

    fn now(&self) -> Time {
        Time::wall()
    }
}

impl SharedScheduler for PoolHandle {
    fn schedule<S, F>(&self, state: S, action: F) -> ScheduleResult
    where
        S: Send + 'static,
        F: FnOnce(&Self, S) -> CancelHandle + Send + 'static,
    {
        self.check_running()?;
        let handle = CancelHandle::new();
        let task = PoolTask::new(
            handle.clone(),
            Box::new(move |pool: &Self| action(pool, state)),
        );
        self.submit_ready(task);
        Ok(handle)
    }

    fn schedule_after<S, F>(&self, state: S, delay: TimeDelta, action: F) -> ScheduleResult
    where
        S: Send + 'static,
        F: FnOnce(&Self, S) -> CancelHandle + Send + 'static,
    {
        if delay.is_negative() {
            return Err(ScheduleError::NegativeDelay);
        }
        if delay.is_zero() {
            return self.schedule(state, action);
        }
        self.schedule_at(state, Time::wall().offset_by(delay), action)
    }

    fn schedule_at<S, F>(&self, state: S, due: Time, action: F) -> ScheduleResult
    where
        S: Send + 'static,
        F: FnOnce(&Self, S) -> CancelHandle + Send + 'static,
    {
        self.check_running()?;
        if due <= Time::wall() {
            return self.schedule(state, action);
        }
        let handle = CancelHandle::new();
        let task = PoolTask::new(
            handle.clone(),
            Box::new(move |pool: &Self| action(pool, state)),
        );
        self.submit_delayed(due, task);
        Ok(handle)
    }
}

/// Spawns the timer thread that feeds due delayed entries to the workers.
fn spawn_timer_thread(inner: &Arc<PoolInner>) {
    let timer_inner = Arc::clone(inner);
    let name = format!("{}-timer", inner.thread_name_prefix);
    let handle = thread::Builder::new()
        .name(name)
        .spawn(move || {
            timer_inner
                .delay_queue
                .run(|task| submit_ready_on_inner(&timer_inner, task));
        })
        .expect("failed to spawn timer thread");
    inner
        .thread_handles
        .lock()
        .expect("thread handle registry poisoned")
        .push(handle);
}

/// Spawns a new worker thread.
fn spawn_worker(inner: &Arc<PoolInner>) {
    let worker_inner = Arc::clone(inner);
    let thread_id = inner.active_threads.fetch_add(1, Ordering::Relaxed);
    let name = format!("{}-worker-{}", inner.thread_name_prefix, thread_id);

    let handle = thread::Builder::new()
        .name(name)
        .spawn(move || {
            worker_loop(&worker_inner);
            worker_inner.active_threads.fetch_sub(1, Ordering::Relaxed);
        })
        .expect("failed to spawn worker thread");

    inner
        .thread_handles
        .lock()
        .expect("thread handle registry poisoned")
        .push(handle);
}

/// Spawns an extra worker when everyone is busy and work is waiting.
fn maybe_spawn_worker(inner: &Arc<PoolInner>) {
    let active = inner.active_threads.load(Ordering::Relaxed);
    let busy = inner.busy_threads.load(Ordering::Relaxed);
    let pending = inner.pending_count.load(Ordering::Relaxed);

    if active < inner.max_threads && busy >= active && pending > 0 {
        spawn_worker(inner);
    }
}

fn submit_ready_on_inner(inner: &Arc<PoolInner>, task: PoolTask) {
    inner.queue.push(task);
    inner.pending_count.fetch_add(1, Ordering::Relaxed);
    maybe_spawn_worker(inner);
    notify_one(inner);
}

fn notify_one(inner: &PoolInner) {
    let _guard = inner.mutex.lock().expect("pool mutex poisoned");
    inner.condvar.notify_one();
}

fn notify_all(inner: &PoolInner) {
    let _guard = inner.mutex.lock().expect("pool mutex poisoned");
    inner.condvar.notify_all();
}

/// Routes a panic payload to the fault handler, or logs it.
fn dispatch_fault(inner: &Arc<PoolInner>, payload: Box<dyn Any + Send>) {
    let fault = ActionPanic::new(payload);
    if let Some(handler) = &inner.fault_handler {
        let pool = PoolHandle {
            inner: Arc::clone(inner),
        };
        handler(&pool, fault);
    } else {
        error!(panic = %fault.message(), "scheduled action panicked");
    }
}

/// The worker loop: run ready tasks, park when idle, retire above the
/// minimum after the idle timeout.
fn worker_loop(inner: &Arc<PoolInner>) {
    let pool = PoolHandle {
        inner: Arc::clone(inner),
    };
    loop {
        if let Some(task) = inner.queue.pop() {
            inner.pending_count.fetch_sub(1, Ordering::Relaxed);
            if task.handle().is_cancelled() {
                continue;
            }
            trace!("executing pooled action");
            inner.busy_threads.fetch_add(1, Ordering::Relaxed);
            let result = catch_unwind(AssertUnwindSafe(|| task.run(&pool)));
            inner.busy_threads.fetch_sub(1, Ordering::Relaxed);
            if let Err(payload) = result {
                dispatch_fault(inner, payload);
            }
            continue;
        }

        if inner.shutdown.load(Ordering::Acquire) {
            break;
        }

        let active = inner.active_threads.load(Ordering::Relaxed);
        let guard = inner.mutex.lock().expect("pool mutex poisoned");
        // Re-check under the lock so a submit between pop and park is
        // never missed.
        if !inner.queue.is_empty() || inner.shutdown.load(Ordering::Acquire) {
            continue;
        }
        if active > inner.min_threads {
            let (guard, timeout) = inner
                .condvar
                .wait_timeout(guard, inner.idle_timeout)
                .expect("pool mutex poisoned");
            drop(guard);
            if timeout.timed_out()
                && inner.queue.is_empty()
                && !inner.shutdown.load(Ordering::Acquire)
            {
                trace!("retiring idle worker");
                break;
            }
        } else {
            let guard = inner.condvar.wait(guard).expect("pool mutex poisoned");
            drop(guard);
        }
    }
}
