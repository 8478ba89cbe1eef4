//! Virtual-Time Engine Conformance Suite
//!
//! Exercises the deterministic engine's contract end to end:
//!
//! 1. Monotonic clock across advances
//! 2. FIFO tie-break among equal due times
//! 3. Partial advance semantics (run-then-set-clock, idempotence)
//! 4. Nested advance rejection
//! 5. Cancellation before and after execution
//! 6. Stop/resume from inside actions
//! 7. Replay over real timestamps

mod common;

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use cadenza::{
    CancelHandle, LocalScheduler, ReplayScheduler, ScheduleError, Time, VirtualTimeScheduler,
};
use common::init_test_logging;

type Log = Rc<RefCell<Vec<u64>>>;

fn schedule_recording(scheduler: &VirtualTimeScheduler<u64>, log: &Log, due: u64, value: u64) {
    let log = Rc::clone(log);
    scheduler
        .schedule_at((), due, move |_, ()| {
            log.borrow_mut().push(value);
            CancelHandle::uncancellable()
        })
        .expect("schedule");
}

// ============================================================================
// Ordering
// ============================================================================

#[test]
fn registration_order_breaks_due_time_ties() {
    init_test_logging();
    let scheduler = VirtualTimeScheduler::<u64>::new();
    let log: Log = Rc::new(RefCell::new(Vec::new()));

    // Registered at virtual times 2, 3, 1, 1 in that order.
    schedule_recording(&scheduler, &log, 2, 2);
    schedule_recording(&scheduler, &log, 3, 3);
    schedule_recording(&scheduler, &log, 1, 11);
    schedule_recording(&scheduler, &log, 1, 12);

    scheduler.start();

    assert_eq!(*log.borrow(), vec![11, 12, 2, 3]);
}

#[test]
fn interleaved_registration_keeps_ties_stable() {
    init_test_logging();
    let scheduler = VirtualTimeScheduler::<u64>::new();
    let log: Log = Rc::new(RefCell::new(Vec::new()));

    schedule_recording(&scheduler, &log, 5, 51);
    schedule_recording(&scheduler, &log, 1, 1);
    schedule_recording(&scheduler, &log, 5, 52);
    schedule_recording(&scheduler, &log, 9, 9);
    schedule_recording(&scheduler, &log, 5, 53);

    scheduler.start();
    assert_eq!(*log.borrow(), vec![1, 51, 52, 53, 9]);
}

// ============================================================================
// Advance semantics
// ============================================================================

#[test]
fn advance_to_runs_due_items_and_pins_clock() {
    init_test_logging();
    let scheduler = VirtualTimeScheduler::<u64>::new();
    let log: Log = Rc::new(RefCell::new(Vec::new()));
    for due in [0, 1, 2, 10, 11] {
        schedule_recording(&scheduler, &log, due, due);
    }

    scheduler.advance_to(8).expect("advance to 8");
    assert_eq!(*log.borrow(), vec![0, 1, 2]);
    assert_eq!(scheduler.now(), 8);

    scheduler.advance_to(8).expect("repeat advance");
    assert_eq!(*log.borrow(), vec![0, 1, 2]);
    assert_eq!(scheduler.now(), 8);

    assert_eq!(scheduler.advance_to(4), Err(ScheduleError::ClockRewind));
    assert_eq!(scheduler.now(), 8);
}

#[test]
fn monotonic_clock_over_successive_advances() {
    init_test_logging();
    let scheduler = VirtualTimeScheduler::<u64>::new();
    for target in [3, 3, 7, 20, 20, 21] {
        scheduler.advance_to(target).expect("forward advance");
        assert_eq!(scheduler.now(), target);
    }
    assert_eq!(scheduler.advance_to(20), Err(ScheduleError::ClockRewind));
    assert_eq!(scheduler.now(), 21);
}

#[test]
fn advance_by_rejects_negative_and_preserves_clock() {
    init_test_logging();
    let scheduler = VirtualTimeScheduler::<u64>::new();
    scheduler.advance_by(10).expect("advance");
    assert_eq!(scheduler.advance_by(-3), Err(ScheduleError::NegativeDelay));
    assert_eq!(scheduler.now(), 10);
}

#[test]
fn nested_advance_always_fails_with_state_error() {
    init_test_logging();
    let scheduler = VirtualTimeScheduler::<u64>::new();
    let results = Rc::new(RefCell::new(Vec::new()));

    let captured = Rc::clone(&results);
    scheduler
        .schedule_at((), 1, move |scheduler, ()| {
            captured.borrow_mut().push(scheduler.advance_to(10));
            captured.borrow_mut().push(scheduler.advance_by(5));
            CancelHandle::uncancellable()
        })
        .expect("schedule");

    // Via start() as well as via advance_to(): both drain passes forbid
    // nesting.
    scheduler.start();
    assert_eq!(
        *results.borrow(),
        vec![
            Err(ScheduleError::AdvanceInProgress),
            Err(ScheduleError::AdvanceInProgress),
        ]
    );

    results.borrow_mut().clear();
    let captured = Rc::clone(&results);
    scheduler
        .schedule_at((), 2, move |scheduler, ()| {
            captured.borrow_mut().push(scheduler.advance_by(1));
            CancelHandle::uncancellable()
        })
        .expect("schedule");
    scheduler.advance_to(5).expect("outer advance");
    assert_eq!(*results.borrow(), vec![Err(ScheduleError::AdvanceInProgress)]);
}

#[test]
fn sleep_models_a_slow_handler() {
    init_test_logging();
    let scheduler = VirtualTimeScheduler::<u64>::new();
    let observed = Rc::new(RefCell::new(Vec::new()));

    let captured = Rc::clone(&observed);
    scheduler
        .schedule_at((), 10, move |scheduler, ()| {
            scheduler.sleep(25).expect("sleep");
            captured.borrow_mut().push(scheduler.now());
            CancelHandle::uncancellable()
        })
        .expect("schedule");
    let captured = Rc::clone(&observed);
    scheduler
        .schedule_at((), 20, move |scheduler, ()| {
            captured.borrow_mut().push(scheduler.now());
            CancelHandle::uncancellable()
        })
        .expect("schedule");

    scheduler.start();
    // The handler due at 20 runs after the slow one, at the slept-to
    // clock, not at its own due time.
    assert_eq!(*observed.borrow(), vec![35, 35]);
}

// ============================================================================
// Cancellation
// ============================================================================

#[test]
fn cancel_before_due_suppresses_execution() {
    init_test_logging();
    let scheduler = VirtualTimeScheduler::<u64>::new();
    let log: Log = Rc::new(RefCell::new(Vec::new()));

    schedule_recording(&scheduler, &log, 1, 1);
    let doomed = {
        let log = Rc::clone(&log);
        scheduler
            .schedule_at((), 5, move |_, ()| {
                log.borrow_mut().push(5);
                CancelHandle::uncancellable()
            })
            .expect("schedule")
    };
    schedule_recording(&scheduler, &log, 9, 9);

    scheduler.advance_to(3).expect("advance past first");
    doomed.cancel();
    scheduler.start();

    assert_eq!(*log.borrow(), vec![1, 9]);
    // Cancelling after the engine already discarded the item: silent no-op.
    doomed.cancel();
}

#[test]
fn schedule_then_cancel_inside_action_never_runs_follow_up() {
    init_test_logging();
    let scheduler = VirtualTimeScheduler::<u64>::new();
    let log: Log = Rc::new(RefCell::new(Vec::new()));

    let captured = Rc::clone(&log);
    scheduler
        .schedule((), move |scheduler, ()| {
            let inner = Rc::clone(&captured);
            let handle = scheduler
                .schedule((), move |_, ()| {
                    inner.borrow_mut().push(99);
                    CancelHandle::uncancellable()
                })
                .expect("follow-up schedule");
            // Already due "now", but cancelled before the drain reaches it.
            handle.cancel();
            captured.borrow_mut().push(1);
            handle
        })
        .expect("schedule");

    scheduler.start();
    assert_eq!(*log.borrow(), vec![1]);
}

// ============================================================================
// Stop / resume
// ============================================================================

#[test]
fn stop_is_idempotent_and_resumable() {
    init_test_logging();
    let scheduler = VirtualTimeScheduler::<u64>::new();
    let log: Log = Rc::new(RefCell::new(Vec::new()));

    let captured = Rc::clone(&log);
    scheduler
        .schedule_at((), 1, move |scheduler, ()| {
            scheduler.stop();
            scheduler.stop();
            captured.borrow_mut().push(1);
            CancelHandle::uncancellable()
        })
        .expect("schedule");
    schedule_recording(&scheduler, &log, 2, 2);

    scheduler.start();
    assert_eq!(*log.borrow(), vec![1]);
    assert!(!scheduler.is_enabled());

    scheduler.start();
    assert_eq!(*log.borrow(), vec![1, 2]);
}

// ============================================================================
// Replay over real timestamps
// ============================================================================

#[test]
fn replay_scheduler_fast_forwards_timestamped_work() {
    init_test_logging();
    let start = Time::from_secs(1_000_000);
    let scheduler = ReplayScheduler::starting_at(start);
    let log = Rc::new(RefCell::new(Vec::new()));

    for minutes in [30u64, 10, 20] {
        let log = Rc::clone(&log);
        scheduler
            .schedule_at((), start + Duration::from_secs(minutes * 60), move |_, ()| {
                log.borrow_mut().push(minutes);
                CancelHandle::uncancellable()
            })
            .expect("schedule");
    }

    scheduler
        .advance_by_duration(Duration::from_secs(25 * 60))
        .expect("advance 25 minutes");
    assert_eq!(*log.borrow(), vec![10, 20]);

    scheduler
        .advance_by_duration(Duration::from_secs(10 * 60))
        .expect("advance 10 more");
    assert_eq!(*log.borrow(), vec![10, 20, 30]);
    assert_eq!(scheduler.now(), start + Duration::from_secs(35 * 60));
}
