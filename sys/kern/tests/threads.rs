// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Scheduler exercises through the public interface: create, yield, exit,
//! kill, sleep/wakeup, and join. Each test builds its own thread system and
//! the harness thread is adopted as thread 0.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use clotho::{Config, Target, ThreadError, Threads, WaitQueue, INITIAL_TID};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[test]
fn initial_thread_is_adopted_as_zero() {
    init_logging();
    let threads = Threads::new();
    assert_eq!(threads.id(), INITIAL_TID);
    assert_eq!(threads.yield_to(Target::Current), Ok(INITIAL_TID));
}

#[test]
fn yield_with_nothing_ready() {
    init_logging();
    let threads = Threads::new();
    assert_eq!(threads.yield_to(Target::Any), Err(ThreadError::NoCandidate));
    assert_eq!(
        threads.yield_to(Target::Specific(16)),
        Err(ThreadError::InvalidTarget)
    );
    assert_eq!(
        threads.yield_to(Target::Specific(0xdead_beef)),
        Err(ThreadError::InvalidTarget)
    );
    // A thread may not name itself as an explicit switch target.
    assert_eq!(
        threads.yield_to(Target::Specific(INITIAL_TID)),
        Err(ThreadError::InvalidTarget)
    );
}

#[test]
fn create_runs_and_returns() {
    init_logging();
    let threads = Threads::new();
    let events = Arc::new(Mutex::new(Vec::new()));

    let worker = {
        let events = events.clone();
        threads
            .create(move || {
                events.lock().unwrap().push("worker ran");
                0
            })
            .unwrap()
    };
    assert_eq!(worker, 1);

    assert_eq!(threads.yield_to(Target::Specific(worker)), Ok(worker));
    assert_eq!(*events.lock().unwrap(), vec!["worker ran"]);

    // The exit code is retained for exactly one join.
    assert_eq!(threads.join(worker), Ok(0));
    assert_eq!(threads.join(worker), Err(ThreadError::InvalidTarget));
}

#[test]
fn table_capacity_and_tid_reuse() {
    init_logging();
    let threads = Threads::with_config(Config {
        capacity: 4,
        ..Config::default()
    });

    assert_eq!(threads.create(|| 0), Ok(1));
    assert_eq!(threads.create(|| 0), Ok(2));
    assert_eq!(threads.create(|| 0), Ok(3));
    assert_eq!(threads.create(|| 0), Err(ThreadError::ResourceExhausted));

    // Let all three run to completion; they exit in creation order and the
    // yield comes back to us.
    assert_eq!(threads.yield_to(Target::Any), Ok(1));

    // Freed slots are reused lowest-first.
    assert_eq!(threads.create(|| 0), Ok(1));
    assert_eq!(threads.create(|| 0), Ok(2));

    // Thread 3's exit code survives until its slot is reused.
    assert_eq!(threads.join(3), Ok(0));
    assert_eq!(threads.join(3), Err(ThreadError::InvalidTarget));
}

#[test]
fn join_blocks_until_exit() {
    init_logging();
    let threads = Threads::new();
    let worker = threads.create(|| 7).unwrap();
    assert_eq!(threads.join(worker), Ok(7));
}

#[test]
fn join_after_exit_consumes_retained_code() {
    init_logging();
    let threads = Threads::new();
    let worker = threads.create(|| 9).unwrap();
    threads.yield_to(Target::Specific(worker)).unwrap();
    assert_eq!(threads.join(worker), Ok(9));
    assert_eq!(threads.join(worker), Err(ThreadError::InvalidTarget));
}

#[test]
fn join_rejects_bad_targets() {
    init_logging();
    let threads = Threads::new();
    assert_eq!(threads.join(threads.id()), Err(ThreadError::InvalidTarget));
    assert_eq!(threads.join(5), Err(ThreadError::InvalidTarget));
    assert_eq!(threads.join(100_000), Err(ThreadError::InvalidTarget));
}

#[test]
fn join_refuses_to_block_without_candidates() {
    init_logging();
    let threads = Threads::new();
    let wq = Arc::new(WaitQueue::new(&threads));

    let worker = {
        let threads = threads.clone();
        let wq = wq.clone();
        threads
            .clone()
            .create(move || {
                let _ = threads.sleep(&wq);
                0
            })
            .unwrap()
    };
    threads.yield_to(Target::Specific(worker)).unwrap();

    // The worker is blocked and the ready set is empty; joining it could
    // never finish.
    assert_eq!(threads.join(worker), Err(ThreadError::InvalidTarget));

    assert_eq!(threads.wakeup(&wq, false), 1);
    assert_eq!(threads.join(worker), Ok(0));
}

#[test]
fn kill_validates_targets() {
    init_logging();
    let threads = Threads::new();
    assert_eq!(threads.kill(threads.id()), Err(ThreadError::InvalidTarget));
    assert_eq!(threads.kill(42), Err(ThreadError::InvalidTarget));
    assert_eq!(threads.kill(100_000), Err(ThreadError::InvalidTarget));
}

#[test]
fn killed_thread_never_runs() {
    init_logging();
    let threads = Threads::new();
    let ran = Arc::new(AtomicBool::new(false));

    let victim = {
        let ran = ran.clone();
        threads
            .create(move || {
                ran.store(true, Ordering::SeqCst);
                0
            })
            .unwrap()
    };
    assert_eq!(threads.kill(victim), Ok(victim));

    // The reaper removes the victim before any selection can reach it.
    assert_eq!(threads.yield_to(Target::Any), Err(ThreadError::NoCandidate));
    assert!(!ran.load(Ordering::SeqCst));

    // A killed thread's exit code is 0.
    assert_eq!(threads.join(victim), Ok(0));
}

#[test]
fn kill_settles_only_at_the_reaper() {
    init_logging();
    let threads = Threads::new();
    let victim = threads.create(|| 0).unwrap();

    assert_eq!(threads.kill(victim), Ok(victim));
    // Still on the books until a scheduler entry reaps it; killing again is
    // accepted and changes nothing.
    assert_eq!(threads.kill(victim), Ok(victim));

    assert_eq!(threads.join(victim), Ok(0));
    // Reaped now; the tid no longer names anything.
    assert_eq!(threads.kill(victim), Err(ThreadError::InvalidTarget));
}

#[test]
fn sleep_without_candidates_fails() {
    init_logging();
    let threads = Threads::new();
    let wq = WaitQueue::new(&threads);
    assert_eq!(threads.sleep(&wq), Err(ThreadError::NoCandidate));
}

#[test]
fn foreign_handles_are_rejected() {
    init_logging();
    let threads = Threads::new();
    let other = Threads::new();
    let foreign = WaitQueue::new(&other);

    assert_eq!(threads.sleep(&foreign), Err(ThreadError::InvalidArgument));
    assert_eq!(threads.wakeup(&foreign, true), 0);
}

#[test]
fn wakeup_order_is_fifo() {
    init_logging();
    let threads = Threads::new();
    let wq = Arc::new(WaitQueue::new(&threads));
    let order = Arc::new(Mutex::new(Vec::new()));

    for _ in 0..3 {
        let threads = threads.clone();
        let wq = wq.clone();
        let order = order.clone();
        threads
            .clone()
            .create(move || {
                let waker = threads.sleep(&wq).unwrap();
                order.lock().unwrap().push((threads.id(), waker));
                0
            })
            .unwrap();
    }

    // Run until everyone is asleep.
    threads.yield_to(Target::Any).unwrap();

    // One sleeper per wakeup, head first.
    assert_eq!(threads.wakeup(&wq, false), 1);
    assert_eq!(threads.wakeup(&wq, false), 1);
    assert_eq!(threads.wakeup(&wq, false), 1);
    assert_eq!(threads.wakeup(&wq, false), 0);

    threads.yield_to(Target::Any).unwrap();
    assert_eq!(*order.lock().unwrap(), vec![(1, 0), (2, 0), (3, 0)]);
}

#[test]
fn wakeup_all_empties_the_queue() {
    init_logging();
    let threads = Threads::new();
    let wq = Arc::new(WaitQueue::new(&threads));
    let woken = Arc::new(Mutex::new(Vec::new()));

    for _ in 0..3 {
        let threads = threads.clone();
        let wq = wq.clone();
        let woken = woken.clone();
        threads
            .clone()
            .create(move || {
                threads.sleep(&wq).unwrap();
                woken.lock().unwrap().push(threads.id());
                0
            })
            .unwrap();
    }
    threads.yield_to(Target::Any).unwrap();

    assert_eq!(threads.wakeup(&wq, true), 3);
    threads.yield_to(Target::Any).unwrap();
    assert_eq!(*woken.lock().unwrap(), vec![1, 2, 3]);
}
