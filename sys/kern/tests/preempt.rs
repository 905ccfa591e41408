// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Preemption delivery: requests latch, defer past critical sections, and
//! force a switch at the next boundary.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clotho::{Config, Target, Threads, WaitQueue};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[test]
fn request_is_deferred_until_a_boundary() {
    init_logging();
    let threads = Threads::new();
    let ran = Arc::new(AtomicBool::new(false));

    let worker = {
        let ran = ran.clone();
        threads
            .create(move || {
                ran.store(true, Ordering::SeqCst);
                0
            })
            .unwrap()
    };

    threads.preempt();
    // Latched but not delivered: no scheduler boundary has been crossed.
    assert!(!ran.load(Ordering::SeqCst));

    // Any operation's exit is a boundary; this wakeup finds an empty queue
    // but still delivers the pending preemption on the way out.
    let wq = WaitQueue::new(&threads);
    assert_eq!(threads.wakeup(&wq, false), 0);
    assert!(ran.load(Ordering::SeqCst));

    assert_eq!(threads.join(worker), Ok(0));
}

#[test]
fn requests_coalesce() {
    init_logging();
    let threads = Threads::new();
    let runs = Arc::new(AtomicBool::new(false));

    let worker = {
        let runs = runs.clone();
        threads
            .create(move || {
                runs.store(true, Ordering::SeqCst);
                0
            })
            .unwrap()
    };

    // Several requests, one delivery.
    threads.preempt();
    threads.preempt();
    threads.preempt();
    threads.yield_to(Target::Current).unwrap();
    assert!(runs.load(Ordering::SeqCst));

    // The latch is clear again; the join proceeds undisturbed.
    assert_eq!(threads.join(worker), Ok(0));
}

#[test]
fn tick_thread_eventually_preempts() {
    init_logging();
    let threads = Threads::with_config(Config {
        tick: Some(Duration::from_millis(5)),
        ..Config::default()
    });
    let ran = Arc::new(AtomicBool::new(false));
    let worker = {
        let ran = ran.clone();
        threads
            .create(move || {
                ran.store(true, Ordering::SeqCst);
                0
            })
            .unwrap()
    };

    let deadline = Instant::now() + Duration::from_secs(30);
    while !ran.load(Ordering::SeqCst) {
        assert!(Instant::now() < deadline, "tick never delivered a preemption");
        // Boundary crossings give the latched tick a chance to deliver.
        threads.yield_to(Target::Current).unwrap();
        std::thread::sleep(Duration::from_millis(1));
    }
    assert_eq!(threads.join(worker), Ok(0));
}
