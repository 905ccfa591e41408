// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Preemption requests.
//!
//! A preemption request is a latched flag, set asynchronously (by
//! [`crate::Threads::preempt`] or by the optional tick thread) and consumed
//! at the next point where the running thread leaves the scheduler's
//! critical section. Requests arriving while the scheduler guard is held
//! are thereby deferred, never lost and never delivered inside a critical
//! section. Multiple requests before one delivery coalesce into one.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

pub(crate) struct Preempt {
    pending: AtomicBool,
    shutdown: AtomicBool,
}

impl Preempt {
    pub(crate) fn new() -> Self {
        Self {
            pending: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
        }
    }

    /// Latches a preemption request.
    pub(crate) fn request(&self) {
        self.pending.store(true, Ordering::Release);
    }

    /// Consumes the latched request, if any.
    pub(crate) fn take_pending(&self) -> bool {
        self.pending.swap(false, Ordering::AcqRel)
    }

    /// Tells the tick thread to wind down. Called when the thread system is
    /// dropped.
    pub(crate) fn shut_down(&self) {
        self.shutdown.store(true, Ordering::Release);
    }

    /// Starts a thread that latches a request every `period`, approximating
    /// a timer interrupt.
    pub(crate) fn start_ticker(this: &Arc<Self>, period: Duration) {
        let preempt = Arc::clone(this);
        let spawned = thread::Builder::new()
            .name("clotho-tick".to_string())
            .spawn(move || {
                while !preempt.shutdown.load(Ordering::Acquire) {
                    thread::sleep(period);
                    preempt.request();
                }
            });
        if let Err(e) = spawned {
            log::warn!("preemption tick thread unavailable: {e}");
        }
    }
}
