// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Hosted execution-context mechanism.
//!
//! The scheduler proper is written against a tiny capability: contexts can
//! be created, parked, resumed, and discarded. Everything platform-specific
//! lives here so that the switch protocol in `sched` never touches the
//! mechanism directly.
//!
//! On a hosted target the mechanism is a dedicated OS thread per context,
//! parked on a [`Mailbox`] (a mutex/condvar pair). "Restoring" a context
//! posts a [`Wake`] message to its mailbox; "saving" is the park point in
//! the switch protocol, which returns when the message arrives. The
//! scheduler's own discipline guarantees that at most one context is
//! unparked at a time, so the OS threads underneath never actually run
//! concurrently.
//!
//! Discarding a parked context -- the fate of a thread killed while queued
//! -- posts [`Wake::Discard`]; the context then unwinds off its own stack
//! via a [`Retired`] panic payload without executing application code.

use std::cell::Cell;
use std::io;
use std::panic;
use std::sync::{Condvar, Mutex, Once, PoisonError};
use std::thread;

use clotho_abi::Tid;

/// Message delivered to a parked context.
#[derive(Debug)]
pub(crate) enum Wake {
    /// Resume execution. `from` is the tid on whose behalf the switch was
    /// performed (the yielding, exiting, or waking thread).
    Run { from: Tid },
    /// The thread was discarded while parked; unwind without resuming
    /// application code.
    Discard,
}

/// Park/unpark rendezvous for one context.
///
/// A mailbox holds at most one pending message: the scheduler never resumes
/// a context twice without it parking in between.
#[derive(Debug)]
pub(crate) struct Mailbox {
    slot: Mutex<Option<Wake>>,
    posted: Condvar,
}

impl Mailbox {
    pub(crate) fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            posted: Condvar::new(),
        }
    }

    /// Delivers `wake` to the parked (or about-to-park) context.
    pub(crate) fn post(&self, wake: Wake) {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        debug_assert!(slot.is_none(), "context resumed twice without parking");
        *slot = Some(wake);
        drop(slot);
        self.posted.notify_one();
    }

    /// Parks until a message arrives. This is the "save point": control
    /// comes back here when some later switch selects this context.
    pub(crate) fn recv(&self) -> Wake {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if let Some(wake) = slot.take() {
                return wake;
            }
            slot = self
                .posted
                .wait(slot)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

/// Allocates a fresh context with its own stack and starts `body` on it.
/// `body` is expected to park on its mailbox immediately and wait to be
/// scheduled. Spawn failure is the hosted analogue of running out of stack
/// memory.
pub(crate) fn spawn_context(
    tid: Tid,
    stack_size: usize,
    body: impl FnOnce() + Send + 'static,
) -> io::Result<()> {
    thread::Builder::new()
        .name(format!("clotho-{tid}"))
        .stack_size(stack_size)
        .spawn(body)
        .map(drop)
}

/// Unwind payload used to peel a retired thread off its own stack. Carried
/// by the `exit` path and by `Wake::Discard` handling; absorbed by the
/// trampoline, never observed by application code.
pub(crate) struct Retired;

/// Keeps the default panic hook from reporting `Retired` unwinds, which are
/// control flow rather than failures. Installed once, lazily.
pub(crate) fn silence_retirement_unwinds() {
    static INSTALL: Once = Once::new();
    INSTALL.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if info.payload().downcast_ref::<Retired>().is_none() {
                previous(info);
            }
        }));
    });
}

thread_local! {
    static CURRENT: Cell<Option<Tid>> = const { Cell::new(None) };
}

/// Binds the calling context to a tid. Called once per context, before it
/// first runs application code.
pub(crate) fn set_current_thread(tid: Tid) {
    CURRENT.with(|c| c.set(Some(tid)));
}

/// The tid bound to the calling context, or `None` on a foreign thread that
/// was never adopted by the scheduler.
pub(crate) fn current_thread() -> Option<Tid> {
    CURRENT.with(|c| c.get())
}
