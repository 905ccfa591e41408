// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Shared vocabulary for the clotho thread system, used by the scheduler and
//! by application code alike: thread identifiers, thread states, switch
//! targets, and the error taxonomy.

use thiserror::Error;

/// Names a thread slot. A `Tid` is a small integer, unique among live
/// threads, and is the index of the thread's slot in the scheduler's thread
/// table. Once its owning thread has exited, a `Tid` is eligible for reuse
/// by a later create; holders of stale tids get [`ThreadError::InvalidTarget`]
/// (or, within the retention window, the dead thread's exit code from join).
pub type Tid = usize;

/// The tid of the thread that initialized the thread system. Slot 0 is
/// always assigned to it.
pub const INITIAL_TID: Tid = 0;

/// Scheduling state of one thread.
///
/// Exactly one thread is `Running` at any observable instant. Transitions
/// happen only inside the scheduler's critical section:
///
/// ```text
///            create             scheduled
///    (none) ───────► Ready ◄──────────────► Running
///                      ▲                       │
///                      │ wakeup                │ sleep / contend / cv-wait
///                      └──────── Blocked ◄─────┘
///
///    any state ──kill──► Exited (in place)
///    Running ──exit────► Exited (zombie set)
///    Exited ──reaped───► (record destroyed)
/// ```
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ThreadState {
    /// Eligible to run; a member of the ready set.
    Ready,
    /// Currently executing. Not a member of any queue.
    Running,
    /// Suspended on some wait set.
    Blocked,
    /// Terminated, voluntarily or by kill. Will never execute application
    /// code again; its record is destroyed by a later zombie sweep.
    Exited,
}

/// Selects the thread to switch to in a yield.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Target {
    /// Keep running the calling thread; the yield returns its own tid
    /// without a switch.
    Current,
    /// Switch to the head of the ready set, whichever thread that is.
    Any,
    /// Switch to one particular thread, which must be live, distinct from
    /// the caller, and a member of the ready set.
    Specific(Tid),
}

/// Everything that can go wrong at the scheduler interface.
///
/// These are all returned as `Result` values; the scheduler never delivers
/// errors asynchronously and never retries on the caller's behalf. Note
/// that `NoCandidate` is a legitimate empty-result signal rather than a
/// failure: it tells the caller there was nothing to switch to.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Error)]
pub enum ThreadError {
    /// A stack or execution context could not be allocated.
    #[error("out of memory for thread stack or context")]
    OutOfMemory,
    /// Every slot in the thread table is occupied by a live thread.
    #[error("thread table is full")]
    ResourceExhausted,
    /// The designated tid is out of range, not currently live, or is the
    /// caller itself in an operation that forbids self-targeting.
    #[error("invalid target thread")]
    InvalidTarget,
    /// A handle passed to the scheduler does not belong to it.
    #[error("invalid argument")]
    InvalidArgument,
    /// The ready set is empty, so there is no thread to switch to.
    #[error("no ready thread available")]
    NoCandidate,
}

/// Shorthand used throughout the thread system.
pub type Result<T> = core::result::Result<T, ThreadError>;
