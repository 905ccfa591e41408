// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! clotho: a user-level thread system with cooperative switching, voluntary
//! blocking, deferred preemption, and blocking synchronization primitives.
//!
//! A [`Threads`] instance owns a fixed-capacity table of threads. The
//! calling thread is adopted as thread 0 at initialization; further threads
//! are created with [`Threads::create`], whose closure's return value is the
//! thread's exit code:
//!
//! ```
//! use clotho::Threads;
//!
//! let threads = Threads::new();
//! let worker = threads.create(|| 7).unwrap();
//! assert_eq!(threads.join(worker).unwrap(), 7);
//! ```
//!
//! Design principles, in the order we apply them:
//!
//! 1. Exactly one thread runs at a time. Switches are explicit handoffs
//!    (`yield_to`, `sleep`, `join`, lock contention) or preemptions
//!    delivered at well-defined points; there is no time-sliced parallelism
//!    among the threads of one system.
//!
//! 2. All scheduler state lives behind one lock, and holding its guard *is*
//!    the critical section. Preemption requests latched while a guard is
//!    live are deferred until it drops, so no operation is ever torn.
//!
//! 3. Errors are values. Every fallible operation returns
//!    [`Result`](clotho_abi::Result); nothing is delivered asynchronously.
//!
//! 4. A dead thread stays dead. Killing a thread marks it Exited in place;
//!    the reaper removes it from the ready set before it could ever be
//!    selected, so a killed thread never executes another instruction of
//!    application code.
//!
//! The execution-context mechanism (how a "switch" actually suspends one
//! stack and resumes another) is confined to the `arch` module; the
//! scheduler logic above it is mechanism-agnostic.

mod arch;
pub mod blocking;
mod preempt;
pub mod sched;
pub mod sync;
mod task;

pub use clotho_abi::{Result, Target, ThreadError, ThreadState, Tid, INITIAL_TID};

pub use crate::blocking::WaitQueue;
pub use crate::sched::{Config, Threads};
pub use crate::sync::{Condvar, Lock};
