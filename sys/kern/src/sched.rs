// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Scheduler core: system bring-up, the switch protocol, and the
//! create/yield/exit/kill operations.
//!
//! All scheduling decisions happen with the scheduler mutex held; the guard
//! doubles as the critical-section token, so releasing it on every path out
//! of an operation is what re-enables preemption. The switch protocol is
//! the one delicate piece: the switching thread picks a successor, posts its
//! wakeup, drops the guard, and only then parks. Because the wakeup is
//! posted before the guard is dropped, the successor can never miss it.

use std::panic::{catch_unwind, panic_any, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use clotho_abi::{Result, Target, ThreadError, ThreadState, Tid, INITIAL_TID};

use crate::arch::{self, Mailbox, Retired, Wake};
use crate::preempt::Preempt;
use crate::task::{Sched, Task};

/// Sizing and timing knobs for a thread system.
#[derive(Clone, Debug)]
pub struct Config {
    /// Number of slots in the thread table, including slot 0 for the
    /// initial thread. Bounds how many threads can be live at once.
    pub capacity: usize,
    /// Stack size for each created thread's context, in bytes.
    pub stack_size: usize,
    /// If set, a tick thread latches a preemption request every `tick`,
    /// approximating a timer interrupt. If `None`, preemption happens only
    /// on explicit [`Threads::preempt`] calls.
    pub tick: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            capacity: 256,
            stack_size: 64 * 1024,
            tick: None,
        }
    }
}

pub(crate) struct Shared {
    pub(crate) sched: Mutex<Sched>,
    pub(crate) stack_size: usize,
    pub(crate) preempt: Arc<Preempt>,
}

impl Drop for Shared {
    fn drop(&mut self) {
        self.preempt.shut_down();
    }
}

/// Handle to a thread system.
///
/// Cloning is cheap and shares the underlying scheduler; a handle is
/// typically cloned into each created thread's entry closure so the thread
/// can call scheduler operations itself.
///
/// Operations that name the calling thread (`yield_to`, `sleep`, `join`,
/// and the rest) must be called from the initial thread or from a thread
/// this system created. Calling them from a foreign OS thread panics.
#[derive(Clone)]
pub struct Threads {
    pub(crate) shared: Arc<Shared>,
}

impl Threads {
    /// Initializes a thread system with default [`Config`], adopting the
    /// calling thread as tid 0.
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    /// Initializes a thread system, adopting the calling thread as tid 0.
    /// The adopted thread starts Running and participates in scheduling
    /// like any other.
    pub fn with_config(config: Config) -> Self {
        assert!(config.capacity >= 1, "capacity must cover the initial thread");
        arch::silence_retirement_unwinds();
        let preempt = Arc::new(Preempt::new());
        if let Some(period) = config.tick {
            Preempt::start_ticker(&preempt, period);
        }
        arch::set_current_thread(INITIAL_TID);
        log::debug!(
            "thread system up: capacity {}, stack {} bytes",
            config.capacity,
            config.stack_size
        );
        Self {
            shared: Arc::new(Shared {
                sched: Mutex::new(Sched::new(config.capacity)),
                stack_size: config.stack_size,
                preempt,
            }),
        }
    }

    /// The calling thread's tid.
    ///
    /// # Panics
    ///
    /// If called from a thread the system does not manage.
    pub fn id(&self) -> Tid {
        self.me()
    }

    /// Creates a thread that will run `entry` when first scheduled. The
    /// closure's return value is the thread's exit code, exactly as if it
    /// had called [`Threads::exit`] with it.
    ///
    /// The new thread goes to the tail of the ready set; the caller keeps
    /// running. Fails with `ResourceExhausted` when the table is full and
    /// `OutOfMemory` when a stack cannot be allocated.
    pub fn create<F>(&self, entry: F) -> Result<Tid>
    where
        F: FnOnce() -> i32 + Send + 'static,
    {
        let mut g = self.enter();
        let Some(tid) = g.first_free_slot() else {
            return Err(ThreadError::ResourceExhausted);
        };
        let mailbox = Arc::new(Mailbox::new());
        g.slots[tid] = Some(Task::new(mailbox.clone(), ThreadState::Ready));
        g.exit_codes[tid] = None;

        let sys = self.clone();
        let spawned = arch::spawn_context(tid, self.shared.stack_size, move || {
            trampoline(sys, tid, mailbox, entry)
        });
        if let Err(e) = spawned {
            g.slots[tid] = None;
            log::warn!("context allocation for thread {tid} failed: {e}");
            return Err(ThreadError::OutOfMemory);
        }

        let s = &mut *g;
        s.ready.push_back(&mut s.links, tid);
        log::trace!("created thread {tid}");
        drop(g);
        self.preempt_point();
        Ok(tid)
    }

    /// Yields the processor according to `target`; see [`Target`]. Returns
    /// the tid that was selected to run, chosen at call time.
    ///
    /// On `Target::Any` with an empty ready set this returns `NoCandidate`
    /// and the caller keeps running. A `Target::Specific` thread must be
    /// live, Ready, and not the caller, else `InvalidTarget`.
    pub fn yield_to(&self, target: Target) -> Result<Tid> {
        let me = self.me();
        let mut g = self.enter();
        debug_assert_eq!(g.current, me);

        let next = match target {
            Target::Current => {
                drop(g);
                self.preempt_point();
                return Ok(me);
            }
            Target::Any => match g.ready.peek() {
                Some(next) => next,
                None => return Err(ThreadError::NoCandidate),
            },
            Target::Specific(tid) => {
                if tid == me || g.state_of(tid) != Some(ThreadState::Ready) {
                    return Err(ThreadError::InvalidTarget);
                }
                tid
            }
        };

        let s = &mut *g;
        s.ready.remove(&mut s.links, next);
        s.task_mut(me).state = ThreadState::Ready;
        s.ready.push_back(&mut s.links, me);
        let g = self.switch_and_park(g, me, next);
        drop(g);
        self.preempt_point();
        Ok(next)
    }

    /// Terminates the calling thread with `code`, waking its joiners, and
    /// switches to the head of the ready set. If nothing remains to run and
    /// nothing is waiting on this thread, the process exits with `code`.
    pub fn exit(&self, code: i32) -> ! {
        let me = self.me();
        self.finish_current(code);
        self.never_resume(me)
    }

    /// Terminates thread `tid`. The target is marked Exited where it stands
    /// (Ready, Blocked, or already Exited) and will never execute again; its
    /// record is freed when the reaper next encounters it in the ready set.
    /// A killed thread's exit code is 0. Self-kill is rejected; use
    /// [`Threads::exit`].
    pub fn kill(&self, tid: Tid) -> Result<Tid> {
        let me = self.me();
        let mut g = self.sched();
        if tid == me || !g.live(tid) {
            return Err(ThreadError::InvalidTarget);
        }
        let task = g.task_mut(tid);
        if task.state != ThreadState::Exited {
            task.state = ThreadState::Exited;
            g.exit_codes[tid] = Some(0);
            log::debug!("thread {tid} killed by {me}");
        }
        drop(g);
        self.preempt_point();
        Ok(tid)
    }

    /// Latches a preemption request against the running thread. The request
    /// is delivered when that thread next leaves a scheduler critical
    /// section, at which point it yields as if by `yield_to(Target::Any)`.
    /// Safe to call from any OS thread, including a foreign one.
    pub fn preempt(&self) {
        self.shared.preempt.request();
    }

    /// Delivery point for latched preemption requests. Runs after the
    /// scheduler guard has been dropped at the end of every operation.
    pub(crate) fn preempt_point(&self) {
        if !self.shared.preempt.take_pending() {
            return;
        }
        if arch::current_thread().is_none() {
            // Latched from a foreign thread with no one to preempt here;
            // leave delivery to the managed threads.
            self.shared.preempt.request();
            return;
        }
        log::trace!("delivering preemption to thread {}", self.me());
        let _ = self.yield_to(Target::Any);
    }

    /// Locks the scheduler. Also the critical-section entry: while the
    /// guard lives, no switch can complete and no preemption is delivered.
    pub(crate) fn sched(&self) -> MutexGuard<'_, Sched> {
        self.shared
            .sched
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Locks the scheduler and settles deferred cleanup: destroys zombie
    /// records and reaps killed threads out of the ready set.
    pub(crate) fn enter(&self) -> MutexGuard<'_, Sched> {
        let mut g = self.sched();
        g.sweep_zombies();
        g.reap_dead_ready();
        g
    }

    pub(crate) fn me(&self) -> Tid {
        arch::current_thread().expect("not called from a thread-system thread")
    }

    pub(crate) fn owns(&self, other: &Threads) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    /// Hands the processor to `next` and parks until the caller is
    /// dispatched again. Returns holding a fresh scheduler guard, with
    /// zombies from the interim already swept.
    ///
    /// The caller must already have arranged its own state and queue
    /// membership (Ready in the ready set, or Blocked in a wait set).
    pub(crate) fn switch_and_park<'g>(
        &'g self,
        mut g: MutexGuard<'g, Sched>,
        me: Tid,
        next: Tid,
    ) -> MutexGuard<'g, Sched> {
        let mailbox = g.task_mut(me).mailbox.clone();
        g.dispatch(next, me);
        drop(g);
        match mailbox.recv() {
            Wake::Run { .. } => {
                let mut g = self.sched();
                g.sweep_zombies();
                g
            }
            // Killed while parked. Unwind without resuming the operation.
            Wake::Discard => self.never_resume(me),
        }
    }

    /// Blocks the calling thread on a wait set chosen by `enqueue`, if a
    /// switch is possible. Returns `(guard, true)` after the thread is
    /// woken and dispatched again, or `(guard, false)` without blocking when
    /// the ready set is empty (blocking would deadlock the system).
    pub(crate) fn block_current<'g>(
        &'g self,
        mut g: MutexGuard<'g, Sched>,
        me: Tid,
        enqueue: impl FnOnce(&mut Sched, Tid),
    ) -> (MutexGuard<'g, Sched>, bool) {
        g.reap_dead_ready();
        if g.ready.is_empty() {
            return (g, false);
        }
        g.task_mut(me).state = ThreadState::Blocked;
        enqueue(&mut g, me);
        let s = &mut *g;
        let next = s
            .ready
            .pop_front(&mut s.links)
            .expect("ready set emptied while scheduler locked");
        let g = self.switch_and_park(g, me, next);
        (g, true)
    }

    /// Retires the calling thread with `code`: frees its slot, settles
    /// joiners, and hands off to the next ready thread. Ends the process
    /// when the calling thread is the last schedulable work. Returns after
    /// the handoff; the caller must not touch scheduler state again.
    pub(crate) fn finish_current(&self, code: i32) {
        let me = self.me();
        let mut g = self.enter();
        let no_joiners = g.task_mut(me).joiners.is_empty();
        if g.ready.is_empty() && no_joiners {
            log::debug!("last thread {me} exiting; ending process with code {code}");
            drop(g);
            std::process::exit(code);
        }

        let mut task = g.slots[me].take().expect("exiting thread has no slot");
        task.state = ThreadState::Exited;
        g.exit_codes[me] = Some(code);
        while let Some(joiner) = task.joiners.pop_front(&mut g.links) {
            g.wake_joiner(joiner, code, me);
        }
        g.zombies.push(task);
        log::trace!("thread {me} exited with code {code}");

        // Waking a joiner that was itself killed can leave dead threads in
        // the ready set; clear them before picking a successor.
        g.reap_dead_ready();
        let next = {
            let s = &mut *g;
            s.ready.pop_front(&mut s.links)
        };
        match next {
            Some(next) => g.dispatch(next, me),
            None => {
                drop(g);
                std::process::exit(code);
            }
        }
    }

    /// Parks a retired context forever (the initial thread, whose OS thread
    /// cannot be unwound) or peels it off its stack (everyone else).
    fn never_resume(&self, me: Tid) -> ! {
        if me == INITIAL_TID {
            loop {
                thread::park();
            }
        }
        panic_any(Retired)
    }
}

impl Default for Threads {
    fn default() -> Self {
        Self::new()
    }
}

/// First code to run on a fresh context: parks until first dispatch, runs
/// the entry closure, and retires the thread with its return value. A panic
/// in the closure is logged and treated as an exit with code 0; a `Retired`
/// unwind means `exit` already retired the thread.
fn trampoline<F>(sys: Threads, tid: Tid, mailbox: Arc<Mailbox>, entry: F)
where
    F: FnOnce() -> i32,
{
    arch::set_current_thread(tid);
    match mailbox.recv() {
        // Killed before first run; the reaper already did the bookkeeping.
        Wake::Discard => return,
        Wake::Run { .. } => {}
    }
    sys.preempt_point();
    match catch_unwind(AssertUnwindSafe(entry)) {
        Ok(code) => sys.finish_current(code),
        Err(payload) => {
            if payload.downcast_ref::<Retired>().is_none() {
                log::error!("thread {tid} panicked; retiring it with exit code 0");
                sys.finish_current(0);
            }
        }
    }
}
