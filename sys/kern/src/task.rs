// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Thread records and the scheduler's shared state.
//!
//! [`Sched`] is the single structure protected by the scheduler mutex: the
//! thread table, the ready set, the wait-set and lock arenas, and the zombie
//! set of records awaiting destruction. Operations in `sched`, `blocking`,
//! and `sync` lock it once, mutate it, and drop the guard before any switch
//! completes.
//!
//! Queue membership is tracked in a single link arena (`links`) shared by
//! the ready set and every wait set, so moving a thread between queues is
//! O(1) and double-enqueue is caught by the queue itself.

use std::sync::Arc;

use clotho_abi::{ThreadState, Tid, INITIAL_TID};
use runq::{Links, RunQueue};

use crate::arch::{Mailbox, Wake};

/// One live thread.
pub(crate) struct Task {
    pub(crate) state: ThreadState,
    /// Threads blocked in `join` on this one.
    pub(crate) joiners: RunQueue,
    /// Park/unpark channel for this thread's execution context.
    pub(crate) mailbox: Arc<Mailbox>,
    /// Tid of the thread that last moved this one out of `Blocked`.
    pub(crate) woken_by: Tid,
    /// Exit code stamped by the exiting thread for a woken joiner to pick up
    /// when it next runs.
    pub(crate) pending_join: Option<i32>,
}

impl Task {
    pub(crate) fn new(mailbox: Arc<Mailbox>, state: ThreadState) -> Self {
        Self {
            state,
            joiners: RunQueue::new(),
            mailbox,
            woken_by: INITIAL_TID,
            pending_join: None,
        }
    }
}

/// State of one lock in the lock arena.
pub(crate) struct LockState {
    pub(crate) held: bool,
    pub(crate) holder: Option<Tid>,
    pub(crate) waiters: RunQueue,
}

/// Everything the scheduler mutex protects.
pub(crate) struct Sched {
    /// Thread table, indexed by tid. `None` slots are free for reuse.
    pub(crate) slots: Box<[Option<Task>]>,
    /// Link arena shared by `ready` and every wait set.
    pub(crate) links: Links,
    /// The ready set, in FIFO order.
    pub(crate) ready: RunQueue,
    /// Records of exited threads, detached from the table, awaiting the next
    /// zombie sweep. A record parks here because a thread cannot destroy its
    /// own context while still executing on it.
    pub(crate) zombies: Vec<Task>,
    /// Exit codes retained past record destruction, one per slot, so a late
    /// join can still observe them. Cleared when the slot is reused.
    pub(crate) exit_codes: Box<[Option<i32>]>,
    /// Wait-set arena, shared by `WaitQueue` and `Condvar` handles.
    pub(crate) waitsets: Vec<Option<RunQueue>>,
    free_waitsets: Vec<usize>,
    /// Lock arena.
    pub(crate) locks: Vec<Option<LockState>>,
    free_locks: Vec<usize>,
    /// The one Running thread.
    pub(crate) current: Tid,
}

impl Sched {
    /// Builds the table with `capacity` slots, slot 0 occupied by the
    /// initial thread in state Running.
    pub(crate) fn new(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        slots[INITIAL_TID] = Some(Task::new(
            Arc::new(Mailbox::new()),
            ThreadState::Running,
        ));
        Self {
            slots: slots.into_boxed_slice(),
            links: Links::with_capacity(capacity),
            ready: RunQueue::new(),
            zombies: Vec::new(),
            exit_codes: vec![None; capacity].into_boxed_slice(),
            waitsets: Vec::new(),
            free_waitsets: Vec::new(),
            locks: Vec::new(),
            free_locks: Vec::new(),
            current: INITIAL_TID,
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Checks whether `tid` names a live thread (its slot is occupied).
    pub(crate) fn live(&self, tid: Tid) -> bool {
        tid < self.capacity() && self.slots[tid].is_some()
    }

    /// State of `tid`, or `None` if out of range or not live.
    pub(crate) fn state_of(&self, tid: Tid) -> Option<ThreadState> {
        self.slots.get(tid)?.as_ref().map(|t| t.state)
    }

    /// The record for a tid known to be live.
    pub(crate) fn task_mut(&mut self, tid: Tid) -> &mut Task {
        self.slots[tid].as_mut().expect("no live thread in slot")
    }

    /// Lowest free slot, if any. Tids are allocated first-fit so freed ones
    /// are reused promptly.
    pub(crate) fn first_free_slot(&self) -> Option<Tid> {
        self.slots.iter().position(Option::is_none)
    }

    /// Destroys records of previously exited threads. Runs at the start of
    /// every scheduler entry, so a zombie lives only until the next thread
    /// enters the scheduler.
    pub(crate) fn sweep_zombies(&mut self) {
        if !self.zombies.is_empty() {
            log::trace!("sweeping {} zombie record(s)", self.zombies.len());
            self.zombies.clear();
        }
    }

    /// Removes killed threads from the ready set before any of them can be
    /// selected to run. Waking a joiner can itself put a killed thread back
    /// in view, so this repeats until the ready set holds no dead members.
    pub(crate) fn reap_dead_ready(&mut self) {
        loop {
            let dead: Vec<Tid> = self
                .ready
                .iter(&self.links)
                .filter(|&t| self.state_of(t) == Some(ThreadState::Exited))
                .collect();
            if dead.is_empty() {
                break;
            }
            for tid in dead {
                self.ready.remove(&mut self.links, tid);
                self.finish_dead(tid);
            }
        }
    }

    /// Retires a killed thread: frees its slot, settles its joiners, and
    /// discards its parked context. The detached record joins the zombie set
    /// so the context can finish unwinding before it is dropped.
    fn finish_dead(&mut self, tid: Tid) {
        let mut task = self.slots[tid].take().expect("reaping an empty slot");
        let code = self.exit_codes[tid].unwrap_or(0);
        while let Some(joiner) = task.joiners.pop_front(&mut self.links) {
            self.wake_joiner(joiner, code, tid);
        }
        task.mailbox.post(Wake::Discard);
        log::debug!("reaped killed thread {tid}");
        self.zombies.push(task);
    }

    /// Moves `tid` to the tail of the ready set and records who woke it.
    /// A killed thread keeps its Exited state; the next reap will catch it
    /// before it can run.
    pub(crate) fn make_ready(&mut self, tid: Tid, from: Tid) {
        let Some(task) = self.slots[tid].as_mut() else {
            debug_assert!(false, "waking tid {tid} with no record");
            return;
        };
        task.woken_by = from;
        if task.state != ThreadState::Exited {
            task.state = ThreadState::Ready;
        }
        self.ready.push_back(&mut self.links, tid);
    }

    /// Readies a joiner of an exiting thread, leaving the exit code where
    /// the joiner will look for it when it resumes.
    pub(crate) fn wake_joiner(&mut self, tid: Tid, code: i32, from: Tid) {
        if let Some(task) = self.slots[tid].as_mut() {
            task.pending_join = Some(code);
        }
        self.make_ready(tid, from);
    }

    /// Marks `next` as the Running thread and resumes its context. The
    /// caller is responsible for having removed `next` from the ready set
    /// and for dropping the scheduler guard promptly afterward.
    pub(crate) fn dispatch(&mut self, next: Tid, from: Tid) {
        self.current = next;
        let task = self.slots[next].as_mut().expect("dispatch to empty slot");
        debug_assert_ne!(task.state, ThreadState::Exited, "dispatching the dead");
        task.state = ThreadState::Running;
        log::trace!("switch {from} -> {next}");
        task.mailbox.post(Wake::Run { from });
    }

    pub(crate) fn waitset_create(&mut self) -> usize {
        match self.free_waitsets.pop() {
            Some(ws) => {
                self.waitsets[ws] = Some(RunQueue::new());
                ws
            }
            None => {
                self.waitsets.push(Some(RunQueue::new()));
                self.waitsets.len() - 1
            }
        }
    }

    /// Retires a wait set. Dropping a wait set with sleepers still on it is
    /// a caller bug; they are moved to the ready set so the link arena stays
    /// consistent.
    pub(crate) fn waitset_destroy(&mut self, ws: usize) {
        let Some(mut queue) = self.waitsets[ws].take() else {
            return;
        };
        if !queue.is_empty() {
            log::warn!("wait set {ws} destroyed with {} sleeper(s)", queue.len());
            let from = self.current;
            while let Some(tid) = queue.pop_front(&mut self.links) {
                self.make_ready(tid, from);
            }
        }
        self.free_waitsets.push(ws);
    }

    pub(crate) fn lock_create(&mut self) -> usize {
        let state = LockState {
            held: false,
            holder: None,
            waiters: RunQueue::new(),
        };
        match self.free_locks.pop() {
            Some(id) => {
                self.locks[id] = Some(state);
                id
            }
            None => {
                self.locks.push(Some(state));
                self.locks.len() - 1
            }
        }
    }

    /// Retires a lock, readying any threads still contending for it.
    pub(crate) fn lock_destroy(&mut self, id: usize) {
        let Some(mut state) = self.locks[id].take() else {
            return;
        };
        if !state.waiters.is_empty() {
            log::warn!("lock {id} destroyed with {} waiter(s)", state.waiters.len());
            let from = self.current;
            while let Some(tid) = state.waiters.pop_front(&mut self.links) {
                self.make_ready(tid, from);
            }
        }
        self.free_locks.push(id);
    }

    pub(crate) fn lock_mut(&mut self, id: usize) -> &mut LockState {
        self.locks[id].as_mut().expect("lock destroyed")
    }

    /// Releases `id` and readies the waiter at the head of its queue, if
    /// any. Exactly one waiter wakes per release; the rest keep waiting for
    /// their own turn.
    pub(crate) fn unlock_one(&mut self, id: usize, from: Tid) {
        let woken = self.locks[id]
            .as_mut()
            .expect("lock destroyed")
            .waiters
            .pop_front(&mut self.links);
        if let Some(tid) = woken {
            self.make_ready(tid, from);
        }
        let state = self.lock_mut(id);
        state.held = false;
        state.holder = None;
    }
}
