// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Voluntary blocking: explicit wait sets, sleep/wakeup, and join.

use clotho_abi::{Result, ThreadError, ThreadState, Tid};

use crate::sched::Threads;

/// An explicit wait set that threads can sleep on and others can wake.
///
/// A wait set belongs to the system that created it; passing it to another
/// system's operations fails with `InvalidArgument` (or wakes nobody).
/// Share one across threads with `Arc`. Dropping the handle retires the
/// wait set.
pub struct WaitQueue {
    sys: Threads,
    ws: usize,
}

impl WaitQueue {
    pub fn new(sys: &Threads) -> Self {
        let ws = sys.sched().waitset_create();
        Self {
            sys: sys.clone(),
            ws,
        }
    }
}

impl Drop for WaitQueue {
    fn drop(&mut self) {
        self.sys.sched().waitset_destroy(self.ws);
    }
}

impl Threads {
    /// Blocks the calling thread on `queue` until some other thread wakes
    /// it. Returns the tid of the waker.
    ///
    /// If the ready set is empty the call returns `NoCandidate` without
    /// blocking: with nobody left to run, nobody could ever deliver the
    /// wakeup.
    pub fn sleep(&self, queue: &WaitQueue) -> Result<Tid> {
        if !self.owns(&queue.sys) {
            return Err(ThreadError::InvalidArgument);
        }
        let me = self.me();
        let g = self.enter();
        let ws = queue.ws;
        let (mut g, blocked) = self.block_current(g, me, |s, me| {
            let set = s.waitsets[ws].as_mut().expect("wait set destroyed");
            set.push_back(&mut s.links, me)
        });
        if !blocked {
            return Err(ThreadError::NoCandidate);
        }
        let waker = g.task_mut(me).woken_by;
        drop(g);
        self.preempt_point();
        Ok(waker)
    }

    /// Wakes the thread at the head of `queue`, or every thread on it when
    /// `all` is set. Woken threads go to the tail of the ready set in their
    /// queue order; the caller keeps running. Returns the number woken,
    /// 0 when the queue is empty or belongs to another system.
    pub fn wakeup(&self, queue: &WaitQueue, all: bool) -> usize {
        if !self.owns(&queue.sys) {
            return 0;
        }
        let me = self.me();
        let mut g = self.sched();
        let mut woken = 0;
        loop {
            let s = &mut *g;
            let set = s.waitsets[queue.ws].as_mut().expect("wait set destroyed");
            let Some(tid) = set.pop_front(&mut s.links) else {
                break;
            };
            g.make_ready(tid, me);
            woken += 1;
            if !all {
                break;
            }
        }
        if woken > 0 {
            log::trace!("thread {me} woke {woken} sleeper(s)");
        }
        drop(g);
        self.preempt_point();
        woken
    }

    /// Waits for thread `tid` to terminate and returns its exit code. If it
    /// has already terminated, returns immediately: the code of a killed
    /// thread is 0, and the code of an exited thread is retained until its
    /// slot is reused (one join can consume it).
    ///
    /// Fails with `InvalidTarget` if `tid` is the caller, out of range, or
    /// has no retained code; also if the target is live but the ready set
    /// is empty, since blocking then could never end.
    pub fn join(&self, tid: Tid) -> Result<i32> {
        let me = self.me();
        let mut g = self.enter();
        if tid == me {
            return Err(ThreadError::InvalidTarget);
        }
        match g.state_of(tid) {
            // Killed but not yet reaped; its code is already on record.
            Some(ThreadState::Exited) => Ok(g.exit_codes[tid].unwrap_or(0)),
            Some(_) => {
                let (mut g, blocked) = self.block_current(g, me, |s, me| {
                    let joiners = &mut s.slots[tid].as_mut().expect("join target vanished").joiners;
                    joiners.push_back(&mut s.links, me)
                });
                if !blocked {
                    return Err(ThreadError::InvalidTarget);
                }
                let code = g
                    .task_mut(me)
                    .pending_join
                    .take()
                    .expect("joiner woken without an exit code");
                drop(g);
                self.preempt_point();
                Ok(code)
            }
            None => {
                if tid >= g.capacity() {
                    return Err(ThreadError::InvalidTarget);
                }
                match g.exit_codes[tid].take() {
                    Some(code) => Ok(code),
                    None => Err(ThreadError::InvalidTarget),
                }
            }
        }
    }
}
