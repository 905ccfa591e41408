// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Blocking mutual exclusion and condition variables, built on the
//! scheduler's wait sets.
//!
//! These are cooperative primitives for threads of one system; they are not
//! OS mutexes. A contended acquire blocks the calling thread and switches
//! to the head of the ready set; a release hands the lock to the waiter at
//! the head of the lock's queue, one per release, in FIFO order.

use crate::sched::Threads;

/// A blocking lock. Share across threads with `Arc`; dropping the handle
/// retires the lock.
///
/// Acquire and release are not tied together by a guard type on purpose:
/// condition-variable protocols release and reacquire across wait points,
/// and a holder may even have the lock released on its behalf. The holder
/// is tracked, and releasing a lock held by someone else is a bug caught by
/// a debug assertion.
pub struct Lock {
    sys: Threads,
    id: usize,
}

impl Lock {
    pub fn new(sys: &Threads) -> Self {
        let id = sys.sched().lock_create();
        Self {
            sys: sys.clone(),
            id,
        }
    }

    /// Acquires the lock, blocking while another thread holds it.
    ///
    /// If the lock is held and the ready set is empty there is no way
    /// forward except the holder eventually running again; the calling
    /// context spins through the OS scheduler until then. That situation
    /// only arises when the holder's wakeup depends on the caller, which is
    /// a deadlock in the application.
    pub fn acquire(&self) {
        let me = self.sys.me();
        let mut g = self.sys.sched();
        loop {
            let state = g.lock_mut(self.id);
            if !state.held {
                state.held = true;
                state.holder = Some(me);
                break;
            }
            let id = self.id;
            let (resumed, blocked) = self.sys.block_current(g, me, |s, me| {
                let waiters = &mut s.locks[id].as_mut().expect("lock destroyed").waiters;
                waiters.push_back(&mut s.links, me)
            });
            g = resumed;
            if !blocked {
                drop(g);
                std::thread::yield_now();
                g = self.sys.sched();
            }
        }
        drop(g);
        self.sys.preempt_point();
    }

    /// Releases the lock and wakes the waiter at the head of its queue, if
    /// any. Releasing a lock nobody holds is a no-op.
    pub fn release(&self) {
        let me = self.sys.me();
        let mut g = self.sys.sched();
        if !g.lock_mut(self.id).held {
            return;
        }
        debug_assert_eq!(
            g.lock_mut(self.id).holder,
            Some(me),
            "lock released by a non-holder"
        );
        g.unlock_one(self.id, me);
        drop(g);
        self.sys.preempt_point();
    }
}

impl Drop for Lock {
    fn drop(&mut self) {
        self.sys.sched().lock_destroy(self.id);
    }
}

/// A condition variable, used with a [`Lock`]. Share with `Arc`.
///
/// There is no stored signal: a signal with no thread waiting does nothing,
/// and a thread that starts waiting afterward waits for the next one. The
/// usual discipline applies: re-check the predicate in a loop around
/// [`Condvar::wait`].
pub struct Condvar {
    sys: Threads,
    ws: usize,
}

impl Condvar {
    pub fn new(sys: &Threads) -> Self {
        let ws = sys.sched().waitset_create();
        Self {
            sys: sys.clone(),
            ws,
        }
    }

    /// Atomically releases `lock`, blocks until signaled, and reacquires
    /// `lock` before returning. No other thread can slip between the
    /// release and the enqueue on the wait set.
    ///
    /// Calling with `lock` not held returns immediately without blocking;
    /// holding it is the caller's end of the protocol.
    pub fn wait(&self, lock: &Lock) {
        debug_assert!(
            self.sys.owns(&lock.sys),
            "condition variable and lock from different systems"
        );
        let me = self.sys.me();
        let mut g = self.sys.sched();
        if !g.lock_mut(lock.id).held {
            return;
        }
        debug_assert_eq!(
            g.lock_mut(lock.id).holder,
            Some(me),
            "condition wait without holding the lock"
        );
        g.unlock_one(lock.id, me);
        let ws = self.ws;
        // If nothing else can run, waiting is impossible; fall through and
        // take the lock straight back.
        let (resumed, _blocked) = self.sys.block_current(g, me, |s, me| {
            let set = s.waitsets[ws].as_mut().expect("condition variable destroyed");
            set.push_back(&mut s.links, me)
        });
        drop(resumed);
        lock.acquire();
    }

    /// Wakes the longest-waiting thread, if any. The waker must hold
    /// `lock`; otherwise the signal does nothing. The woken thread
    /// contends for the lock like anyone else.
    pub fn signal(&self, lock: &Lock) {
        self.wake(lock, false);
    }

    /// Wakes every waiting thread, in their wait order. Same locking rule
    /// as [`Condvar::signal`].
    pub fn broadcast(&self, lock: &Lock) {
        self.wake(lock, true);
    }

    fn wake(&self, lock: &Lock, all: bool) {
        debug_assert!(
            self.sys.owns(&lock.sys),
            "condition variable and lock from different systems"
        );
        let me = self.sys.me();
        let mut g = self.sys.sched();
        if g.lock_mut(lock.id).held {
            loop {
                let s = &mut *g;
                let set = s.waitsets[self.ws].as_mut().expect("condition variable destroyed");
                let Some(tid) = set.pop_front(&mut s.links) else {
                    break;
                };
                g.make_ready(tid, me);
                if !all {
                    break;
                }
            }
        }
        drop(g);
        self.sys.preempt_point();
    }
}

impl Drop for Condvar {
    fn drop(&mut self) {
        self.sys.sched().waitset_destroy(self.ws);
    }
}
