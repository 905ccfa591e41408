// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A FIFO queue of small-integer identities, backed by a shared link arena.
//!
//! A scheduler keeps the same fixed population of thread identities moving
//! between a handful of queues: a ready queue and any number of wait queues.
//! Since an identity is a member of at most one queue at a time, the doubly
//! linked list nodes for *every* queue can live in a single arena with one
//! node per identity ([`Links`]). A [`RunQueue`] is then just a head, a tail,
//! and a length; all of its operations take the arena as an explicit
//! argument.
//!
//! This gives O(1) append, O(1) remove-head, and O(1) remove-by-identity
//! without pointer-chasing or allocation per operation.
//!
//! # Design goals
//!
//! 1. `no_std` (plus `alloc` for the one-time arena allocation).
//! 2. Index-addressed storage rather than owned nodes, so that a queue can
//!    be embedded in a larger structure without borrowing headaches and so
//!    that membership can be asserted cheaply.
//! 3. Code clarity -- there are many clever intrusive-list encodings, and
//!    this uses none of them.
//!
//! Non-goals:
//!
//! - Concurrent access or sharing. Queues and the arena must be accessed
//!   using `&mut`; callers provide their own mutual exclusion.
//! - Detecting which queue an identity is in. The arena records only *that*
//!   an identity is queued; keeping queue membership straight is the
//!   caller's job (debug assertions catch the common mistakes).

#![cfg_attr(not(test), no_std)]

extern crate alloc;

use alloc::boxed::Box;
use alloc::vec;

/// Sentinel meaning "no neighbor". Stored in place of an index.
const NONE: usize = usize::MAX;

/// One arena node. `prev`/`next` are only meaningful while `queued`.
#[derive(Copy, Clone, Debug)]
struct Link {
    prev: usize,
    next: usize,
    queued: bool,
}

/// The shared link arena: one node per identity, indexed by identity.
#[derive(Debug)]
pub struct Links {
    nodes: Box<[Link]>,
}

impl Links {
    /// Creates an arena serving identities `0..capacity`, none queued.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            nodes: vec![
                Link {
                    prev: NONE,
                    next: NONE,
                    queued: false,
                };
                capacity
            ]
            .into_boxed_slice(),
        }
    }

    /// Number of identities this arena serves.
    pub fn capacity(&self) -> usize {
        self.nodes.len()
    }

    /// Checks whether `id` is currently a member of *some* queue.
    pub fn is_queued(&self, id: usize) -> bool {
        self.nodes[id].queued
    }
}

/// A FIFO queue of identities. All storage lives in the [`Links`] arena
/// passed to each operation; the queue itself is three words.
#[derive(Debug)]
pub struct RunQueue {
    head: usize,
    tail: usize,
    len: usize,
}

impl RunQueue {
    /// Creates an empty queue.
    pub const fn new() -> Self {
        Self {
            head: NONE,
            tail: NONE,
            len: 0,
        }
    }

    /// Number of identities in the queue.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Checks whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the identity at the head without removing it.
    pub fn peek(&self) -> Option<usize> {
        if self.len == 0 {
            None
        } else {
            Some(self.head)
        }
    }

    /// Appends `id` at the tail.
    ///
    /// # Panics
    ///
    /// If `id` is out of range for the arena, or is already a member of a
    /// queue (membership is exclusive across all queues sharing the arena).
    pub fn push_back(&mut self, links: &mut Links, id: usize) {
        let node = &mut links.nodes[id];
        assert!(!node.queued, "identity {id} is already queued");
        node.queued = true;
        node.prev = self.tail;
        node.next = NONE;
        if self.len == 0 {
            self.head = id;
        } else {
            links.nodes[self.tail].next = id;
        }
        self.tail = id;
        self.len += 1;
    }

    /// Removes and returns the identity at the head, if any.
    pub fn pop_front(&mut self, links: &mut Links) -> Option<usize> {
        let id = self.peek()?;
        self.unlink(links, id);
        Some(id)
    }

    /// Removes `id` from the queue, wherever it sits. Returns `true` if it
    /// was a member.
    pub fn remove(&mut self, links: &mut Links, id: usize) -> bool {
        if !links.nodes[id].queued {
            return false;
        }
        self.unlink(links, id);
        true
    }

    /// Visits the queued identities in FIFO order.
    pub fn iter<'q>(&'q self, links: &'q Links) -> Iter<'q> {
        Iter {
            links,
            next: if self.len == 0 { NONE } else { self.head },
        }
    }

    fn unlink(&mut self, links: &mut Links, id: usize) {
        let Link { prev, next, .. } = links.nodes[id];
        if prev == NONE {
            debug_assert_eq!(self.head, id, "identity {id} is in another queue");
            self.head = next;
        } else {
            links.nodes[prev].next = next;
        }
        if next == NONE {
            debug_assert_eq!(self.tail, id, "identity {id} is in another queue");
            self.tail = prev;
        } else {
            links.nodes[next].prev = prev;
        }
        let node = &mut links.nodes[id];
        node.prev = NONE;
        node.next = NONE;
        node.queued = false;
        self.len -= 1;
    }
}

impl Default for RunQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Iterator over a queue's members, front to back. See [`RunQueue::iter`].
pub struct Iter<'q> {
    links: &'q Links,
    next: usize,
}

impl Iterator for Iter<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        if self.next == NONE {
            return None;
        }
        let id = self.next;
        self.next = self.links.nodes[id].next;
        Some(id)
    }
}
