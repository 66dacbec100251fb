// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The intrusive process queue table.
//!
//! Every list the kernel keeps — the ready list, the sleep delta list, and
//! one wait queue per semaphore — lives in a single flat table of doubly
//! linked nodes. Nodes `[0, NPROC)` belong to the processes themselves: a
//! process can be on at most one queue at a time, so its node is simply
//! relinked from list to list, and unlinking a process (`get_item`) is O(1)
//! from its pid alone. Nodes from `NPROC` up are handed out in (head, tail)
//! pairs at boot, one pair per list; a list is named by the index of its
//! head node.
//!
//! The head sentinel carries the maximum key and the tail sentinel the
//! minimum, so ordered insertion never has to special-case the ends. A
//! key-ordered queue is non-increasing from head to tail, which makes the
//! ready list "highest priority first, FIFO among equals" fall out of plain
//! insertion.

use abi::{KernError, KernResult, Pid, Qid, NPROC, NQENT};

/// Key stored in every head sentinel.
const MAXKEY: i32 = i32::MAX;
/// Key stored in every tail sentinel.
const MINKEY: i32 = i32::MIN;

#[derive(Copy, Clone, Debug)]
struct QNode {
    /// Ordering key; meaningful only while the node is linked into a
    /// key-ordered or delta queue.
    key: i32,
    next: Qid,
    prev: Qid,
}

const UNLINKED: QNode = QNode {
    key: 0,
    next: Qid::NONE,
    prev: Qid::NONE,
};

/// The queue table. Owned by the kernel; queue ids are only minted here.
pub(crate) struct QueueTab {
    nodes: [QNode; NQENT],
    /// Allocation cursor for (head, tail) pairs; boot allocates every list
    /// the system will ever have.
    next_list: usize,
}

impl QueueTab {
    pub(crate) fn new() -> Self {
        Self {
            nodes: [UNLINKED; NQENT],
            next_list: NPROC,
        }
    }

    /// Allocates a fresh empty list and returns its id.
    ///
    /// Lists are only created at boot; running out of pairs means the table
    /// sizing constant is wrong, which is unrecoverable.
    pub(crate) fn alloc_queue(&mut self) -> Qid {
        let head = self.next_list;
        let tail = head + 1;
        assert!(tail < NQENT, "queue table exhausted");
        self.next_list += 2;

        self.nodes[head] = QNode {
            key: MAXKEY,
            next: Qid(tail as i16),
            prev: Qid::NONE,
        };
        self.nodes[tail] = QNode {
            key: MINKEY,
            next: Qid::NONE,
            prev: Qid(head as i16),
        };
        Qid(head as i16)
    }

    fn head(q: Qid) -> Qid {
        q
    }

    fn tail(q: Qid) -> Qid {
        Qid(q.0 + 1)
    }

    fn node(&self, at: Qid) -> &QNode {
        &self.nodes[at.0 as usize]
    }

    fn node_mut(&mut self, at: Qid) -> &mut QNode {
        &mut self.nodes[at.0 as usize]
    }

    /// Index of the first process node on `q`; the tail sentinel if `q` is
    /// empty.
    pub(crate) fn first_id(&self, q: Qid) -> Qid {
        self.node(Self::head(q)).next
    }

    pub(crate) fn is_empty(&self, q: Qid) -> bool {
        (self.first_id(q).0 as usize) >= NPROC
    }

    /// Key of the first node on `q`. On an empty queue this reads the tail
    /// sentinel and yields `i32::MIN`, which is exactly what the scheduler
    /// wants when it compares the running priority against "nothing".
    pub(crate) fn first_key(&self, q: Qid) -> i32 {
        self.node(self.first_id(q)).key
    }

    /// Reads the key currently stored in a process node.
    pub(crate) fn key(&self, at: Qid) -> i32 {
        self.node(at).key
    }

    pub(crate) fn set_key(&mut self, at: Qid, key: i32) {
        self.node_mut(at).key = key;
    }

    /// Successor link of a node; used by delta-list surgery.
    pub(crate) fn next_id(&self, at: Qid) -> Qid {
        self.node(at).next
    }

    /// Checks whether a node index names a process node rather than a
    /// sentinel.
    pub(crate) fn is_proc_node(at: Qid) -> bool {
        (at.0 as usize) < NPROC
    }

    fn pid_node(pid: Pid) -> Qid {
        Qid(pid.0 as i16)
    }

    /// Appends `pid` at the tail of `q`.
    pub(crate) fn enqueue(&mut self, pid: Pid, q: Qid) {
        let node = Self::pid_node(pid);
        let tail = Self::tail(q);
        let prev = self.node(tail).prev;

        {
            let n = self.node_mut(node);
            n.next = tail;
            n.prev = prev;
        }
        self.node_mut(prev).next = node;
        self.node_mut(tail).prev = node;
    }

    /// Removes and returns the process at the head of `q`.
    pub(crate) fn dequeue(&mut self, q: Qid) -> KernResult<Pid> {
        if self.is_empty(q) {
            return Err(KernError::Empty);
        }
        let pid = self.get_item(Pid(self.first_id(q).0 as i32));
        *self.node_mut(Self::pid_node(pid)) = UNLINKED;
        Ok(pid)
    }

    /// Unlinks `pid` from whatever queue currently holds it. The caller
    /// must know (from the process state) that it is linked somewhere.
    pub(crate) fn get_item(&mut self, pid: Pid) -> Pid {
        let node = Self::pid_node(pid);
        let next = self.node(node).next;
        let prev = self.node(node).prev;
        self.node_mut(prev).next = next;
        self.node_mut(next).prev = prev;
        pid
    }

    /// Inserts `pid` into the key-ordered queue `q`, before the first node
    /// whose key is strictly less than `key`. Equal keys therefore keep
    /// FIFO order among themselves.
    pub(crate) fn insert(&mut self, pid: Pid, q: Qid, key: i32) {
        let mut curr = self.first_id(q);
        while self.node(curr).key >= key {
            curr = self.node(curr).next;
        }
        let node = Self::pid_node(pid);
        let prev = self.node(curr).prev;
        *self.node_mut(node) = QNode {
            key,
            next: curr,
            prev,
        };
        self.node_mut(prev).next = node;
        self.node_mut(curr).prev = node;
    }

    /// Inserts `pid` into the delta list `q` with an absolute delay of
    /// `key` ticks from now.
    ///
    /// On a delta list each node's key is the delay *beyond its
    /// predecessor*, so the walk subtracts as it goes and the stored key is
    /// the residual; a successor that now waits behind the new node gives
    /// up that residual from its own key. The clock then only ever
    /// decrements the head.
    pub(crate) fn insert_delta(&mut self, pid: Pid, q: Qid, key: i32) {
        let tail = Self::tail(q);
        let mut key = key;
        let mut prev = Self::head(q);
        let mut next = self.node(prev).next;
        while next != tail && self.node(next).key <= key {
            key -= self.node(next).key;
            prev = next;
            next = self.node(next).next;
        }

        let node = Self::pid_node(pid);
        *self.node_mut(node) = QNode {
            key,
            next,
            prev,
        };
        self.node_mut(prev).next = node;
        self.node_mut(next).prev = node;

        if next != tail {
            self.node_mut(next).key -= key;
        }
    }

    /// Number of process nodes currently on `q`. Test and audit use only.
    #[cfg(test)]
    pub(crate) fn len(&self, q: Qid) -> usize {
        let mut n = 0;
        let mut curr = self.first_id(q);
        while Self::is_proc_node(curr) {
            n += 1;
            curr = self.node(curr).next;
        }
        n
    }

    /// Snapshot of the pids on `q`, head first. Test and audit use only.
    #[cfg(test)]
    pub(crate) fn ids(&self, q: Qid) -> Vec<Pid> {
        let mut out = Vec::new();
        let mut curr = self.first_id(q);
        while Self::is_proc_node(curr) {
            out.push(Pid(curr.0 as i32));
            curr = self.node(curr).next;
        }
        out
    }

    /// Snapshot of the keys on `q`, head first. Test and audit use only.
    #[cfg(test)]
    pub(crate) fn keys(&self, q: Qid) -> Vec<i32> {
        let mut out = Vec::new();
        let mut curr = self.first_id(q);
        while Self::is_proc_node(curr) {
            out.push(self.node(curr).key);
            curr = self.node(curr).next;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uut() -> (QueueTab, Qid) {
        let mut tab = QueueTab::new();
        let q = tab.alloc_queue();
        (tab, q)
    }

    #[test]
    fn fresh_queue_is_empty() {
        let (tab, q) = uut();
        assert!(tab.is_empty(q));
        assert_eq!(tab.first_key(q), i32::MIN);
    }

    #[test]
    fn enqueue_dequeue_is_fifo() {
        let (mut tab, q) = uut();
        for pid in [3, 1, 7] {
            tab.enqueue(Pid(pid), q);
        }
        assert_eq!(tab.len(q), 3);
        assert_eq!(tab.dequeue(q), Ok(Pid(3)));
        assert_eq!(tab.dequeue(q), Ok(Pid(1)));
        assert_eq!(tab.dequeue(q), Ok(Pid(7)));
        assert_eq!(tab.dequeue(q), Err(KernError::Empty));
    }

    #[test]
    fn get_item_unlinks_from_the_middle() {
        let (mut tab, q) = uut();
        for pid in [3, 1, 7] {
            tab.enqueue(Pid(pid), q);
        }
        tab.get_item(Pid(1));
        assert_eq!(tab.ids(q), [Pid(3), Pid(7)]);
    }

    #[test]
    fn insert_orders_by_descending_key() {
        let (mut tab, q) = uut();
        tab.insert(Pid(1), q, 10);
        tab.insert(Pid(2), q, 30);
        tab.insert(Pid(3), q, 20);
        assert_eq!(tab.ids(q), [Pid(2), Pid(3), Pid(1)]);
        assert_eq!(tab.first_key(q), 30);
    }

    #[test]
    fn insert_keeps_fifo_among_equal_keys() {
        let (mut tab, q) = uut();
        tab.insert(Pid(1), q, 20);
        tab.insert(Pid(2), q, 20);
        tab.insert(Pid(3), q, 20);
        // Newcomers land behind incumbents of the same key.
        assert_eq!(tab.ids(q), [Pid(1), Pid(2), Pid(3)]);
    }

    #[test]
    fn delta_insert_uniform_delays() {
        let (mut tab, q) = uut();
        // Delays 1, 2, 3 become relative keys 1, 1, 1.
        for (pid, delay) in [(1, 1), (2, 2), (3, 3)] {
            tab.insert_delta(Pid(pid), q, delay);
        }
        assert_eq!(tab.keys(q), [1, 1, 1]);
        assert_eq!(tab.ids(q), [Pid(1), Pid(2), Pid(3)]);
    }

    #[test]
    fn delta_insert_mixed_delays() {
        let (mut tab, q) = uut();
        // Delays 1, 1, 3, 4, 4, 9 become 1, 0, 2, 1, 0, 5.
        for (pid, delay) in [(1, 1), (2, 1), (3, 3), (4, 4), (5, 4), (6, 9)] {
            tab.insert_delta(Pid(pid), q, delay);
        }
        assert_eq!(tab.keys(q), [1, 0, 2, 1, 0, 5]);
    }

    #[test]
    fn delta_insert_in_front_charges_the_successor() {
        let (mut tab, q) = uut();
        tab.insert_delta(Pid(1), q, 10);
        tab.insert_delta(Pid(2), q, 4);
        // The old head now waits 6 more ticks after the new one.
        assert_eq!(tab.ids(q), [Pid(2), Pid(1)]);
        assert_eq!(tab.keys(q), [4, 6]);
    }

    #[test]
    fn same_tick_sleepers_keep_insertion_order() {
        let (mut tab, q) = uut();
        tab.insert_delta(Pid(1), q, 5);
        tab.insert_delta(Pid(2), q, 5);
        tab.insert_delta(Pid(3), q, 5);
        assert_eq!(tab.ids(q), [Pid(1), Pid(2), Pid(3)]);
        assert_eq!(tab.keys(q), [5, 0, 0]);
    }
}
