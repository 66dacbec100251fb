// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Bounded message ports.
//!
//! A port queues up to `max_cnt` one-word messages between any number of
//! senders and receivers. Two semaphores do the flow control: the send
//! semaphore starts at the capacity and counts free slots, the receive
//! semaphore starts at zero and counts queued messages. Message nodes come
//! from one global pool, carved out of the heap once at `pt_init` and
//! linked through the heap words themselves.
//!
//! A blocked sender or receiver can outlive the port it is waiting on:
//! delete and reset free all blocked parties by tearing their semaphores
//! down. Each port slot therefore carries a sequence number, bumped on
//! every create and reset; an operation snapshots it before waiting and
//! re-checks it after, and a mismatch (or a state change) means the wait
//! spanned a recycle and the operation fails instead of touching the new
//! incarnation. The snapshot is parked in the process entry while the
//! process is, so resumption sees the world the way the original call
//! did.

use abi::{
    Completion, KernError, KernResult, Message, PortId, PortState, Sid,
    MAX_PORTS,
};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::arch;
use crate::mem::NULL_OFF;
use crate::Kernel;

/// One node of a port's message list, as laid out in heap RAM.
#[derive(Copy, Clone, Debug, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
pub(crate) struct MsgNode {
    pub(crate) msg: Message,
    pub(crate) next: u32,
}

const NODE_SIZE: u32 = core::mem::size_of::<MsgNode>() as u32;

/// One port-table entry.
#[derive(Copy, Clone, Debug)]
pub(crate) struct Port {
    pub(crate) state: PortState,
    /// Counts free message slots; senders wait here.
    pub(crate) ssem: Sid,
    /// Counts queued messages; receivers wait here.
    pub(crate) rsem: Sid,
    /// Capacity.
    pub(crate) max_cnt: u16,
    /// Bumped on every create and reset of this slot.
    pub(crate) seq: i32,
    /// Message list, oldest first; heap offsets, `NULL_OFF` when empty.
    pub(crate) head: u32,
    pub(crate) tail: u32,
}

impl Port {
    pub(crate) const FREE: Self = Self {
        state: PortState::Free,
        ssem: Sid::NONE,
        rsem: Sid::NONE,
        max_cnt: 0,
        seq: 0,
        head: NULL_OFF,
        tail: NULL_OFF,
    };
}

impl Kernel<'_> {
    /// Sizes the global message-node pool and opens the port table for
    /// business. One-shot: the pool cannot be resized after boot.
    pub fn pt_init(&mut self, maxmsgs: u32) -> KernResult<()> {
        let _irq = arch::IrqGuard::hold();
        if self.pt_inited || maxmsgs == 0 {
            return Err(KernError::Sys);
        }

        let mem = self.get_mem(maxmsgs * NODE_SIZE)?;
        for i in 0..maxmsgs {
            let off = mem + i * NODE_SIZE;
            let next = if i + 1 == maxmsgs {
                NULL_OFF
            } else {
                off + NODE_SIZE
            };
            self.heap.write(off, MsgNode { msg: 0, next });
        }

        for entry in &mut self.ports {
            *entry = Port::FREE;
        }
        self.pt_free = mem;
        self.pt_next = 0;
        self.pt_inited = true;
        Ok(())
    }

    /// Allocates a port able to queue `count` messages.
    pub fn pt_create(&mut self, count: i32) -> KernResult<PortId> {
        let _irq = arch::IrqGuard::hold();
        if !self.pt_inited || count < 0 || count > u16::MAX as i32 {
            return Err(KernError::Sys);
        }

        let slot = (0..MAX_PORTS)
            .map(|step| (self.pt_next + step) % MAX_PORTS)
            .find(|&i| self.ports[i].state == PortState::Free)
            .ok_or(KernError::Sys)?;
        self.pt_next = (slot + 1) % MAX_PORTS;

        let ssem = self.sem_create(count)?;
        let rsem = match self.sem_create(0) {
            Ok(sem) => sem,
            Err(e) => {
                self.sem_delete(ssem).ok();
                return Err(e);
            }
        };

        let entry = &mut self.ports[slot];
        entry.state = PortState::Alloc;
        entry.ssem = ssem;
        entry.rsem = rsem;
        entry.max_cnt = count as u16;
        entry.seq += 1;
        entry.head = NULL_OFF;
        entry.tail = NULL_OFF;
        Ok(PortId(slot as i32))
    }

    /// Queues `msg` on the port, blocking while the port is full.
    ///
    /// A sender freed by delete or reset while it was blocked gets
    /// SYSERR, not a slot in the port's next life.
    pub fn pt_send(
        &mut self,
        port: PortId,
        msg: Message,
    ) -> KernResult<Completion<()>> {
        let _irq = arch::IrqGuard::hold();
        let idx = self.check_port(port)?;
        let me = self.current.index();

        if self.ports[idx].state != PortState::Alloc {
            self.abort_port_op(me);
            return Err(KernError::Sys);
        }
        let seq = self.resume_port_seq(me, port, self.ports[idx].seq);
        let ssem = self.ports[idx].ssem;

        match self.wait(ssem)? {
            Completion::Pending => return Ok(Completion::Pending),
            Completion::Done(()) => {}
        }

        // The wait may have spanned a delete or reset.
        if self.ports[idx].state != PortState::Alloc
            || self.ports[idx].seq != seq
        {
            self.abort_port_op(me);
            return Err(KernError::Sys);
        }
        self.clear_port_op(me);

        let node = self.pt_free;
        if node == NULL_OFF {
            return Err(KernError::Empty);
        }
        self.pt_free = self.heap.read::<MsgNode>(node).next;
        self.heap.write(
            node,
            MsgNode {
                msg,
                next: NULL_OFF,
            },
        );
        if self.ports[idx].tail == NULL_OFF {
            self.ports[idx].head = node;
        } else {
            let tail = self.ports[idx].tail;
            let mut tn: MsgNode = self.heap.read(tail);
            tn.next = node;
            self.heap.write(tail, tn);
        }
        self.ports[idx].tail = node;

        self.signal(self.ports[idx].rsem)?;
        Ok(Completion::Done(()))
    }

    /// Takes the oldest message off the port, blocking while it is empty.
    pub fn pt_recv(&mut self, port: PortId) -> KernResult<Completion<Message>> {
        let _irq = arch::IrqGuard::hold();
        let idx = self.check_port(port)?;
        let me = self.current.index();

        if self.ports[idx].state != PortState::Alloc {
            self.abort_port_op(me);
            return Err(KernError::Sys);
        }
        let seq = self.resume_port_seq(me, port, self.ports[idx].seq);
        let rsem = self.ports[idx].rsem;

        match self.wait(rsem)? {
            Completion::Pending => return Ok(Completion::Pending),
            Completion::Done(()) => {}
        }

        if self.ports[idx].state != PortState::Alloc
            || self.ports[idx].seq != seq
        {
            self.abort_port_op(me);
            return Err(KernError::Sys);
        }
        self.clear_port_op(me);

        let node = self.ports[idx].head;
        if node == NULL_OFF {
            return Err(KernError::Sys);
        }
        let body: MsgNode = self.heap.read(node);
        self.ports[idx].head = body.next;
        if self.ports[idx].head == NULL_OFF {
            self.ports[idx].tail = NULL_OFF;
        }
        self.heap.write(
            node,
            MsgNode {
                msg: 0,
                next: self.pt_free,
            },
        );
        self.pt_free = node;

        self.signal(self.ports[idx].ssem)?;
        Ok(Completion::Done(body.msg))
    }

    /// Destroys the port: disposes every queued message, frees every
    /// blocked sender and receiver (they fail with SYSERR), and releases
    /// the slot for fast reuse.
    pub fn pt_delete(
        &mut self,
        port: PortId,
        dispose: impl FnMut(&mut Self, Message),
    ) -> KernResult<()> {
        let _irq = arch::IrqGuard::hold();
        let idx = self.check_port(port)?;
        if self.ports[idx].state != PortState::Alloc {
            return Err(KernError::Sys);
        }

        self.pt_drain(idx, dispose);
        self.sem_delete(self.ports[idx].ssem)?;
        self.sem_delete(self.ports[idx].rsem)?;

        self.ports[idx].state = PortState::Free;
        self.pt_next = idx;
        Ok(())
    }

    /// Empties the port back to its created state: disposes every queued
    /// message and frees every blocked sender and receiver (they fail
    /// with SYSERR). The port remains allocated with the same capacity.
    pub fn pt_reset(
        &mut self,
        port: PortId,
        dispose: impl FnMut(&mut Self, Message),
    ) -> KernResult<()> {
        let _irq = arch::IrqGuard::hold();
        let idx = self.check_port(port)?;
        if self.ports[idx].state != PortState::Alloc {
            return Err(KernError::Sys);
        }

        self.pt_drain(idx, dispose);
        self.sem_reset(self.ports[idx].ssem, i32::from(self.ports[idx].max_cnt))?;
        self.sem_reset(self.ports[idx].rsem, 0)?;

        self.ports[idx].state = PortState::Alloc;
        Ok(())
    }

    /// Common teardown: park the port in limbo, bump the sequence so
    /// blocked parties can tell, run `dispose` over the queued messages,
    /// and splice the whole node chain back onto the free list.
    fn pt_drain(
        &mut self,
        idx: usize,
        mut dispose: impl FnMut(&mut Self, Message),
    ) {
        self.ports[idx].state = PortState::Limbo;
        self.ports[idx].seq += 1;

        let chain = self.ports[idx].head;
        self.ports[idx].head = NULL_OFF;
        self.ports[idx].tail = NULL_OFF;

        let mut curr = chain;
        let mut last = NULL_OFF;
        while curr != NULL_OFF {
            let body: MsgNode = self.heap.read(curr);
            // Dispose may reschedule; the port is in limbo, so nothing
            // can race us onto the list meanwhile.
            dispose(self, body.msg);
            last = curr;
            curr = body.next;
        }
        if last != NULL_OFF {
            let mut tn: MsgNode = self.heap.read(last);
            tn.next = self.pt_free;
            self.heap.write(last, tn);
            self.pt_free = chain;
        }
    }

    fn check_port(&self, port: PortId) -> KernResult<usize> {
        if port.0 < 0 || (port.0 as usize) >= MAX_PORTS || !self.pt_inited {
            return Err(KernError::Sys);
        }
        Ok(port.index())
    }

    /// Sequence snapshot for a port operation: a fresh call records the
    /// port's current sequence in the caller's entry, while a call
    /// resuming after a park reuses the recorded one, so the re-check
    /// sees any recycle that happened while the caller slept.
    fn resume_port_seq(&mut self, me: usize, port: PortId, fresh: i32) -> i32 {
        if self.procs[me].port == port {
            self.procs[me].port_seq
        } else {
            self.procs[me].port = port;
            self.procs[me].port_seq = fresh;
            fresh
        }
    }

    fn clear_port_op(&mut self, me: usize) {
        self.procs[me].port = PortId::NONE;
        self.procs[me].port_seq = 0;
    }

    /// Failure exit from a port operation: forget the parked snapshot and
    /// any semaphore release token the teardown handed us.
    fn abort_port_op(&mut self, me: usize) {
        self.clear_port_op(me);
        self.procs[me].grant = Sid::NONE;
    }
}
