// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Telos kernel.
//!
//! A small preemptive multitasking kernel: a fixed population of
//! processes in one address space, scheduled strictly by priority, and
//! coordinating through counting semaphores, one-word messages, and
//! bounded message ports. A 1 ms clock drives timed sleeps and time-slice
//! preemption.
//!
//! Everything outside the `arch` module is portable; the architecture
//! layer supplies only the interrupt mask, the context switch, and the
//! shape of a saved context.
//!
//! # Design principles
//!
//! 1. Static configuration. Every table is sized at compile time; ids
//!    are table indices and "absent" is a sentinel value, so there is no
//!    ownership web between kernel objects.
//! 2. A strong preference for safe code. Kernel RAM is addressed by
//!    `u32` offsets into one borrowed region, which keeps the
//!    allocators, port nodes, and stack seeding in ordinary slice
//!    operations.
//! 3. Simple, clear algorithms over clever ones: linear scans and
//!    intrusive lists bounded by the (small, fixed) table sizes.
//!
//! # Suspension
//!
//! Kernel calls that can suspend the caller return
//! [`abi::Completion`]: `Done` when the operation finished, `Pending`
//! when the caller was parked and the operation completes upon
//! resumption. On hardware the resumed process continues inside its
//! original call frame; the hosted arch (see [`arch`]) instead completes
//! the operation when the call is re-issued.

#![cfg_attr(target_os = "none", no_std)]

pub mod arch;

pub mod bufpool;
pub mod clock;
pub mod create;
pub mod mem;
pub mod msg;
pub mod ports;
pub mod proc;
pub mod queue;
pub mod sched;
pub mod sem;
pub mod startup;

#[cfg(test)]
mod test_support;

use abi::{Pid, Qid, MAX_POOLS, MAX_PORTS, NPROC, NSEM};

use crate::bufpool::Pool;
use crate::mem::Heap;
use crate::ports::Port;
use crate::proc::Proc;
use crate::queue::QueueTab;
use crate::sched::DeferState;
use crate::sem::Sem;

pub use crate::sched::Defer;

/// The whole kernel: every table, the clock, and the scheduler latch,
/// over one borrowed RAM region. Public entry points are methods; each
/// opens a critical section via the arch interrupt mask and restores it
/// on every exit path.
pub struct Kernel<'r> {
    pub(crate) procs: [Proc; NPROC],
    pub(crate) queues: QueueTab,
    /// Key-ordered by priority; the scheduler's pick list.
    pub(crate) ready_list: Qid,
    /// The sleep delta list.
    pub(crate) sleepq: Qid,
    pub(crate) current: Pid,
    pub(crate) live_procs: u32,
    /// Round-robin pid allocation cursor.
    pub(crate) next_pid: usize,
    pub(crate) defer: DeferState,
    /// Ticks left in the running process's quantum.
    pub(crate) preempt: u32,
    /// Milliseconds accumulated toward the next second.
    pub(crate) ms: u32,
    /// Seconds since boot.
    pub(crate) seconds: u32,
    pub(crate) sems: [Sem; NSEM],
    /// Round-robin semaphore allocation cursor.
    pub(crate) next_sem: usize,
    pub(crate) ports: [Port; MAX_PORTS],
    /// Next port slot to try; deletes point it back for fast reuse.
    pub(crate) pt_next: usize,
    /// Global free list of port message nodes, in heap RAM.
    pub(crate) pt_free: u32,
    pub(crate) pt_inited: bool,
    pub(crate) pools: [Pool; MAX_POOLS],
    pub(crate) npools: usize,
    pub(crate) heap: Heap<'r>,
}
