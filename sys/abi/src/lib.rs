// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Kernel ABI definitions, shared between the kernel, its tests, and any
//! external tooling that wants to interpret kernel state.
//!
//! Everything here is vocabulary: ids, states, limits, sentinels, and the
//! error taxonomy. Ids are indices into fixed kernel tables, wrapped in
//! newtypes so they can't be confused with one another; "absent" is always
//! an in-band sentinel value (`Pid::NONE` and friends) rather than an
//! `Option`, because these values live in tables and saved frames where an
//! out-of-band encoding has no home.

#![no_std]

use serde::{Deserialize, Serialize};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// Maximum number of processes, and the size of the process table. Pid 0 is
/// reserved for the null process.
pub const NPROC: usize = 100;

/// Maximum number of counting semaphores.
pub const NSEM: usize = 100;

/// Number of nodes in the queue table: one per process, plus a (head, tail)
/// pair for the ready list, the sleep list, and each semaphore's wait queue.
pub const NQENT: usize = NPROC + 4 + 2 * NSEM;

/// Maximum number of message ports.
pub const MAX_PORTS: usize = 30;

/// Conventional boot-time sizing of the global port message-node pool.
pub const MAXMSGS: u32 = 100;

/// Maximum number of buffer pools.
pub const MAX_POOLS: usize = 20;

/// Maximum number of buffers in a single pool.
pub const MAX_POOL_BUFFS: u32 = 2048;

/// Bounds on the size of a single pool buffer, in bytes.
pub const MIN_BUFF_SIZE: u32 = 8;
pub const MAX_BUFF_SIZE: u32 = 8192;

/// Length of a process name, in bytes. Longer names are truncated.
pub const PNMLEN: usize = 16;

/// Number of device descriptor slots in a process entry.
pub const NDESC: usize = 5;

/// Descriptor value naming the console device; create binds a new process's
/// first three descriptors to it.
pub const CONSOLE: i16 = 0;

/// Clock ticks a process may hold the CPU before the tick handler forces a
/// reschedule.
pub const QUANTUM: u32 = 2;

/// Smallest stack, in bytes, that create will provision.
pub const MIN_STK: u32 = 400;

/// Default stack size and priority for ordinary processes.
pub const INIT_STK: u32 = 65536;
pub const INIT_PRIO: i16 = 20;

/// Largest argument `sleep` accepts: more seconds than this overflows the
/// millisecond delta key.
pub const MAX_SECONDS: u32 = u32::MAX / 1000;

/// Marker written into the highest word of every process stack, used to
/// detect overflow.
pub const STACK_MAGIC: u32 = 0x0A0A_AAA9;

/// Granularity of the system RAM region.
pub const PAGE_SIZE: u32 = 4096;

/// A one-word message, as carried by mailboxes and ports.
pub type Message = u32;

/// Reserved message value meaning "no message"; `send`ing it is legal but
/// indistinguishable from silence, so don't.
pub const NONE_MSG: Message = u32::MAX;

/// Reserved message value returned by a timed receive whose delay expired.
pub const TIMEOUT_MSG: Message = u32::MAX - 1;

/// Names a process by its slot in the process table.
#[derive(
    Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize, FromBytes,
    IntoBytes, Immutable, KnownLayout,
)]
#[repr(transparent)]
pub struct Pid(pub i32);

impl Pid {
    /// The universal invalid process id.
    pub const NONE: Self = Self(-1);

    /// The null process, built by boot; it is always runnable and never
    /// sleeps, suspends, or dies.
    pub const NULL: Self = Self(0);

    /// Converts a known-valid pid into a table index.
    ///
    /// Callers must have validated the pid against the process table first;
    /// indexing with a sentinel will panic at the table access.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Names a queue by the index of its head node in the queue table.
#[derive(
    Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize, FromBytes,
    IntoBytes, Immutable, KnownLayout,
)]
#[repr(transparent)]
pub struct Qid(pub i16);

impl Qid {
    pub const NONE: Self = Self(-1);
}

/// Names a semaphore by its slot in the semaphore table.
#[derive(
    Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize, FromBytes,
    IntoBytes, Immutable, KnownLayout,
)]
#[repr(transparent)]
pub struct Sid(pub i32);

impl Sid {
    pub const NONE: Self = Self(-1);

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Names a message port by its slot in the port table.
#[derive(
    Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize, FromBytes,
    IntoBytes, Immutable, KnownLayout,
)]
#[repr(transparent)]
pub struct PortId(pub i32);

impl PortId {
    pub const NONE: Self = Self(-1);

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Names a buffer pool by its slot in the pool table.
#[derive(
    Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize, FromBytes,
    IntoBytes, Immutable, KnownLayout,
)]
#[repr(transparent)]
pub struct Bpid(pub i32);

impl Bpid {
    pub const NONE: Self = Self(-1);

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Indicates the urgency of a process.
///
/// Priorities are signed 16-bit values; numerically *greater* is more
/// urgent. Note that this type deliberately does not implement
/// `PartialOrd`/`Ord`, to keep us from confusing ourselves about whether
/// `>` means "runs first": use `is_more_important_than`.
#[derive(
    Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize, FromBytes,
    IntoBytes, Immutable, KnownLayout,
)]
#[repr(transparent)]
pub struct Priority(pub i16);

impl Priority {
    /// Sentinel for "no priority", used in records that do not describe a
    /// live process.
    pub const NONE: Self = Self(-11111);

    /// Checks if `self` is strictly more urgent than `other`.
    pub fn is_more_important_than(self, other: Self) -> bool {
        self.0 > other.0
    }
}

impl From<Priority> for i32 {
    /// A priority doubles as an ordering key in the ready list.
    fn from(p: Priority) -> Self {
        i32::from(p.0)
    }
}

/// Lifecycle state of a process-table entry.
#[derive(
    Copy, Clone, Debug, Eq, PartialEq, Default, Serialize, Deserialize,
)]
pub enum ProcState {
    /// The table slot is unused.
    #[default]
    Free,
    /// The process is currently executing.
    Curr,
    /// The process is on the ready list.
    Ready,
    /// The process is blocked waiting for a mailbox message.
    Recv,
    /// The process is on the sleep delta list.
    Sleep,
    /// The process is suspended.
    Susp,
    /// The process is on a semaphore's wait queue.
    Wait,
    /// The process is waiting for a mailbox message with a delta-list
    /// timeout armed.
    RecvTime,
}

impl ProcState {
    /// Checks whether a process in this state sits on the sleep delta
    /// list.
    pub fn is_sleeping(self) -> bool {
        matches!(self, Self::Sleep | Self::RecvTime)
    }

    /// Checks whether a process in this state is linked onto exactly one
    /// queue. States outside this set must be on none.
    pub fn on_a_queue(self) -> bool {
        matches!(self, Self::Ready | Self::Wait | Self::Sleep | Self::RecvTime)
    }
}

/// Lifecycle state of a semaphore-table entry.
#[derive(
    Copy, Clone, Debug, Eq, PartialEq, Default, Serialize, Deserialize,
)]
pub enum SemState {
    #[default]
    Free,
    Used,
}

/// Lifecycle state of a port-table entry.
#[derive(
    Copy, Clone, Debug, Eq, PartialEq, Default, Serialize, Deserialize,
)]
pub enum PortState {
    /// The slot is available for `pt_create`.
    #[default]
    Free,
    /// The port is mid-delete or mid-reset; operations fail until it
    /// settles.
    Limbo,
    /// The port is live.
    Alloc,
}

bitflags::bitflags! {
    /// Boolean properties of a boot process descriptor.
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    #[repr(transparent)]
    pub struct ProcFlags: u32 {
        /// Leave the process suspended instead of readying it, as if its
        /// creator had not yet called resume.
        const START_SUSPENDED = 1 << 0;

        const RESERVED = !1;
    }
}

/// Record describing a process for the boot path to start, the moral
/// equivalent of create-then-resume before the system is running.
#[derive(Copy, Clone, Debug)]
pub struct ProcDesc {
    /// Opaque address of the process entry point, interpreted by the
    /// architecture layer.
    pub entry: u32,
    /// Requested stack size in bytes; rounded up to at least `MIN_STK`.
    pub stack_size: u32,
    /// Initial priority; must be at least 1.
    pub priority: i16,
    /// Human-readable name, truncated to `PNMLEN` bytes.
    pub name: &'static str,
    /// Boolean options.
    pub flags: ProcFlags,
}

/// The categorical error taxonomy. Every fallible kernel entry point
/// returns one of these; nothing unwinds.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum KernError {
    /// Invalid argument, wrong state, table full, or overlapping free.
    Sys,
    /// No resource was available and the caller does not block for one.
    Empty,
    /// Reserved for the timed receive path.
    Timeout,
    /// Reserved for I/O; unused by the kernel core.
    Eof,
}

pub type KernResult<T> = Result<T, KernError>;

/// Outcome of a kernel call that may suspend the calling process.
///
/// On hardware, a suspended caller resumes inside the original call frame
/// when it is next dispatched, and the call runs to completion there. The
/// portable kernel surfaces the same two-phase shape explicitly: `Pending`
/// means the caller has been parked and the operation completes upon
/// resumption. This is marked `must_use` because ignoring a `Pending` and
/// barreling ahead as if the call finished would be Bad.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[must_use]
pub enum Completion<T> {
    /// The call finished; here is its result.
    Done(T),
    /// The caller has been suspended; the operation completes when the
    /// caller next runs.
    Pending,
}

impl<T> Completion<T> {
    /// Extracts the result of a finished call, `None` if the caller was
    /// suspended instead.
    pub fn done(self) -> Option<T> {
        match self {
            Self::Done(v) => Some(v),
            Self::Pending => None,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }
}
