// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The process table.
//!
//! A `Proc` is one slot of the fixed table; its pid is its index. Links to
//! other kernel objects (the semaphore being waited on, the parent) are
//! ids, never references, so slots can be recycled freely when a process
//! dies.

use abi::{
    KernError, KernResult, Message, Pid, PortId, Priority, ProcState, Sid,
    CONSOLE, NDESC, NONE_MSG, NPROC, PNMLEN,
};

use crate::Kernel;

/// One process-table entry.
#[derive(Copy, Clone, Debug)]
pub struct Proc {
    /// Lifecycle state; `Free` slots hold no process.
    pub(crate) state: ProcState,
    /// Scheduling urgency.
    pub(crate) prio: Priority,
    /// Saved stack pointer, valid while the process is not running.
    pub(crate) stkptr: u32,
    /// Highest word of the stack; stacks grow downward from here.
    pub(crate) stkbase: u32,
    /// Stack length in bytes.
    pub(crate) stklen: u32,
    /// Process name, NUL padded.
    pub(crate) name: [u8; PNMLEN],
    /// Semaphore this process is waiting on while in `Wait`.
    pub(crate) sem: Sid,
    /// One-shot token deposited by a semaphore release; consumed by the
    /// wait path on resumption so a released waiter does not re-charge the
    /// count.
    pub(crate) grant: Sid,
    /// The process that created this one.
    pub(crate) parent: Pid,
    /// Port whose send/receive this process is in the middle of, if any;
    /// the operation's sequence snapshot rides along so a resumed call
    /// can tell whether the port was recycled while it slept.
    pub(crate) port: PortId,
    pub(crate) port_seq: i32,
    /// Single-slot mailbox.
    pub(crate) msg: Message,
    /// Whether the mailbox currently holds an undelivered message.
    pub(crate) has_msg: bool,
    /// Device descriptors; create binds the first three to the console.
    pub(crate) desc: [i16; NDESC],
}

impl Proc {
    /// An unoccupied slot.
    pub(crate) const FREE: Self = Self {
        state: ProcState::Free,
        prio: Priority::NONE,
        stkptr: 0,
        stkbase: 0,
        stklen: 0,
        name: [0; PNMLEN],
        sem: Sid::NONE,
        grant: Sid::NONE,
        parent: Pid::NONE,
        port: PortId::NONE,
        port_seq: 0,
        msg: NONE_MSG,
        has_msg: false,
        desc: [-1; NDESC],
    };

    /// Populates a slot for a freshly created process. The stack fields and
    /// saved context are the caller's problem.
    pub(crate) fn init(&mut self, prio: Priority, name: &str, parent: Pid) {
        *self = Self::FREE;
        self.state = ProcState::Susp;
        self.prio = prio;
        self.parent = parent;
        self.set_name(name);
        self.desc[0] = CONSOLE;
        self.desc[1] = CONSOLE;
        self.desc[2] = CONSOLE;
    }

    pub(crate) fn set_name(&mut self, name: &str) {
        let bytes = name.as_bytes();
        let n = bytes.len().min(PNMLEN);
        self.name = [0; PNMLEN];
        self.name[..n].copy_from_slice(&bytes[..n]);
    }

    /// The process name, up to the first NUL. Non-UTF-8 tails (only
    /// possible if a multibyte name was truncated) are dropped.
    pub fn name(&self) -> &str {
        let end = self
            .name
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(PNMLEN);
        core::str::from_utf8(&self.name[..end]).unwrap_or("")
    }

    pub fn state(&self) -> ProcState {
        self.state
    }

    pub fn priority(&self) -> Priority {
        self.prio
    }

    pub fn parent(&self) -> Pid {
        self.parent
    }

    /// Stores a message in the mailbox; refuses if one is already pending.
    pub(crate) fn post_msg(&mut self, msg: Message) -> bool {
        if self.has_msg {
            return false;
        }
        self.msg = msg;
        self.has_msg = true;
        true
    }

    /// Consumes the pending message, if any. The message is moved out
    /// before interrupts can be restored, so a later arrival cannot
    /// clobber what the caller observes.
    pub(crate) fn take_msg(&mut self) -> Option<Message> {
        if !self.has_msg {
            return None;
        }
        self.has_msg = false;
        Some(self.msg)
    }

    /// Consumes a release token for semaphore `s`, if one is pending.
    ///
    /// A token for a *different* semaphore can only be left over from a
    /// wait that was forcibly torn down; it is dropped rather than allowed
    /// to excuse a future wait.
    pub(crate) fn take_grant(&mut self, s: Sid) -> bool {
        let g = core::mem::replace(&mut self.grant, Sid::NONE);
        g != Sid::NONE && g == s
    }
}

impl Kernel<'_> {
    /// Validates a caller-supplied pid, returning the table index of a
    /// live process.
    pub(crate) fn check_pid(&self, pid: Pid) -> KernResult<usize> {
        if pid.0 < 0 || pid.0 as usize >= NPROC {
            return Err(KernError::Sys);
        }
        let idx = pid.index();
        if self.procs[idx].state == ProcState::Free {
            return Err(KernError::Sys);
        }
        Ok(idx)
    }

    /// The pid of the currently executing process.
    pub fn current(&self) -> Pid {
        self.current
    }

    /// The priority of a live process.
    pub fn priority_of(&self, pid: Pid) -> KernResult<Priority> {
        let idx = self.check_pid(pid)?;
        Ok(self.procs[idx].prio)
    }

    /// Read access to a live process entry, for tools and tests.
    pub fn proc(&self, pid: Pid) -> KernResult<&Proc> {
        let idx = self.check_pid(pid)?;
        Ok(&self.procs[idx])
    }

    /// Number of live (non-`Free`) processes, including the null process.
    pub fn live_count(&self) -> u32 {
        self.live_procs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_truncate_at_the_field_width() {
        let mut p = Proc::FREE;
        p.set_name("a-name-that-is-way-too-long");
        assert_eq!(p.name(), "a-name-that-is-w");
        p.set_name("idle");
        assert_eq!(p.name(), "idle");
    }

    #[test]
    fn mailbox_is_single_slot() {
        let mut p = Proc::FREE;
        assert!(p.post_msg(17));
        assert!(!p.post_msg(18));
        assert_eq!(p.take_msg(), Some(17));
        assert_eq!(p.take_msg(), None);
    }

    #[test]
    fn mismatched_grant_is_dropped() {
        let mut p = Proc::FREE;
        p.grant = Sid(3);
        assert!(!p.take_grant(Sid(5)));
        // The stale token is gone, not banked.
        assert!(!p.take_grant(Sid(3)));
    }
}
