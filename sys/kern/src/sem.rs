// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Counting semaphores with FIFO waiter queues.
//!
//! The count carries the whole story: a positive count is the number of
//! waits that can proceed immediately, and a negative count is the number
//! of processes parked on the wait queue. Release order is strictly FIFO.
//!
//! A release (signal, delete, reset) deposits a one-shot grant token in
//! the process it frees. The wait path consumes the token on resumption,
//! which keeps the count exact whether the wait completes inside its
//! original frame (hardware) or by being re-issued (hosted builds).

use abi::{
    Completion, KernError, KernResult, Pid, ProcState, Qid, SemState, Sid,
    NSEM,
};

use crate::arch;
use crate::sched::Defer;
use crate::Kernel;

/// One semaphore-table entry.
#[derive(Copy, Clone, Debug)]
pub(crate) struct Sem {
    pub(crate) state: SemState,
    /// Positive: waits that won't block. Negative: number of queued
    /// waiters.
    pub(crate) count: i32,
    /// Wait queue; allocated once at boot and kept across free/reuse.
    pub(crate) queue: Qid,
}

impl Sem {
    pub(crate) const FREE: Self = Self {
        state: SemState::Free,
        count: 0,
        queue: Qid::NONE,
    };
}

impl Kernel<'_> {
    /// Validates a caller-supplied semaphore id, returning its index if
    /// the entry is live.
    fn check_sem(&self, sem: Sid) -> KernResult<usize> {
        if sem.0 < 0 || sem.0 as usize >= NSEM {
            return Err(KernError::Sys);
        }
        let idx = sem.index();
        if self.sems[idx].state == SemState::Free {
            return Err(KernError::Sys);
        }
        Ok(idx)
    }

    /// Allocates a semaphore with the given initial count.
    pub fn sem_create(&mut self, count: i32) -> KernResult<Sid> {
        let _irq = arch::IrqGuard::hold();
        if count < 0 {
            return Err(KernError::Sys);
        }

        // Round-robin scan so freshly deleted ids are not immediately
        // recycled.
        for step in 0..NSEM {
            let idx = (self.next_sem + step) % NSEM;
            if self.sems[idx].state == SemState::Free {
                self.next_sem = (idx + 1) % NSEM;
                self.sems[idx].state = SemState::Used;
                self.sems[idx].count = count;
                return Ok(Sid(idx as i32));
            }
        }
        Err(KernError::Empty)
    }

    /// Frees a semaphore, readying every queued waiter. The freed waiters
    /// resume as if signaled; operations that need to notice the deletion
    /// (ports) do so through their own state checks.
    pub fn sem_delete(&mut self, sem: Sid) -> KernResult<()> {
        let _irq = arch::IrqGuard::hold();
        let idx = self.check_sem(sem)?;

        self.sems[idx].state = SemState::Free;
        self.drain_waiters(idx, sem);
        self.sems[idx].count = 0;
        Ok(())
    }

    /// Resets a live semaphore to a new count, readying every queued
    /// waiter first.
    pub fn sem_reset(&mut self, sem: Sid, count: i32) -> KernResult<()> {
        let _irq = arch::IrqGuard::hold();
        if count < 0 {
            return Err(KernError::Sys);
        }
        let idx = self.check_sem(sem)?;

        self.drain_waiters(idx, sem);
        self.sems[idx].count = count;
        Ok(())
    }

    /// Readies every waiter on semaphore `idx`, walking the count back up
    /// to zero. One reschedule for the whole batch.
    fn drain_waiters(&mut self, idx: usize, sem: Sid) {
        self.resched_ctl(Defer::Start).ok();
        while self.sems[idx].count < 0 {
            self.sems[idx].count += 1;
            let pid = match self.queues.dequeue(self.sems[idx].queue) {
                Ok(pid) => pid,
                Err(_) => break,
            };
            self.procs[pid.index()].grant = sem;
            if self.ready(pid).is_err() {
                break;
            }
        }
        self.resched_ctl(Defer::Stop).ok();
    }

    /// Decrements the count, parking the caller FIFO on the wait queue if
    /// it goes negative.
    pub fn wait(&mut self, sem: Sid) -> KernResult<Completion<()>> {
        let _irq = arch::IrqGuard::hold();
        let me = self.current;

        // A release already paid for this wait. This is checked before
        // the id is validated: a waiter freed by a delete completes
        // normally, exactly as it would resuming inside its original
        // frame, even though the id is dead by then.
        if self.procs[me.index()].take_grant(sem) {
            return Ok(Completion::Done(()));
        }

        let idx = self.check_sem(sem)?;
        if me == Pid::NULL {
            // The null process keeps the ready list non-empty; it never
            // blocks.
            return Err(KernError::Sys);
        }

        self.sems[idx].count -= 1;
        if self.sems[idx].count < 0 {
            self.procs[me.index()].state = ProcState::Wait;
            self.procs[me.index()].sem = sem;
            self.queues.enqueue(me, self.sems[idx].queue);
            self.resched();
            // We resume here once released; the grant token says whether
            // that has happened yet.
            return Ok(if self.procs[me.index()].take_grant(sem) {
                Completion::Done(())
            } else {
                Completion::Pending
            });
        }
        Ok(Completion::Done(()))
    }

    /// Increments the count, releasing the longest-waiting process if any
    /// were queued.
    pub fn signal(&mut self, sem: Sid) -> KernResult<()> {
        let _irq = arch::IrqGuard::hold();
        let idx = self.check_sem(sem)?;

        let old = self.sems[idx].count;
        self.sems[idx].count += 1;
        if old < 0 {
            let pid = self.queues.dequeue(self.sems[idx].queue)?;
            self.procs[pid.index()].grant = sem;
            self.ready(pid)?;
        }
        Ok(())
    }
}
