// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The scheduler: strict highest-priority-first, preemptive, FIFO among
//! equals.
//!
//! `resched` is the only place a context switch happens. Everything else —
//! readying a process, signaling a semaphore, the clock running out a
//! quantum — funnels through it. The deferral latch turns a burst of
//! resched requests (say, a batch of same-tick wakeups) into at most one
//! actual switch.

use abi::{KernError, KernResult, Pid, ProcState, QUANTUM};

use crate::arch;
use crate::Kernel;

/// Commands for the deferral latch.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Defer {
    /// Begin (or nest) a deferral window.
    Start,
    /// End one level of deferral; the last stop replays a deferred
    /// reschedule if one was attempted.
    Stop,
}

/// The deferral latch: a balanced counter plus a note of whether anyone
/// tried to reschedule while it was held.
#[derive(Copy, Clone, Debug, Default)]
pub(crate) struct DeferState {
    pub(crate) ndefers: u32,
    pub(crate) attempt: bool,
}

impl Kernel<'_> {
    /// Picks the highest-priority ready process and switches to it.
    ///
    /// Must be called with interrupts disabled. If the running process is
    /// still the most urgent, this is a no-op; otherwise it is demoted
    /// back into the ready list (behind its priority peers) and the head
    /// of the list takes over. A caller that wants to give up the CPU for
    /// some other reason changes the current process's state first, and
    /// this function then switches away without requeueing it.
    pub(crate) fn resched(&mut self) {
        debug_assert!(arch::interrupts_disabled());

        if self.defer.ndefers > 0 {
            self.defer.attempt = true;
            return;
        }

        let old = self.current.index();
        if self.procs[old].state == ProcState::Curr {
            if i32::from(self.procs[old].prio)
                > self.queues.first_key(self.ready_list)
            {
                // Nothing ready outranks us.
                return;
            }
            self.procs[old].state = ProcState::Ready;
            let key = i32::from(self.procs[old].prio);
            self.queues.insert(self.current, self.ready_list, key);
        }

        // The null process is always runnable, so the ready list cannot be
        // empty here.
        let next = match self.queues.dequeue(self.ready_list) {
            Ok(pid) => pid,
            Err(_) => panic!("ready list empty"),
        };
        self.current = next;
        let new = next.index();
        self.procs[new].state = ProcState::Curr;
        self.preempt = QUANTUM;

        let new_sp = self.procs[new].stkptr;
        arch::ctxsw(&mut self.procs[old].stkptr, new_sp);
        // On hardware we are now executing as `next`; the old process
        // resumes here when it is next dispatched.
    }

    /// Starts or stops deferred rescheduling.
    ///
    /// Starts nest; stops must balance them, and an unmatched stop is an
    /// error. When the last stop lands and a reschedule was attempted
    /// during the window, it runs now, exactly once.
    pub fn resched_ctl(&mut self, cmd: Defer) -> KernResult<()> {
        let _irq = arch::IrqGuard::hold();
        match cmd {
            Defer::Start => {
                if self.defer.ndefers == 0 {
                    self.defer.attempt = false;
                }
                self.defer.ndefers += 1;
                Ok(())
            }
            Defer::Stop => {
                if self.defer.ndefers == 0 {
                    return Err(KernError::Sys);
                }
                self.defer.ndefers -= 1;
                if self.defer.ndefers == 0 && self.defer.attempt {
                    self.resched();
                }
                Ok(())
            }
        }
    }

    /// Makes `pid` eligible to run and reschedules.
    ///
    /// The caller is responsible for `pid` not already being on a queue;
    /// this is how a process leaves `Susp`, `Recv`, `Wait`, or the sleep
    /// list, not a way to poke an already-ready process.
    pub fn ready(&mut self, pid: Pid) -> KernResult<()> {
        let _irq = arch::IrqGuard::hold();
        let idx = self.check_pid(pid)?;

        self.procs[idx].state = ProcState::Ready;
        let key = i32::from(self.procs[idx].prio);
        self.queues.insert(pid, self.ready_list, key);
        self.resched();
        Ok(())
    }

    /// Voluntarily yields the CPU. Equal-priority peers get a turn; if
    /// nothing of equal or higher priority is ready, the caller keeps
    /// running.
    pub fn yield_cpu(&mut self) {
        let _irq = arch::IrqGuard::hold();
        self.resched();
    }
}
