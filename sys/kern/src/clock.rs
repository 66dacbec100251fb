// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The clock: timed delays and quantum preemption.
//!
//! Sleeping processes live on a single delta list. Each node's key is the
//! delay beyond its predecessor, so the whole list ages by decrementing
//! only the head; a key reaching zero means "same tick as the node in
//! front". The tick handler also runs down the running process's quantum
//! and forces a reschedule when it expires.

use abi::{
    Completion, KernError, KernResult, Pid, ProcState, MAX_SECONDS, QUANTUM,
};

use crate::arch;
use crate::sched::Defer;
use crate::Kernel;

impl Kernel<'_> {
    /// The clock interrupt entry point, to be invoked once per
    /// millisecond. Runs with interrupts implicitly masked; the guard here
    /// models that mask so nesting is accounted for on every path.
    pub fn clk_handler(&mut self) {
        let _irq = arch::IrqGuard::hold();

        self.ms += 1;
        if self.ms >= 1000 {
            self.ms = 0;
            self.seconds += 1;
        }

        if !self.queues.is_empty(self.sleepq) {
            let head = self.queues.first_id(self.sleepq);
            let key = self.queues.key(head) - 1;
            self.queues.set_key(head, key);
            if key <= 0 {
                self.wakeup();
            }
        }

        self.preempt = self.preempt.saturating_sub(1);
        if self.preempt == 0 {
            self.preempt = QUANTUM;
            self.resched();
        }
    }

    /// Readies every sleeper whose delay has run out. A batch of same-tick
    /// wakeups performs at most one context switch.
    pub(crate) fn wakeup(&mut self) {
        self.resched_ctl(Defer::Start).ok();
        while !self.queues.is_empty(self.sleepq)
            && self.queues.first_key(self.sleepq) <= 0
        {
            let pid = match self.queues.dequeue(self.sleepq) {
                Ok(pid) => pid,
                Err(_) => break,
            };
            if self.ready(pid).is_err() {
                break;
            }
        }
        self.resched_ctl(Defer::Stop).ok();
    }

    /// Delays the calling process `delay` seconds.
    pub fn sleep(&mut self, delay: u32) -> KernResult<Completion<()>> {
        if delay > MAX_SECONDS {
            return Err(KernError::Sys);
        }
        self.sleep_ms(delay * 1000)
    }

    /// Delays the calling process `delay_ms` milliseconds. A zero delay
    /// yields the CPU instead of sleeping.
    pub fn sleep_ms(&mut self, delay_ms: u32) -> KernResult<Completion<()>> {
        let _irq = arch::IrqGuard::hold();

        if delay_ms == 0 {
            self.resched();
            return Ok(Completion::Done(()));
        }
        if delay_ms > i32::MAX as u32 {
            return Err(KernError::Sys);
        }
        if self.current == Pid::NULL {
            // The null process keeps the ready list non-empty; it never
            // sleeps.
            return Err(KernError::Sys);
        }

        let me = self.current;
        self.queues.insert_delta(me, self.sleepq, delay_ms as i32);
        self.procs[me.index()].state = ProcState::Sleep;
        self.resched();

        Ok(if self.procs[me.index()].state == ProcState::Curr {
            Completion::Done(())
        } else {
            Completion::Pending
        })
    }

    /// Removes a process from the sleep queue before its delay expires.
    ///
    /// The node being removed still owes its residual delay to everything
    /// behind it, so that delay is added back onto the successor before
    /// unlinking. The process is left off every queue; the caller decides
    /// what happens to it next (usually `ready`).
    pub fn unsleep(&mut self, pid: Pid) -> KernResult<()> {
        let _irq = arch::IrqGuard::hold();
        let idx = self.check_pid(pid)?;

        if !self.procs[idx].state.is_sleeping() {
            return Err(KernError::Sys);
        }

        let node = abi::Qid(pid.0 as i16);
        let next = self.queues.next_id(node);
        if crate::queue::QueueTab::is_proc_node(next) {
            let carried = self.queues.key(node) + self.queues.key(next);
            self.queues.set_key(next, carried);
        }
        self.queues.get_item(pid);
        Ok(())
    }

    /// Seconds since boot, plus the milliseconds accumulated toward the
    /// next second.
    pub fn uptime(&self) -> (u32, u32) {
        (self.seconds, self.ms)
    }
}
