// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Process lifecycle: create, kill, resume, suspend, chprio.
//!
//! Create provisions a stack from the top of the RAM region, writes the
//! overflow marker into its highest word, and has the architecture layer
//! seed a synthetic saved context below it, so the new process looks to
//! the context switch exactly like one that was suspended mid-run. The
//! process starts suspended; its creator decides when it first runs.

use abi::{
    KernError, KernResult, Pid, Priority, ProcState, MIN_STK, NPROC,
    STACK_MAGIC,
};

use crate::arch;
use crate::mem::{round_blk, WORD};
use crate::proc::Proc;
use crate::Kernel;

impl Kernel<'_> {
    /// Creates a process that will begin executing at `entry` with `args`
    /// when first resumed. Returns the new pid; the process is left
    /// suspended.
    ///
    /// When `entry` returns, control transfers to the architecture's
    /// user-return trampoline, which kills the process.
    pub fn create(
        &mut self,
        entry: u32,
        stack_size: u32,
        priority: i16,
        name: &str,
        args: &[u32],
    ) -> KernResult<Pid> {
        let _irq = arch::IrqGuard::hold();
        if priority < 1 {
            return Err(KernError::Sys);
        }
        let ssize = round_blk(stack_size.max(MIN_STK))?;

        let pid = self.newpid()?;
        let tos = self.heap.get_stk(ssize)?;
        self.heap.write::<u32>(tos, STACK_MAGIC);

        let base = tos + WORD - ssize;
        let frame = self.heap.bytes_mut(base, ssize - WORD);
        let sp =
            arch::seed_initial_frame(frame, base, entry, args, arch::USER_RET);

        let idx = pid.index();
        self.procs[idx].init(Priority(priority), name, self.current);
        self.procs[idx].stkptr = sp;
        self.procs[idx].stkbase = tos;
        self.procs[idx].stklen = ssize;
        self.live_procs += 1;
        Ok(pid)
    }

    /// Round-robin pid allocation; slot 0 is permanently the null
    /// process, so the scan naturally skips it.
    fn newpid(&mut self) -> KernResult<Pid> {
        for _ in 0..NPROC {
            self.next_pid %= NPROC;
            let idx = self.next_pid;
            self.next_pid += 1;
            if self.procs[idx].state == ProcState::Free {
                return Ok(Pid(idx as i32));
            }
        }
        Err(KernError::Sys)
    }

    /// Terminates a process, whatever it is doing: unlinks it from the
    /// queue its state implies, repays a semaphore it was charged against,
    /// frees its stack, and releases the slot. Killing the running
    /// process switches away and never returns to it.
    pub fn kill(&mut self, pid: Pid) -> KernResult<()> {
        let _irq = arch::IrqGuard::hold();
        let idx = self.check_pid(pid)?;
        if pid == Pid::NULL {
            return Err(KernError::Sys);
        }

        match self.procs[idx].state {
            ProcState::Curr => {
                self.reap(idx);
                self.resched();
            }
            ProcState::Ready => {
                self.queues.get_item(pid);
                self.reap(idx);
            }
            ProcState::Wait => {
                // The dead waiter no longer counts against the semaphore.
                let sem = self.procs[idx].sem;
                self.sems[sem.index()].count += 1;
                self.queues.get_item(pid);
                self.reap(idx);
            }
            ProcState::Sleep | ProcState::RecvTime => {
                self.unsleep(pid)?;
                self.reap(idx);
            }
            ProcState::Susp | ProcState::Recv => {
                self.reap(idx);
            }
            ProcState::Free => return Err(KernError::Sys),
        }
        Ok(())
    }

    fn reap(&mut self, idx: usize) {
        let tos = self.procs[idx].stkbase;
        let len = self.procs[idx].stklen;
        self.heap.free_stk(tos, len).ok();
        self.live_procs -= 1;
        self.procs[idx] = Proc::FREE;
    }

    /// Takes a suspended process back to readiness. Returns the priority
    /// it resumed at.
    pub fn resume(&mut self, pid: Pid) -> KernResult<Priority> {
        let _irq = arch::IrqGuard::hold();
        let idx = self.check_pid(pid)?;
        if self.procs[idx].state != ProcState::Susp {
            return Err(KernError::Sys);
        }
        // Snapshot before readying: the caller may be preempted the
        // moment the target hits the ready list.
        let prio = self.procs[idx].prio;
        self.ready(pid)?;
        Ok(prio)
    }

    /// Suspends a ready or running process (the null process excepted).
    /// Returns the priority it held when suspension took effect.
    pub fn suspend(&mut self, pid: Pid) -> KernResult<Priority> {
        let _irq = arch::IrqGuard::hold();
        let idx = self.check_pid(pid)?;
        if pid == Pid::NULL {
            return Err(KernError::Sys);
        }

        match self.procs[idx].state {
            ProcState::Ready => {
                self.queues.get_item(pid);
                self.procs[idx].state = ProcState::Susp;
            }
            ProcState::Curr => {
                self.procs[idx].state = ProcState::Susp;
                self.resched();
            }
            _ => return Err(KernError::Sys),
        }
        Ok(self.procs[idx].prio)
    }

    /// Changes a process's priority, repositioning it in the ready list
    /// if it is queued there. Returns the old priority.
    pub fn chprio(&mut self, pid: Pid, new_prio: i16) -> KernResult<Priority> {
        let _irq = arch::IrqGuard::hold();
        let idx = self.check_pid(pid)?;
        if new_prio < 1 {
            return Err(KernError::Sys);
        }

        let old = self.procs[idx].prio;
        self.procs[idx].prio = Priority(new_prio);
        match self.procs[idx].state {
            ProcState::Ready => {
                self.queues.get_item(pid);
                self.queues
                    .insert(pid, self.ready_list, i32::from(new_prio));
                self.resched();
            }
            ProcState::Curr => self.resched(),
            _ => {}
        }
        Ok(old)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::*;
    use abi::{CONSOLE, NDESC};

    #[test]
    fn create_leaves_the_process_suspended() {
        let mut k = boot_kernel();
        let pid = k
            .create(TEST_ENTRY, MIN_STK, 25, "worker", &[])
            .unwrap();
        let p = k.proc(pid).unwrap();
        assert_eq!(p.state(), ProcState::Susp);
        assert_eq!(p.priority(), Priority(25));
        assert_eq!(p.name(), "worker");
        assert_eq!(p.parent(), Pid::NULL);
        assert_eq!(k.live_count(), 2);
        // Creation alone never schedules.
        assert_eq!(k.current(), Pid::NULL);
    }

    #[test]
    fn create_binds_standard_descriptors_to_the_console() {
        let mut k = boot_kernel();
        let pid = k.create(TEST_ENTRY, MIN_STK, 5, "io", &[]).unwrap();
        let desc = k.proc(pid).unwrap().desc;
        assert_eq!(&desc[..3], &[CONSOLE; 3]);
        assert_eq!(&desc[3..], &[-1; NDESC - 3]);
    }

    #[test]
    fn create_seeds_the_stack() {
        let mut k = boot_kernel();
        let args = [7, 8, 9];
        let pid = k
            .create(TEST_ENTRY, MIN_STK, 5, "seeded", &args)
            .unwrap();
        let p = *k.proc(pid).unwrap();

        // Overflow marker in the top word.
        assert_eq!(k.heap.read::<u32>(p.stkbase), STACK_MAGIC);
        // The synthetic frame: callee-save area at the stack pointer,
        // then the entry word, the return trampoline, and the arguments.
        let ctx = arch::CTX_WORDS as u32;
        assert_eq!(k.heap.read::<u32>(p.stkptr + ctx * WORD), TEST_ENTRY);
        assert_eq!(
            k.heap.read::<u32>(p.stkptr + (ctx + 1) * WORD),
            arch::USER_RET
        );
        for (i, &arg) in args.iter().enumerate() {
            assert_eq!(
                k.heap
                    .read::<u32>(p.stkptr + (ctx + 2 + i as u32) * WORD),
                arg
            );
        }
        assert!(p.stkptr < p.stkbase);
    }

    #[test]
    fn create_rejects_priorities_below_one() {
        let mut k = boot_kernel();
        assert_eq!(
            k.create(TEST_ENTRY, MIN_STK, 0, "p", &[]),
            Err(KernError::Sys)
        );
        assert_eq!(
            k.create(TEST_ENTRY, MIN_STK, -4, "p", &[]),
            Err(KernError::Sys)
        );
    }

    #[test]
    fn pid_allocation_wraps_round_robin() {
        let mut k = boot_kernel();
        let a = k.create(TEST_ENTRY, MIN_STK, 5, "a", &[]).unwrap();
        let b = k.create(TEST_ENTRY, MIN_STK, 5, "b", &[]).unwrap();
        assert_eq!(b.0, a.0 + 1);
        k.kill(a).unwrap();
        // The freed slot is not reused while later slots remain free.
        let c = k.create(TEST_ENTRY, MIN_STK, 5, "c", &[]).unwrap();
        assert_eq!(c.0, b.0 + 1);
    }

    #[test]
    fn a_full_process_table_fails_create() {
        let mut k = boot_kernel();
        for i in 0..NPROC - 1 {
            k.create(TEST_ENTRY, MIN_STK, 5, "filler", &[])
                .unwrap_or_else(|e| panic!("create {i}: {e:?}"));
        }
        assert_eq!(
            k.create(TEST_ENTRY, MIN_STK, 5, "extra", &[]),
            Err(KernError::Sys)
        );
    }

    #[test]
    fn kill_restores_the_heap() {
        let mut k = boot_kernel();
        let free_before = k.heap.free_total();
        let pid = k.create(TEST_ENTRY, 2048, 5, "p", &[]).unwrap();
        assert!(k.heap.free_total() < free_before);
        k.kill(pid).unwrap();
        assert_eq!(k.heap.free_total(), free_before);
        assert_eq!(k.live_count(), 1);
        check_invariants(&k);
    }

    #[test]
    fn kill_unlinks_a_ready_process() {
        let mut k = boot_kernel();
        let p = spawn(&mut k, "p", 20);
        let q = spawn(&mut k, "q", 30);
        assert_eq!(k.current(), q);
        k.kill(p).unwrap();
        assert_eq!(k.check_pid(p), Err(KernError::Sys));
        check_invariants(&k);
    }

    #[test]
    fn kill_repays_a_waited_semaphore() {
        let mut k = boot_kernel();
        let p = spawn(&mut k, "p", 20);
        let s = k.sem_create(0).unwrap();
        assert!(k.wait(s).unwrap().is_pending());
        assert_eq!(k.sems[s.index()].count, -1);

        k.kill(p).unwrap();
        assert_eq!(k.sems[s.index()].count, 0);
        assert_eq!(k.queues.len(k.sems[s.index()].queue), 0);
        check_invariants(&k);
    }

    #[test]
    fn kill_unsleeps_a_sleeper_without_disturbing_others() {
        let mut k = boot_kernel();
        let ps = spawn_all(&mut k, &[("a", 20), ("b", 20)]);
        let (a, b) = (ps[0], ps[1]);
        assert!(k.sleep_ms(3).unwrap().is_pending());
        assert!(k.sleep_ms(9).unwrap().is_pending());

        k.kill(a).unwrap();
        // b still wakes at t=9.
        for _ in 0..8 {
            k.clk_handler();
        }
        assert_eq!(k.proc(b).unwrap().state(), ProcState::Sleep);
        k.clk_handler();
        assert_ne!(k.proc(b).unwrap().state(), ProcState::Sleep);
        check_invariants(&k);
    }

    #[test]
    fn killing_the_running_process_switches_away() {
        let mut k = boot_kernel();
        let p = spawn(&mut k, "p", 20);
        assert_eq!(k.current(), p);
        k.kill(p).unwrap();
        assert_eq!(k.current(), Pid::NULL);
        assert_eq!(k.check_pid(p), Err(KernError::Sys));
        check_invariants(&k);
    }

    #[test]
    fn the_null_process_is_immortal() {
        let mut k = boot_kernel();
        assert_eq!(k.kill(Pid::NULL), Err(KernError::Sys));
        assert_eq!(k.suspend(Pid::NULL), Err(KernError::Sys));
    }

    #[test]
    fn resume_returns_the_prior_priority() {
        let mut k = boot_kernel();
        let pid = k.create(TEST_ENTRY, MIN_STK, 35, "p", &[]).unwrap();
        assert_eq!(k.resume(pid), Ok(Priority(35)));
        assert_eq!(k.current(), pid);
        // Resuming a process that is not suspended fails.
        assert_eq!(k.resume(pid), Err(KernError::Sys));
    }

    #[test]
    fn suspend_parks_ready_and_running_processes() {
        let mut k = boot_kernel();
        let ps = spawn_all(&mut k, &[("a", 20), ("b", 10)]);
        let (a, b) = (ps[0], ps[1]);

        // b is merely ready; suspending it just unlinks it.
        assert_eq!(k.suspend(b), Ok(Priority(10)));
        assert_eq!(k.proc(b).unwrap().state(), ProcState::Susp);
        assert_eq!(k.current(), a);

        // Suspending the running process gives up the CPU.
        assert_eq!(k.suspend(a), Ok(Priority(20)));
        assert_eq!(k.current(), Pid::NULL);
        assert_eq!(k.proc(a).unwrap().state(), ProcState::Susp);
        check_invariants(&k);
    }

    #[test]
    fn suspend_rejects_blocked_processes() {
        let mut k = boot_kernel();
        let p = spawn(&mut k, "p", 20);
        let s = k.sem_create(0).unwrap();
        assert!(k.wait(s).unwrap().is_pending());
        assert_eq!(k.suspend(p), Err(KernError::Sys));
    }

    #[test]
    fn chprio_repositions_a_ready_process() {
        let mut k = boot_kernel();
        let ps = spawn_all(&mut k, &[("a", 20), ("b", 10)]);
        let (a, b) = (ps[0], ps[1]);
        assert_eq!(k.current(), a);

        // Boosting b above a preempts immediately.
        assert_eq!(k.chprio(b, 30), Ok(Priority(10)));
        assert_eq!(k.current(), b);
        assert_eq!(k.proc(a).unwrap().state(), ProcState::Ready);

        // Dropping b below a hands the CPU back.
        assert_eq!(k.chprio(b, 5), Ok(Priority(30)));
        assert_eq!(k.current(), a);
        check_invariants(&k);
    }

    #[test]
    fn chprio_rejects_bad_arguments() {
        let mut k = boot_kernel();
        let p = spawn(&mut k, "p", 20);
        assert_eq!(k.chprio(p, 0), Err(KernError::Sys));
        assert_eq!(k.chprio(Pid(77), 5), Err(KernError::Sys));
    }
}
