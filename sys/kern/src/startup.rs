// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Kernel startup.
//!
//! Boot is handed one RAM region and carves everything out of it: the
//! free heap, the null process's stack, and the stacks of any processes
//! the boot descriptors name. Table sizing is static, so a boot that
//! cannot complete is a configuration error and panics rather than
//! limping onward.

use abi::{
    Pid, Priority, ProcDesc, ProcFlags, ProcState, MAX_POOLS, NSEM, PAGE_SIZE,
    QUANTUM, MIN_STK, NPROC, STACK_MAGIC,
};

use crate::arch;
use crate::bufpool::Pool;
use crate::mem::{Heap, NULL_OFF, WORD};
use crate::ports::Port;
use crate::proc::Proc;
use crate::queue::QueueTab;
use crate::sched::{Defer, DeferState};
use crate::sem::Sem;
use crate::Kernel;

impl<'r> Kernel<'r> {
    /// Boots a kernel over `region` with no processes beyond the null
    /// process.
    pub fn new(region: &'r mut [u8]) -> Self {
        Self::boot(region, &[])
    }

    /// Boots a kernel over `region` and starts the described processes,
    /// as if each had been created and (unless flagged) resumed. The
    /// most urgent runnable process is executing when this returns.
    ///
    /// # Panics
    ///
    /// On malformed descriptors or a region too small to hold the
    /// requested stacks — both configuration errors.
    pub fn boot(region: &'r mut [u8], boot_procs: &[ProcDesc]) -> Self {
        assert!(
            region.len() >= PAGE_SIZE as usize,
            "RAM region smaller than one page"
        );

        let mut queues = QueueTab::new();
        let ready_list = queues.alloc_queue();
        let sleepq = queues.alloc_queue();

        // Every semaphore's wait queue exists up front; the table sizing
        // accounts for exactly this many lists.
        let mut sems = [Sem::FREE; NSEM];
        for sem in &mut sems {
            sem.queue = queues.alloc_queue();
        }

        let mut kernel = Kernel {
            procs: [Proc::FREE; NPROC],
            queues,
            ready_list,
            sleepq,
            current: Pid::NULL,
            live_procs: 0,
            next_pid: 1,
            defer: DeferState::default(),
            preempt: QUANTUM,
            ms: 0,
            seconds: 0,
            sems,
            next_sem: 0,
            ports: [Port::FREE; abi::MAX_PORTS],
            pt_next: 0,
            pt_free: NULL_OFF,
            pt_inited: false,
            pools: [Pool::FREE; MAX_POOLS],
            npools: 0,
            heap: Heap::new(region),
        };

        kernel.start_null_proc();
        kernel.start_boot_procs(boot_procs);
        kernel
    }

    /// Hand-builds pid 0: a runnable idle loop at priority 0. It keeps
    /// the ready list from ever draining, which is why it may never
    /// sleep, block, or die.
    fn start_null_proc(&mut self) {
        let tos = match self.heap.get_stk(MIN_STK) {
            Ok(tos) => tos,
            Err(_) => panic!("no RAM for the null process stack"),
        };
        self.heap.write::<u32>(tos, STACK_MAGIC);
        let base = tos + WORD - MIN_STK;
        let frame = self.heap.bytes_mut(base, MIN_STK - WORD);
        let sp = arch::seed_initial_frame(
            frame,
            base,
            arch::IDLE_ENTRY,
            &[],
            arch::USER_RET,
        );

        let null = &mut self.procs[0];
        null.init(Priority(0), "prnull", Pid::NULL);
        null.state = ProcState::Curr;
        null.stkptr = sp;
        null.stkbase = tos;
        null.stklen = MIN_STK;
        self.live_procs = 1;
    }

    fn start_boot_procs(&mut self, descs: &[ProcDesc]) {
        // One reschedule once everything is in place, however many
        // processes boot starts.
        self.resched_ctl(Defer::Start).ok();
        for desc in descs {
            assert!(
                !desc.flags.intersects(ProcFlags::RESERVED),
                "reserved flags set on {}",
                desc.name
            );
            let pid = match self.create(
                desc.entry,
                desc.stack_size,
                desc.priority,
                desc.name,
                &[],
            ) {
                Ok(pid) => pid,
                Err(e) => panic!("cannot start {}: {:?}", desc.name, e),
            };
            if !desc.flags.contains(ProcFlags::START_SUSPENDED) {
                self.ready(pid).ok();
            }
        }
        self.resched_ctl(Defer::Stop).ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::*;

    #[test]
    fn boot_builds_the_null_process() {
        let k = boot_kernel();
        let null = k.proc(Pid::NULL).unwrap();
        assert_eq!(null.state(), ProcState::Curr);
        assert_eq!(null.priority(), Priority(0));
        assert_eq!(null.name(), "prnull");
        assert_eq!(k.live_count(), 1);
        assert_eq!(k.heap.read::<u32>(null.stkbase), STACK_MAGIC);
        check_invariants(&k);
    }

    #[test]
    fn boot_descriptors_start_processes() {
        let region = Box::leak(vec![0u8; 64 * 1024].into_boxed_slice());
        let k = Kernel::boot(
            region,
            &[
                ProcDesc {
                    entry: 0x4000,
                    stack_size: 1024,
                    priority: 10,
                    name: "logger",
                    flags: ProcFlags::empty(),
                },
                ProcDesc {
                    entry: 0x5000,
                    stack_size: 1024,
                    priority: 30,
                    name: "main",
                    flags: ProcFlags::empty(),
                },
                ProcDesc {
                    entry: 0x6000,
                    stack_size: 1024,
                    priority: 40,
                    name: "debugger",
                    flags: ProcFlags::START_SUSPENDED,
                },
            ],
        );

        // The most urgent runnable boot process is on the CPU; the
        // suspended one is waiting for someone to resume it.
        assert_eq!(k.proc(k.current()).unwrap().name(), "main");
        let by_name = |n: &str| {
            (0..NPROC)
                .map(|i| Pid(i as i32))
                .find(|&p| {
                    k.proc(p).map(|e| e.name() == n).unwrap_or(false)
                })
                .unwrap()
        };
        assert_eq!(
            k.proc(by_name("logger")).unwrap().state(),
            ProcState::Ready
        );
        assert_eq!(
            k.proc(by_name("debugger")).unwrap().state(),
            ProcState::Susp
        );
        assert_eq!(k.live_count(), 4);
        check_invariants(&k);
    }
}
