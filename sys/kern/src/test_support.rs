// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Shared scaffolding for the kernel test suite: a boot helper, spawn
//! shortcuts, and a whole-kernel audit of the structural invariants that
//! must hold whenever the system is quiescent.

use abi::{
    Pid, PortState, ProcState, Qid, SemState, Sid, MIN_STK, NPROC,
};

use crate::mem::NULL_OFF;
use crate::ports::MsgNode;
use crate::sched::Defer;
use crate::Kernel;

/// Opaque entry-point address used for test processes; nothing ever
/// jumps to it.
pub(crate) const TEST_ENTRY: u32 = 0x0100_0000;

/// Boots a kernel over a fresh 64 KiB arena.
pub(crate) fn boot_kernel() -> Kernel<'static> {
    let region = Box::leak(vec![0u8; 64 * 1024].into_boxed_slice());
    Kernel::new(region)
}

/// Creates and resumes one process. Note that resuming hands the CPU
/// over whenever the new process is at least as urgent as the caller.
pub(crate) fn spawn(k: &mut Kernel<'_>, name: &str, prio: i16) -> Pid {
    let pid = k.create(TEST_ENTRY, MIN_STK, prio, name, &[]).unwrap();
    k.resume(pid).unwrap();
    pid
}

/// Creates and resumes a batch under deferred rescheduling, so exactly
/// one switch happens at the end: to the most urgent of the batch, with
/// FIFO order among equals preserved.
pub(crate) fn spawn_all(
    k: &mut Kernel<'_>,
    specs: &[(&str, i16)],
) -> Vec<Pid> {
    k.resched_ctl(Defer::Start).unwrap();
    let pids = specs
        .iter()
        .map(|&(name, prio)| {
            let pid = k.create(TEST_ENTRY, MIN_STK, prio, name, &[]).unwrap();
            k.resume(pid).unwrap();
            pid
        })
        .collect();
    k.resched_ctl(Defer::Stop).unwrap();
    pids
}

/// Asserts every cross-table invariant. Call at quiescent points, not
/// from inside a deferral window.
pub(crate) fn check_invariants(k: &Kernel<'_>) {
    // A negative semaphore count means exactly that many processes are
    // parked on its queue, all in Wait and pointing back at it.
    for (i, sem) in k.sems.iter().enumerate() {
        if sem.state == SemState::Used && sem.count < 0 {
            assert_eq!(
                k.queues.len(sem.queue),
                (-sem.count) as usize,
                "sem {i}: count disagrees with its wait queue"
            );
            for pid in k.queues.ids(sem.queue) {
                let p = &k.procs[pid.index()];
                assert_eq!(p.state, ProcState::Wait, "pid {pid:?} on sem {i}");
                assert_eq!(p.sem, Sid(i as i32), "pid {pid:?} on sem {i}");
            }
        }
    }

    // Queue-borne states sit on exactly one queue; everything else sits
    // on none.
    for pid in 0..NPROC {
        let p = &k.procs[pid];
        if p.state == ProcState::Free {
            continue;
        }
        let on = |q: Qid| {
            k.queues
                .ids(q)
                .iter()
                .filter(|x| x.0 == pid as i32)
                .count()
        };
        let mut hits = on(k.ready_list) + on(k.sleepq);
        for sem in &k.sems {
            hits += on(sem.queue);
        }
        let expect = usize::from(p.state.on_a_queue());
        assert_eq!(
            hits, expect,
            "pid {pid} in state {:?} is on {hits} queues",
            p.state
        );
    }

    // The heap free list is ascending, fully coalesced, and accounted.
    let mut prev_end: Option<u32> = None;
    let mut total = 0;
    for (addr, len) in k.heap.blocks() {
        if let Some(end) = prev_end {
            assert!(
                addr > end,
                "free blocks out of order or touching at {addr:#x}"
            );
        }
        total += len;
        prev_end = Some(addr + len);
    }
    assert_eq!(total, k.heap.free_total(), "free byte accounting is off");

    // Port flow control: the receive semaphore counts queued messages,
    // the send semaphore counts leftover capacity. (A negative count
    // means blocked parties and is covered by the semaphore checks.)
    for (i, pt) in k.ports.iter().enumerate() {
        if pt.state != PortState::Alloc {
            continue;
        }
        let mut queued = 0u32;
        let mut node = pt.head;
        while node != NULL_OFF {
            queued += 1;
            node = k.heap.read::<MsgNode>(node).next;
        }
        let ssem = &k.sems[pt.ssem.index()];
        let rsem = &k.sems[pt.rsem.index()];
        if rsem.count >= 0 {
            assert_eq!(rsem.count as u32, queued, "port {i} receive count");
        }
        if ssem.count >= 0 {
            assert_eq!(
                ssem.count as u32 + queued,
                u32::from(pt.max_cnt),
                "port {i} capacity accounting"
            );
        }
    }

    // Whoever is running outranks (or ties) the head of the ready list.
    let cur = &k.procs[k.current.index()];
    assert!(
        i32::from(cur.prio) >= k.queues.first_key(k.ready_list),
        "a ready process outranks the running one"
    );
}
