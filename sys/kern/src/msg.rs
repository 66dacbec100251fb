// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Direct messaging: one-word messages delivered straight into a
//! process's mailbox.
//!
//! The mailbox is a single slot. A second send to a process with an
//! undelivered message fails rather than overwriting; there is no queue
//! here. Receivers can block indefinitely, poll, or block with a timeout
//! riding the sleep delta list.

use abi::{
    Completion, KernError, KernResult, Message, Pid, ProcState, TIMEOUT_MSG,
};

use crate::arch;
use crate::Kernel;

impl Kernel<'_> {
    /// Delivers `msg` to `pid`, waking it if it was blocked receiving.
    ///
    /// Fails if the target is dead or already has an undelivered message.
    pub fn send(&mut self, pid: Pid, msg: Message) -> KernResult<()> {
        let _irq = arch::IrqGuard::hold();
        let idx = self.check_pid(pid)?;

        if !self.procs[idx].post_msg(msg) {
            return Err(KernError::Sys);
        }

        match self.procs[idx].state {
            ProcState::Recv => self.ready(pid)?,
            ProcState::RecvTime => {
                self.unsleep(pid)?;
                self.ready(pid)?;
            }
            _ => {}
        }
        Ok(())
    }

    /// Waits for a message and returns it.
    ///
    /// If the mailbox is empty the caller blocks in `Recv` until a sender
    /// readies it; the message is consumed into a local before the
    /// interrupt mask is restored, so a subsequent send cannot clobber
    /// what this call returns.
    pub fn receive(&mut self) -> KernResult<Completion<Message>> {
        let _irq = arch::IrqGuard::hold();
        let me = self.current;
        if me == Pid::NULL {
            return Err(KernError::Sys);
        }

        if !self.procs[me.index()].has_msg {
            self.procs[me.index()].state = ProcState::Recv;
            self.resched();
            // We resume here once a sender has filled the mailbox.
        }

        Ok(match self.procs[me.index()].take_msg() {
            Some(msg) => Completion::Done(msg),
            None => Completion::Pending,
        })
    }

    /// Consumes a pending message without blocking.
    pub fn recv_clr(&mut self) -> KernResult<Message> {
        let _irq = arch::IrqGuard::hold();
        let me = self.current.index();
        self.procs[me].take_msg().ok_or(KernError::Empty)
    }

    /// Waits at most `ticks` milliseconds for a message; yields the
    /// message, or `TIMEOUT_MSG` if the delay expired first.
    pub fn recv_time(&mut self, ticks: i32) -> KernResult<Completion<Message>> {
        let _irq = arch::IrqGuard::hold();
        if ticks <= 0 {
            return Err(KernError::Sys);
        }
        let me = self.current;
        if me == Pid::NULL {
            return Err(KernError::Sys);
        }

        if !self.procs[me.index()].has_msg {
            self.queues.insert_delta(me, self.sleepq, ticks);
            self.procs[me.index()].state = ProcState::RecvTime;
            self.resched();

            if self.procs[me.index()].state != ProcState::Curr {
                return Ok(Completion::Pending);
            }
            // Resumed: either a sender pulled us off the sleep list, or
            // the clock ran the delay out.
            if !self.procs[me.index()].has_msg {
                return Ok(Completion::Done(TIMEOUT_MSG));
            }
        }

        Ok(match self.procs[me.index()].take_msg() {
            Some(msg) => Completion::Done(msg),
            None => Completion::Pending,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::*;

    #[test]
    fn send_then_receive_without_blocking() {
        let mut k = boot_kernel();
        let p = spawn(&mut k, "p", 20);
        k.send(p, 0xCAFE).unwrap();
        assert_eq!(k.receive(), Ok(Completion::Done(0xCAFE)));
    }

    #[test]
    fn second_send_does_not_overwrite() {
        let mut k = boot_kernel();
        let p = spawn(&mut k, "p", 20);
        k.send(p, 1).unwrap();
        assert_eq!(k.send(p, 2), Err(KernError::Sys));
        assert_eq!(k.recv_clr(), Ok(1));
    }

    #[test]
    fn send_to_a_dead_pid_fails() {
        let mut k = boot_kernel();
        assert_eq!(k.send(Pid(42), 1), Err(KernError::Sys));
    }

    #[test]
    fn receive_blocks_until_a_sender_arrives() {
        let mut k = boot_kernel();
        let ps = spawn_all(&mut k, &[("rx", 30), ("tx", 20)]);
        let (rx, tx) = (ps[0], ps[1]);

        assert_eq!(k.current(), rx);
        assert!(k.receive().unwrap().is_pending());
        assert_eq!(k.proc(rx).unwrap().state(), ProcState::Recv);

        // tx runs now; its send readies rx, which preempts immediately.
        assert_eq!(k.current(), tx);
        k.send(rx, 0x1234).unwrap();
        assert_eq!(k.current(), rx);
        assert_eq!(k.receive(), Ok(Completion::Done(0x1234)));
        check_invariants(&k);
    }

    #[test]
    fn recv_clr_reports_empty() {
        let mut k = boot_kernel();
        spawn(&mut k, "p", 20);
        assert_eq!(k.recv_clr(), Err(KernError::Empty));
    }

    #[test]
    fn recv_time_times_out() {
        let mut k = boot_kernel();
        let p = spawn(&mut k, "p", 20);
        assert!(k.recv_time(10).unwrap().is_pending());
        assert_eq!(k.proc(p).unwrap().state(), ProcState::RecvTime);

        for _ in 0..9 {
            k.clk_handler();
        }
        assert_eq!(k.proc(p).unwrap().state(), ProcState::RecvTime);
        k.clk_handler();
        // Delay expired with no sender: the process is runnable again and
        // has nothing in its mailbox, which the resumed call reports as
        // TIMEOUT_MSG.
        assert_eq!(k.current(), p);
        assert_eq!(k.recv_clr(), Err(KernError::Empty));
        check_invariants(&k);
    }

    #[test]
    fn recv_time_delivery_cancels_the_timeout() {
        let mut k = boot_kernel();
        let ps = spawn_all(&mut k, &[("rx", 30), ("late", 20), ("tx", 20)]);
        let (rx, late, tx) = (ps[0], ps[1], ps[2]);

        assert_eq!(k.current(), rx);
        assert!(k.recv_time(10).unwrap().is_pending());

        // `late` sleeps past rx's deadline; its wakeup must not shift
        // when rx is pulled off the delta list early.
        assert_eq!(k.current(), late);
        assert!(k.sleep_ms(14).unwrap().is_pending());

        assert_eq!(k.current(), tx);
        for _ in 0..4 {
            k.clk_handler();
        }
        k.send(rx, 0x1234).unwrap();
        assert_eq!(k.current(), rx);
        assert_eq!(k.recv_time(10), Ok(Completion::Done(0x1234)));

        // 14 ticks total: `late` wakes exactly on schedule.
        for _ in 0..9 {
            k.clk_handler();
        }
        assert_eq!(k.proc(late).unwrap().state(), ProcState::Sleep);
        k.clk_handler();
        assert_ne!(k.proc(late).unwrap().state(), ProcState::Sleep);
        check_invariants(&k);
    }

    #[test]
    fn recv_time_rejects_nonpositive_delays() {
        let mut k = boot_kernel();
        spawn(&mut k, "p", 20);
        assert_eq!(k.recv_time(0), Err(KernError::Sys));
        assert_eq!(k.recv_time(-5), Err(KernError::Sys));
    }
}
