// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Fixed-partition buffer pools.
//!
//! A pool is a heap allocation diced into equal buffers, with a counting
//! semaphore metering them out: `get_buf` blocks while the pool is dry and
//! `free_buf` feeds it. While free, the buffers form a list threaded
//! through their own first word. Every buffer is prefixed by one word
//! naming its pool, and callers see the address *past* the prefix; that's
//! how `free_buf` finds the pool again from nothing but the address.

use abi::{
    Bpid, Completion, KernError, KernResult, MAX_BUFF_SIZE, MAX_POOLS,
    MAX_POOL_BUFFS, MIN_BUFF_SIZE,
};

use crate::arch;
use crate::mem::{NULL_OFF, WORD};
use crate::Kernel;

/// One buffer-pool table entry.
#[derive(Copy, Clone, Debug)]
pub(crate) struct Pool {
    /// First free buffer unit, linked through first words; `NULL_OFF`
    /// when every buffer is out. (The semaphore blocks callers before
    /// they can observe that.)
    pub(crate) next_buf: u32,
    /// Counts buffers currently available.
    pub(crate) sem: abi::Sid,
    /// Usable bytes per buffer, excluding the pool-id prefix.
    pub(crate) buf_size: u32,
}

impl Pool {
    pub(crate) const FREE: Self = Self {
        next_buf: NULL_OFF,
        sem: abi::Sid::NONE,
        buf_size: 0,
    };
}

impl Kernel<'_> {
    /// Carves a new pool of `numbufs` buffers of `bufsize` bytes each out
    /// of the heap.
    pub fn make_buf_pool(
        &mut self,
        bufsize: u32,
        numbufs: u32,
    ) -> KernResult<Bpid> {
        let _irq = arch::IrqGuard::hold();

        if !(MIN_BUFF_SIZE..=MAX_BUFF_SIZE).contains(&bufsize)
            || !(1..=MAX_POOL_BUFFS).contains(&numbufs)
            || self.npools >= MAX_POOLS
        {
            return Err(KernError::Sys);
        }

        let bufsize = (bufsize + 3) & !3;
        let unit = bufsize + WORD;
        let total = numbufs * unit;
        let mem = self.get_mem(total)?;

        let sem = match self.sem_create(numbufs as i32) {
            Ok(sem) => sem,
            Err(_) => {
                self.free_mem(mem, total).ok();
                return Err(KernError::Empty);
            }
        };

        // Thread the free list through the units' first words.
        for i in 0..numbufs {
            let off = mem + i * unit;
            let next = if i + 1 == numbufs { NULL_OFF } else { off + unit };
            self.heap.write::<u32>(off, next);
        }

        let id = self.npools;
        self.npools += 1;
        self.pools[id] = Pool {
            next_buf: mem,
            sem,
            buf_size: bufsize,
        };
        Ok(Bpid(id as i32))
    }

    /// Takes a buffer from the pool, blocking while none are free.
    /// Returns the address of the buffer's usable bytes.
    pub fn get_buf(&mut self, pool: Bpid) -> KernResult<Completion<u32>> {
        let _irq = arch::IrqGuard::hold();
        let idx = self.check_pool(pool)?;

        match self.wait(self.pools[idx].sem)? {
            Completion::Pending => return Ok(Completion::Pending),
            Completion::Done(()) => {}
        }

        let unit = self.pools[idx].next_buf;
        if unit == NULL_OFF {
            return Err(KernError::Sys);
        }
        self.pools[idx].next_buf = self.heap.read::<u32>(unit);
        self.heap.write::<u32>(unit, pool.0 as u32);
        Ok(Completion::Done(unit + WORD))
    }

    /// Returns a buffer obtained from `get_buf`, releasing one blocked
    /// taker if any.
    pub fn free_buf(&mut self, addr: u32) -> KernResult<()> {
        let _irq = arch::IrqGuard::hold();

        if addr < WORD || !self.heap.in_range(addr - WORD, WORD) {
            return Err(KernError::Sys);
        }
        let unit = addr - WORD;
        let id = self.heap.read::<u32>(unit) as usize;
        if id >= self.npools {
            return Err(KernError::Sys);
        }

        self.heap.write::<u32>(unit, self.pools[id].next_buf);
        self.pools[id].next_buf = unit;
        self.signal(self.pools[id].sem)
    }

    fn check_pool(&self, pool: Bpid) -> KernResult<usize> {
        if pool.0 < 0 || (pool.0 as usize) >= self.npools {
            return Err(KernError::Sys);
        }
        Ok(pool.index())
    }
}
