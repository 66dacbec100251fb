// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The kernel memory allocator.
//!
//! One RAM region, handed to the kernel at boot, serves both ordinary
//! allocations and process stacks. Free space is a single list of blocks
//! sorted by ascending address, with each block's length and successor
//! link stored in its own first eight bytes; adjacent free blocks are
//! always coalesced, so two neighbors never both appear on the list.
//!
//! Ordinary allocations (`get_mem`) take the *first* fit and split from
//! the low side; stacks (`get_stk`) take the *last* fit and carve from the
//! top of the block, so heap and stacks grow toward each other from
//! opposite ends of the region. A stack is identified by the address of
//! its highest word — the word that receives the stack-overflow marker —
//! and stacks grow downward from there.
//!
//! Addresses are `u32` byte offsets into the region. That keeps every
//! access a plain slice operation, and the eight-byte block header fits
//! the eight-byte minimum block size exactly.

use abi::{KernError, KernResult};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::arch;
use crate::Kernel;

/// Size of a machine word: pool-id prefixes, stack markers, and link words
/// are all this wide.
pub(crate) const WORD: u32 = 4;

/// Block granularity; every block address and length is a multiple of
/// this.
const BLK_ALIGN: u32 = 8;

/// Link value meaning "no block".
pub(crate) const NULL_OFF: u32 = u32::MAX;

/// Header stored in the first bytes of every free block.
#[derive(Copy, Clone, Debug, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
struct FreeBlk {
    len: u32,
    next: u32,
}

/// Rounds a request up to the block granularity.
pub(crate) fn round_blk(nbytes: u32) -> KernResult<u32> {
    if nbytes == 0 {
        return Err(KernError::Sys);
    }
    nbytes
        .checked_add(BLK_ALIGN - 1)
        .map(|n| n & !(BLK_ALIGN - 1))
        .ok_or(KernError::Sys)
}

pub(crate) struct Heap<'r> {
    mem: &'r mut [u8],
    /// First free block by address; `NULL_OFF` when the region is
    /// exhausted.
    free_head: u32,
    /// Sum of the lengths of all free blocks.
    free_total: u32,
}

impl<'r> Heap<'r> {
    pub(crate) fn new(region: &'r mut [u8]) -> Self {
        assert!(region.len() <= u32::MAX as usize);
        let len = region.len() as u32 & !(BLK_ALIGN - 1);
        assert!(len >= BLK_ALIGN, "RAM region too small");

        let mut heap = Self {
            mem: region,
            free_head: 0,
            free_total: len,
        };
        heap.write(
            0,
            FreeBlk {
                len,
                next: NULL_OFF,
            },
        );
        heap
    }

    /// Reads a `T` out of the region at `off`.
    pub(crate) fn read<T: FromBytes>(&self, off: u32) -> T {
        let lo = off as usize;
        let bytes = &self.mem[lo..lo + core::mem::size_of::<T>()];
        match T::read_from_bytes(bytes) {
            Ok(v) => v,
            // The slice is exactly size_of::<T> bytes.
            Err(_) => unreachable!(),
        }
    }

    /// Writes a `T` into the region at `off`.
    pub(crate) fn write<T: IntoBytes + Immutable>(&mut self, off: u32, val: T) {
        let lo = off as usize;
        val.write_to(&mut self.mem[lo..lo + core::mem::size_of::<T>()])
            .ok();
    }

    /// Mutable view of a byte range, for seeding stack frames.
    pub(crate) fn bytes_mut(&mut self, off: u32, len: u32) -> &mut [u8] {
        &mut self.mem[off as usize..(off + len) as usize]
    }

    /// Checks that `[off, off + len)` lies inside the region.
    pub(crate) fn in_range(&self, off: u32, len: u32) -> bool {
        (off as usize)
            .checked_add(len as usize)
            .map(|end| end <= self.mem.len())
            .unwrap_or(false)
    }

    pub(crate) fn free_total(&self) -> u32 {
        self.free_total
    }

    /// Repoints the link that leads to some block: either a predecessor's
    /// header or the list head itself.
    fn set_next(&mut self, at: u32, val: u32) {
        if at == NULL_OFF {
            self.free_head = val;
        } else {
            let mut blk: FreeBlk = self.read(at);
            blk.next = val;
            self.write(at, blk);
        }
    }

    /// First-fit allocation, splitting from the low side.
    pub(crate) fn get_mem(&mut self, nbytes: u32) -> KernResult<u32> {
        let n = round_blk(nbytes)?;

        let mut prev = NULL_OFF;
        let mut curr = self.free_head;
        while curr != NULL_OFF {
            let blk: FreeBlk = self.read(curr);
            if blk.len == n {
                self.set_next(prev, blk.next);
                self.free_total -= n;
                return Ok(curr);
            }
            if blk.len > n {
                let rem = curr + n;
                self.write(
                    rem,
                    FreeBlk {
                        len: blk.len - n,
                        next: blk.next,
                    },
                );
                self.set_next(prev, rem);
                self.free_total -= n;
                return Ok(curr);
            }
            prev = curr;
            curr = blk.next;
        }
        Err(KernError::Empty)
    }

    /// Last-fit stack allocation. Carves `nbytes` off the *top* of the
    /// highest-addressed block that can hold it and returns the address
    /// of the allocation's top word.
    pub(crate) fn get_stk(&mut self, nbytes: u32) -> KernResult<u32> {
        let n = round_blk(nbytes)?;

        let mut prev = NULL_OFF;
        let mut curr = self.free_head;
        let mut fit = NULL_OFF;
        let mut fit_prev = NULL_OFF;
        while curr != NULL_OFF {
            let blk: FreeBlk = self.read(curr);
            if blk.len >= n {
                fit = curr;
                fit_prev = prev;
            }
            prev = curr;
            curr = blk.next;
        }
        if fit == NULL_OFF {
            return Err(KernError::Empty);
        }

        let blk: FreeBlk = self.read(fit);
        let top = fit + blk.len - WORD;
        if blk.len == n {
            self.set_next(fit_prev, blk.next);
        } else {
            self.write(
                fit,
                FreeBlk {
                    len: blk.len - n,
                    next: blk.next,
                },
            );
        }
        self.free_total -= n;
        Ok(top)
    }

    /// Returns a block to the free list, coalescing with either neighbor.
    ///
    /// Rejects ranges outside the region, misaligned addresses, and frees
    /// that would overlap a block already on the list (double frees
    /// included).
    pub(crate) fn free_mem(&mut self, addr: u32, nbytes: u32) -> KernResult<()> {
        let n = round_blk(nbytes)?;
        if addr % BLK_ALIGN != 0 || !self.in_range(addr, n) {
            return Err(KernError::Sys);
        }

        let mut prev = NULL_OFF;
        let mut curr = self.free_head;
        while curr != NULL_OFF && curr < addr {
            prev = curr;
            curr = self.read::<FreeBlk>(curr).next;
        }

        let prev_end = if prev == NULL_OFF {
            None
        } else {
            Some(prev + self.read::<FreeBlk>(prev).len)
        };
        if let Some(end) = prev_end {
            if end > addr {
                return Err(KernError::Sys);
            }
        }
        if curr != NULL_OFF && addr + n > curr {
            return Err(KernError::Sys);
        }

        let merged = if prev_end == Some(addr) {
            let mut blk: FreeBlk = self.read(prev);
            blk.len += n;
            self.write(prev, blk);
            prev
        } else {
            self.write(addr, FreeBlk { len: n, next: curr });
            self.set_next(prev, addr);
            addr
        };

        let mut blk: FreeBlk = self.read(merged);
        if curr != NULL_OFF && merged + blk.len == curr {
            let succ: FreeBlk = self.read(curr);
            blk.len += succ.len;
            blk.next = succ.next;
            self.write(merged, blk);
        }

        self.free_total += n;
        Ok(())
    }

    /// Frees a stack named by its top-word address, as returned by
    /// `get_stk`.
    pub(crate) fn free_stk(&mut self, addr: u32, nbytes: u32) -> KernResult<()> {
        let n = round_blk(nbytes)?;
        let base = (addr + WORD).checked_sub(n).ok_or(KernError::Sys)?;
        self.free_mem(base, n)
    }

    /// Snapshot of the free list as (address, length) pairs, head first.
    #[cfg(test)]
    pub(crate) fn blocks(&self) -> Vec<(u32, u32)> {
        let mut out = Vec::new();
        let mut curr = self.free_head;
        while curr != NULL_OFF {
            let blk: FreeBlk = self.read(curr);
            out.push((curr, blk.len));
            curr = blk.next;
        }
        out
    }
}

impl Kernel<'_> {
    /// Allocates `nbytes` of kernel RAM; the result is a region offset.
    pub fn get_mem(&mut self, nbytes: u32) -> KernResult<u32> {
        let _irq = arch::IrqGuard::hold();
        self.heap.get_mem(nbytes)
    }

    /// Releases an allocation made with `get_mem`.
    pub fn free_mem(&mut self, addr: u32, nbytes: u32) -> KernResult<()> {
        let _irq = arch::IrqGuard::hold();
        self.heap.free_mem(addr, nbytes)
    }

    /// Allocates a stack, returning the address of its highest word.
    pub fn get_stk(&mut self, nbytes: u32) -> KernResult<u32> {
        let _irq = arch::IrqGuard::hold();
        self.heap.get_stk(nbytes)
    }

    /// Releases a stack allocated with `get_stk`.
    pub fn free_stk(&mut self, addr: u32, nbytes: u32) -> KernResult<()> {
        let _irq = arch::IrqGuard::hold();
        self.heap.free_stk(addr, nbytes)
    }
}
