// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Hosted stand-ins for the platform glue, used for simulation and for
//! the test suite.
//!
//! The interrupt mask is a per-thread nesting depth; the context switch
//! records what it was asked to do instead of actually swapping stacks.
//! That last part matters: on hardware, a kernel call that parks its
//! caller does not return until the caller is dispatched again, but here
//! `ctxsw` returns immediately, so such a call reports
//! [`abi::Completion::Pending`] and completes when re-issued by the
//! resumed "process". Everything is thread-local so tests can run in
//! parallel, one simulated CPU per thread.

use std::cell::{Cell, RefCell};

use zerocopy::IntoBytes;

/// Opaque code address of the user-return trampoline: entry functions
/// "return" here, and the trampoline kills the process. The value is
/// chosen to stand out in a stack dump.
pub const USER_RET: u32 = 0xFFFF_FFF9;

/// Opaque code address of the null process's idle loop.
pub const IDLE_ENTRY: u32 = 0xFFFF_1D1E;

/// Words of callee-save register space in a synthetic saved context.
pub const CTX_WORDS: usize = 8;

/// Saved interrupt state, as returned by `disable`.
#[derive(Copy, Clone, Debug)]
pub struct IntMask(u32);

thread_local! {
    static IRQ_DEPTH: Cell<u32> = Cell::new(0);
    static SWITCHES: RefCell<Vec<(u32, u32)>> = RefCell::new(Vec::new());
}

/// Masks interrupts, returning the previous state for `restore`.
pub fn disable() -> IntMask {
    IRQ_DEPTH.with(|d| {
        let old = d.get();
        d.set(old + 1);
        IntMask(old)
    })
}

/// Reinstates an interrupt state previously returned by `disable` — not
/// an unconditional enable, so nested critical sections unwind correctly.
pub fn restore(mask: IntMask) {
    IRQ_DEPTH.with(|d| d.set(mask.0));
}

pub fn interrupts_disabled() -> bool {
    IRQ_DEPTH.with(|d| d.get()) > 0
}

/// Context switch. The hosted version only logs the request; control
/// stays with the caller.
pub fn ctxsw(old_sp: &mut u32, new_sp: u32) {
    SWITCHES.with(|s| s.borrow_mut().push((*old_sp, new_sp)));
}

/// Drains the log of context switches recorded on this thread.
pub fn take_switches() -> Vec<(u32, u32)> {
    SWITCHES.with(|s| s.borrow_mut().split_off(0))
}

/// Writes a synthetic saved context into a new stack.
///
/// `frame` is the writable stack below the overflow marker, starting at
/// region offset `base`. Layout, from the high end down: the arguments
/// (first argument lowest), the `on_return` trampoline address, the
/// `entry` address, and a zeroed callee-save area. The returned stack
/// pointer addresses the bottom of that area, which is where a context
/// switch expects to find a suspended process.
pub fn seed_initial_frame(
    frame: &mut [u8],
    base: u32,
    entry: u32,
    args: &[u32],
    on_return: u32,
) -> u32 {
    fn push(frame: &mut [u8], cursor: &mut usize, val: u32) {
        *cursor -= 4;
        val.write_to(&mut frame[*cursor..*cursor + 4]).ok();
    }

    let needed = (args.len() + 2 + CTX_WORDS) * 4;
    assert!(frame.len() >= needed, "stack too small for initial frame");

    let mut cursor = frame.len();
    for &arg in args.iter().rev() {
        push(frame, &mut cursor, arg);
    }
    push(frame, &mut cursor, on_return);
    push(frame, &mut cursor, entry);
    for _ in 0..CTX_WORDS {
        push(frame, &mut cursor, 0);
    }
    base + cursor as u32
}
