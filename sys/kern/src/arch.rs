// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Architecture-specific support.
//!
//! In practice, this works by
//!
//! - Conditionally defining a nested module (below).
//! - `pub use`-ing its contents
//!
//! Thus, all architecture-specific types and functions show up right here
//! in the `arch` module, tailored for the current target. Each
//! architecture support module must define the same set of names:
//!
//! - `IntMask`, `disable() -> IntMask`, `restore(IntMask)`,
//!   `interrupts_disabled() -> bool` — the nestable interrupt mask.
//!   `disable` returns the *prior* mask and `restore` reinstates exactly
//!   that mask, so critical sections nest.
//! - `ctxsw(&mut old_sp, new_sp)` — saves the running context against
//!   `old_sp` and resumes the one described by `new_sp`; it "returns" in
//!   the context of the new process.
//! - `seed_initial_frame(frame, base, entry, args, on_return) -> sp` —
//!   writes a synthetic saved context into a fresh stack such that the
//!   first `ctxsw` to it starts `entry(args…)`, with a return into the
//!   `on_return` trampoline.
//! - `USER_RET`, `IDLE_ENTRY` — opaque code addresses for the
//!   kill-on-return trampoline and the null process's idle loop.

cfg_if::cfg_if! {
    if #[cfg(target_os = "none")] {
        // Bare-metal ports live out of tree; they supply the real mask,
        // switch, and frame-seeding primitives for their CPU.
        compile_error!("no bare-metal port is wired into this tree");
    } else {
        mod hosted;
        pub use hosted::*;
    }
}

/// Critical-section guard: disables interrupts on construction and
/// restores the prior mask when dropped, so every exit path of a kernel
/// entry point restores correctly.
pub(crate) struct IrqGuard {
    saved: IntMask,
}

impl IrqGuard {
    pub(crate) fn hold() -> Self {
        Self { saved: disable() }
    }
}

impl Drop for IrqGuard {
    fn drop(&mut self) {
        restore(self.saved);
    }
}
