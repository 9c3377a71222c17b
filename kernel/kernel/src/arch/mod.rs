//! Architecture-specific glue: the one concrete [`vireo_sched::context::ContextSwitch`]
//! and [`vireo_sched::clock::MonotonicClock`] implementation this binary
//! ships, plus the handful of CPU intrinsics (port I/O, `hlt`, interrupt
//! masking) every other module needs.
//!
//! GDT/IDT setup, ISR stubs, and the full user/kernel context-switch
//! trampoline stay out of scope: unavoidably architecture-specific
//! assembly the kernel binary would own directly, reusable almost
//! verbatim from a reference kernel with no behavioral change worth
//! building here. This module provides the minimum needed to
//! actually run kernel threads on real hardware: a cooperative,
//! kernel-to-kernel stack switch (xv6's `swtch`-style register save/restore,
//! not a ring3-capable trampoline) and a tick-driven clock. Both are the
//! thinnest implementation the workspace's trait seams require, not a
//! reimplementation of the out-of-scope glue.

#[cfg(target_arch = "x86_64")]
mod x86_64;

#[cfg(target_arch = "x86_64")]
pub use x86_64::*;
