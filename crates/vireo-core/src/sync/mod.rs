//! Low-level lock primitives.
//!
//! Locks that may be held across a suspend point (mutex, wait queue — built
//! in `vireo-sched` on top of these primitives) are kept strictly apart from
//! locks that are "IRQ-safe spin": usable from interrupt handlers because
//! they disable interrupts for their duration and never block. This module
//! provides the two building blocks: [`SpinLock`] (busy-wait, no IRQ masking
//! — for data only ever touched with interrupts already disabled, or in
//! host tests) and [`IrqSpinLock`] (busy-wait, masks interrupts on the
//! current CPU for the critical section).
//!
//! Grounded on `hadron-kernel/src/sync/irq_spinlock.rs`.

mod irq_spinlock;
mod spinlock;

pub use irq_spinlock::{IrqSpinLock, IrqSpinLockGuard};
pub use spinlock::{SpinLock, SpinLockGuard};
