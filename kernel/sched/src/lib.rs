//! The preemptive priority scheduler and the process layer built on it.
//!
//! Grounded on a reference C kernel's `src/kernel/core/scheduler.c`,
//! `src/kernel/core/proc.c` and `src/kernel/core/mutex.c`: eight priority
//! run-queues selected by an 8-bit bitmap, a wake-time-sorted sleep list,
//! aging every tenth timer tick, and a ticket mutex whose waiters block
//! through the scheduler. The raw pointer back-references that kernel uses
//! (TCB ↔ PCB, PCB parent/child/sibling) are replaced here with an arena
//! plus stable index — this crate owns the [`tcb::Tcb`] arena behind
//! [`scheduler::Scheduler`] and the [`process::Pcb`] arena behind
//! [`process::ProcessTable`], and every cross-reference is a
//! [`vireo_core::id::Tid`] or [`vireo_core::id::Pid`] rather than a
//! pointer.
//!
//! Architecture-specific context save/restore/switch is isolated behind
//! the [`context::ContextSwitch`] trait: an abstract `Context` type the
//! scheduler never inspects the fields of. Every type here is generic over
//! that trait and over [`clock::MonotonicClock`]
//! so the run-queue, aging, sleep-list and ticket-mutex logic is exercised
//! on the host with fake implementations of both, the same way `vireo-mm`
//! is generic over `PhysMap`.

#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]

extern crate alloc;

pub mod clock;
pub mod context;
pub mod mutex;
pub mod process;
pub mod scheduler;
pub mod signal;
pub mod tcb;
pub mod timer;
pub mod waitqueue;
