//! The vireo kernel binary's supporting modules, exposed as a library so
//! the boot-orchestration logic in [`boot`] is unit-testable on the host
//! the same way the rest of the workspace is: every lower crate
//! (`vireo-core`, `vireo-mm`, `vireo-sched`, `vireo-fs`) is generic over a
//! host-fake seam, and this crate is where the real, machine-specific
//! implementations of those seams ([`arch::Cpu`] for
//! [`vireo_sched::context::ContextSwitch`], [`arch::TscClock`] for
//! [`vireo_sched::clock::MonotonicClock`], [`hhdm::HhdmPhysMap`] for
//! [`vireo_mm::phys_map::PhysMap`]) finally get plugged in, alongside the
//! global singletons ([`state`]) and subsystem glue (logging, allocation,
//! interrupt dispatch, boot sequencing) that have no lower-crate home.
//!
//! Only [`main`] (the `#[no_main]` entry point) lives outside this library,
//! since it is inherently tied to the `vireo` binary target and the Limine
//! request statics it must place in a link section.

#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]

extern crate alloc;

pub mod allocator;
pub mod arch;
pub mod boot;
pub mod hhdm;
pub mod interrupts;
pub mod log;
pub mod panic;
pub mod state;
