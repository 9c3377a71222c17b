//! Physical-to-virtual address translation, shared by [`crate::pmm`] and
//! [`crate::mapper`].
//!
//! On real hardware this is the loader-provided HHDM offset: `virt = phys +
//! offset`. In host tests it is a plain heap buffer standing in for a slice
//! of "physical memory", so PMM and MMU logic can be exercised without a
//! kernel target.

use vireo_core::addr::PhysAddr;

/// Translates a physical address into a pointer usable to read or write the
/// byte(s) at that physical location.
///
/// # Safety
///
/// The returned pointer must be valid for the lifetime of `self` and must
/// not alias any other live Rust reference while the caller holds whatever
/// lock protects the physical resource in question.
pub unsafe trait PhysMap: Send + Sync {
    /// Maps `addr` to a byte pointer.
    fn ptr(&self, addr: PhysAddr) -> *mut u8;
}
