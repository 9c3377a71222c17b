//! Higher-half direct map offset and the physical-memory translation it
//! provides.
//!
//! Limine maps all usable physical memory once, contiguously, starting at
//! an offset it reports in its boot response; that offset is read once
//! from the bootloader response and handed to every layer as an opaque
//! translation function. [`HhdmPhysMap`] is the one
//! [`vireo_mm::phys_map::PhysMap`] implementation this workspace ships: a
//! zero-sized handle whose `ptr` is just `phys + offset`.
//!
//! Grounded on `hadron-kernel/src/mm/hhdm.rs`'s module-global offset plus
//! `phys_to_virt` free function.

use core::sync::atomic::{AtomicU64, Ordering};

use vireo_core::addr::PhysAddr;
use vireo_mm::phys_map::PhysMap;

static HHDM_OFFSET: AtomicU64 = AtomicU64::new(0);

/// Records the HHDM offset Limine reported. Must be called exactly once,
/// before any [`HhdmPhysMap`] is used.
pub fn init(offset: u64) {
    HHDM_OFFSET.store(offset, Ordering::Release);
}

/// Returns the HHDM offset recorded by [`init`].
#[must_use]
pub fn offset() -> u64 {
    HHDM_OFFSET.load(Ordering::Acquire)
}

/// Translates a physical address to its HHDM virtual address.
#[must_use]
pub fn phys_to_virt(addr: PhysAddr) -> u64 {
    addr.as_u64() + offset()
}

/// The workspace's one real [`PhysMap`]: physical memory accessed through
/// the bootloader's higher-half direct map.
///
/// Zero-sized and freely copyable; every PMM/MMU/heap singleton in
/// [`crate::state`] is parameterized by this type.
#[derive(Debug, Clone, Copy, Default)]
pub struct HhdmPhysMap;

// SAFETY: `ptr` returns `phys + offset()`, which Limine guarantees is
// mapped read-write for every byte of usable physical memory once `init`
// has recorded the real offset.
unsafe impl PhysMap for HhdmPhysMap {
    fn ptr(&self, addr: PhysAddr) -> *mut u8 {
        phys_to_virt(addr) as *mut u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn translates_with_recorded_offset() {
        init(0xffff_8000_0000_0000);
        assert_eq!(phys_to_virt(PhysAddr::new(0x1000)), 0xffff_8000_0000_1000);
    }
}
