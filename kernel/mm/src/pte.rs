//! Page table entries and the 512-entry table they compose.
//!
//! Grounded on `hadron-core/src/arch/x86_64/structures/paging`'s
//! entry/flags split, but the AVAILABLE_1 bit is given a fixed meaning here
//! (one AVAILABLE bit repurposed as COW) rather than being
//! left generic.

use bitflags::bitflags;
use vireo_core::addr::PhysAddr;

bitflags! {
    /// x86_64 page-table entry flag bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PtFlags: u64 {
        /// The entry points at a valid next-level table or leaf frame.
        const PRESENT = 1 << 0;
        /// Writes are permitted through this entry.
        const WRITABLE = 1 << 1;
        /// Ring-3 accesses are permitted through this entry.
        const USER = 1 << 2;
        /// Write-through caching.
        const WRITE_THROUGH = 1 << 3;
        /// Caching disabled for the region this entry covers.
        const CACHE_DISABLE = 1 << 4;
        /// Set by hardware on first access.
        const ACCESSED = 1 << 5;
        /// Set by hardware on first write (leaf entries only).
        const DIRTY = 1 << 6;
        /// At PD/PDPT level, terminates the walk as a 2 MiB/1 GiB page.
        const HUGE = 1 << 7;
        /// Survives a `mov cr3` reload (requires CR4.PGE).
        const GLOBAL = 1 << 8;
        /// Repurposed AVAILABLE bit: this leaf is copy-on-write.
        const COW = 1 << 9;
        /// Execution is forbidden through this entry (requires EFER.NXE).
        const NO_EXECUTE = 1 << 63;
    }
}

impl PtFlags {
    /// The flag set for an intermediate (non-leaf) table entry: present,
    /// writable, and `USER` if any leaf beneath it needs user access.
    #[must_use]
    pub fn intermediate_for(leaf: PtFlags) -> PtFlags {
        let mut flags = PtFlags::PRESENT | PtFlags::WRITABLE;
        if leaf.contains(PtFlags::USER) {
            flags |= PtFlags::USER;
        }
        flags
    }
}

const ADDR_MASK: u64 = 0x000f_ffff_ffff_f000;

/// One 8-byte page-table entry: a physical address plus [`PtFlags`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct PageTableEntry(u64);

impl PageTableEntry {
    /// The all-zero (not-present) entry.
    pub const EMPTY: Self = Self(0);

    /// Builds an entry pointing at `addr` with `flags`.
    #[must_use]
    pub fn new(addr: PhysAddr, flags: PtFlags) -> Self {
        Self((addr.as_u64() & ADDR_MASK) | flags.bits())
    }

    /// `true` if [`PtFlags::PRESENT`] is set.
    #[must_use]
    pub const fn is_present(self) -> bool {
        self.0 & PtFlags::PRESENT.bits() != 0
    }

    /// The physical address this entry targets (masked to bits 12..52).
    #[must_use]
    pub const fn address(self) -> PhysAddr {
        PhysAddr::new(self.0 & ADDR_MASK)
    }

    /// The flag bits of this entry.
    #[must_use]
    pub fn flags(self) -> PtFlags {
        PtFlags::from_bits_truncate(self.0)
    }

    /// Returns a copy of this entry with `flags` replacing the flag bits,
    /// keeping the same target address.
    #[must_use]
    pub fn with_flags(self, flags: PtFlags) -> Self {
        Self::new(self.address(), flags)
    }
}

/// A 4 KiB, 512-entry page-table node (PML4, PDPT, PD, or PT).
#[repr(C, align(4096))]
pub struct PageTable {
    /// The 512 entries of this node.
    pub entries: [PageTableEntry; 512],
}

impl PageTable {
    /// Number of entries in a table.
    pub const LEN: usize = 512;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_roundtrips_address_and_flags() {
        let addr = PhysAddr::new(0x1234_5000);
        let flags = PtFlags::PRESENT | PtFlags::WRITABLE | PtFlags::USER;
        let e = PageTableEntry::new(addr, flags);
        assert_eq!(e.address(), addr);
        assert_eq!(e.flags(), flags);
        assert!(e.is_present());
    }

    #[test]
    fn empty_entry_is_not_present() {
        assert!(!PageTableEntry::EMPTY.is_present());
    }

    #[test]
    fn intermediate_for_propagates_user_bit() {
        let leaf = PtFlags::PRESENT | PtFlags::WRITABLE | PtFlags::USER;
        let inter = PtFlags::intermediate_for(leaf);
        assert!(inter.contains(PtFlags::USER));
        assert!(inter.contains(PtFlags::PRESENT | PtFlags::WRITABLE));

        let kernel_leaf = PtFlags::PRESENT | PtFlags::WRITABLE;
        assert!(!PtFlags::intermediate_for(kernel_leaf).contains(PtFlags::USER));
    }

    #[test]
    fn with_flags_preserves_address() {
        let addr = PhysAddr::new(0x2000);
        let e = PageTableEntry::new(addr, PtFlags::PRESENT);
        let e2 = e.with_flags(PtFlags::PRESENT | PtFlags::WRITABLE);
        assert_eq!(e2.address(), addr);
        assert!(e2.flags().contains(PtFlags::WRITABLE));
    }

    #[test]
    fn page_table_size_is_one_frame() {
        assert_eq!(core::mem::size_of::<PageTable>(), 4096);
    }
}
