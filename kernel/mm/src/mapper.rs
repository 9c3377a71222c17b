//! Page-table walker: the MMU layer sitting under the VMM.
//!
//! Owns nothing by itself — [`Mmu`] borrows a [`Pmm`] (for intermediate
//! table frames) and walks whatever [`MmuContext`] the caller hands it.
//! Grounded on `hadron-core/src/arch/x86_64/paging/mapper.rs`'s
//! HHDM-walk-with-create shape, generalized from a fixed HHDM offset to the
//! crate-wide [`PhysMap`] seam so the walker is host-testable.

use vireo_core::addr::{PageSize, PhysAddr, Size1GiB, Size2MiB, Size4KiB, VirtAddr};
use vireo_core::error::{KError, KResult};

use crate::phys_map::PhysMap;
use crate::pmm::Pmm;
use crate::pte::{PageTable, PageTableEntry, PtFlags};

/// An address space's page-table radix tree root.
///
/// An MMU context owns its PML4 frame; the upper half of PML4 is shared
/// with the kernel context (copied by reference).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MmuContext {
    pml4: PhysAddr,
}

impl MmuContext {
    /// Wraps an already-allocated, zeroed PML4 frame.
    #[must_use]
    pub const fn from_pml4(pml4: PhysAddr) -> Self {
        Self { pml4 }
    }

    /// The physical address of this context's PML4 frame (its `CR3` value
    /// once architecture glue installs it).
    #[must_use]
    pub const fn pml4(self) -> PhysAddr {
        self.pml4
    }
}

/// Permission and caching flags requested for a mapping, independent of
/// the hardware encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapFlags {
    /// Present after mapping (always implied `true` for `map_*`).
    pub writable: bool,
    /// Ring-3 accessible.
    pub user: bool,
    /// Executable (clears `NO_EXECUTE`).
    pub executable: bool,
    /// Write-through caching.
    pub write_through: bool,
    /// Caching disabled (MMIO).
    pub cache_disable: bool,
    /// Survives a CR3 reload.
    pub global: bool,
}

impl MapFlags {
    /// Read-only, kernel-only, non-executable, cached — the common case.
    pub const KERNEL_RO: Self = Self {
        writable: false,
        user: false,
        executable: false,
        write_through: false,
        cache_disable: false,
        global: false,
    };
    /// Read-write, kernel-only, non-executable, cached.
    pub const KERNEL_RW: Self = Self {
        writable: true,
        user: false,
        executable: false,
        write_through: false,
        cache_disable: false,
        global: false,
    };
    /// Read-write, user-accessible, non-executable, cached.
    pub const USER_RW: Self = Self {
        writable: true,
        user: true,
        executable: false,
        write_through: false,
        cache_disable: false,
        global: false,
    };

    fn to_pte_flags(self) -> PtFlags {
        let mut flags = PtFlags::PRESENT | PtFlags::ACCESSED;
        if self.writable {
            flags |= PtFlags::WRITABLE;
        }
        if self.user {
            flags |= PtFlags::USER;
        }
        if self.write_through {
            flags |= PtFlags::WRITE_THROUGH;
        }
        if self.cache_disable {
            flags |= PtFlags::CACHE_DISABLE;
        }
        if self.global {
            flags |= PtFlags::GLOBAL;
        }
        if !self.executable {
            flags |= PtFlags::NO_EXECUTE;
        }
        flags
    }

    fn from_pte_flags(flags: PtFlags) -> Self {
        Self {
            writable: flags.contains(PtFlags::WRITABLE),
            user: flags.contains(PtFlags::USER),
            executable: !flags.contains(PtFlags::NO_EXECUTE),
            write_through: flags.contains(PtFlags::WRITE_THROUGH),
            cache_disable: flags.contains(PtFlags::CACHE_DISABLE),
            global: flags.contains(PtFlags::GLOBAL),
        }
    }
}

/// The parsed CPU page-fault error code, as consumed by the fault handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageFaultCode {
    /// The faulting page was present (a protection fault, not absence).
    pub present: bool,
    /// The fault was caused by a write.
    pub write: bool,
    /// The fault occurred in user (ring-3) mode.
    pub user: bool,
    /// A reserved bit was set in some paging-structure entry.
    pub reserved: bool,
    /// The fault was an instruction fetch.
    pub exec: bool,
}

impl PageFaultCode {
    /// Decodes a raw x86_64 page-fault error code.
    #[must_use]
    pub const fn decode(code: u64) -> Self {
        Self {
            present: code & 1 != 0,
            write: code & (1 << 1) != 0,
            user: code & (1 << 2) != 0,
            reserved: code & (1 << 3) != 0,
            exec: code & (1 << 4) != 0,
        }
    }
}

/// The outcome of [`Mmu::handle_page_fault`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultOutcome {
    /// A copy-on-write page was broken; the faulting instruction may retry.
    CowBroken,
    /// Not something the MMU layer alone can resolve (handed to the VMM).
    Unhandled,
}

/// Number of pages above which a TLB range-invalidation becomes a full
/// flush instead of per-page `invlpg`.
pub const FULL_FLUSH_THRESHOLD: usize = 32;

/// The page-table walker. Borrows a [`Pmm`] for intermediate-table frames
/// and shares its [`PhysMap`] translation.
pub struct Mmu<'a, A: PhysMap> {
    pmm: &'a Pmm<A>,
    tlb_flushes: core::sync::atomic::AtomicU64,
    full_flushes: core::sync::atomic::AtomicU64,
}

impl<'a, A: PhysMap> Mmu<'a, A> {
    /// Creates a walker over `pmm`'s frames.
    #[must_use]
    pub const fn new(pmm: &'a Pmm<A>) -> Self {
        Self {
            pmm,
            tlb_flushes: core::sync::atomic::AtomicU64::new(0),
            full_flushes: core::sync::atomic::AtomicU64::new(0),
        }
    }

    fn access(&self) -> &A {
        self.pmm.phys_map()
    }

    /// The [`Pmm`] this walker allocates intermediate tables from, for
    /// callers (the VMM) that need to allocate or free leaf data frames
    /// through the same allocator.
    #[must_use]
    pub fn pmm(&self) -> &'a Pmm<A> {
        self.pmm
    }

    fn table_at(&self, phys: PhysAddr) -> &mut PageTable {
        // SAFETY: `phys` is always either a freshly allocated PMM frame or
        // a frame already linked into a context's tree by this module, both
        // of which are valid, aligned `PageTable`s through `PhysMap`.
        unsafe { &mut *self.access().ptr(phys).cast::<PageTable>() }
    }

    /// Ensures `table[index]` points at a present next-level table,
    /// allocating one from the PMM if absent. Pre-existing entries get
    /// `intermediate` OR'd into their flags, and the `NO_EXECUTE` bit is
    /// cleared when traversing through a pre-existing NX entry, so deeper
    /// pages can host executable leaves.
    fn ensure_table(&self, table: PhysAddr, index: usize, intermediate: PtFlags) -> KResult<PhysAddr> {
        let node = self.table_at(table);
        let entry = node.entries[index];
        if entry.is_present() {
            let combined = (entry.flags() | intermediate) & !PtFlags::NO_EXECUTE;
            if combined != entry.flags() {
                node.entries[index] = entry.with_flags(combined);
            }
            Ok(entry.address())
        } else {
            let frame = self.pmm.alloc_frame().ok_or(KError::NoMem)?;
            node.entries[index] = PageTableEntry::new(frame, intermediate);
            Ok(frame)
        }
    }

    /// Walks from the PML4 down to the table that should hold the leaf
    /// entry for `S`, creating intermediates as needed. Returns the
    /// physical address of that table and the leaf index within it.
    fn walk_create<S: PageSize>(&self, ctx: MmuContext, va: VirtAddr, leaf_flags: PtFlags) -> KResult<(PhysAddr, usize)> {
        if !va.is_aligned(S::SIZE) {
            return Err(KError::InvalidArgument);
        }
        let intermediate = PtFlags::intermediate_for(leaf_flags);
        let pml4_idx = va.page_table_index(3);
        let pdpt_phys = self.ensure_table(ctx.pml4(), pml4_idx, intermediate)?;
        if S::LEVEL == 2 {
            return Ok((pdpt_phys, va.page_table_index(2)));
        }
        let pdpt_idx = va.page_table_index(2);
        let pd_phys = self.ensure_table(pdpt_phys, pdpt_idx, intermediate)?;
        if S::LEVEL == 1 {
            return Ok((pd_phys, va.page_table_index(1)));
        }
        let pd_idx = va.page_table_index(1);
        let pt_phys = self.ensure_table(pd_phys, pd_idx, intermediate)?;
        Ok((pt_phys, va.page_table_index(0)))
    }

    /// Walks down to (but does not create) the leaf table for `va` at page
    /// size `S`. Returns `None` if any intermediate level is absent, or if
    /// a shallower level turns out to already be a huge-page leaf (which
    /// means there is no table to descend into).
    fn walk_existing<S: PageSize>(&self, ctx: MmuContext, va: VirtAddr) -> Option<(PhysAddr, usize)> {
        let pml4 = self.table_at(ctx.pml4());
        let pml4_idx = va.page_table_index(3);
        let pdpt_entry = pml4.entries[pml4_idx];
        if !pdpt_entry.is_present() {
            return None;
        }
        if S::LEVEL == 2 {
            return Some((pdpt_entry.address(), va.page_table_index(2)));
        }
        let pdpt = self.table_at(pdpt_entry.address());
        let pdpt_idx = va.page_table_index(2);
        let pd_entry = pdpt.entries[pdpt_idx];
        if !pd_entry.is_present() || pd_entry.flags().contains(PtFlags::HUGE) {
            return None;
        }
        if S::LEVEL == 1 {
            return Some((pd_entry.address(), va.page_table_index(1)));
        }
        let pd = self.table_at(pd_entry.address());
        let pd_idx = va.page_table_index(1);
        let pt_entry = pd.entries[pd_idx];
        if !pt_entry.is_present() || pt_entry.flags().contains(PtFlags::HUGE) {
            return None;
        }
        Some((pt_entry.address(), va.page_table_index(0)))
    }

    /// Walks down to whichever level actually holds `va`'s leaf entry,
    /// whether that is a 4 KiB PT entry, a 2 MiB PD huge entry, or a 1 GiB
    /// PDPT huge entry. Returns the table holding the leaf, the leaf's
    /// index, and the page size it represents. Used by the size-agnostic
    /// query API ([`Mmu::virt_to_phys`], [`Mmu::get_flags`]); mutation
    /// helpers (COW, flag changes) stay 4 KiB-only because the VMM never
    /// marks huge pages copy-on-write.
    fn resolve_leaf(&self, ctx: MmuContext, va: VirtAddr) -> Option<(PhysAddr, usize, u64)> {
        let pml4 = self.table_at(ctx.pml4());
        let pml4_idx = va.page_table_index(3);
        let pdpt_entry = pml4.entries[pml4_idx];
        if !pdpt_entry.is_present() {
            return None;
        }
        let pdpt_phys = pdpt_entry.address();
        let pdpt = self.table_at(pdpt_phys);
        let pdpt_idx = va.page_table_index(2);
        let pd_entry = pdpt.entries[pdpt_idx];
        if !pd_entry.is_present() {
            return None;
        }
        if pd_entry.flags().contains(PtFlags::HUGE) {
            return Some((pdpt_phys, pdpt_idx, Size1GiB::SIZE));
        }
        let pd_phys = pd_entry.address();
        let pd = self.table_at(pd_phys);
        let pd_idx = va.page_table_index(1);
        let pt_entry = pd.entries[pd_idx];
        if !pt_entry.is_present() {
            return None;
        }
        if pt_entry.flags().contains(PtFlags::HUGE) {
            return Some((pd_phys, pd_idx, Size2MiB::SIZE));
        }
        let pt_phys = pt_entry.address();
        let pt = self.table_at(pt_phys);
        let pt_idx = va.page_table_index(0);
        let leaf = pt.entries[pt_idx];
        leaf.is_present().then_some((pt_phys, pt_idx, Size4KiB::SIZE))
    }

    /// Maps one page of size `S` at `va` to `pa` with `flags`.
    ///
    /// # Errors
    ///
    /// [`KError::InvalidArgument`] if `va`/`pa` are misaligned for `S`.
    /// [`KError::NoMem`] if an intermediate table allocation fails.
    /// [`KError::AlreadyExists`] if `va` is already mapped to a different
    /// target.
    pub fn map_page<S: PageSize>(&self, ctx: MmuContext, va: VirtAddr, pa: PhysAddr, flags: MapFlags) -> KResult<()> {
        if !pa.is_aligned(S::SIZE) {
            return Err(KError::InvalidArgument);
        }
        let leaf_flags = flags.to_pte_flags();
        let (table_phys, idx) = self.walk_create::<S>(ctx, va, leaf_flags)?;
        let table = self.table_at(table_phys);
        let existing = table.entries[idx];
        if existing.is_present() && existing.address() != pa {
            return Err(KError::AlreadyExists);
        }
        let mut bits = leaf_flags;
        if S::LEVEL > 0 {
            bits |= PtFlags::HUGE;
        }
        table.entries[idx] = PageTableEntry::new(pa, bits);
        self.flush_page(va);
        Ok(())
    }

    /// Convenience wrapper for the common 4 KiB case.
    pub fn map_page_4k(&self, ctx: MmuContext, va: VirtAddr, pa: PhysAddr, flags: MapFlags) -> KResult<()> {
        self.map_page::<Size4KiB>(ctx, va, pa, flags)
    }

    /// Maps a 2 MiB huge page.
    pub fn map_huge_2m(&self, ctx: MmuContext, va: VirtAddr, pa: PhysAddr, flags: MapFlags) -> KResult<()> {
        self.map_page::<Size2MiB>(ctx, va, pa, flags)
    }

    /// Maps a 1 GiB huge page.
    pub fn map_huge_1g(&self, ctx: MmuContext, va: VirtAddr, pa: PhysAddr, flags: MapFlags) -> KResult<()> {
        self.map_page::<Size1GiB>(ctx, va, pa, flags)
    }

    /// Unmaps the 4 KiB page at `va`. A no-op-that-fails on an already
    /// absent page (a no-op that returns failure).
    pub fn unmap_page(&self, ctx: MmuContext, va: VirtAddr) -> KResult<PhysAddr> {
        let Some((table_phys, idx)) = self.walk_existing::<Size4KiB>(ctx, va) else {
            return Err(KError::NotFound);
        };
        let table = self.table_at(table_phys);
        let entry = table.entries[idx];
        if !entry.is_present() {
            return Err(KError::NotFound);
        }
        table.entries[idx] = PageTableEntry::EMPTY;
        self.flush_page(va);
        Ok(entry.address())
    }

    /// Maps `len` bytes starting at `va`/`pa` (both must be 4 KiB aligned)
    /// as individual 4 KiB pages.
    pub fn map_range(&self, ctx: MmuContext, va: VirtAddr, pa: PhysAddr, len: u64, flags: MapFlags) -> KResult<()> {
        if !va.is_aligned(Size4KiB::SIZE) || !pa.is_aligned(Size4KiB::SIZE) {
            return Err(KError::InvalidArgument);
        }
        let pages = len.div_ceil(Size4KiB::SIZE);
        for i in 0..pages {
            let off = i * Size4KiB::SIZE;
            self.map_page_4k(ctx, va.offset(off), pa.offset(off), flags)?;
        }
        Ok(())
    }

    /// Maps `len` bytes starting at `va`/`pa`, opportunistically using 1
    /// GiB and 2 MiB pages wherever both the remaining length and the
    /// current address are aligned to them.
    pub fn map_range_auto(&self, ctx: MmuContext, va: VirtAddr, pa: PhysAddr, len: u64, flags: MapFlags) -> KResult<()> {
        if !va.is_aligned(Size4KiB::SIZE) || !pa.is_aligned(Size4KiB::SIZE) {
            return Err(KError::InvalidArgument);
        }
        let mut offset = 0u64;
        while offset < len {
            let cur_va = va.offset(offset);
            let cur_pa = pa.offset(offset);
            let remaining = len - offset;
            if remaining >= Size1GiB::SIZE && cur_va.is_aligned(Size1GiB::SIZE) && cur_pa.is_aligned(Size1GiB::SIZE) {
                self.map_huge_1g(ctx, cur_va, cur_pa, flags)?;
                offset += Size1GiB::SIZE;
            } else if remaining >= Size2MiB::SIZE && cur_va.is_aligned(Size2MiB::SIZE) && cur_pa.is_aligned(Size2MiB::SIZE) {
                self.map_huge_2m(ctx, cur_va, cur_pa, flags)?;
                offset += Size2MiB::SIZE;
            } else {
                self.map_page_4k(ctx, cur_va, cur_pa, flags)?;
                offset += Size4KiB::SIZE;
            }
        }
        Ok(())
    }

    /// Translates `va` to its mapped physical address, if any. Works
    /// regardless of whether the mapping is a 4 KiB, 2 MiB, or 1 GiB leaf.
    #[must_use]
    pub fn virt_to_phys(&self, ctx: MmuContext, va: VirtAddr) -> Option<PhysAddr> {
        let (table_phys, idx, page_size) = self.resolve_leaf(ctx, va)?;
        let entry = self.table_at(table_phys).entries[idx];
        Some(entry.address().offset(va.page_offset(page_size)))
    }

    /// `true` if `va` is mapped, at any page size.
    #[must_use]
    pub fn is_mapped(&self, ctx: MmuContext, va: VirtAddr) -> bool {
        self.virt_to_phys(ctx, va).is_some()
    }

    /// Returns the leaf flags for `va`, if mapped, at any page size.
    #[must_use]
    pub fn get_flags(&self, ctx: MmuContext, va: VirtAddr) -> Option<MapFlags> {
        let (table_phys, idx, _) = self.resolve_leaf(ctx, va)?;
        let entry = self.table_at(table_phys).entries[idx];
        Some(MapFlags::from_pte_flags(entry.flags()))
    }

    fn with_leaf_flags(&self, ctx: MmuContext, va: VirtAddr, f: impl FnOnce(PtFlags) -> PtFlags) -> KResult<()> {
        let (table_phys, idx) = self.walk_existing::<Size4KiB>(ctx, va).ok_or(KError::NotFound)?;
        let table = self.table_at(table_phys);
        let entry = table.entries[idx];
        if !entry.is_present() {
            return Err(KError::NotFound);
        }
        table.entries[idx] = entry.with_flags(f(entry.flags()));
        self.flush_page(va);
        Ok(())
    }

    /// Replaces the flags of an already-mapped page, keeping its target frame.
    pub fn change_flags(&self, ctx: MmuContext, va: VirtAddr, flags: MapFlags) -> KResult<()> {
        self.with_leaf_flags(ctx, va, |_| flags.to_pte_flags())
    }

    /// Same as [`Mmu::change_flags`] applied to every 4 KiB page in `[va, va + len)`.
    pub fn change_flags_range(&self, ctx: MmuContext, va: VirtAddr, len: u64, flags: MapFlags) -> KResult<()> {
        let pages = len.div_ceil(Size4KiB::SIZE);
        for i in 0..pages {
            self.change_flags(ctx, va.offset(i * Size4KiB::SIZE), flags)?;
        }
        Ok(())
    }

    /// Clears the writable bit on `va`.
    pub fn make_readonly(&self, ctx: MmuContext, va: VirtAddr) -> KResult<()> {
        self.with_leaf_flags(ctx, va, |f| f & !PtFlags::WRITABLE)
    }

    /// Sets the writable bit on `va`.
    pub fn make_writable(&self, ctx: MmuContext, va: VirtAddr) -> KResult<()> {
        self.with_leaf_flags(ctx, va, |f| f | PtFlags::WRITABLE)
    }

    /// Marks `va` copy-on-write: clears writable, sets the `COW` bit.
    pub fn mark_cow(&self, ctx: MmuContext, va: VirtAddr) -> KResult<()> {
        self.with_leaf_flags(ctx, va, |f| (f & !PtFlags::WRITABLE) | PtFlags::COW)
    }

    /// Applies [`Mmu::mark_cow`] to every 4 KiB page in `[va, va + len)`.
    pub fn mark_cow_range(&self, ctx: MmuContext, va: VirtAddr, len: u64) -> KResult<()> {
        let pages = len.div_ceil(Size4KiB::SIZE);
        for i in 0..pages {
            self.mark_cow(ctx, va.offset(i * Size4KiB::SIZE))?;
        }
        Ok(())
    }

    /// `true` iff `va` is mapped and its `COW` bit is set.
    #[must_use]
    pub fn is_cow_page(&self, ctx: MmuContext, va: VirtAddr) -> bool {
        self.get_flags_raw(ctx, va).is_some_and(|f| f.contains(PtFlags::COW))
    }

    fn get_flags_raw(&self, ctx: MmuContext, va: VirtAddr) -> Option<PtFlags> {
        let (table_phys, idx) = self.walk_existing::<Size4KiB>(ctx, va)?;
        let entry = self.table_at(table_phys).entries[idx];
        entry.is_present().then(|| entry.flags())
    }

    /// Breaks copy-on-write at `va`: allocates a fresh frame, copies the
    /// old frame's contents, installs it writable, clears `COW`, flushes
    /// the TLB entry. Returns the new physical frame.
    pub fn break_cow(&self, ctx: MmuContext, va: VirtAddr) -> KResult<PhysAddr> {
        let (table_phys, idx) = self.walk_existing::<Size4KiB>(ctx, va).ok_or(KError::NotFound)?;
        let table = self.table_at(table_phys);
        let entry = table.entries[idx];
        if !entry.is_present() || !entry.flags().contains(PtFlags::COW) {
            return Err(KError::InvalidArgument);
        }
        let old_frame = entry.address();
        let new_frame = self.pmm.alloc_frame().ok_or(KError::NoMem)?;
        // SAFETY: `old_frame` and `new_frame` are both PMM-owned 4 KiB
        // frames reachable through the shared `PhysMap`.
        unsafe {
            let src = self.access().ptr(old_frame);
            let dst = self.access().ptr(new_frame);
            core::ptr::copy_nonoverlapping(src, dst, Size4KiB::SIZE as usize);
        }
        let new_flags = (entry.flags() | PtFlags::WRITABLE) & !PtFlags::COW;
        table.entries[idx] = PageTableEntry::new(new_frame, new_flags);
        self.flush_page(va);
        Ok(new_frame)
    }

    /// Creates a fresh context whose lower half (user space, PML4 entries
    /// 0..256) is empty and whose upper half is copied by reference from
    /// `kernel`.
    pub fn create_context(&self, kernel: MmuContext) -> KResult<MmuContext> {
        let pml4_frame = self.pmm.alloc_frame().ok_or(KError::NoMem)?;
        let new = self.table_at(pml4_frame);
        let kern = self.table_at(kernel.pml4());
        new.entries[256..512].copy_from_slice(&kern.entries[256..512]);
        Ok(MmuContext::from_pml4(pml4_frame))
    }

    /// Alias for [`Mmu::create_context`] — the source spec names both
    /// `create_context` and `clone_context`; they share one implementation
    /// since both produce "new lower half, shared upper half".
    pub fn clone_context(&self, kernel: MmuContext) -> KResult<MmuContext> {
        self.create_context(kernel)
    }

    /// Frees the intermediate page-table frames of `ctx`'s lower half
    /// (PML4 entries 0..256) and the PML4 frame itself. Leaf (data) frames
    /// must already have been returned to the PMM by the VMM before this
    /// is called — teardown is not a first-class boot-sequence concern, so
    /// this walks structurally but
    /// does not second-guess leaf ownership.
    pub fn destroy_context(&self, ctx: MmuContext) {
        let pml4 = self.table_at(ctx.pml4());
        for pml4_idx in 0..256 {
            let pdpt_entry = pml4.entries[pml4_idx];
            if !pdpt_entry.is_present() {
                continue;
            }
            self.free_subtree(pdpt_entry.address(), 2);
        }
        self.pmm.free_page(ctx.pml4());
    }

    fn free_subtree(&self, phys: PhysAddr, level: u32) {
        if level > 0 {
            let table = self.table_at(phys);
            for entry in table.entries.iter() {
                if entry.is_present() && !entry.flags().contains(PtFlags::HUGE) {
                    self.free_subtree(entry.address(), level - 1);
                }
            }
        }
        self.pmm.free_page(phys);
    }

    /// Copies every mapped 4 KiB page in `[va, va + size)` from `src` into
    /// `dst`. If `cow` is set, both sides end up marked copy-on-write and
    /// sharing the same physical frame; otherwise the page is deep-copied
    /// into a freshly allocated frame in `dst`. Used by `fork_space`.
    pub fn copy_range(&self, dst: MmuContext, src: MmuContext, va: VirtAddr, size: u64, cow: bool, flags: MapFlags) -> KResult<()> {
        let pages = size.div_ceil(Size4KiB::SIZE);
        for i in 0..pages {
            let page_va = va.offset(i * Size4KiB::SIZE);
            let Some((table_phys, idx)) = self.walk_existing::<Size4KiB>(src, page_va) else {
                continue;
            };
            let entry = self.table_at(table_phys).entries[idx];
            if !entry.is_present() {
                continue;
            }
            if cow {
                self.mark_cow(src, page_va)?;
                let cow_flags = (flags.to_pte_flags() & !PtFlags::WRITABLE) | PtFlags::COW;
                let (dst_table, dst_idx) = self.walk_create::<Size4KiB>(dst, page_va, cow_flags)?;
                self.table_at(dst_table).entries[dst_idx] = PageTableEntry::new(entry.address(), cow_flags);
            } else {
                let new_frame = self.pmm.alloc_frame().ok_or(KError::NoMem)?;
                // SAFETY: source frame is a live mapped page; `new_frame` is
                // freshly allocated and unreferenced.
                unsafe {
                    let s = self.access().ptr(entry.address());
                    let d = self.access().ptr(new_frame);
                    core::ptr::copy_nonoverlapping(s, d, Size4KiB::SIZE as usize);
                }
                self.map_page_4k(dst, page_va, new_frame, flags)?;
            }
        }
        Ok(())
    }

    /// Invalidates the TLB entry for one page. On real hardware this is a
    /// single `invlpg`; in host tests there is no TLB, so it only updates
    /// the diagnostic counter.
    pub fn flush_page(&self, va: VirtAddr) {
        self.tlb_flushes.fetch_add(1, core::sync::atomic::Ordering::Relaxed);
        arch::invlpg(va);
    }

    /// Invalidates a range; beyond [`FULL_FLUSH_THRESHOLD`] pages this
    /// degrades to a full flush rather than looping `invlpg`.
    pub fn flush_range(&self, va: VirtAddr, len: u64) {
        let pages = len.div_ceil(Size4KiB::SIZE) as usize;
        if pages > FULL_FLUSH_THRESHOLD {
            self.flush_all();
            return;
        }
        for i in 0..pages as u64 {
            self.flush_page(va.offset(i * Size4KiB::SIZE));
        }
    }

    /// Invalidates the entire TLB (a context switch's implicit flush).
    pub fn flush_all(&self) {
        self.full_flushes.fetch_add(1, core::sync::atomic::Ordering::Relaxed);
        arch::flush_all();
    }

    /// Number of single-page invalidations issued so far.
    #[must_use]
    pub fn tlb_flush_count(&self) -> u64 {
        self.tlb_flushes.load(core::sync::atomic::Ordering::Relaxed)
    }

    /// Number of full-TLB invalidations issued so far.
    #[must_use]
    pub fn full_flush_count(&self) -> u64 {
        self.full_flushes.load(core::sync::atomic::Ordering::Relaxed)
    }

    /// Loads `ctx` as the active address space (`mov cr3`) and issues a
    /// full TLB flush.
    pub fn switch_context(&self, ctx: MmuContext) {
        arch::load_cr3(ctx.pml4());
        self.flush_all();
    }

    /// Handles a page fault. Breaks copy-on-write if the fault is a write
    /// to a present COW page; otherwise returns [`FaultOutcome::Unhandled`]
    /// for the VMM's fault dispatcher to decide.
    pub fn handle_page_fault(&self, ctx: MmuContext, fault_va: VirtAddr, code: PageFaultCode) -> KResult<FaultOutcome> {
        let page = fault_va.align_down(Size4KiB::SIZE);
        if code.present && code.write && self.is_cow_page(ctx, page) {
            self.break_cow(ctx, page)?;
            return Ok(FaultOutcome::CowBroken);
        }
        Ok(FaultOutcome::Unhandled)
    }
}

#[cfg(all(target_arch = "x86_64", target_os = "none"))]
mod arch {
    use core::arch::asm;
    use vireo_core::addr::{PhysAddr, VirtAddr};

    pub fn invlpg(va: VirtAddr) {
        // SAFETY: `invlpg` only affects the TLB, no memory hazard.
        unsafe {
            asm!("invlpg [{}]", in(reg) va.as_u64(), options(nostack, preserves_flags));
        }
    }

    pub fn flush_all() {
        // SAFETY: reloading CR3 with its own value flushes non-global TLB entries.
        unsafe {
            let cr3: u64;
            asm!("mov {}, cr3", out(reg) cr3, options(nomem, preserves_flags));
            asm!("mov cr3, {}", in(reg) cr3, options(nostack, preserves_flags));
        }
    }

    pub fn load_cr3(pml4: PhysAddr) {
        // SAFETY: `pml4` is a valid PML4 frame address of the context being switched to.
        unsafe {
            asm!("mov cr3, {}", in(reg) pml4.as_u64(), options(nostack, preserves_flags));
        }
    }
}

/// Host-test fallback: no real TLB or CR3 to touch.
#[cfg(not(all(target_arch = "x86_64", target_os = "none")))]
mod arch {
    use vireo_core::addr::{PhysAddr, VirtAddr};

    pub fn invlpg(_va: VirtAddr) {}
    pub fn flush_all() {}
    pub fn load_cr3(_pml4: PhysAddr) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::alloc::{alloc_zeroed, Layout};

    struct TestBacking {
        base: *mut u8,
        len: usize,
    }

    unsafe impl Send for TestBacking {}
    unsafe impl Sync for TestBacking {}

    unsafe impl PhysMap for TestBacking {
        fn ptr(&self, addr: PhysAddr) -> *mut u8 {
            let offset = addr.as_usize();
            assert!(offset + 4096 <= self.len, "test backing too small for {offset:#x}");
            unsafe { self.base.add(offset) }
        }
    }

    fn make_pmm(num_frames: u64) -> Pmm<TestBacking> {
        let len = (num_frames * crate::pmm::FRAME_SIZE) as usize;
        let layout = Layout::from_size_align(len, crate::pmm::FRAME_SIZE as usize).unwrap();
        let base = unsafe { alloc_zeroed(layout) };
        let pmm = Pmm::new(TestBacking { base, len });
        // Base the arena above the 4 GiB DMA32 boundary so every test frame
        // classifies into the Normal zone.
        pmm.add_region(PhysAddr::new(4 * 1024 * 1024 * 1024), num_frames * crate::pmm::FRAME_SIZE);
        pmm
    }

    fn new_ctx(pmm: &Pmm<TestBacking>) -> MmuContext {
        let frame = pmm.alloc_frame().unwrap();
        MmuContext::from_pml4(frame)
    }

    #[test]
    fn map_then_translate() {
        let pmm = make_pmm(64);
        let mmu = Mmu::new(&pmm);
        let ctx = new_ctx(&pmm);
        let va = VirtAddr::new_truncate(0x4000_0000);
        let pa = pmm.alloc_frame().unwrap();
        mmu.map_page_4k(ctx, va, pa, MapFlags::KERNEL_RW).unwrap();
        assert_eq!(mmu.virt_to_phys(ctx, va), Some(pa));
        assert!(mmu.is_mapped(ctx, va));
    }

    #[test]
    fn unmap_makes_not_mapped() {
        let pmm = make_pmm(64);
        let mmu = Mmu::new(&pmm);
        let ctx = new_ctx(&pmm);
        let va = VirtAddr::new_truncate(0x4000_0000);
        let pa = pmm.alloc_frame().unwrap();
        mmu.map_page_4k(ctx, va, pa, MapFlags::KERNEL_RW).unwrap();
        mmu.unmap_page(ctx, va).unwrap();
        assert!(!mmu.is_mapped(ctx, va));
        assert_eq!(mmu.unmap_page(ctx, va), Err(KError::NotFound));
    }

    #[test]
    fn remap_to_different_frame_is_rejected() {
        let pmm = make_pmm(64);
        let mmu = Mmu::new(&pmm);
        let ctx = new_ctx(&pmm);
        let va = VirtAddr::new_truncate(0x4000_0000);
        let a = pmm.alloc_frame().unwrap();
        let b = pmm.alloc_frame().unwrap();
        mmu.map_page_4k(ctx, va, a, MapFlags::KERNEL_RW).unwrap();
        assert_eq!(mmu.map_page_4k(ctx, va, b, MapFlags::KERNEL_RW), Err(KError::AlreadyExists));
    }

    #[test]
    fn misaligned_map_rejected() {
        let pmm = make_pmm(64);
        let mmu = Mmu::new(&pmm);
        let ctx = new_ctx(&pmm);
        let va = VirtAddr::new_truncate(0x4000_0001);
        let pa = pmm.alloc_frame().unwrap();
        assert_eq!(mmu.map_page_4k(ctx, va, pa, MapFlags::KERNEL_RW), Err(KError::InvalidArgument));
    }

    #[test]
    fn cow_mark_and_break_yields_distinct_frame() {
        let pmm = make_pmm(64);
        let mmu = Mmu::new(&pmm);
        let ctx = new_ctx(&pmm);
        let va = VirtAddr::new_truncate(0x4000_0000);
        let pa = pmm.alloc_frame().unwrap();
        mmu.map_page_4k(ctx, va, pa, MapFlags::KERNEL_RW).unwrap();
        mmu.mark_cow(ctx, va).unwrap();
        assert!(mmu.is_cow_page(ctx, va));

        let new_frame = mmu.break_cow(ctx, va).unwrap();
        assert_ne!(new_frame, pa);
        assert!(!mmu.is_cow_page(ctx, va));
        assert_eq!(mmu.virt_to_phys(ctx, va), Some(new_frame));
    }

    #[test]
    fn page_fault_on_cow_write_breaks_it() {
        let pmm = make_pmm(64);
        let mmu = Mmu::new(&pmm);
        let ctx = new_ctx(&pmm);
        let va = VirtAddr::new_truncate(0x4000_0000);
        let pa = pmm.alloc_frame().unwrap();
        mmu.map_page_4k(ctx, va, pa, MapFlags::KERNEL_RW).unwrap();
        mmu.mark_cow(ctx, va).unwrap();

        let code = PageFaultCode { present: true, write: true, user: false, reserved: false, exec: false };
        let outcome = mmu.handle_page_fault(ctx, va, code).unwrap();
        assert_eq!(outcome, FaultOutcome::CowBroken);
        assert!(!mmu.is_cow_page(ctx, va));
    }

    #[test]
    fn page_fault_non_cow_is_unhandled() {
        let pmm = make_pmm(64);
        let mmu = Mmu::new(&pmm);
        let ctx = new_ctx(&pmm);
        let va = VirtAddr::new_truncate(0x4000_0000);
        let code = PageFaultCode { present: false, write: false, user: true, reserved: false, exec: false };
        assert_eq!(mmu.handle_page_fault(ctx, va, code).unwrap(), FaultOutcome::Unhandled);
    }

    #[test]
    fn clone_context_shares_upper_half() {
        let pmm = make_pmm(64);
        let mmu = Mmu::new(&pmm);
        let kernel_ctx = new_ctx(&pmm);
        // Map something in the kernel's upper half.
        let kva = VirtAddr::new_truncate(0xffff_8000_0000_0000);
        let kpa = pmm.alloc_frame().unwrap();
        mmu.map_page_4k(kernel_ctx, kva, kpa, MapFlags::KERNEL_RW).unwrap();

        let child = mmu.create_context(kernel_ctx).unwrap();
        assert_eq!(mmu.virt_to_phys(child, kva), Some(kpa));

        // Lower half is empty in the child.
        let uva = VirtAddr::new_truncate(0x4000_0000);
        assert!(!mmu.is_mapped(child, uva));
    }

    #[test]
    fn copy_range_cow_shares_frame() {
        let pmm = make_pmm(64);
        let mmu = Mmu::new(&pmm);
        let parent = new_ctx(&pmm);
        let child = new_ctx(&pmm);
        let va = VirtAddr::new_truncate(0x4000_0000);
        let pa = pmm.alloc_frame().unwrap();
        mmu.map_page_4k(parent, va, pa, MapFlags::USER_RW).unwrap();

        mmu.copy_range(child, parent, va, 4096, true, MapFlags::USER_RW).unwrap();

        assert!(mmu.is_cow_page(parent, va));
        assert!(mmu.is_cow_page(child, va));
        assert_eq!(mmu.virt_to_phys(parent, va), mmu.virt_to_phys(child, va));
    }

    #[test]
    fn map_range_auto_uses_huge_pages_when_aligned() {
        let pmm = make_pmm(1100);
        let mmu = Mmu::new(&pmm);
        let ctx = new_ctx(&pmm);
        let va = VirtAddr::new_truncate(0x0000_0020_0000); // 2 MiB aligned
        let pa = PhysAddr::new(8 * 1024 * 1024 * 1024); // arbitrary 2 MiB aligned phys (not backed, flags only)
        // We only check the mapping bookkeeping, not contents, so don't
        // touch the (unbacked) target frame.
        mmu.map_range_auto(ctx, va, pa, Size2MiB::SIZE, MapFlags::KERNEL_RW).unwrap();
        let flags = mmu.get_flags(ctx, va).unwrap();
        assert!(flags.writable);
    }
}
