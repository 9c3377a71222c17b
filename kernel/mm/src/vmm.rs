//! Virtual Memory Manager: region bookkeeping on top of the MMU, lazy
//! allocation and copy-on-write orchestration.
//!
//! Grounded on `kernel/mm/src/region.rs`'s sorted-list shape (there used
//! for free virtual ranges; here for live VMAs) and on
//! `hadron-core/src/arch/x86_64/paging/mapper.rs`'s fault-routing
//! conventions, stitched to the [`crate::mapper::Mmu`] this workspace
//! built. `planck_noalloc::vec::ArrayVec` keeps region lists off the heap,
//! since the VMM has to work before the kernel heap exists.

use planck_noalloc::vec::ArrayVec;

use vireo_core::addr::{PageSize, PhysAddr, Size4KiB, VirtAddr};
use vireo_core::error::{KError, KResult};
use vireo_core::sync::IrqSpinLock;

use crate::mapper::{FaultOutcome, MapFlags, Mmu, MmuContext, PageFaultCode};
use crate::phys_map::PhysMap;
use crate::pmm::Pmm;

/// Maximum VMAs tracked per address space. No bound is named anywhere
/// else; a bounded `ArrayVec` matches the no-heap-before-heap-exists constraint
/// every other VMM structure in this crate observes.
pub const MAX_VMAS: usize = 256;

/// Lowest user-space virtual address `alloc_region` will hand out
///.
pub const USER_REGION_START: u64 = 0x0000_0000_0000_1000;
/// One past the highest user-space virtual address.
pub const USER_REGION_END: u64 = 0x0000_007F_FFFF_F000;

/// Lowest kernel-space virtual address `alloc_region` will search from:
/// the low end of the canonical hole's upper half, i.e. just above where
/// user space ends canonically.
const KERNEL_REGION_START: u64 = 0xffff_8000_0000_0000;

/// What a VMA's pages are backed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackingType {
    /// Demand-paged, zero-fill-on-first-touch memory.
    Anon,
    /// A fixed physical range, mapped eagerly (MMIO, framebuffers).
    Phys,
    /// Backed by a file (reserved for a future page-cache integration;
    /// the core does not implement file-backed faults yet).
    File,
    /// Shared between address spaces without COW semantics.
    Shared,
}

bitflags::bitflags! {
    /// Per-VMA allocation behavior flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AllocFlags: u32 {
        /// Defer backing-frame allocation until the first fault.
        const LAZY = 1 << 0;
        /// Zero-fill newly allocated frames (implied for ANON + LAZY).
        const ZERO = 1 << 1;
        /// Install as copy-on-write (used by `fork_space`).
        const COW = 1 << 2;
    }
}

/// A virtual memory area: one contiguous, homogeneously backed range
/// within an address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Vma {
    start: VirtAddr,
    end: VirtAddr,
    flags: MapFlags,
    backing: BackingType,
    alloc_flags: AllocFlags,
    /// For PHYS backing, the fixed physical base this VMA is mapped to.
    phys_base: Option<PhysAddr>,
}

impl Vma {
    /// Start of the region.
    #[must_use]
    pub const fn start(&self) -> VirtAddr {
        self.start
    }

    /// One past the end of the region.
    #[must_use]
    pub const fn end(&self) -> VirtAddr {
        self.end
    }

    /// Length in bytes.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.end.as_u64() - self.start.as_u64()
    }

    /// `true` if this VMA has zero length. Never actually constructed, but
    /// satisfies the conventional `len`/`is_empty` pairing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `true` if `va` falls within `[start, end)`.
    #[must_use]
    pub fn contains(&self, va: VirtAddr) -> bool {
        va.as_u64() >= self.start.as_u64() && va.as_u64() < self.end.as_u64()
    }

    /// Mapping flags applied to every page in this region.
    #[must_use]
    pub const fn flags(&self) -> MapFlags {
        self.flags
    }

    /// The region's backing type.
    #[must_use]
    pub const fn backing(&self) -> BackingType {
        self.backing
    }
}

/// Specific reason a fault could not be resolved, surfaced to callers that
/// need to raise a signal or kill the faulting process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultError {
    /// No VMA covers the faulting address.
    NoRegion,
    /// The VMA exists but forbids the access the fault encodes (a write to
    /// a read-only region, execution of non-executable memory, user access
    /// to a kernel-only region).
    ProtectionViolation,
    /// The page is absent and the VMA's backing/flags do not permit
    /// servicing a fault (e.g. non-lazy PHYS region with a hole, or a
    /// FILE/SHARED region fault this core does not resolve).
    Unresolvable,
    /// The MMU layer reported its own allocation failure while handling an
    /// otherwise-resolvable fault (e.g. `break_cow`/lazy-alloc ran out of
    /// physical memory).
    OutOfMemory,
}

impl From<KError> for FaultError {
    fn from(e: KError) -> Self {
        match e {
            KError::NoMem => FaultError::OutOfMemory,
            _ => FaultError::Unresolvable,
        }
    }
}

/// Resolution a successful [`AddressSpace::handle_fault`] performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultResolution {
    /// A copy-on-write page was broken.
    CowBroken,
    /// A lazy anonymous page was allocated and mapped.
    LazyAllocated,
}

/// Running counters an address space keeps for diagnostics and for the
/// properties exercised in tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct VmmStats {
    /// Faults resolved by breaking copy-on-write.
    pub cow_faults_handled: u64,
    /// Faults resolved by allocating a fresh lazy frame.
    pub lazy_allocations: u64,
    /// Bytes currently backed by a physical frame across every VMA.
    pub mapped_size: u64,
}

/// One address space: its MMU context, sorted VMA list, and running totals
///.
pub struct AddressSpace<'a, A: PhysMap> {
    mmu: &'a Mmu<'a, A>,
    ctx: MmuContext,
    vmas: IrqSpinLock<ArrayVec<Vma, MAX_VMAS>>,
    stats: IrqSpinLock<VmmStats>,
    is_user: bool,
}

impl<'a, A: PhysMap> AddressSpace<'a, A> {
    /// Wraps an already-created [`MmuContext`] with empty region
    /// bookkeeping.
    #[must_use]
    pub fn new(mmu: &'a Mmu<'a, A>, ctx: MmuContext, is_user: bool) -> Self {
        Self {
            mmu,
            ctx,
            vmas: IrqSpinLock::new(ArrayVec::new()),
            stats: IrqSpinLock::new(VmmStats::default()),
            is_user,
        }
    }

    /// The underlying MMU context.
    #[must_use]
    pub const fn mmu_context(&self) -> MmuContext {
        self.ctx
    }

    /// Snapshot of this address space's fault/usage counters.
    #[must_use]
    pub fn stats(&self) -> VmmStats {
        *self.stats.lock()
    }

    /// Returns the VMA covering `va`, if any.
    #[must_use]
    pub fn find_area(&self, va: VirtAddr) -> Option<Vma> {
        let vmas = self.vmas.lock();
        vmas.iter().find(|v| v.contains(va)).copied()
    }

    fn overlaps_existing(vmas: &ArrayVec<Vma, MAX_VMAS>, start: VirtAddr, end: VirtAddr) -> bool {
        vmas.iter().any(|v| start.as_u64() < v.end.as_u64() && v.start.as_u64() < end.as_u64())
    }

    fn insert_sorted(vmas: &mut ArrayVec<Vma, MAX_VMAS>, vma: Vma) -> KResult<()> {
        let idx = vmas.iter().position(|v| v.start.as_u64() > vma.start.as_u64()).unwrap_or(vmas.len());
        if vmas.insert(idx, vma).is_err() {
            return Err(KError::NoMem);
        }
        Ok(())
    }

    /// Inserts a new VMA covering `[va, va + size)`, page-aligning `size`
    /// upward. PHYS regions are mapped eagerly at `phys`; ANON regions are
    /// mapped eagerly unless [`AllocFlags::LAZY`] is set.
    ///
    /// # Errors
    ///
    /// [`KError::AlreadyExists`] if the range overlaps an existing VMA.
    /// [`KError::InvalidArgument`] if `va` is misaligned, or `phys` is
    /// required (PHYS backing) but absent.
    pub fn map_region(
        &self,
        va: VirtAddr,
        size: u64,
        flags: MapFlags,
        backing: BackingType,
        alloc_flags: AllocFlags,
        phys: Option<PhysAddr>,
    ) -> KResult<Vma> {
        if !va.is_aligned(Size4KiB::SIZE) {
            return Err(KError::InvalidArgument);
        }
        let len = size.div_ceil(Size4KiB::SIZE) * Size4KiB::SIZE;
        let end = VirtAddr::new_truncate(va.as_u64() + len);

        {
            let vmas = self.vmas.lock();
            if Self::overlaps_existing(&vmas, va, end) {
                return Err(KError::AlreadyExists);
            }
        }

        let vma = match backing {
            BackingType::Phys => {
                let base = phys.ok_or(KError::InvalidArgument)?;
                self.mmu.map_range_auto(self.ctx, va, base, len, flags)?;
                self.stats.lock().mapped_size += len;
                Vma { start: va, end, flags, backing, alloc_flags, phys_base: Some(base) }
            }
            BackingType::Anon => {
                let vma = Vma { start: va, end, flags, backing, alloc_flags, phys_base: None };
                if !alloc_flags.contains(AllocFlags::LAZY) {
                    self.backfill_anon(&vma)?;
                }
                vma
            }
            BackingType::File | BackingType::Shared => {
                Vma { start: va, end, flags, backing, alloc_flags, phys_base: None }
            }
        };

        let mut vmas = self.vmas.lock();
        Self::insert_sorted(&mut vmas, vma)?;
        Ok(vma)
    }

    fn backfill_anon(&self, vma: &Vma) -> KResult<()> {
        let pages = vma.len() / Size4KiB::SIZE;
        for i in 0..pages {
            let page_va = VirtAddr::new_truncate(vma.start.as_u64() + i * Size4KiB::SIZE);
            let frame = self.mmu.pmm().alloc_frame().ok_or(KError::NoMem)?;
            self.mmu.map_page_4k(self.ctx, page_va, frame, vma.flags)?;
        }
        self.stats.lock().mapped_size += vma.len();
        Ok(())
    }

    /// Removes the VMA starting exactly at `va` with the given `size`.
    /// Partial unmaps are not supported; callers must split first
    ///. Every currently mapped ANON page is returned to
    /// the PMM.
    ///
    /// # Errors
    ///
    /// [`KError::NotFound`] if no VMA begins at `va` with exactly `size`.
    pub fn unmap_region(&self, va: VirtAddr, size: u64) -> KResult<()> {
        let len = size.div_ceil(Size4KiB::SIZE) * Size4KiB::SIZE;
        let end = VirtAddr::new_truncate(va.as_u64() + len);

        let vma = {
            let mut vmas = self.vmas.lock();
            let idx = vmas
                .iter()
                .position(|v| v.start == va && v.end == end)
                .ok_or(KError::NotFound)?;
            let vma = vmas[idx];
            vmas.remove(idx);
            vma
        };

        let pages = vma.len() / Size4KiB::SIZE;
        let mut freed = 0u64;
        for i in 0..pages {
            let page_va = VirtAddr::new_truncate(vma.start.as_u64() + i * Size4KiB::SIZE);
            if let Ok(frame) = self.mmu.unmap_page(self.ctx, page_va) {
                if matches!(vma.backing, BackingType::Anon) {
                    self.mmu.pmm().free_page(frame);
                }
                freed += Size4KiB::SIZE;
            }
        }
        self.stats.lock().mapped_size = self.stats.lock().mapped_size.saturating_sub(freed);
        Ok(())
    }

    /// Finds a free gap of at least `size` bytes by walking the sorted VMA
    /// list, and maps a new region there via [`AddressSpace::map_region`]
    ///. Kernel address spaces search above the HHDM;
    /// user address spaces search within `[USER_REGION_START, USER_REGION_END)`.
    ///
    /// # Errors
    ///
    /// [`KError::NoMem`] if no gap of sufficient size exists.
    pub fn alloc_region(&self, size: u64, flags: MapFlags, alloc_flags: AllocFlags) -> KResult<Vma> {
        let len = size.div_ceil(Size4KiB::SIZE) * Size4KiB::SIZE;
        let (region_start, region_end) = if self.is_user {
            (USER_REGION_START, USER_REGION_END)
        } else {
            (KERNEL_REGION_START, u64::MAX - Size4KiB::SIZE + 1)
        };

        let va = {
            let vmas = self.vmas.lock();
            let mut cursor = region_start;
            let mut found = None;
            for vma in vmas.iter() {
                let vstart = vma.start.as_u64();
                if vstart >= cursor && vstart - cursor >= len {
                    found = Some(cursor);
                    break;
                }
                cursor = cursor.max(vma.end.as_u64());
            }
            if found.is_none() && region_end.saturating_sub(cursor) >= len {
                found = Some(cursor);
            }
            found.ok_or(KError::NoMem)?
        };

        self.map_region(VirtAddr::new_truncate(va), len, flags, BackingType::Anon, alloc_flags, None)
    }

    /// Changes the protection flags of the VMA exactly covering
    /// `[va, va + size)`.
    ///
    /// # Errors
    ///
    /// [`KError::NotFound`] if the range does not sit within exactly one VMA.
    pub fn protect_region(&self, va: VirtAddr, size: u64, flags: MapFlags) -> KResult<()> {
        let len = size.div_ceil(Size4KiB::SIZE) * Size4KiB::SIZE;
        let end = VirtAddr::new_truncate(va.as_u64() + len);
        {
            let mut vmas = self.vmas.lock();
            let idx = vmas
                .iter()
                .position(|v| v.start.as_u64() <= va.as_u64() && v.end.as_u64() >= end.as_u64())
                .ok_or(KError::NotFound)?;
            vmas[idx].flags = flags;
        }
        self.mmu.change_flags_range(self.ctx, va, len, flags)
    }

    /// Marks every page in `[va, va + size)` copy-on-write. The range must
    /// sit within one VMA.
    ///
    /// # Errors
    ///
    /// [`KError::NotFound`] if the range does not sit within exactly one VMA.
    pub fn mark_cow_region(&self, va: VirtAddr, size: u64) -> KResult<()> {
        let len = size.div_ceil(Size4KiB::SIZE) * Size4KiB::SIZE;
        let end = VirtAddr::new_truncate(va.as_u64() + len);
        {
            let vmas = self.vmas.lock();
            if !vmas.iter().any(|v| v.start.as_u64() <= va.as_u64() && v.end.as_u64() >= end.as_u64()) {
                return Err(KError::NotFound);
            }
        }
        self.mmu.mark_cow_range(self.ctx, va, len)
    }

    /// Creates a child address space sharing this one's kernel mappings,
    /// then clones every VMA: ANON regions are installed copy-on-write in
    /// both parent and child (sharing frames); PHYS regions are installed
    /// shared with no COW.
    ///
    /// # Errors
    ///
    /// Propagates [`KError::NoMem`] from context or page-table allocation.
    pub fn fork_space(&'a self, kernel: MmuContext) -> KResult<Self> {
        let child_ctx = self.mmu.create_context(kernel)?;
        let child = Self::new(self.mmu, child_ctx, self.is_user);

        let parent_vmas: ArrayVec<Vma, MAX_VMAS> = {
            let guard = self.vmas.lock();
            let mut copy = ArrayVec::new();
            for v in guard.iter() {
                let _ = copy.push(*v);
            }
            copy
        };

        for vma in parent_vmas.iter() {
            match vma.backing {
                BackingType::Anon => {
                    self.mmu.copy_range(child_ctx, self.ctx, vma.start, vma.len(), true, vma.flags)?;
                }
                BackingType::Phys => {
                    let base = vma.phys_base.expect("PHYS vma without phys_base");
                    self.mmu.map_range_auto(child_ctx, vma.start, base, vma.len(), vma.flags)?;
                }
                BackingType::File | BackingType::Shared => {
                    // Reserved for future page-cache-backed faulting; the
                    // region is recorded but left unmapped in the child.
                }
            }
            let mut child_vmas = child.vmas.lock();
            Self::insert_sorted(&mut child_vmas, *vma)?;
        }

        Ok(child)
    }

    /// The fault dispatcher: locates the enclosing VMA,
    /// delegates to COW-breaking or lazy allocation as appropriate, and
    /// reports why a fault could not be resolved otherwise.
    pub fn handle_fault(&self, fault_va: VirtAddr, code: PageFaultCode) -> Result<FaultResolution, FaultError> {
        let page = fault_va.align_down(Size4KiB::SIZE);
        let vma = self.find_area(page).ok_or(FaultError::NoRegion)?;

        if code.present {
            if code.write && self.mmu.is_cow_page(self.ctx, page) {
                self.mmu.break_cow(self.ctx, page)?;
                self.stats.lock().cow_faults_handled += 1;
                return Ok(FaultResolution::CowBroken);
            }
            let violates = (code.write && !vma.flags.writable)
                || (code.exec && !vma.flags.executable)
                || (code.user && !vma.flags.user);
            if violates {
                return Err(FaultError::ProtectionViolation);
            }
            return Err(FaultError::Unresolvable);
        }

        if matches!(vma.backing, BackingType::Anon) && vma.alloc_flags.contains(AllocFlags::LAZY) {
            let frame = self.mmu.pmm().alloc_frame().ok_or(FaultError::OutOfMemory)?;
            self.mmu.map_page_4k(self.ctx, page, frame, vma.flags).map_err(FaultError::from)?;
            self.stats.lock().lazy_allocations += 1;
            self.stats.lock().mapped_size += Size4KiB::SIZE;
            return Ok(FaultResolution::LazyAllocated);
        }

        Err(FaultError::Unresolvable)
    }

    /// Dispatches `handle_fault`, then additionally asks the MMU layer
    /// directly if the VMM itself could not resolve it — covers the rare
    /// case where [`Mmu::handle_page_fault`] would break COW on a page the
    /// VMM's own VMA bookkeeping has not yet caught up to (never expected
    /// in normal operation, kept as a defense-in-depth fallback consistent
    /// with the fault handler being independently callable).
    pub fn handle_fault_with_mmu_fallback(&self, fault_va: VirtAddr, code: PageFaultCode) -> Result<FaultResolution, FaultError> {
        match self.handle_fault(fault_va, code) {
            Ok(r) => Ok(r),
            Err(FaultError::NoRegion) | Err(FaultError::Unresolvable) => {
                match self.mmu.handle_page_fault(self.ctx, fault_va, code) {
                    Ok(FaultOutcome::CowBroken) => Ok(FaultResolution::CowBroken),
                    Ok(FaultOutcome::Unhandled) => Err(FaultError::Unresolvable),
                    Err(e) => Err(FaultError::from(e)),
                }
            }
            Err(other) => Err(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pmm::Pmm;
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
            assert!(offset + 4096 <= self.len);
            unsafe { self.base.add(offset) }
        }
    }

    fn make_pmm(num_frames: u64) -> Pmm<TestBacking> {
        let len = (num_frames * crate::pmm::FRAME_SIZE) as usize;
        let layout = Layout::from_size_align(len, crate::pmm::FRAME_SIZE as usize).unwrap();
        let base = unsafe { alloc_zeroed(layout) };
        let pmm = Pmm::new(TestBacking { base, len });
        pmm.add_region(PhysAddr::new(4 * 1024 * 1024 * 1024), num_frames * crate::pmm::FRAME_SIZE);
        pmm
    }

    fn new_space<'a>(mmu: &'a Mmu<'a, TestBacking>, is_user: bool) -> AddressSpace<'a, TestBacking> {
        let frame = mmu.pmm().alloc_frame().unwrap();
        AddressSpace::new(mmu, MmuContext::from_pml4(frame), is_user)
    }

    #[test]
    fn map_region_rejects_overlap() {
        let pmm = make_pmm(256);
        let mmu = Mmu::new(&pmm);
        let space = new_space(&mmu, true);
        let va = VirtAddr::new_truncate(0x10_0000);
        space.map_region(va, 8192, MapFlags::USER_RW, BackingType::Anon, AllocFlags::empty(), None).unwrap();
        let err = space.map_region(va, 4096, MapFlags::USER_RW, BackingType::Anon, AllocFlags::empty(), None);
        assert_eq!(err, Err(KError::AlreadyExists));
    }

    #[test]
    fn eager_anon_region_is_fully_mapped() {
        let pmm = make_pmm(256);
        let mmu = Mmu::new(&pmm);
        let space = new_space(&mmu, true);
        let va = VirtAddr::new_truncate(0x20_0000);
        space.map_region(va, 4096, MapFlags::USER_RW, BackingType::Anon, AllocFlags::empty(), None).unwrap();
        assert!(mmu.is_mapped(space.mmu_context(), va));
    }

    #[test]
    fn lazy_anon_fault_allocates_on_demand() {
        let pmm = make_pmm(256);
        let mmu = Mmu::new(&pmm);
        let space = new_space(&mmu, true);
        let va = VirtAddr::new_truncate(0x30_0000);
        space.map_region(va, 4096, MapFlags::USER_RW, BackingType::Anon, AllocFlags::LAZY, None).unwrap();
        assert!(!mmu.is_mapped(space.mmu_context(), va));

        let code = PageFaultCode { present: false, write: true, user: true, reserved: false, exec: false };
        let res = space.handle_fault(va, code).unwrap();
        assert_eq!(res, FaultResolution::LazyAllocated);
        assert!(mmu.is_mapped(space.mmu_context(), va));
        assert_eq!(space.stats().lazy_allocations, 1);
    }

    #[test]
    fn fault_with_no_region_fails() {
        let pmm = make_pmm(256);
        let mmu = Mmu::new(&pmm);
        let space = new_space(&mmu, true);
        let code = PageFaultCode { present: false, write: true, user: true, reserved: false, exec: false };
        assert_eq!(space.handle_fault(VirtAddr::new_truncate(0x9000_0000), code), Err(FaultError::NoRegion));
    }

    #[test]
    fn cow_write_fault_breaks_and_counts() {
        let pmm = make_pmm(256);
        let mmu = Mmu::new(&pmm);
        let space = new_space(&mmu, true);
        let va = VirtAddr::new_truncate(0x40_0000);
        space.map_region(va, 4096, MapFlags::USER_RW, BackingType::Anon, AllocFlags::empty(), None).unwrap();
        mmu.mark_cow(space.mmu_context(), va).unwrap();

        let code = PageFaultCode { present: true, write: true, user: true, reserved: false, exec: false };
        let res = space.handle_fault(va, code).unwrap();
        assert_eq!(res, FaultResolution::CowBroken);
        assert_eq!(space.stats().cow_faults_handled, 1);
    }

    #[test]
    fn write_to_readonly_region_is_protection_violation() {
        let pmm = make_pmm(256);
        let mmu = Mmu::new(&pmm);
        let space = new_space(&mmu, true);
        let va = VirtAddr::new_truncate(0x50_0000);
        space.map_region(va, 4096, MapFlags::KERNEL_RO, BackingType::Anon, AllocFlags::empty(), None).unwrap();

        let code = PageFaultCode { present: true, write: true, user: false, reserved: false, exec: false };
        assert_eq!(space.handle_fault(va, code), Err(FaultError::ProtectionViolation));
    }

    #[test]
    fn unmap_region_requires_exact_match() {
        let pmm = make_pmm(256);
        let mmu = Mmu::new(&pmm);
        let space = new_space(&mmu, true);
        let va = VirtAddr::new_truncate(0x60_0000);
        space.map_region(va, 8192, MapFlags::USER_RW, BackingType::Anon, AllocFlags::empty(), None).unwrap();
        assert_eq!(space.unmap_region(va, 4096), Err(KError::NotFound));
        assert!(space.unmap_region(va, 8192).is_ok());
        assert!(!mmu.is_mapped(space.mmu_context(), va));
    }

    #[test]
    fn alloc_region_finds_gap_after_existing_vma() {
        let pmm = make_pmm(256);
        let mmu = Mmu::new(&pmm);
        let space = new_space(&mmu, true);
        let first = space.alloc_region(4096, MapFlags::USER_RW, AllocFlags::empty()).unwrap();
        let second = space.alloc_region(4096, MapFlags::USER_RW, AllocFlags::empty()).unwrap();
        assert!(second.start().as_u64() >= first.end().as_u64());
    }

    #[test]
    fn fork_space_shares_cow_frame_with_child() {
        let pmm = make_pmm(256);
        let mmu = Mmu::new(&pmm);
        let parent = new_space(&mmu, true);
        let va = VirtAddr::new_truncate(0x70_0000);
        parent.map_region(va, 4096, MapFlags::USER_RW, BackingType::Anon, AllocFlags::empty(), None).unwrap();

        let kernel_frame = pmm.alloc_frame().unwrap();
        let kernel_ctx = MmuContext::from_pml4(kernel_frame);
        let child = parent.fork_space(kernel_ctx).unwrap();

        assert!(mmu.is_cow_page(parent.mmu_context(), va));
        assert!(mmu.is_cow_page(child.mmu_context(), va));
        assert_eq!(mmu.virt_to_phys(parent.mmu_context(), va), mmu.virt_to_phys(child.mmu_context(), va));
    }
}
