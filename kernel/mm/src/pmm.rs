//! Zoned physical page-frame allocator.
//!
//! Grounded on `mm/src/pmm.rs`'s singleton-behind-a-lock, `FrameAllocator`-
//! style API, page-poisoning debug hook, and host-testable-via-a-fake-
//! backing-buffer shape, but the allocation *algorithm* departs from that
//! module's bitmap: three per-zone singly linked stacks of free frames,
//! the link threaded through the first eight bytes of the frame itself.
//!
//! A frame's zone is fixed by its physical address: DMA
//! (< 16 MiB), DMA32 (< 4 GiB), Normal (>= 4 GiB).

use bitflags::bitflags;
use planck_noalloc::vec::ArrayVec;
use vireo_core::addr::PhysAddr;
use vireo_core::sync::IrqSpinLock;

use crate::phys_map::PhysMap;

/// Upper (exclusive) bound of the DMA zone.
const DMA_LIMIT: u64 = 16 * 1024 * 1024;
/// Upper (exclusive) bound of the DMA32 zone.
const DMA32_LIMIT: u64 = 4 * 1024 * 1024 * 1024;

/// Frame size. The PMM only ever hands out 4 KiB frames.
pub const FRAME_SIZE: u64 = 4096;

/// Maximum contiguous run `alloc_pages` will search for.
///
/// An O(free pages) scan is acceptable because large contiguous
/// requests are rare driver-init-time-only operations; to keep that scan
/// allocation-free we cap the window of candidate addresses considered per
/// call rather than requiring unbounded storage.
pub const MAX_CONTIG_PAGES: usize = 64;

/// A physical memory zone, classified by address range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Zone {
    /// Below 16 MiB — reachable by legacy ISA DMA.
    Dma,
    /// Below 4 GiB — reachable by 32-bit-only DMA engines.
    Dma32,
    /// Everything else.
    Normal,
}

impl Zone {
    /// Classifies a physical address into its zone.
    #[must_use]
    pub fn classify(addr: PhysAddr) -> Self {
        let a = addr.as_u64();
        if a < DMA_LIMIT {
            Zone::Dma
        } else if a < DMA32_LIMIT {
            Zone::Dma32
        } else {
            Zone::Normal
        }
    }

    const fn index(self) -> usize {
        match self {
            Zone::Dma => 0,
            Zone::Dma32 => 1,
            Zone::Normal => 2,
        }
    }
}

bitflags! {
    /// Placement restrictions for [`Pmm::alloc_page_flags`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AllocFlags: u32 {
        /// Restrict to the DMA zone only.
        const DMA = 1 << 0;
        /// Restrict to DMA32-or-lower (DMA32 or DMA).
        const DMA32 = 1 << 1;
        /// Zero the returned page. Pages are always zeroed regardless; kept
        /// for API fidelity with the source kernel's flag set.
        const ZERO = 1 << 2;
    }
}

/// Per-zone bookkeeping: free-stack head, counters, watermarks.
struct ZoneState {
    /// Head of the intrusive free-frame stack, or `None` if empty.
    free_head: Option<PhysAddr>,
    total: u64,
    free: u64,
    watermark_min: u64,
    watermark_low: u64,
    watermark_high: u64,
    alloc_count: u64,
    free_count: u64,
    alloc_failed: u64,
}

impl ZoneState {
    const fn empty() -> Self {
        Self {
            free_head: None,
            total: 0,
            free: 0,
            watermark_min: 0,
            watermark_low: 0,
            watermark_high: 0,
            alloc_count: 0,
            free_count: 0,
            alloc_failed: 0,
        }
    }

    fn recompute_watermarks(&mut self) {
        let min = (self.total / 128).clamp(128, 1024);
        self.watermark_min = min;
        self.watermark_low = min * 2;
        self.watermark_high = min * 3;
    }
}

/// The physical memory manager: one free stack per zone, each behind its own
/// IRQ-safe spinlock serializing access to that zone's stack.
pub struct Pmm<A: PhysMap> {
    access: A,
    zones: [IrqSpinLock<ZoneState>; 3],
    poison_on_free: bool,
}

impl<A: PhysMap> Pmm<A> {
    /// Creates an empty PMM. Call [`Pmm::add_region`] for every USABLE
    /// region in the loader's memory map before the first allocation.
    #[must_use]
    pub const fn new(access: A) -> Self {
        Self {
            access,
            zones: [
                IrqSpinLock::new(ZoneState::empty()),
                IrqSpinLock::new(ZoneState::empty()),
                IrqSpinLock::new(ZoneState::empty()),
            ],
            poison_on_free: false,
        }
    }

    /// Enables a debug poison pattern (`0xF4` repeated) written to a frame's
    /// body when it is freed, to catch use-after-free.
    #[must_use]
    pub fn with_poison_on_free(mut self, enable: bool) -> Self {
        self.poison_on_free = enable;
        self
    }

    fn link_ptr(&self, addr: PhysAddr) -> *mut u64 {
        self.access.ptr(addr).cast::<u64>()
    }

    /// Returns the [`PhysMap`] this PMM translates frames through, so
    /// callers that need to read/write a frame's contents (the page-table
    /// walker, the heap) can share the same translation without threading
    /// a second handle around.
    pub fn phys_map(&self) -> &A {
        &self.access
    }

    /// Allocates one zeroed frame and hands it back as a raw frame address,
    /// for use by callers (the page-table walker) that need a frame for
    /// their own bookkeeping rather than a mapped page.
    pub fn alloc_frame(&self) -> Option<PhysAddr> {
        self.alloc_page()
    }

    /// Registers a USABLE region from the loader's memory map, pushing each
    /// of its frames onto the appropriate zone's free stack.
    ///
    /// `start` and `len` must be frame-aligned. Frames that straddle a zone
    /// boundary are classified individually.
    pub fn add_region(&self, start: PhysAddr, len: u64) {
        assert!(start.is_aligned(FRAME_SIZE), "region start not frame-aligned");
        assert!(len % FRAME_SIZE == 0, "region length not a multiple of FRAME_SIZE");
        let count = len / FRAME_SIZE;
        for i in 0..count {
            let addr = start.offset(i * FRAME_SIZE);
            self.seed_frame(addr);
        }
    }

    fn zone_state(&self, zone: Zone) -> &IrqSpinLock<ZoneState> {
        &self.zones[zone.index()]
    }

    /// Links `addr` onto its zone's free stack without touching `total`.
    /// Used by both initial seeding and `free_page`; the two differ only in
    /// whether the frame being linked already counted toward `total`.
    fn link_free(&self, addr: PhysAddr) {
        let zone = Zone::classify(addr);
        let mut state = self.zone_state(zone).lock();
        // SAFETY: `addr` is a frame-aligned physical address the caller
        // asserts is usable and not concurrently aliased.
        unsafe {
            *self.link_ptr(addr) = state.free_head.map_or(u64::MAX, PhysAddr::as_u64);
        }
        state.free_head = Some(addr);
        state.free += 1;
        state.recompute_watermarks();
    }

    /// Registers a brand-new frame with its zone: adds it to `total` and
    /// links it onto the free stack. Only `add_region` calls this — a
    /// frame's `total` contribution is fixed at boot, never at free time.
    fn seed_frame(&self, addr: PhysAddr) {
        let zone = Zone::classify(addr);
        self.zone_state(zone).lock().total += 1;
        self.link_free(addr);
    }

    fn pop_free(&self, zone: Zone) -> Option<PhysAddr> {
        let mut state = self.zone_state(zone).lock();
        let head = state.free_head?;
        // SAFETY: `head` was linked onto the free stack and is still on
        // it, so its link word is valid.
        let next = unsafe { *self.link_ptr(head) };
        state.free_head = if next == u64::MAX {
            None
        } else {
            Some(PhysAddr::new(next))
        };
        state.free -= 1;
        state.alloc_count += 1;
        Some(head)
    }

    fn zero_frame(&self, addr: PhysAddr) {
        // SAFETY: the frame was just removed from the free stack; nothing
        // else holds a reference to it yet.
        unsafe {
            let ptr = self.access.ptr(addr);
            core::ptr::write_bytes(ptr, 0, FRAME_SIZE as usize);
        }
    }

    /// Allocates one frame, trying Normal, then DMA32, then DMA.
    pub fn alloc_page(&self) -> Option<PhysAddr> {
        self.alloc_page_flags(AllocFlags::empty())
    }

    /// Allocates one frame from a specific zone only.
    pub fn alloc_page_zone(&self, zone: Zone) -> Option<PhysAddr> {
        match self.pop_free(zone) {
            Some(addr) => {
                self.zero_frame(addr);
                Some(addr)
            }
            None => {
                self.zone_state(zone).lock().alloc_failed += 1;
                None
            }
        }
    }

    /// Allocates one frame honoring placement flags.
    pub fn alloc_page_flags(&self, flags: AllocFlags) -> Option<PhysAddr> {
        let search_order: &[Zone] = if flags.contains(AllocFlags::DMA) {
            &[Zone::Dma]
        } else if flags.contains(AllocFlags::DMA32) {
            &[Zone::Dma32, Zone::Dma]
        } else {
            &[Zone::Normal, Zone::Dma32, Zone::Dma]
        };
        for &zone in search_order {
            if let Some(addr) = self.pop_free(zone) {
                self.zero_frame(addr);
                return Some(addr);
            }
        }
        // Every candidate zone was exhausted; charge the failure to the
        // first (preferred) zone in the search order.
        if let Some(&zone) = search_order.first() {
            self.zone_state(zone).lock().alloc_failed += 1;
        }
        None
    }

    /// Allocates `n` physically contiguous frames from `zone`.
    ///
    /// Scans the free stack for a contiguous run (O(free pages),
    /// accepted because large contiguous allocations are rare). Returns
    /// `None` if `n` exceeds [`MAX_CONTIG_PAGES`] or no run is found.
    pub fn alloc_pages(&self, n: u64, zone: Zone) -> Option<PhysAddr> {
        if n == 0 {
            return None;
        }
        if n == 1 {
            return self.alloc_page_zone(zone);
        }
        let n = usize::try_from(n).ok()?;
        if n > MAX_CONTIG_PAGES {
            return None;
        }

        let mut state = self.zone_state(zone).lock();
        let mut candidates: ArrayVec<u64, MAX_CONTIG_PAGES> = ArrayVec::new();
        let mut cur = state.free_head;
        while let Some(addr) = cur {
            if candidates.push(addr.as_u64()).is_err() {
                break;
            }
            // SAFETY: `addr` is currently on the free stack.
            let next = unsafe { *self.link_ptr(addr) };
            cur = if next == u64::MAX {
                None
            } else {
                Some(PhysAddr::new(next))
            };
        }

        let mut run_start = None;
        'outer: for &candidate in candidates.iter() {
            for k in 0..n as u64 {
                let want = candidate + k * FRAME_SIZE;
                if !candidates.iter().any(|&a| a == want) {
                    continue 'outer;
                }
            }
            run_start = Some(candidate);
            break;
        }

        let Some(start) = run_start else {
            state.alloc_failed += 1;
            return None;
        };

        // Remove each frame of the run from the free stack by relinking.
        drop(state);
        for k in 0..n as u64 {
            self.remove_specific(zone, PhysAddr::new(start + k * FRAME_SIZE));
        }
        let base = PhysAddr::new(start);
        // SAFETY: every frame in the run was just removed from the free
        // stack and is otherwise unreferenced.
        unsafe {
            let ptr = self.access.ptr(base);
            core::ptr::write_bytes(ptr, 0, FRAME_SIZE as usize * n);
        }
        self.zone_state(zone).lock().alloc_count += 1;
        Some(base)
    }

    /// Removes one specific frame from the free stack, wherever it is.
    fn remove_specific(&self, zone: Zone, target: PhysAddr) {
        let mut state = self.zone_state(zone).lock();
        let Some(head) = state.free_head else { return };
        if head == target {
            // SAFETY: `head` is on the free stack.
            let next = unsafe { *self.link_ptr(head) };
            state.free_head = if next == u64::MAX { None } else { Some(PhysAddr::new(next)) };
            state.free -= 1;
            return;
        }
        let mut prev = head;
        loop {
            // SAFETY: `prev` is on the free stack.
            let next_raw = unsafe { *self.link_ptr(prev) };
            if next_raw == u64::MAX {
                return;
            }
            let next = PhysAddr::new(next_raw);
            if next == target {
                // SAFETY: `next` (== target) is on the free stack.
                let next_next = unsafe { *self.link_ptr(next) };
                // SAFETY: `prev` is on the free stack and we hold the lock.
                unsafe {
                    *self.link_ptr(prev) = next_next;
                }
                state.free -= 1;
                return;
            }
            prev = next;
        }
    }

    /// Returns one frame to its zone's free stack.
    ///
    /// `addr` must have been returned by a prior `alloc_*` call on this PMM
    /// and not already freed.
    pub fn free_page(&self, addr: PhysAddr) {
        if !addr.is_aligned(FRAME_SIZE) {
            return;
        }
        if self.poison_on_free {
            // SAFETY: the caller attests this frame is no longer referenced
            // by anyone.
            unsafe {
                let ptr = self.access.ptr(addr);
                core::ptr::write_bytes(ptr, 0xF4, FRAME_SIZE as usize);
            }
        }
        self.link_free(addr);
        let zone = Zone::classify(addr);
        self.zone_state(zone).lock().free_count += 1;
    }

    /// Returns `n` contiguous frames starting at `addr`.
    pub fn free_pages(&self, addr: PhysAddr, n: u64) {
        for i in 0..n {
            self.free_page(addr.offset(i * FRAME_SIZE));
        }
    }

    /// Total frames currently free across all zones.
    pub fn total_free(&self) -> u64 {
        self.zones.iter().map(|z| z.lock().free).sum()
    }

    /// `true` if `zone`'s free count has dropped at or below its low
    /// watermark. Query-only: the PMM never throttles on its own
    ///.
    pub fn is_low_memory(&self, zone: Zone) -> bool {
        let state = self.zone_state(zone).lock();
        state.free <= state.watermark_low
    }

    /// `(free, total, alloc_failed)` for `zone`, for diagnostics/tests.
    pub fn zone_stats(&self, zone: Zone) -> (u64, u64, u64) {
        let state = self.zone_state(zone).lock();
        (state.free, state.total, state.alloc_failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::alloc::{alloc_zeroed, Layout};

    /// A fake backing store standing in for the HHDM: a host heap buffer
    /// that physical address 0 is defined to map to the start of.
    struct TestBacking {
        base: *mut u8,
        len: usize,
    }

    // SAFETY: the buffer is exclusively owned by the test and outlives the PMM.
    unsafe impl Send for TestBacking {}
    unsafe impl Sync for TestBacking {}

    unsafe impl PhysMap for TestBacking {
        fn ptr(&self, addr: PhysAddr) -> *mut u8 {
            let offset = addr.as_usize();
            assert!(offset + 8 <= self.len, "test backing too small");
            // SAFETY: offset bounds checked above.
            unsafe { self.base.add(offset) }
        }
    }

    fn make_pmm(num_frames: u64) -> Pmm<TestBacking> {
        let len = (num_frames * FRAME_SIZE) as usize;
        let layout = Layout::from_size_align(len, FRAME_SIZE as usize).unwrap();
        // SAFETY: layout is non-zero-sized and properly aligned.
        let base = unsafe { alloc_zeroed(layout) };
        let pmm = Pmm::new(TestBacking { base, len });
        pmm.add_region(PhysAddr::new(DMA32_LIMIT), num_frames * FRAME_SIZE);
        pmm
    }

    #[test]
    fn zone_classification_boundaries() {
        assert_eq!(Zone::classify(PhysAddr::new(0)), Zone::Dma);
        assert_eq!(Zone::classify(PhysAddr::new(DMA_LIMIT - FRAME_SIZE)), Zone::Dma);
        assert_eq!(Zone::classify(PhysAddr::new(DMA_LIMIT)), Zone::Dma32);
        assert_eq!(Zone::classify(PhysAddr::new(DMA32_LIMIT - FRAME_SIZE)), Zone::Dma32);
        assert_eq!(Zone::classify(PhysAddr::new(DMA32_LIMIT)), Zone::Normal);
    }

    #[test]
    fn alloc_free_conserves_total() {
        let pmm = make_pmm(16);
        let (free0, total0, _) = pmm.zone_stats(Zone::Normal);
        assert_eq!(free0, total0);

        let a = pmm.alloc_page().unwrap();
        let (free1, total1, _) = pmm.zone_stats(Zone::Normal);
        assert_eq!(free1, free0 - 1);
        assert_eq!(total1, total0);

        pmm.free_page(a);
        let (free2, _, _) = pmm.zone_stats(Zone::Normal);
        assert_eq!(free2, free0);
    }

    #[test]
    fn alloc_never_returns_same_frame_twice_before_free() {
        let pmm = make_pmm(4);
        let a = pmm.alloc_page().unwrap();
        let b = pmm.alloc_page().unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn exhausting_zone_fails_cleanly() {
        let pmm = make_pmm(2);
        let _a = pmm.alloc_page().unwrap();
        let _b = pmm.alloc_page().unwrap();
        assert!(pmm.alloc_page().is_none());
        let (_, _, failed) = pmm.zone_stats(Zone::Normal);
        assert_eq!(failed, 1);
    }

    #[test]
    fn returned_pages_are_zeroed() {
        let pmm = make_pmm(2);
        let a = pmm.alloc_page().unwrap();
        // SAFETY: test-only direct access through the fake backing.
        unsafe {
            let ptr = pmm.access.ptr(a);
            *ptr = 0xAB;
        }
        pmm.free_page(a);
        let b = pmm.alloc_page().unwrap();
        assert_eq!(a, b);
        // SAFETY: test-only direct access through the fake backing.
        unsafe {
            let ptr = pmm.access.ptr(b);
            assert_eq!(*ptr, 0);
        }
    }

    #[test]
    fn alloc_pages_returns_contiguous_run() {
        let pmm = make_pmm(8);
        let base = pmm.alloc_pages(4, Zone::Normal).unwrap();
        // All four frames must now be unavailable individually.
        let (free, total, _) = pmm.zone_stats(Zone::Normal);
        assert_eq!(free, total - 4);
        pmm.free_pages(base, 4);
        let (free2, total2, _) = pmm.zone_stats(Zone::Normal);
        assert_eq!(free2, total2);
    }

    #[test]
    fn watermarks_clamped() {
        let pmm = make_pmm(4);
        let state = pmm.zone_state(Zone::Normal).lock();
        assert_eq!(state.watermark_min, 128);
        assert_eq!(state.watermark_low, 256);
        assert_eq!(state.watermark_high, 384);
    }

    #[test]
    fn is_low_memory_after_exhaustion() {
        let pmm = make_pmm(1);
        assert!(pmm.is_low_memory(Zone::Normal));
    }

    #[test]
    fn misaligned_free_is_ignored() {
        let pmm = make_pmm(2);
        // Should not panic or corrupt the free list.
        pmm.free_page(PhysAddr::new(DMA32_LIMIT + 1));
        let (free, total, _) = pmm.zone_stats(Zone::Normal);
        assert_eq!(free, total);
    }
}
