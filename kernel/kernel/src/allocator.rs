//! The `#[global_allocator]` bridge from Rust's [`GlobalAlloc`] to
//! [`vireo_mm::heap::Heap`].
//!
//! `hadron-core/src/mm/heap.rs` owns its allocator algorithm directly
//! behind `GlobalAlloc`; this workspace keeps that
//! algorithm in [`vireo_mm::heap::Heap`] instead (shared with host tests
//! that never touch a global allocator), so this module is a thin
//! `GlobalAlloc` shim plus the growth callback a `register_grow_fn`/
//! `grow_fn` pair models: when the heap can't satisfy a
//! request, map another chunk of kernel virtual memory through
//! [`crate::state::kernel_space`] and feed it to
//! [`vireo_mm::heap::Heap::add_region`].

use core::alloc::{GlobalAlloc, Layout};
use core::sync::atomic::{AtomicU64, Ordering};

use vireo_mm::heap::expansion_size;
use vireo_mm::mapper::MapFlags;
use vireo_mm::vmm::AllocFlags;

use crate::state;

/// Running total of bytes the heap has been granted via [`grow`], tracked
/// independently of [`Heap::live_bytes`] (which counts bytes handed to
/// callers, not bytes mapped in).
static HEAP_TOTAL: AtomicU64 = AtomicU64::new(0);

struct KernelAllocator;

// SAFETY: `Heap` itself is the only shared mutable state touched here, and
// it serializes access internally.
unsafe impl GlobalAlloc for KernelAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let zero = false;
        if let Some(ptr) = state::heap().alloc(layout.size(), zero) {
            return ptr;
        }
        if grow(layout.size() as u64).is_err() {
            return core::ptr::null_mut();
        }
        state::heap()
            .alloc(layout.size(), zero)
            .unwrap_or(core::ptr::null_mut())
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        // SAFETY: `ptr` was returned by a prior call to this allocator's
        // `alloc`, satisfying `Heap::free`'s contract.
        unsafe {
            state::heap().free(ptr);
        }
    }
}

/// Maps another chunk of kernel virtual memory and hands it to the heap.
/// Sized by [`expansion_size`] (whole [`vireo_core::config::HEAP_EXPAND_CHUNK`]
/// multiples, capped at [`vireo_core::config::KERNEL_HEAP_MAX`]).
fn grow(min: u64) -> Result<(), ()> {
    let current = HEAP_TOTAL.load(Ordering::Relaxed);
    let Ok(chunk) = expansion_size(min, current) else {
        return Err(());
    };
    let Ok(vma) = state::kernel_space().alloc_region(chunk, MapFlags::KERNEL_RW, AllocFlags::empty())
    else {
        return Err(());
    };
    // SAFETY: `alloc_region` with `AllocFlags::empty()` (not `LAZY`) backs
    // the whole range with zeroed physical frames before returning.
    unsafe {
        state::heap().add_region(vma.start(), vma.len());
    }
    HEAP_TOTAL.fetch_add(vma.len(), Ordering::Relaxed);
    Ok(())
}

#[global_allocator]
static ALLOCATOR: KernelAllocator = KernelAllocator;

/// Seeds the heap's very first region. Unlike later growth (handled
/// transparently by [`grow`] on allocation failure), the initial region
/// must exist before the first `alloc` call, so
/// [`crate::boot::kernel_init`] calls this explicitly right after
/// [`state::init_heap`].
///
/// Failure here is the one unrecoverable allocation failure: the kernel
/// cannot run at all without an initial heap.
pub fn init_initial_region() {
    let size = vireo_core::config::KERNEL_HEAP_INITIAL;
    let Ok(vma) = state::kernel_space().alloc_region(size, MapFlags::KERNEL_RW, AllocFlags::empty())
    else {
        crate::kpanic!("failed to map initial kernel heap region");
    };
    // SAFETY: same reasoning as in `grow`: `alloc_region` without `LAZY`
    // backs the whole range eagerly.
    unsafe {
        state::heap().add_region(vma.start(), vma.len());
    }
    HEAP_TOTAL.store(vma.len(), Ordering::Relaxed);
}
