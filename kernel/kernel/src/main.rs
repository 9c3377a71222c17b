//! Kernel entry point: Limine protocol requests and the handoff into
//! [`vireo_kernel::boot::kernel_init`].
//!
//! Grounded on the crates.io `limine` request-struct API (`#[used]`
//! statics in a `.requests` link section, `BASE_REVISION.is_supported()`,
//! `Request::get_response()`) rather than a hand-vendored boot-stub crate,
//! since this workspace pins the real `limine = "0.2"` dependency.

#![no_std]
#![no_main]

use limine::memory_map::EntryType;
use limine::request::{HhdmRequest, MemoryMapRequest, RequestsEndMarker, RequestsStartMarker};
use limine::BaseRevision;
use planck_noalloc::vec::ArrayVec;

use vireo_core::addr::PhysAddr;
use vireo_kernel::boot::{BootInfo, MemoryRegion, MemoryRegionKind, MAX_MEMORY_REGIONS};
use vireo_kernel::{arch, boot};

#[used]
#[unsafe(link_section = ".requests_start_marker")]
static _START_MARKER: RequestsStartMarker = RequestsStartMarker::new();

#[used]
#[unsafe(link_section = ".requests")]
static BASE_REVISION: BaseRevision = BaseRevision::new();

#[used]
#[unsafe(link_section = ".requests")]
static MEMORY_MAP_REQUEST: MemoryMapRequest = MemoryMapRequest::new();

#[used]
#[unsafe(link_section = ".requests")]
static HHDM_REQUEST: HhdmRequest = HhdmRequest::new();

#[used]
#[unsafe(link_section = ".requests_end_marker")]
static _END_MARKER: RequestsEndMarker = RequestsEndMarker::new();

/// [`BootInfo`] built from the responses Limine left behind. The memory
/// map is copied into a bounded, heap-free [`ArrayVec`] up front since
/// `kernel_init` consumes it before the kernel heap exists.
struct LimineBootInfo {
    regions: ArrayVec<MemoryRegion, MAX_MEMORY_REGIONS>,
    hhdm_offset: u64,
}

impl BootInfo for LimineBootInfo {
    fn memory_map(&self) -> &[MemoryRegion] {
        self.regions.as_slice()
    }

    fn hhdm_offset(&self) -> u64 {
        self.hhdm_offset
    }

    fn page_table_root(&self) -> PhysAddr {
        arch::read_cr3()
    }
}

#[no_mangle]
extern "C" fn kmain() -> ! {
    if !BASE_REVISION.is_supported() {
        halt_loop();
    }

    let mmap = MEMORY_MAP_REQUEST
        .get_response()
        .expect("bootloader did not answer the memory map request");
    let hhdm_offset = HHDM_REQUEST
        .get_response()
        .map(|r| r.offset())
        .expect("bootloader did not answer the HHDM request");

    let mut regions = ArrayVec::new();
    for entry in mmap.entries() {
        let region = MemoryRegion {
            start: PhysAddr::new(entry.base),
            size: entry.length,
            kind: if entry.entry_type == EntryType::USABLE {
                MemoryRegionKind::Usable
            } else {
                MemoryRegionKind::Other
            },
        };
        if regions.try_push(region).is_err() {
            break;
        }
    }

    let info = LimineBootInfo { regions, hhdm_offset };
    boot::kernel_init(&info);
}

fn halt_loop() -> ! {
    loop {
        arch::hlt();
    }
}

// Keeps the linker from discarding `kmain` as unreferenced, matching the
// teacher's own forced-reference idiom for bootloader-called entry points.
#[used]
#[link_section = ".text"]
static KMAIN_REFERENCE: extern "C" fn() -> ! = kmain;
