//! Bootloader-agnostic boot information and the kernel bring-up sequence.
//!
//! [`BootInfo`] abstracts over whatever the actual loader handed the
//! kernel (only Limine is wired up, in [`crate::main`]) so that
//! [`kernel_init`] never mentions Limine's own response types directly.
//! Trimmed down from a much richer `BootInfo` (framebuffers, SMBIOS,
//! initrd, SMP tables) to the handful of fields the bring-up sequence below
//! actually consumes — a framebuffer console, ACPI/SMP bring-up, and an
//! initrd unpacker all sit outside this workspace's scope.

extern crate alloc;

use alloc::sync::Arc;

use vireo_core::addr::PhysAddr;
use vireo_fs::tmpfs::TmpfsType;
use vireo_fs::vfs::MountFlags;
use vireo_mm::mapper::{MapFlags, MmuContext};
use vireo_mm::vmm::AllocFlags;
use vireo_sched::tcb::KernelStack;

use crate::{allocator, arch, hhdm, log, state};

/// The kind of a physical memory region reported by the bootloader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryRegionKind {
    /// Usable RAM, free for [`vireo_mm::pmm::Pmm`] to manage.
    Usable,
    /// Anything else: reserved, ACPI, bad memory, the kernel image itself,
    /// bootloader-reclaimable pages not yet reclaimed. Left untouched.
    Other,
}

/// Maximum number of memory regions the kernel binary's bounded, heap-free
/// collector will record before silently dropping the rest. Generous
/// enough for any real firmware memory map; a dropped region only means a
/// sliver of physical memory the PMM never learns about.
pub const MAX_MEMORY_REGIONS: usize = 256;

/// A contiguous physical memory region from the bootloader's memory map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryRegion {
    /// Physical start address.
    pub start: PhysAddr,
    /// Size in bytes.
    pub size: u64,
    /// What this region may be used for.
    pub kind: MemoryRegionKind,
}

/// Boot-time facts the kernel needs, independent of which loader supplied
/// them.
pub trait BootInfo {
    /// Physical memory map, in no particular order.
    fn memory_map(&self) -> &[MemoryRegion];
    /// HHDM offset: `virtual = physical + hhdm_offset()`.
    fn hhdm_offset(&self) -> u64;
    /// Physical address of the root page table the loader left active.
    fn page_table_root(&self) -> PhysAddr;
}

/// Bytes reserved for the idle thread's kernel stack.
const IDLE_STACK_SIZE: u64 = 16 * 1024;

/// Runs the full bring-up sequence and falls into the idle
/// loop. Never returns.
pub fn kernel_init(boot_info: &impl BootInfo) -> ! {
    arch::cpu_init();
    log::init_early_serial();

    hhdm::init(boot_info.hhdm_offset());
    crate::info!("HHDM initialized at offset {:#x}", boot_info.hhdm_offset());

    for region in boot_info.memory_map() {
        if region.kind == MemoryRegionKind::Usable {
            state::pmm().add_region(region.start, region.size);
        }
    }
    crate::info!(
        "PMM: {} MiB free",
        state::pmm().total_free() * 4096 / (1024 * 1024)
    );

    // SAFETY: called exactly once here, before anything reads the kernel
    // address space.
    unsafe {
        state::init_kernel_space(MmuContext::from_pml4(boot_info.page_table_root()));
    }

    // SAFETY: called exactly once, immediately followed by seeding the
    // heap's first region below.
    unsafe {
        state::init_heap();
    }
    allocator::init_initial_region();
    crate::info!("kernel heap initialized");

    log::init_logger();

    let idle_stack = alloc_kernel_stack(IDLE_STACK_SIZE);
    // SAFETY: called exactly once, after the heap (the scheduler's
    // internal `Vec` needs it) and after the idle stack is mapped.
    unsafe {
        state::init_scheduler(idle_stack);
    }

    // SAFETY: called exactly once.
    unsafe {
        state::init_process_table();
    }
    state::process_table().adopt_boot_process(state::scheduler(), "init");

    // SAFETY: called exactly once each.
    unsafe {
        state::init_block_registry();
        state::init_bcache();
        state::init_vfs();
    }

    state::vfs()
        .register_filesystem(Arc::new(TmpfsType::new()))
        .expect("tmpfs registration cannot fail this early");
    state::vfs()
        .mount("tmpfs", "/", None, MountFlags::empty())
        .expect("root mount cannot fail this early");
    crate::info!("root filesystem mounted (tmpfs)");

    crate::info!("vireo kernel initialized");

    // SAFETY: every handler interrupts can reach (`interrupts::page_fault`,
    // `interrupts::timer_interrupt`) reads only singletons initialized
    // above.
    unsafe {
        arch::enable_interrupts();
    }

    idle_loop();
}

/// Maps a fresh, eagerly-backed kernel stack and returns its bounds.
fn alloc_kernel_stack(size: u64) -> KernelStack {
    let vma = state::kernel_space()
        .alloc_region(size, MapFlags::KERNEL_RW, AllocFlags::empty())
        .expect("failed to map kernel stack");
    KernelStack::new(vma.start().as_u64(), vma.len())
}

fn idle_loop() -> ! {
    loop {
        arch::hlt();
    }
}
