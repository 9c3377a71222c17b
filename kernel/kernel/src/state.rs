//! Global kernel singletons.
//!
//! Global mutable state (scheduler runqueues, mount list, PMM zones, heap)
//! each becomes a process-wide singleton initialized once at boot, guarded
//! by an appropriate lock, and accessed through module-level accessors.
//! `no_std` `core` has no `OnceLock`, so each singleton below is a
//! [`RacyCell<Option<T>>`]: the relevant `init_*` function writes it
//! exactly once, from [`crate::boot::kernel_init`], before interrupts are
//! enabled; every accessor afterward unwraps unconditionally. This mirrors
//! `with_pmm`/`with_vmm`-style closure-accessor idioms, adapted to the
//! borrow-checker-friendlier `&'static` return style used throughout this
//! workspace's lower crates.
//!
//! The PMM and the MMU are the two exceptions: both are usable as plain
//! `const`-initialized `static`s, since `Pmm::new` and `Mmu::new` need only
//! their (zero-sized) physical-memory accessor and, for the MMU, a `'static`
//! reference to the PMM static — no runtime boot data is required to
//! construct either.

use vireo_core::cell::RacyCell;
use vireo_fs::bcache::{Bcache, SpinYielder};
use vireo_fs::block::BlockRegistry;
use vireo_fs::vfs::Vfs;
use vireo_mm::heap::Heap;
use vireo_mm::mapper::{Mmu, MmuContext};
use vireo_mm::pmm::Pmm;
use vireo_mm::vmm::AddressSpace;
use vireo_sched::process::ProcessTable;
use vireo_sched::scheduler::Scheduler;
use vireo_sched::tcb::KernelStack;
use vireo_core::id::Tid;

use crate::arch::{Cpu, TickClock};
use crate::hhdm::HhdmPhysMap;

/// The concrete scheduler type this binary runs: a tick-driven clock shared
/// with the timer interrupt handler, and the cooperative stack-switch
/// [`Cpu`] context.
pub type KScheduler = Scheduler<&'static TickClock, Cpu>;

static PMM: Pmm<HhdmPhysMap> = Pmm::new(HhdmPhysMap);
static MMU: Mmu<'static, HhdmPhysMap> = Mmu::new(&PMM);
static TICK_CLOCK: TickClock = TickClock::new();

static KERNEL_SPACE: RacyCell<Option<AddressSpace<'static, HhdmPhysMap>>> = RacyCell::new(None);
static HEAP: RacyCell<Option<Heap<HhdmPhysMap>>> = RacyCell::new(None);
static SCHEDULER: RacyCell<Option<KScheduler>> = RacyCell::new(None);
static PROCESS_TABLE: RacyCell<Option<ProcessTable>> = RacyCell::new(None);
static BLOCK_REGISTRY: RacyCell<Option<BlockRegistry>> = RacyCell::new(None);
static BCACHE: RacyCell<Option<Bcache<SpinYielder>>> = RacyCell::new(None);
static VFS: RacyCell<Option<Vfs>> = RacyCell::new(None);

/// The physical-memory allocator. Usable immediately; its zones start
/// empty until [`crate::boot::kernel_init`] feeds the loader's
/// memory map through [`Pmm::add_region`].
#[must_use]
pub fn pmm() -> &'static Pmm<HhdmPhysMap> {
    &PMM
}

/// The page-table mapper. Usable immediately; every [`MmuContext`] it
/// operates on is created explicitly by the caller.
#[must_use]
pub fn mmu() -> &'static Mmu<'static, HhdmPhysMap> {
    &MMU
}

/// The timer-tick clock shared by [`scheduler`] and
/// [`crate::interrupts::timer_interrupt`].
#[must_use]
pub fn tick_clock() -> &'static TickClock {
    &TICK_CLOCK
}

/// Installs the kernel address space, wrapping the [`MmuContext`] Limine
/// already left active in `CR3`.
///
/// # Safety
/// Must be called exactly once, from [`crate::boot::kernel_init`], before
/// any other code calls [`kernel_space`].
pub unsafe fn init_kernel_space(ctx: MmuContext) {
    // SAFETY: single-threaded boot, called once, no concurrent access yet.
    unsafe {
        *KERNEL_SPACE.get() = Some(AddressSpace::new(&MMU, ctx, false));
    }
}

/// The kernel's address space.
///
/// # Panics
/// Panics if [`init_kernel_space`] has not yet run.
#[must_use]
pub fn kernel_space() -> &'static AddressSpace<'static, HhdmPhysMap> {
    // SAFETY: only ever written once by `init_kernel_space` before any
    // reader could observe it.
    unsafe { (*KERNEL_SPACE.get()).as_ref() }.expect("kernel address space not initialized")
}

/// Installs the kernel heap. Callers must still seed it with
/// [`vireo_mm::heap::Heap::add_region`] before the first allocation.
///
/// # Safety
/// Must be called exactly once, before [`heap`] or the global allocator is
/// used.
pub unsafe fn init_heap() {
    // SAFETY: single-threaded boot, called once.
    unsafe {
        *HEAP.get() = Some(Heap::new());
    }
}

/// The kernel heap backing `#[global_allocator]`.
///
/// # Panics
/// Panics if [`init_heap`] has not yet run.
#[must_use]
pub fn heap() -> &'static Heap<HhdmPhysMap> {
    // SAFETY: only ever written once by `init_heap`.
    unsafe { (*HEAP.get()).as_ref() }.expect("heap not initialized")
}

/// Installs the scheduler, creates its idle thread, and adopts the calling
/// (boot) context as the first running thread.
///
/// # Safety
/// Must be called exactly once, before [`scheduler`] is used, and only
/// after [`init_heap`] (the idle thread's stack is heap-backed).
pub unsafe fn init_scheduler(idle_stack: KernelStack) -> Tid {
    // SAFETY: single-threaded boot, called once.
    unsafe {
        *SCHEDULER.get() = Some(Scheduler::new(tick_clock(), Cpu));
    }
    scheduler().init(idle_stack)
}

/// The kernel's one scheduler.
///
/// # Panics
/// Panics if [`init_scheduler`] has not yet run.
#[must_use]
pub fn scheduler() -> &'static KScheduler {
    // SAFETY: only ever written once by `init_scheduler`.
    unsafe { (*SCHEDULER.get()).as_ref() }.expect("scheduler not initialized")
}

/// Installs the process table.
///
/// # Safety
/// Must be called exactly once, before [`process_table`] is used.
pub unsafe fn init_process_table() {
    // SAFETY: single-threaded boot, called once.
    unsafe {
        *PROCESS_TABLE.get() = Some(ProcessTable::new());
    }
}

/// The kernel's one process table.
///
/// # Panics
/// Panics if [`init_process_table`] has not yet run.
#[must_use]
pub fn process_table() -> &'static ProcessTable {
    // SAFETY: only ever written once by `init_process_table`.
    unsafe { (*PROCESS_TABLE.get()).as_ref() }.expect("process table not initialized")
}

/// Installs the block device registry.
///
/// # Safety
/// Must be called exactly once, before [`block_registry`] is used.
pub unsafe fn init_block_registry() {
    // SAFETY: single-threaded boot, called once.
    unsafe {
        *BLOCK_REGISTRY.get() = Some(BlockRegistry::new());
    }
}

/// The kernel's one block device registry.
///
/// # Panics
/// Panics if [`init_block_registry`] has not yet run.
#[must_use]
pub fn block_registry() -> &'static BlockRegistry {
    // SAFETY: only ever written once by `init_block_registry`.
    unsafe { (*BLOCK_REGISTRY.get()).as_ref() }.expect("block registry not initialized")
}

/// Installs the buffer cache.
///
/// # Safety
/// Must be called exactly once, before [`bcache`] is used.
pub unsafe fn init_bcache() {
    // SAFETY: single-threaded boot, called once.
    unsafe {
        *BCACHE.get() = Some(Bcache::new(SpinYielder));
    }
}

/// The kernel's one buffer cache.
///
/// # Panics
/// Panics if [`init_bcache`] has not yet run.
#[must_use]
pub fn bcache() -> &'static Bcache<SpinYielder> {
    // SAFETY: only ever written once by `init_bcache`.
    unsafe { (*BCACHE.get()).as_ref() }.expect("buffer cache not initialized")
}

/// Installs the VFS mount table.
///
/// # Safety
/// Must be called exactly once, before [`vfs`] is used.
pub unsafe fn init_vfs() {
    // SAFETY: single-threaded boot, called once.
    unsafe {
        *VFS.get() = Some(Vfs::new());
    }
}

/// The kernel's one VFS mount table.
///
/// # Panics
/// Panics if [`init_vfs`] has not yet run.
#[must_use]
pub fn vfs() -> &'static Vfs {
    // SAFETY: only ever written once by `init_vfs`.
    unsafe { (*VFS.get()).as_ref() }.expect("vfs not initialized")
}
