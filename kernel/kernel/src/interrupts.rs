//! Architecture-independent interrupt entry points.
//!
//! The GDT/IDT and the raw ISR stubs that route a CPU exception or IRQ
//! into the functions below are out-of-scope architecture glue; this
//! module is the seam those stubs call into, so every decision about what
//! a page fault or a timer tick *means* lives here instead of in assembly.
//! Grounded on the split between IDT construction
//! (`hadron-kernel/src/arch/x86_64/idt.rs`, not reproduced here) and the
//! handler bodies it calls.

use vireo_core::addr::VirtAddr;
use vireo_mm::mapper::PageFaultCode;
use vireo_mm::vmm::FaultError;
use vireo_sched::timer::TimerTick;

use crate::state;

/// Called once per timer interrupt (IRQ0, nominally
/// [`vireo_core::config::TIMER_HZ`] times a second). Advances the shared
/// clock, then lets the scheduler update run-queue bookkeeping (aging,
/// time-slice accounting, waking expired sleepers). Never switches context
/// itself — an ISR stub calling this must still
/// follow up with `schedule()`/the context-switch trampoline on return,
/// which is architecture glue this workspace does not own.
pub fn timer_interrupt() {
    state::tick_clock().advance_one_tick();
    state::scheduler().tick(state::tick_clock().now_ns());
}

/// Called from the `#PF` handler stub with the faulting address and the
/// raw CPU error code. Resolves copy-on-write breaks and lazy allocations
/// through the kernel address space's VMA bookkeeping; anything else is
/// reported back to the stub, which is expected to escalate to a process
/// signal (SIGSEGV) — out of scope here since that requires the
/// still-unbuilt user-mode fault path.
///
/// # Errors
/// Returns [`FaultError`] unchanged when the fault could not be resolved.
pub fn page_fault(fault_addr: u64, raw_error_code: u64) -> Result<(), FaultError> {
    let code = PageFaultCode::decode(raw_error_code);
    let va = VirtAddr::new_truncate(fault_addr);
    state::kernel_space()
        .handle_fault_with_mmu_fallback(va, code)
        .map(|_| ())
}
