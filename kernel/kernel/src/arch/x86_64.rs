//! x86_64 CPU intrinsics, the cooperative stack switch, and a tick-driven
//! clock.

use core::arch::asm;
use core::sync::atomic::{AtomicU64, Ordering};

use vireo_core::addr::PhysAddr;
use vireo_core::id::Tid;
use vireo_sched::clock::MonotonicClock;
use vireo_sched::context::ContextSwitch;
use vireo_sched::tcb::KernelStack;

/// Architecture bring-up that has no counterpart in this workspace: real
/// GDT/IDT construction is out-of-scope glue, so this is
/// deliberately empty. Kept as a named call site in [`crate::boot::kernel_init`]
/// so that glue has an obvious place to attach later.
pub fn cpu_init() {}

/// Halts the CPU until the next interrupt.
#[inline]
pub fn hlt() {
    // SAFETY: `hlt` has no effect beyond suspending the CPU until an
    // interrupt arrives; always valid in ring 0.
    unsafe {
        asm!("hlt", options(nomem, nostack, preserves_flags));
    }
}

/// Enables maskable interrupts on this CPU.
///
/// # Safety
/// The caller must ensure interrupt handlers and their data structures are
/// fully initialized before interrupts can fire.
#[inline]
pub unsafe fn enable_interrupts() {
    // SAFETY: forwarded from the caller's contract.
    unsafe {
        asm!("sti", options(nomem, nostack));
    }
}

/// Disables maskable interrupts on this CPU.
#[inline]
pub fn disable_interrupts() {
    // SAFETY: `cli` has no effect beyond masking interrupts.
    unsafe {
        asm!("cli", options(nomem, nostack));
    }
}

/// Reads a byte from an I/O port.
///
/// # Safety
/// `port` must name a port safe to read at the current privilege level.
#[inline]
pub unsafe fn inb(port: u16) -> u8 {
    let value: u8;
    // SAFETY: forwarded from the caller's contract.
    unsafe {
        asm!("in al, dx", out("al") value, in("dx") port, options(nomem, nostack, preserves_flags));
    }
    value
}

/// Writes a byte to an I/O port.
///
/// # Safety
/// `port` must name a port safe to write at the current privilege level.
#[inline]
pub unsafe fn outb(port: u16, value: u8) {
    // SAFETY: forwarded from the caller's contract.
    unsafe {
        asm!("out dx, al", in("dx") port, in("al") value, options(nomem, nostack, preserves_flags));
    }
}

/// Reads the current `CR3` value (the PML4 frame Limine left installed).
#[must_use]
pub fn read_cr3() -> PhysAddr {
    let value: u64;
    // SAFETY: reading CR3 has no side effects.
    unsafe {
        asm!("mov {}, cr3", out(reg) value, options(nomem, nostack, preserves_flags));
    }
    PhysAddr::new(value & 0x000f_ffff_ffff_f000)
}

/// Writes `stack.top()` into `stack`'s lowest seven qwords so that
/// [`switch_stack`] restoring this saved pointer pops six zeroed
/// callee-saved registers and then "returns" into `entry`.
///
/// Mirrors xv6's `allocproc` priming a fresh kernel stack with a `context`
/// whose `ra` is `forkret`, adapted to the push/pop layout
/// [`switch_stack`] actually uses.
#[must_use]
pub fn prime_thread_stack(stack: KernelStack, entry: unsafe extern "C" fn() -> !) -> u64 {
    const FRAME_QWORDS: u64 = 7;
    let sp = stack.top() - FRAME_QWORDS * 8;
    let base = sp as *mut u64;
    // SAFETY: `stack` is a freshly allocated, otherwise-unused region at
    // least `FRAME_QWORDS * 8` bytes long.
    unsafe {
        base.add(0).write(0); // r15
        base.add(1).write(0); // r14
        base.add(2).write(0); // r13
        base.add(3).write(0); // r12
        base.add(4).write(0); // rbx
        base.add(5).write(0); // rbp
        base.add(6).write(entry as u64); // return address
    }
    sp
}

#[unsafe(naked)]
unsafe extern "C" fn switch_stack(old_sp: *mut u64, new_sp: u64) {
    core::arch::naked_asm!(
        "push rbp",
        "push rbx",
        "push r12",
        "push r13",
        "push r14",
        "push r15",
        "mov [rdi], rsp",
        "mov rsp, rsi",
        "pop r15",
        "pop r14",
        "pop r13",
        "pop r12",
        "pop rbx",
        "pop rbp",
        "ret",
    );
}

/// The workspace's one real [`ContextSwitch`]: a cooperative save/restore of
/// the callee-saved registers and stack pointer, nothing more. No FPU
/// state, no segment reload, no ring transition — those belong to the
/// out-of-scope user-mode trampoline.
#[derive(Debug, Default, Clone, Copy)]
pub struct Cpu;

impl ContextSwitch for Cpu {
    fn switch_to(&self, from: Tid, to: Tid) {
        let sched = crate::state::scheduler();
        let old_sp_addr = sched.with_tcb_mut(from, |tcb| core::ptr::addr_of_mut!(tcb.saved_sp) as u64);
        let new_sp = sched.with_tcb(to, |tcb| tcb.saved_sp);
        // SAFETY: both stacks were allocated by `vireo-mm` and are at least
        // `FRAME_QWORDS * 8` bytes; `schedule()` has already dropped its
        // internal lock before calling here, so `with_tcb`/`with_tcb_mut`
        // above cannot deadlock against it.
        unsafe {
            switch_stack(old_sp_addr as *mut u64, new_sp);
        }
    }
}

/// A [`MonotonicClock`] driven by the timer interrupt rather than a
/// calibrated TSC: [`crate::interrupts::timer_interrupt`] advances it by
/// exactly [`vireo_core::config::TIMER_PERIOD_NS`] per tick. Calibrating the
/// TSC against the PIT/HPET is architecture glue this workspace does not
/// own; a tick counter satisfies
/// [`MonotonicClock`]'s only contract ("must never go backwards") without
/// it.
#[derive(Debug, Default)]
pub struct TickClock {
    now_ns: AtomicU64,
}

impl TickClock {
    /// Creates a clock starting at time zero.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            now_ns: AtomicU64::new(0),
        }
    }

    /// Advances the clock by one timer period. Called once per timer
    /// interrupt, before [`vireo_sched::timer::TimerTick::tick`] reads it.
    pub fn advance_one_tick(&self) {
        self.now_ns
            .fetch_add(vireo_core::config::TIMER_PERIOD_NS, Ordering::Relaxed);
    }
}

impl MonotonicClock for TickClock {
    fn now_ns(&self) -> u64 {
        self.now_ns.load(Ordering::Relaxed)
    }
}

// `vireo_sched::scheduler::Scheduler` takes its clock by value, but the one
// real `TickClock` must be shared between the `Scheduler` and the timer
// interrupt handler that advances it. Implementing the seam for `&TickClock`
// (a fundamental type, so this stays within the orphan rules) lets
// `state::KScheduler` be `Scheduler<&'static TickClock, Cpu>` instead of
// requiring a second copy of the counter.
impl MonotonicClock for &TickClock {
    fn now_ns(&self) -> u64 {
        (*self).now_ns.load(Ordering::Relaxed)
    }
}
