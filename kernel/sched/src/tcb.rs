//! The thread control block.
//!
//! Field-for-field grounded on a reference kernel's `tcb_t`, with the raw
//! `next`/`owner_proc`/`wait_data` pointers replaced by [`Tid`]/[`Pid`]
//! indices. The intrusive `next` link is kept (the PMM-style "link lives
//! in the object itself" pattern) but now threads an arena index instead
//! of a raw pointer, so at most one of {a ready queue, the sleep list, the
//! terminated list} ever holds a given `Tid` at once.

use alloc::string::String;

use vireo_core::id::{Pid, Tid};

/// Maximum length of a thread name, mirroring the source's `name[32]`.
pub const NAME_MAX: usize = 32;

/// Scheduling state of a thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    /// Currently executing on the (sole, logical) CPU.
    Running,
    /// Runnable, sitting in a priority ready queue.
    Ready,
    /// Blocked in an uninterruptible [`crate::scheduler::Scheduler::nano_sleep`].
    Sleeping,
    /// Explicitly paused (not reachable from the scheduler's own operations;
    /// reserved for an external debugger/ptrace-style collaborator).
    Paused,
    /// Blocked acquiring a [`crate::mutex::Mutex`].
    WaitingLock,
    /// Has exited; resides on the terminated list pending cleanup.
    Terminated,
    /// Blocked on a [`crate::waitqueue::WaitQueue`].
    WaitingEvent,
    /// Blocked in an interruptible sleep or wait, woken early by a signal.
    Interruptible,
}

/// The kernel stack region backing a thread, owned by the TCB.
///
/// A thread control block needs a saved stack pointer and a kernel stack
/// region. The scheduler crate never allocates this itself (it has no
/// heap/VMM dependency, kept as a dependency-order "leaf"); the caller of
/// [`crate::scheduler::Scheduler::spawn`] allocates it (via
/// `vireo-mm`'s heap in the real kernel, a plain `Vec` in tests) and hands
/// over ownership of the region's bounds.
#[derive(Debug, Clone, Copy)]
pub struct KernelStack {
    /// Base address of the stack allocation (lowest address).
    pub base: u64,
    /// Size in bytes.
    pub size: u64,
}

impl KernelStack {
    /// Creates a stack descriptor from its bounds.
    #[must_use]
    pub const fn new(base: u64, size: u64) -> Self {
        Self { base, size }
    }

    /// Returns the initial top-of-stack address (one past the last byte),
    /// the value a fresh thread's saved stack pointer starts at.
    #[must_use]
    pub const fn top(self) -> u64 {
        self.base + self.size
    }
}

/// The thread control block.
#[derive(Debug, Clone)]
pub struct Tcb {
    tid: Tid,
    name: String,
    stack: KernelStack,
    /// Saved stack pointer. Opaque to the scheduler; written/read only by
    /// the [`crate::context::ContextSwitch`] implementation.
    pub saved_sp: u64,
    state: ThreadState,
    priority: u8,
    base_priority: u8,
    /// Intrusive next-link for whichever single list currently owns this
    /// thread (ready queue, sleep list, or terminated list).
    pub(crate) next: Option<Tid>,
    time_used_ns: u64,
    sleep_expiry_ns: u64,
    wait_ticks: u64,
    switch_count: u64,
    preempt_count: u64,
    yield_count: u64,
    wakeup_count: u64,
    last_run_time_ns: u64,
    owner_proc: Option<Pid>,
    pending_signals: u64,
    thread_errno: i32,
}

impl Tcb {
    /// Creates a fresh TCB in the `Ready` state at the given priority.
    ///
    /// `priority` is clamped into `0..=255` by the caller's type; priority 0
    /// is reserved for the idle thread and the scheduler
    /// itself enforces that reservation at spawn time.
    #[must_use]
    pub fn new(tid: Tid, name: &str, stack: KernelStack, priority: u8) -> Self {
        let mut truncated = String::with_capacity(NAME_MAX);
        for ch in name.chars().take(NAME_MAX) {
            truncated.push(ch);
        }
        Self {
            tid,
            name: truncated,
            stack,
            saved_sp: stack.top(),
            state: ThreadState::Ready,
            priority,
            base_priority: priority,
            next: None,
            time_used_ns: 0,
            sleep_expiry_ns: 0,
            wait_ticks: 0,
            switch_count: 0,
            preempt_count: 0,
            yield_count: 0,
            wakeup_count: 0,
            last_run_time_ns: 0,
            owner_proc: None,
            pending_signals: 0,
            thread_errno: 0,
        }
    }

    /// This thread's id.
    #[must_use]
    pub const fn tid(&self) -> Tid {
        self.tid
    }

    /// The thread's name, truncated to [`NAME_MAX`] characters.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The backing kernel stack.
    #[must_use]
    pub const fn stack(&self) -> KernelStack {
        self.stack
    }

    /// Current scheduling state.
    #[must_use]
    pub const fn state(&self) -> ThreadState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: ThreadState) {
        self.state = state;
    }

    /// Current (possibly aging-boosted) priority.
    #[must_use]
    pub const fn priority(&self) -> u8 {
        self.priority
    }

    /// Priority set at creation (or by [`crate::scheduler::Scheduler::set_priority`]),
    /// restored after a boosted thread is preempted.
    #[must_use]
    pub const fn base_priority(&self) -> u8 {
        self.base_priority
    }

    pub(crate) fn set_priority_pair(&mut self, priority: u8, base: u8) {
        self.priority = priority;
        self.base_priority = base;
    }

    pub(crate) fn set_priority(&mut self, priority: u8) {
        self.priority = priority;
    }

    /// Total CPU time consumed, in nanoseconds.
    #[must_use]
    pub const fn time_used_ns(&self) -> u64 {
        self.time_used_ns
    }

    pub(crate) fn add_time_used(&mut self, delta_ns: u64) {
        self.time_used_ns += delta_ns;
    }

    pub(crate) fn set_last_run(&mut self, now_ns: u64) {
        self.last_run_time_ns = now_ns;
    }

    /// Timestamp (scheduler-relative nanoseconds) this thread last ran.
    #[must_use]
    pub const fn last_run_time_ns(&self) -> u64 {
        self.last_run_time_ns
    }

    /// Absolute wake time for a thread on the sleep list.
    #[must_use]
    pub const fn sleep_expiry_ns(&self) -> u64 {
        self.sleep_expiry_ns
    }

    pub(crate) fn set_sleep_expiry(&mut self, wake_ns: u64) {
        self.sleep_expiry_ns = wake_ns;
    }

    pub(crate) fn wait_ticks(&self) -> u64 {
        self.wait_ticks
    }

    pub(crate) fn reset_wait_ticks(&mut self) {
        self.wait_ticks = 0;
    }

    pub(crate) fn bump_wait_ticks(&mut self) {
        self.wait_ticks += 1;
    }

    /// Number of times this thread has been scheduled onto the CPU.
    #[must_use]
    pub const fn switch_count(&self) -> u64 {
        self.switch_count
    }

    pub(crate) fn bump_switch_count(&mut self) {
        self.switch_count += 1;
    }

    /// Number of times this thread was preempted while still runnable.
    #[must_use]
    pub const fn preempt_count(&self) -> u64 {
        self.preempt_count
    }

    pub(crate) fn bump_preempt_count(&mut self) {
        self.preempt_count += 1;
    }

    /// Number of times this thread voluntarily called `yield`.
    #[must_use]
    pub const fn yield_count(&self) -> u64 {
        self.yield_count
    }

    pub(crate) fn bump_yield_count(&mut self) {
        self.yield_count += 1;
    }

    /// Number of times this thread was woken from sleep or a wait queue.
    #[must_use]
    pub const fn wakeup_count(&self) -> u64 {
        self.wakeup_count
    }

    pub(crate) fn bump_wakeup_count(&mut self) {
        self.wakeup_count += 1;
    }

    /// The process that owns this thread, if any.
    #[must_use]
    pub const fn owner_proc(&self) -> Option<Pid> {
        self.owner_proc
    }

    /// Sets the owning process (installed by `proc_create`'s thread-creation
    /// step).
    pub fn set_owner_proc(&mut self, pid: Pid) {
        self.owner_proc = Some(pid);
    }

    /// Bitmask of signals pending delivery to this thread.
    #[must_use]
    pub const fn pending_signals(&self) -> u64 {
        self.pending_signals
    }

    /// `true` if any signal is pending (interruptible sleep returns `-1` if
    /// a signal is pending on entry or arrives during the sleep).
    #[must_use]
    pub const fn has_pending_signal(&self) -> bool {
        self.pending_signals != 0
    }

    pub(crate) fn set_pending_signal(&mut self, mask: u64) {
        self.pending_signals |= mask;
    }

    pub(crate) fn clear_pending_signal(&mut self, mask: u64) {
        self.pending_signals &= !mask;
    }

    /// Thread-local error number, set by [`crate::scheduler::Scheduler::set_errno`].
    #[must_use]
    pub const fn errno(&self) -> i32 {
        self.thread_errno
    }

    pub(crate) fn set_errno(&mut self, err: i32) {
        self.thread_errno = err;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_tcb_is_ready_at_base_priority() {
        let tcb = Tcb::new(Tid::new(1), "worker", KernelStack::new(0x1000, 4096), 128);
        assert_eq!(tcb.state(), ThreadState::Ready);
        assert_eq!(tcb.priority(), 128);
        assert_eq!(tcb.base_priority(), 128);
        assert_eq!(tcb.saved_sp, 0x1000 + 4096);
    }

    #[test]
    fn name_is_truncated_to_name_max() {
        let long = "x".repeat(NAME_MAX * 2);
        let tcb = Tcb::new(Tid::new(1), &long, KernelStack::new(0, 4096), 1);
        assert_eq!(tcb.name().len(), NAME_MAX);
    }

    #[test]
    fn pending_signal_roundtrip() {
        let mut tcb = Tcb::new(Tid::new(1), "t", KernelStack::new(0, 4096), 1);
        assert!(!tcb.has_pending_signal());
        tcb.set_pending_signal(1 << 9);
        assert!(tcb.has_pending_signal());
        tcb.clear_pending_signal(1 << 9);
        assert!(!tcb.has_pending_signal());
    }
}
