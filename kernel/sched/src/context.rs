//! Architecture-specific context switch, isolated behind a trait.
//!
//! Context-switch and FPU state are unavoidably architecture-specific
//! assembly, isolated behind a `Context` abstract type with
//! `save`/`restore`/`switch` primitives; the scheduler never inspects the
//! fields. The assembly trampoline itself is one of the out-of-scope
//! external collaborators this crate does not own; this trait is the
//! stable seam the scheduler calls through, so it can be exercised on the
//! host with [`NullContextSwitch`] recording calls instead of touching
//! real machine state.

use alloc::vec::Vec;

use vireo_core::id::Tid;

/// Performs the machine-level half of a context switch.
///
/// [`scheduler::Scheduler`](crate::scheduler::Scheduler) calls
/// [`switch_to`](ContextSwitch::switch_to) exactly once per call to
/// `schedule()` that changes the running thread, after updating all
/// scheduler-owned bookkeeping (ready queues, `current`, time slice). The
/// implementation is responsible for saving the outgoing thread's register
/// state into its TCB-owned stack and restoring the incoming thread's.
pub trait ContextSwitch {
    /// Switches the CPU from `from` to `to`. Does not return until `from`
    /// is resumed by some future switch back to it.
    fn switch_to(&self, from: Tid, to: Tid);
}

/// A [`ContextSwitch`] that only records the sequence of switches, for
/// tests that exercise scheduling decisions without a real machine context.
#[derive(Debug, Default)]
pub struct NullContextSwitch {
    log: core::cell::RefCell<Vec<(Tid, Tid)>>,
}

impl NullContextSwitch {
    /// Creates a recorder with an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the recorded `(from, to)` pairs in call order.
    #[must_use]
    pub fn log(&self) -> Vec<(Tid, Tid)> {
        self.log.borrow().clone()
    }
}

impl ContextSwitch for NullContextSwitch {
    fn switch_to(&self, from: Tid, to: Tid) {
        self.log.borrow_mut().push((from, to));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_switches_in_order() {
        let ctx = NullContextSwitch::new();
        ctx.switch_to(Tid::new(1), Tid::new(2));
        ctx.switch_to(Tid::new(2), Tid::new(3));
        assert_eq!(
            ctx.log(),
            alloc::vec![(Tid::new(1), Tid::new(2)), (Tid::new(2), Tid::new(3))]
        );
    }
}
