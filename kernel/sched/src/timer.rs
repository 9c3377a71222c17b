//! Architecture-independent timer-tick entry point.
//!
//! The APIC/PIT driver that actually programs hardware timers is
//! out-of-scope architecture glue; this trait is the seam it
//! calls through once per timer interrupt, so this crate never depends on
//! any concrete timer hardware.

use crate::context::ContextSwitch;
use crate::clock::MonotonicClock;
use crate::scheduler::Scheduler;

/// Receives one timer interrupt's worth of bookkeeping.
///
/// `now_ns` is provided by the caller (usually read from the same hardware
/// that raised the interrupt) but implementations are free to ignore it and
/// consult their own [`MonotonicClock`] instead, which is what
/// [`Scheduler`] does.
pub trait TimerTick {
    /// Advances tick bookkeeping. Never switches context.
    fn tick(&self, now_ns: u64);
}

impl<C: MonotonicClock, X: ContextSwitch> TimerTick for Scheduler<C, X> {
    fn tick(&self, _now_ns: u64) {
        self.timer_tick();
    }
}
