//! A scheduler-integrated ticket mutex.
//!
//! Grounded on `original_source/src/kernel/core/mutex.c`: two monotonic
//! 64-bit counters, `entries` and `exits`. `lock()` takes the next ticket
//! from `entries`; a thread holds the mutex exactly when its ticket equals
//! `exits`. `unlock()` bumps `exits` and wakes the (single, FIFO-next)
//! waiter, which matches the new value and proceeds. Uncontended lock/
//! unlock never blocks or touches the scheduler's run queues at all.
//!
//! Unlike [`crate::waitqueue::WaitQueue`]'s general multi-writer use, a
//! mutex's wait list is always drained in the exact order tickets were
//! issued, because on this single logical CPU a thread's `fetch_add` and
//! its subsequent enqueue onto the wait list happen back to back with no
//! intervening preemption point.

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicU64, Ordering};

use crate::clock::MonotonicClock;
use crate::context::ContextSwitch;
use crate::scheduler::Scheduler;
use crate::waitqueue::WaitQueue;

/// A mutual-exclusion lock that blocks contending threads through the
/// scheduler rather than spinning.
///
/// Unlike [`vireo_core::sync::IrqSpinLock`], a `Mutex` may only be used
/// from a context where blocking is legal (never from an interrupt
/// handler), matching the split between the two lock kinds.
pub struct Mutex<T> {
    entries: AtomicU64,
    exits: AtomicU64,
    waiters: WaitQueue,
    data: UnsafeCell<T>,
}

// SAFETY: the ticket protocol guarantees at most one thread observes
// `exits == its own ticket` at a time, so `&mut T` access through the guard
// is exclusive exactly like a normal `Mutex`.
unsafe impl<T: Send> Send for Mutex<T> {}
unsafe impl<T: Send> Sync for Mutex<T> {}

impl<T> Mutex<T> {
    /// Creates an unlocked mutex protecting `value`.
    pub const fn new(value: T) -> Self {
        Self {
            entries: AtomicU64::new(0),
            exits: AtomicU64::new(0),
            waiters: WaitQueue::new(),
            data: UnsafeCell::new(value),
        }
    }

    /// Takes the next ticket and blocks until it is served.
    pub fn lock<'a, C: MonotonicClock, X: ContextSwitch>(
        &'a self,
        scheduler: &'a Scheduler<C, X>,
    ) -> MutexGuard<'a, T, C, X> {
        let my_ticket = self.entries.fetch_add(1, Ordering::AcqRel);
        while self.exits.load(Ordering::Acquire) != my_ticket {
            self.waiters.wait(scheduler);
        }
        MutexGuard {
            mutex: self,
            scheduler,
        }
    }

    /// Attempts to take the mutex without blocking. Succeeds only when
    /// there is no contention at all (ticket equals the current `exits`).
    pub fn try_lock<'a, C: MonotonicClock, X: ContextSwitch>(
        &'a self,
        scheduler: &'a Scheduler<C, X>,
    ) -> Option<MutexGuard<'a, T, C, X>> {
        let exits = self.exits.load(Ordering::Acquire);
        self.entries
            .compare_exchange(exits, exits + 1, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| MutexGuard {
                mutex: self,
                scheduler,
            })
    }

    /// `true` if some thread currently holds the lock.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.entries.load(Ordering::Acquire) != self.exits.load(Ordering::Acquire)
    }
}

/// An RAII guard granting exclusive access to a [`Mutex`]'s contents.
/// Releasing it bumps `exits` and wakes the next ticket holder.
pub struct MutexGuard<'a, T, C: MonotonicClock, X: ContextSwitch> {
    mutex: &'a Mutex<T>,
    scheduler: &'a Scheduler<C, X>,
}

impl<T, C: MonotonicClock, X: ContextSwitch> Deref for MutexGuard<'_, T, C, X> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: holding this guard means our ticket matches `exits`, the
        // mutex's sole exclusion invariant.
        unsafe { &*self.mutex.data.get() }
    }
}

impl<T, C: MonotonicClock, X: ContextSwitch> DerefMut for MutexGuard<'_, T, C, X> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: see `Deref`.
        unsafe { &mut *self.mutex.data.get() }
    }
}

impl<T, C: MonotonicClock, X: ContextSwitch> Drop for MutexGuard<'_, T, C, X> {
    fn drop(&mut self) {
        self.mutex.exits.fetch_add(1, Ordering::AcqRel);
        self.mutex.waiters.wake_one(self.scheduler);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;
    use crate::context::NullContextSwitch;
    use crate::tcb::{KernelStack, ThreadState};

    fn new_sched() -> Scheduler<FakeClock, NullContextSwitch> {
        let sched = Scheduler::new(FakeClock::new(), NullContextSwitch::new());
        sched.init(KernelStack::new(0, 4096));
        sched
    }

    #[test]
    fn uncontended_lock_unlock_never_blocks() {
        let sched = new_sched();
        let mtx = Mutex::new(42u32);
        {
            let guard = mtx.lock(&sched);
            assert_eq!(*guard, 42);
        }
        assert!(!mtx.is_locked());
    }

    #[test]
    fn try_lock_fails_while_held() {
        let sched = new_sched();
        let mtx = Mutex::new(0u32);
        let guard = mtx.lock(&sched);
        assert!(mtx.try_lock(&sched).is_none());
        drop(guard);
        assert!(mtx.try_lock(&sched).is_some());
    }

    #[test]
    fn contended_waiter_blocks_and_is_woken_in_ticket_order() {
        let sched = new_sched();
        let mtx = Mutex::new(0u32);
        let guard = mtx.lock(&sched);

        let waiter = sched.spawn("waiter", KernelStack::new(0x1000, 4096), 128);
        // Simulate the waiter's own call to `mtx.lock` having already taken
        // a ticket and enqueued itself, without actually running its stack.
        let ticket = mtx.entries.fetch_add(1, Ordering::AcqRel);
        assert_eq!(ticket, 1);
        mtx.waiters.enqueue(waiter);
        sched.with_tcb_mut(waiter, |t| t.set_state(ThreadState::WaitingLock));

        drop(guard);
        assert_eq!(mtx.exits.load(Ordering::Acquire), 1);
        assert_eq!(sched.with_tcb(waiter, |t| t.state()), ThreadState::Ready);
    }

    #[test]
    fn mutation_through_guard_is_visible_after_unlock() {
        let sched = new_sched();
        let mtx = Mutex::new(alloc::vec::Vec::<u32>::new());
        {
            let mut guard = mtx.lock(&sched);
            guard.push(1);
            guard.push(2);
        }
        let guard = mtx.lock(&sched);
        assert_eq!(*guard, alloc::vec![1, 2]);
    }
}
