//! A FIFO blocking wait queue, the building block higher layers (the
//! ticket [`crate::mutex::Mutex`], process `waitpid`, and eventually the
//! buffer cache's I/O completion) block on.
//!
//! Grounded on `original_source/src/include/core/proc.h`'s
//! `wait_queue_t`/`wait_queue_entry_t`: an ordered list of blocked threads
//! woken FIFO. The source's intrusive pointer list becomes a plain
//! `Vec<Tid>` rather than threading through the TCB's own
//! `next` link, since a thread's `next` link is already claimed by
//! whichever of {ready queue, sleep list, terminated list} currently owns
//! it, and a wait queue waiter is in none of those.

use alloc::vec::Vec;

use vireo_core::id::Tid;
use vireo_core::sync::IrqSpinLock;

use crate::clock::MonotonicClock;
use crate::context::ContextSwitch;
use crate::scheduler::Scheduler;
use crate::tcb::ThreadState;

/// A FIFO queue of blocked threads.
#[derive(Debug, Default)]
pub struct WaitQueue {
    waiters: IrqSpinLock<Vec<Tid>>,
}

impl WaitQueue {
    /// Creates an empty wait queue.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            waiters: IrqSpinLock::new(Vec::new()),
        }
    }

    /// Number of threads currently blocked on this queue.
    #[must_use]
    pub fn len(&self) -> usize {
        self.waiters.lock().len()
    }

    /// `true` if no thread is blocked on this queue.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.waiters.lock().is_empty()
    }

    /// Adds `tid` to the tail of the wait list without blocking it. Used
    /// by callers that must release some other lock between enqueueing and
    /// actually yielding the CPU (`waitpid`: the process table lock must be
    /// dropped before the calling thread blocks).
    pub fn enqueue(&self, tid: Tid) {
        self.waiters.lock().push(tid);
    }

    /// Removes `tid` if present, without waking it. A no-op if `tid` is not
    /// currently queued.
    pub fn remove(&self, tid: Tid) {
        self.waiters.lock().retain(|&t| t != tid);
    }

    /// Removes and returns every waiter, in FIFO order, without waking any
    /// of them.
    pub fn drain_all(&self) -> Vec<Tid> {
        core::mem::take(&mut self.waiters.lock())
    }

    /// Enqueues the calling thread and blocks it until woken by
    /// [`WaitQueue::wake_one`] or [`WaitQueue::wake_all`].
    ///
    /// # Panics
    /// Panics if there is no current thread.
    pub fn wait<C: MonotonicClock, X: ContextSwitch>(&self, scheduler: &Scheduler<C, X>) {
        let cur = scheduler.current_tid().expect("no current thread");
        self.enqueue(cur);
        scheduler.block_current(ThreadState::WaitingEvent);
    }

    /// Like [`WaitQueue::wait`], but returns early with `Err(())` if a
    /// signal is already pending on entry or becomes pending before this
    /// thread is otherwise woken.
    pub fn wait_interruptible<C: MonotonicClock, X: ContextSwitch>(
        &self,
        scheduler: &Scheduler<C, X>,
    ) -> Result<(), ()> {
        let cur = scheduler.current_tid().expect("no current thread");
        if scheduler.with_tcb(cur, |t| t.has_pending_signal()) {
            return Err(());
        }
        self.enqueue(cur);
        scheduler.block_current(ThreadState::Interruptible);
        if scheduler.with_tcb(cur, |t| t.has_pending_signal()) {
            Err(())
        } else {
            Ok(())
        }
    }

    /// Wakes the longest-waiting thread, if any, returning its id.
    pub fn wake_one<C: MonotonicClock, X: ContextSwitch>(
        &self,
        scheduler: &Scheduler<C, X>,
    ) -> Option<Tid> {
        let tid = {
            let mut waiters = self.waiters.lock();
            if waiters.is_empty() {
                None
            } else {
                Some(waiters.remove(0))
            }
        };
        if let Some(tid) = tid {
            scheduler.unblock(tid);
        }
        tid
    }

    /// Wakes every blocked thread, in FIFO order.
    pub fn wake_all<C: MonotonicClock, X: ContextSwitch>(&self, scheduler: &Scheduler<C, X>) {
        for tid in self.drain_all() {
            scheduler.unblock(tid);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;
    use crate::context::NullContextSwitch;
    use crate::tcb::KernelStack;

    fn new_sched() -> Scheduler<FakeClock, NullContextSwitch> {
        let sched = Scheduler::new(FakeClock::new(), NullContextSwitch::new());
        sched.init(KernelStack::new(0, 4096));
        sched
    }

    #[test]
    fn wake_one_returns_oldest_waiter() {
        let sched = new_sched();
        let wq = WaitQueue::new();
        let a = sched.spawn("a", KernelStack::new(0x1000, 4096), 100);
        let b = sched.spawn("b", KernelStack::new(0x2000, 4096), 100);
        wq.enqueue(a);
        wq.enqueue(b);
        assert_eq!(wq.wake_one(&sched), Some(a));
        assert_eq!(wq.wake_one(&sched), Some(b));
        assert_eq!(wq.wake_one(&sched), None);
    }

    #[test]
    fn wake_all_empties_the_queue() {
        let sched = new_sched();
        let wq = WaitQueue::new();
        wq.enqueue(sched.spawn("a", KernelStack::new(0x1000, 4096), 100));
        wq.enqueue(sched.spawn("b", KernelStack::new(0x2000, 4096), 100));
        wq.wake_all(&sched);
        assert!(wq.is_empty());
    }

    #[test]
    fn remove_drops_a_specific_waiter() {
        let wq = WaitQueue::new();
        wq.enqueue(Tid::new(1));
        wq.enqueue(Tid::new(2));
        wq.remove(Tid::new(1));
        assert_eq!(wq.drain_all(), alloc::vec![Tid::new(2)]);
    }
}
