//! An interrupt-disabling spinlock.
//!
//! The only lock category interrupt handlers are permitted to take
//! (the latter is the only type usable in handlers). Locking
//! saves the current interrupt-enable state and disables interrupts on this
//! CPU; unlocking (on guard drop) restores whatever state was saved, so
//! nested acquisition composes correctly even if the outer context already
//! had interrupts disabled.
//!
//! Ported from `hadron-kernel/src/sync/irq_spinlock.rs`: same
//! RFLAGS-save-then-`cli` x86_64 approach, same `!Send` guard (a lock must be
//! released on the CPU that took it, since releasing restores that CPU's
//! interrupt state), same host no-op fallback so the type is usable from
//! `cfg(test)` code built for the host target.

use core::cell::UnsafeCell;
use core::marker::PhantomData;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, Ordering};

/// A spinlock that disables interrupts on the current CPU while held.
pub struct IrqSpinLock<T> {
    locked: AtomicBool,
    data: UnsafeCell<T>,
}

// SAFETY: access to the inner `T` is serialized by `locked`, and the guard
// masks interrupts on the acquiring CPU for its lifetime.
unsafe impl<T: Send> Send for IrqSpinLock<T> {}
// SAFETY: same as above.
unsafe impl<T: Send> Sync for IrqSpinLock<T> {}

impl<T> IrqSpinLock<T> {
    /// Creates a new unlocked lock wrapping `value`.
    pub const fn new(value: T) -> Self {
        Self {
            locked: AtomicBool::new(false),
            data: UnsafeCell::new(value),
        }
    }

    /// Acquires the lock, disabling interrupts on this CPU for the duration
    /// of the returned guard's lifetime.
    pub fn lock(&self) -> IrqSpinLockGuard<'_, T> {
        let saved = arch::save_and_disable_irqs();
        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            core::hint::spin_loop();
        }
        IrqSpinLockGuard {
            lock: self,
            saved_irq_state: saved,
            _not_send: PhantomData,
        }
    }

    /// Attempts to acquire the lock without spinning.
    pub fn try_lock(&self) -> Option<IrqSpinLockGuard<'_, T>> {
        let saved = arch::save_and_disable_irqs();
        match self
            .locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
        {
            Ok(()) => Some(IrqSpinLockGuard {
                lock: self,
                saved_irq_state: saved,
                _not_send: PhantomData,
            }),
            Err(_) => {
                arch::restore_irqs(saved);
                None
            }
        }
    }
}

/// RAII guard releasing an [`IrqSpinLock`] and restoring the prior
/// interrupt-enable state on drop.
///
/// Deliberately `!Send`: releasing restores *this* CPU's saved flags, so the
/// guard must be dropped on the CPU that created it.
pub struct IrqSpinLockGuard<'a, T> {
    lock: &'a IrqSpinLock<T>,
    saved_irq_state: arch::IrqState,
    _not_send: PhantomData<*const ()>,
}

impl<T> Deref for IrqSpinLockGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        // SAFETY: holding the guard means we hold the lock.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for IrqSpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: holding the guard means we hold the lock.
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T> Drop for IrqSpinLockGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.locked.store(false, Ordering::Release);
        arch::restore_irqs(self.saved_irq_state);
    }
}

#[cfg(all(target_arch = "x86_64", target_os = "none"))]
mod arch {
    use core::arch::asm;

    #[derive(Clone, Copy)]
    pub struct IrqState(u64);

    pub fn save_and_disable_irqs() -> IrqState {
        let flags: u64;
        // SAFETY: `pushf`/`pop` and `cli` are ordinary privileged-but-valid
        // instructions in ring 0; no memory effects beyond the named output.
        unsafe {
            asm!("pushfq; pop {}", out(reg) flags, options(nomem, preserves_flags));
            asm!("cli", options(nomem, nostack));
        }
        IrqState(flags)
    }

    pub fn restore_irqs(state: IrqState) {
        const IF_BIT: u64 = 1 << 9;
        if state.0 & IF_BIT != 0 {
            // SAFETY: re-enabling interrupts that were on before we disabled them.
            unsafe {
                asm!("sti", options(nomem, nostack));
            }
        }
    }
}

/// Host-test fallback: no real interrupts to mask, so these are no-ops.
#[cfg(not(all(target_arch = "x86_64", target_os = "none")))]
mod arch {
    #[derive(Clone, Copy)]
    pub struct IrqState;

    pub fn save_and_disable_irqs() -> IrqState {
        IrqState
    }

    pub fn restore_irqs(_state: IrqState) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_unlock_roundtrip() {
        let lock = IrqSpinLock::new(5);
        {
            let mut guard = lock.lock();
            *guard += 1;
        }
        assert_eq!(*lock.lock(), 6);
    }

    #[test]
    fn try_lock_fails_while_held() {
        let lock = IrqSpinLock::new(0);
        let _guard = lock.lock();
        assert!(lock.try_lock().is_none());
    }

    #[test]
    fn try_lock_succeeds_when_free() {
        let lock = IrqSpinLock::new(0);
        assert!(lock.try_lock().is_some());
    }

    #[test]
    fn concurrent_increments_are_serialized() {
        use std::sync::Arc;
        use std::thread;

        let lock = Arc::new(IrqSpinLock::new(0u64));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let lock = lock.clone();
            handles.push(thread::spawn(move || {
                for _ in 0..1000 {
                    *lock.lock() += 1;
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(*lock.lock(), 8000);
    }
}
