//! Spin-based mutual exclusion for the Plinth control core
//!
//! The hypervisor runs one hardware thread per CPU with no blocking
//! facility underneath it, so all serialization is spin-based. Two rules
//! govern every lock in this crate:
//!
//! 1. **Bounded hold time**: a critical section must never perform I/O,
//!    call into the platform layer, or perform a context transfer while
//!    holding a lock. The scheduler releases its run-queue lock before
//!    switching contexts for exactly this reason.
//! 2. **No nesting across components**: the run-queue, registry and frame
//!    pool locks are leaves; none of them is ever taken while another of
//!    the three is held on the same CPU.
//!
//! # Safety Invariants
//!
//! 1. **Exclusive access**: a `SpinLockGuard` existing implies the flag is
//!    held; the data is only reachable through a guard
//! 2. **Release ordering**: the unlock store is `Release`, paired with the
//!    `Acquire` compare-exchange on acquisition
//! 3. **Reader/writer exclusion**: `RwSpinLock` packs a writer bit and a
//!    reader count into one word; the writer bit and a nonzero count are
//!    never observed together by a successful acquisition

use core::cell::UnsafeCell;
use core::hint::spin_loop;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// A spin lock protecting a value of type `T`.
///
/// The guard implements `Deref` and `DerefMut`, providing interior
/// mutability for the protected data structure.
pub struct SpinLock<T> {
    flag: AtomicBool,
    data: UnsafeCell<T>,
}

// SAFETY: the lock serializes all access to the inner value, so sharing
// the lock between threads is sound whenever the value itself may be
// moved between threads.
unsafe impl<T: Send> Send for SpinLock<T> {}
unsafe impl<T: Send> Sync for SpinLock<T> {}

impl<T> SpinLock<T> {
    /// Create a new unlocked SpinLock.
    pub const fn new(value: T) -> Self {
        Self {
            flag: AtomicBool::new(false),
            data: UnsafeCell::new(value),
        }
    }

    /// Acquire the lock, spinning until it becomes available.
    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        while self
            .flag
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            spin_loop();
        }
        SpinLockGuard { lock: self }
    }

    /// Attempt to take the lock without spinning.
    pub fn try_lock(&self) -> Option<SpinLockGuard<'_, T>> {
        if self
            .flag
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            Some(SpinLockGuard { lock: self })
        } else {
            None
        }
    }

    /// Consume the lock and return the inner value.
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }

    /// Get a mutable reference to the inner value.
    ///
    /// Requires `&mut self`, so no locking is necessary.
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }

    fn unlock(&self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// RAII guard for [`SpinLock`].
pub struct SpinLockGuard<'a, T> {
    lock: &'a SpinLock<T>,
}

impl<T> Deref for SpinLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        // SAFETY: the guard's existence proves exclusive ownership of the flag.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for SpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        // SAFETY: same invariant as Deref.
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T> Drop for SpinLockGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.unlock();
    }
}

// ============================================================================
// Reader/writer spin lock
// ============================================================================

/// Writer-held bit in the state word; the remaining bits count readers.
const WRITER: usize = 1 << (usize::BITS - 1);

/// A reader/writer spin lock.
///
/// Any number of readers may hold the lock concurrently; a writer holds
/// it exclusively. Writers do not get priority: a writer spins until the
/// reader count drains to zero. This matches the registry's usage, where
/// lookups and broadcast iteration dominate and insert/remove are rare.
pub struct RwSpinLock<T> {
    state: AtomicUsize,
    data: UnsafeCell<T>,
}

// SAFETY: readers only receive `&T` (requires `T: Sync` via the `Send`
// bound on the whole lock being shared), the writer is exclusive.
unsafe impl<T: Send> Send for RwSpinLock<T> {}
unsafe impl<T: Send + Sync> Sync for RwSpinLock<T> {}

impl<T> RwSpinLock<T> {
    /// Create a new unlocked RwSpinLock.
    pub const fn new(value: T) -> Self {
        Self {
            state: AtomicUsize::new(0),
            data: UnsafeCell::new(value),
        }
    }

    /// Acquire the lock for shared reading.
    pub fn read(&self) -> RwSpinLockReadGuard<'_, T> {
        loop {
            let s = self.state.load(Ordering::Relaxed);
            if s & WRITER == 0
                && self
                    .state
                    .compare_exchange_weak(s, s + 1, Ordering::Acquire, Ordering::Relaxed)
                    .is_ok()
            {
                return RwSpinLockReadGuard { lock: self };
            }
            spin_loop();
        }
    }

    /// Acquire the lock for exclusive writing.
    pub fn write(&self) -> RwSpinLockWriteGuard<'_, T> {
        loop {
            if self
                .state
                .compare_exchange_weak(0, WRITER, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                return RwSpinLockWriteGuard { lock: self };
            }
            spin_loop();
        }
    }

    /// Get a mutable reference to the inner value.
    ///
    /// Requires `&mut self`, so no locking is necessary.
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }
}

/// Shared RAII guard for [`RwSpinLock`].
pub struct RwSpinLockReadGuard<'a, T> {
    lock: &'a RwSpinLock<T>,
}

impl<T> Deref for RwSpinLockReadGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        // SAFETY: a nonzero reader count excludes the writer bit.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> Drop for RwSpinLockReadGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.state.fetch_sub(1, Ordering::Release);
    }
}

/// Exclusive RAII guard for [`RwSpinLock`].
pub struct RwSpinLockWriteGuard<'a, T> {
    lock: &'a RwSpinLock<T>,
}

impl<T> Deref for RwSpinLockWriteGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        // SAFETY: the writer bit excludes all readers and other writers.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for RwSpinLockWriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        // SAFETY: same invariant as Deref.
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T> Drop for RwSpinLockWriteGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.state.store(0, Ordering::Release);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spinlock_protects_value() {
        let lock = SpinLock::new(41);
        {
            let mut guard = lock.lock();
            *guard += 1;
        }
        assert_eq!(*lock.lock(), 42);
    }

    #[test]
    fn spinlock_try_lock_fails_when_held() {
        let lock = SpinLock::new(());
        let guard = lock.lock();
        assert!(lock.try_lock().is_none());
        drop(guard);
        assert!(lock.try_lock().is_some());
    }

    #[test]
    fn spinlock_into_inner() {
        let lock = SpinLock::new(7u32);
        assert_eq!(lock.into_inner(), 7);
    }

    #[test]
    fn rwlock_multiple_readers() {
        let lock = RwSpinLock::new(5);
        let r1 = lock.read();
        let r2 = lock.read();
        assert_eq!(*r1, 5);
        assert_eq!(*r2, 5);
    }

    #[test]
    fn rwlock_writer_excludes_readers() {
        let lock = RwSpinLock::new(0);
        {
            let mut w = lock.write();
            *w = 9;
        }
        assert_eq!(*lock.read(), 9);
    }

    #[test]
    fn rwlock_get_mut_without_locking() {
        let mut lock = RwSpinLock::new(1);
        *lock.get_mut() = 2;
        assert_eq!(*lock.read(), 2);
    }
}
