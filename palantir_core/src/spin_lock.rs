//! Busy-waiting mutual exclusion.
//!
//! `SpinLock` never parks the thread: a contending caller re-tries the flag in
//! a loop. It exists so the spin-lock pool strategy can be compared against
//! the blocking ones, not as a general-purpose lock.
//!
//! The async acquisition path spins for at most one poll interval between
//! cancellation checks and yields to the runtime in between, so a cancelled
//! being stops contending within a bounded delay.

use crate::error::PoolError;
use palantir_env::CancelToken;
use std::cell::UnsafeCell;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Spins before a blocking `lock()` gives up its time slice.
const SPINS_BEFORE_YIELD: u32 = 64;

/// A test-and-test-and-set spin lock.
pub struct SpinLock<T> {
    locked: AtomicBool,
    value: UnsafeCell<T>,
}

// SAFETY: access to `value` is serialized by `locked`; a guard exists for at
// most one caller at a time.
unsafe impl<T: Send> Send for SpinLock<T> {}
unsafe impl<T: Send> Sync for SpinLock<T> {}

/// RAII guard; the lock is released on drop.
pub struct SpinLockGuard<'a, T> {
    lock: &'a SpinLock<T>,
}

impl<T> SpinLock<T> {
    /// Creates an unlocked spin lock.
    pub fn new(value: T) -> Self {
        Self {
            locked: AtomicBool::new(false),
            value: UnsafeCell::new(value),
        }
    }

    /// Takes the lock if it is free.
    pub fn try_lock(&self) -> Option<SpinLockGuard<'_, T>> {
        self.locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| SpinLockGuard { lock: self })
    }

    /// Spins until the lock is taken.
    ///
    /// Only for short critical sections that cannot be cancelled (release,
    /// snapshot reads).
    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        let mut spins = 0u32;
        loop {
            if let Some(guard) = self.try_lock() {
                return guard;
            }
            while self.locked.load(Ordering::Relaxed) {
                spins = spins.wrapping_add(1);
                if spins % SPINS_BEFORE_YIELD == 0 {
                    std::thread::yield_now();
                } else {
                    std::hint::spin_loop();
                }
            }
        }
    }

    /// Spins until the lock is taken or `cancel` fires.
    ///
    /// Cancellation is checked at least once per `poll_interval`, after which
    /// the task yields to the runtime before spinning again.
    pub async fn lock_cancellable(
        &self,
        cancel: &CancelToken,
        poll_interval: Duration,
    ) -> Result<SpinLockGuard<'_, T>, PoolError> {
        loop {
            let deadline = Instant::now() + poll_interval;
            while Instant::now() < deadline {
                if let Some(guard) = self.try_lock() {
                    return Ok(guard);
                }
                std::hint::spin_loop();
            }
            if cancel.is_cancelled() {
                return Err(PoolError::Cancelled);
            }
            tokio::task::yield_now().await;
        }
    }

    /// Returns true if some caller currently holds the lock.
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }
}

impl<T> Deref for SpinLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the guard proves exclusive ownership of the lock.
        unsafe { &*self.lock.value.get() }
    }
}

impl<T> DerefMut for SpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: the guard proves exclusive ownership of the lock.
        unsafe { &mut *self.lock.value.get() }
    }
}

impl<T> Drop for SpinLockGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.locked.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_try_lock_fails_when_held() {
        let lock = SpinLock::new(0u32);
        let guard = lock.try_lock().expect("free lock");
        assert!(lock.try_lock().is_none());
        assert!(lock.is_locked());

        drop(guard);
        assert!(lock.try_lock().is_some());
    }

    #[test]
    fn test_lock_serializes_threads() {
        let lock = Arc::new(SpinLock::new(0u64));
        let threads: Vec<_> = (0..4)
            .map(|_| {
                let lock = Arc::clone(&lock);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        *lock.lock() += 1;
                    }
                })
            })
            .collect();

        for thread in threads {
            thread.join().unwrap();
        }
        assert_eq!(*lock.lock(), 4000);
    }

    #[tokio::test]
    async fn test_lock_cancellable_observes_cancel() {
        let lock = SpinLock::new(());
        let _held = lock.lock();
        let cancel = CancelToken::new();
        cancel.cancel();

        let result = lock
            .lock_cancellable(&cancel, Duration::from_micros(50))
            .await;
        assert!(matches!(result, Err(PoolError::Cancelled)));
    }

    #[tokio::test]
    async fn test_lock_cancellable_takes_free_lock() {
        let lock = SpinLock::new(5);
        let cancel = CancelToken::new();

        let guard = lock
            .lock_cancellable(&cancel, Duration::from_micros(50))
            .await
            .unwrap();
        assert_eq!(*guard, 5);
    }
}
