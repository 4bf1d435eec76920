//! Semaphore admission + spin-lock-guarded availability map.
//!
//! A deliberate alternative to the blocking mutex, kept for comparison. The
//! wait for admission still goes through the interruptible semaphore; only
//! the short map update spins.

use super::{claim_entry, free_entry, new_ownership_map, sorted_palantiri, OwnershipMap, PoolCounters, ReleaseOutcome};
use crate::error::PoolError;
use crate::palantir::Palantir;
use crate::spin_lock::SpinLock;
use palantir_env::{BeingId, CancelToken, PalantirId};
use std::time::Duration;
use tokio::sync::Semaphore;

pub struct SpinLockMapPool {
    capacity: usize,
    permits: Semaphore,
    available: SpinLock<OwnershipMap>,
    poll_interval: Duration,
    counters: PoolCounters,
}

impl SpinLockMapPool {
    pub fn new(capacity: usize, poll_interval: Duration) -> Self {
        Self {
            capacity,
            permits: Semaphore::new(capacity),
            available: SpinLock::new(new_ownership_map(capacity)),
            poll_interval,
            counters: PoolCounters::default(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub async fn acquire(&self, being: BeingId, cancel: &CancelToken) -> Result<PalantirId, PoolError> {
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PoolError::Cancelled),
            permit = self.permits.acquire() => permit.map_err(|_| PoolError::Closed)?,
        };

        // A cancel observed while spinning drops `permit`, returning it.
        let mut map = self.available.lock_cancellable(cancel, self.poll_interval).await?;
        let palantir = claim_entry(&mut map, being).ok_or(PoolError::NoFreePalantir)?;
        drop(map);

        permit.forget();
        self.counters.record_acquire();
        Ok(palantir)
    }

    pub fn release(&self, palantir: PalantirId) -> Result<ReleaseOutcome, PoolError> {
        let mut map = self.available.lock();
        let outcome = free_entry(&mut map, palantir)?;
        if outcome == ReleaseOutcome::Released {
            self.permits.add_permits(1);
        }
        self.counters.record_release(outcome);
        Ok(outcome)
    }

    pub fn palantiri(&self) -> Vec<Palantir> {
        sorted_palantiri(&self.available.lock())
    }

    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    pub(crate) fn counters(&self) -> &PoolCounters {
        &self.counters
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const POLL: Duration = Duration::from_micros(50);

    #[tokio::test]
    async fn test_failed_claim_restores_permit() {
        let pool = SpinLockMapPool::new(2, POLL);
        let cancel = CancelToken::new();
        for owner in pool.available.lock().values_mut() {
            *owner = Some(BeingId(9));
        }

        assert_eq!(
            pool.acquire(BeingId(0), &cancel).await,
            Err(PoolError::NoFreePalantir)
        );
        assert_eq!(pool.available_permits(), 2);

        for owner in pool.available.lock().values_mut() {
            *owner = None;
        }
        assert!(pool.acquire(BeingId(0), &cancel).await.is_ok());
        assert!(pool.acquire(BeingId(1), &cancel).await.is_ok());
        assert_eq!(pool.available_permits(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cancel_while_spinning_restores_permit() {
        let pool = Arc::new(SpinLockMapPool::new(2, POLL));
        let cancel = CancelToken::new();
        let held = pool.available.lock();

        let acquirer = {
            let pool = Arc::clone(&pool);
            let cancel = cancel.clone();
            tokio::spawn(async move { pool.acquire(BeingId(0), &cancel).await })
        };

        // Admitted, now spinning on the held map lock.
        tokio::time::timeout(Duration::from_secs(5), async {
            while pool.available_permits() == 2 {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("acquirer never took a permit");
        assert_eq!(pool.available_permits(), 1);

        cancel.cancel();
        let result = acquirer.await.unwrap();
        drop(held);

        assert_eq!(result, Err(PoolError::Cancelled));
        assert_eq!(pool.available_permits(), 2);
        assert!(pool.palantiri().iter().all(|p| p.is_available()));
    }
}
