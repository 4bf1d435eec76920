//! Semaphore admission + mutex-guarded availability map.

use super::{claim_entry, free_entry, lock_map, new_ownership_map, sorted_palantiri, OwnershipMap, PoolCounters, ReleaseOutcome};
use crate::error::PoolError;
use crate::palantir::Palantir;
use palantir_env::{BeingId, CancelToken, PalantirId};
use std::sync::Mutex;
use tokio::sync::Semaphore;

/// The reference strategy.
///
/// A counting semaphore bounds the number of concurrent holders; once
/// admitted, a being scans the map under the mutex and claims any free entry.
/// Permits equal free entries at every point where the mutex is not held.
pub struct SemaphoreLockMapPool {
    capacity: usize,
    permits: Semaphore,
    available: Mutex<OwnershipMap>,
    counters: PoolCounters,
}

impl SemaphoreLockMapPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            permits: Semaphore::new(capacity),
            available: Mutex::new(new_ownership_map(capacity)),
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

        // Dropping `permit` on the error path hands it back.
        let palantir = claim_entry(&mut lock_map(&self.available), being)
            .ok_or(PoolError::NoFreePalantir)?;
        permit.forget();
        self.counters.record_acquire();
        Ok(palantir)
    }

    pub fn release(&self, palantir: PalantirId) -> Result<ReleaseOutcome, PoolError> {
        let mut map = lock_map(&self.available);
        let outcome = free_entry(&mut map, palantir)?;
        if outcome == ReleaseOutcome::Released {
            self.permits.add_permits(1);
        }
        self.counters.record_release(outcome);
        Ok(outcome)
    }

    pub fn palantiri(&self) -> Vec<Palantir> {
        sorted_palantiri(&lock_map(&self.available))
    }

    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    pub(crate) fn counters(&self) -> &PoolCounters {
        &self.counters
    }
}
