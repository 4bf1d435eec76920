//! Semaphore admission + lock-free ownership slots.

use super::{PoolCounters, ReleaseOutcome};
use crate::error::PoolError;
use crate::palantir::Palantir;
use palantir_env::{BeingId, CancelToken, PalantirId};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Semaphore;

/// Slot value of a free palantir; otherwise the slot holds `being + 1`.
const FREE: u64 = 0;

/// Each palantir is one atomic slot; an admitted being claims the first free
/// slot with a compare-and-swap. No lock is taken on either path.
pub struct AtomicSlotsPool {
    permits: Semaphore,
    slots: Vec<AtomicU64>,
    counters: PoolCounters,
}

fn encode(being: BeingId) -> u64 {
    u64::from(being.0) + 1
}

fn decode(slot: u64) -> Option<BeingId> {
    slot.checked_sub(1).map(|raw| BeingId(raw as u32))
}

impl AtomicSlotsPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            permits: Semaphore::new(capacity),
            slots: (0..capacity).map(|_| AtomicU64::new(FREE)).collect(),
            counters: PoolCounters::default(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub async fn acquire(&self, being: BeingId, cancel: &CancelToken) -> Result<PalantirId, PoolError> {
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PoolError::Cancelled),
            permit = self.permits.acquire() => permit.map_err(|_| PoolError::Closed)?,
        };

        let claimed = self.slots.iter().position(|slot| {
            slot.compare_exchange(FREE, encode(being), Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        });
        let index = claimed.ok_or(PoolError::NoFreePalantir)?;
        permit.forget();
        self.counters.record_acquire();
        Ok(PalantirId(index as u32))
    }

    pub fn release(&self, palantir: PalantirId) -> Result<ReleaseOutcome, PoolError> {
        let slot = self
            .slots
            .get(palantir.index())
            .ok_or(PoolError::UnknownPalantir(palantir))?;

        // `swap` makes concurrent double releases race safely: exactly one
        // caller sees the owner and returns the permit.
        let outcome = if slot.swap(FREE, Ordering::AcqRel) == FREE {
            ReleaseOutcome::AlreadyAvailable
        } else {
            self.permits.add_permits(1);
            ReleaseOutcome::Released
        };
        self.counters.record_release(outcome);
        Ok(outcome)
    }

    pub fn palantiri(&self) -> Vec<Palantir> {
        self.slots
            .iter()
            .enumerate()
            .map(|(index, slot)| Palantir {
                id: PalantirId(index as u32),
                owner: decode(slot.load(Ordering::Acquire)),
            })
            .collect()
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

    #[test]
    fn test_slot_encoding_reserves_zero_for_free() {
        assert_eq!(decode(FREE), None);
        assert_eq!(decode(encode(BeingId(0))), Some(BeingId(0)));
        assert_eq!(decode(encode(BeingId(41))), Some(BeingId(41)));
    }

    #[tokio::test]
    async fn test_failed_claim_restores_permit() {
        let pool = AtomicSlotsPool::new(2);
        let cancel = CancelToken::new();
        for slot in &pool.slots {
            slot.store(encode(BeingId(9)), Ordering::Release);
        }

        assert_eq!(
            pool.acquire(BeingId(0), &cancel).await,
            Err(PoolError::NoFreePalantir)
        );
        assert_eq!(pool.available_permits(), 2);
        assert_eq!(pool.counters().stats(2, 2, 0).acquisitions, 0);

        for slot in &pool.slots {
            slot.store(FREE, Ordering::Release);
        }
        assert!(pool.acquire(BeingId(0), &cancel).await.is_ok());
        assert!(pool.acquire(BeingId(1), &cancel).await.is_ok());
        assert_eq!(pool.available_permits(), 0);
    }
}
