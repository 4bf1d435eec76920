//! Blocking queue of available palantiri.
//!
//! The queue itself is the admission gate: `acquire` is a blocking dequeue
//! and `release` an enqueue. The ownership map records who holds what so
//! double releases can be recognized and snapshots can report owners.

use super::{free_entry, lock_map, new_ownership_map, sorted_palantiri, OwnershipMap, PoolCounters, ReleaseOutcome};
use crate::error::PoolError;
use crate::palantir::Palantir;
use palantir_env::{BeingId, CancelToken, PalantirId};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;

pub struct BlockingQueuePool {
    capacity: usize,

    /// Producer side, used by `release`
    tx: mpsc::UnboundedSender<PalantirId>,

    /// Consumer side; the async mutex queues acquirers in FIFO order
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<PalantirId>>,

    owners: Mutex<OwnershipMap>,

    /// Ids currently sitting in the queue
    depth: AtomicUsize,

    counters: PoolCounters,
}

impl BlockingQueuePool {
    pub fn new(capacity: usize) -> Result<Self, PoolError> {
        let (tx, rx) = mpsc::unbounded_channel();
        for i in 0..capacity as u32 {
            tx.send(PalantirId(i)).map_err(|_| PoolError::Closed)?;
        }
        Ok(Self {
            capacity,
            tx,
            rx: tokio::sync::Mutex::new(rx),
            owners: Mutex::new(new_ownership_map(capacity)),
            depth: AtomicUsize::new(capacity),
            counters: PoolCounters::default(),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub async fn acquire(&self, being: BeingId, cancel: &CancelToken) -> Result<PalantirId, PoolError> {
        let dequeue = async {
            let mut rx = self.rx.lock().await;
            rx.recv().await
        };
        // `recv` is cancel safe: a dropped dequeue loses no id.
        let palantir = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PoolError::Cancelled),
            palantir = dequeue => palantir.ok_or(PoolError::Closed)?,
        };

        let mut owners = lock_map(&self.owners);
        self.depth.fetch_sub(1, Ordering::AcqRel);
        match owners.get_mut(&palantir) {
            Some(owner) if owner.is_none() => {
                *owner = Some(being);
                self.counters.record_acquire();
                Ok(palantir)
            }
            _ => {
                // Never hand out an id the map says is taken; put it back.
                self.tx.send(palantir).map_err(|_| PoolError::Closed)?;
                self.depth.fetch_add(1, Ordering::AcqRel);
                Err(PoolError::NoFreePalantir)
            }
        }
    }

    pub fn release(&self, palantir: PalantirId) -> Result<ReleaseOutcome, PoolError> {
        let mut owners = lock_map(&self.owners);
        let outcome = free_entry(&mut owners, palantir)?;
        if outcome == ReleaseOutcome::Released {
            self.tx.send(palantir).map_err(|_| PoolError::Closed)?;
            self.depth.fetch_add(1, Ordering::AcqRel);
        }
        self.counters.record_release(outcome);
        Ok(outcome)
    }

    pub fn palantiri(&self) -> Vec<Palantir> {
        sorted_palantiri(&lock_map(&self.owners))
    }

    pub fn available_permits(&self) -> usize {
        self.depth.load(Ordering::Acquire)
    }

    pub(crate) fn counters(&self) -> &PoolCounters {
        &self.counters
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_owned_id_in_queue_is_put_back() {
        let pool = BlockingQueuePool::new(2).unwrap();
        let cancel = CancelToken::new();
        for owner in lock_map(&pool.owners).values_mut() {
            *owner = Some(BeingId(9));
        }

        assert_eq!(
            pool.acquire(BeingId(0), &cancel).await,
            Err(PoolError::NoFreePalantir)
        );
        assert_eq!(pool.available_permits(), 2);
        assert_eq!(pool.counters().stats(2, 2, 0).acquisitions, 0);

        // Both ids are still queued.
        for owner in lock_map(&pool.owners).values_mut() {
            *owner = None;
        }
        let first = pool.acquire(BeingId(0), &cancel).await.unwrap();
        let second = pool.acquire(BeingId(1), &cancel).await.unwrap();
        assert_ne!(first, second);
        assert_eq!(pool.available_permits(), 0);
    }
}
