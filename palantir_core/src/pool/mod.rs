//! Pool managers: the synchronization strategies guarding the palantiri.
//!
//! Every strategy honors the same contract:
//! - `acquire` blocks until a palantir is free, marks it owned and returns
//!   it; it never hands out a palantir someone else owns.
//! - Admission (semaphore permit or queue item) and the ownership write form
//!   one step: an admitted being always finds a free entry. If the ownership
//!   write fails anyway, the permit is restored before the error is returned.
//! - Cancellation while waiting surfaces as `PoolError::Cancelled` and leaves
//!   no permit or ownership behind.
//! - `release(None)` is a no-op; releasing a palantir that is already free is
//!   idempotent and never over-signals the admission gate.
//!
//! # Strategies
//!
//! | Strategy | Admission | Ownership table |
//! |----------|-----------|-----------------|
//! | `SemaphoreLockMap` | `tokio::sync::Semaphore` | `Mutex<HashMap>` |
//! | `SpinLockMap` | `tokio::sync::Semaphore` | `SpinLock<HashMap>` |
//! | `BlockingQueue` | `mpsc` queue of free ids | `Mutex<HashMap>` |
//! | `AtomicSlots` | `tokio::sync::Semaphore` | `Vec<AtomicU64>` |

mod atomic_slots;
mod blocking_queue;
mod semaphore_lock_map;
mod spin_lock_map;

pub use atomic_slots::AtomicSlotsPool;
pub use blocking_queue::BlockingQueuePool;
pub use semaphore_lock_map::SemaphoreLockMapPool;
pub use spin_lock_map::SpinLockMapPool;

use crate::config::PoolStrategy;
use crate::error::PoolError;
use crate::palantir::Palantir;
use palantir_env::{BeingId, CancelToken, PalantirId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// What a `release` call actually did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// The palantir was owned and is now free; one waiter was signalled.
    Released,

    /// The palantir was already free; nothing changed.
    AlreadyAvailable,

    /// `release(None)`; nothing changed.
    Ignored,
}

/// Point-in-time pool counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    /// Fixed number of palantiri
    pub capacity: usize,

    /// Admission permits (or queued ids) currently available
    pub available_permits: usize,

    /// Palantiri currently owned
    pub held: usize,

    /// Successful acquisitions since build
    pub acquisitions: u64,

    /// Releases that freed a palantir
    pub releases: u64,

    /// Releases of an already-free palantir
    pub redundant_releases: u64,
}

/// Monotonic counters shared by every strategy.
#[derive(Debug, Default)]
pub(crate) struct PoolCounters {
    acquisitions: AtomicU64,
    releases: AtomicU64,
    redundant_releases: AtomicU64,
}

impl PoolCounters {
    pub(crate) fn record_acquire(&self) {
        self.acquisitions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_release(&self, outcome: ReleaseOutcome) {
        match outcome {
            ReleaseOutcome::Released => {
                self.releases.fetch_add(1, Ordering::Relaxed);
            }
            ReleaseOutcome::AlreadyAvailable => {
                self.redundant_releases.fetch_add(1, Ordering::Relaxed);
            }
            ReleaseOutcome::Ignored => {}
        }
    }

    pub(crate) fn stats(&self, capacity: usize, available_permits: usize, held: usize) -> PoolStats {
        PoolStats {
            capacity,
            available_permits,
            held,
            acquisitions: self.acquisitions.load(Ordering::Relaxed),
            releases: self.releases.load(Ordering::Relaxed),
            redundant_releases: self.redundant_releases.load(Ordering::Relaxed),
        }
    }
}

/// Ownership map: `None` means available.
pub(crate) type OwnershipMap = HashMap<PalantirId, Option<BeingId>>;

pub(crate) fn new_ownership_map(capacity: usize) -> OwnershipMap {
    (0..capacity as u32).map(|i| (PalantirId(i), None)).collect()
}

pub(crate) fn sorted_palantiri(map: &OwnershipMap) -> Vec<Palantir> {
    let mut palantiri: Vec<Palantir> = map
        .iter()
        .map(|(id, owner)| Palantir { id: *id, owner: *owner })
        .collect();
    palantiri.sort_by_key(|p| p.id);
    palantiri
}

/// Locks a std mutex, recovering the data if a holder panicked.
///
/// The ownership map is updated in single assignments, so a poisoned map is
/// still consistent.
pub(crate) fn lock_map(map: &Mutex<OwnershipMap>) -> MutexGuard<'_, OwnershipMap> {
    map.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Marks an entry of `map` free; shared by the map-based strategies.
pub(crate) fn free_entry(map: &mut OwnershipMap, palantir: PalantirId) -> Result<ReleaseOutcome, PoolError> {
    match map.get_mut(&palantir) {
        None => Err(PoolError::UnknownPalantir(palantir)),
        Some(owner) if owner.is_none() => Ok(ReleaseOutcome::AlreadyAvailable),
        Some(owner) => {
            *owner = None;
            Ok(ReleaseOutcome::Released)
        }
    }
}

/// Claims any free entry of `map` for `being`.
pub(crate) fn claim_entry(map: &mut OwnershipMap, being: BeingId) -> Option<PalantirId> {
    map.iter_mut()
        .find(|(_, owner)| owner.is_none())
        .map(|(id, owner)| {
            *owner = Some(being);
            *id
        })
}

/// The pool of palantiri, guarded by one of the closed set of strategies.
pub enum PoolManager {
    SemaphoreLockMap(SemaphoreLockMapPool),
    SpinLockMap(SpinLockMapPool),
    BlockingQueue(BlockingQueuePool),
    AtomicSlots(AtomicSlotsPool),
}

impl PoolManager {
    /// Allocates `capacity` palantiri behind the chosen strategy.
    ///
    /// Every permit count and queue depth starts at `capacity`. Construction
    /// is the only way to obtain a pool, so it is built exactly once before
    /// the first acquire.
    pub fn build(
        strategy: PoolStrategy,
        capacity: usize,
        spin_poll_interval: Duration,
    ) -> Result<Self, PoolError> {
        if capacity == 0 {
            return Err(PoolError::ZeroCapacity);
        }
        let pool = match strategy {
            PoolStrategy::SemaphoreLockMap => {
                PoolManager::SemaphoreLockMap(SemaphoreLockMapPool::new(capacity))
            }
            PoolStrategy::SpinLockMap => {
                PoolManager::SpinLockMap(SpinLockMapPool::new(capacity, spin_poll_interval))
            }
            PoolStrategy::BlockingQueue => {
                PoolManager::BlockingQueue(BlockingQueuePool::new(capacity)?)
            }
            PoolStrategy::AtomicSlots => PoolManager::AtomicSlots(AtomicSlotsPool::new(capacity)),
        };
        tracing::debug!(strategy = %strategy, capacity, "pool built");
        Ok(pool)
    }

    /// Returns the strategy this pool was built with.
    pub fn strategy(&self) -> PoolStrategy {
        match self {
            PoolManager::SemaphoreLockMap(_) => PoolStrategy::SemaphoreLockMap,
            PoolManager::SpinLockMap(_) => PoolStrategy::SpinLockMap,
            PoolManager::BlockingQueue(_) => PoolStrategy::BlockingQueue,
            PoolManager::AtomicSlots(_) => PoolStrategy::AtomicSlots,
        }
    }

    pub fn capacity(&self) -> usize {
        match self {
            PoolManager::SemaphoreLockMap(pool) => pool.capacity(),
            PoolManager::SpinLockMap(pool) => pool.capacity(),
            PoolManager::BlockingQueue(pool) => pool.capacity(),
            PoolManager::AtomicSlots(pool) => pool.capacity(),
        }
    }

    /// Waits for a free palantir and marks it owned by `being`.
    ///
    /// # Errors
    /// - `PoolError::Cancelled` if `cancel` fires before a palantir is granted
    pub async fn acquire(&self, being: BeingId, cancel: &CancelToken) -> Result<PalantirId, PoolError> {
        if cancel.is_cancelled() {
            return Err(PoolError::Cancelled);
        }
        match self {
            PoolManager::SemaphoreLockMap(pool) => pool.acquire(being, cancel).await,
            PoolManager::SpinLockMap(pool) => pool.acquire(being, cancel).await,
            PoolManager::BlockingQueue(pool) => pool.acquire(being, cancel).await,
            PoolManager::AtomicSlots(pool) => pool.acquire(being, cancel).await,
        }
    }

    /// Frees a palantir and signals one waiter.
    ///
    /// # Errors
    /// - `PoolError::UnknownPalantir` if the id was never part of this pool
    pub fn release(&self, palantir: Option<PalantirId>) -> Result<ReleaseOutcome, PoolError> {
        let Some(palantir) = palantir else {
            return Ok(ReleaseOutcome::Ignored);
        };
        let outcome = match self {
            PoolManager::SemaphoreLockMap(pool) => pool.release(palantir),
            PoolManager::SpinLockMap(pool) => pool.release(palantir),
            PoolManager::BlockingQueue(pool) => pool.release(palantir),
            PoolManager::AtomicSlots(pool) => pool.release(palantir),
        }?;
        if outcome == ReleaseOutcome::AlreadyAvailable {
            tracing::warn!(%palantir, "release of a palantir that is already available");
        }
        Ok(outcome)
    }

    /// Returns the ownership table, sorted by id, read under the strategy's
    /// own synchronization.
    pub fn palantiri(&self) -> Vec<Palantir> {
        match self {
            PoolManager::SemaphoreLockMap(pool) => pool.palantiri(),
            PoolManager::SpinLockMap(pool) => pool.palantiri(),
            PoolManager::BlockingQueue(pool) => pool.palantiri(),
            PoolManager::AtomicSlots(pool) => pool.palantiri(),
        }
    }

    /// Permits (or queued ids) currently available to acquirers.
    pub fn available_permits(&self) -> usize {
        match self {
            PoolManager::SemaphoreLockMap(pool) => pool.available_permits(),
            PoolManager::SpinLockMap(pool) => pool.available_permits(),
            PoolManager::BlockingQueue(pool) => pool.available_permits(),
            PoolManager::AtomicSlots(pool) => pool.available_permits(),
        }
    }

    pub fn stats(&self) -> PoolStats {
        let held = self.palantiri().iter().filter(|p| !p.is_available()).count();
        let counters = match self {
            PoolManager::SemaphoreLockMap(pool) => pool.counters(),
            PoolManager::SpinLockMap(pool) => pool.counters(),
            PoolManager::BlockingQueue(pool) => pool.counters(),
            PoolManager::AtomicSlots(pool) => pool.counters(),
        };
        counters.stats(self.capacity(), self.available_permits(), held)
    }
}

impl std::fmt::Debug for PoolManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolManager")
            .field("strategy", &self.strategy())
            .field("capacity", &self.capacity())
            .field("available_permits", &self.available_permits())
            .finish()
    }
}
