//! Palantir Core - Resource-Pool Concurrency Simulator
//!
//! A fixed pool of palantiri is shared by a larger set of beings. Each being
//! loops acquire, gaze, release; the pool guarantees that no palantir is ever
//! held by two beings at once. This crate provides:
//! 1. **Pool strategies**: semaphore + mutex map, semaphore + spin-lock map,
//!    blocking queue, and lock-free atomic slots behind one `PoolManager`
//! 2. **Beings and Simulator**: per-being state machines, cancellation with
//!    guaranteed release, and ordered snapshot publication
//! 3. **Validation**: invariant checks over snapshot streams

pub mod being;
pub mod config;
pub mod error;
pub mod observer;
pub mod palantir;
pub mod pool;
pub mod simulator;
pub mod snapshot;
pub mod spin_lock;
pub mod validation;

// Re-export key types for convenience
pub use being::BeingState;
pub use config::{PoolStrategy, SimulatorConfig};
pub use error::{ConfigError, PoolError, SimulatorError};
pub use observer::{ChannelObserver, ObserverId, SnapshotObserver};
pub use palantir::Palantir;
pub use pool::{PoolManager, PoolStats, ReleaseOutcome};
pub use simulator::Simulator;
pub use snapshot::{BeingSnapshot, ModelSnapshot, SimulatorState};
pub use validation::{validate_snapshot, ValidationReport, ValidationSession, Violation, ViolationKind};
