//! Error types for the simulator core.

use crate::being::BeingState;
use crate::snapshot::SimulatorState;
use palantir_env::{BeingId, EnvError, PalantirId};
use thiserror::Error;

/// Rejected configuration. Fatal to the call, harmless to the simulator.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("being count must be at least 1")]
    NoBeings,

    #[error("palantir count must be at least 1")]
    NoPalantiri,

    #[error("iteration count must be at least 1")]
    NoIterations,

    #[error("gazing range [{min}, {max}] ms is inverted")]
    InvertedGazingRange { min: u64, max: u64 },

    #[error("simulation speed must be finite and positive, got {0}")]
    InvalidSpeed(f64),

    #[error("unknown pool strategy: {0}")]
    UnknownStrategy(String),
}

/// Failures surfaced by a `PoolManager`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// The acquiring being is being torn down. Not corruption.
    #[error("acquire cancelled")]
    Cancelled,

    #[error("pool capacity must be at least 1")]
    ZeroCapacity,

    #[error("{0} does not belong to this pool")]
    UnknownPalantir(PalantirId),

    /// Admission succeeded but no free palantir was found. The permit has
    /// already been restored when this is returned.
    #[error("admitted without a free palantir")]
    NoFreePalantir,

    #[error("pool queue closed")]
    Closed,
}

/// Errors returned by `Simulator` operations and by being tasks.
#[derive(Debug, Error)]
pub enum SimulatorError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("pool error: {0}")]
    Pool(#[from] PoolError),

    #[error("environment error: {0}")]
    Env(#[from] EnvError),

    #[error("cannot {operation} while simulator is {state}")]
    InvalidState {
        operation: &'static str,
        state: SimulatorState,
    },

    #[error("no model has been built")]
    NoModel,

    #[error("{being} attempted illegal transition {from:?} -> {to}")]
    IllegalTransition {
        being: BeingId,
        from: Option<BeingState>,
        to: BeingState,
    },
}

impl SimulatorError {
    /// Creates an invalid-state error for the named operation.
    pub fn invalid_state(operation: &'static str, state: SimulatorState) -> Self {
        Self::InvalidState { operation, state }
    }
}
