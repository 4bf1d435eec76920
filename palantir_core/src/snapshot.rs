//! Immutable point-in-time copies of the whole model.

use crate::being::BeingState;
use crate::palantir::Palantir;
use palantir_env::{BeingId, PalantirId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use uuid::Uuid;

/// Lifecycle of the simulator itself.
///
/// `Idle -> Running -> {Cancelling -> Cancelled, Completed}`; `Error` is
/// reachable from any active state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SimulatorState {
    Idle,
    Running,
    Cancelling,
    Cancelled,
    Completed,
    Error,
    #[default]
    Undefined,
}

impl SimulatorState {
    /// Returns the state name.
    pub fn name(&self) -> &'static str {
        match self {
            SimulatorState::Idle => "IDLE",
            SimulatorState::Running => "RUNNING",
            SimulatorState::Cancelling => "CANCELLING",
            SimulatorState::Cancelled => "CANCELLED",
            SimulatorState::Completed => "COMPLETED",
            SimulatorState::Error => "ERROR",
            SimulatorState::Undefined => "UNDEFINED",
        }
    }

    /// True for states a run ends in.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SimulatorState::Cancelled | SimulatorState::Completed | SimulatorState::Error
        )
    }

    /// True while being tasks may still be running.
    pub fn is_active(&self) -> bool {
        matches!(self, SimulatorState::Running | SimulatorState::Cancelling)
    }

    /// True while teardown is in progress or finished; counts are not
    /// guaranteed to be consistent in these states.
    pub fn is_tearing_down(&self) -> bool {
        matches!(self, SimulatorState::Cancelling | SimulatorState::Cancelled)
    }
}

impl std::fmt::Display for SimulatorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// One being as captured in a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeingSnapshot {
    pub id: BeingId,
    pub state: BeingState,
    pub prev_state: Option<BeingState>,
    pub assigned: Option<PalantirId>,
    pub completed_iterations: u32,
}

impl BeingSnapshot {
    /// A freshly built being: `IDLE`, no history, nothing assigned.
    pub fn new(id: BeingId) -> Self {
        Self {
            id,
            state: BeingState::Idle,
            prev_state: None,
            assigned: None,
            completed_iterations: 0,
        }
    }
}

/// An immutable copy of simulator, being and palantir state.
///
/// Produced after every being transition and simulator state change, handed
/// to observers behind an `Arc`, and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSnapshot {
    /// Identity of the model this snapshot belongs to
    pub run_id: Uuid,

    /// Global capture order, strictly increasing per simulator
    pub sequence: u64,

    /// Context clock at capture time
    pub elapsed: Duration,

    pub simulator_state: SimulatorState,

    pub beings: BTreeMap<BeingId, BeingSnapshot>,

    pub palantiri: BTreeMap<PalantirId, Palantir>,
}

impl ModelSnapshot {
    pub fn being(&self, id: BeingId) -> Option<&BeingSnapshot> {
        self.beings.get(&id)
    }

    pub fn palantir(&self, id: PalantirId) -> Option<&Palantir> {
        self.palantiri.get(&id)
    }

    /// Number of beings currently in `state`.
    pub fn count_in(&self, state: BeingState) -> usize {
        self.beings.values().filter(|b| b.state == state).count()
    }

    /// Number of palantiri with an owner.
    pub fn held_palantiri(&self) -> usize {
        self.palantiri.values().filter(|p| !p.is_available()).count()
    }

    /// Sum of completed gaze cycles over all beings.
    pub fn total_completed(&self) -> u64 {
        self.beings
            .values()
            .map(|b| u64::from(b.completed_iterations))
            .sum()
    }

    /// True once every being has reached a terminal state.
    pub fn all_beings_terminal(&self) -> bool {
        self.beings.values().all(|b| b.state.is_terminal())
    }
}
