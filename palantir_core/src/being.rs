//! Beings: the simulated tasks contending for palantiri.
//!
//! Each being runs on its own task and loops
//! `IDLE -> WAITING -> ACQUIRING -> GAZING -> RELEASING -> IDLE` for the
//! configured number of iterations, then ends in `DONE`. A being blocks inside
//! `PoolManager::acquire` while `WAITING`; the grant is published as
//! `ACQUIRING` with the palantir already assigned.
//!
//! The grant itself is awaited outside the model gate. A snapshot captured
//! between the grant and the `ACQUIRING` write shows the palantir owned by a
//! `WAITING` being whose `assigned` is still `None`. That being is the only
//! holder, and the validator accepts this window.
//!
//! Every state write is followed by a snapshot publication before the being
//! makes its next write, so observers see each being's states in order.

use crate::error::{PoolError, SimulatorError};
use crate::simulator::{Hub, Model};
use crate::snapshot::BeingSnapshot;
use palantir_env::{BeingId, CancelToken, PalantirId, SimulationContext};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, error, warn};

/// State of one being.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BeingState {
    Idle,
    Waiting,
    Acquiring,
    Gazing,
    Releasing,
    Done,
    /// Parked after a finished run; distinct from a fresh `Idle`
    Holding,
    Cancelled,
    Error,
}

impl BeingState {
    /// Returns every state.
    pub fn all() -> [BeingState; 9] {
        [
            BeingState::Idle,
            BeingState::Waiting,
            BeingState::Acquiring,
            BeingState::Gazing,
            BeingState::Releasing,
            BeingState::Done,
            BeingState::Holding,
            BeingState::Cancelled,
            BeingState::Error,
        ]
    }

    /// Returns the state name.
    pub fn name(&self) -> &'static str {
        match self {
            BeingState::Idle => "IDLE",
            BeingState::Waiting => "WAITING",
            BeingState::Acquiring => "ACQUIRING",
            BeingState::Gazing => "GAZING",
            BeingState::Releasing => "RELEASING",
            BeingState::Done => "DONE",
            BeingState::Holding => "HOLDING",
            BeingState::Cancelled => "CANCELLED",
            BeingState::Error => "ERROR",
        }
    }

    /// States a being's run can end in.
    pub fn is_terminal(&self) -> bool {
        matches!(self, BeingState::Done | BeingState::Cancelled | BeingState::Error)
    }

    /// States in which the being must hold exactly one palantir.
    pub fn holds_palantir(&self) -> bool {
        matches!(
            self,
            BeingState::Acquiring | BeingState::Gazing | BeingState::Releasing
        )
    }

    /// Legal predecessors of `self`; `None` means any. Having no previous
    /// state at all is decided by `accepts_initial`.
    fn predecessors(&self) -> Option<&'static [BeingState]> {
        use BeingState::*;
        match self {
            Holding => Some(&[Done]),
            Idle => Some(&[Releasing, Acquiring, Waiting, Gazing, Done]),
            Waiting => Some(&[Idle, Releasing]),
            Acquiring => Some(&[Idle, Waiting]),
            Gazing => Some(&[Acquiring]),
            Releasing => Some(&[Gazing]),
            Done => Some(&[Idle, Waiting, Error]),
            Cancelled | Error => None,
        }
    }

    /// True if a being with no previous state may be in `self`.
    fn accepts_initial(&self) -> bool {
        matches!(
            self,
            BeingState::Holding | BeingState::Idle | BeingState::Cancelled | BeingState::Error
        )
    }

    /// Checks a `(prev, next)` pair against the legal transition table.
    pub fn is_legal_transition(prev: Option<BeingState>, next: BeingState) -> bool {
        match (prev, next.predecessors()) {
            (_, None) => true,
            (None, Some(_)) => next.accepts_initial(),
            (Some(prev), Some(allowed)) => allowed.contains(&prev),
        }
    }
}

impl std::fmt::Display for BeingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// How a transition touches the assigned palantir.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Assignment {
    Keep,
    Set(PalantirId),
    Clear,
}

/// Live state of one being.
///
/// Written only by the being's own task, read by snapshot capture. The mutex
/// makes `prev_state` and `state` change together.
#[derive(Debug)]
pub(crate) struct BeingCell {
    record: Mutex<BeingSnapshot>,
}

impl BeingCell {
    pub(crate) fn new(id: BeingId) -> Self {
        Self {
            record: Mutex::new(BeingSnapshot::new(id)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BeingSnapshot> {
        self.record.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Copies the current record.
    pub(crate) fn read(&self) -> BeingSnapshot {
        self.lock().clone()
    }

    /// Moves to `next` if the table allows it; nothing changes otherwise.
    pub(crate) fn apply(
        &self,
        next: BeingState,
        assignment: Assignment,
        cycle_completed: bool,
    ) -> Result<(), SimulatorError> {
        let mut record = self.lock();
        if !BeingState::is_legal_transition(Some(record.state), next) {
            return Err(SimulatorError::IllegalTransition {
                being: record.id,
                from: Some(record.state),
                to: next,
            });
        }
        record.prev_state = Some(record.state);
        record.state = next;
        match assignment {
            Assignment::Keep => {}
            Assignment::Set(palantir) => record.assigned = Some(palantir),
            Assignment::Clear => record.assigned = None,
        }
        if cycle_completed {
            record.completed_iterations += 1;
        }
        Ok(())
    }

    /// Enters a state that is legal from anywhere (`CANCELLED`, `ERROR`).
    pub(crate) fn force(&self, next: BeingState) {
        let mut record = self.lock();
        record.prev_state = Some(record.state);
        record.state = next;
        record.assigned = None;
    }
}

/// How a being's loop ended, short of an error.
enum Outcome {
    Completed,
    Cancelled,
}

/// The task body of one being.
pub(crate) struct BeingTask<Ctx: SimulationContext> {
    pub(crate) id: BeingId,
    pub(crate) model: Arc<Model>,
    pub(crate) hub: Arc<Hub>,
    pub(crate) context: Arc<Ctx>,
    pub(crate) cancel: CancelToken,
}

impl<Ctx: SimulationContext> BeingTask<Ctx> {
    fn cell(&self) -> &BeingCell {
        &self.model.beings[self.id.index()]
    }

    /// Runs the being to a terminal state and returns its completed cycles.
    ///
    /// A held palantir is always released on the way out, whether the loop
    /// was cancelled or failed.
    pub(crate) async fn run(self) -> Result<u32, SimulatorError> {
        let mut held = None;
        let outcome = self.gaze_cycles(&mut held).await;
        let completed = self.cell().read().completed_iterations;

        match outcome {
            Ok(Outcome::Completed) => Ok(completed),
            Ok(Outcome::Cancelled) => {
                self.teardown(held, BeingState::Cancelled)?;
                debug!(being = %self.id, completed, "being cancelled");
                Ok(completed)
            }
            Err(err) => {
                error!(being = %self.id, error = %err, "being failed");
                // One failed being stops the whole run.
                self.cancel.cancel();
                if let Err(teardown) = self.teardown(held, BeingState::Error) {
                    warn!(being = %self.id, error = %teardown, "release during error teardown failed");
                }
                Err(err)
            }
        }
    }

    async fn gaze_cycles(&self, held: &mut Option<PalantirId>) -> Result<Outcome, SimulatorError> {
        let config = &self.model.config;
        let (min_ms, max_ms) = config.gazing_range_ms;

        for cycle in 0..config.iterations {
            if self.cancel.is_cancelled() {
                return Ok(Outcome::Cancelled);
            }
            self.transition(BeingState::Waiting, Assignment::Keep)?;

            let palantir = match self.model.pool.acquire(self.id, &self.cancel).await {
                Ok(palantir) => palantir,
                Err(PoolError::Cancelled) => return Ok(Outcome::Cancelled),
                Err(err) => return Err(err.into()),
            };
            *held = Some(palantir);
            if self.cancel.is_cancelled() {
                return Ok(Outcome::Cancelled);
            }
            debug!(being = %self.id, %palantir, cycle, "palantir granted");

            self.transition(BeingState::Acquiring, Assignment::Set(palantir))?;
            self.transition(BeingState::Gazing, Assignment::Keep)?;

            let gaze = config.effective_gaze(self.context.gaze_millis(min_ms, max_ms));
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Ok(Outcome::Cancelled),
                _ = self.context.sleep(gaze) => {}
            }

            self.transition(BeingState::Releasing, Assignment::Keep)?;
            self.release_to_idle(palantir)?;
            *held = None;
        }

        self.transition(BeingState::Done, Assignment::Keep)?;
        Ok(Outcome::Completed)
    }

    /// Writes one transition, then publishes it.
    fn transition(&self, next: BeingState, assignment: Assignment) -> Result<(), SimulatorError> {
        {
            let _gate = self.model.read_gate();
            self.cell().apply(next, assignment, false)?;
        }
        self.hub.publish(&self.model, self.context.now());
        Ok(())
    }

    /// Frees the palantir and returns to `IDLE` as one step with respect to
    /// snapshot capture.
    fn release_to_idle(&self, palantir: PalantirId) -> Result<(), SimulatorError> {
        {
            let _gate = self.model.read_gate();
            self.model.pool.release(Some(palantir))?;
            self.cell().apply(BeingState::Idle, Assignment::Clear, true)?;
        }
        self.hub.publish(&self.model, self.context.now());
        Ok(())
    }

    /// Releases whatever is still held and enters `terminal`.
    fn teardown(&self, held: Option<PalantirId>, terminal: BeingState) -> Result<(), SimulatorError> {
        let released = {
            let _gate = self.model.read_gate();
            if let Some(palantir) = held {
                warn!(being = %self.id, %palantir, "releasing palantir during teardown");
            }
            let released = self.model.pool.release(held);
            self.cell().force(terminal);
            released
        };
        self.hub.publish(&self.model, self.context.now());
        released.map(|_| ()).map_err(SimulatorError::from)
    }
}
