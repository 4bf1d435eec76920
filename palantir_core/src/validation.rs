//! Validation - invariant checks over snapshot streams.
//!
//! The checks never touch the simulator. They run over immutable snapshots,
//! so they are safe to use from any observer or after the fact.
//!
//! Per snapshot, in priority order:
//! 1. being and palantir counts match the configuration (skipped while the
//!    simulator is `CANCELLING` or `CANCELLED`)
//! 2. every `(prev_state, state)` pair is in the transition table
//! 3. every being in `ACQUIRING`, `GAZING` or `RELEASING` is assigned an
//!    existing palantir that it owns
//! 4. no palantir is shared, no being holds two
//!
//! Usage:
//! ```ignore
//! use palantir_core::validation::ValidationSession;
//!
//! let mut session = ValidationSession::for_config(&config);
//! while let Some(snapshot) = snapshots.recv().await {
//!     session.observe(&snapshot);
//! }
//! let report = session.report();
//! assert!(report.is_clean());
//! ```

use crate::being::BeingState;
use crate::config::SimulatorConfig;
use crate::snapshot::{BeingSnapshot, ModelSnapshot};
use palantir_env::{BeingId, PalantirId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

// =============================================================================
// VIOLATIONS
// =============================================================================

/// Category of a violated invariant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    BeingCount,
    PalantirCount,
    IllegalTransition,
    MissingAssignment,
    UnknownPalantir,
    OwnerMismatch,
    SharedPalantir,
    MultipleHoldings,
    /// A being changed state without the change being visible as one step
    SkippedTransition,
    OutOfOrder,
    GazingOverCapacity,
}

/// One finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub kind: ViolationKind,
    pub being: Option<BeingId>,
    pub palantir: Option<PalantirId>,
    pub message: String,
    /// Sequence number of the offending snapshot
    pub sequence: u64,
}

impl Violation {
    fn new(kind: ViolationKind, sequence: u64, message: impl Into<String>) -> Self {
        Self {
            kind,
            being: None,
            palantir: None,
            message: message.into(),
            sequence,
        }
    }

    fn being(mut self, being: BeingId) -> Self {
        self.being = Some(being);
        self
    }

    fn palantir(mut self, palantir: PalantirId) -> Self {
        self.palantir = Some(palantir);
        self
    }
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{} {:?}: {}", self.sequence, self.kind, self.message)
    }
}

// =============================================================================
// SINGLE SNAPSHOT
// =============================================================================

/// Runs every per-snapshot check and returns all findings.
pub fn validate_snapshot(
    snapshot: &ModelSnapshot,
    expected_beings: usize,
    expected_palantiri: usize,
) -> Vec<Violation> {
    let sequence = snapshot.sequence;
    let mut violations = Vec::new();

    if !snapshot.simulator_state.is_tearing_down() {
        if snapshot.beings.len() != expected_beings {
            violations.push(Violation::new(
                ViolationKind::BeingCount,
                sequence,
                format!("expected {} beings, found {}", expected_beings, snapshot.beings.len()),
            ));
        }
        if snapshot.palantiri.len() != expected_palantiri {
            violations.push(Violation::new(
                ViolationKind::PalantirCount,
                sequence,
                format!(
                    "expected {} palantiri, found {}",
                    expected_palantiri,
                    snapshot.palantiri.len()
                ),
            ));
        }
    }

    for being in snapshot.beings.values() {
        if !BeingState::is_legal_transition(being.prev_state, being.state) {
            violations.push(
                Violation::new(
                    ViolationKind::IllegalTransition,
                    sequence,
                    format!("{}: {} -> {}", being.id, describe(being.prev_state), being.state),
                )
                .being(being.id),
            );
        }
        check_assignment(snapshot, being, &mut violations);
    }

    check_exclusive_ownership(snapshot, &mut violations);
    violations
}

fn describe(state: Option<BeingState>) -> &'static str {
    state.map_or("none", |s| s.name())
}

fn check_assignment(snapshot: &ModelSnapshot, being: &BeingSnapshot, violations: &mut Vec<Violation>) {
    if !being.state.holds_palantir() {
        return;
    }
    let sequence = snapshot.sequence;

    let Some(assigned) = being.assigned else {
        violations.push(
            Violation::new(
                ViolationKind::MissingAssignment,
                sequence,
                format!("{} is {} without a palantir", being.id, being.state),
            )
            .being(being.id),
        );
        return;
    };

    match snapshot.palantir(assigned) {
        None => violations.push(
            Violation::new(
                ViolationKind::UnknownPalantir,
                sequence,
                format!("{} is assigned missing {}", being.id, assigned),
            )
            .being(being.id)
            .palantir(assigned),
        ),
        Some(palantir) if palantir.owner != Some(being.id) => violations.push(
            Violation::new(
                ViolationKind::OwnerMismatch,
                sequence,
                format!(
                    "{} is assigned {} but its owner is {}",
                    being.id,
                    assigned,
                    palantir.owner.map_or_else(|| "nobody".to_string(), |o| o.to_string())
                ),
            )
            .being(being.id)
            .palantir(assigned),
        ),
        Some(_) => {}
    }
}

fn check_exclusive_ownership(snapshot: &ModelSnapshot, violations: &mut Vec<Violation>) {
    let sequence = snapshot.sequence;

    let mut assignees: BTreeMap<PalantirId, Vec<BeingId>> = BTreeMap::new();
    for being in snapshot.beings.values() {
        if let Some(assigned) = being.assigned {
            assignees.entry(assigned).or_default().push(being.id);
        }
    }
    for (palantir, beings) in assignees.iter().filter(|(_, beings)| beings.len() > 1) {
        violations.push(
            Violation::new(
                ViolationKind::SharedPalantir,
                sequence,
                format!("{} is assigned to {} beings", palantir, beings.len()),
            )
            .palantir(*palantir),
        );
    }

    let mut holdings: BTreeMap<BeingId, usize> = BTreeMap::new();
    for owner in snapshot.palantiri.values().filter_map(|p| p.owner) {
        *holdings.entry(owner).or_default() += 1;
    }
    for (being, count) in holdings.into_iter().filter(|(_, count)| *count > 1) {
        violations.push(
            Violation::new(
                ViolationKind::MultipleHoldings,
                sequence,
                format!("{} owns {} palantiri", being, count),
            )
            .being(being),
        );
    }
}

// =============================================================================
// VALIDATION SESSION
// =============================================================================

/// Checks a whole snapshot stream as delivered to one observer.
///
/// Besides the per-snapshot checks it verifies that each being moves one
/// legal step at a time between consecutive snapshots, that sequence numbers
/// only grow, and that no more beings gaze at once than there are palantiri.
#[derive(Debug, Clone)]
pub struct ValidationSession {
    expected_beings: usize,
    expected_palantiri: usize,
    run_id: Option<Uuid>,
    last_sequence: Option<u64>,
    /// Last observed record per being, for the consecutive-snapshot check
    previous: HashMap<BeingId, BeingSnapshot>,
    snapshots_checked: usize,
    max_concurrent_gazers: usize,
    completed_per_being: BTreeMap<BeingId, u32>,
    violations: Vec<Violation>,
}

impl ValidationSession {
    pub fn new(expected_beings: usize, expected_palantiri: usize) -> Self {
        Self {
            expected_beings,
            expected_palantiri,
            run_id: None,
            last_sequence: None,
            previous: HashMap::new(),
            snapshots_checked: 0,
            max_concurrent_gazers: 0,
            completed_per_being: BTreeMap::new(),
            violations: Vec::new(),
        }
    }

    pub fn for_config(config: &SimulatorConfig) -> Self {
        Self::new(config.being_count, config.palantir_count)
    }

    /// Checks one snapshot against its own invariants and its predecessor.
    /// Returns the number of new violations.
    pub fn observe(&mut self, snapshot: &ModelSnapshot) -> usize {
        let before = self.violations.len();
        let sequence = snapshot.sequence;

        // A new model starts a fresh history.
        if self.run_id != Some(snapshot.run_id) {
            self.run_id = Some(snapshot.run_id);
            self.previous.clear();
        }

        if let Some(last) = self.last_sequence {
            if sequence <= last {
                self.violations.push(Violation::new(
                    ViolationKind::OutOfOrder,
                    sequence,
                    format!("snapshot #{} arrived after #{}", sequence, last),
                ));
            }
        }
        self.last_sequence = Some(self.last_sequence.map_or(sequence, |last| last.max(sequence)));

        self.violations
            .extend(validate_snapshot(snapshot, self.expected_beings, self.expected_palantiri));

        let gazers = snapshot.count_in(BeingState::Gazing);
        self.max_concurrent_gazers = self.max_concurrent_gazers.max(gazers);
        if gazers > snapshot.palantiri.len() {
            self.violations.push(Violation::new(
                ViolationKind::GazingOverCapacity,
                sequence,
                format!("{} beings gazing into {} palantiri", gazers, snapshot.palantiri.len()),
            ));
        }

        for being in snapshot.beings.values() {
            if let Some(previous) = self.previous.insert(being.id, being.clone()) {
                self.check_step(&previous, being, sequence);
            }
            self.completed_per_being.insert(being.id, being.completed_iterations);
        }

        self.snapshots_checked += 1;
        self.violations.len() - before
    }

    fn check_step(&mut self, previous: &BeingSnapshot, current: &BeingSnapshot, sequence: u64) {
        let changed = previous.state != current.state || previous.prev_state != current.prev_state;
        if !changed {
            return;
        }
        if current.prev_state != Some(previous.state) {
            self.violations.push(
                Violation::new(
                    ViolationKind::SkippedTransition,
                    sequence,
                    format!(
                        "{} went from {} to {} but records {} as previous",
                        current.id,
                        previous.state,
                        current.state,
                        describe(current.prev_state)
                    ),
                )
                .being(current.id),
            );
        } else if !BeingState::is_legal_transition(Some(previous.state), current.state) {
            self.violations.push(
                Violation::new(
                    ViolationKind::IllegalTransition,
                    sequence,
                    format!("{}: {} -> {} across snapshots", current.id, previous.state, current.state),
                )
                .being(current.id),
            );
        }
    }

    pub fn violations(&self) -> &[Violation] {
        &self.violations
    }

    pub fn report(&self) -> ValidationReport {
        ValidationReport {
            snapshots_checked: self.snapshots_checked,
            max_concurrent_gazers: self.max_concurrent_gazers,
            completed_per_being: self.completed_per_being.clone(),
            violations: self.violations.clone(),
        }
    }
}

// =============================================================================
// VALIDATION REPORT
// =============================================================================

/// Summary of a validated snapshot stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub snapshots_checked: usize,
    pub max_concurrent_gazers: usize,
    /// Completed cycles per being as of the last snapshot
    pub completed_per_being: BTreeMap<BeingId, u32>,
    pub violations: Vec<Violation>,
}

impl ValidationReport {
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn total_completed_cycles(&self) -> u64 {
        self.completed_per_being.values().map(|c| u64::from(*c)).sum()
    }

    /// Violations tallied by kind.
    pub fn violation_counts(&self) -> BTreeMap<ViolationKind, usize> {
        let mut counts = BTreeMap::new();
        for violation in &self.violations {
            *counts.entry(violation.kind).or_default() += 1;
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::palantir::Palantir;
    use crate::snapshot::SimulatorState;
    use proptest::prelude::*;
    use std::time::Duration;
    use BeingState::*;

    fn being(id: u32, prev: Option<BeingState>, state: BeingState, assigned: Option<u32>) -> BeingSnapshot {
        BeingSnapshot {
            id: BeingId(id),
            state,
            prev_state: prev,
            assigned: assigned.map(PalantirId),
            completed_iterations: 0,
        }
    }

    fn snapshot(sequence: u64, beings: Vec<BeingSnapshot>, owners: &[Option<u32>]) -> ModelSnapshot {
        ModelSnapshot {
            run_id: Uuid::nil(),
            sequence,
            elapsed: Duration::ZERO,
            simulator_state: SimulatorState::Running,
            beings: beings.into_iter().map(|b| (b.id, b)).collect(),
            palantiri: owners
                .iter()
                .enumerate()
                .map(|(i, owner)| {
                    let id = PalantirId(i as u32);
                    (id, Palantir { id, owner: owner.map(BeingId) })
                })
                .collect(),
        }
    }

    fn kinds(violations: &[Violation]) -> Vec<ViolationKind> {
        violations.iter().map(|v| v.kind).collect()
    }

    #[test]
    fn test_consistent_snapshot_is_clean() {
        let s = snapshot(
            1,
            vec![
                being(0, Some(Acquiring), Gazing, Some(1)),
                being(1, Some(Idle), Waiting, None),
            ],
            &[None, Some(0)],
        );
        assert!(validate_snapshot(&s, 2, 2).is_empty());
    }

    #[test]
    fn test_count_mismatch_detected_unless_tearing_down() {
        let mut s = snapshot(1, vec![being(0, None, Idle, None)], &[None]);
        assert_eq!(
            kinds(&validate_snapshot(&s, 2, 3)),
            vec![ViolationKind::BeingCount, ViolationKind::PalantirCount]
        );

        s.simulator_state = SimulatorState::Cancelling;
        assert!(validate_snapshot(&s, 2, 3).is_empty());
    }

    #[test]
    fn test_holding_state_requires_owned_assignment() {
        let s = snapshot(
            4,
            vec![
                being(0, Some(Gazing), Releasing, None),
                being(1, Some(Acquiring), Gazing, Some(7)),
                being(2, Some(Waiting), Acquiring, Some(0)),
            ],
            &[None],
        );
        let found = kinds(&validate_snapshot(&s, 3, 1));
        assert_eq!(
            found,
            vec![
                ViolationKind::MissingAssignment,
                ViolationKind::UnknownPalantir,
                ViolationKind::OwnerMismatch,
            ]
        );
    }

    #[test]
    fn test_shared_and_multiple_holdings_detected() {
        let s = snapshot(
            2,
            vec![
                being(0, Some(Idle), Waiting, Some(0)),
                being(1, Some(Idle), Waiting, Some(0)),
            ],
            &[Some(1), Some(1)],
        );
        let found = kinds(&validate_snapshot(&s, 2, 2));
        assert!(found.contains(&ViolationKind::SharedPalantir));
        assert!(found.contains(&ViolationKind::MultipleHoldings));
    }

    #[test]
    fn test_session_flags_skipped_step_and_reordering() {
        let mut session = ValidationSession::new(1, 1);
        session.observe(&snapshot(5, vec![being(0, None, Idle, None)], &[None]));
        // IDLE -> GAZING in one step with a recorded ACQUIRING predecessor
        let jumped = snapshot(6, vec![being(0, Some(Acquiring), Gazing, Some(0))], &[Some(0)]);
        assert_eq!(session.observe(&jumped), 1);
        session.observe(&snapshot(3, vec![being(0, Some(Gazing), Releasing, Some(0))], &[Some(0)]));

        let report = session.report();
        assert_eq!(report.snapshots_checked, 3);
        let counts = report.violation_counts();
        assert_eq!(counts.get(&ViolationKind::SkippedTransition), Some(&1));
        assert_eq!(counts.get(&ViolationKind::OutOfOrder), Some(&1));
        assert!(!report.is_clean());
    }

    #[test]
    fn test_session_tracks_gazers_and_completed_cycles() {
        let mut session = ValidationSession::new(2, 1);
        let mut first = being(0, Some(Acquiring), Gazing, Some(0));
        first.completed_iterations = 3;
        let mut second = being(1, Some(Acquiring), Gazing, Some(0));
        second.completed_iterations = 2;
        session.observe(&snapshot(1, vec![first, second], &[Some(0)]));

        let report = session.report();
        assert_eq!(report.max_concurrent_gazers, 2);
        assert_eq!(report.total_completed_cycles(), 5);
        let counts = report.violation_counts();
        assert_eq!(counts.get(&ViolationKind::GazingOverCapacity), Some(&1));
        assert_eq!(counts.get(&ViolationKind::SharedPalantir), Some(&1));
    }

    #[test]
    fn test_session_restarts_history_for_new_model() {
        let mut session = ValidationSession::new(1, 1);
        session.observe(&snapshot(1, vec![being(0, Some(Releasing), Idle, None)], &[None]));

        let mut fresh = snapshot(2, vec![being(0, None, Idle, None)], &[None]);
        fresh.run_id = Uuid::new_v4();
        assert_eq!(session.observe(&fresh), 0);
    }

    #[test]
    fn test_session_checks_each_step_against_previous_snapshot() {
        let mut session = ValidationSession::new(1, 1);
        let walk = [
            snapshot(1, vec![being(0, None, Idle, None)], &[None]),
            snapshot(2, vec![being(0, Some(Idle), Waiting, None)], &[None]),
            snapshot(3, vec![being(0, Some(Waiting), Acquiring, Some(0))], &[Some(0)]),
            snapshot(4, vec![being(0, Some(Acquiring), Gazing, Some(0))], &[Some(0)]),
            snapshot(5, vec![being(0, Some(Gazing), Releasing, Some(0))], &[Some(0)]),
            snapshot(6, vec![being(0, Some(Releasing), Idle, None)], &[None]),
        ];
        for s in &walk {
            assert_eq!(session.observe(s), 0, "#{}", s.sequence);
        }

        // IDLE -> GAZING, recorded faithfully, is illegal both within the
        // snapshot and across the pair.
        let jump = snapshot(7, vec![being(0, Some(Idle), Gazing, Some(0))], &[Some(0)]);
        assert_eq!(session.observe(&jump), 2);
        assert_eq!(
            session.report().violation_counts().get(&ViolationKind::IllegalTransition),
            Some(&2)
        );
    }

    #[test]
    fn test_granted_palantir_of_waiting_being_is_clean() {
        // Between the grant and the ACQUIRING write.
        let s = snapshot(3, vec![being(0, Some(Idle), Waiting, None)], &[Some(0)]);
        assert!(validate_snapshot(&s, 1, 1).is_empty());
    }

    proptest! {
        #[test]
        fn prop_transition_check_matches_table(
            prev in proptest::option::of(prop::sample::select(BeingState::all().to_vec())),
            next in prop::sample::select(BeingState::all().to_vec()),
        ) {
            let s = snapshot(1, vec![being(0, prev, next, None)], &[]);
            let flagged = validate_snapshot(&s, 1, 0)
                .iter()
                .any(|v| v.kind == ViolationKind::IllegalTransition);
            prop_assert_eq!(flagged, !BeingState::is_legal_transition(prev, next));
        }
    }
}
