//! Scenario runner - executes simulation scenarios and checks their outcome.

use crate::context::SimContext;
use crate::scenarios::ScenarioId;

use palantir_core::{
    BeingState, ModelSnapshot, PoolStats, PoolStrategy, Simulator, SimulatorConfig, SimulatorError,
    SimulatorState, ValidationReport, ValidationSession,
};
use palantir_env::{EnvError, SimulationContext};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Delay before the cancellation scenario pulls the plug.
const CANCEL_AFTER: Duration = Duration::from_millis(60);

/// Gaze range of the cancellation scenario; long enough that no being can
/// finish before the cancel.
const CANCELLATION_GAZE_MS: (u64, u64) = (100, 250);

/// Results from running a scenario.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioResult {
    /// Scenario that was run
    pub scenario: ScenarioId,

    /// Seed used
    pub seed: u64,

    /// Configuration the scenario actually ran with
    pub config: SimulatorConfig,

    /// Whether scenario passed all assertions
    pub passed: bool,

    /// Simulator state after the run
    pub final_state: SimulatorState,

    /// Wall time of the run in seconds
    pub elapsed_secs: f64,

    /// Failure message if any
    pub failure_reason: Option<String>,

    /// Metrics collected during run
    pub metrics: ScenarioMetrics,

    /// Validation over every delivered snapshot
    pub report: Option<ValidationReport>,

    /// Full snapshot stream, only when recording
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub snapshots: Vec<ModelSnapshot>,
}

impl ScenarioResult {
    fn failed(scenario: ScenarioId, seed: u64, config: SimulatorConfig, reason: String) -> Self {
        Self {
            scenario,
            seed,
            config,
            passed: false,
            final_state: SimulatorState::Undefined,
            elapsed_secs: 0.0,
            failure_reason: Some(reason),
            metrics: ScenarioMetrics::default(),
            report: None,
            snapshots: Vec::new(),
        }
    }
}

/// Metrics collected during scenario execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScenarioMetrics {
    /// Snapshots delivered to the harness
    pub snapshots: usize,

    /// Gaze cycles completed over all beings
    pub completed_cycles: u64,

    /// Most beings seen gazing in one snapshot
    pub max_concurrent_gazers: usize,

    /// Invariant violations found
    pub violations: usize,

    /// Pool counters at the end of the run
    pub pool: PoolStats,
}

/// What one simulation run left behind.
struct RunOutcome {
    final_state: SimulatorState,
    last: Option<ModelSnapshot>,
    stats: PoolStats,
    report: ValidationReport,
    snapshots: Vec<ModelSnapshot>,
}

/// Runs simulation scenarios.
pub struct ScenarioRunner {
    /// Configuration seed
    seed: u64,

    /// Base configuration each scenario adapts
    base: SimulatorConfig,

    /// Upper bound on a single run
    timeout: Duration,

    /// Keep every snapshot in the result
    record: bool,
}

impl ScenarioRunner {
    /// Creates a new scenario runner.
    pub fn new(seed: u64, beings: usize) -> Self {
        Self {
            seed,
            base: SimulatorConfig {
                being_count: beings,
                ..Default::default()
            },
            timeout: Duration::from_secs(60),
            record: false,
        }
    }

    /// Replaces the base configuration.
    pub fn with_config(mut self, config: SimulatorConfig) -> Self {
        self.base = config;
        self
    }

    /// Sets the pool strategy.
    pub fn with_strategy(mut self, strategy: PoolStrategy) -> Self {
        self.base.pool_strategy = strategy;
        self
    }

    /// Sets the iterations per being.
    pub fn with_iterations(mut self, iterations: u32) -> Self {
        self.base.iterations = iterations;
        self
    }

    /// Sets the palantir count.
    pub fn with_palantiri(mut self, palantiri: usize) -> Self {
        self.base.palantir_count = palantiri;
        self
    }

    /// Sets the gaze range in milliseconds.
    pub fn with_gazing_range(mut self, min_ms: u64, max_ms: u64) -> Self {
        self.base.gazing_range_ms = (min_ms, max_ms);
        self
    }

    /// Sets the upper bound on a single run.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Keeps the whole snapshot stream in each result.
    pub fn recording(mut self, record: bool) -> Self {
        self.record = record;
        self
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn base_config(&self) -> &SimulatorConfig {
        &self.base
    }

    /// The configuration a scenario runs with, derived from the base.
    pub fn config_for(&self, scenario: ScenarioId) -> SimulatorConfig {
        let base = self.base.clone();
        match scenario {
            ScenarioId::Completion => base,
            ScenarioId::SingleSeer => SimulatorConfig {
                palantir_count: 1,
                ..base
            },
            ScenarioId::Cancellation => SimulatorConfig {
                gazing_range_ms: CANCELLATION_GAZE_MS,
                ..base
            },
            ScenarioId::Saturation => SimulatorConfig {
                palantir_count: base.being_count + 2,
                ..base
            },
            ScenarioId::Marathon => SimulatorConfig {
                iterations: base.iterations.saturating_mul(10),
                gazing_range_ms: (0, 2),
                ..base
            },
        }
    }

    /// Runs a scenario and returns the result.
    pub async fn run(&self, scenario: ScenarioId) -> ScenarioResult {
        let config = self.config_for(scenario);
        info!(
            "Starting scenario: {} (seed={}, strategy={})",
            scenario.name(),
            self.seed,
            config.pool_strategy
        );

        let context = SimContext::shared(self.seed);
        let started = context.now();
        let outcome = match self.execute(scenario, &config, Arc::clone(&context)).await {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!("Scenario {} could not run: {}", scenario.name(), err);
                return ScenarioResult::failed(scenario, self.seed, config, err.to_string());
            }
        };
        let elapsed_secs = (context.now() - started).as_secs_f64();

        let failure_reason = Self::check(scenario, &config, &outcome);
        let passed = failure_reason.is_none();
        let metrics = ScenarioMetrics {
            snapshots: outcome.report.snapshots_checked,
            completed_cycles: outcome.last.as_ref().map_or(0, |s| s.total_completed()),
            max_concurrent_gazers: outcome.report.max_concurrent_gazers,
            violations: outcome.report.violations.len(),
            pool: outcome.stats,
        };

        info!(
            "{} {}: {} cycles, {} snapshots, {} violations in {:.2}s",
            if passed { "✓" } else { "✗" },
            scenario.name(),
            metrics.completed_cycles,
            metrics.snapshots,
            metrics.violations,
            elapsed_secs
        );

        ScenarioResult {
            scenario,
            seed: self.seed,
            config,
            passed,
            final_state: outcome.final_state,
            elapsed_secs,
            failure_reason,
            metrics,
            report: Some(outcome.report),
            snapshots: outcome.snapshots,
        }
    }

    async fn execute(
        &self,
        scenario: ScenarioId,
        config: &SimulatorConfig,
        context: Arc<SimContext>,
    ) -> Result<RunOutcome, SimulatorError> {
        let mut simulator = Simulator::new(Arc::clone(&context));
        simulator.build_model(config.clone())?;

        let (_, rx) = simulator.subscribe_channel();
        let collector = tokio::spawn(collect(rx, ValidationSession::for_config(config), self.record));

        simulator.start()?;
        let settled = if scenario.is_cancelling() {
            context.sleep(CANCEL_AFTER).await;
            simulator.cancel().await
        } else {
            match tokio::time::timeout(self.timeout, simulator.wait_for_completion()).await {
                Ok(settled) => settled,
                Err(_) => {
                    warn!("Scenario {} timed out after {:?}, cancelling", scenario.name(), self.timeout);
                    simulator.cancel().await?;
                    Err(EnvError::Timeout(self.timeout.as_millis() as u64).into())
                }
            }
        };

        let last = simulator.snapshot();
        let stats = simulator.pool_stats().unwrap_or_default();
        // Dropping the observers closes the channel and ends the collector.
        simulator.shutdown().await;
        let (session, snapshots) = collector.await.map_err(EnvError::task_failed)?;

        Ok(RunOutcome {
            final_state: settled?,
            last,
            stats,
            report: session.report(),
            snapshots,
        })
    }

    /// Returns the first failed assertion, if any.
    fn check(scenario: ScenarioId, config: &SimulatorConfig, outcome: &RunOutcome) -> Option<String> {
        let expected_state = if scenario.is_cancelling() {
            SimulatorState::Cancelled
        } else {
            SimulatorState::Completed
        };
        if outcome.final_state != expected_state {
            return Some(format!(
                "ended in {} instead of {}",
                outcome.final_state, expected_state
            ));
        }

        if let Some(first) = outcome.report.violations.first() {
            return Some(format!(
                "{} invariant violations, first: {}",
                outcome.report.violations.len(),
                first
            ));
        }

        let Some(last) = outcome.last.as_ref() else {
            return Some("no final snapshot".to_string());
        };
        if !last.all_beings_terminal() {
            return Some(format!(
                "{} beings still active after the run",
                last.beings.len() - last.beings.values().filter(|b| b.state.is_terminal()).count()
            ));
        }
        if last.held_palantiri() != 0 {
            return Some(format!("{} palantiri still held", last.held_palantiri()));
        }
        if outcome.stats.available_permits != config.palantir_count {
            return Some(format!(
                "{} of {} permits available after the run",
                outcome.stats.available_permits, config.palantir_count
            ));
        }
        if outcome.stats.redundant_releases != 0 {
            return Some(format!("{} redundant releases", outcome.stats.redundant_releases));
        }

        match scenario {
            ScenarioId::Cancellation => {
                let cancelled = last.count_in(BeingState::Cancelled);
                if cancelled == 0 {
                    return Some("no being observed the cancellation".to_string());
                }
            }
            _ => {
                let expected = config.being_count as u64 * u64::from(config.iterations);
                if last.total_completed() != expected {
                    return Some(format!(
                        "{} gaze cycles completed, expected {}",
                        last.total_completed(),
                        expected
                    ));
                }
                if scenario == ScenarioId::SingleSeer && outcome.report.max_concurrent_gazers > 1 {
                    return Some(format!(
                        "{} beings gazed at once into a single palantir",
                        outcome.report.max_concurrent_gazers
                    ));
                }
            }
        }

        None
    }
}

/// Feeds every delivered snapshot through the validation session.
async fn collect(
    mut rx: mpsc::UnboundedReceiver<Arc<ModelSnapshot>>,
    mut session: ValidationSession,
    record: bool,
) -> (ValidationSession, Vec<ModelSnapshot>) {
    let mut snapshots = Vec::new();
    while let Some(snapshot) = rx.recv().await {
        let found = session.observe(&snapshot);
        if found > 0 {
            debug!(sequence = snapshot.sequence, found, "violations in snapshot");
        }
        if record {
            snapshots.push(ModelSnapshot::clone(&snapshot));
        }
    }
    (session, snapshots)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runner(strategy: PoolStrategy) -> ScenarioRunner {
        ScenarioRunner::new(42, 5)
            .with_palantiri(3)
            .with_iterations(10)
            .with_gazing_range(0, 5)
            .with_strategy(strategy)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_completion_scenario() {
        let result = runner(PoolStrategy::SemaphoreLockMap)
            .run(ScenarioId::Completion)
            .await;

        assert!(result.passed, "{:?}", result.failure_reason);
        assert_eq!(result.final_state, SimulatorState::Completed);
        assert_eq!(result.metrics.completed_cycles, 50);
        assert_eq!(result.metrics.pool.acquisitions, 50);
        assert!(result.snapshots.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_single_seer_scenario_every_strategy() {
        for strategy in PoolStrategy::all() {
            let result = runner(strategy).run(ScenarioId::SingleSeer).await;

            assert!(result.passed, "{}: {:?}", strategy, result.failure_reason);
            assert_eq!(result.metrics.max_concurrent_gazers, 1);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_cancellation_scenario() {
        for strategy in PoolStrategy::all() {
            let result = runner(strategy).run(ScenarioId::Cancellation).await;

            assert!(result.passed, "{}: {:?}", strategy, result.failure_reason);
            assert_eq!(result.final_state, SimulatorState::Cancelled);
            assert_eq!(result.metrics.pool.held, 0);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_saturation_and_marathon_scenarios() {
        let runner = runner(PoolStrategy::AtomicSlots).with_iterations(3);

        let saturation = runner.run(ScenarioId::Saturation).await;
        assert!(saturation.passed, "{:?}", saturation.failure_reason);
        assert_eq!(saturation.config.palantir_count, 7);

        let marathon = runner.run(ScenarioId::Marathon).await;
        assert!(marathon.passed, "{:?}", marathon.failure_reason);
        assert_eq!(marathon.metrics.completed_cycles, 150);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_recording_keeps_snapshot_stream() {
        let result = runner(PoolStrategy::SpinLockMap)
            .with_iterations(2)
            .recording(true)
            .run(ScenarioId::Completion)
            .await;

        assert!(result.passed);
        assert_eq!(result.snapshots.len(), result.metrics.snapshots);
        assert!(result
            .snapshots
            .windows(2)
            .all(|w| w[0].sequence < w[1].sequence));
    }

    #[tokio::test]
    async fn test_invalid_config_fails_without_running() {
        let result = ScenarioRunner::new(1, 0).run(ScenarioId::Completion).await;

        assert!(!result.passed);
        assert_eq!(result.final_state, SimulatorState::Undefined);
        assert!(result.failure_reason.unwrap().contains("being"));
    }

    #[test]
    fn test_scenario_configs_derive_from_base() {
        let runner = ScenarioRunner::new(3, 4).with_iterations(5).with_palantiri(2);

        assert_eq!(runner.config_for(ScenarioId::SingleSeer).palantir_count, 1);
        assert_eq!(runner.config_for(ScenarioId::Saturation).palantir_count, 6);
        assert_eq!(runner.config_for(ScenarioId::Marathon).iterations, 50);
        assert_eq!(
            runner.config_for(ScenarioId::Cancellation).gazing_range_ms,
            CANCELLATION_GAZE_MS
        );
        assert_eq!(runner.config_for(ScenarioId::Completion), *runner.base_config());
    }
}
