//! Simulator - owns the model, runs the beings, publishes snapshots.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         Simulator                            │
//! │  ┌────────────────────────────────────────────────────────┐  │
//! │  │ Model: config + PoolManager + BeingCells + gate        │  │
//! │  └────────────────────────────────────────────────────────┘  │
//! │       │ spawn                │ spawn                         │
//! │  ┌────▼────┐            ┌────▼────┐                          │
//! │  │ Being 0 │   ...      │ Being N │ ── acquire/release ──►   │
//! │  └────┬────┘            └────┬────┘        PoolManager       │
//! │       │ publish              │ publish                       │
//! │  ┌────▼──────────────────────▼────┐                          │
//! │  │ Hub: state watch + observers   │ ──► Arc<ModelSnapshot>   │
//! │  └────────────────────────────────┘                          │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Consistency
//!
//! Beings write their own state (and, when releasing, the pool) while holding
//! the model gate for reading. Snapshot capture holds it for writing, so a
//! snapshot never sees half of a being's step. Captures are numbered and
//! delivered under one publication lock, so observers receive snapshots in
//! capture order.
//!
//! # Usage
//!
//! ```ignore
//! use palantir_core::{Simulator, SimulatorConfig};
//! use palantir_env::TokioContext;
//!
//! let mut simulator = Simulator::new(TokioContext::shared());
//! simulator.build_model(SimulatorConfig::default())?;
//! let (_, mut snapshots) = simulator.subscribe_channel();
//! simulator.start()?;
//! let final_state = simulator.wait_for_completion().await?;
//! ```

use crate::being::{Assignment, BeingCell, BeingState, BeingTask};
use crate::config::SimulatorConfig;
use crate::error::SimulatorError;
use crate::observer::{ChannelObserver, ObserverId, Observers, SnapshotObserver};
use crate::pool::{PoolManager, PoolStats};
use crate::snapshot::{ModelSnapshot, SimulatorState};
use palantir_env::{BeingId, CancelToken, EnvError, SimulationContext};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Everything one simulation run shares between its tasks.
pub(crate) struct Model {
    pub(crate) run_id: Uuid,
    pub(crate) config: SimulatorConfig,
    pub(crate) pool: PoolManager,
    pub(crate) beings: Vec<BeingCell>,
    gate: RwLock<()>,
}

impl Model {
    pub(crate) fn build(config: SimulatorConfig) -> Result<Self, SimulatorError> {
        config.validate()?;
        let pool = PoolManager::build(
            config.pool_strategy,
            config.palantir_count,
            config.spin_poll_interval(),
        )?;
        let beings = (0..config.being_count as u32)
            .map(|i| BeingCell::new(BeingId(i)))
            .collect();

        Ok(Self {
            run_id: Uuid::new_v4(),
            config,
            pool,
            beings,
            gate: RwLock::new(()),
        })
    }

    /// Shared side of the gate, held by beings around each step.
    pub(crate) fn read_gate(&self) -> RwLockReadGuard<'_, ()> {
        self.gate.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn capture(&self, sequence: u64, elapsed: Duration, simulator_state: SimulatorState) -> ModelSnapshot {
        let _gate = self.gate.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        let beings = self
            .beings
            .iter()
            .map(|cell| {
                let being = cell.read();
                (being.id, being)
            })
            .collect();
        let palantiri = self
            .pool
            .palantiri()
            .into_iter()
            .map(|palantir| (palantir.id, palantir))
            .collect();

        ModelSnapshot {
            run_id: self.run_id,
            sequence,
            elapsed,
            simulator_state,
            beings,
            palantiri,
        }
    }
}

/// Simulator state plus the publication machinery.
pub(crate) struct Hub {
    state: watch::Sender<SimulatorState>,
    observers: Observers,
    /// Last published sequence number; its mutex is the publication lock.
    sequence: Mutex<u64>,
}

impl Hub {
    pub(crate) fn new() -> Self {
        let (state, _) = watch::channel(SimulatorState::Idle);
        Self {
            state,
            observers: Observers::default(),
            sequence: Mutex::new(0),
        }
    }

    fn state(&self) -> SimulatorState {
        *self.state.borrow()
    }

    fn set_state(&self, next: SimulatorState) {
        self.state.send_replace(next);
    }

    /// Moves `expected -> next` atomically; false if the state was different.
    fn compare_and_set(&self, expected: SimulatorState, next: SimulatorState) -> bool {
        self.state.send_if_modified(|state| {
            if *state == expected {
                *state = next;
                true
            } else {
                false
            }
        })
    }

    /// Settles a finished run: `ERROR` on any failure, `CANCELLED` after a
    /// cancel, `COMPLETED` otherwise.
    fn finish(&self, failed: bool) -> SimulatorState {
        let mut settled = SimulatorState::Undefined;
        self.state.send_modify(|state| {
            *state = match *state {
                _ if failed => SimulatorState::Error,
                SimulatorState::Cancelling => SimulatorState::Cancelled,
                _ => SimulatorState::Completed,
            };
            settled = *state;
        });
        settled
    }

    fn sequence(&self) -> u64 {
        *self.sequence.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Captures the model and hands the snapshot to every observer.
    pub(crate) fn publish(&self, model: &Model, elapsed: Duration) {
        let mut sequence = self.sequence.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *sequence += 1;
        let snapshot = Arc::new(model.capture(*sequence, elapsed, self.state()));
        self.observers.deliver(snapshot);
    }
}

/// Waits for every being, then settles the simulator state.
async fn supervise<Ctx: SimulationContext>(
    beings: Vec<JoinHandle<Result<u32, SimulatorError>>>,
    model: Arc<Model>,
    hub: Arc<Hub>,
    context: Arc<Ctx>,
) -> SimulatorState {
    let mut failed = 0usize;
    let mut completed_cycles = 0u64;

    for (index, handle) in beings.into_iter().enumerate() {
        match handle.await {
            Ok(Ok(cycles)) => completed_cycles += u64::from(cycles),
            Ok(Err(err)) => {
                failed += 1;
                error!(being = index, error = %err, "being ended in error");
            }
            Err(err) => {
                failed += 1;
                error!(being = index, error = %err, "being task did not finish");
            }
        }
    }

    let settled = hub.finish(failed > 0);
    info!(
        run_id = %model.run_id,
        state = %settled,
        completed_cycles,
        failed,
        "simulation finished"
    );
    hub.publish(&model, context.now());
    settled
}

/// The simulation host.
///
/// Generic over the context so the same simulator runs with production
/// randomness or with a seeded harness context.
pub struct Simulator<Ctx: SimulationContext> {
    context: Arc<Ctx>,
    hub: Arc<Hub>,
    model: Option<Arc<Model>>,
    cancel: CancelToken,
    host: Option<JoinHandle<SimulatorState>>,
}

impl<Ctx: SimulationContext> Simulator<Ctx> {
    /// Creates an `IDLE` simulator with no model.
    pub fn new(context: Arc<Ctx>) -> Self {
        Self {
            context,
            hub: Arc::new(Hub::new()),
            model: None,
            cancel: CancelToken::new(),
            host: None,
        }
    }

    pub fn state(&self) -> SimulatorState {
        self.hub.state()
    }

    /// Returns a receiver that observes every simulator state change.
    pub fn state_watch(&self) -> watch::Receiver<SimulatorState> {
        self.hub.state.subscribe()
    }

    /// Configuration of the current model, if one is built.
    pub fn config(&self) -> Option<&SimulatorConfig> {
        self.model.as_ref().map(|model| &model.config)
    }

    pub fn run_id(&self) -> Option<Uuid> {
        self.model.as_ref().map(|model| model.run_id)
    }

    /// Builds a fresh pool and being set. Only allowed while `IDLE`; an
    /// existing model is replaced.
    ///
    /// # Errors
    /// - `SimulatorError::Config` for an invalid configuration
    /// - `SimulatorError::InvalidState` if the simulator is not `IDLE`
    pub fn build_model(&mut self, config: SimulatorConfig) -> Result<SimulatorState, SimulatorError> {
        let state = self.state();
        if state != SimulatorState::Idle {
            return Err(SimulatorError::invalid_state("build a model", state));
        }

        let model = Arc::new(Model::build(config)?);
        info!(
            run_id = %model.run_id,
            strategy = %model.config.pool_strategy,
            beings = model.config.being_count,
            palantiri = model.config.palantir_count,
            iterations = model.config.iterations,
            "model built"
        );
        self.hub.publish(&model, self.context.now());
        self.model = Some(model);
        self.cancel = CancelToken::new();
        Ok(self.state())
    }

    /// Registers an observer for every subsequent snapshot.
    pub fn subscribe<O: SnapshotObserver + 'static>(&self, observer: O) -> ObserverId {
        self.hub.observers.add(Arc::new(observer))
    }

    /// Registers a channel observer and returns its receiving end.
    pub fn subscribe_channel(&self) -> (ObserverId, mpsc::UnboundedReceiver<Arc<ModelSnapshot>>) {
        let (observer, rx) = ChannelObserver::new();
        (self.subscribe(observer), rx)
    }

    /// Removes an observer; false if it was not registered.
    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        self.hub.observers.remove(id)
    }

    /// Launches every being and returns immediately with `RUNNING`.
    ///
    /// Completion is signalled through `state_watch` and
    /// `wait_for_completion`.
    ///
    /// # Errors
    /// - `SimulatorError::NoModel` if `build_model` was not called
    /// - `SimulatorError::InvalidState` if not `IDLE` (no double start)
    pub fn start(&mut self) -> Result<SimulatorState, SimulatorError> {
        let model = self.model.clone().ok_or(SimulatorError::NoModel)?;
        if !self.hub.compare_and_set(SimulatorState::Idle, SimulatorState::Running) {
            return Err(SimulatorError::invalid_state("start", self.state()));
        }
        info!(run_id = %model.run_id, "simulation started");
        self.hub.publish(&model, self.context.now());

        let beings = (0..model.beings.len() as u32)
            .map(|i| {
                let task = BeingTask {
                    id: BeingId(i),
                    model: Arc::clone(&model),
                    hub: Arc::clone(&self.hub),
                    context: Arc::clone(&self.context),
                    cancel: self.cancel.clone(),
                };
                self.context.spawn(&format!("being-{i}"), task.run())
            })
            .collect();

        let host = supervise(
            beings,
            model,
            Arc::clone(&self.hub),
            Arc::clone(&self.context),
        );
        self.host = Some(self.context.spawn("simulator-host", host));
        Ok(SimulatorState::Running)
    }

    /// Waits until the run has settled and returns the terminal state.
    pub async fn wait_for_completion(&mut self) -> Result<SimulatorState, SimulatorError> {
        let state = self.state();
        if !state.is_active() && !state.is_terminal() {
            return Err(SimulatorError::invalid_state("wait for completion", state));
        }
        self.join_host().await
    }

    /// Signals every being to stop, then waits for all of them.
    ///
    /// The simulator is `CANCELLING` until the last being task has returned
    /// and only then becomes `CANCELLED`. Cancelling a run that already
    /// finished returns its terminal state.
    pub async fn cancel(&mut self) -> Result<SimulatorState, SimulatorError> {
        let model = self.model.clone().ok_or(SimulatorError::NoModel)?;
        if self.hub.compare_and_set(SimulatorState::Running, SimulatorState::Cancelling) {
            info!(run_id = %model.run_id, "cancelling simulation");
            self.hub.publish(&model, self.context.now());
            self.cancel.cancel();
        } else {
            let state = self.state();
            if !state.is_active() && !state.is_terminal() {
                return Err(SimulatorError::invalid_state("cancel", state));
            }
        }
        self.join_host().await
    }

    /// Stops any run, reaps the host task and drops every observer.
    /// Idempotent.
    pub async fn shutdown(&mut self) -> SimulatorState {
        if self.state().is_active() {
            if let Err(err) = self.cancel().await {
                warn!(error = %err, "cancel during shutdown failed");
            }
        }
        if let Err(err) = self.join_host().await {
            warn!(error = %err, "host task failed during shutdown");
        }
        self.hub.observers.clear();
        debug!("simulator shut down");
        self.state()
    }

    /// Returns a finished simulator to `IDLE`, parking `DONE` beings in
    /// `HOLDING` and dropping the model.
    pub async fn reset(&mut self) -> Result<SimulatorState, SimulatorError> {
        let state = self.state();
        if !state.is_terminal() {
            return Err(SimulatorError::invalid_state("reset", state));
        }
        self.join_host().await?;

        self.hub.set_state(SimulatorState::Idle);
        if let Some(model) = self.model.take() {
            for cell in &model.beings {
                if cell.read().state != BeingState::Done {
                    continue;
                }
                {
                    let _gate = model.read_gate();
                    cell.apply(BeingState::Holding, Assignment::Keep, false)?;
                }
                self.hub.publish(&model, self.context.now());
            }
        }
        self.cancel = CancelToken::new();
        Ok(self.state())
    }

    /// Captures the current model without publishing it.
    pub fn snapshot(&self) -> Option<ModelSnapshot> {
        self.model
            .as_ref()
            .map(|model| model.capture(self.hub.sequence(), self.context.now(), self.state()))
    }

    pub fn pool_stats(&self) -> Option<PoolStats> {
        self.model.as_ref().map(|model| model.pool.stats())
    }

    pub fn observer_count(&self) -> usize {
        self.hub.observers.len()
    }

    async fn join_host(&mut self) -> Result<SimulatorState, SimulatorError> {
        // Polled in place so a dropped wait leaves the handle for the next one.
        if let Some(host) = self.host.as_mut() {
            let joined = host.await;
            self.host = None;
            if let Err(err) = joined {
                self.hub.set_state(SimulatorState::Error);
                return Err(EnvError::task_failed(err).into());
            }
        }
        Ok(self.state())
    }
}

impl<Ctx: SimulationContext> Drop for Simulator<Ctx> {
    fn drop(&mut self) {
        // Beings must not outlive their simulator.
        if self.state().is_active() {
            self.cancel.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolStrategy;
    use crate::validation::ValidationSession;
    use palantir_env::TokioContext;

    fn config(strategy: PoolStrategy, beings: usize, palantiri: usize) -> SimulatorConfig {
        SimulatorConfig {
            pool_strategy: strategy,
            being_count: beings,
            palantir_count: palantiri,
            iterations: 10,
            gazing_range_ms: (0, 5),
            ..Default::default()
        }
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<Arc<ModelSnapshot>>) -> Vec<Arc<ModelSnapshot>> {
        let mut snapshots = Vec::new();
        while let Ok(snapshot) = rx.try_recv() {
            snapshots.push(snapshot);
        }
        snapshots
    }

    #[test]
    fn test_build_model_rejects_invalid_config() {
        let mut simulator = Simulator::new(TokioContext::shared());
        let err = simulator
            .build_model(SimulatorConfig { being_count: 0, ..Default::default() })
            .unwrap_err();

        assert!(matches!(err, SimulatorError::Config(_)));
        assert_eq!(simulator.state(), SimulatorState::Idle);
        assert!(simulator.config().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_start_requires_model_and_rejects_double_start() {
        let mut simulator = Simulator::new(TokioContext::shared());
        assert!(matches!(simulator.start(), Err(SimulatorError::NoModel)));

        simulator.build_model(config(PoolStrategy::SemaphoreLockMap, 3, 2)).unwrap();
        assert_eq!(simulator.start().unwrap(), SimulatorState::Running);
        assert!(matches!(
            simulator.start(),
            Err(SimulatorError::InvalidState { .. })
        ));
        assert!(matches!(
            simulator.build_model(SimulatorConfig::default()),
            Err(SimulatorError::InvalidState { .. })
        ));

        simulator.wait_for_completion().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_run_completes_for_every_strategy() {
        for strategy in PoolStrategy::all() {
            let mut simulator = Simulator::new(TokioContext::shared());
            simulator.build_model(config(strategy, 5, 3)).unwrap();
            let (_, mut rx) = simulator.subscribe_channel();

            simulator.start().unwrap();
            let settled = simulator.wait_for_completion().await.unwrap();
            assert_eq!(settled, SimulatorState::Completed, "{strategy}");

            let snapshots = drain(&mut rx);
            let mut session = ValidationSession::new(5, 3);
            for snapshot in &snapshots {
                session.observe(snapshot);
            }
            let report = session.report();
            assert!(report.is_clean(), "{strategy}: {:?}", report.violations);

            let last = snapshots.last().unwrap();
            assert_eq!(last.simulator_state, SimulatorState::Completed);
            assert_eq!(last.total_completed(), 50);
            assert_eq!(last.count_in(BeingState::Done), 5);
            assert_eq!(last.held_palantiri(), 0);

            let stats = simulator.pool_stats().unwrap();
            assert_eq!(stats.available_permits, 3);
            assert_eq!(stats.acquisitions, 50);
            assert_eq!(stats.redundant_releases, 0);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_cancel_stops_gazing_and_waiting_beings() {
        for strategy in PoolStrategy::all() {
            let mut simulator = Simulator::new(TokioContext::shared());
            simulator
                .build_model(SimulatorConfig {
                    gazing_range_ms: (5_000, 10_000),
                    ..config(strategy, 4, 1)
                })
                .unwrap();
            let (_, mut rx) = simulator.subscribe_channel();

            simulator.start().unwrap();
            tokio::time::sleep(Duration::from_millis(50)).await;

            let settled = tokio::time::timeout(Duration::from_secs(2), simulator.cancel())
                .await
                .expect("cancel must not wait out the gaze")
                .unwrap();
            assert_eq!(settled, SimulatorState::Cancelled, "{strategy}");

            let snapshot = simulator.snapshot().unwrap();
            assert!(snapshot.all_beings_terminal());
            assert_eq!(snapshot.count_in(BeingState::Cancelled), 4);
            assert_eq!(snapshot.held_palantiri(), 0, "{strategy} leaked a palantir");
            assert_eq!(simulator.pool_stats().unwrap().available_permits, 1);

            let snapshots = drain(&mut rx);
            assert!(snapshots
                .iter()
                .any(|s| s.simulator_state == SimulatorState::Cancelling));
            let mut session = ValidationSession::new(4, 1);
            for snapshot in &snapshots {
                session.observe(snapshot);
            }
            assert!(session.report().is_clean());
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_cancel_after_completion_returns_terminal_state() {
        let mut simulator = Simulator::new(TokioContext::shared());
        simulator.build_model(config(PoolStrategy::AtomicSlots, 2, 2)).unwrap();
        simulator.start().unwrap();
        simulator.wait_for_completion().await.unwrap();

        assert_eq!(simulator.cancel().await.unwrap(), SimulatorState::Completed);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_snapshots_arrive_in_sequence_order() {
        let mut simulator = Simulator::new(TokioContext::shared());
        simulator.build_model(config(PoolStrategy::SpinLockMap, 4, 2)).unwrap();
        let (_, mut rx) = simulator.subscribe_channel();
        simulator.start().unwrap();
        simulator.wait_for_completion().await.unwrap();

        let snapshots = drain(&mut rx);
        assert!(snapshots.windows(2).all(|w| w[0].sequence < w[1].sequence));
        assert_eq!(snapshots[0].simulator_state, SimulatorState::Running);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_single_palantir_serializes_gazing() {
        let mut simulator = Simulator::new(TokioContext::shared());
        simulator.build_model(config(PoolStrategy::BlockingQueue, 5, 1)).unwrap();
        let (_, mut rx) = simulator.subscribe_channel();
        simulator.start().unwrap();
        simulator.wait_for_completion().await.unwrap();

        for snapshot in drain(&mut rx) {
            assert!(snapshot.count_in(BeingState::Gazing) <= 1);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_reset_parks_done_beings_and_allows_rebuild() {
        let mut simulator = Simulator::new(TokioContext::shared());
        simulator.build_model(config(PoolStrategy::SemaphoreLockMap, 3, 2)).unwrap();
        simulator.start().unwrap();
        simulator.wait_for_completion().await.unwrap();

        let (_, mut rx) = simulator.subscribe_channel();
        assert_eq!(simulator.reset().await.unwrap(), SimulatorState::Idle);

        let parked = drain(&mut rx);
        let last = parked.last().unwrap();
        assert_eq!(last.count_in(BeingState::Holding), 3);
        assert!(last
            .beings
            .values()
            .all(|b| b.prev_state == Some(BeingState::Done)));

        assert!(simulator.build_model(config(PoolStrategy::SpinLockMap, 2, 1)).is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_shutdown_is_idempotent_and_clears_observers() {
        let mut simulator = Simulator::new(TokioContext::shared());
        simulator.build_model(config(PoolStrategy::SemaphoreLockMap, 3, 1)).unwrap();
        let (id, _rx) = simulator.subscribe_channel();
        simulator.start().unwrap();

        let first = simulator.shutdown().await;
        assert!(first.is_terminal());
        assert_eq!(simulator.observer_count(), 0);
        assert!(!simulator.unsubscribe(id));

        assert_eq!(simulator.shutdown().await, first);
    }
}
