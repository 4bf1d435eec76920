//! Palantir Simulation Harness
//!
//! Runs the resource-pool simulator under named scenarios and checks every
//! delivered snapshot against the pool's safety invariants.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      ScenarioRunner                         │
//! │  ┌──────────────────────────────────────────────────────┐   │
//! │  │ SimContext (seeded ChaCha8 gaze durations)           │   │
//! │  └──────────────────────────────────────────────────────┘   │
//! │       │                                                     │
//! │  ┌────▼──────┐   snapshots   ┌───────────────────┐          │
//! │  │ Simulator │ ────────────► │ ValidationSession │          │
//! │  └───────────┘   (channel)   └─────────┬─────────┘          │
//! │                                        ▼                    │
//! │                             ScenarioResult / SimExport      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use palantir_sim::{ScenarioRunner, scenarios::ScenarioId};
//! use palantir_core::PoolStrategy;
//!
//! let runner = ScenarioRunner::new(42, 5)
//!     .with_strategy(PoolStrategy::SpinLockMap)
//!     .with_iterations(10);
//! let result = runner.run(ScenarioId::SingleSeer).await;
//! assert!(result.passed);
//! ```

mod context;
mod exporter;
mod runner;
pub mod scenarios;

pub use context::SimContext;
pub use exporter::{load_config, ExportError, SimExport};
pub use runner::{ScenarioMetrics, ScenarioResult, ScenarioRunner};
