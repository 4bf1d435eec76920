//! JSON files: run traces out, simulator configurations in.

use crate::runner::ScenarioResult;
use palantir_core::{ModelSnapshot, PoolStrategy, SimulatorConfig, SimulatorState, Violation};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, Write};
use std::path::Path;
use thiserror::Error;

/// Errors reading or writing JSON files.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Complete trace of one scenario run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimExport {
    /// Scenario name
    pub scenario: String,

    /// Seed used
    pub seed: u64,

    pub strategy: PoolStrategy,

    pub config: SimulatorConfig,

    /// Duration in seconds
    pub duration_sec: f64,

    /// Every snapshot delivered during the run
    pub snapshots: Vec<ModelSnapshot>,

    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub violations: Vec<Violation>,

    /// Final results
    pub final_state: SimulatorState,
    pub passed: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl SimExport {
    /// Creates a new export container.
    pub fn new(scenario: &str, seed: u64, config: SimulatorConfig) -> Self {
        Self {
            scenario: scenario.to_string(),
            seed,
            strategy: config.pool_strategy,
            config,
            duration_sec: 0.0,
            snapshots: Vec::new(),
            violations: Vec::new(),
            final_state: SimulatorState::Undefined,
            passed: false,
            failure_reason: None,
        }
    }

    /// Builds an export from a finished run.
    pub fn from_result(result: &ScenarioResult) -> Self {
        let mut export = Self::new(result.scenario.name(), result.seed, result.config.clone());
        for snapshot in &result.snapshots {
            export.add_snapshot(snapshot.clone());
        }
        export.duration_sec = result.elapsed_secs;
        export.finalize(
            result.final_state,
            result.passed,
            result.failure_reason.clone(),
            result
                .report
                .as_ref()
                .map(|report| report.violations.clone())
                .unwrap_or_default(),
        );
        export
    }

    /// Adds a snapshot.
    pub fn add_snapshot(&mut self, snapshot: ModelSnapshot) {
        self.duration_sec = snapshot.elapsed.as_secs_f64();
        self.snapshots.push(snapshot);
    }

    /// Finalizes the export.
    pub fn finalize(
        &mut self,
        final_state: SimulatorState,
        passed: bool,
        failure_reason: Option<String>,
        violations: Vec<Violation>,
    ) {
        self.final_state = final_state;
        self.passed = passed;
        self.failure_reason = failure_reason;
        self.violations = violations;
    }

    /// Writes to a JSON file.
    pub fn write_to_file(&self, path: impl AsRef<Path>) -> Result<(), ExportError> {
        let json = serde_json::to_string_pretty(self)?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }

    /// Reads a previously written export.
    pub fn read_from_file(path: impl AsRef<Path>) -> Result<Self, ExportError> {
        let file = File::open(path)?;
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }
}

/// Loads a `SimulatorConfig` from a JSON file. Missing fields keep their
/// defaults.
pub fn load_config(path: impl AsRef<Path>) -> Result<SimulatorConfig, ExportError> {
    let file = File::open(path)?;
    Ok(serde_json::from_reader(BufReader::new(file))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::ScenarioRunner;
    use crate::scenarios::ScenarioId;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_export_written_and_read_back() {
        let result = ScenarioRunner::new(11, 3)
            .with_palantiri(2)
            .with_iterations(2)
            .with_gazing_range(0, 2)
            .recording(true)
            .run(ScenarioId::Completion)
            .await;
        assert!(result.passed);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace.json");
        let export = SimExport::from_result(&result);
        export.write_to_file(&path).unwrap();

        let loaded = SimExport::read_from_file(&path).unwrap();
        assert_eq!(loaded.scenario, "completion");
        assert_eq!(loaded.seed, 11);
        assert_eq!(loaded.final_state, SimulatorState::Completed);
        assert_eq!(loaded.snapshots.len(), result.snapshots.len());
        assert!(loaded.violations.is_empty());
        assert_eq!(
            loaded.snapshots.last().map(|s| s.total_completed()),
            Some(6)
        );
    }

    #[test]
    fn test_load_config_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{ "pool_strategy": "blocking_queue", "being_count": 9, "gazing_range_ms": [5, 10] }"#,
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.pool_strategy, PoolStrategy::BlockingQueue);
        assert_eq!(config.being_count, 9);
        assert_eq!(config.gazing_range_ms, (5, 10));
        assert_eq!(config.palantir_count, SimulatorConfig::default().palantir_count);
    }

    #[test]
    fn test_load_config_reports_missing_file_and_bad_json() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            load_config(dir.path().join("absent.json")),
            Err(ExportError::Io(_))
        ));

        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(load_config(&path), Err(ExportError::Json(_))));
    }
}
