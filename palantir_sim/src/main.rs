//! Palantir Simulator CLI
//!
//! Run pool strategies through the simulation scenarios.

use clap::Parser;
use palantir_core::{PoolStrategy, SimulatorConfig};
use palantir_sim::scenarios::ScenarioId;
use palantir_sim::{load_config, ScenarioResult, ScenarioRunner, SimExport};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::level_filters::LevelFilter;
use tracing::{error, info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Palantir resource-pool simulator CLI
#[derive(Parser, Debug)]
#[command(name = "palantir-sim")]
#[command(about = "Run resource-pool concurrency scenarios", long_about = None)]
struct Args {
    /// Master seed for gaze durations (0 = random from time)
    #[arg(short, long, default_value = "42")]
    seed: u64,

    /// Number of beings
    #[arg(short, long)]
    beings: Option<usize>,

    /// Number of palantiri
    #[arg(short, long)]
    palantiri: Option<usize>,

    /// Gaze cycles per being
    #[arg(short, long)]
    iterations: Option<u32>,

    /// Pool strategy (semaphore_lock_map, spin_lock_map, blocking_queue, atomic_slots, all);
    /// defaults to the config file's strategy, or all without one
    #[arg(long)]
    strategy: Option<String>,

    /// Scenario to run (completion, single_seer, cancellation, saturation, marathon, all)
    #[arg(short = 'S', long, default_value = "all")]
    scenario: String,

    /// Shortest gaze in milliseconds
    #[arg(long)]
    gaze_min: Option<u64>,

    /// Longest gaze in milliseconds
    #[arg(long)]
    gaze_max: Option<u64>,

    /// Divides every gaze duration
    #[arg(long)]
    speed: Option<f64>,

    /// JSON file with a simulator configuration; flags override it
    #[arg(short, long)]
    config: Option<String>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// JSON output for CI parsing
    #[arg(long)]
    json: bool,

    /// Export the snapshot trace of a single run to a JSON file
    #[arg(long)]
    export: Option<String>,
}

impl Args {
    /// File configuration (or defaults) with flags applied on top.
    fn simulator_config(&self) -> Result<SimulatorConfig, String> {
        let mut config = match &self.config {
            Some(path) => load_config(path).map_err(|e| format!("{}: {}", path, e))?,
            None => SimulatorConfig {
                being_count: 5,
                palantir_count: 3,
                ..Default::default()
            },
        };

        if let Some(beings) = self.beings {
            config.being_count = beings;
        }
        if let Some(palantiri) = self.palantiri {
            config.palantir_count = palantiri;
        }
        if let Some(iterations) = self.iterations {
            config.iterations = iterations;
        }
        if let Some(min) = self.gaze_min {
            config.gazing_range_ms.0 = min;
        }
        if let Some(max) = self.gaze_max {
            config.gazing_range_ms.1 = max;
        }
        if let Some(speed) = self.speed {
            config.simulation_speed = speed;
        }

        config.validate().map_err(|e| e.to_string())?;
        Ok(config)
    }

    fn strategies(&self, config: &SimulatorConfig) -> Result<Vec<PoolStrategy>, String> {
        match self.strategy.as_deref() {
            None if self.config.is_some() => Ok(vec![config.pool_strategy]),
            None | Some("all") => Ok(PoolStrategy::all()),
            Some(name) => name.parse().map(|s| vec![s]).map_err(|e| format!("{}", e)),
        }
    }

    fn scenarios(&self) -> Result<Vec<ScenarioId>, String> {
        if self.scenario == "all" {
            Ok(ScenarioId::all())
        } else {
            self.scenario.parse().map(|s| vec![s])
        }
    }
}

fn init_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::default().add_directive(LevelFilter::from_level(level).into()));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }
}

fn fail(message: &str) -> ! {
    eprintln!("Error: {}", message);
    std::process::exit(1);
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(args.verbose);

    let config = args.simulator_config().unwrap_or_else(|e| fail(&e));
    let strategies = args.strategies(&config).unwrap_or_else(|e| fail(&e));
    let scenarios = args.scenarios().unwrap_or_else(|e| {
        eprintln!("Available scenarios: completion, single_seer, cancellation, saturation, marathon, all");
        fail(&e)
    });

    if !args.json {
        info!("Palantir Simulator v{}", env!("CARGO_PKG_VERSION"));
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
        info!(
            "{} beings, {} palantiri, {} iterations, gaze {:?} ms, speed {}",
            config.being_count,
            config.palantir_count,
            config.iterations,
            config.gazing_range_ms,
            config.simulation_speed
        );
    }

    // Determine base seed
    let seed = if args.seed == 0 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(1)
    } else {
        args.seed
    };

    if args.export.is_some() && strategies.len() * scenarios.len() > 1 {
        fail("--export only supports a single strategy and scenario, not 'all'");
    }

    let mut all_results: Vec<ScenarioResult> = Vec::new();
    for strategy in &strategies {
        let runner = ScenarioRunner::new(seed, config.being_count)
            .with_config(config.clone())
            .with_strategy(*strategy)
            .recording(args.export.is_some());

        for scenario in &scenarios {
            let result = runner.run(*scenario).await;

            if !args.json {
                if result.passed {
                    info!("✓ {} / {} (seed={}) PASSED", strategy, scenario, seed);
                } else {
                    error!(
                        "✗ {} / {} (seed={}) FAILED: {}",
                        strategy,
                        scenario,
                        seed,
                        result.failure_reason.as_deref().unwrap_or("unknown")
                    );
                }
            }
            all_results.push(result);
        }
    }

    if let (Some(path), Some(result)) = (&args.export, all_results.first()) {
        let export = SimExport::from_result(result);
        match export.write_to_file(path) {
            Ok(()) => info!("Exported {} snapshots to {}", export.snapshots.len(), path),
            Err(e) => error!("Failed to write export: {}", e),
        }
    }

    // Summary
    let total = all_results.len();
    let failed: Vec<&ScenarioResult> = all_results.iter().filter(|r| !r.passed).collect();

    if args.json {
        let summary = serde_json::json!({
            "seed": seed,
            "total": total,
            "passed": total - failed.len(),
            "failed": failed.len(),
            "results": all_results.iter().map(|r| {
                serde_json::json!({
                    "scenario": r.scenario.name(),
                    "strategy": r.config.pool_strategy.name(),
                    "passed": r.passed,
                    "final_state": r.final_state,
                    "elapsed_secs": r.elapsed_secs,
                    "metrics": r.metrics,
                    "failure_reason": r.failure_reason,
                })
            }).collect::<Vec<_>>(),
        });
        match serde_json::to_string_pretty(&summary) {
            Ok(json) => println!("{}", json),
            Err(e) => fail(&e.to_string()),
        }
    } else {
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
        if failed.is_empty() {
            info!("✅ All {} scenario runs passed!", total);
        } else {
            error!("❌ {}/{} scenario runs failed!", failed.len(), total);
            for result in &failed {
                error!(
                    "  - {} / {}: {}",
                    result.config.pool_strategy,
                    result.scenario.name(),
                    result.failure_reason.as_deref().unwrap_or("unknown")
                );
            }
        }
    }

    // Exit with proper code for CI
    if !failed.is_empty() {
        std::process::exit(1);
    }
}
