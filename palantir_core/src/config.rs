//! Simulator configuration and pool strategy selection.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// The closed set of pool synchronization strategies.
///
/// Selection happens once, at model construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolStrategy {
    /// Counting semaphore admission + mutex-guarded availability map
    SemaphoreLockMap,

    /// Counting semaphore admission + spin-lock-guarded availability map
    SpinLockMap,

    /// Blocking queue holding the available palantiri directly
    BlockingQueue,

    /// Counting semaphore admission + lock-free CAS over ownership slots
    AtomicSlots,
}

impl PoolStrategy {
    /// Returns every strategy.
    pub fn all() -> Vec<PoolStrategy> {
        vec![
            PoolStrategy::SemaphoreLockMap,
            PoolStrategy::SpinLockMap,
            PoolStrategy::BlockingQueue,
            PoolStrategy::AtomicSlots,
        ]
    }

    /// Returns the strategy name.
    pub fn name(&self) -> &'static str {
        match self {
            PoolStrategy::SemaphoreLockMap => "semaphore_lock_map",
            PoolStrategy::SpinLockMap => "spin_lock_map",
            PoolStrategy::BlockingQueue => "blocking_queue",
            PoolStrategy::AtomicSlots => "atomic_slots",
        }
    }

    /// Returns a description of the strategy.
    pub fn description(&self) -> &'static str {
        match self {
            PoolStrategy::SemaphoreLockMap => "Semaphore gate, mutex-guarded linear scan of the availability map",
            PoolStrategy::SpinLockMap => "Semaphore gate, busy-waiting spin lock around the availability map",
            PoolStrategy::BlockingQueue => "Blocking dequeue from a queue of available palantiri",
            PoolStrategy::AtomicSlots => "Semaphore gate, compare-and-swap claim of an ownership slot",
        }
    }
}

impl Default for PoolStrategy {
    fn default() -> Self {
        PoolStrategy::SemaphoreLockMap
    }
}

impl std::fmt::Display for PoolStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for PoolStrategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "semaphore_lock_map" | "semaphore" | "mutex" => Ok(PoolStrategy::SemaphoreLockMap),
            "spin_lock_map" | "spin_lock" | "spin" => Ok(PoolStrategy::SpinLockMap),
            "blocking_queue" | "queue" => Ok(PoolStrategy::BlockingQueue),
            "atomic_slots" | "atomic" | "cas" => Ok(PoolStrategy::AtomicSlots),
            _ => Err(ConfigError::UnknownStrategy(s.to_string())),
        }
    }
}

/// Configuration for one simulation model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    /// Synchronization strategy guarding the pool
    pub pool_strategy: PoolStrategy,

    /// Number of beings (worker tasks)
    pub being_count: usize,

    /// Number of palantiri in the pool
    pub palantir_count: usize,

    /// Gaze cycles each being performs before it is done
    pub iterations: u32,

    /// Inclusive `[min, max]` gaze duration in milliseconds
    pub gazing_range_ms: (u64, u64),

    /// Speed multiplier; the drawn gaze duration is divided by this
    pub simulation_speed: f64,

    /// How long the spin-lock strategy spins before re-checking cancellation
    pub spin_poll_interval_us: u64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            pool_strategy: PoolStrategy::default(),
            being_count: 6,
            palantir_count: 4,
            iterations: 10,
            gazing_range_ms: (0, 50),
            simulation_speed: 1.0,
            spin_poll_interval_us: 50,
        }
    }
}

impl SimulatorConfig {
    /// Checks every field, returning the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.being_count == 0 {
            return Err(ConfigError::NoBeings);
        }
        if self.palantir_count == 0 {
            return Err(ConfigError::NoPalantiri);
        }
        if self.iterations == 0 {
            return Err(ConfigError::NoIterations);
        }
        let (min, max) = self.gazing_range_ms;
        if min > max {
            return Err(ConfigError::InvertedGazingRange { min, max });
        }
        if !self.simulation_speed.is_finite() || self.simulation_speed <= 0.0 {
            return Err(ConfigError::InvalidSpeed(self.simulation_speed));
        }
        Ok(())
    }

    /// Scales a drawn gaze duration by the simulation speed.
    pub fn effective_gaze(&self, drawn_millis: u64) -> Duration {
        Duration::from_secs_f64(drawn_millis as f64 / 1000.0 / self.simulation_speed)
    }

    /// Returns the spin-lock cancellation polling interval.
    pub fn spin_poll_interval(&self) -> Duration {
        Duration::from_micros(self.spin_poll_interval_us.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = SimulatorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.gazing_range_ms, (0, 50));
    }

    #[test]
    fn test_validate_rejects_bad_fields() {
        let config = SimulatorConfig { being_count: 0, ..Default::default() };
        assert_eq!(config.validate(), Err(ConfigError::NoBeings));

        let config = SimulatorConfig { palantir_count: 0, ..Default::default() };
        assert_eq!(config.validate(), Err(ConfigError::NoPalantiri));

        let config = SimulatorConfig { iterations: 0, ..Default::default() };
        assert_eq!(config.validate(), Err(ConfigError::NoIterations));

        let config = SimulatorConfig { gazing_range_ms: (10, 5), ..Default::default() };
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvertedGazingRange { min: 10, max: 5 })
        );

        let config = SimulatorConfig { simulation_speed: 0.0, ..Default::default() };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidSpeed(_))));

        let config = SimulatorConfig { simulation_speed: f64::NAN, ..Default::default() };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidSpeed(_))));
    }

    #[test]
    fn test_effective_gaze_scales_with_speed() {
        let config = SimulatorConfig { simulation_speed: 2.0, ..Default::default() };
        assert_eq!(config.effective_gaze(100), Duration::from_millis(50));
    }

    #[test]
    fn test_strategy_parse_roundtrip_and_aliases() {
        for strategy in PoolStrategy::all() {
            assert_eq!(strategy.name().parse::<PoolStrategy>().unwrap(), strategy);
        }
        assert_eq!("spin".parse::<PoolStrategy>().unwrap(), PoolStrategy::SpinLockMap);
        assert_eq!("QUEUE".parse::<PoolStrategy>().unwrap(), PoolStrategy::BlockingQueue);
        assert!("stamped".parse::<PoolStrategy>().is_err());
    }
}
