//! Seeded simulation context implementing SimulationContext.

use async_trait::async_trait;
use palantir_env::SimulationContext;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Uniform};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::trace;

/// Simulation context backed by a seeded RNG.
///
/// This implements `SimulationContext` using:
/// - A seeded ChaCha8 RNG, so one seed always yields the same sequence of
///   gaze durations
/// - The Tokio timer for sleeps and the Tokio scheduler for tasks
///
/// Which being draws which duration still depends on scheduling.
pub struct SimContext {
    /// Master seed for this simulation
    seed: u64,

    /// Start of the context's clock
    start: Instant,

    /// Deterministic RNG for gaze durations
    rng: Arc<Mutex<ChaCha8Rng>>,
}

impl SimContext {
    /// Creates a new SimContext with the given seed.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            start: Instant::now(),
            rng: Arc::new(Mutex::new(ChaCha8Rng::seed_from_u64(seed))),
        }
    }

    /// Creates an Arc-wrapped context for sharing.
    pub fn shared(seed: u64) -> Arc<Self> {
        Arc::new(Self::new(seed))
    }
}

impl Clone for SimContext {
    fn clone(&self) -> Self {
        Self {
            seed: self.seed,
            start: self.start,
            rng: Arc::clone(&self.rng),
        }
    }
}

#[async_trait]
impl SimulationContext for SimContext {
    fn now(&self) -> Duration {
        self.start.elapsed()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    fn spawn<F>(&self, name: &str, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        trace!(task = name, seed = self.seed, "spawning task");
        tokio::spawn(future)
    }

    fn gaze_millis(&self, min: u64, max: u64) -> u64 {
        if min >= max {
            return min;
        }
        let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        Uniform::new_inclusive(min, max).sample(&mut *rng)
    }

    fn seed(&self) -> u64 {
        self.seed
    }
}
