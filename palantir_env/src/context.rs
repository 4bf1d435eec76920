//! Core environment context trait for the simulator.

use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;

/// The central interface for environment interaction.
///
/// Beings never touch the clock, the scheduler or an RNG directly; they go
/// through this trait so a harness can substitute seeded randomness.
///
/// # Implementations
///
/// - **Production**: `TokioContext` - wraps `tokio::time`, `tokio::spawn`, thread RNG
/// - **Harness**: `SimContext` (in `palantir_sim`) - seeded `ChaCha8Rng`
#[async_trait]
pub trait SimulationContext: Send + Sync + 'static {
    /// Returns the monotonic time since context creation.
    fn now(&self) -> Duration;

    /// Suspends the calling task for the given duration.
    ///
    /// Callers race this against a `CancelToken` when the sleep must be
    /// interruptible.
    async fn sleep(&self, duration: Duration);

    /// Spawns a task onto the runtime and returns its handle.
    ///
    /// The handle is what lets the simulator join every being before it
    /// declares a cancellation complete.
    fn spawn<F>(&self, name: &str, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static;

    /// Draws a gaze duration in milliseconds, uniformly from `[min, max]`.
    ///
    /// Implementations must tolerate `min == max`.
    fn gaze_millis(&self, min: u64, max: u64) -> u64;

    /// Returns the context's seed (for logging/debugging).
    ///
    /// In production, returns 0 (not seeded).
    fn seed(&self) -> u64;
}
