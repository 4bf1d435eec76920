//! Palantir Environment Abstraction Layer
//!
//! This crate isolates everything the simulator core needs from "the world"
//! so the same beings and pool strategies run against a production Tokio
//! context or a seeded harness context:
//! - Time (`now()`, `sleep()`)
//! - Tasks (`spawn()`)
//! - Randomness (`gaze_millis()`)
//! - Cancellation (`CancelToken`)
//!
//! # Example
//!
//! ```ignore
//! use palantir_env::{CancelToken, SimulationContext};
//!
//! async fn gaze<Ctx: SimulationContext>(ctx: &Ctx, cancel: &CancelToken) -> bool {
//!     let millis = ctx.gaze_millis(0, 50);
//!     tokio::select! {
//!         _ = ctx.sleep(Duration::from_millis(millis)) => true,
//!         _ = cancel.cancelled() => false,
//!     }
//! }
//! ```

mod cancel;
mod context;
mod error;
mod tokio_impl;
mod types;

pub use cancel::CancelToken;
pub use context::SimulationContext;
pub use error::EnvError;
pub use tokio_impl::TokioContext;
pub use types::{BeingId, PalantirId};
