//! The pooled resource.

use palantir_env::{BeingId, PalantirId};
use serde::{Deserialize, Serialize};

/// One palantir as seen from outside the pool.
///
/// `owner` is written only by the `PoolManager`, under whatever
/// synchronization its strategy uses. It is set exactly when one being holds
/// the palantir.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Palantir {
    /// Stable identity
    pub id: PalantirId,

    /// Being currently gazing into it, if any
    pub owner: Option<BeingId>,
}

impl Palantir {
    /// Creates an unowned palantir.
    pub fn new(id: PalantirId) -> Self {
        Self { id, owner: None }
    }

    /// Returns true if nobody holds this palantir.
    pub fn is_available(&self) -> bool {
        self.owner.is_none()
    }
}
