//! Identifier types shared by every layer of the simulator.

use serde::{Deserialize, Serialize};

/// Identity of a simulated being (worker task).
///
/// Stable for the lifetime of a model; assigned densely from zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BeingId(pub u32);

/// Identity of one palantir (pooled resource).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PalantirId(pub u32);

impl BeingId {
    /// Returns the id as a dense index.
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl PalantirId {
    /// Returns the id as a dense index.
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for BeingId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "being-{}", self.0)
    }
}

impl std::fmt::Display for PalantirId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "palantir-{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_display() {
        assert_eq!(BeingId(3).to_string(), "being-3");
        assert_eq!(PalantirId(0).to_string(), "palantir-0");
    }

    #[test]
    fn test_id_ordering_follows_index() {
        assert!(BeingId(1) < BeingId(2));
        assert_eq!(PalantirId(7).index(), 7);
    }
}
