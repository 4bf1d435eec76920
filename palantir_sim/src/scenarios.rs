//! Named simulation scenarios.

use serde::{Deserialize, Serialize};

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioId {
    /// Run the configured model to completion
    Completion,

    /// Every being contends for one palantir
    SingleSeer,

    /// Cancel mid-run while beings gaze and wait
    Cancellation,

    /// More palantiri than beings
    Saturation,

    /// Many short cycles
    Marathon,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::Completion,
            ScenarioId::SingleSeer,
            ScenarioId::Cancellation,
            ScenarioId::Saturation,
            ScenarioId::Marathon,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::Completion => "completion",
            ScenarioId::SingleSeer => "single_seer",
            ScenarioId::Cancellation => "cancellation",
            ScenarioId::Saturation => "saturation",
            ScenarioId::Marathon => "marathon",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::Completion => "Run to COMPLETED with every cycle accounted for",
            ScenarioId::SingleSeer => "One palantir: gazing must serialize",
            ScenarioId::Cancellation => "Cancel mid-run: all beings stop, nothing stays held",
            ScenarioId::Saturation => "Palantiri outnumber beings: no contention, no leaks",
            ScenarioId::Marathon => "Ten times the iterations with near-zero gaze",
        }
    }

    /// Returns true if the scenario is expected to end in CANCELLED.
    pub fn is_cancelling(&self) -> bool {
        matches!(self, ScenarioId::Cancellation)
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "completion" | "complete" => Ok(ScenarioId::Completion),
            "single_seer" | "singleseer" | "single" => Ok(ScenarioId::SingleSeer),
            "cancellation" | "cancel" => Ok(ScenarioId::Cancellation),
            "saturation" | "saturate" => Ok(ScenarioId::Saturation),
            "marathon" => Ok(ScenarioId::Marathon),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_parse_back() {
        for scenario in ScenarioId::all() {
            assert_eq!(scenario.name().parse::<ScenarioId>(), Ok(scenario));
        }
    }

    #[test]
    fn test_aliases_and_unknown() {
        assert_eq!("CANCEL".parse::<ScenarioId>(), Ok(ScenarioId::Cancellation));
        assert_eq!("single".parse::<ScenarioId>(), Ok(ScenarioId::SingleSeer));
        assert!("split_brain".parse::<ScenarioId>().is_err());
    }
}
