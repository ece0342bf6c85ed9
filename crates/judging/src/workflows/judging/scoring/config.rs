use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::workflows::judging::domain::Stage;

/// Display scale and the stage blend used for the overall score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringConfig {
    /// Upper bound of the canonical display range; scores live in `0..=display_scale`.
    pub display_scale: f64,
    /// Relative weight of each frozen stage score in the overall score.
    pub stage_weights: BTreeMap<Stage, u32>,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            display_scale: 10.0,
            stage_weights: BTreeMap::from([
                (Stage::Triage, 0),
                (Stage::Preliminary, 10),
                (Stage::Detailed, 20),
                (Stage::Semifinals, 30),
                (Stage::Finals, 40),
            ]),
        }
    }
}
