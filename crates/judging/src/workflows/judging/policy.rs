use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::calibration::CalibrationPolicy;
use super::domain::Stage;
use super::ranking::RankingConfig;
use super::scoring::ScoringConfig;

pub const DEFAULT_QUORUM: usize = 2;
pub const DEFAULT_FINALS_QUORUM: usize = 3;
pub const DEFAULT_CONFLICT_THRESHOLD: f64 = 0.15;

/// Pipeline-wide policy parameters handed to the service at construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelinePolicy {
    /// Minimum active evaluations before a stage may advance.
    pub quorum: BTreeMap<Stage, usize>,
    /// Optional minimum frozen score per stage; below it the submission is disqualified.
    #[serde(default)]
    pub stage_gates: BTreeMap<Stage, f64>,
    /// Fraction of the display scale two evaluations may differ by without a conflict.
    pub conflict_threshold: f64,
    pub calibration: CalibrationPolicy,
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub ranking: RankingConfig,
}

impl PipelinePolicy {
    /// Same quorum on every stage except Finals.
    pub fn with_quorum(default_quorum: usize, finals_quorum: usize) -> Self {
        Self {
            quorum: quorum_table(default_quorum, finals_quorum),
            ..Self::default()
        }
    }

    pub fn quorum_for(&self, stage: Stage) -> usize {
        self.quorum.get(&stage).copied().unwrap_or(DEFAULT_QUORUM)
    }

    pub fn gate_for(&self, stage: Stage) -> Option<f64> {
        self.stage_gates.get(&stage).copied()
    }

    pub fn validate(&self) -> Result<(), PolicyError> {
        if let Some((stage, _)) = self.quorum.iter().find(|(_, required)| **required == 0) {
            return Err(PolicyError::ZeroQuorum(*stage));
        }
        if !(self.conflict_threshold > 0.0 && self.conflict_threshold <= 1.0) {
            return Err(PolicyError::ConflictThreshold(self.conflict_threshold));
        }
        if !(self.calibration.threshold > 0.0 && self.calibration.threshold <= 1.0) {
            return Err(PolicyError::CalibrationThreshold(self.calibration.threshold));
        }
        if self.calibration.window == 0 {
            return Err(PolicyError::CalibrationWindow);
        }
        if !(self.scoring.display_scale > 0.0) {
            return Err(PolicyError::DisplayScale(self.scoring.display_scale));
        }
        if let Some((stage, minimum)) = self
            .stage_gates
            .iter()
            .find(|(_, minimum)| **minimum < 0.0 || **minimum > self.scoring.display_scale)
        {
            return Err(PolicyError::StageGate {
                stage: *stage,
                minimum: *minimum,
            });
        }
        Ok(())
    }
}

impl Default for PipelinePolicy {
    fn default() -> Self {
        Self {
            quorum: quorum_table(DEFAULT_QUORUM, DEFAULT_FINALS_QUORUM),
            stage_gates: BTreeMap::new(),
            conflict_threshold: DEFAULT_CONFLICT_THRESHOLD,
            calibration: CalibrationPolicy::default(),
            scoring: ScoringConfig::default(),
            ranking: RankingConfig::default(),
        }
    }
}

fn quorum_table(default_quorum: usize, finals_quorum: usize) -> BTreeMap<Stage, usize> {
    Stage::ordered()
        .iter()
        .map(|stage| match stage {
            Stage::Finals => (*stage, finals_quorum),
            _ => (*stage, default_quorum),
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PolicyError {
    #[error("quorum for {0} must be at least 1")]
    ZeroQuorum(Stage),
    #[error("conflict threshold {0} must be within (0, 1]")]
    ConflictThreshold(f64),
    #[error("calibration threshold {0} must be within (0, 1]")]
    CalibrationThreshold(f64),
    #[error("calibration window must be at least 1")]
    CalibrationWindow,
    #[error("display scale {0} must be positive")]
    DisplayScale(f64),
    #[error("stage gate {minimum} for {stage} lies outside the display scale")]
    StageGate { stage: Stage, minimum: f64 },
}
