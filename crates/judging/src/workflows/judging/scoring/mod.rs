mod config;
mod rules;

pub use config::ScoringConfig;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::criteria::CriteriaSet;
use super::domain::{CriterionValue, Evaluation, Stage, StageScore, SubmissionId};

/// Stateless aggregator applying registered weights to judge evaluations.
#[derive(Debug, Clone)]
pub struct ScoreAggregator {
    config: ScoringConfig,
}

impl ScoreAggregator {
    pub fn new(config: ScoringConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    pub fn display_scale(&self) -> f64 {
        self.config.display_scale
    }

    /// Validates a complete evaluation and computes its weighted score.
    ///
    /// Every required criterion must be present; nothing is zero-filled.
    pub fn score_evaluation(
        &self,
        criteria: &CriteriaSet,
        scores: &BTreeMap<String, CriterionValue>,
    ) -> Result<ScoreBreakdown, ScoringError> {
        let missing: Vec<String> = criteria
            .required()
            .filter(|criterion| !scores.contains_key(&criterion.id))
            .map(|criterion| criterion.id.clone())
            .collect();
        if !missing.is_empty() {
            return Err(ScoringError::IncompleteEvaluation { missing });
        }

        let mut components = Vec::with_capacity(scores.len());
        let mut weighted_sum = 0.0;

        for (criterion_id, value) in scores {
            let criterion = criteria
                .criterion(criterion_id)
                .ok_or_else(|| ScoringError::UnknownCriterion(criterion_id.clone()))?;
            let Some(normalized) = rules::normalize(criterion, value)? else {
                continue;
            };
            let contribution = normalized * f64::from(criterion.weight);
            weighted_sum += contribution;
            components.push(ScoreComponent {
                criterion_id: criterion_id.clone(),
                normalized,
                weight: criterion.weight,
                contribution: contribution / 100.0 * self.config.display_scale,
            });
        }

        let weighted_score = weighted_sum / 100.0 * self.config.display_scale;
        Ok(ScoreBreakdown {
            criteria_version: criteria.version,
            weighted_score,
            components,
        })
    }

    /// Drafts may be partial, but whatever they contain must fit the criteria.
    pub fn validate_draft(
        &self,
        criteria: &CriteriaSet,
        scores: &BTreeMap<String, CriterionValue>,
    ) -> Result<(), ScoringError> {
        for (criterion_id, value) in scores {
            let criterion = criteria
                .criterion(criterion_id)
                .ok_or_else(|| ScoringError::UnknownCriterion(criterion_id.clone()))?;
            rules::normalize(criterion, value)?;
        }
        Ok(())
    }

    /// Mean of the active evaluations' weighted scores, or `None` when nothing counts yet.
    pub fn compute_stage_score(
        &self,
        submission_id: &SubmissionId,
        stage: Stage,
        evaluations: &[Evaluation],
        computed_at: DateTime<Utc>,
    ) -> Option<StageScore> {
        let contributing: Vec<(f64, u32)> = evaluations
            .iter()
            .filter(|evaluation| {
                evaluation.is_active()
                    && evaluation.stage == stage
                    && &evaluation.submission_id == submission_id
            })
            .filter_map(|evaluation| {
                evaluation
                    .weighted_score
                    .map(|score| (score, evaluation.criteria_version))
            })
            .collect();

        if contributing.is_empty() {
            return None;
        }

        let total: f64 = contributing.iter().map(|(score, _)| score).sum();
        let score = total / contributing.len() as f64;
        let criteria_version = contributing
            .iter()
            .map(|(_, version)| *version)
            .max()
            .unwrap_or_default();

        debug!(
            submission = %submission_id,
            stage = %stage,
            score,
            evaluations = contributing.len(),
            "stage score recomputed"
        );

        Some(StageScore {
            submission_id: submission_id.clone(),
            stage,
            score,
            evaluation_count: contributing.len(),
            criteria_version,
            computed_at,
            frozen: false,
        })
    }

    /// Blend of frozen stage scores using the configured stage weights.
    pub fn overall_score(&self, stage_scores: &[StageScore]) -> Option<f64> {
        let frozen: Vec<&StageScore> = stage_scores.iter().filter(|score| score.frozen).collect();
        if frozen.is_empty() {
            return None;
        }

        let (weighted, weights) = frozen.iter().fold((0.0, 0.0), |(sum, total), score| {
            let weight = f64::from(
                self.config
                    .stage_weights
                    .get(&score.stage)
                    .copied()
                    .unwrap_or(0),
            );
            (sum + score.score * weight, total + weight)
        });

        if weights > 0.0 {
            Some(weighted / weights)
        } else {
            let total: f64 = frozen.iter().map(|score| score.score).sum();
            Some(total / frozen.len() as f64)
        }
    }
}

impl Default for ScoreAggregator {
    fn default() -> Self {
        Self::new(ScoringConfig::default())
    }
}

/// Discrete contribution of one criterion, kept for transparent audits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreComponent {
    pub criterion_id: String,
    pub normalized: f64,
    pub weight: u8,
    /// Points on the display scale.
    pub contribution: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub criteria_version: u32,
    pub weighted_score: f64,
    pub components: Vec<ScoreComponent>,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ScoringError {
    #[error("evaluation is missing required criteria: {}", .missing.join(", "))]
    IncompleteEvaluation { missing: Vec<String> },
    #[error("score {value} for '{criterion}' is outside {min}..={max}")]
    ScoreOutOfRange {
        criterion: String,
        value: f64,
        min: f64,
        max: f64,
    },
    #[error("score {value} for '{criterion}' is not a multiple of step {step}")]
    OffStep {
        criterion: String,
        value: f64,
        step: f64,
    },
    #[error("'{criterion}' expects a {expected} value, got {found}")]
    ValueTypeMismatch {
        criterion: String,
        expected: &'static str,
        found: &'static str,
    },
    #[error("criterion '{0}' is not part of the stage criteria")]
    UnknownCriterion(String),
}
