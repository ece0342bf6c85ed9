//! Versioned evaluation criteria per stage.
//!
//! A registered set is frozen: later registrations create a new version instead of editing the
//! old one, so evaluations and stage scores keep pointing at the weights they were scored with.

mod import;

pub use import::{CriteriaImportError, CriteriaImporter};

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::domain::Stage;

/// Sum the required weights of a stage must reach.
pub const REQUIRED_WEIGHT_TOTAL: u32 = 100;

/// How a criterion is scored by judges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScaleType {
    Numeric { min: f64, max: f64, step: f64 },
    Boolean,
    FreeText,
}

impl ScaleType {
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Numeric { .. } => "numeric",
            Self::Boolean => "boolean",
            Self::FreeText => "free_text",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Criterion {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub stages: BTreeSet<Stage>,
    pub scale: ScaleType,
    /// Percentage of the stage score, 0–100.
    pub weight: u8,
    pub required: bool,
    #[serde(default)]
    pub category: String,
}

/// Frozen criteria for one stage at one version.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CriteriaSet {
    pub stage: Stage,
    pub version: u32,
    pub criteria: Vec<Criterion>,
    pub registered_at: DateTime<Utc>,
}

impl CriteriaSet {
    pub fn criterion(&self, id: &str) -> Option<&Criterion> {
        self.criteria.iter().find(|criterion| criterion.id == id)
    }

    pub fn required(&self) -> impl Iterator<Item = &Criterion> {
        self.criteria.iter().filter(|criterion| criterion.required)
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CriteriaError {
    #[error("required criteria for {stage} weigh {total}, expected 100")]
    InvalidWeights { stage: Stage, total: u32 },
    #[error("optional criterion '{id}' carries weight {weight}; only required criteria are weighted")]
    WeightedOptionalCriterion { id: String, weight: u8 },
    #[error("criterion '{id}' registered twice for {stage}")]
    DuplicateCriterion { stage: Stage, id: String },
    #[error("criterion '{id}' is invalid: {reason}")]
    InvalidCriterion { id: String, reason: String },
    #[error("no criteria registered for {0}")]
    NoCriteria(Stage),
    #[error("criteria version {version} not found for {stage}")]
    UnknownVersion { stage: Stage, version: u32 },
}

impl CriteriaError {
    /// Weight-related rejections share the `InvalidWeights` contract.
    pub fn is_weight_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidWeights { .. } | Self::WeightedOptionalCriterion { .. }
        )
    }
}

/// Holds every registered version of every stage's criteria.
#[derive(Debug, Default)]
pub struct CriteriaRegistry {
    versions: RwLock<BTreeMap<Stage, Vec<Arc<CriteriaSet>>>>,
}

impl CriteriaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and freeze a new criteria version for `stage`.
    pub fn register_criteria(
        &self,
        stage: Stage,
        criteria: Vec<Criterion>,
    ) -> Result<Arc<CriteriaSet>, CriteriaError> {
        validate_criteria(stage, &criteria)?;

        let mut guard = self.versions.write().expect("criteria lock poisoned");
        let history = guard.entry(stage).or_default();
        let version = history.last().map(|set| set.version + 1).unwrap_or(1);
        let set = Arc::new(CriteriaSet {
            stage,
            version,
            criteria,
            registered_at: Utc::now(),
        });
        history.push(set.clone());

        info!(stage = %stage, version, count = set.criteria.len(), "criteria registered");
        Ok(set)
    }

    /// Latest frozen set used for new evaluations.
    pub fn get_criteria(&self, stage: Stage) -> Result<Arc<CriteriaSet>, CriteriaError> {
        let guard = self.versions.read().expect("criteria lock poisoned");
        guard
            .get(&stage)
            .and_then(|history| history.last().cloned())
            .ok_or(CriteriaError::NoCriteria(stage))
    }

    /// Historical set an evaluation was scored with.
    pub fn get_version(
        &self,
        stage: Stage,
        version: u32,
    ) -> Result<Arc<CriteriaSet>, CriteriaError> {
        let guard = self.versions.read().expect("criteria lock poisoned");
        guard
            .get(&stage)
            .and_then(|history| history.iter().find(|set| set.version == version).cloned())
            .ok_or(CriteriaError::UnknownVersion { stage, version })
    }
}

fn validate_criteria(stage: Stage, criteria: &[Criterion]) -> Result<(), CriteriaError> {
    let mut seen = HashSet::new();
    let mut required_total: u32 = 0;

    for criterion in criteria {
        if criterion.id.trim().is_empty() {
            return Err(CriteriaError::InvalidCriterion {
                id: criterion.id.clone(),
                reason: "id must not be empty".to_string(),
            });
        }
        if !seen.insert(criterion.id.as_str()) {
            return Err(CriteriaError::DuplicateCriterion {
                stage,
                id: criterion.id.clone(),
            });
        }
        if !criterion.stages.contains(&stage) {
            return Err(CriteriaError::InvalidCriterion {
                id: criterion.id.clone(),
                reason: format!("not applicable to {stage}"),
            });
        }
        if criterion.weight > 100 {
            return Err(CriteriaError::InvalidCriterion {
                id: criterion.id.clone(),
                reason: format!("weight {} exceeds 100", criterion.weight),
            });
        }

        match &criterion.scale {
            ScaleType::Numeric { min, max, step } => {
                if !min.is_finite() || !max.is_finite() || min >= max {
                    return Err(CriteriaError::InvalidCriterion {
                        id: criterion.id.clone(),
                        reason: format!("numeric bounds {min}..{max} are not increasing"),
                    });
                }
                if !step.is_finite() || *step < 0.0 || *step > max - min {
                    return Err(CriteriaError::InvalidCriterion {
                        id: criterion.id.clone(),
                        reason: format!("step {step} does not fit {min}..{max}"),
                    });
                }
            }
            ScaleType::Boolean => {}
            ScaleType::FreeText => {
                if criterion.weight > 0 {
                    return Err(CriteriaError::InvalidCriterion {
                        id: criterion.id.clone(),
                        reason: "free text criteria cannot carry weight".to_string(),
                    });
                }
            }
        }

        if criterion.required {
            required_total += u32::from(criterion.weight);
        } else if criterion.weight > 0 {
            return Err(CriteriaError::WeightedOptionalCriterion {
                id: criterion.id.clone(),
                weight: criterion.weight,
            });
        }
    }

    if required_total != REQUIRED_WEIGHT_TOTAL {
        return Err(CriteriaError::InvalidWeights {
            stage,
            total: required_total,
        });
    }

    Ok(())
}
