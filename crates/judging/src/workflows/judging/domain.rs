use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier wrapper for entries moving through the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SubmissionId(pub String);

/// Identifier wrapper for judges supplied by the assignment service.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct JudgeId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EvaluationId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConflictId(pub String);

impl fmt::Display for SubmissionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for JudgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for EvaluationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for ConflictId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fixed sequence of judging rounds. The derived ordering is the pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Triage,
    Preliminary,
    Detailed,
    Semifinals,
    Finals,
}

impl Stage {
    pub const fn ordered() -> [Self; 5] {
        [
            Self::Triage,
            Self::Preliminary,
            Self::Detailed,
            Self::Semifinals,
            Self::Finals,
        ]
    }

    pub const fn next(self) -> Option<Self> {
        match self {
            Self::Triage => Some(Self::Preliminary),
            Self::Preliminary => Some(Self::Detailed),
            Self::Detailed => Some(Self::Semifinals),
            Self::Semifinals => Some(Self::Finals),
            Self::Finals => None,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Triage => "Triage",
            Self::Preliminary => "Preliminary",
            Self::Detailed => "Detailed",
            Self::Semifinals => "Semifinals",
            Self::Finals => "Finals",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "triage" => Some(Self::Triage),
            "preliminary" => Some(Self::Preliminary),
            "detailed" => Some(Self::Detailed),
            "semifinals" | "semifinal" => Some(Self::Semifinals),
            "finals" | "final" => Some(Self::Finals),
            _ => None,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Lifecycle status tracked alongside the current stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStatus {
    Active,
    /// An unresolved conflict case exists for the current stage.
    Flagged,
    Disqualified,
    Completed,
}

impl SubmissionStatus {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Flagged => "flagged",
            Self::Disqualified => "disqualified",
            Self::Completed => "completed",
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Disqualified | Self::Completed)
    }
}

/// Entry owned by the state machine. Only stage-transition operations mutate it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    pub id: SubmissionId,
    pub category: String,
    pub stage: Stage,
    pub status: SubmissionStatus,
    pub created_at: DateTime<Utc>,
    pub last_transition_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disqualification_reason: Option<String>,
}

impl Submission {
    pub fn new(id: SubmissionId, category: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            category: category.into(),
            stage: Stage::Triage,
            status: SubmissionStatus::Active,
            created_at,
            last_transition_at: created_at,
            disqualification_reason: None,
        }
    }

    pub fn accepts_evaluations(&self) -> bool {
        matches!(
            self.status,
            SubmissionStatus::Active | SubmissionStatus::Flagged
        )
    }
}

/// Roster entry supplied by the assignment collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Judge {
    pub id: JudgeId,
    pub name: String,
    /// Categories the judge may score. Empty means unrestricted.
    #[serde(default)]
    pub categories: Vec<String>,
    pub active: bool,
}

impl Judge {
    pub fn covers(&self, category: &str) -> bool {
        self.categories.is_empty()
            || self
                .categories
                .iter()
                .any(|assigned| assigned.eq_ignore_ascii_case(category))
    }
}

/// Raw per-criterion value as entered by a judge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum CriterionValue {
    Numeric(f64),
    Boolean(bool),
    Text(String),
}

impl CriterionValue {
    pub const fn kind_label(&self) -> &'static str {
        match self {
            Self::Numeric(_) => "numeric",
            Self::Boolean(_) => "boolean",
            Self::Text(_) => "text",
        }
    }
}

/// Unique key for judge work on a stage.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EvaluationKey {
    pub judge_id: JudgeId,
    pub submission_id: SubmissionId,
    pub stage: Stage,
}

/// Evaluation as entered by a judge, before the store assigns identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationInput {
    pub judge_id: JudgeId,
    pub submission_id: SubmissionId,
    pub stage: Stage,
    pub scores: BTreeMap<String, CriterionValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl EvaluationInput {
    pub fn key(&self) -> EvaluationKey {
        EvaluationKey {
            judge_id: self.judge_id.clone(),
            submission_id: self.submission_id.clone(),
            stage: self.stage,
        }
    }
}

/// Recorded evaluation. Immutable once non-draft; corrections supersede it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub id: EvaluationId,
    pub judge_id: JudgeId,
    pub submission_id: SubmissionId,
    pub stage: Stage,
    pub scores: BTreeMap<String, CriterionValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub criteria_version: u32,
    /// Weighted score on the 0–10 display scale. Drafts carry `None`.
    pub weighted_score: Option<f64>,
    pub submitted_at: DateTime<Utc>,
    pub draft: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub superseded_by: Option<EvaluationId>,
}

impl Evaluation {
    pub fn key(&self) -> EvaluationKey {
        EvaluationKey {
            judge_id: self.judge_id.clone(),
            submission_id: self.submission_id.clone(),
            stage: self.stage,
        }
    }

    /// Counts toward aggregation and conflict detection.
    pub fn is_active(&self) -> bool {
        !self.draft && self.superseded_by.is_none()
    }
}

/// Weight-aggregated score for one submission at one stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageScore {
    pub submission_id: SubmissionId,
    pub stage: Stage,
    pub score: f64,
    pub evaluation_count: usize,
    pub criteria_version: u32,
    pub computed_at: DateTime<Utc>,
    /// Frozen by a successful advance; never rescored afterwards.
    pub frozen: bool,
}

/// Result of a transition request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AdvanceOutcome {
    Advanced {
        from: Stage,
        to: Stage,
        score: StageScore,
    },
    Completed {
        score: StageScore,
    },
    /// The frozen score missed the stage gate and the submission left the pipeline.
    Eliminated {
        stage: Stage,
        score: StageScore,
        minimum: f64,
    },
    AlreadyAdvanced {
        stage: Stage,
        status: SubmissionStatus,
    },
}

/// Sanitized view of a submission for collaborators.
#[derive(Debug, Clone, Serialize)]
pub struct SubmissionStatusView {
    pub submission_id: SubmissionId,
    pub category: String,
    pub stage: &'static str,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provisional_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disqualification_reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_order_is_total_and_forward_only() {
        let ordered = Stage::ordered();
        for pair in ordered.windows(2) {
            assert!(pair[0] < pair[1]);
            assert_eq!(pair[0].next(), Some(pair[1]));
        }
        assert_eq!(Stage::Finals.next(), None);
    }

    #[test]
    fn stage_parse_accepts_labels() {
        assert_eq!(Stage::parse(" Semifinals "), Some(Stage::Semifinals));
        assert_eq!(Stage::parse("final"), Some(Stage::Finals));
        assert_eq!(Stage::parse("round-robin"), None);
    }

    #[test]
    fn judge_without_categories_covers_everything() {
        let judge = Judge {
            id: JudgeId("j-1".to_string()),
            name: "Ada".to_string(),
            categories: Vec::new(),
            active: true,
        };
        assert!(judge.covers("Photography"));

        let scoped = Judge {
            categories: vec!["Film".to_string()],
            ..judge
        };
        assert!(scoped.covers("film"));
        assert!(!scoped.covers("Photography"));
    }
}
