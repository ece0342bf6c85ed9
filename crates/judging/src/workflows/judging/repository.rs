use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::domain::{
    Evaluation, EvaluationId, EvaluationKey, JudgeId, Stage, StageScore, Submission, SubmissionId,
};

/// Storage for judge evaluations.
///
/// `insert` must be an atomic insert-or-reject on the (judge, submission, stage) key: when two
/// callers race for the same key exactly one succeeds and the other sees
/// [`RepositoryError::DuplicateEvaluation`].
pub trait EvaluationStore: Send + Sync {
    /// Stores or replaces the draft for a key. Fails once a non-draft evaluation exists.
    fn save_draft(&self, draft: Evaluation) -> Result<Evaluation, RepositoryError>;
    /// Drops the draft for a key, returning whether one existed.
    fn discard_draft(&self, key: &EvaluationKey) -> Result<bool, RepositoryError>;
    fn draft(&self, key: &EvaluationKey) -> Result<Option<Evaluation>, RepositoryError>;
    /// Records a non-draft evaluation and drops any draft for the same key.
    fn insert(&self, evaluation: Evaluation) -> Result<Evaluation, RepositoryError>;
    /// Replaces an active evaluation with a correction for the same key and records the audit entry.
    fn supersede(
        &self,
        previous: &EvaluationId,
        replacement: Evaluation,
        audit: AuditEntry,
    ) -> Result<Evaluation, RepositoryError>;
    fn fetch(&self, id: &EvaluationId) -> Result<Option<Evaluation>, RepositoryError>;
    /// Non-draft evaluations for a submission stage in recording order, superseded ones included.
    fn for_stage(
        &self,
        submission_id: &SubmissionId,
        stage: Stage,
    ) -> Result<Vec<Evaluation>, RepositoryError>;
    fn by_judge(&self, judge_id: &JudgeId) -> Result<Vec<Evaluation>, RepositoryError>;
    fn audit_trail(&self, submission_id: &SubmissionId) -> Result<Vec<AuditEntry>, RepositoryError>;
}

/// Storage for submissions and their stage scores.
pub trait SubmissionRepository: Send + Sync {
    fn insert(&self, submission: Submission) -> Result<Submission, RepositoryError>;
    fn update(&self, submission: Submission) -> Result<(), RepositoryError>;
    fn fetch(&self, id: &SubmissionId) -> Result<Option<Submission>, RepositoryError>;
    fn list(&self) -> Result<Vec<Submission>, RepositoryError>;
    /// Writes a stage score unless a frozen score already exists for that stage.
    fn put_stage_score(&self, score: StageScore) -> Result<(), RepositoryError>;
    fn stage_score(
        &self,
        id: &SubmissionId,
        stage: Stage,
    ) -> Result<Option<StageScore>, RepositoryError>;
    fn stage_scores(&self, id: &SubmissionId) -> Result<Vec<StageScore>, RepositoryError>;
}

/// Trail left by an explicit correction of a recorded evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub submission_id: SubmissionId,
    pub stage: Stage,
    pub judge_id: JudgeId,
    pub previous: EvaluationId,
    pub replacement: EvaluationId,
    pub actor: String,
    pub reason: String,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RepositoryError {
    #[error("evaluation already recorded for judge {} on {} ({})", .0.judge_id, .0.submission_id, .0.stage)]
    DuplicateEvaluation(EvaluationKey),
    #[error("record already exists")]
    Conflict,
    #[error("record not found")]
    NotFound,
    #[error("evaluation {0} was already superseded")]
    AlreadySuperseded(EvaluationId),
    #[error("a correction must target the same judge, submission and stage")]
    KeyMismatch,
    #[error("frozen stage score for {0} cannot be overwritten")]
    FrozenScore(Stage),
}
