//! In-process repository implementations backing the service and tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use super::domain::{
    Evaluation, EvaluationId, EvaluationKey, JudgeId, Stage, StageScore, Submission, SubmissionId,
};
use super::repository::{AuditEntry, EvaluationStore, RepositoryError, SubmissionRepository};

#[derive(Debug, Default)]
struct EvaluationState {
    records: HashMap<EvaluationId, Evaluation>,
    /// Recording order of non-draft evaluations.
    order: Vec<EvaluationId>,
    active: HashMap<EvaluationKey, EvaluationId>,
    drafts: HashMap<EvaluationKey, Evaluation>,
    audit: Vec<AuditEntry>,
}

/// Evaluation store guarded by one mutex so insert-or-reject is atomic.
#[derive(Debug, Default, Clone)]
pub struct InMemoryEvaluationStore {
    state: Arc<Mutex<EvaluationState>>,
}

impl EvaluationStore for InMemoryEvaluationStore {
    fn save_draft(&self, mut draft: Evaluation) -> Result<Evaluation, RepositoryError> {
        let mut guard = self.state.lock().expect("evaluation store mutex poisoned");
        let key = draft.key();
        if guard.active.contains_key(&key) {
            return Err(RepositoryError::DuplicateEvaluation(key));
        }
        draft.draft = true;
        draft.weighted_score = None;
        guard.drafts.insert(key, draft.clone());
        Ok(draft)
    }

    fn discard_draft(&self, key: &EvaluationKey) -> Result<bool, RepositoryError> {
        let mut guard = self.state.lock().expect("evaluation store mutex poisoned");
        Ok(guard.drafts.remove(key).is_some())
    }

    fn draft(&self, key: &EvaluationKey) -> Result<Option<Evaluation>, RepositoryError> {
        let guard = self.state.lock().expect("evaluation store mutex poisoned");
        Ok(guard.drafts.get(key).cloned())
    }

    fn insert(&self, evaluation: Evaluation) -> Result<Evaluation, RepositoryError> {
        let mut guard = self.state.lock().expect("evaluation store mutex poisoned");
        let key = evaluation.key();
        if guard.active.contains_key(&key) {
            return Err(RepositoryError::DuplicateEvaluation(key));
        }
        if guard.records.contains_key(&evaluation.id) {
            return Err(RepositoryError::Conflict);
        }

        guard.drafts.remove(&key);
        guard.active.insert(key, evaluation.id.clone());
        guard.order.push(evaluation.id.clone());
        guard
            .records
            .insert(evaluation.id.clone(), evaluation.clone());
        Ok(evaluation)
    }

    fn supersede(
        &self,
        previous: &EvaluationId,
        replacement: Evaluation,
        audit: AuditEntry,
    ) -> Result<Evaluation, RepositoryError> {
        let mut guard = self.state.lock().expect("evaluation store mutex poisoned");
        let original = guard
            .records
            .get(previous)
            .cloned()
            .ok_or(RepositoryError::NotFound)?;
        if original.superseded_by.is_some() {
            return Err(RepositoryError::AlreadySuperseded(previous.clone()));
        }
        let key = original.key();
        if replacement.key() != key {
            return Err(RepositoryError::KeyMismatch);
        }
        if guard.records.contains_key(&replacement.id) {
            return Err(RepositoryError::Conflict);
        }

        if let Some(record) = guard.records.get_mut(previous) {
            record.superseded_by = Some(replacement.id.clone());
        }
        guard.drafts.remove(&key);
        guard.active.insert(key, replacement.id.clone());
        guard.order.push(replacement.id.clone());
        guard
            .records
            .insert(replacement.id.clone(), replacement.clone());
        guard.audit.push(audit);
        Ok(replacement)
    }

    fn fetch(&self, id: &EvaluationId) -> Result<Option<Evaluation>, RepositoryError> {
        let guard = self.state.lock().expect("evaluation store mutex poisoned");
        Ok(guard.records.get(id).cloned())
    }

    fn for_stage(
        &self,
        submission_id: &SubmissionId,
        stage: Stage,
    ) -> Result<Vec<Evaluation>, RepositoryError> {
        let guard = self.state.lock().expect("evaluation store mutex poisoned");
        Ok(guard
            .order
            .iter()
            .filter_map(|id| guard.records.get(id))
            .filter(|evaluation| {
                &evaluation.submission_id == submission_id && evaluation.stage == stage
            })
            .cloned()
            .collect())
    }

    fn by_judge(&self, judge_id: &JudgeId) -> Result<Vec<Evaluation>, RepositoryError> {
        let guard = self.state.lock().expect("evaluation store mutex poisoned");
        Ok(guard
            .order
            .iter()
            .filter_map(|id| guard.records.get(id))
            .filter(|evaluation| &evaluation.judge_id == judge_id)
            .cloned()
            .collect())
    }

    fn audit_trail(&self, submission_id: &SubmissionId) -> Result<Vec<AuditEntry>, RepositoryError> {
        let guard = self.state.lock().expect("evaluation store mutex poisoned");
        Ok(guard
            .audit
            .iter()
            .filter(|entry| &entry.submission_id == submission_id)
            .cloned()
            .collect())
    }
}

#[derive(Debug, Default)]
struct SubmissionState {
    submissions: HashMap<SubmissionId, Submission>,
    scores: HashMap<SubmissionId, BTreeMap<Stage, StageScore>>,
}

#[derive(Debug, Default, Clone)]
pub struct InMemorySubmissionRepository {
    state: Arc<Mutex<SubmissionState>>,
}

impl SubmissionRepository for InMemorySubmissionRepository {
    fn insert(&self, submission: Submission) -> Result<Submission, RepositoryError> {
        let mut guard = self.state.lock().expect("submission mutex poisoned");
        if guard.submissions.contains_key(&submission.id) {
            return Err(RepositoryError::Conflict);
        }
        guard
            .submissions
            .insert(submission.id.clone(), submission.clone());
        Ok(submission)
    }

    fn update(&self, submission: Submission) -> Result<(), RepositoryError> {
        let mut guard = self.state.lock().expect("submission mutex poisoned");
        match guard.submissions.get_mut(&submission.id) {
            Some(existing) => {
                *existing = submission;
                Ok(())
            }
            None => Err(RepositoryError::NotFound),
        }
    }

    fn fetch(&self, id: &SubmissionId) -> Result<Option<Submission>, RepositoryError> {
        let guard = self.state.lock().expect("submission mutex poisoned");
        Ok(guard.submissions.get(id).cloned())
    }

    fn list(&self) -> Result<Vec<Submission>, RepositoryError> {
        let guard = self.state.lock().expect("submission mutex poisoned");
        let mut submissions: Vec<Submission> = guard.submissions.values().cloned().collect();
        submissions.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(submissions)
    }

    fn put_stage_score(&self, score: StageScore) -> Result<(), RepositoryError> {
        let mut guard = self.state.lock().expect("submission mutex poisoned");
        if !guard.submissions.contains_key(&score.submission_id) {
            return Err(RepositoryError::NotFound);
        }
        let scores = guard
            .scores
            .entry(score.submission_id.clone())
            .or_default();
        if scores.get(&score.stage).is_some_and(|existing| existing.frozen) {
            return Err(RepositoryError::FrozenScore(score.stage));
        }
        scores.insert(score.stage, score);
        Ok(())
    }

    fn stage_score(
        &self,
        id: &SubmissionId,
        stage: Stage,
    ) -> Result<Option<StageScore>, RepositoryError> {
        let guard = self.state.lock().expect("submission mutex poisoned");
        Ok(guard
            .scores
            .get(id)
            .and_then(|scores| scores.get(&stage))
            .cloned())
    }

    fn stage_scores(&self, id: &SubmissionId) -> Result<Vec<StageScore>, RepositoryError> {
        let guard = self.state.lock().expect("submission mutex poisoned");
        Ok(guard
            .scores
            .get(id)
            .map(|scores| scores.values().cloned().collect())
            .unwrap_or_default())
    }
}
