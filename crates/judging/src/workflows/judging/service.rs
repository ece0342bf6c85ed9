use std::collections::{BTreeMap, HashMap};
use std::io::Read;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use serde::Serialize;
use tracing::{debug, info, warn};

use super::calibration::{Benchmark, CalibrationError, CalibrationMonitor, CalibrationRecord};
use super::clock::{Clock, SystemClock};
use super::conflict::{ConflictCase, ConflictDetector, ConflictError, ConflictUpdate};
use super::criteria::{
    CriteriaError, CriteriaImportError, CriteriaImporter, CriteriaRegistry, CriteriaSet, Criterion,
};
use super::domain::{
    AdvanceOutcome, ConflictId, CriterionValue, Evaluation, EvaluationId, EvaluationInput,
    EvaluationKey, Judge, JudgeId, Stage, StageScore, Submission, SubmissionId, SubmissionStatus,
    SubmissionStatusView,
};
use super::locks::StageLocks;
use super::policy::{PipelinePolicy, PolicyError};
use super::ranking::{
    AwardAssignment, LeaderboardSnapshot, RankingCandidate, RankingEngine, RankingEntry,
    RankingError,
};
use super::repository::{AuditEntry, EvaluationStore, RepositoryError, SubmissionRepository};
use super::scoring::{ScoreAggregator, ScoreBreakdown, ScoringError};

/// Service composing the criteria registry, stores, aggregator, conflict detector,
/// calibration monitor and ranking engine. All pipeline mutation goes through it.
pub struct JudgingService<E, R> {
    registry: Arc<CriteriaRegistry>,
    evaluations: Arc<E>,
    submissions: Arc<R>,
    aggregator: ScoreAggregator,
    detector: ConflictDetector,
    calibration: CalibrationMonitor,
    ranking: RankingEngine,
    judges: RwLock<HashMap<JudgeId, Judge>>,
    locks: StageLocks,
    /// Held across the id check and insert so submissions and benchmarks never share an id.
    registration: Mutex<()>,
    policy: PipelinePolicy,
    clock: Arc<dyn Clock>,
    sequence: AtomicU64,
}

/// What a recorded evaluation changed downstream.
#[derive(Debug, Clone, Serialize)]
pub struct EvaluationReceipt {
    pub evaluation: Evaluation,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage_score: Option<StageScore>,
    pub conflict: ConflictUpdate,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub calibration: Option<CalibrationRecord>,
}

/// Explicit correction of a recorded evaluation.
#[derive(Debug, Clone)]
pub struct EvaluationCorrection {
    pub scores: BTreeMap<String, CriterionValue>,
    pub notes: Option<String>,
    pub actor: String,
    pub reason: String,
}

impl<E, R> JudgingService<E, R>
where
    E: EvaluationStore + 'static,
    R: SubmissionRepository + 'static,
{
    pub fn new(
        registry: Arc<CriteriaRegistry>,
        evaluations: Arc<E>,
        submissions: Arc<R>,
        policy: PipelinePolicy,
    ) -> Result<Self, PipelineError> {
        policy.validate()?;

        let aggregator = ScoreAggregator::new(policy.scoring.clone());
        let detector =
            ConflictDetector::new(policy.conflict_threshold, aggregator.display_scale());
        let calibration = CalibrationMonitor::new(policy.calibration);
        let ranking = RankingEngine::new(policy.ranking.clone(), aggregator.clone());

        Ok(Self {
            registry,
            evaluations,
            submissions,
            aggregator,
            detector,
            calibration,
            ranking,
            judges: RwLock::new(HashMap::new()),
            locks: StageLocks::default(),
            registration: Mutex::new(()),
            policy,
            clock: Arc::new(SystemClock),
            sequence: AtomicU64::new(1),
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn policy(&self) -> &PipelinePolicy {
        &self.policy
    }

    pub fn register_criteria(
        &self,
        stage: Stage,
        criteria: Vec<Criterion>,
    ) -> Result<Arc<CriteriaSet>, PipelineError> {
        Ok(self.registry.register_criteria(stage, criteria)?)
    }

    pub fn import_criteria<Rd: Read>(
        &self,
        reader: Rd,
    ) -> Result<Vec<Arc<CriteriaSet>>, PipelineError> {
        Ok(CriteriaImporter::from_reader(reader, &self.registry)?)
    }

    pub fn criteria(&self, stage: Stage) -> Result<Arc<CriteriaSet>, PipelineError> {
        Ok(self.registry.get_criteria(stage)?)
    }

    /// Adds or replaces a roster entry.
    pub fn register_judge(&self, judge: Judge) -> Judge {
        let mut guard = self.judges.write().expect("judge roster lock poisoned");
        info!(judge = %judge.id, active = judge.active, "judge registered");
        guard.insert(judge.id.clone(), judge.clone());
        judge
    }

    pub fn set_judge_active(&self, judge_id: &JudgeId, active: bool) -> Result<Judge, PipelineError> {
        let mut guard = self.judges.write().expect("judge roster lock poisoned");
        let judge = guard
            .get_mut(judge_id)
            .ok_or_else(|| PipelineError::UnknownJudge(judge_id.clone()))?;
        judge.active = active;
        Ok(judge.clone())
    }

    pub fn judges(&self) -> Vec<Judge> {
        let guard = self.judges.read().expect("judge roster lock poisoned");
        let mut judges: Vec<Judge> = guard.values().cloned().collect();
        judges.sort_by(|a, b| a.id.cmp(&b.id));
        judges
    }

    /// Ingests a submission at Triage.
    pub fn register_submission(
        &self,
        id: SubmissionId,
        category: &str,
    ) -> Result<Submission, PipelineError> {
        let categories = &self.policy.ranking.categories;
        let known = categories.is_empty()
            || categories
                .iter()
                .any(|known| known.eq_ignore_ascii_case(category));
        if !known {
            return Err(RankingError::UnknownCategory(category.to_string()).into());
        }
        let _registration = self.registration.lock().expect("registration lock poisoned");
        if self.calibration.is_benchmark(&id) {
            return Err(PipelineError::SubmissionExists(id));
        }

        let submission = Submission::new(id.clone(), category, self.clock.now());
        let stored = self.submissions.insert(submission).map_err(|err| match err {
            RepositoryError::Conflict => PipelineError::SubmissionExists(id),
            other => other.into(),
        })?;
        info!(submission = %stored.id, category = %stored.category, "submission registered");
        Ok(stored)
    }

    /// Registers a calibration benchmark scored against the current criteria of `stage`.
    pub fn register_benchmark(
        &self,
        id: SubmissionId,
        stage: Stage,
        reference_scores: BTreeMap<String, CriterionValue>,
    ) -> Result<Benchmark, PipelineError> {
        let criteria = self.registry.get_criteria(stage)?;
        let _registration = self.registration.lock().expect("registration lock poisoned");
        if self.submissions.fetch(&id)?.is_some() {
            return Err(PipelineError::SubmissionExists(id));
        }
        let benchmark =
            self.calibration
                .register_benchmark(id, reference_scores, &criteria, &self.aggregator)?;
        info!(
            benchmark = %benchmark.submission_id,
            stage = %benchmark.stage,
            reference = benchmark.reference_score,
            "benchmark registered"
        );
        Ok(benchmark)
    }

    /// Stores a partial evaluation. Drafts never count toward scores or conflicts.
    pub fn save_draft(&self, input: EvaluationInput) -> Result<Evaluation, PipelineError> {
        let judge = self.active_judge(&input.judge_id)?;
        let criteria = match self.calibration.benchmark(&input.submission_id) {
            Some(benchmark) => {
                ensure_benchmark_stage(&benchmark, input.stage)?;
                self.registry
                    .get_version(benchmark.stage, benchmark.criteria_version)?
            }
            None => {
                let submission = self.open_submission(&input.submission_id, input.stage)?;
                ensure_assigned(&judge, &submission)?;
                self.registry.get_criteria(input.stage)?
            }
        };
        self.aggregator.validate_draft(&criteria, &input.scores)?;

        let draft = self.build_evaluation(input, criteria.version, None, true);
        let stored = self.evaluations.save_draft(draft)?;
        debug!(draft = %stored.id, judge = %stored.judge_id, "draft saved");
        Ok(stored)
    }

    pub fn discard_draft(&self, key: &EvaluationKey) -> Result<bool, PipelineError> {
        Ok(self.evaluations.discard_draft(key)?)
    }

    pub fn draft(&self, key: &EvaluationKey) -> Result<Option<Evaluation>, PipelineError> {
        Ok(self.evaluations.draft(key)?)
    }

    /// Records a final evaluation, rescoring the stage and running conflict detection.
    pub fn submit_evaluation(
        &self,
        input: EvaluationInput,
    ) -> Result<EvaluationReceipt, PipelineError> {
        let judge = self.active_judge(&input.judge_id)?;
        if let Some(benchmark) = self.calibration.benchmark(&input.submission_id) {
            return self.submit_benchmark_evaluation(&benchmark, input);
        }

        let lock = self.locks.handle(&input.submission_id, input.stage);
        let _guard = lock.lock().expect("stage lock poisoned");

        let submission = self.open_submission(&input.submission_id, input.stage)?;
        ensure_assigned(&judge, &submission)?;
        let criteria = self.registry.get_criteria(input.stage)?;
        let breakdown = self.aggregator.score_evaluation(&criteria, &input.scores)?;

        let evaluation =
            self.build_evaluation(input, breakdown.criteria_version, Some(&breakdown), false);
        let stored = self.evaluations.insert(evaluation).map_err(|err| {
            warn!(error = %err, "evaluation rejected");
            err
        })?;
        info!(
            evaluation = %stored.id,
            judge = %stored.judge_id,
            submission = %stored.submission_id,
            stage = %stored.stage,
            score = breakdown.weighted_score,
            "evaluation recorded"
        );

        let (stage_score, conflict) = self.after_recorded(submission, &stored, None)?;
        Ok(EvaluationReceipt {
            evaluation: stored,
            stage_score,
            conflict,
            calibration: None,
        })
    }

    /// Replaces a recorded evaluation with an audited correction.
    pub fn supersede_evaluation(
        &self,
        previous_id: &EvaluationId,
        correction: EvaluationCorrection,
    ) -> Result<EvaluationReceipt, PipelineError> {
        let previous = self
            .evaluations
            .fetch(previous_id)?
            .ok_or(RepositoryError::NotFound)?;
        let input = EvaluationInput {
            judge_id: previous.judge_id.clone(),
            submission_id: previous.submission_id.clone(),
            stage: previous.stage,
            scores: correction.scores,
            notes: correction.notes,
        };

        if let Some(benchmark) = self.calibration.benchmark(&previous.submission_id) {
            let criteria = self
                .registry
                .get_version(benchmark.stage, benchmark.criteria_version)?;
            let breakdown = self.aggregator.score_evaluation(&criteria, &input.scores)?;
            let replacement =
                self.build_evaluation(input, criteria.version, Some(&breakdown), false);
            let audit = self.audit_entry(&previous, &replacement, &correction.actor, &correction.reason);
            let stored = self.evaluations.supersede(previous_id, replacement, audit)?;
            let calibration = self.recalibrate(&stored);
            return Ok(EvaluationReceipt {
                evaluation: stored,
                stage_score: None,
                conflict: ConflictUpdate::NoConflict,
                calibration,
            });
        }

        let lock = self.locks.handle(&previous.submission_id, previous.stage);
        let _guard = lock.lock().expect("stage lock poisoned");

        let submission = self.open_submission(&previous.submission_id, previous.stage)?;
        let criteria = self.registry.get_criteria(previous.stage)?;
        let breakdown = self.aggregator.score_evaluation(&criteria, &input.scores)?;
        let replacement = self.build_evaluation(input, criteria.version, Some(&breakdown), false);
        let audit = self.audit_entry(&previous, &replacement, &correction.actor, &correction.reason);
        let stored = self.evaluations.supersede(previous_id, replacement, audit)?;
        info!(
            previous = %previous_id,
            replacement = %stored.id,
            actor = %correction.actor,
            "evaluation superseded"
        );

        let (stage_score, conflict) =
            self.after_recorded(submission, &stored, Some(previous_id))?;
        Ok(EvaluationReceipt {
            evaluation: stored,
            stage_score,
            conflict,
            calibration: None,
        })
    }

    /// Freezes the current stage score and moves the submission forward.
    ///
    /// Completed and Disqualified submissions are rejected; use [`Self::advance_from`] for a
    /// retry-safe call that reports a no-op instead.
    pub fn advance(&self, submission_id: &SubmissionId) -> Result<AdvanceOutcome, PipelineError> {
        let submission = self.require_submission(submission_id)?;
        if submission.status.is_terminal() {
            return Err(PipelineError::invalid_transition(&submission, "advance"));
        }
        self.advance_from(submission_id, submission.stage)
    }

    /// Advances out of `expected`, or reports `AlreadyAdvanced` if that already happened.
    pub fn advance_from(
        &self,
        submission_id: &SubmissionId,
        expected: Stage,
    ) -> Result<AdvanceOutcome, PipelineError> {
        let lock = self.locks.handle(submission_id, expected);
        let guard = lock.lock().expect("stage lock poisoned");

        let mut submission = self.require_submission(submission_id)?;
        let already_done = submission.stage > expected
            || (submission.stage == expected && submission.status == SubmissionStatus::Completed);
        if already_done {
            debug!(submission = %submission_id, stage = %submission.stage, "advance already applied");
            return Ok(AdvanceOutcome::AlreadyAdvanced {
                stage: submission.stage,
                status: submission.status,
            });
        }
        if submission.stage < expected {
            return Err(PipelineError::StageMismatch {
                submission_id: submission_id.clone(),
                current: submission.stage,
                requested: expected,
            });
        }
        if submission.status == SubmissionStatus::Disqualified {
            return Err(PipelineError::invalid_transition(&submission, "advance"));
        }
        if let Some(case) = self.detector.open_case_for(submission_id, expected) {
            return Err(PipelineError::ConflictOpen { case: case.id });
        }

        let active = self.active_evaluations(submission_id, expected)?;
        let required = self.policy.quorum_for(expected);
        let incomplete = || PipelineError::StageIncomplete {
            stage: expected,
            required,
            recorded: active.len(),
        };
        if active.len() < required {
            return Err(incomplete());
        }

        let now = self.clock.now();
        let mut score = self
            .aggregator
            .compute_stage_score(submission_id, expected, &active, now)
            .ok_or_else(incomplete)?;
        score.frozen = true;
        self.submissions.put_stage_score(score.clone())?;

        submission.last_transition_at = now;
        let gate = self
            .policy
            .gate_for(expected)
            .filter(|minimum| score.score < *minimum);
        let outcome = match (gate, expected.next()) {
            (Some(minimum), _) => {
                submission.status = SubmissionStatus::Disqualified;
                submission.disqualification_reason = Some(format!(
                    "scored {:.2} at {expected}, below the stage gate of {minimum:.2}",
                    score.score
                ));
                AdvanceOutcome::Eliminated {
                    stage: expected,
                    score,
                    minimum,
                }
            }
            (None, Some(next)) => {
                submission.stage = next;
                submission.status = SubmissionStatus::Active;
                AdvanceOutcome::Advanced {
                    from: expected,
                    to: next,
                    score,
                }
            }
            (None, None) => {
                submission.status = SubmissionStatus::Completed;
                AdvanceOutcome::Completed { score }
            }
        };
        self.submissions.update(submission)?;
        drop(guard);

        match &outcome {
            AdvanceOutcome::Advanced { from, to, score } => info!(
                submission = %submission_id,
                from = %from,
                to = %to,
                score = score.score,
                "submission advanced"
            ),
            AdvanceOutcome::Eliminated { stage, score, minimum } => info!(
                submission = %submission_id,
                stage = %stage,
                score = score.score,
                minimum,
                "submission eliminated at stage gate"
            ),
            AdvanceOutcome::Completed { score } => {
                info!(submission = %submission_id, score = score.score, "submission completed");
                self.refresh_leaderboard();
            }
            AdvanceOutcome::AlreadyAdvanced { .. } => {}
        }

        Ok(outcome)
    }

    /// Terminal removal from the pipeline. Repeating it is a no-op.
    pub fn disqualify(
        &self,
        submission_id: &SubmissionId,
        reason: &str,
    ) -> Result<Submission, PipelineError> {
        loop {
            let observed = self.require_submission(submission_id)?.stage;
            let lock = self.locks.handle(submission_id, observed);
            let _guard = lock.lock().expect("stage lock poisoned");

            let mut submission = self.require_submission(submission_id)?;
            if submission.stage != observed {
                continue;
            }
            match submission.status {
                SubmissionStatus::Completed => {
                    return Err(PipelineError::invalid_transition(&submission, "be disqualified"))
                }
                SubmissionStatus::Disqualified => return Ok(submission),
                SubmissionStatus::Active | SubmissionStatus::Flagged => {}
            }

            submission.status = SubmissionStatus::Disqualified;
            submission.disqualification_reason = Some(reason.to_string());
            submission.last_transition_at = self.clock.now();
            self.submissions.update(submission.clone())?;
            if let Some(case) = self.detector.open_case_for(submission_id, submission.stage) {
                self.detector.resolve_administratively(
                    &case.id,
                    "system",
                    "submission disqualified",
                    submission.last_transition_at,
                )?;
            }
            info!(submission = %submission_id, stage = %submission.stage, reason, "submission disqualified");
            return Ok(submission);
        }
    }

    /// Closes a pending conflict case by administrative decision.
    pub fn resolve_conflict(
        &self,
        case_id: &ConflictId,
        actor: &str,
        note: &str,
    ) -> Result<ConflictCase, PipelineError> {
        let case = self
            .detector
            .case(case_id)
            .ok_or_else(|| ConflictError::NotFound(case_id.clone()))?;

        let lock = self.locks.handle(&case.submission_id, case.stage);
        let _guard = lock.lock().expect("stage lock poisoned");

        let resolved = self
            .detector
            .resolve_administratively(case_id, actor, note, self.clock.now())?;
        if let Some(mut submission) = self.submissions.fetch(&resolved.submission_id)? {
            if submission.stage == resolved.stage && submission.status == SubmissionStatus::Flagged {
                submission.status = SubmissionStatus::Active;
                self.submissions.update(submission)?;
            }
        }
        Ok(resolved)
    }

    pub fn submission(&self, submission_id: &SubmissionId) -> Result<Submission, PipelineError> {
        self.require_submission(submission_id)
    }

    pub fn submissions(&self) -> Result<Vec<Submission>, PipelineError> {
        Ok(self.submissions.list()?)
    }

    pub fn submission_status(
        &self,
        submission_id: &SubmissionId,
    ) -> Result<SubmissionStatusView, PipelineError> {
        let submission = self.require_submission(submission_id)?;
        let provisional_score = self
            .submissions
            .stage_score(submission_id, submission.stage)?
            .map(|score| score.score);
        Ok(SubmissionStatusView {
            submission_id: submission.id,
            category: submission.category,
            stage: submission.stage.label(),
            status: submission.status.label(),
            provisional_score,
            disqualification_reason: submission.disqualification_reason,
        })
    }

    pub fn stage_score(
        &self,
        submission_id: &SubmissionId,
        stage: Stage,
    ) -> Result<Option<StageScore>, PipelineError> {
        Ok(self.submissions.stage_score(submission_id, stage)?)
    }

    pub fn stage_scores(&self, submission_id: &SubmissionId) -> Result<Vec<StageScore>, PipelineError> {
        Ok(self.submissions.stage_scores(submission_id)?)
    }

    /// Every recorded evaluation for the stage, superseded ones included.
    pub fn evaluations_for(
        &self,
        submission_id: &SubmissionId,
        stage: Stage,
    ) -> Result<Vec<Evaluation>, PipelineError> {
        Ok(self.evaluations.for_stage(submission_id, stage)?)
    }

    pub fn evaluations_by_judge(&self, judge_id: &JudgeId) -> Result<Vec<Evaluation>, PipelineError> {
        Ok(self.evaluations.by_judge(judge_id)?)
    }

    pub fn audit_trail(&self, submission_id: &SubmissionId) -> Result<Vec<AuditEntry>, PipelineError> {
        Ok(self.evaluations.audit_trail(submission_id)?)
    }

    pub fn open_conflicts(&self) -> Vec<ConflictCase> {
        self.detector.open_cases()
    }

    pub fn conflicts_for(&self, submission_id: &SubmissionId) -> Vec<ConflictCase> {
        self.detector.cases_for(submission_id)
    }

    pub fn conflict(&self, case_id: &ConflictId) -> Result<ConflictCase, PipelineError> {
        Ok(self
            .detector
            .case(case_id)
            .ok_or_else(|| ConflictError::NotFound(case_id.clone()))?)
    }

    pub fn calibration_records(&self) -> Vec<CalibrationRecord> {
        self.calibration.records()
    }

    pub fn calibration_record(&self, judge_id: &JudgeId) -> Option<CalibrationRecord> {
        self.calibration.record(judge_id)
    }

    /// Judges whose latest benchmark deviation exceeds the threshold.
    pub fn judges_needing_calibration(&self) -> Vec<CalibrationRecord> {
        self.calibration.flagged()
    }

    pub fn leaderboard(&self, category: Option<&str>) -> Result<Vec<RankingEntry>, PipelineError> {
        let candidates = self.candidates()?;
        Ok(self.ranking.compute_leaderboard(&candidates, category)?)
    }

    pub fn latest_leaderboard(&self) -> Option<LeaderboardSnapshot> {
        self.ranking.latest()
    }

    pub fn award_eligibility(&self, award_id: &str) -> Result<Vec<RankingEntry>, PipelineError> {
        let award = self.ranking.award(award_id)?.clone();
        let candidates = self.candidates()?;
        Ok(self.ranking.evaluate_award_eligibility(&award, &candidates)?)
    }

    pub fn assign_award(
        &self,
        award_id: &str,
        submission_id: &SubmissionId,
        actor: &str,
        note: &str,
    ) -> Result<AwardAssignment, PipelineError> {
        let candidates = self.candidates()?;
        Ok(self.ranking.assign_award(
            award_id,
            submission_id,
            actor,
            note,
            &candidates,
            self.clock.now(),
        )?)
    }

    pub fn award_assignments(&self) -> Vec<AwardAssignment> {
        self.ranking.assignments()
    }

    fn next_evaluation_id(&self) -> EvaluationId {
        let id = self.sequence.fetch_add(1, Ordering::Relaxed);
        EvaluationId(format!("eval-{id:06}"))
    }

    fn build_evaluation(
        &self,
        input: EvaluationInput,
        criteria_version: u32,
        breakdown: Option<&ScoreBreakdown>,
        draft: bool,
    ) -> Evaluation {
        Evaluation {
            id: self.next_evaluation_id(),
            judge_id: input.judge_id,
            submission_id: input.submission_id,
            stage: input.stage,
            scores: input.scores,
            notes: input.notes,
            criteria_version,
            weighted_score: breakdown.map(|breakdown| breakdown.weighted_score),
            submitted_at: self.clock.now(),
            draft,
            superseded_by: None,
        }
    }

    fn audit_entry(
        &self,
        previous: &Evaluation,
        replacement: &Evaluation,
        actor: &str,
        reason: &str,
    ) -> AuditEntry {
        AuditEntry {
            submission_id: previous.submission_id.clone(),
            stage: previous.stage,
            judge_id: previous.judge_id.clone(),
            previous: previous.id.clone(),
            replacement: replacement.id.clone(),
            actor: actor.to_string(),
            reason: reason.to_string(),
            recorded_at: self.clock.now(),
        }
    }

    fn submit_benchmark_evaluation(
        &self,
        benchmark: &Benchmark,
        input: EvaluationInput,
    ) -> Result<EvaluationReceipt, PipelineError> {
        ensure_benchmark_stage(benchmark, input.stage)?;
        let criteria = self
            .registry
            .get_version(benchmark.stage, benchmark.criteria_version)?;
        let breakdown = self.aggregator.score_evaluation(&criteria, &input.scores)?;
        let evaluation = self.build_evaluation(input, criteria.version, Some(&breakdown), false);
        let stored = self.evaluations.insert(evaluation)?;
        debug!(evaluation = %stored.id, benchmark = %benchmark.submission_id, "benchmark evaluation recorded");

        let calibration = self.recalibrate(&stored);
        Ok(EvaluationReceipt {
            evaluation: stored,
            stage_score: None,
            conflict: ConflictUpdate::NoConflict,
            calibration,
        })
    }

    /// Calibration never fails a judge submission; problems are logged and skipped.
    fn recalibrate(&self, evaluation: &Evaluation) -> Option<CalibrationRecord> {
        match self
            .calibration
            .record_benchmark_evaluation(evaluation, self.clock.now())
        {
            Ok(record) => Some(record),
            Err(err) => {
                warn!(evaluation = %evaluation.id, error = %err, "calibration update skipped");
                None
            }
        }
    }

    /// Rescores the stage and runs conflict detection. Caller holds the stage lock.
    fn after_recorded(
        &self,
        mut submission: Submission,
        recorded: &Evaluation,
        replaced: Option<&EvaluationId>,
    ) -> Result<(Option<StageScore>, ConflictUpdate), PipelineError> {
        let now = self.clock.now();
        let active = self.active_evaluations(&recorded.submission_id, recorded.stage)?;

        let stage_score =
            self.aggregator
                .compute_stage_score(&recorded.submission_id, recorded.stage, &active, now);
        if let Some(score) = &stage_score {
            self.submissions.put_stage_score(score.clone())?;
        }

        let conflict = match replaced {
            Some(replaced) => self
                .detector
                .on_evaluation_corrected(recorded, replaced, &active, now),
            None => self.detector.on_evaluation_recorded(recorded, &active, now),
        };
        let status = if conflict.blocks_advancement() {
            SubmissionStatus::Flagged
        } else if matches!(conflict, ConflictUpdate::Resolved(_)) {
            SubmissionStatus::Active
        } else {
            submission.status
        };
        if status != submission.status {
            submission.status = status;
            self.submissions.update(submission)?;
        }

        Ok((stage_score, conflict))
    }

    fn active_evaluations(
        &self,
        submission_id: &SubmissionId,
        stage: Stage,
    ) -> Result<Vec<Evaluation>, PipelineError> {
        Ok(self
            .evaluations
            .for_stage(submission_id, stage)?
            .into_iter()
            .filter(Evaluation::is_active)
            .collect())
    }

    fn require_submission(&self, submission_id: &SubmissionId) -> Result<Submission, PipelineError> {
        self.submissions
            .fetch(submission_id)?
            .ok_or_else(|| PipelineError::UnknownSubmission(submission_id.clone()))
    }

    /// A submission that takes evaluations for `stage` right now.
    fn open_submission(
        &self,
        submission_id: &SubmissionId,
        stage: Stage,
    ) -> Result<Submission, PipelineError> {
        let submission = self.require_submission(submission_id)?;
        if !submission.accepts_evaluations() {
            return Err(PipelineError::invalid_transition(&submission, "accept evaluations"));
        }
        if submission.stage != stage {
            return Err(PipelineError::StageMismatch {
                submission_id: submission_id.clone(),
                current: submission.stage,
                requested: stage,
            });
        }
        Ok(submission)
    }

    fn active_judge(&self, judge_id: &JudgeId) -> Result<Judge, PipelineError> {
        let guard = self.judges.read().expect("judge roster lock poisoned");
        let judge = guard
            .get(judge_id)
            .cloned()
            .ok_or_else(|| PipelineError::UnknownJudge(judge_id.clone()))?;
        if !judge.active {
            return Err(PipelineError::InactiveJudge(judge_id.clone()));
        }
        Ok(judge)
    }

    fn candidates(&self) -> Result<Vec<RankingCandidate>, PipelineError> {
        self.submissions
            .list()?
            .into_iter()
            .filter(|submission| submission.status == SubmissionStatus::Completed)
            .map(|submission| {
                let stage_scores = self.submissions.stage_scores(&submission.id)?;
                Ok(RankingCandidate {
                    submission,
                    stage_scores,
                })
            })
            .collect()
    }

    fn refresh_leaderboard(&self) {
        let now = self.clock.now();
        let refreshed = self.ranking.refresh(|| self.candidates(), now);
        match refreshed {
            Ok(snapshot) => info!(
                generation = snapshot.generation,
                entries = snapshot.entries.len(),
                "leaderboard refreshed"
            ),
            Err(err) => warn!(error = %err, "leaderboard refresh failed"),
        }
    }
}

fn ensure_assigned(judge: &Judge, submission: &Submission) -> Result<(), PipelineError> {
    if judge.covers(&submission.category) {
        Ok(())
    } else {
        Err(PipelineError::JudgeNotAssigned {
            judge_id: judge.id.clone(),
            category: submission.category.clone(),
        })
    }
}

fn ensure_benchmark_stage(benchmark: &Benchmark, stage: Stage) -> Result<(), PipelineError> {
    if benchmark.stage == stage {
        Ok(())
    } else {
        Err(CalibrationError::StageMismatch {
            submission_id: benchmark.submission_id.clone(),
            expected: benchmark.stage,
            found: stage,
        }
        .into())
    }
}

/// Coarse classification surfaced to callers and transports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Bad input; nothing was persisted.
    Validation,
    /// Lost a race or repeated a one-time action.
    Concurrency,
    /// The submission's lifecycle does not allow the operation.
    State,
    /// Expected state awaiting human resolution.
    ConflictOpen,
    NotFound,
}

impl ErrorKind {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Validation => "validation_error",
            Self::Concurrency => "concurrency_conflict",
            Self::State => "state_error",
            Self::ConflictOpen => "conflict_open",
            Self::NotFound => "not_found",
        }
    }
}

/// Error raised by the judging service.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Policy(#[from] PolicyError),
    #[error(transparent)]
    Criteria(#[from] CriteriaError),
    #[error(transparent)]
    CriteriaImport(#[from] CriteriaImportError),
    #[error(transparent)]
    Scoring(#[from] ScoringError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Conflict(#[from] ConflictError),
    #[error(transparent)]
    Calibration(#[from] CalibrationError),
    #[error(transparent)]
    Ranking(#[from] RankingError),
    #[error("{stage} needs {required} evaluations before advancing, {recorded} recorded")]
    StageIncomplete {
        stage: Stage,
        required: usize,
        recorded: usize,
    },
    #[error("cannot advance, pending conflict {case}")]
    ConflictOpen { case: ConflictId },
    #[error("submission {submission_id} is {status} and cannot {action}")]
    InvalidTransition {
        submission_id: SubmissionId,
        status: &'static str,
        action: &'static str,
    },
    #[error("submission {submission_id} is at {current}, not {requested}")]
    StageMismatch {
        submission_id: SubmissionId,
        current: Stage,
        requested: Stage,
    },
    #[error("submission {0} already exists")]
    SubmissionExists(SubmissionId),
    #[error("unknown submission {0}")]
    UnknownSubmission(SubmissionId),
    #[error("unknown judge {0}")]
    UnknownJudge(JudgeId),
    #[error("judge {0} is inactive")]
    InactiveJudge(JudgeId),
    #[error("judge {judge_id} is not assigned to category '{category}'")]
    JudgeNotAssigned { judge_id: JudgeId, category: String },
}

impl PipelineError {
    fn invalid_transition(submission: &Submission, action: &'static str) -> Self {
        Self::InvalidTransition {
            submission_id: submission.id.clone(),
            status: submission.status.label(),
            action,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Policy(_)
            | Self::CriteriaImport(_)
            | Self::Scoring(_)
            | Self::StageMismatch { .. }
            | Self::InactiveJudge(_)
            | Self::JudgeNotAssigned { .. } => ErrorKind::Validation,
            Self::Criteria(err) => match err {
                CriteriaError::NoCriteria(_) | CriteriaError::UnknownVersion { .. } => {
                    ErrorKind::NotFound
                }
                _ => ErrorKind::Validation,
            },
            Self::Repository(err) => match err {
                RepositoryError::NotFound => ErrorKind::NotFound,
                RepositoryError::KeyMismatch => ErrorKind::Validation,
                RepositoryError::FrozenScore(_) => ErrorKind::State,
                RepositoryError::DuplicateEvaluation(_)
                | RepositoryError::Conflict
                | RepositoryError::AlreadySuperseded(_) => ErrorKind::Concurrency,
            },
            Self::Conflict(err) => match err {
                ConflictError::NotFound(_) => ErrorKind::NotFound,
                ConflictError::AlreadyResolved(_) => ErrorKind::State,
            },
            Self::Calibration(err) => match err {
                CalibrationError::UnknownBenchmark(_) => ErrorKind::NotFound,
                CalibrationError::DuplicateBenchmark(_) => ErrorKind::Concurrency,
                _ => ErrorKind::Validation,
            },
            Self::Ranking(err) => match err {
                RankingError::UnknownCategory(_) | RankingError::UnknownAward(_) => {
                    ErrorKind::NotFound
                }
                RankingError::NotEligible { .. } => ErrorKind::Validation,
                RankingError::AwardAlreadyAssigned { .. } => ErrorKind::Concurrency,
            },
            Self::StageIncomplete { .. } | Self::InvalidTransition { .. } => ErrorKind::State,
            Self::ConflictOpen { .. } => ErrorKind::ConflictOpen,
            Self::SubmissionExists(_) => ErrorKind::Concurrency,
            Self::UnknownSubmission(_) | Self::UnknownJudge(_) => ErrorKind::NotFound,
        }
    }

    /// Quorum and open-conflict results clear up on their own or through resolution.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::StageIncomplete { .. } | Self::ConflictOpen { .. }
        )
    }
}
