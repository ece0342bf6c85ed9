//! Judge disagreement detection.
//!
//! One open case per (submission, stage). While a case is pending, every further evaluation for
//! the key is treated as a tie-breaker.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::domain::{ConflictId, Evaluation, EvaluationId, Stage, SubmissionId};

const DELTA_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStatus {
    Pending,
    Resolved,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConflictResolution {
    /// An additional evaluation sided with the majority.
    TieBreaker { evaluation_id: EvaluationId },
    /// Recorded override by an administrator.
    Administrative { actor: String, note: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictCase {
    pub id: ConflictId,
    pub submission_id: SubmissionId,
    pub stage: Stage,
    pub evaluation_ids: Vec<EvaluationId>,
    /// Largest pairwise difference between the involved weighted scores.
    pub score_delta: f64,
    pub status: ConflictStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<ConflictResolution>,
    pub opened_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl ConflictCase {
    pub fn is_open(&self) -> bool {
        self.status == ConflictStatus::Pending
    }
}

/// What a recorded evaluation did to the conflict state of its key.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "change", content = "case", rename_all = "snake_case")]
pub enum ConflictUpdate {
    NoConflict,
    Opened(ConflictCase),
    Extended(ConflictCase),
    Resolved(ConflictCase),
}

impl ConflictUpdate {
    pub fn blocks_advancement(&self) -> bool {
        matches!(self, Self::Opened(_) | Self::Extended(_))
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConflictError {
    #[error("conflict case {0} not found")]
    NotFound(ConflictId),
    #[error("conflict case {0} is already resolved")]
    AlreadyResolved(ConflictId),
}

#[derive(Debug, Default)]
struct ConflictState {
    sequence: u64,
    cases: BTreeMap<ConflictId, ConflictCase>,
    open: HashMap<(SubmissionId, Stage), ConflictId>,
}

impl ConflictState {
    fn next_id(&mut self) -> ConflictId {
        self.sequence += 1;
        ConflictId(format!("conflict-{:06}", self.sequence))
    }
}

#[derive(Debug)]
pub struct ConflictDetector {
    /// Absolute disagreement, in display points, a pair may reach without opening a case.
    threshold: f64,
    state: Mutex<ConflictState>,
}

impl ConflictDetector {
    /// `threshold_fraction` is relative to the display scale range (0.15 of 0–10 = 1.5 points).
    pub fn new(threshold_fraction: f64, display_scale: f64) -> Self {
        Self {
            threshold: threshold_fraction * display_scale,
            state: Mutex::new(ConflictState::default()),
        }
    }

    /// Runs detection for a freshly recorded evaluation.
    ///
    /// `active` holds every evaluation currently counting for the key, `recorded` included.
    pub fn on_evaluation_recorded(
        &self,
        recorded: &Evaluation,
        active: &[Evaluation],
        now: DateTime<Utc>,
    ) -> ConflictUpdate {
        let Some(new_score) = recorded.weighted_score else {
            return ConflictUpdate::NoConflict;
        };
        let key = (recorded.submission_id.clone(), recorded.stage);
        let scored: Vec<(&EvaluationId, f64)> = active
            .iter()
            .filter(|evaluation| evaluation.is_active())
            .filter_map(|evaluation| evaluation.weighted_score.map(|score| (&evaluation.id, score)))
            .collect();

        let mut guard = self.state.lock().expect("conflict mutex poisoned");

        if let Some(case_id) = guard.open.get(&key).cloned() {
            return self.apply_tie_breaker(&mut guard, case_id, recorded, new_score, &scored, now);
        }

        let divergent: Vec<EvaluationId> = scored
            .iter()
            .filter(|(id, score)| {
                *id != &recorded.id && (new_score - score).abs() - self.threshold > DELTA_TOLERANCE
            })
            .map(|(id, _)| (*id).clone())
            .collect();
        if divergent.is_empty() {
            return ConflictUpdate::NoConflict;
        }

        let mut evaluation_ids = divergent;
        evaluation_ids.push(recorded.id.clone());
        let score_delta = max_spread(&scored, &evaluation_ids);
        let case = ConflictCase {
            id: guard.next_id(),
            submission_id: recorded.submission_id.clone(),
            stage: recorded.stage,
            evaluation_ids,
            score_delta,
            status: ConflictStatus::Pending,
            resolution: None,
            opened_at: now,
            resolved_at: None,
        };

        info!(
            case = %case.id,
            submission = %case.submission_id,
            stage = %case.stage,
            delta = case.score_delta,
            "conflict case opened"
        );
        guard.open.insert(key, case.id.clone());
        guard.cases.insert(case.id.clone(), case.clone());
        ConflictUpdate::Opened(case)
    }

    /// Runs detection for a correction that replaced `replaced`.
    ///
    /// A correction never counts as a tie-breaker: an open case keeps its pending status with
    /// the replacement swapped in and the spread recomputed.
    pub fn on_evaluation_corrected(
        &self,
        recorded: &Evaluation,
        replaced: &EvaluationId,
        active: &[Evaluation],
        now: DateTime<Utc>,
    ) -> ConflictUpdate {
        let key = (recorded.submission_id.clone(), recorded.stage);
        let mut guard = self.state.lock().expect("conflict mutex poisoned");
        let Some(case_id) = guard.open.get(&key).cloned() else {
            drop(guard);
            return self.on_evaluation_recorded(recorded, active, now);
        };
        let Some(case) = guard.cases.get_mut(&case_id) else {
            return ConflictUpdate::NoConflict;
        };

        case.evaluation_ids.retain(|id| id != replaced);
        if !case.evaluation_ids.contains(&recorded.id) {
            case.evaluation_ids.push(recorded.id.clone());
        }
        let scored: Vec<(&EvaluationId, f64)> = active
            .iter()
            .filter(|evaluation| evaluation.is_active())
            .filter_map(|evaluation| evaluation.weighted_score.map(|score| (&evaluation.id, score)))
            .collect();
        case.score_delta = max_spread(&scored, &case.evaluation_ids);

        info!(
            case = %case.id,
            replaced = %replaced,
            replacement = %recorded.id,
            delta = case.score_delta,
            "correction recorded on pending conflict"
        );
        ConflictUpdate::Extended(case.clone())
    }

    fn apply_tie_breaker(
        &self,
        state: &mut ConflictState,
        case_id: ConflictId,
        recorded: &Evaluation,
        new_score: f64,
        scored: &[(&EvaluationId, f64)],
        now: DateTime<Utc>,
    ) -> ConflictUpdate {
        let agreeing = scored
            .iter()
            .filter(|(_, score)| (new_score - score).abs() - self.threshold <= DELTA_TOLERANCE)
            .count();
        let majority = agreeing * 2 > scored.len();

        let Some(case) = state.cases.get_mut(&case_id) else {
            return ConflictUpdate::NoConflict;
        };
        if !case.evaluation_ids.contains(&recorded.id) {
            case.evaluation_ids.push(recorded.id.clone());
        }

        if majority {
            case.status = ConflictStatus::Resolved;
            case.resolution = Some(ConflictResolution::TieBreaker {
                evaluation_id: recorded.id.clone(),
            });
            case.resolved_at = Some(now);
            let resolved = case.clone();
            state.open.remove(&(resolved.submission_id.clone(), resolved.stage));
            info!(case = %resolved.id, tie_breaker = %recorded.id, "conflict resolved by tie-breaker");
            ConflictUpdate::Resolved(resolved)
        } else {
            let ids = case.evaluation_ids.clone();
            case.score_delta = max_spread(scored, &ids).max(case.score_delta);
            ConflictUpdate::Extended(case.clone())
        }
    }

    /// Closes a case through an explicit, recorded administrative decision.
    pub fn resolve_administratively(
        &self,
        case_id: &ConflictId,
        actor: &str,
        note: &str,
        now: DateTime<Utc>,
    ) -> Result<ConflictCase, ConflictError> {
        let mut guard = self.state.lock().expect("conflict mutex poisoned");
        let case = guard
            .cases
            .get_mut(case_id)
            .ok_or_else(|| ConflictError::NotFound(case_id.clone()))?;
        if !case.is_open() {
            return Err(ConflictError::AlreadyResolved(case_id.clone()));
        }

        case.status = ConflictStatus::Resolved;
        case.resolution = Some(ConflictResolution::Administrative {
            actor: actor.to_string(),
            note: note.to_string(),
        });
        case.resolved_at = Some(now);
        let resolved = case.clone();
        guard
            .open
            .remove(&(resolved.submission_id.clone(), resolved.stage));

        info!(case = %resolved.id, actor, "conflict resolved administratively");
        Ok(resolved)
    }

    pub fn open_case_for(&self, submission_id: &SubmissionId, stage: Stage) -> Option<ConflictCase> {
        let guard = self.state.lock().expect("conflict mutex poisoned");
        guard
            .open
            .get(&(submission_id.clone(), stage))
            .and_then(|id| guard.cases.get(id))
            .cloned()
    }

    pub fn case(&self, case_id: &ConflictId) -> Option<ConflictCase> {
        let guard = self.state.lock().expect("conflict mutex poisoned");
        guard.cases.get(case_id).cloned()
    }

    pub fn open_cases(&self) -> Vec<ConflictCase> {
        let guard = self.state.lock().expect("conflict mutex poisoned");
        guard
            .cases
            .values()
            .filter(|case| case.is_open())
            .cloned()
            .collect()
    }

    pub fn cases_for(&self, submission_id: &SubmissionId) -> Vec<ConflictCase> {
        let guard = self.state.lock().expect("conflict mutex poisoned");
        guard
            .cases
            .values()
            .filter(|case| &case.submission_id == submission_id)
            .cloned()
            .collect()
    }
}

fn max_spread(scored: &[(&EvaluationId, f64)], ids: &[EvaluationId]) -> f64 {
    let involved: Vec<f64> = scored
        .iter()
        .filter(|(id, _)| ids.contains(id))
        .map(|(_, score)| *score)
        .collect();
    let high = involved.iter().copied().fold(f64::MIN, f64::max);
    let low = involved.iter().copied().fold(f64::MAX, f64::min);
    if involved.is_empty() {
        0.0
    } else {
        high - low
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflows::judging::domain::JudgeId;

    fn evaluation(id: &str, score: f64) -> Evaluation {
        Evaluation {
            id: EvaluationId(id.to_string()),
            judge_id: JudgeId(format!("judge-{id}")),
            submission_id: SubmissionId("sub-1".to_string()),
            stage: Stage::Detailed,
            scores: BTreeMap::new(),
            notes: None,
            criteria_version: 1,
            weighted_score: Some(score),
            submitted_at: Utc::now(),
            draft: false,
            superseded_by: None,
        }
    }

    #[test]
    fn opens_a_case_when_delta_exceeds_threshold() {
        let detector = ConflictDetector::new(0.15, 10.0);
        let first = evaluation("e1", 9.0);
        let second = evaluation("e2", 6.0);

        assert_eq!(
            detector.on_evaluation_recorded(&first, &[first.clone()], Utc::now()),
            ConflictUpdate::NoConflict
        );
        let update = detector.on_evaluation_recorded(
            &second,
            &[first.clone(), second.clone()],
            Utc::now(),
        );

        let ConflictUpdate::Opened(case) = update else {
            panic!("expected a case, got {update:?}");
        };
        assert!((case.score_delta - 3.0).abs() < 1e-9);
        assert_eq!(case.evaluation_ids.len(), 2);
        assert!(detector
            .open_case_for(&SubmissionId("sub-1".to_string()), Stage::Detailed)
            .is_some());
    }

    #[test]
    fn deltas_at_the_threshold_do_not_conflict() {
        let detector = ConflictDetector::new(0.15, 10.0);
        let first = evaluation("e1", 7.0);
        let second = evaluation("e2", 8.5);
        let update =
            detector.on_evaluation_recorded(&second, &[first, second.clone()], Utc::now());
        assert_eq!(update, ConflictUpdate::NoConflict);
    }

    #[test]
    fn divergent_tie_breaker_extends_the_single_open_case() {
        let detector = ConflictDetector::new(0.15, 10.0);
        let a = evaluation("e1", 9.0);
        let b = evaluation("e2", 6.0);
        let c = evaluation("e3", 3.0);
        detector.on_evaluation_recorded(&b, &[a.clone(), b.clone()], Utc::now());
        let update =
            detector.on_evaluation_recorded(&c, &[a.clone(), b.clone(), c.clone()], Utc::now());

        let ConflictUpdate::Extended(case) = update else {
            panic!("expected extension, got {update:?}");
        };
        assert_eq!(case.evaluation_ids.len(), 3);
        assert!((case.score_delta - 6.0).abs() < 1e-9);
        assert_eq!(detector.open_cases().len(), 1);
    }

    #[test]
    fn agreeing_tie_breaker_resolves_the_case() {
        let detector = ConflictDetector::new(0.15, 10.0);
        let a = evaluation("e1", 9.0);
        let b = evaluation("e2", 6.0);
        let c = evaluation("e3", 8.6);
        detector.on_evaluation_recorded(&b, &[a.clone(), b.clone()], Utc::now());
        let update = detector.on_evaluation_recorded(&c, &[a, b, c.clone()], Utc::now());

        let ConflictUpdate::Resolved(case) = update else {
            panic!("expected resolution, got {update:?}");
        };
        assert_eq!(
            case.resolution,
            Some(ConflictResolution::TieBreaker {
                evaluation_id: c.id.clone()
            })
        );
        assert!(detector.open_cases().is_empty());
    }

    #[test]
    fn a_correction_from_a_disputing_judge_keeps_the_case_pending() {
        let detector = ConflictDetector::new(0.15, 10.0);
        let a = evaluation("e1", 9.0);
        let b = evaluation("e2", 6.0);
        detector.on_evaluation_recorded(&b, &[a.clone(), b.clone()], Utc::now());

        let corrected = Evaluation {
            id: EvaluationId("e3".to_string()),
            judge_id: b.judge_id.clone(),
            ..evaluation("e3", 9.0)
        };
        let update = detector.on_evaluation_corrected(
            &corrected,
            &b.id,
            &[a.clone(), corrected.clone()],
            Utc::now(),
        );

        let ConflictUpdate::Extended(case) = update else {
            panic!("expected the case to stay pending, got {update:?}");
        };
        assert!(case.is_open());
        assert!(case.resolution.is_none());
        assert_eq!(case.evaluation_ids, vec![a.id.clone(), corrected.id.clone()]);
        assert!(case.score_delta.abs() < 1e-9);
        assert_eq!(detector.open_cases().len(), 1);
    }

    #[test]
    fn administrative_resolution_is_recorded_once() {
        let detector = ConflictDetector::new(0.15, 10.0);
        let a = evaluation("e1", 9.0);
        let b = evaluation("e2", 2.0);
        let ConflictUpdate::Opened(case) =
            detector.on_evaluation_recorded(&b, &[a, b.clone()], Utc::now())
        else {
            panic!("case expected");
        };

        let resolved = detector
            .resolve_administratively(&case.id, "head-judge", "scores reviewed", Utc::now())
            .expect("resolves");
        assert_eq!(resolved.status, ConflictStatus::Resolved);
        assert!(matches!(
            resolved.resolution,
            Some(ConflictResolution::Administrative { .. })
        ));
        assert_eq!(
            detector.resolve_administratively(&case.id, "head-judge", "again", Utc::now()),
            Err(ConflictError::AlreadyResolved(case.id.clone()))
        );
    }
}
