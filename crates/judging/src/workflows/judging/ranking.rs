use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::{Mutex, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::domain::{Stage, StageScore, Submission, SubmissionId, SubmissionStatus};
use super::scoring::ScoreAggregator;

/// Prize definition supplied by the configuration surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Award {
    pub id: String,
    pub name: String,
    /// `None` makes the award open to every category.
    #[serde(default)]
    pub category: Option<String>,
    pub minimum_score: f64,
}

/// Static configuration handed to the engine at construction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RankingConfig {
    /// Known categories. Empty accepts any category.
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub awards: Vec<Award>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankingEntry {
    pub submission_id: SubmissionId,
    pub rank: usize,
    pub final_score: f64,
    pub category: String,
    pub finals_score: Option<f64>,
    pub semifinals_score: Option<f64>,
    pub created_at: DateTime<Utc>,
}

/// A submission and its stage scores as read from the repository.
#[derive(Debug, Clone)]
pub struct RankingCandidate {
    pub submission: Submission,
    pub stage_scores: Vec<StageScore>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AwardAssignment {
    pub award_id: String,
    pub submission_id: SubmissionId,
    pub final_score: f64,
    pub actor: String,
    pub note: String,
    pub assigned_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LeaderboardSnapshot {
    pub generation: u64,
    pub computed_at: DateTime<Utc>,
    pub entries: Vec<RankingEntry>,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RankingError {
    #[error("unknown category '{0}'")]
    UnknownCategory(String),
    #[error("unknown award '{0}'")]
    UnknownAward(String),
    #[error("submission {submission_id} is not eligible for award '{award_id}'")]
    NotEligible {
        award_id: String,
        submission_id: SubmissionId,
    },
    #[error("award '{award_id}' already assigned to {submission_id}")]
    AwardAlreadyAssigned {
        award_id: String,
        submission_id: SubmissionId,
    },
}

#[derive(Debug)]
pub struct RankingEngine {
    config: RankingConfig,
    aggregator: ScoreAggregator,
    assignments: Mutex<BTreeMap<String, AwardAssignment>>,
    snapshot: RwLock<Option<LeaderboardSnapshot>>,
}

impl RankingEngine {
    pub fn new(config: RankingConfig, aggregator: ScoreAggregator) -> Self {
        Self {
            config,
            aggregator,
            assignments: Mutex::new(BTreeMap::new()),
            snapshot: RwLock::new(None),
        }
    }

    pub fn config(&self) -> &RankingConfig {
        &self.config
    }

    pub fn award(&self, award_id: &str) -> Result<&Award, RankingError> {
        self.config
            .awards
            .iter()
            .find(|award| award.id == award_id)
            .ok_or_else(|| RankingError::UnknownAward(award_id.to_string()))
    }

    /// Ranks completed submissions, optionally within one category.
    ///
    /// Ranks are dense and distinct because the ordering is total.
    pub fn compute_leaderboard(
        &self,
        candidates: &[RankingCandidate],
        category: Option<&str>,
    ) -> Result<Vec<RankingEntry>, RankingError> {
        if let Some(category) = category {
            self.ensure_known_category(category)?;
        }

        let mut entries: Vec<RankingEntry> = candidates
            .iter()
            .filter(|candidate| candidate.submission.status == SubmissionStatus::Completed)
            .filter(|candidate| {
                category
                    .map(|wanted| candidate.submission.category.eq_ignore_ascii_case(wanted))
                    .unwrap_or(true)
            })
            .filter_map(|candidate| self.entry_for(candidate))
            .collect();

        entries.sort_by(compare_entries);
        for (index, entry) in entries.iter_mut().enumerate() {
            entry.rank = index + 1;
        }
        Ok(entries)
    }

    /// Qualifying submissions for an award, best first. Does not pick a winner.
    pub fn evaluate_award_eligibility(
        &self,
        award: &Award,
        candidates: &[RankingCandidate],
    ) -> Result<Vec<RankingEntry>, RankingError> {
        let leaderboard = self.compute_leaderboard(candidates, award.category.as_deref())?;
        Ok(leaderboard
            .into_iter()
            .filter(|entry| entry.final_score + SCORE_RESOLUTION >= award.minimum_score)
            .collect())
    }

    /// Explicit, audited assignment of an award to one eligible submission.
    pub fn assign_award(
        &self,
        award_id: &str,
        submission_id: &SubmissionId,
        actor: &str,
        note: &str,
        candidates: &[RankingCandidate],
        now: DateTime<Utc>,
    ) -> Result<AwardAssignment, RankingError> {
        let award = self.award(award_id)?;
        let eligible = self.evaluate_award_eligibility(award, candidates)?;
        let entry = eligible
            .iter()
            .find(|entry| &entry.submission_id == submission_id)
            .ok_or_else(|| RankingError::NotEligible {
                award_id: award_id.to_string(),
                submission_id: submission_id.clone(),
            })?;

        let mut guard = self.assignments.lock().expect("award mutex poisoned");
        if let Some(existing) = guard.get(award_id) {
            return Err(RankingError::AwardAlreadyAssigned {
                award_id: award_id.to_string(),
                submission_id: existing.submission_id.clone(),
            });
        }

        let assignment = AwardAssignment {
            award_id: award_id.to_string(),
            submission_id: submission_id.clone(),
            final_score: entry.final_score,
            actor: actor.to_string(),
            note: note.to_string(),
            assigned_at: now,
        };
        guard.insert(award_id.to_string(), assignment.clone());

        info!(award = award_id, submission = %submission_id, actor, "award assigned");
        Ok(assignment)
    }

    pub fn assignments(&self) -> Vec<AwardAssignment> {
        let guard = self.assignments.lock().expect("award mutex poisoned");
        guard.values().cloned().collect()
    }

    /// Recomputes the overall leaderboard snapshot served to read-only collaborators.
    ///
    /// `load` runs under the snapshot write lock, so a later generation always reflects
    /// candidates read after every earlier one.
    pub fn refresh<F, Err>(&self, load: F, now: DateTime<Utc>) -> Result<LeaderboardSnapshot, Err>
    where
        F: FnOnce() -> Result<Vec<RankingCandidate>, Err>,
        Err: From<RankingError>,
    {
        let mut guard = self.snapshot.write().expect("leaderboard lock poisoned");
        let candidates = load()?;
        let entries = self.compute_leaderboard(&candidates, None)?;
        let generation = guard
            .as_ref()
            .map(|snapshot| snapshot.generation + 1)
            .unwrap_or(1);
        let snapshot = LeaderboardSnapshot {
            generation,
            computed_at: now,
            entries,
        };
        *guard = Some(snapshot.clone());
        Ok(snapshot)
    }

    pub fn latest(&self) -> Option<LeaderboardSnapshot> {
        let guard = self.snapshot.read().expect("leaderboard lock poisoned");
        guard.clone()
    }

    fn ensure_known_category(&self, category: &str) -> Result<(), RankingError> {
        if self.config.categories.is_empty()
            || self
                .config
                .categories
                .iter()
                .any(|known| known.eq_ignore_ascii_case(category))
        {
            Ok(())
        } else {
            Err(RankingError::UnknownCategory(category.to_string()))
        }
    }

    fn entry_for(&self, candidate: &RankingCandidate) -> Option<RankingEntry> {
        let final_score = self.aggregator.overall_score(&candidate.stage_scores)?;
        let frozen_score = |stage: Stage| {
            candidate
                .stage_scores
                .iter()
                .find(|score| score.stage == stage && score.frozen)
                .map(|score| score.score)
        };

        Some(RankingEntry {
            submission_id: candidate.submission.id.clone(),
            rank: 0,
            final_score,
            category: candidate.submission.category.clone(),
            finals_score: frozen_score(Stage::Finals),
            semifinals_score: frozen_score(Stage::Semifinals),
            created_at: candidate.submission.created_at,
        })
    }
}

/// Scores closer than this rank as equal; stage means are float sums whose last bits depend
/// on the order evaluations arrived in.
const SCORE_RESOLUTION: f64 = 1e-9;

fn score_key(score: Option<f64>) -> i64 {
    score
        .map(|value| (value / SCORE_RESOLUTION).round() as i64)
        .unwrap_or(i64::MIN)
}

/// Final score desc, then Finals desc, Semifinals desc, earliest creation, then id.
fn compare_entries(a: &RankingEntry, b: &RankingEntry) -> Ordering {
    score_key(Some(b.final_score))
        .cmp(&score_key(Some(a.final_score)))
        .then_with(|| score_key(b.finals_score).cmp(&score_key(a.finals_score)))
        .then_with(|| score_key(b.semifinals_score).cmp(&score_key(a.semifinals_score)))
        .then_with(|| a.created_at.cmp(&b.created_at))
        .then_with(|| a.submission_id.cmp(&b.submission_id))
}
