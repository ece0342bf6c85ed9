//! Judge calibration against benchmark submissions with known reference scores.
//!
//! Policy: a judge's deviation is the signed mean of their latest `window` benchmark deviations,
//! each computed as `(judge - reference) / reference` on weighted scores.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::criteria::CriteriaSet;
use super::domain::{CriterionValue, Evaluation, EvaluationId, JudgeId, Stage, SubmissionId};
use super::scoring::{ScoreAggregator, ScoringError};

/// Drift tolerance and sample window for calibration records.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationPolicy {
    /// Maximum tolerated |deviation| as a fraction (0.10 = 10%).
    pub threshold: f64,
    /// Number of most recent benchmark evaluations averaged per judge.
    pub window: usize,
}

impl Default for CalibrationPolicy {
    fn default() -> Self {
        Self {
            threshold: 0.10,
            window: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Benchmark {
    pub submission_id: SubmissionId,
    pub stage: Stage,
    pub reference_scores: BTreeMap<String, CriterionValue>,
    pub reference_score: f64,
    pub criteria_version: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationStatus {
    Calibrated,
    NeedsCalibration,
}

impl CalibrationStatus {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Calibrated => "calibrated",
            Self::NeedsCalibration => "needs_calibration",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationRecord {
    pub judge_id: JudgeId,
    /// Signed fraction; 0.2 means scoring 20% above reference on average.
    pub deviation: f64,
    pub sample_count: usize,
    pub status: CalibrationStatus,
    pub computed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkSample {
    pub benchmark_id: SubmissionId,
    pub evaluation_id: EvaluationId,
    pub judge_score: f64,
    pub reference_score: f64,
    pub deviation: f64,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CalibrationError {
    #[error("benchmark {submission_id} is invalid: {reason}")]
    InvalidBenchmark {
        submission_id: SubmissionId,
        reason: String,
    },
    #[error("benchmark {0} already registered")]
    DuplicateBenchmark(SubmissionId),
    #[error("{0} is not a benchmark submission")]
    UnknownBenchmark(SubmissionId),
    #[error("benchmark {submission_id} is scored at {expected}, evaluation targets {found}")]
    StageMismatch {
        submission_id: SubmissionId,
        expected: Stage,
        found: Stage,
    },
    #[error("evaluation {0} has no weighted score")]
    Unscored(EvaluationId),
    #[error(transparent)]
    Scoring(#[from] ScoringError),
}

#[derive(Debug, Default)]
struct CalibrationState {
    samples: HashMap<JudgeId, VecDeque<BenchmarkSample>>,
    records: BTreeMap<JudgeId, CalibrationRecord>,
}

#[derive(Debug)]
pub struct CalibrationMonitor {
    policy: CalibrationPolicy,
    benchmarks: RwLock<HashMap<SubmissionId, Benchmark>>,
    state: Mutex<CalibrationState>,
}

impl CalibrationMonitor {
    pub fn new(policy: CalibrationPolicy) -> Self {
        Self {
            policy,
            benchmarks: RwLock::new(HashMap::new()),
            state: Mutex::new(CalibrationState::default()),
        }
    }

    pub fn policy(&self) -> CalibrationPolicy {
        self.policy
    }

    /// Registers a benchmark, scoring its reference values with the stage criteria.
    pub fn register_benchmark(
        &self,
        submission_id: SubmissionId,
        reference_scores: BTreeMap<String, CriterionValue>,
        criteria: &CriteriaSet,
        aggregator: &ScoreAggregator,
    ) -> Result<Benchmark, CalibrationError> {
        let breakdown = aggregator.score_evaluation(criteria, &reference_scores)?;
        if breakdown.weighted_score <= 0.0 {
            return Err(CalibrationError::InvalidBenchmark {
                submission_id,
                reason: "reference score must be above zero".to_string(),
            });
        }

        let benchmark = Benchmark {
            submission_id: submission_id.clone(),
            stage: criteria.stage,
            reference_scores,
            reference_score: breakdown.weighted_score,
            criteria_version: criteria.version,
        };

        let mut guard = self.benchmarks.write().expect("benchmark lock poisoned");
        if guard.contains_key(&submission_id) {
            return Err(CalibrationError::DuplicateBenchmark(submission_id));
        }
        guard.insert(submission_id, benchmark.clone());
        Ok(benchmark)
    }

    pub fn is_benchmark(&self, submission_id: &SubmissionId) -> bool {
        let guard = self.benchmarks.read().expect("benchmark lock poisoned");
        guard.contains_key(submission_id)
    }

    pub fn benchmark(&self, submission_id: &SubmissionId) -> Option<Benchmark> {
        let guard = self.benchmarks.read().expect("benchmark lock poisoned");
        guard.get(submission_id).cloned()
    }

    /// Folds a judge's benchmark evaluation into their calibration record.
    pub fn record_benchmark_evaluation(
        &self,
        evaluation: &Evaluation,
        now: DateTime<Utc>,
    ) -> Result<CalibrationRecord, CalibrationError> {
        let benchmark = self
            .benchmark(&evaluation.submission_id)
            .ok_or_else(|| CalibrationError::UnknownBenchmark(evaluation.submission_id.clone()))?;
        if benchmark.stage != evaluation.stage {
            return Err(CalibrationError::StageMismatch {
                submission_id: benchmark.submission_id,
                expected: benchmark.stage,
                found: evaluation.stage,
            });
        }
        let judge_score = evaluation
            .weighted_score
            .ok_or_else(|| CalibrationError::Unscored(evaluation.id.clone()))?;

        let deviation = (judge_score - benchmark.reference_score) / benchmark.reference_score;
        let sample = BenchmarkSample {
            benchmark_id: benchmark.submission_id.clone(),
            evaluation_id: evaluation.id.clone(),
            judge_score,
            reference_score: benchmark.reference_score,
            deviation,
            recorded_at: now,
        };

        let mut guard = self.state.lock().expect("calibration mutex poisoned");
        let samples = guard
            .samples
            .entry(evaluation.judge_id.clone())
            .or_default();
        samples.push_back(sample);
        while samples.len() > self.policy.window.max(1) {
            samples.pop_front();
        }

        let sample_count = samples.len();
        let mean = samples.iter().map(|sample| sample.deviation).sum::<f64>() / sample_count as f64;
        let status = if mean.abs() > self.policy.threshold {
            CalibrationStatus::NeedsCalibration
        } else {
            CalibrationStatus::Calibrated
        };

        let record = CalibrationRecord {
            judge_id: evaluation.judge_id.clone(),
            deviation: mean,
            sample_count,
            status,
            computed_at: now,
        };
        let previous = guard
            .records
            .insert(record.judge_id.clone(), record.clone())
            .map(|previous| previous.status);

        match (previous, status) {
            (Some(CalibrationStatus::NeedsCalibration), CalibrationStatus::NeedsCalibration) => {}
            (_, CalibrationStatus::NeedsCalibration) => warn!(
                judge = %record.judge_id,
                deviation = record.deviation,
                "judge drifted from benchmark references"
            ),
            (Some(CalibrationStatus::NeedsCalibration), CalibrationStatus::Calibrated) => info!(
                judge = %record.judge_id,
                deviation = record.deviation,
                "judge back within calibration threshold"
            ),
            _ => {}
        }

        Ok(record)
    }

    pub fn record(&self, judge_id: &JudgeId) -> Option<CalibrationRecord> {
        let guard = self.state.lock().expect("calibration mutex poisoned");
        guard.records.get(judge_id).cloned()
    }

    pub fn records(&self) -> Vec<CalibrationRecord> {
        let guard = self.state.lock().expect("calibration mutex poisoned");
        guard.records.values().cloned().collect()
    }

    /// Judges the assignment service should steer toward recalibration.
    pub fn flagged(&self) -> Vec<CalibrationRecord> {
        self.records()
            .into_iter()
            .filter(|record| record.status == CalibrationStatus::NeedsCalibration)
            .collect()
    }

    pub fn samples(&self, judge_id: &JudgeId) -> Vec<BenchmarkSample> {
        let guard = self.state.lock().expect("calibration mutex poisoned");
        guard
            .samples
            .get(judge_id)
            .map(|samples| samples.iter().cloned().collect())
            .unwrap_or_default()
    }
}

impl Default for CalibrationMonitor {
    fn default() -> Self {
        Self::new(CalibrationPolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflows::judging::criteria::{Criterion, ScaleType};
    use std::collections::BTreeSet;

    fn criteria() -> CriteriaSet {
        CriteriaSet {
            stage: Stage::Preliminary,
            version: 1,
            criteria: vec![Criterion {
                id: "quality".to_string(),
                name: "Quality".to_string(),
                description: String::new(),
                stages: BTreeSet::from([Stage::Preliminary]),
                scale: ScaleType::Numeric {
                    min: 0.0,
                    max: 10.0,
                    step: 0.0,
                },
                weight: 100,
                required: true,
                category: String::new(),
            }],
            registered_at: Utc::now(),
        }
    }

    fn quality(value: f64) -> BTreeMap<String, CriterionValue> {
        BTreeMap::from([("quality".to_string(), CriterionValue::Numeric(value))])
    }

    fn benchmark_evaluation(id: &str, judge: &str, score: f64) -> Evaluation {
        Evaluation {
            id: EvaluationId(id.to_string()),
            judge_id: JudgeId(judge.to_string()),
            submission_id: SubmissionId("bench-1".to_string()),
            stage: Stage::Preliminary,
            scores: quality(score),
            notes: None,
            criteria_version: 1,
            weighted_score: Some(score),
            submitted_at: Utc::now(),
            draft: false,
            superseded_by: None,
        }
    }

    fn monitor(window: usize) -> CalibrationMonitor {
        let monitor = CalibrationMonitor::new(CalibrationPolicy {
            threshold: 0.10,
            window,
        });
        monitor
            .register_benchmark(
                SubmissionId("bench-1".to_string()),
                quality(5.0),
                &criteria(),
                &ScoreAggregator::default(),
            )
            .expect("benchmark registers");
        monitor
    }

    #[test]
    fn twenty_percent_above_reference_needs_calibration() {
        let monitor = monitor(5);
        let record = monitor
            .record_benchmark_evaluation(&benchmark_evaluation("e1", "j-1", 6.0), Utc::now())
            .expect("recorded");

        assert!((record.deviation - 0.2).abs() < 1e-9);
        assert_eq!(record.status, CalibrationStatus::NeedsCalibration);
        assert_eq!(monitor.flagged().len(), 1);
    }

    #[test]
    fn small_deviation_stays_calibrated() {
        let monitor = monitor(5);
        let record = monitor
            .record_benchmark_evaluation(&benchmark_evaluation("e1", "j-1", 5.25), Utc::now())
            .expect("recorded");
        assert_eq!(record.status, CalibrationStatus::Calibrated);
    }

    #[test]
    fn only_the_latest_window_counts() {
        let monitor = monitor(2);
        let judge = JudgeId("j-1".to_string());
        monitor
            .record_benchmark_evaluation(&benchmark_evaluation("e1", "j-1", 8.0), Utc::now())
            .expect("recorded");
        monitor
            .record_benchmark_evaluation(&benchmark_evaluation("e2", "j-1", 5.0), Utc::now())
            .expect("recorded");
        let record = monitor
            .record_benchmark_evaluation(&benchmark_evaluation("e3", "j-1", 5.0), Utc::now())
            .expect("recorded");

        assert_eq!(record.sample_count, 2);
        assert!(record.deviation.abs() < 1e-9);
        assert_eq!(record.status, CalibrationStatus::Calibrated);
        assert_eq!(monitor.samples(&judge).len(), 2);
    }

    #[test]
    fn zero_reference_benchmarks_are_rejected() {
        let monitor = CalibrationMonitor::default();
        let err = monitor
            .register_benchmark(
                SubmissionId("bench-0".to_string()),
                quality(0.0),
                &criteria(),
                &ScoreAggregator::default(),
            )
            .expect_err("zero reference rejected");
        assert!(matches!(err, CalibrationError::InvalidBenchmark { .. }));
    }
}
