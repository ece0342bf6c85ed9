//! Multi-stage, multi-judge evaluation pipeline.
//!
//! Submissions move forward through a fixed stage order. Judges record evaluations that are
//! scored against versioned criteria, compared for disagreement, and, on benchmark
//! submissions, checked for calibration drift. Completed submissions feed the leaderboard.

pub mod calibration;
pub mod clock;
pub mod conflict;
pub mod criteria;
pub mod domain;
mod locks;
pub mod memory;
pub mod policy;
pub mod ranking;
pub mod repository;
pub mod scoring;
pub mod service;

#[cfg(test)]
mod tests;

pub use calibration::{
    Benchmark, BenchmarkSample, CalibrationError, CalibrationMonitor, CalibrationPolicy,
    CalibrationRecord, CalibrationStatus,
};
pub use clock::{Clock, FixedClock, SystemClock};
pub use conflict::{
    ConflictCase, ConflictDetector, ConflictError, ConflictResolution, ConflictStatus,
    ConflictUpdate,
};
pub use criteria::{
    CriteriaError, CriteriaImportError, CriteriaImporter, CriteriaRegistry, CriteriaSet,
    Criterion, ScaleType, REQUIRED_WEIGHT_TOTAL,
};
pub use domain::{
    AdvanceOutcome, ConflictId, CriterionValue, Evaluation, EvaluationId, EvaluationInput,
    EvaluationKey, Judge, JudgeId, Stage, StageScore, Submission, SubmissionId, SubmissionStatus,
    SubmissionStatusView,
};
pub use memory::{InMemoryEvaluationStore, InMemorySubmissionRepository};
pub use policy::{PipelinePolicy, PolicyError};
pub use ranking::{
    Award, AwardAssignment, LeaderboardSnapshot, RankingCandidate, RankingConfig, RankingEngine,
    RankingEntry, RankingError,
};
pub use repository::{AuditEntry, EvaluationStore, RepositoryError, SubmissionRepository};
pub use scoring::{ScoreAggregator, ScoreBreakdown, ScoreComponent, ScoringConfig, ScoringError};
pub use service::{
    ErrorKind, EvaluationCorrection, EvaluationReceipt, JudgingService, PipelineError,
};

/// Service wired to the in-process stores.
pub type InMemoryJudgingService =
    JudgingService<InMemoryEvaluationStore, InMemorySubmissionRepository>;

impl InMemoryJudgingService {
    pub fn in_memory(policy: PipelinePolicy) -> Result<Self, PipelineError> {
        JudgingService::new(
            std::sync::Arc::new(CriteriaRegistry::new()),
            std::sync::Arc::new(InMemoryEvaluationStore::default()),
            std::sync::Arc::new(InMemorySubmissionRepository::default()),
            policy,
        )
    }
}
