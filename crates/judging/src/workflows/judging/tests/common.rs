use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};

use crate::workflows::judging::{
    AdvanceOutcome, Award, Criterion, CriterionValue, EvaluationInput, EvaluationReceipt,
    FixedClock, InMemoryJudgingService, Judge, JudgeId, PipelinePolicy, RankingConfig, ScaleType,
    Stage, SubmissionId,
};

pub(super) const JUDGES: [&str; 5] = ["judge-1", "judge-2", "judge-3", "judge-4", "judge-5"];

pub(super) fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 4, 7, 8, 30, 0)
        .single()
        .expect("valid start time")
}

/// Craft 60 + originality 40, both 0–10 in tenths, plus an unweighted note.
pub(super) fn stage_criteria(stage: Stage) -> Vec<Criterion> {
    let numeric = |id: &str, name: &str, weight: u8| Criterion {
        id: id.to_string(),
        name: name.to_string(),
        description: String::new(),
        stages: BTreeSet::from([stage]),
        scale: ScaleType::Numeric {
            min: 0.0,
            max: 10.0,
            step: 0.1,
        },
        weight,
        required: true,
        category: String::new(),
    };

    vec![
        numeric("craft", "Craft", 60),
        numeric("originality", "Originality", 40),
        Criterion {
            id: "comments".to_string(),
            name: "Comments".to_string(),
            description: "Free-form feedback for the entrant".to_string(),
            stages: BTreeSet::from([stage]),
            scale: ScaleType::FreeText,
            weight: 0,
            required: false,
            category: String::new(),
        },
    ]
}

/// Values that make the weighted score equal `score`.
pub(super) fn uniform_scores(score: f64) -> BTreeMap<String, CriterionValue> {
    BTreeMap::from([
        ("craft".to_string(), CriterionValue::Numeric(score)),
        ("originality".to_string(), CriterionValue::Numeric(score)),
    ])
}

pub(super) fn ranking_config() -> RankingConfig {
    RankingConfig {
        categories: vec!["Film".to_string(), "Photo".to_string()],
        awards: vec![
            Award {
                id: "best-film".to_string(),
                name: "Best Film".to_string(),
                category: Some("Film".to_string()),
                minimum_score: 7.0,
            },
            Award {
                id: "grand-prize".to_string(),
                name: "Grand Prize".to_string(),
                category: None,
                minimum_score: 8.0,
            },
        ],
    }
}

pub(super) fn policy() -> PipelinePolicy {
    PipelinePolicy {
        ranking: ranking_config(),
        ..PipelinePolicy::default()
    }
}

pub(super) fn build_service(policy: PipelinePolicy) -> (InMemoryJudgingService, Arc<FixedClock>) {
    let clock = Arc::new(FixedClock::new(start_time()));
    let service = InMemoryJudgingService::in_memory(policy)
        .expect("policy is valid")
        .with_clock(clock.clone());

    for stage in Stage::ordered() {
        service
            .register_criteria(stage, stage_criteria(stage))
            .expect("criteria register");
    }
    for id in JUDGES {
        service.register_judge(Judge {
            id: JudgeId(id.to_string()),
            name: id.replace('-', " "),
            categories: Vec::new(),
            active: true,
        });
    }
    service.register_judge(Judge {
        id: JudgeId("photo-judge".to_string()),
        name: "Photo specialist".to_string(),
        categories: vec!["Photo".to_string()],
        active: true,
    });

    (service, clock)
}

pub(super) fn ingest(
    service: &InMemoryJudgingService,
    clock: &FixedClock,
    id: &str,
    category: &str,
) -> SubmissionId {
    clock.advance(Duration::minutes(1));
    service
        .register_submission(SubmissionId(id.to_string()), category)
        .expect("submission registers")
        .id
}

pub(super) fn evaluation(
    judge: &str,
    submission: &SubmissionId,
    stage: Stage,
    score: f64,
) -> EvaluationInput {
    EvaluationInput {
        judge_id: JudgeId(judge.to_string()),
        submission_id: submission.clone(),
        stage,
        scores: uniform_scores(score),
        notes: None,
    }
}

pub(super) fn submit(
    service: &InMemoryJudgingService,
    judge: &str,
    submission: &SubmissionId,
    stage: Stage,
    score: f64,
) -> EvaluationReceipt {
    service
        .submit_evaluation(evaluation(judge, submission, stage, score))
        .expect("evaluation accepted")
}

/// Scores the current stage with one judge per value, then advances.
pub(super) fn score_and_advance(
    service: &InMemoryJudgingService,
    submission: &SubmissionId,
    scores: &[f64],
) -> AdvanceOutcome {
    let stage = service
        .submission(submission)
        .expect("submission exists")
        .stage;
    for (judge, score) in JUDGES.iter().zip(scores) {
        submit(service, judge, submission, stage, *score);
    }
    service.advance(submission).expect("stage advances")
}

/// Drives a submission through every stage with the same score from each judge.
pub(super) fn complete(service: &InMemoryJudgingService, submission: &SubmissionId, score: f64) {
    for stage in Stage::ordered() {
        let quorum = service.policy().quorum_for(stage);
        score_and_advance(service, submission, &vec![score; quorum]);
    }
}

pub(super) fn approx(actual: f64, expected: f64) -> bool {
    (actual - expected).abs() < 1e-6
}
