use crate::error::AppError;
use crate::infra::{build_service, register_roster};
use chrono::{Duration, NaiveDate, TimeZone, Utc};
use clap::Args;
use judging::workflows::judging::{
    AdvanceOutcome, Award, ConflictUpdate, CriterionValue, EvaluationInput, FixedClock,
    InMemoryJudgingService, JudgeId, PipelinePolicy, RankingConfig, ScaleType, Stage,
    SubmissionId,
};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

const PANEL: [&str; 3] = ["ana", "bo", "chen"];
const BASE_SCORES: [f64; 6] = [8.5, 7.0, 7.5, 6.0, 9.0, 6.5];

#[derive(Args, Debug, Default)]
pub(crate) struct DemoArgs {
    /// Criteria CSV export to load instead of the bundled defaults.
    #[arg(long)]
    pub(crate) criteria_csv: Option<PathBuf>,
    /// Number of synthetic entries to push through the pipeline.
    #[arg(long, default_value_t = 4)]
    pub(crate) entries: usize,
    /// Only print the leaderboard for this category.
    #[arg(long)]
    pub(crate) category: Option<String>,
    /// Competition opening date (YYYY-MM-DD). Drives every recorded timestamp.
    #[arg(long, value_parser = parse_date)]
    pub(crate) opening: Option<NaiveDate>,
    /// Skip the benchmark calibration portion of the demo.
    #[arg(long)]
    pub(crate) skip_calibration: bool,
}

pub(crate) fn parse_date(raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|err| format!("failed to parse '{raw}' as YYYY-MM-DD ({err})"))
}

fn demo_policy() -> PipelinePolicy {
    PipelinePolicy {
        ranking: RankingConfig {
            categories: vec!["Film".to_string(), "Animation".to_string()],
            awards: vec![
                Award {
                    id: "best-film".to_string(),
                    name: "Best Film".to_string(),
                    category: Some("Film".to_string()),
                    minimum_score: 7.0,
                },
                Award {
                    id: "jury-prize".to_string(),
                    name: "Jury Prize".to_string(),
                    category: None,
                    minimum_score: 8.0,
                },
            ],
        },
        ..PipelinePolicy::default()
    }
}

pub(crate) fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let DemoArgs {
        criteria_csv,
        entries,
        category,
        opening,
        skip_calibration,
    } = args;

    let opening = opening.unwrap_or_else(|| Utc::now().date_naive());
    let start = Utc.from_utc_datetime(&opening.and_hms_opt(9, 0, 0).unwrap_or_default());
    let clock = Arc::new(FixedClock::new(start));
    let service = build_service(demo_policy(), criteria_csv.as_deref())?.with_clock(clock.clone());
    register_roster(&service, PANEL.into_iter().chain(["dara:Animation"]));

    println!("Judging pipeline demo (opening {opening})");
    let mut ids = Vec::with_capacity(entries);
    for index in 0..entries {
        let category = if index % 2 == 0 { "Film" } else { "Animation" };
        let submission = service.register_submission(
            SubmissionId(format!("entry-{:03}", index + 1)),
            category,
        )?;
        println!("- Registered {} ({})", submission.id, submission.category);
        ids.push(submission.id);
        clock.advance(Duration::minutes(5));
    }

    for stage in Stage::ordered() {
        println!("\n{stage}");
        for (index, id) in ids.iter().enumerate() {
            let base = BASE_SCORES[index % BASE_SCORES.len()];
            run_stage(&service, &clock, id, stage, base, index == 1)?;
        }
    }

    if !skip_calibration {
        run_calibration(&service)?;
    }

    let leaderboard = service.leaderboard(category.as_deref())?;
    println!(
        "\nLeaderboard{}",
        category
            .as_deref()
            .map(|name| format!(" ({name})"))
            .unwrap_or_default()
    );
    for entry in &leaderboard {
        println!(
            "  {:>2}. {} [{}] overall {:.2} | finals {:.2}",
            entry.rank,
            entry.submission_id,
            entry.category,
            entry.final_score,
            entry.finals_score.unwrap_or_default()
        );
    }

    println!("\nAwards");
    for award in &service.policy().ranking.awards {
        let eligible = service.award_eligibility(&award.id)?;
        match eligible.first() {
            Some(winner) => {
                let assignment = service.assign_award(
                    &award.id,
                    &winner.submission_id,
                    "demo-admin",
                    "highest eligible score",
                )?;
                println!(
                    "- {}: {} ({:.2}) from {} eligible",
                    award.name,
                    assignment.submission_id,
                    assignment.final_score,
                    eligible.len()
                );
            }
            None => println!("- {}: no eligible entries", award.name),
        }
    }

    Ok(())
}

fn run_stage(
    service: &InMemoryJudgingService,
    clock: &FixedClock,
    id: &SubmissionId,
    stage: Stage,
    base: f64,
    disputed: bool,
) -> Result<(), AppError> {
    let quorum = service.policy().quorum_for(stage);
    for (position, judge) in PANEL.iter().take(quorum).enumerate() {
        // One disputed entry gets an outlier at Preliminary.
        let value = if disputed && stage == Stage::Preliminary && position == 1 {
            base + 2.5
        } else {
            base
        };
        let receipt = service.submit_evaluation(EvaluationInput {
            judge_id: JudgeId(judge.to_string()),
            submission_id: id.clone(),
            stage,
            scores: scores_for(service, stage, value)?,
            notes: None,
        })?;
        clock.advance(Duration::minutes(1));

        if let ConflictUpdate::Opened(case) = &receipt.conflict {
            println!(
                "  ! {} flagged: {} apart, requesting tie-breaker",
                id, case.score_delta
            );
            let tie_breaker = PANEL[quorum % PANEL.len()];
            let follow_up = service.submit_evaluation(EvaluationInput {
                judge_id: JudgeId(tie_breaker.to_string()),
                submission_id: id.clone(),
                stage,
                scores: scores_for(service, stage, base)?,
                notes: Some("tie-breaker".to_string()),
            })?;
            if let ConflictUpdate::Resolved(resolved) = follow_up.conflict {
                println!("  ! {} resolved by {}", resolved.id, tie_breaker);
            }
        }
    }

    match service.advance(id)? {
        AdvanceOutcome::Advanced { to, score, .. } => {
            println!("  {} -> {} at {:.2}", id, to, score.score)
        }
        AdvanceOutcome::Completed { score } => {
            println!("  {} completed at {:.2}", id, score.score)
        }
        AdvanceOutcome::Eliminated { score, minimum, .. } => println!(
            "  {} eliminated at {:.2} (gate {:.2})",
            id, score.score, minimum
        ),
        AdvanceOutcome::AlreadyAdvanced { stage, .. } => {
            println!("  {} already past {}", id, stage)
        }
    }
    Ok(())
}

fn run_calibration(service: &InMemoryJudgingService) -> Result<(), AppError> {
    println!("\nCalibration");
    let benchmark_id = SubmissionId("benchmark-001".to_string());
    let reference = scores_for(service, Stage::Detailed, 6.0)?;
    let benchmark = service.register_benchmark(benchmark_id.clone(), Stage::Detailed, reference)?;
    println!(
        "- Benchmark {} reference {:.2}",
        benchmark.submission_id, benchmark.reference_score
    );

    for (judge, value) in [("ana", 6.5), ("dara", 8.0)] {
        let receipt = service.submit_evaluation(EvaluationInput {
            judge_id: JudgeId(judge.to_string()),
            submission_id: benchmark_id.clone(),
            stage: Stage::Detailed,
            scores: scores_for(service, Stage::Detailed, value)?,
            notes: None,
        })?;
        if let Some(record) = receipt.calibration {
            println!(
                "  {}: deviation {:+.1}% -> {}",
                record.judge_id,
                record.deviation * 100.0,
                record.status.label()
            );
        }
    }
    Ok(())
}

/// Fills every required criterion of the stage with `value`, snapped to the criterion's scale.
fn scores_for(
    service: &InMemoryJudgingService,
    stage: Stage,
    value: f64,
) -> Result<BTreeMap<String, CriterionValue>, AppError> {
    let criteria = service.criteria(stage)?;
    let mut scores = BTreeMap::new();
    for criterion in criteria.required() {
        let entry = match criterion.scale {
            ScaleType::Numeric { min, max, step } => {
                let clamped = value.clamp(min, max);
                let snapped = if step > 0.0 {
                    min + ((clamped - min) / step).round() * step
                } else {
                    clamped
                };
                CriterionValue::Numeric(snapped.min(max))
            }
            ScaleType::Boolean => CriterionValue::Boolean(true),
            ScaleType::FreeText => CriterionValue::Text("demo".to_string()),
        };
        scores.insert(criterion.id.clone(), entry);
    }
    Ok(scores)
}
