use super::common::*;
use crate::workflows::judging::{
    AdvanceOutcome, ConflictError, ConflictResolution, ConflictStatus, ConflictUpdate, ErrorKind,
    EvaluationCorrection, PipelineError, Stage, SubmissionStatus,
};

#[test]
fn divergent_scores_open_a_case_and_block_advancement() {
    let (service, clock) = build_service(policy());
    let id = ingest(&service, &clock, "sub-001", "Film");
    submit(&service, "judge-1", &id, Stage::Triage, 9.0);
    let receipt = submit(&service, "judge-2", &id, Stage::Triage, 6.0);

    let case = match receipt.conflict {
        ConflictUpdate::Opened(case) => case,
        other => panic!("expected a new case, got {other:?}"),
    };
    assert!(approx(case.score_delta, 3.0));
    assert_eq!(case.evaluation_ids.len(), 2);
    assert_eq!(
        service.submission(&id).expect("exists").status,
        SubmissionStatus::Flagged
    );

    let err = service.advance(&id).expect_err("blocked");
    assert!(matches!(&err, PipelineError::ConflictOpen { case: open } if open == &case.id));
    assert_eq!(err.kind(), ErrorKind::ConflictOpen);
    assert_eq!(
        service.submission(&id).expect("exists").stage,
        Stage::Triage
    );
}

#[test]
fn a_delta_at_or_below_the_threshold_is_not_a_conflict() {
    let (service, clock) = build_service(policy());
    let id = ingest(&service, &clock, "sub-001", "Film");
    submit(&service, "judge-1", &id, Stage::Triage, 7.0);
    let receipt = submit(&service, "judge-2", &id, Stage::Triage, 8.5);

    assert_eq!(receipt.conflict, ConflictUpdate::NoConflict);
    assert!(service.open_conflicts().is_empty());
    assert!(matches!(
        service.advance(&id),
        Ok(AdvanceOutcome::Advanced { .. })
    ));
}

#[test]
fn tie_breaker_siding_with_the_majority_resolves_the_case() {
    let (service, clock) = build_service(policy());
    let id = ingest(&service, &clock, "sub-001", "Film");
    submit(&service, "judge-1", &id, Stage::Triage, 9.0);
    submit(&service, "judge-2", &id, Stage::Triage, 6.0);
    let receipt = submit(&service, "judge-3", &id, Stage::Triage, 8.6);

    match receipt.conflict {
        ConflictUpdate::Resolved(case) => {
            assert_eq!(case.status, ConflictStatus::Resolved);
            assert_eq!(
                case.resolution,
                Some(ConflictResolution::TieBreaker {
                    evaluation_id: receipt.evaluation.id.clone()
                })
            );
        }
        other => panic!("expected resolution, got {other:?}"),
    }
    assert_eq!(
        service.submission(&id).expect("exists").status,
        SubmissionStatus::Active
    );

    match service.advance(&id).expect("unblocked") {
        AdvanceOutcome::Advanced { score, .. } => {
            assert_eq!(score.evaluation_count, 3);
            assert!(approx(score.score, (9.0 + 6.0 + 8.6) / 3.0));
        }
        other => panic!("expected advance, got {other:?}"),
    }
}

#[test]
fn outlying_tie_breaker_extends_the_single_open_case() {
    let (service, clock) = build_service(policy());
    let id = ingest(&service, &clock, "sub-001", "Film");
    submit(&service, "judge-1", &id, Stage::Triage, 9.0);
    submit(&service, "judge-2", &id, Stage::Triage, 6.0);
    let receipt = submit(&service, "judge-3", &id, Stage::Triage, 3.0);

    match receipt.conflict {
        ConflictUpdate::Extended(case) => {
            assert_eq!(case.evaluation_ids.len(), 3);
            assert!(approx(case.score_delta, 6.0));
        }
        other => panic!("expected the case to grow, got {other:?}"),
    }
    assert_eq!(service.open_conflicts().len(), 1);
    assert_eq!(service.conflicts_for(&id).len(), 1);
    assert!(matches!(
        service.advance(&id),
        Err(PipelineError::ConflictOpen { .. })
    ));
}

#[test]
fn administrative_resolution_is_recorded_and_one_time() {
    let (service, clock) = build_service(policy());
    let id = ingest(&service, &clock, "sub-001", "Film");
    submit(&service, "judge-1", &id, Stage::Triage, 9.0);
    let opened = submit(&service, "judge-2", &id, Stage::Triage, 6.0);
    let case_id = match opened.conflict {
        ConflictUpdate::Opened(case) => case.id,
        other => panic!("expected a new case, got {other:?}"),
    };

    let resolved = service
        .resolve_conflict(&case_id, "head-judge", "accept the mean")
        .expect("resolves");
    assert_eq!(
        resolved.resolution,
        Some(ConflictResolution::Administrative {
            actor: "head-judge".to_string(),
            note: "accept the mean".to_string(),
        })
    );
    assert!(resolved.resolved_at.is_some());
    assert_eq!(
        service.submission(&id).expect("exists").status,
        SubmissionStatus::Active
    );

    let err = service
        .resolve_conflict(&case_id, "head-judge", "again")
        .expect_err("already closed");
    assert!(matches!(
        err,
        PipelineError::Conflict(ConflictError::AlreadyResolved(_))
    ));
    assert_eq!(err.kind(), ErrorKind::State);

    assert!(matches!(
        service.advance(&id),
        Ok(AdvanceOutcome::Advanced { .. })
    ));
    assert_eq!(
        service.conflict(&case_id).expect("kept").status,
        ConflictStatus::Resolved
    );
}

#[test]
fn a_disputing_judge_correcting_their_score_does_not_break_the_tie() {
    let (service, clock) = build_service(policy());
    let id = ingest(&service, &clock, "sub-001", "Film");
    submit(&service, "judge-1", &id, Stage::Triage, 9.0);
    let disputed = submit(&service, "judge-2", &id, Stage::Triage, 6.0);
    let case_id = match disputed.conflict {
        ConflictUpdate::Opened(case) => case.id,
        other => panic!("expected a new case, got {other:?}"),
    };

    let corrected = service
        .supersede_evaluation(
            &disputed.evaluation.id,
            EvaluationCorrection {
                scores: uniform_scores(9.0),
                notes: None,
                actor: "judge-2".to_string(),
                reason: "agree after discussion".to_string(),
            },
        )
        .expect("correction accepted");
    match &corrected.conflict {
        ConflictUpdate::Extended(case) => {
            assert_eq!(case.id, case_id);
            assert_eq!(case.status, ConflictStatus::Pending);
            assert!(case.resolution.is_none());
            assert!(case.evaluation_ids.contains(&corrected.evaluation.id));
            assert!(!case.evaluation_ids.contains(&disputed.evaluation.id));
        }
        other => panic!("expected the case to stay pending, got {other:?}"),
    }
    assert_eq!(
        service.submission(&id).expect("exists").status,
        SubmissionStatus::Flagged
    );
    assert!(matches!(
        service.advance(&id),
        Err(PipelineError::ConflictOpen { case }) if case == case_id
    ));

    let tie_breaker = submit(&service, "judge-3", &id, Stage::Triage, 8.8);
    assert!(matches!(tie_breaker.conflict, ConflictUpdate::Resolved(_)));
    assert!(service.open_conflicts().is_empty());
    assert!(matches!(
        service.advance(&id),
        Ok(AdvanceOutcome::Advanced { .. })
    ));
}

#[test]
fn disqualification_closes_the_pending_case() {
    let (service, clock) = build_service(policy());
    let id = ingest(&service, &clock, "sub-001", "Film");
    submit(&service, "judge-1", &id, Stage::Triage, 9.0);
    let opened = submit(&service, "judge-2", &id, Stage::Triage, 6.0);
    let case_id = match opened.conflict {
        ConflictUpdate::Opened(case) => case.id,
        other => panic!("expected a new case, got {other:?}"),
    };

    service
        .disqualify(&id, "rules violation")
        .expect("disqualified");

    assert!(service.open_conflicts().is_empty());
    let case = service.conflict(&case_id).expect("kept");
    assert_eq!(case.status, ConflictStatus::Resolved);
    assert_eq!(
        case.resolution,
        Some(ConflictResolution::Administrative {
            actor: "system".to_string(),
            note: "submission disqualified".to_string(),
        })
    );
    assert_eq!(
        service.submission(&id).expect("exists").status,
        SubmissionStatus::Disqualified
    );
}
