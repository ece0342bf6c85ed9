use super::common::*;
use crate::workflows::judging::{
    AdvanceOutcome, CriteriaError, CriterionValue, ErrorKind, EvaluationCorrection,
    JudgeId, PipelineError, PipelinePolicy, RankingError, RepositoryError, ScoringError, Stage,
    SubmissionId, SubmissionStatus,
};

#[test]
fn three_judges_at_quorum_advance_with_the_mean() {
    let (service, clock) = build_service(PipelinePolicy {
        ranking: ranking_config(),
        ..PipelinePolicy::with_quorum(3, 3)
    });
    let id = ingest(&service, &clock, "sub-001", "Film");
    score_and_advance(&service, &id, &[7.0, 7.0, 7.0]);

    submit(&service, "judge-1", &id, Stage::Preliminary, 7.0);
    submit(&service, "judge-2", &id, Stage::Preliminary, 7.2);
    submit(&service, "judge-3", &id, Stage::Preliminary, 7.1);

    match service.advance(&id).expect("quorum met") {
        AdvanceOutcome::Advanced { from, to, score } => {
            assert_eq!(from, Stage::Preliminary);
            assert_eq!(to, Stage::Detailed);
            assert!(approx(score.score, 7.1), "mean was {}", score.score);
            assert_eq!(score.evaluation_count, 3);
            assert!(score.frozen);
        }
        other => panic!("expected advance, got {other:?}"),
    }

    let submission = service.submission(&id).expect("exists");
    assert_eq!(submission.stage, Stage::Detailed);
    assert_eq!(submission.status, SubmissionStatus::Active);
    let frozen = service
        .stage_score(&id, Stage::Preliminary)
        .expect("read")
        .expect("frozen score");
    assert!(frozen.frozen);
}

#[test]
fn advance_without_quorum_is_incomplete_and_changes_nothing() {
    let (service, clock) = build_service(policy());
    let id = ingest(&service, &clock, "sub-001", "Film");
    submit(&service, "judge-1", &id, Stage::Triage, 6.0);

    let err = service.advance(&id).expect_err("quorum of two not met");
    assert!(matches!(
        err,
        PipelineError::StageIncomplete {
            stage: Stage::Triage,
            required: 2,
            recorded: 1
        }
    ));
    assert_eq!(err.kind(), ErrorKind::State);
    assert!(err.is_retryable());

    let submission = service.submission(&id).expect("exists");
    assert_eq!(submission.stage, Stage::Triage);
    let provisional = service
        .stage_score(&id, Stage::Triage)
        .expect("read")
        .expect("provisional score");
    assert!(!provisional.frozen);
}

#[test]
fn stages_only_move_forward_one_at_a_time() {
    let (service, clock) = build_service(policy());
    let id = ingest(&service, &clock, "sub-001", "Photo");

    let mut seen = vec![service.submission(&id).expect("exists").stage];
    for stage in Stage::ordered() {
        let quorum = service.policy().quorum_for(stage);
        score_and_advance(&service, &id, &vec![8.0; quorum]);
        seen.push(service.submission(&id).expect("exists").stage);
    }

    for pair in seen.windows(2) {
        assert!(
            pair[0] <= pair[1],
            "stage regressed from {} to {}",
            pair[0],
            pair[1]
        );
        if pair[0] != pair[1] {
            assert_eq!(pair[0].next(), Some(pair[1]));
        }
    }
    let submission = service.submission(&id).expect("exists");
    assert_eq!(submission.stage, Stage::Finals);
    assert_eq!(submission.status, SubmissionStatus::Completed);
    assert_eq!(service.stage_scores(&id).expect("scores").len(), 5);
}

#[test]
fn advance_from_an_earlier_stage_is_a_no_op() {
    let (service, clock) = build_service(policy());
    let id = ingest(&service, &clock, "sub-001", "Film");
    score_and_advance(&service, &id, &[6.0, 6.0]);

    let repeat = service
        .advance_from(&id, Stage::Triage)
        .expect("repeat is not an error");
    assert_eq!(
        repeat,
        AdvanceOutcome::AlreadyAdvanced {
            stage: Stage::Preliminary,
            status: SubmissionStatus::Active,
        }
    );
    assert_eq!(
        service.submission(&id).expect("exists").stage,
        Stage::Preliminary
    );
}

#[test]
fn disqualification_is_terminal() {
    let (service, clock) = build_service(policy());
    let id = ingest(&service, &clock, "sub-001", "Film");
    submit(&service, "judge-1", &id, Stage::Triage, 8.0);

    let submission = service
        .disqualify(&id, "rules violation")
        .expect("disqualified");
    assert_eq!(submission.status, SubmissionStatus::Disqualified);
    assert_eq!(
        submission.disqualification_reason.as_deref(),
        Some("rules violation")
    );

    let err = service.advance(&id).expect_err("terminal");
    assert!(matches!(err, PipelineError::InvalidTransition { .. }));
    assert_eq!(err.kind(), ErrorKind::State);

    let err = service
        .submit_evaluation(evaluation("judge-2", &id, Stage::Triage, 8.0))
        .expect_err("no more evaluations");
    assert_eq!(err.kind(), ErrorKind::State);

    let again = service.disqualify(&id, "second call").expect("no-op");
    assert_eq!(
        again.disqualification_reason.as_deref(),
        Some("rules violation")
    );
}

#[test]
fn completed_submissions_cannot_advance_or_be_disqualified() {
    let (service, clock) = build_service(policy());
    let id = ingest(&service, &clock, "sub-001", "Film");
    complete(&service, &id, 8.0);

    assert!(matches!(
        service.advance(&id),
        Err(PipelineError::InvalidTransition { .. })
    ));
    assert!(matches!(
        service.advance_from(&id, Stage::Finals),
        Ok(AdvanceOutcome::AlreadyAdvanced {
            status: SubmissionStatus::Completed,
            ..
        })
    ));
    assert!(matches!(
        service.disqualify(&id, "late"),
        Err(PipelineError::InvalidTransition { .. })
    ));
}

#[test]
fn stage_gate_eliminates_low_scores() {
    let mut policy = policy();
    policy.stage_gates.insert(Stage::Triage, 5.0);
    let (service, clock) = build_service(policy);
    let id = ingest(&service, &clock, "sub-001", "Film");

    match score_and_advance(&service, &id, &[4.0, 4.4]) {
        AdvanceOutcome::Eliminated {
            stage,
            score,
            minimum,
        } => {
            assert_eq!(stage, Stage::Triage);
            assert!(approx(score.score, 4.2));
            assert!(approx(minimum, 5.0));
        }
        other => panic!("expected elimination, got {other:?}"),
    }
    let submission = service.submission(&id).expect("exists");
    assert_eq!(submission.status, SubmissionStatus::Disqualified);
    assert_eq!(submission.stage, Stage::Triage);
}

#[test]
fn incomplete_evaluations_are_rejected_before_anything_is_stored() {
    let (service, clock) = build_service(policy());
    let id = ingest(&service, &clock, "sub-001", "Film");

    let mut input = evaluation("judge-1", &id, Stage::Triage, 7.0);
    input.scores.remove("originality");
    let err = service.submit_evaluation(input).expect_err("incomplete");
    match &err {
        PipelineError::Scoring(ScoringError::IncompleteEvaluation { missing }) => {
            assert_eq!(missing, &vec!["originality".to_string()]);
        }
        other => panic!("expected incomplete evaluation, got {other:?}"),
    }
    assert_eq!(err.kind(), ErrorKind::Validation);

    let mut input = evaluation("judge-1", &id, Stage::Triage, 7.0);
    input
        .scores
        .insert("craft".to_string(), CriterionValue::Numeric(11.0));
    assert!(matches!(
        service.submit_evaluation(input),
        Err(PipelineError::Scoring(ScoringError::ScoreOutOfRange { .. }))
    ));

    assert!(service
        .evaluations_for(&id, Stage::Triage)
        .expect("read")
        .is_empty());
    assert!(service
        .stage_score(&id, Stage::Triage)
        .expect("read")
        .is_none());
}

#[test]
fn evaluations_must_target_the_current_stage_and_an_assigned_judge() {
    let (service, clock) = build_service(policy());
    let id = ingest(&service, &clock, "sub-001", "Film");

    let err = service
        .submit_evaluation(evaluation("judge-1", &id, Stage::Detailed, 7.0))
        .expect_err("wrong stage");
    assert!(matches!(
        err,
        PipelineError::StageMismatch {
            current: Stage::Triage,
            requested: Stage::Detailed,
            ..
        }
    ));

    let err = service
        .submit_evaluation(evaluation("photo-judge", &id, Stage::Triage, 7.0))
        .expect_err("photo judge on a film entry");
    assert!(matches!(err, PipelineError::JudgeNotAssigned { .. }));

    service
        .set_judge_active(&JudgeId("judge-2".to_string()), false)
        .expect("judge exists");
    let err = service
        .submit_evaluation(evaluation("judge-2", &id, Stage::Triage, 7.0))
        .expect_err("inactive judge");
    assert!(matches!(err, PipelineError::InactiveJudge(_)));

    let err = service
        .submit_evaluation(evaluation("judge-9", &id, Stage::Triage, 7.0))
        .expect_err("unknown judge");
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn drafts_never_count_toward_quorum_or_scores() {
    let (service, clock) = build_service(policy());
    let id = ingest(&service, &clock, "sub-001", "Film");

    let mut partial = evaluation("judge-1", &id, Stage::Triage, 6.0);
    partial.scores.remove("originality");
    let draft = service.save_draft(partial.clone()).expect("partial draft");
    assert!(draft.draft);
    assert!(draft.weighted_score.is_none());
    submit(&service, "judge-2", &id, Stage::Triage, 6.0);

    assert!(matches!(
        service.advance(&id),
        Err(PipelineError::StageIncomplete { recorded: 1, .. })
    ));
    let provisional = service
        .stage_score(&id, Stage::Triage)
        .expect("read")
        .expect("one real evaluation");
    assert_eq!(provisional.evaluation_count, 1);

    assert!(service.discard_draft(&partial.key()).expect("discard"));
    assert!(!service.discard_draft(&partial.key()).expect("discard twice"));
    assert!(service.draft(&partial.key()).expect("read").is_none());
}

#[test]
fn submitting_replaces_the_judges_draft() {
    let (service, clock) = build_service(policy());
    let id = ingest(&service, &clock, "sub-001", "Film");
    let input = evaluation("judge-1", &id, Stage::Triage, 6.0);

    service.save_draft(input.clone()).expect("draft");
    submit(&service, "judge-1", &id, Stage::Triage, 6.0);

    assert!(service.draft(&input.key()).expect("read").is_none());
    assert!(matches!(
        service.save_draft(input),
        Err(PipelineError::Repository(
            RepositoryError::DuplicateEvaluation(_)
        ))
    ));
}

#[test]
fn duplicate_evaluation_leaves_the_stage_score_untouched() {
    let (service, clock) = build_service(policy());
    let id = ingest(&service, &clock, "sub-001", "Film");
    submit(&service, "judge-1", &id, Stage::Triage, 8.0);
    submit(&service, "judge-2", &id, Stage::Triage, 7.0);
    let before = service
        .stage_score(&id, Stage::Triage)
        .expect("read")
        .expect("score");

    let err = service
        .submit_evaluation(evaluation("judge-1", &id, Stage::Triage, 3.0))
        .expect_err("already recorded");
    assert!(matches!(
        err,
        PipelineError::Repository(RepositoryError::DuplicateEvaluation(_))
    ));
    assert_eq!(err.kind(), ErrorKind::Concurrency);

    let after = service
        .stage_score(&id, Stage::Triage)
        .expect("read")
        .expect("score");
    assert_eq!(before, after);
}

#[test]
fn supersession_rescores_and_leaves_an_audit_trail() {
    let (service, clock) = build_service(policy());
    let id = ingest(&service, &clock, "sub-001", "Film");
    let original = submit(&service, "judge-1", &id, Stage::Triage, 8.0);
    submit(&service, "judge-2", &id, Stage::Triage, 8.0);

    let receipt = service
        .supersede_evaluation(
            &original.evaluation.id,
            EvaluationCorrection {
                scores: uniform_scores(7.0),
                notes: Some("misread the brief".to_string()),
                actor: "judge-1".to_string(),
                reason: "typo in craft score".to_string(),
            },
        )
        .expect("correction accepted");
    let score = receipt.stage_score.expect("rescored");
    assert!(approx(score.score, 7.5));
    assert_eq!(score.evaluation_count, 2);

    let recorded = service.evaluations_for(&id, Stage::Triage).expect("read");
    assert_eq!(recorded.len(), 3);
    assert_eq!(
        recorded[0].superseded_by.as_ref(),
        Some(&receipt.evaluation.id)
    );

    let trail = service.audit_trail(&id).expect("read");
    assert_eq!(trail.len(), 1);
    assert_eq!(trail[0].previous, original.evaluation.id);
    assert_eq!(trail[0].reason, "typo in craft score");

    let err = service
        .supersede_evaluation(
            &original.evaluation.id,
            EvaluationCorrection {
                scores: uniform_scores(6.0),
                notes: None,
                actor: "judge-1".to_string(),
                reason: "again".to_string(),
            },
        )
        .expect_err("superseded evaluations stay superseded");
    assert_eq!(err.kind(), ErrorKind::Concurrency);
}

#[test]
fn new_criteria_versions_do_not_rescore_frozen_stages() {
    let (service, clock) = build_service(policy());
    let id = ingest(&service, &clock, "sub-001", "Film");
    score_and_advance(&service, &id, &[6.0, 8.0]);
    let frozen = service
        .stage_score(&id, Stage::Triage)
        .expect("read")
        .expect("score");
    assert_eq!(frozen.criteria_version, 1);

    let mut revised = stage_criteria(Stage::Triage);
    revised[0].weight = 20;
    revised[1].weight = 80;
    let set = service
        .register_criteria(Stage::Triage, revised)
        .expect("new version");
    assert_eq!(set.version, 2);

    let unchanged = service
        .stage_score(&id, Stage::Triage)
        .expect("read")
        .expect("score");
    assert_eq!(frozen, unchanged);
    assert_eq!(unchanged.criteria_version, 1);
    assert_eq!(service.criteria(Stage::Triage).expect("current").version, 2);
}

#[test]
fn invalid_weights_are_rejected_at_registration() {
    let (service, _clock) = build_service(policy());
    let mut criteria = stage_criteria(Stage::Detailed);
    criteria[1].weight = 30;

    let err = service
        .register_criteria(Stage::Detailed, criteria)
        .expect_err("sum is 90");
    assert!(matches!(
        err,
        PipelineError::Criteria(CriteriaError::InvalidWeights { total: 90, .. })
    ));
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(
        service
            .criteria(Stage::Detailed)
            .expect("earlier version")
            .version,
        1
    );
}

#[test]
fn completed_submissions_rank_with_deterministic_ties() {
    let (service, clock) = build_service(policy());
    let early = ingest(&service, &clock, "sub-early", "Film");
    let late = ingest(&service, &clock, "sub-late", "Film");
    let photo = ingest(&service, &clock, "sub-photo", "Photo");
    let unfinished = ingest(&service, &clock, "sub-open", "Film");

    complete(&service, &late, 8.0);
    complete(&service, &early, 8.0);
    complete(&service, &photo, 9.0);
    score_and_advance(&service, &unfinished, &[9.5, 9.5]);

    let board = service.leaderboard(None).expect("leaderboard");
    let order: Vec<(&str, usize)> = board
        .iter()
        .map(|entry| (entry.submission_id.0.as_str(), entry.rank))
        .collect();
    assert_eq!(
        order,
        vec![("sub-photo", 1), ("sub-early", 2), ("sub-late", 3)]
    );
    assert_eq!(board, service.leaderboard(None).expect("repeat"));

    let film = service.leaderboard(Some("film")).expect("film board");
    assert_eq!(film.len(), 2);
    assert_eq!(film[0].rank, 1);

    assert!(matches!(
        service.leaderboard(Some("Sculpture")),
        Err(PipelineError::Ranking(RankingError::UnknownCategory(_)))
    ));

    let snapshot = service.latest_leaderboard().expect("refreshed on completion");
    assert_eq!(snapshot.generation, 3);
    assert_eq!(snapshot.entries, board);
}

#[test]
fn identical_scores_in_a_different_order_still_tie_break_on_creation() {
    let orders: [[f64; 3]; 2] = [[6.0, 6.2, 6.1], [6.0, 6.1, 6.2]];
    for (early_order, late_order) in [(orders[0], orders[1]), (orders[1], orders[0])] {
        let (service, clock) = build_service(PipelinePolicy {
            ranking: ranking_config(),
            ..PipelinePolicy::with_quorum(3, 3)
        });
        let early = ingest(&service, &clock, "sub-early", "Film");
        let late = ingest(&service, &clock, "sub-late", "Film");
        for _ in Stage::ordered() {
            score_and_advance(&service, &early, &early_order);
            score_and_advance(&service, &late, &late_order);
        }

        let board = service.leaderboard(Some("Film")).expect("leaderboard");
        let ids: Vec<&str> = board
            .iter()
            .map(|entry| entry.submission_id.0.as_str())
            .collect();
        assert_eq!(ids, vec!["sub-early", "sub-late"]);
        assert!(approx(board[0].final_score, board[1].final_score));
    }
}

#[test]
fn awards_are_listed_by_eligibility_and_assigned_explicitly() {
    let (service, clock) = build_service(policy());
    let strong = ingest(&service, &clock, "sub-strong", "Film");
    let modest = ingest(&service, &clock, "sub-modest", "Film");
    let photo = ingest(&service, &clock, "sub-photo", "Photo");
    complete(&service, &strong, 8.5);
    complete(&service, &modest, 7.2);
    complete(&service, &photo, 9.0);

    let film = service.award_eligibility("best-film").expect("eligibility");
    let ids: Vec<&str> = film
        .iter()
        .map(|entry| entry.submission_id.0.as_str())
        .collect();
    assert_eq!(ids, vec!["sub-strong", "sub-modest"]);
    assert!(service.award_assignments().is_empty());

    let grand = service.award_eligibility("grand-prize").expect("eligibility");
    assert_eq!(grand.len(), 2);

    let assignment = service
        .assign_award("best-film", &modest, "jury-chair", "jury preference")
        .expect("eligible entry");
    assert_eq!(assignment.submission_id, modest);
    assert!(matches!(
        service.assign_award("best-film", &strong, "jury-chair", ""),
        Err(PipelineError::Ranking(
            RankingError::AwardAlreadyAssigned { .. }
        ))
    ));
    assert!(matches!(
        service.assign_award("grand-prize", &modest, "jury-chair", ""),
        Err(PipelineError::Ranking(RankingError::NotEligible { .. }))
    ));
}

#[test]
fn unknown_category_and_duplicate_ids_are_rejected_at_ingestion() {
    let (service, clock) = build_service(policy());
    ingest(&service, &clock, "sub-001", "Film");

    let err = service
        .register_submission(SubmissionId("sub-001".to_string()), "Film")
        .expect_err("duplicate id");
    assert_eq!(err.kind(), ErrorKind::Concurrency);

    let err = service
        .register_submission(SubmissionId("sub-002".to_string()), "Poetry")
        .expect_err("unknown category");
    assert_eq!(err.kind(), ErrorKind::NotFound);
}
