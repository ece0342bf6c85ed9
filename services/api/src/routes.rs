use crate::error::AppError;
use crate::infra::AppState;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post, put};
use axum::{Extension, Json, Router};
use judging::workflows::judging::{
    AdvanceOutcome, AuditEntry, AwardAssignment, Benchmark, CalibrationRecord, ConflictCase,
    ConflictId, CriteriaSet, CriterionValue, Evaluation, EvaluationCorrection, EvaluationId,
    EvaluationInput, EvaluationKey, EvaluationReceipt, EvaluationStore, Judge, JudgeId,
    JudgingService, LeaderboardSnapshot, RankingEntry, Stage, StageScore, Submission,
    SubmissionId, SubmissionRepository, SubmissionStatusView,
};
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;

type Service<E, R> = State<Arc<JudgingService<E, R>>>;
type ApiResult<T> = Result<Json<T>, AppError>;

#[derive(Debug, Deserialize)]
pub(crate) struct RegisterSubmissionRequest {
    pub(crate) submission_id: String,
    pub(crate) category: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RegisterBenchmarkRequest {
    pub(crate) submission_id: String,
    pub(crate) stage: Stage,
    pub(crate) reference_scores: BTreeMap<String, CriterionValue>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct JudgeActivityRequest {
    pub(crate) active: bool,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SupersedeRequest {
    pub(crate) scores: BTreeMap<String, CriterionValue>,
    #[serde(default)]
    pub(crate) notes: Option<String>,
    pub(crate) actor: String,
    pub(crate) reason: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DisqualifyRequest {
    pub(crate) reason: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ResolveConflictRequest {
    pub(crate) actor: String,
    pub(crate) note: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AssignAwardRequest {
    pub(crate) submission_id: String,
    pub(crate) actor: String,
    #[serde(default)]
    pub(crate) note: String,
}

/// Full HTTP surface: pipeline endpoints plus health, readiness and metrics.
pub(crate) fn app<E, R>(service: Arc<JudgingService<E, R>>, state: AppState) -> Router
where
    E: EvaluationStore + 'static,
    R: SubmissionRepository + 'static,
{
    judging_router(service)
        .route("/health", get(healthcheck))
        .route("/ready", get(readiness_endpoint))
        .route("/metrics", get(metrics_endpoint))
        .layer(Extension(state))
}

pub(crate) fn judging_router<E, R>(service: Arc<JudgingService<E, R>>) -> Router
where
    E: EvaluationStore + 'static,
    R: SubmissionRepository + 'static,
{
    Router::new()
        .route(
            "/api/v1/judges",
            get(list_judges::<E, R>).post(register_judge::<E, R>),
        )
        .route(
            "/api/v1/judges/:judge_id/activity",
            put(set_judge_activity::<E, R>),
        )
        .route(
            "/api/v1/judges/:judge_id/evaluations",
            get(judge_evaluations::<E, R>),
        )
        .route("/api/v1/criteria/:stage", get(stage_criteria::<E, R>))
        .route(
            "/api/v1/submissions",
            get(list_submissions::<E, R>).post(register_submission::<E, R>),
        )
        .route(
            "/api/v1/submissions/:submission_id",
            get(submission_status::<E, R>),
        )
        .route(
            "/api/v1/submissions/:submission_id/scores",
            get(stage_scores::<E, R>),
        )
        .route(
            "/api/v1/submissions/:submission_id/stages/:stage/evaluations",
            get(stage_evaluations::<E, R>),
        )
        .route(
            "/api/v1/submissions/:submission_id/audit",
            get(audit_trail::<E, R>),
        )
        .route(
            "/api/v1/submissions/:submission_id/conflicts",
            get(submission_conflicts::<E, R>),
        )
        .route(
            "/api/v1/submissions/:submission_id/advance",
            post(advance::<E, R>),
        )
        .route(
            "/api/v1/submissions/:submission_id/stages/:stage/advance",
            post(advance_from::<E, R>),
        )
        .route(
            "/api/v1/submissions/:submission_id/disqualify",
            post(disqualify::<E, R>),
        )
        .route("/api/v1/benchmarks", post(register_benchmark::<E, R>))
        .route("/api/v1/evaluations", post(submit_evaluation::<E, R>))
        .route(
            "/api/v1/evaluations/:evaluation_id/supersede",
            post(supersede_evaluation::<E, R>),
        )
        .route("/api/v1/drafts", put(save_draft::<E, R>))
        .route(
            "/api/v1/drafts/:judge_id/:submission_id/:stage",
            get(fetch_draft::<E, R>).delete(discard_draft::<E, R>),
        )
        .route("/api/v1/conflicts", get(open_conflicts::<E, R>))
        .route(
            "/api/v1/conflicts/:case_id/resolve",
            post(resolve_conflict::<E, R>),
        )
        .route("/api/v1/calibration", get(calibration_records::<E, R>))
        .route(
            "/api/v1/calibration/flagged",
            get(judges_needing_calibration::<E, R>),
        )
        .route("/api/v1/leaderboard", get(leaderboard::<E, R>))
        .route(
            "/api/v1/leaderboard/latest",
            get(latest_leaderboard::<E, R>),
        )
        .route(
            "/api/v1/leaderboard/categories/:category",
            get(category_leaderboard::<E, R>),
        )
        .route("/api/v1/awards", get(award_assignments::<E, R>))
        .route(
            "/api/v1/awards/:award_id/eligibility",
            get(award_eligibility::<E, R>),
        )
        .route(
            "/api/v1/awards/:award_id/assign",
            post(assign_award::<E, R>),
        )
        .with_state(service)
}

pub(crate) async fn healthcheck() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

pub(crate) async fn readiness_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    let ready = state.readiness.load(std::sync::atomic::Ordering::Relaxed);
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let payload = if ready {
        json!({ "status": "ready" })
    } else {
        json!({ "status": "initializing" })
    };

    (status, Json(payload))
}

pub(crate) async fn metrics_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

async fn list_judges<E, R>(State(service): Service<E, R>) -> Json<Vec<Judge>>
where
    E: EvaluationStore + 'static,
    R: SubmissionRepository + 'static,
{
    Json(service.judges())
}

async fn register_judge<E, R>(
    State(service): Service<E, R>,
    Json(judge): Json<Judge>,
) -> (StatusCode, Json<Judge>)
where
    E: EvaluationStore + 'static,
    R: SubmissionRepository + 'static,
{
    (StatusCode::CREATED, Json(service.register_judge(judge)))
}

async fn set_judge_activity<E, R>(
    State(service): Service<E, R>,
    Path(judge_id): Path<String>,
    Json(request): Json<JudgeActivityRequest>,
) -> ApiResult<Judge>
where
    E: EvaluationStore + 'static,
    R: SubmissionRepository + 'static,
{
    Ok(Json(
        service.set_judge_active(&JudgeId(judge_id), request.active)?,
    ))
}

async fn judge_evaluations<E, R>(
    State(service): Service<E, R>,
    Path(judge_id): Path<String>,
) -> ApiResult<Vec<Evaluation>>
where
    E: EvaluationStore + 'static,
    R: SubmissionRepository + 'static,
{
    Ok(Json(service.evaluations_by_judge(&JudgeId(judge_id))?))
}

async fn stage_criteria<E, R>(
    State(service): Service<E, R>,
    Path(stage): Path<Stage>,
) -> ApiResult<CriteriaSet>
where
    E: EvaluationStore + 'static,
    R: SubmissionRepository + 'static,
{
    let criteria = service.criteria(stage)?;
    Ok(Json(criteria.as_ref().clone()))
}

async fn list_submissions<E, R>(State(service): Service<E, R>) -> ApiResult<Vec<Submission>>
where
    E: EvaluationStore + 'static,
    R: SubmissionRepository + 'static,
{
    Ok(Json(service.submissions()?))
}

async fn register_submission<E, R>(
    State(service): Service<E, R>,
    Json(request): Json<RegisterSubmissionRequest>,
) -> Result<(StatusCode, Json<Submission>), AppError>
where
    E: EvaluationStore + 'static,
    R: SubmissionRepository + 'static,
{
    let submission =
        service.register_submission(SubmissionId(request.submission_id), &request.category)?;
    Ok((StatusCode::CREATED, Json(submission)))
}

async fn submission_status<E, R>(
    State(service): Service<E, R>,
    Path(submission_id): Path<String>,
) -> ApiResult<SubmissionStatusView>
where
    E: EvaluationStore + 'static,
    R: SubmissionRepository + 'static,
{
    Ok(Json(service.submission_status(&SubmissionId(submission_id))?))
}

async fn stage_scores<E, R>(
    State(service): Service<E, R>,
    Path(submission_id): Path<String>,
) -> ApiResult<Vec<StageScore>>
where
    E: EvaluationStore + 'static,
    R: SubmissionRepository + 'static,
{
    Ok(Json(service.stage_scores(&SubmissionId(submission_id))?))
}

async fn stage_evaluations<E, R>(
    State(service): Service<E, R>,
    Path((submission_id, stage)): Path<(String, Stage)>,
) -> ApiResult<Vec<Evaluation>>
where
    E: EvaluationStore + 'static,
    R: SubmissionRepository + 'static,
{
    Ok(Json(
        service.evaluations_for(&SubmissionId(submission_id), stage)?,
    ))
}

async fn audit_trail<E, R>(
    State(service): Service<E, R>,
    Path(submission_id): Path<String>,
) -> ApiResult<Vec<AuditEntry>>
where
    E: EvaluationStore + 'static,
    R: SubmissionRepository + 'static,
{
    Ok(Json(service.audit_trail(&SubmissionId(submission_id))?))
}

async fn submission_conflicts<E, R>(
    State(service): Service<E, R>,
    Path(submission_id): Path<String>,
) -> Json<Vec<ConflictCase>>
where
    E: EvaluationStore + 'static,
    R: SubmissionRepository + 'static,
{
    Json(service.conflicts_for(&SubmissionId(submission_id)))
}

async fn advance<E, R>(
    State(service): Service<E, R>,
    Path(submission_id): Path<String>,
) -> ApiResult<AdvanceOutcome>
where
    E: EvaluationStore + 'static,
    R: SubmissionRepository + 'static,
{
    Ok(Json(service.advance(&SubmissionId(submission_id))?))
}

async fn advance_from<E, R>(
    State(service): Service<E, R>,
    Path((submission_id, stage)): Path<(String, Stage)>,
) -> ApiResult<AdvanceOutcome>
where
    E: EvaluationStore + 'static,
    R: SubmissionRepository + 'static,
{
    Ok(Json(
        service.advance_from(&SubmissionId(submission_id), stage)?,
    ))
}

async fn disqualify<E, R>(
    State(service): Service<E, R>,
    Path(submission_id): Path<String>,
    Json(request): Json<DisqualifyRequest>,
) -> ApiResult<Submission>
where
    E: EvaluationStore + 'static,
    R: SubmissionRepository + 'static,
{
    Ok(Json(
        service.disqualify(&SubmissionId(submission_id), &request.reason)?,
    ))
}

async fn register_benchmark<E, R>(
    State(service): Service<E, R>,
    Json(request): Json<RegisterBenchmarkRequest>,
) -> Result<(StatusCode, Json<Benchmark>), AppError>
where
    E: EvaluationStore + 'static,
    R: SubmissionRepository + 'static,
{
    let benchmark = service.register_benchmark(
        SubmissionId(request.submission_id),
        request.stage,
        request.reference_scores,
    )?;
    Ok((StatusCode::CREATED, Json(benchmark)))
}

async fn submit_evaluation<E, R>(
    State(service): Service<E, R>,
    Json(input): Json<EvaluationInput>,
) -> Result<(StatusCode, Json<EvaluationReceipt>), AppError>
where
    E: EvaluationStore + 'static,
    R: SubmissionRepository + 'static,
{
    let receipt = service.submit_evaluation(input)?;
    Ok((StatusCode::CREATED, Json(receipt)))
}

async fn supersede_evaluation<E, R>(
    State(service): Service<E, R>,
    Path(evaluation_id): Path<String>,
    Json(request): Json<SupersedeRequest>,
) -> ApiResult<EvaluationReceipt>
where
    E: EvaluationStore + 'static,
    R: SubmissionRepository + 'static,
{
    let correction = EvaluationCorrection {
        scores: request.scores,
        notes: request.notes,
        actor: request.actor,
        reason: request.reason,
    };
    Ok(Json(
        service.supersede_evaluation(&EvaluationId(evaluation_id), correction)?,
    ))
}

async fn save_draft<E, R>(
    State(service): Service<E, R>,
    Json(input): Json<EvaluationInput>,
) -> ApiResult<Evaluation>
where
    E: EvaluationStore + 'static,
    R: SubmissionRepository + 'static,
{
    Ok(Json(service.save_draft(input)?))
}

fn draft_key(judge_id: String, submission_id: String, stage: Stage) -> EvaluationKey {
    EvaluationKey {
        judge_id: JudgeId(judge_id),
        submission_id: SubmissionId(submission_id),
        stage,
    }
}

async fn fetch_draft<E, R>(
    State(service): Service<E, R>,
    Path((judge_id, submission_id, stage)): Path<(String, String, Stage)>,
) -> Result<axum::response::Response, AppError>
where
    E: EvaluationStore + 'static,
    R: SubmissionRepository + 'static,
{
    let response = match service.draft(&draft_key(judge_id, submission_id, stage))? {
        Some(draft) => (StatusCode::OK, Json(draft)).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "no draft saved", "kind": "not_found" })),
        )
            .into_response(),
    };
    Ok(response)
}

async fn discard_draft<E, R>(
    State(service): Service<E, R>,
    Path((judge_id, submission_id, stage)): Path<(String, String, Stage)>,
) -> Result<StatusCode, AppError>
where
    E: EvaluationStore + 'static,
    R: SubmissionRepository + 'static,
{
    let removed = service.discard_draft(&draft_key(judge_id, submission_id, stage))?;
    Ok(if removed {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    })
}

async fn open_conflicts<E, R>(State(service): Service<E, R>) -> Json<Vec<ConflictCase>>
where
    E: EvaluationStore + 'static,
    R: SubmissionRepository + 'static,
{
    Json(service.open_conflicts())
}

async fn resolve_conflict<E, R>(
    State(service): Service<E, R>,
    Path(case_id): Path<String>,
    Json(request): Json<ResolveConflictRequest>,
) -> ApiResult<ConflictCase>
where
    E: EvaluationStore + 'static,
    R: SubmissionRepository + 'static,
{
    Ok(Json(service.resolve_conflict(
        &ConflictId(case_id),
        &request.actor,
        &request.note,
    )?))
}

async fn calibration_records<E, R>(State(service): Service<E, R>) -> Json<Vec<CalibrationRecord>>
where
    E: EvaluationStore + 'static,
    R: SubmissionRepository + 'static,
{
    Json(service.calibration_records())
}

async fn judges_needing_calibration<E, R>(
    State(service): Service<E, R>,
) -> Json<Vec<CalibrationRecord>>
where
    E: EvaluationStore + 'static,
    R: SubmissionRepository + 'static,
{
    Json(service.judges_needing_calibration())
}

async fn leaderboard<E, R>(State(service): Service<E, R>) -> ApiResult<Vec<RankingEntry>>
where
    E: EvaluationStore + 'static,
    R: SubmissionRepository + 'static,
{
    Ok(Json(service.leaderboard(None)?))
}

async fn category_leaderboard<E, R>(
    State(service): Service<E, R>,
    Path(category): Path<String>,
) -> ApiResult<Vec<RankingEntry>>
where
    E: EvaluationStore + 'static,
    R: SubmissionRepository + 'static,
{
    Ok(Json(service.leaderboard(Some(&category))?))
}

async fn latest_leaderboard<E, R>(
    State(service): Service<E, R>,
) -> Json<Option<LeaderboardSnapshot>>
where
    E: EvaluationStore + 'static,
    R: SubmissionRepository + 'static,
{
    Json(service.latest_leaderboard())
}

async fn award_assignments<E, R>(State(service): Service<E, R>) -> Json<Vec<AwardAssignment>>
where
    E: EvaluationStore + 'static,
    R: SubmissionRepository + 'static,
{
    Json(service.award_assignments())
}

async fn award_eligibility<E, R>(
    State(service): Service<E, R>,
    Path(award_id): Path<String>,
) -> ApiResult<Vec<RankingEntry>>
where
    E: EvaluationStore + 'static,
    R: SubmissionRepository + 'static,
{
    Ok(Json(service.award_eligibility(&award_id)?))
}

async fn assign_award<E, R>(
    State(service): Service<E, R>,
    Path(award_id): Path<String>,
    Json(request): Json<AssignAwardRequest>,
) -> Result<(StatusCode, Json<AwardAssignment>), AppError>
where
    E: EvaluationStore + 'static,
    R: SubmissionRepository + 'static,
{
    let assignment = service.assign_award(
        &award_id,
        &SubmissionId(request.submission_id),
        &request.actor,
        &request.note,
    )?;
    Ok((StatusCode::CREATED, Json(assignment)))
}
