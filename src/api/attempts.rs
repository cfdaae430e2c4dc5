//! Taking a test and reviewing the outcome.

use axum::{
    body::Bytes,
    extract::{Path, State},
    routing::{get, post, put},
    Json, Router,
};

use crate::api::errors::ApiError;
use crate::api::guards::CurrentUser;
use crate::api::validation::validate_payload;
use crate::core::state::AppState;
use crate::core::time::primitive_now_utc;
use crate::schemas::attempt::{
    AccessResponse, AnswerRequest, AnswerResponse, FinishRequest, GradeRequest, ResultResponse,
    ScoreResponse, StatisticsResponse,
};
use crate::services::{lifecycle, scoring, statistics};

pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route("/:test_id/access", post(access_test))
        .route("/:test_id/questions/:question_id/answer", post(submit_answer))
        .route("/:test_id/finish", post(finish_test))
        .route("/:test_id/score", get(get_score))
        .route("/:test_id/results", get(list_results))
        .route("/:test_id/questions/:question_id/answers/:student_id/grade", put(grade_answer))
        .route("/:test_id/statistics", get(get_statistics))
}

async fn access_test(
    Path(test_id): Path<String>,
    current: CurrentUser,
    State(state): State<AppState>,
) -> Result<Json<AccessResponse>, ApiError> {
    let now = primitive_now_utc();
    let outcome = lifecycle::access_test(&state, &current.identity(), &test_id, now).await?;
    Ok(Json(AccessResponse::from_outcome(&outcome, now)))
}

async fn submit_answer(
    Path((test_id, question_id)): Path<(String, String)>,
    current: CurrentUser,
    State(state): State<AppState>,
    Json(payload): Json<AnswerRequest>,
) -> Result<Json<AnswerResponse>, ApiError> {
    let saved = lifecycle::submit_answer(
        &state,
        &current.identity(),
        &test_id,
        &question_id,
        payload.into_payload(),
        primitive_now_utc(),
    )
    .await?;
    Ok(Json(AnswerResponse::from_db(saved)))
}

/// The body is optional: an empty one finishes with the answers already saved.
fn parse_finish_body(body: &[u8]) -> Result<FinishRequest, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(FinishRequest::default());
    }
    serde_json::from_slice(body)
        .map_err(|err| ApiError::BadRequest(format!("Invalid finish payload: {err}")))
}

async fn finish_test(
    Path(test_id): Path<String>,
    current: CurrentUser,
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<ScoreResponse>, ApiError> {
    let payload = parse_finish_body(&body)?;
    let breakdown = lifecycle::finish_test(
        &state,
        &current.identity(),
        &test_id,
        payload.into_pending(),
        primitive_now_utc(),
    )
    .await?;
    Ok(Json(ScoreResponse::new(test_id, breakdown)))
}

async fn get_score(
    Path(test_id): Path<String>,
    current: CurrentUser,
    State(state): State<AppState>,
) -> Result<Json<ScoreResponse>, ApiError> {
    let breakdown = scoring::get_overall_score(&state, &current.identity(), &test_id).await?;
    Ok(Json(ScoreResponse::new(test_id, breakdown)))
}

async fn list_results(
    Path(test_id): Path<String>,
    current: CurrentUser,
    State(state): State<AppState>,
) -> Result<Json<Vec<ResultResponse>>, ApiError> {
    let results = scoring::test_results(&state, &current.identity(), &test_id).await?;

    let mut response = Vec::with_capacity(results.len());
    for result in results {
        let answers = state.store().list_attempt_answers(&result.attempt.id).await?;
        response.push(ResultResponse::new(result, answers));
    }
    Ok(Json(response))
}

async fn grade_answer(
    Path((test_id, question_id, student_id)): Path<(String, String, String)>,
    current: CurrentUser,
    State(state): State<AppState>,
    Json(payload): Json<GradeRequest>,
) -> Result<Json<AnswerResponse>, ApiError> {
    validate_payload(&payload)?;

    let graded = scoring::grade_open_answer(
        &state,
        &current.identity(),
        &test_id,
        &question_id,
        &student_id,
        payload.score,
        primitive_now_utc(),
    )
    .await?;
    Ok(Json(AnswerResponse::from_db(graded)))
}

async fn get_statistics(
    Path(test_id): Path<String>,
    current: CurrentUser,
    State(state): State<AppState>,
) -> Result<Json<StatisticsResponse>, ApiError> {
    let stats = statistics::get_test_statistics(&state, &current.identity(), &test_id).await?;
    Ok(Json(StatisticsResponse::new(test_id, stats)))
}
