use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};

use crate::api::errors::ApiError;
use crate::api::guards::CurrentUser;
use crate::api::pagination::{PageQuery, PaginatedResponse};
use crate::api::validation::validate_payload;
use crate::core::state::AppState;
use crate::core::time::primitive_now_utc;
use crate::db::types::UserRole;
use crate::schemas::exam::{
    QuestionCreate, QuestionResponse, TestCreate, TestListQuery, TestResponse,
};
use crate::services::catalog;

pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_tests).post(create_test))
        .route("/:test_id", get(get_test))
        .route("/:test_id/questions", get(list_questions).post(add_question))
}

async fn create_test(
    current: CurrentUser,
    State(state): State<AppState>,
    Json(payload): Json<TestCreate>,
) -> Result<(StatusCode, Json<TestResponse>), ApiError> {
    validate_payload(&payload)?;

    let test =
        catalog::create_test(&state, &current.identity(), payload.into_draft(), primitive_now_utc())
            .await?;

    Ok((StatusCode::CREATED, Json(TestResponse::from_db(test))))
}

async fn list_tests(
    current: CurrentUser,
    State(state): State<AppState>,
    Query(query): Query<TestListQuery>,
) -> Result<Json<Vec<TestResponse>>, ApiError> {
    let tests = catalog::list_tests(&state, &current.identity(), query.course_id).await?;
    Ok(Json(tests.into_iter().map(TestResponse::from_db).collect()))
}

async fn get_test(
    Path(test_id): Path<String>,
    current: CurrentUser,
    State(state): State<AppState>,
) -> Result<Json<TestResponse>, ApiError> {
    let test = catalog::get_test(&state, &current.identity(), &test_id).await?;
    Ok(Json(TestResponse::from_db(test)))
}

async fn list_questions(
    Path(test_id): Path<String>,
    current: CurrentUser,
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
) -> Result<Json<PaginatedResponse<QuestionResponse>>, ApiError> {
    let (page, page_size) = query.normalized();
    let identity = current.identity();
    let (questions, total_count) =
        catalog::list_questions(&state, &identity, &test_id, page, page_size).await?;

    let reveal_answers = identity.role != UserRole::Student;
    let items = questions
        .into_iter()
        .map(|question| QuestionResponse::from_db(question, reveal_answers))
        .collect();

    Ok(Json(PaginatedResponse { items, total_count, page, page_size }))
}

async fn add_question(
    Path(test_id): Path<String>,
    current: CurrentUser,
    State(state): State<AppState>,
    Json(payload): Json<QuestionCreate>,
) -> Result<(StatusCode, Json<QuestionResponse>), ApiError> {
    validate_payload(&payload)?;

    let question =
        catalog::add_question(&state, &current.identity(), &test_id, payload.into_draft()).await?;

    Ok((StatusCode::CREATED, Json(QuestionResponse::from_db(question, true))))
}
