use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};

use crate::api::errors::ApiError;
use crate::api::guards::CurrentUser;
use crate::api::validation::validate_payload;
use crate::core::state::AppState;
use crate::core::time::primitive_now_utc;
use crate::schemas::course::{
    AssignTeacherRequest, CourseCreate, CourseResponse, EnrollStudentRequest, EnrollmentResponse,
};
use crate::services::catalog;

pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_courses).post(create_course))
        .route("/:course_id", get(get_course))
        .route("/:course_id/teacher", put(assign_teacher))
        .route("/:course_id/students", post(enroll_student))
}

async fn create_course(
    current: CurrentUser,
    State(state): State<AppState>,
    Json(payload): Json<CourseCreate>,
) -> Result<(StatusCode, Json<CourseResponse>), ApiError> {
    validate_payload(&payload)?;

    let course = catalog::create_course(
        &state,
        &current.identity(),
        payload.name.trim().to_string(),
        payload.teacher_id,
        primitive_now_utc(),
    )
    .await?;

    Ok((StatusCode::CREATED, Json(CourseResponse::from_db(course))))
}

async fn list_courses(
    current: CurrentUser,
    State(state): State<AppState>,
) -> Result<Json<Vec<CourseResponse>>, ApiError> {
    let courses = catalog::list_courses(&state, &current.identity()).await?;
    Ok(Json(courses.into_iter().map(CourseResponse::from_db).collect()))
}

async fn get_course(
    Path(course_id): Path<String>,
    current: CurrentUser,
    State(state): State<AppState>,
) -> Result<Json<CourseResponse>, ApiError> {
    let course = catalog::get_course(&state, &current.identity(), &course_id).await?;
    let student_count = state.store().count_enrolled(&course.id).await?;
    Ok(Json(CourseResponse::from_db(course).with_student_count(student_count)))
}

async fn assign_teacher(
    Path(course_id): Path<String>,
    current: CurrentUser,
    State(state): State<AppState>,
    Json(payload): Json<AssignTeacherRequest>,
) -> Result<Json<CourseResponse>, ApiError> {
    let course = catalog::assign_teacher(
        &state,
        &current.identity(),
        &course_id,
        &payload.teacher_id,
        primitive_now_utc(),
    )
    .await?;
    Ok(Json(CourseResponse::from_db(course)))
}

async fn enroll_student(
    Path(course_id): Path<String>,
    current: CurrentUser,
    State(state): State<AppState>,
    Json(payload): Json<EnrollStudentRequest>,
) -> Result<(StatusCode, Json<EnrollmentResponse>), ApiError> {
    let newly_enrolled = catalog::enroll_student(
        &state,
        &current.identity(),
        &course_id,
        &payload.student_id,
        primitive_now_utc(),
    )
    .await?;

    let status = if newly_enrolled { StatusCode::CREATED } else { StatusCode::OK };
    Ok((
        status,
        Json(EnrollmentResponse { course_id, student_id: payload.student_id, newly_enrolled }),
    ))
}
