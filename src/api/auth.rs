use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use uuid::Uuid;

use crate::api::errors::ApiError;
use crate::api::guards::CurrentUser;
use crate::api::validation::{validate_payload, validate_username};
use crate::core::security;
use crate::core::state::AppState;
use crate::core::time::primitive_now_utc;
use crate::db::models::User;
use crate::db::types::UserRole;
use crate::repositories::NewUser;
use crate::schemas::auth::TokenResponse;
use crate::schemas::user::{UserCreate, UserLogin, UserResponse};
use crate::services::errors::ExamError;

/// Max attempts per window for auth endpoints (register/login).
const AUTH_RATE_LIMIT: u64 = 10;
/// Rate limit window in seconds.
const AUTH_RATE_WINDOW_SECONDS: u64 = 60;

pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/me", get(me))
}

async fn enforce_rate_limit(
    state: &AppState,
    action: &str,
    username: &str,
) -> Result<(), ApiError> {
    let rate_key = format!("rl:{action}:{username}");
    let allowed = state
        .redis()
        .rate_limit(&rate_key, AUTH_RATE_LIMIT, AUTH_RATE_WINDOW_SECONDS)
        .await
        .unwrap_or(true);
    if allowed {
        Ok(())
    } else {
        Err(ApiError::TooManyRequests("Too many attempts, try again later"))
    }
}

fn issue_token(state: &AppState, user: User) -> Result<TokenResponse, ApiError> {
    let token = security::create_access_token(&user.id, user.role, state.settings().security(), None)
        .map_err(|e| ApiError::internal(e, "Failed to create access token"))?;
    Ok(TokenResponse::bearer(token, UserResponse::from_db(user)))
}

async fn register(
    State(state): State<AppState>,
    Json(payload): Json<UserCreate>,
) -> Result<(StatusCode, Json<TokenResponse>), ApiError> {
    validate_payload(&payload)?;
    validate_username(&payload.username)?;
    enforce_rate_limit(&state, "register", &payload.username).await?;

    // Admin accounts only come from bootstrap.
    if payload.role == UserRole::Admin {
        return Err(ApiError::BadRequest("Cannot self-register as admin".to_string()));
    }

    let hashed_password = security::hash_password(&payload.password)
        .map_err(|e| ApiError::internal(e, "Failed to hash password"))?;

    let user = state
        .store()
        .create_user(NewUser {
            id: Uuid::new_v4().to_string(),
            username: payload.username,
            hashed_password,
            role: payload.role,
            is_active: true,
            created_at: primitive_now_utc(),
        })
        .await?
        .ok_or_else(|| ExamError::Conflict("Username is already taken".to_string()))?;

    tracing::info!(user_id = %user.id, role = user.role.as_str(), "User registered");

    Ok((StatusCode::CREATED, Json(issue_token(&state, user)?)))
}

async fn login(
    State(state): State<AppState>,
    Json(payload): Json<UserLogin>,
) -> Result<Json<TokenResponse>, ApiError> {
    enforce_rate_limit(&state, "login", &payload.username).await?;

    let user = state
        .store()
        .find_user_by_username(&payload.username)
        .await?
        .ok_or(ExamError::InvalidCredentials)?;

    let verified = security::verify_password(&payload.password, &user.hashed_password)
        .unwrap_or(false);
    if !verified {
        return Err(ExamError::InvalidCredentials.into());
    }

    if !user.is_active {
        return Err(ApiError::BadRequest("Inactive user".to_string()));
    }

    Ok(Json(issue_token(&state, user)?))
}

async fn me(CurrentUser(user): CurrentUser) -> Json<UserResponse> {
    Json(UserResponse::from_db(user))
}
