use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::repositories::StoreError;
use crate::services::errors::{ErrorKind, ExamError};

#[derive(Debug, Serialize)]
struct ErrorResponse {
    status: u16,
    detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<&'static str>,
}

#[derive(Debug)]
pub(crate) enum ApiError {
    Unauthorized(&'static str),
    BadRequest(String),
    TooManyRequests(&'static str),
    Internal(String),
    /// A typed exam outcome with its stable code.
    Exam { status: StatusCode, code: &'static str, detail: String },
}

impl ApiError {
    /// Log the underlying error with context and return an `Internal` variant.
    pub(crate) fn internal(err: impl std::fmt::Display, context: &str) -> Self {
        tracing::error!(error = %err, "{context}");
        Self::Internal(context.to_string())
    }
}

impl From<ExamError> for ApiError {
    fn from(err: ExamError) -> Self {
        let status = match err.kind() {
            ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorKind::Forbidden => StatusCode::FORBIDDEN,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::InvalidInput | ErrorKind::DeadlineExpired => StatusCode::BAD_REQUEST,
            ErrorKind::StorageUnavailable => {
                tracing::error!(error = %err, "Storage unavailable");
                StatusCode::SERVICE_UNAVAILABLE
            }
        };
        let detail = match &err {
            ExamError::Storage(_) => "Storage unavailable".to_string(),
            other => other.to_string(),
        };
        ApiError::Exam { status, code: err.code(), detail }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ExamError::from(err).into()
    }
}

fn respond(status: StatusCode, detail: String, code: Option<&'static str>) -> Response {
    (status, Json(ErrorResponse { status: status.as_u16(), detail, code })).into_response()
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Unauthorized(message) => {
                let mut response = respond(StatusCode::UNAUTHORIZED, message.to_string(), None);
                response
                    .headers_mut()
                    .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
                response
            }
            ApiError::BadRequest(message) => respond(StatusCode::BAD_REQUEST, message, None),
            ApiError::TooManyRequests(message) => {
                respond(StatusCode::TOO_MANY_REQUESTS, message.to_string(), None)
            }
            ApiError::Internal(message) => {
                tracing::error!(error = %message, "Internal server error");
                respond(StatusCode::INTERNAL_SERVER_ERROR, message, None)
            }
            ApiError::Exam { status, code, detail } => {
                let mut response = respond(status, detail, Some(code));
                if status == StatusCode::UNAUTHORIZED {
                    response
                        .headers_mut()
                        .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
                }
                response
            }
        }
    }
}
