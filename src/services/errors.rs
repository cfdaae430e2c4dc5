use thiserror::Error;

use crate::repositories::StoreError;
use crate::services::access::DenyReason;

/// Broad outcome classes the HTTP layer maps to status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ErrorKind {
    Unauthorized,
    Forbidden,
    NotFound,
    Conflict,
    InvalidInput,
    DeadlineExpired,
    StorageUnavailable,
}

#[derive(Debug, Error)]
pub(crate) enum ExamError {
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("{0}")]
    Forbidden(DenyReason),
    #[error("student is not enrolled in this course")]
    NotEnrolled,
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("test deadline has passed")]
    PastDeadline,
    #[error("test attempt is already over")]
    AlreadyOver,
    #[error("time limit for this attempt has expired")]
    TimeExpired,
    #[error("no active attempt for this test")]
    TestNotActive,
    #[error("test attempt is already finished")]
    AlreadyFinished,
    #[error("question is not open-ended")]
    NotOpenQuestion,
    #[error("{0}")]
    InvalidPayload(String),
    #[error("{0}")]
    InvalidInput(String),
    #[error("{0}")]
    Conflict(String),
    #[error("storage unavailable: {0}")]
    Storage(#[from] StoreError),
}

impl ExamError {
    pub(crate) fn kind(&self) -> ErrorKind {
        match self {
            ExamError::InvalidCredentials => ErrorKind::Unauthorized,
            ExamError::Forbidden(_) | ExamError::NotEnrolled => ErrorKind::Forbidden,
            ExamError::NotFound(_) => ErrorKind::NotFound,
            ExamError::PastDeadline | ExamError::AlreadyOver | ExamError::TimeExpired => {
                ErrorKind::DeadlineExpired
            }
            ExamError::TestNotActive | ExamError::AlreadyFinished | ExamError::Conflict(_) => {
                ErrorKind::Conflict
            }
            ExamError::NotOpenQuestion
            | ExamError::InvalidPayload(_)
            | ExamError::InvalidInput(_) => ErrorKind::InvalidInput,
            ExamError::Storage(_) => ErrorKind::StorageUnavailable,
        }
    }

    /// Stable machine-readable code for clients.
    pub(crate) fn code(&self) -> &'static str {
        match self {
            ExamError::InvalidCredentials => "invalid_credentials",
            ExamError::Forbidden(reason) => reason.code(),
            ExamError::NotEnrolled => "not_enrolled",
            ExamError::NotFound(_) => "not_found",
            ExamError::PastDeadline => "past_deadline",
            ExamError::AlreadyOver => "already_over",
            ExamError::TimeExpired => "time_expired",
            ExamError::TestNotActive => "test_not_active",
            ExamError::AlreadyFinished => "already_finished",
            ExamError::NotOpenQuestion => "not_open_question",
            ExamError::InvalidPayload(_) => "invalid_payload",
            ExamError::InvalidInput(_) => "invalid_input",
            ExamError::Conflict(_) => "conflict",
            ExamError::Storage(_) => "storage_unavailable",
        }
    }
}

pub(crate) type ExamResult<T> = Result<T, ExamError>;
