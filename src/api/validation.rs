use validator::Validate;

use crate::api::errors::ApiError;

pub(crate) fn validate_payload<T: Validate>(payload: &T) -> Result<(), ApiError> {
    payload.validate().map_err(|e| ApiError::BadRequest(e.to_string()))
}

/// Letters, digits and `@ . + - _`.
pub(crate) fn validate_username(username: &str) -> Result<(), ApiError> {
    let valid = !username.is_empty()
        && username.chars().all(|c| c.is_alphanumeric() || matches!(c, '@' | '.' | '+' | '-' | '_'));
    if valid {
        Ok(())
    } else {
        Err(ApiError::BadRequest(
            "Username may only contain letters, digits and @/./+/-/_".to_string(),
        ))
    }
}
