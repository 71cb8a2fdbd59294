use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;

// ---------------------------------------------------------------------------
// Domain errors
// ---------------------------------------------------------------------------

pub type CoreResult<T> = Result<T, CoreError>;

/// Errors raised by the presence and notification core.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// Missing, malformed, expired or otherwise unacceptable credential.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The caller tried to act on another user's resources.
    #[error("not allowed to access another user's resources")]
    AuthorizationFailed,

    #[error("validation failed: {0}")]
    ValidationFailed(String),

    /// The target does not exist, or is not owned by the caller.
    #[error("{0} not found")]
    NotFound(String),

    /// The store adapter failed.
    #[error("store error: {0}")]
    Store(String),
}

impl CoreError {
    pub fn auth(reason: impl Into<String>) -> Self {
        Self::AuthenticationFailed(reason.into())
    }

    pub fn validation(reason: impl Into<String>) -> Self {
        Self::ValidationFailed(reason.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }
}

// ---------------------------------------------------------------------------
// HTTP errors
// ---------------------------------------------------------------------------

/// Structured API error returned to clients.
#[derive(Debug, Serialize, ToSchema)]
pub struct ApiErrorBody {
    pub error: ApiErrorDetail,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ApiErrorDetail {
    pub code: String,
    pub message: String,
}

/// Application-level error type that converts into an HTTP response.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: String,
    pub message: String,
}

impl ApiError {
    fn new(status: StatusCode, code: &str, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.to_string(),
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, "FORBIDDEN", message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiErrorBody {
            error: ApiErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::AuthenticationFailed(reason) => {
                tracing::debug!(%reason, "authentication failed");
                Self::unauthorized("Invalid or expired token")
            }
            CoreError::AuthorizationFailed => {
                Self::forbidden("You do not have access to this resource")
            }
            CoreError::ValidationFailed(message) => {
                Self::new(StatusCode::BAD_REQUEST, "VALIDATION_ERROR", message)
            }
            CoreError::NotFound(what) => Self::not_found(format!("{what} not found")),
            CoreError::Store(err) => {
                tracing::error!(%err, "store error");
                Self::internal("An internal error occurred")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_errors_map_to_status_codes() {
        let cases = [
            (CoreError::auth("expired"), StatusCode::UNAUTHORIZED),
            (CoreError::AuthorizationFailed, StatusCode::FORBIDDEN),
            (CoreError::validation("bad type"), StatusCode::BAD_REQUEST),
            (CoreError::not_found("Notification"), StatusCode::NOT_FOUND),
            (CoreError::Store("down".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status, status);
        }
    }

    #[test]
    fn store_errors_do_not_leak_details() {
        let api = ApiError::from(CoreError::Store("connection refused to 10.0.0.3".into()));
        assert_eq!(api.message, "An internal error occurred");
    }

    #[test]
    fn validation_errors_carry_the_reason() {
        let api = ApiError::from(CoreError::validation("title must not be empty"));
        assert_eq!(api.status, StatusCode::BAD_REQUEST);
        assert_eq!(api.code, "VALIDATION_ERROR");
        assert_eq!(api.message, "title must not be empty");
    }
}
