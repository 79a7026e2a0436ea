// HTTP error handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::fmt;

/// Result type for HTTP handlers
pub type AppResult<T> = Result<T, AppError>;

/// Application error with HTTP status code
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message)
    }

    pub fn quota_exhausted() -> Self {
        Self::new(
            StatusCode::TOO_MANY_REQUESTS,
            "今日订阅额度已用完，请明天再试",
        )
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.status, self.message)
    }
}

impl std::error::Error for AppError {}

impl From<mediagate_core::Error> for AppError {
    fn from(err: mediagate_core::Error) -> Self {
        use mediagate_core::Error;
        match &err {
            Error::NotFound(m) => Self::not_found(m.clone()),
            Error::AlreadyExists(m) => Self::conflict(m.clone()),
            Error::InvalidInput(m) => Self::bad_request(m.clone()),
            Error::QuotaExhausted(_) => Self::quota_exhausted(),
            _ => Self::internal(err.to_string()),
        }
    }
}

/// Error response JSON structure
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
    status: u16,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            error: self.message,
            status: self.status.as_u16(),
        };
        (self.status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_error_mapping() {
        let err: AppError = mediagate_core::Error::NotFound("missing".into()).into();
        assert_eq!(err.status, StatusCode::NOT_FOUND);

        let err: AppError = mediagate_core::Error::InvalidInput("bad".into()).into();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);

        let err: AppError = mediagate_core::Error::QuotaExhausted("daily".into()).into();
        assert_eq!(err.status, StatusCode::TOO_MANY_REQUESTS);

        let err: AppError = mediagate_core::Error::Internal("boom".into()).into();
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
