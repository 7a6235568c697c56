use std::fmt;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use resizewatch_core::ResizeError;
use serde_json::json;

pub type AppResult<T> = Result<T, AppError>;

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

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, message)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "success": false,
            "message": self.message,
        }));

        (self.status, body).into_response()
    }
}

impl From<ResizeError> for AppError {
    fn from(err: ResizeError) -> Self {
        let message = err.to_string();
        match err {
            ResizeError::InvalidPath(_) | ResizeError::InvalidPolicy(_) => {
                Self::bad_request(message)
            }
            ResizeError::NotConfigured(_) | ResizeError::Busy(_) => Self::conflict(message),
            ResizeError::WatchSubscription(_) => Self::unavailable(message),
            _ => Self::internal(message),
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resize_errors_map_to_statuses() {
        let cases = [
            (ResizeError::InvalidPath("x".into()), StatusCode::BAD_REQUEST),
            (ResizeError::InvalidPolicy("x".into()), StatusCode::BAD_REQUEST),
            (ResizeError::NotConfigured("x".into()), StatusCode::CONFLICT),
            (ResizeError::Busy("x".into()), StatusCode::CONFLICT),
            (
                ResizeError::WatchSubscription("x".into()),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                ResizeError::Internal("x".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(AppError::from(err).status, status);
        }
    }

    #[test]
    fn message_is_the_error_text() {
        let err = AppError::from(ResizeError::InvalidPath(
            "Source folder does not exist: /nope".into(),
        ));
        assert_eq!(err.message, "Source folder does not exist: /nope");
    }
}
