// Errors surfaced by the HTTP handlers. Recoverable path errors keep their
// message; anything 5xx collapses to a generic "<Status> [<code>]" body so
// internals never leak to clients.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use std::fmt;

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
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.status)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = if self.status.is_server_error() {
            tracing::error!(status = %self.status, "{}", self.message);
            format!(
                "{} [{}]",
                self.status.canonical_reason().unwrap_or("Error"),
                self.status.as_u16()
            )
        } else {
            self.message
        };
        (self.status, body).into_response()
    }
}

impl From<vtuner_core::Error> for AppError {
    fn from(err: vtuner_core::Error) -> Self {
        use vtuner_core::Error;

        let status = match &err {
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Forbidden(_) => StatusCode::FORBIDDEN,
            Error::TooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            Error::Authentication(_) => StatusCode::UNAUTHORIZED,
            Error::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Error::Cancelled(_) => StatusCode::REQUEST_TIMEOUT,
            Error::Upstream(_)
            | Error::NotAnM3u8(_)
            | Error::UnsupportedContentType(_)
            | Error::Transient(_) => StatusCode::BAD_GATEWAY,
            Error::Fs(_) | Error::Internal(_) | Error::Config(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self::new(status, err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            format!("invalid request data: {err}"),
        )
    }
}
