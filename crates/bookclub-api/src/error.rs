use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

/// All API failures collapse into one of these. Every response body is
/// `{"message": …}` JSON.
///
/// Login failures deliberately reuse one body for both an unknown identifier
/// and a wrong password, so callers cannot enumerate accounts.
#[derive(Error, Debug, PartialEq)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    /// Uniform login failure — same body for unknown user and bad password.
    #[error("User not found")]
    InvalidCredentials,

    /// Missing, malformed, or expired bearer token.
    #[error("Invalid token")]
    InvalidToken,

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::InvalidCredentials | ApiError::InvalidToken => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(json!({ "message": self.to_string() }))).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        ApiError::Internal(e.to_string())
    }
}
