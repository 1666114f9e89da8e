use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::auth::AuthError;

/// Error returned by HTTP handlers
#[derive(Debug)]
pub enum ApiError {
    /// Unknown user, bad password, missing or invalid token
    Forbidden(String),
    BadRequest(String),
    Internal(anyhow::Error),
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    code: u16,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiError::Forbidden(msg) => write!(f, "forbidden: {}", msg),
            ApiError::BadRequest(msg) => write!(f, "bad request: {}", msg),
            ApiError::Internal(e) => write!(f, "internal error: {:#}", e),
        }
    }
}

impl std::error::Error for ApiError {}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::HashingFailed | AuthError::TokenGenerationFailed => {
                ApiError::Internal(anyhow::Error::new(err))
            }
            other => ApiError::Forbidden(other.to_string()),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Internal(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let error = match &self {
            ApiError::Internal(e) => {
                tracing::error!("Request failed: {:#}", e);
                "internal server error".to_string()
            }
            other => other.to_string(),
        };
        let body = ErrorBody {
            error,
            code: status.as_u16(),
        };
        (status, Json(body)).into_response()
    }
}
