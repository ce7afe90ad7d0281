//! Maps `memoria_core::Error` onto HTTP status codes, per spec §7.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use memoria_core::Error as CoreError;

use crate::types::Envelope;

/// Wraps a core error so it can be returned directly from an axum handler.
pub struct ApiError(pub CoreError);

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        Self(err)
    }
}

fn status_for(err: &CoreError) -> StatusCode {
    match err {
        CoreError::Validation(_) | CoreError::DimensionMismatch { .. } => StatusCode::BAD_REQUEST,
        CoreError::NotFound(_) => StatusCode::NOT_FOUND,
        CoreError::Permission(_) => StatusCode::FORBIDDEN,
        CoreError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        CoreError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        CoreError::Capacity(_) | CoreError::Dependency(_) | CoreError::Internal(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(code = self.0.code(), "{}", self.0);
        } else {
            tracing::debug!(code = self.0.code(), "{}", self.0);
        }
        let body: Envelope<()> = Envelope {
            status: "error",
            data: None,
            error: Some(self.0.code().to_string()),
            message: Some(self.0.to_string()),
            meta: None,
        };
        (status, Json(body)).into_response()
    }
}

/// Authentication/authorization failures that never reach the core (missing
/// or unrecognized API key) — distinct from `Error::Permission`, which is a
/// key lacking the needed scope.
pub struct AuthError {
    pub status: StatusCode,
    pub message: &'static str,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let body: Envelope<()> = Envelope {
            status: "error",
            data: None,
            error: Some("unauthorized".to_string()),
            message: Some(self.message.to_string()),
            meta: None,
        };
        (self.status, Json(body)).into_response()
    }
}
