//! API error mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::error::EngineError;

/// Wraps the domain error so handlers can use `?` and still produce the
/// documented status codes and `{error, detail}` bodies.
#[derive(Debug)]
pub struct ApiError(pub EngineError);

pub type ApiResult<T> = std::result::Result<T, ApiError>;

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        Self(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            EngineError::InvalidRunId(_) => StatusCode::BAD_REQUEST,
            EngineError::NotFound(_) => StatusCode::NOT_FOUND,
            EngineError::InvalidTransition { .. } => StatusCode::CONFLICT,
            EngineError::MissingResolutionReason => StatusCode::UNPROCESSABLE_ENTITY,
            EngineError::ConfigInvalid(_)
            | EngineError::Persistence(_)
            | EngineError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match &self.0 {
            EngineError::InvalidRunId(_) => "invalid_run_id",
            EngineError::NotFound(_) => "not_found",
            EngineError::InvalidTransition { .. } => "invalid_transition",
            EngineError::MissingResolutionReason => "missing_resolution_reason",
            EngineError::ConfigInvalid(_) => "config_invalid",
            EngineError::Persistence(_) | EngineError::Serialization(_) => "persistence_error",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({
            "error": self.code(),
            "detail": self.0.to_string(),
        });
        (self.status(), Json(body)).into_response()
    }
}

/// 400 with a plain detail message, for request-shape errors that never
/// reach the domain layer.
pub fn bad_request(detail: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({"error": "bad_request", "detail": detail})),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::IncidentStatus;

    #[test]
    fn test_status_codes() {
        let cases = [
            (EngineError::InvalidRunId("x".into()), StatusCode::BAD_REQUEST),
            (EngineError::NotFound("incident".into()), StatusCode::NOT_FOUND),
            (
                EngineError::InvalidTransition {
                    from: IncidentStatus::Open,
                    to: IncidentStatus::Closed,
                },
                StatusCode::CONFLICT,
            ),
            (
                EngineError::MissingResolutionReason,
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (
                EngineError::ConfigInvalid(vec!["bad".into()]),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, expected) in cases {
            assert_eq!(ApiError(err).status(), expected);
        }
    }
}
