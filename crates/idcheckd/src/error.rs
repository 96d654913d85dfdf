use crate::engine::EngineError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use idcheck_core::VerifyError;
use serde_json::json;
use std::time::Duration;
use thiserror::Error;

/// Everything a handler can fail with, rendered as `{"error": message}`.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Verify(#[from] VerifyError),
    #[error("invalid multipart request: {0}")]
    Multipart(String),
    #[error("missing form field '{0}'")]
    MissingField(&'static str),
    #[error("verification timed out after {0:?}")]
    Timeout(Duration),
    #[error("verification engine unavailable: {0}")]
    Unavailable(String),
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Verify(e) => ApiError::Verify(e),
            EngineError::Timeout(t) => ApiError::Timeout(t),
            EngineError::Unavailable(m) => ApiError::Unavailable(m),
        }
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Verify(e) => StatusCode::from_u16(e.status_code())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            ApiError::Multipart(_) | ApiError::MissingField(_) => StatusCode::BAD_REQUEST,
            ApiError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ApiError::Unavailable(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::Verify(e) => e.kind(),
            ApiError::Multipart(_) => "multipart",
            ApiError::MissingField(_) => "missing_field",
            ApiError::Timeout(_) => "timeout",
            ApiError::Unavailable(_) => "unavailable",
        }
    }

    fn public_message(&self) -> String {
        match self {
            ApiError::Verify(e) => e.public_message(),
            ApiError::Unavailable(_) => "verification engine unavailable".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        tracing::error!(status = status.as_u16(), kind = self.kind(), error = %self, "request failed");
        (status, Json(json!({ "error": self.public_message() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(ApiError::from(VerifyError::EmptyInput).status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ApiError::from(VerifyError::MultipleFaces(3)).status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ApiError::from(VerifyError::Ocr("boom".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(ApiError::MissingField("image").status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ApiError::from(EngineError::Timeout(Duration::from_secs(30))).status(),
            StatusCode::GATEWAY_TIMEOUT
        );
    }

    #[test]
    fn test_internal_detail_not_exposed() {
        let err = ApiError::from(VerifyError::Verification("segfault in worker 3".into()));
        assert!(!err.public_message().contains("worker 3"));
        assert_eq!(err.kind(), "verification");
    }
}
