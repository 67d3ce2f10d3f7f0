//! Error-to-response mapping.
//!
//! Every failure leaves the service as `{"error": <code>, "message": ...}`
//! with a stable wire code and an appropriate status. Validation failures
//! are 400s, lookups 404s, everything storage-shaped is a 500 the caller
//! may retry.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use proveniq_ledger::AppendError;
use proveniq_store_core::StoreError;
use proveniq_types::ErrorCode;
use proveniq_verify::ProofError;
use proveniq_webhook::WebhookError;

/// A renderable API failure.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: ErrorCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    /// 400 with the given code.
    pub fn bad_request(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, code, message)
    }

    /// 404 with the given code.
    pub fn not_found(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, code, message)
    }

    /// 401 missing credentials.
    pub fn unauthorized() -> Self {
        Self::new(
            StatusCode::UNAUTHORIZED,
            ErrorCode::Unauthorized,
            "missing API key",
        )
    }

    /// 403 wrong credentials.
    pub fn forbidden() -> Self {
        Self::new(StatusCode::FORBIDDEN, ErrorCode::Forbidden, "invalid API key")
    }

    /// 409 for uniqueness conflicts on registration endpoints.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, ErrorCode::InvalidPayload, message)
    }

    /// 500 with `INTERNAL_ERROR`.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, ErrorCode::InternalError, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.code.as_str(),
            "message": self.message,
        }));
        (self.status, body).into_response()
    }
}

impl From<AppendError> for ApiError {
    fn from(err: AppendError) -> Self {
        let status = match &err {
            AppendError::Validation(_) => StatusCode::BAD_REQUEST,
            AppendError::Retriable(_) | AppendError::Storage(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self::new(status, err.code(), err.to_string())
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::SubscriptionExists => Self::conflict(err.to_string()),
            other => Self::internal(other.to_string()),
        }
    }
}

impl From<ProofError> for ApiError {
    fn from(err: ProofError) -> Self {
        match &err {
            ProofError::NotFound => Self::not_found(err.code(), err.to_string()),
            ProofError::Append(inner) => {
                let status = match inner {
                    AppendError::Validation(_) => StatusCode::BAD_REQUEST,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                Self::new(status, err.code(), err.to_string())
            }
            ProofError::Storage(_) => Self::internal(err.to_string()),
        }
    }
}

impl From<WebhookError> for ApiError {
    fn from(err: WebhookError) -> Self {
        Self::internal(err.to_string())
    }
}
