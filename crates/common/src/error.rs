// Shared error taxonomy for the lease manager and task dispatcher HTTP services.
//
// Mirrors the Contention / Not-found / Transient-storage / Invariant-violation
// taxonomy: every handler error collapses into one of a small set of codes,
// each with a fixed status and retryability, rendered as a uniform JSON
// envelope.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::request_id::{attach_request_id_header, current_request_id};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Lease already held by someone else, lease lost, or task not owned.
    Conflict,
    /// Referenced id/resource does not exist.
    NotFound,
    /// Request body failed basic shape validation.
    ValidationFailed,
    /// Storage failure or an invariant that should be structurally
    /// impossible; not retried automatically by the caller.
    Internal,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Conflict => "conflict",
            ErrorCode::NotFound => "not_found",
            ErrorCode::ValidationFailed => "validation_failed",
            ErrorCode::Internal => "internal",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ErrorCode::Conflict => StatusCode::CONFLICT,
            ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::ValidationFailed => StatusCode::BAD_REQUEST,
            ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Only transient-storage failures are safe for a caller to retry
    /// blindly; contention and not-found require the caller to re-derive
    /// state first.
    pub fn retryable(&self) -> bool {
        matches!(self, ErrorCode::Internal)
    }
}

#[derive(Debug, Clone)]
pub struct AppError {
    pub code: ErrorCode,
    pub message: String,
}

impl AppError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Conflict, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ValidationFailed, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message)
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code.as_str(), self.message)
    }
}

impl std::error::Error for AppError {}

impl From<sqlx::Error> for AppError {
    fn from(error: sqlx::Error) -> Self {
        match error {
            sqlx::Error::RowNotFound => AppError::not_found("row not found"),
            other => AppError::internal(other.to_string()),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: ErrorDetail<'a>,
}

#[derive(Serialize)]
struct ErrorDetail<'a> {
    code: &'static str,
    message: &'a str,
    retryable: bool,
    request_id: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.code.status();
        let request_id = current_request_id();
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.as_str(),
                message: &self.message,
                retryable: self.code.retryable(),
                request_id: request_id.clone(),
            },
        };
        let mut response = (status, Json(body)).into_response();
        if let Some(request_id) = request_id {
            attach_request_id_header(&mut response, &request_id);
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_maps_to_409_and_is_not_retryable() {
        let error = AppError::conflict("lease held by another holder");
        assert_eq!(error.code.status(), StatusCode::CONFLICT);
        assert!(!error.code.retryable());
    }

    #[test]
    fn internal_is_the_only_retryable_code() {
        assert!(ErrorCode::Internal.retryable());
        assert!(!ErrorCode::Conflict.retryable());
        assert!(!ErrorCode::NotFound.retryable());
        assert!(!ErrorCode::ValidationFailed.retryable());
    }

    #[test]
    fn row_not_found_maps_to_not_found_error_code() {
        let error: AppError = sqlx::Error::RowNotFound.into();
        assert_eq!(error.code, ErrorCode::NotFound);
    }

    #[tokio::test]
    async fn into_response_stamps_the_scoped_request_id() {
        use crate::request_id::with_request_id_scope;
        use axum::body::to_bytes;

        let response = with_request_id_scope("req-error-789".to_owned(), async {
            AppError::not_found("no such lease").into_response()
        })
        .await;

        assert_eq!(response.headers().get("x-request-id").unwrap(), "req-error-789");
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["error"]["request_id"], "req-error-789");
    }

    #[test]
    fn into_response_omits_request_id_outside_a_scope() {
        let response = AppError::internal("boom").into_response();
        assert!(response.headers().get("x-request-id").is_none());
    }
}
