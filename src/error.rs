//! # Error Handling
//!
//! This module provides unified error handling for the lease engine: the
//! [`EngineError`] domain taxonomy and the problem+json [`ApiError`] response
//! format with trace ID propagation.

use axum::{
    extract::rejection::JsonRejection,
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;

use crate::telemetry;
use crate::workflow::WorkflowState;

/// Domain errors surfaced by the signing & verification engine.
///
/// Expected conditions (rate limits, verification failures, illegal
/// transitions) are values, not panics; callers are forced to handle each
/// kind. Allocator and state-machine errors abort the enclosing transaction
/// and are never swallowed; transport failures are isolated and recoverable.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Attempted state change not permitted from the current state. Never
    /// retried automatically.
    #[error("illegal workflow transition from {from} to {to}")]
    IllegalTransition {
        from: WorkflowState,
        to: WorkflowState,
    },

    /// Too many OTP challenges issued for this lease; retry after the hint.
    #[error("too many verification codes requested; retry in {retry_after_seconds}s")]
    RateLimited { retry_after_seconds: u64 },

    /// OTP challenge or signing link past its validity window.
    #[error("{subject} has expired")]
    Expired { subject: &'static str },

    /// Wrong code or tampered link. Deliberately carries no detail that
    /// would reveal whether the lease or phone exists.
    #[error("verification failed")]
    VerificationFailed,

    /// Sequence allocator retry budget exceeded. Fatal: requires operator
    /// intervention, never silently returns a duplicate identifier.
    #[error("sequence allocation exhausted after {attempts} attempts for {key}")]
    AllocationExhausted { key: String, attempts: u32 },

    /// SMS/notification delivery failed. The triggering state change has
    /// already been recovered locally (e.g. the challenge was expired).
    #[error("transport delivery failed: {message}")]
    TransportFailure { message: String },

    /// A lease carrying an active signature cannot be disputed.
    #[error("lease has an active signature and cannot be disputed")]
    AlreadySigned,

    /// A renewal may be offered at most once per lease.
    #[error("a renewal has already been offered for this lease")]
    RenewalAlreadyOffered,

    /// Signature capture attempted without a verified challenge.
    #[error("lease is not eligible for signature capture")]
    NotEligibleToSign,

    /// Lock acquisition or transaction exceeded the caller's deadline.
    /// Retryable.
    #[error("operation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("lease not found")]
    LeaseNotFound,

    #[error(transparent)]
    Database(#[from] sea_orm::DbErr),
}

impl EngineError {
    /// Whether a caller may reasonably retry the same operation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Timeout { .. })
    }
}

/// Unified API error response structure
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ApiError {
    /// HTTP status code for the response
    #[serde(skip_serializing, skip_deserializing)]
    pub status: StatusCode,
    /// Error code for programmatic handling
    pub code: Box<str>,
    /// Human-readable error message
    pub message: Box<str>,
    /// Additional error details (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Box<serde_json::Value>>,
    /// Suggested retry delay in seconds (optional)
    pub retry_after: Option<u64>,
    /// Correlation trace ID for debugging (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<Box<str>>,
}

impl ApiError {
    /// Create a new API error with the given status code and message
    pub fn new<S: Into<String>>(status: StatusCode, code: S, message: S) -> Self {
        Self {
            status,
            code: code.into().into_boxed_str(),
            message: message.into().into_boxed_str(),
            details: None,
            retry_after: None,
            trace_id: Self::current_trace_id(),
        }
    }

    /// Add details to the error
    pub fn with_details<V: Into<serde_json::Value>>(mut self, details: V) -> Self {
        self.details = Some(Box::new(details.into()));
        self
    }

    /// Set retry after delay
    pub fn with_retry_after(mut self, seconds: u64) -> Self {
        self.retry_after = Some(seconds);
        self
    }

    /// Extract current trace ID from the active tracing span (falls back to generated correlation ID)
    fn current_trace_id() -> Option<Box<str>> {
        telemetry::current_trace_id()
            .map(|trace_id| trace_id.into_boxed_str())
            .or_else(|| {
                // Fallback: generate a correlation ID for basic client-server log correlation
                Some(format!("corr-{}", &uuid::Uuid::new_v4().to_string()[..8]).into_boxed_str())
            })
    }
}

pub(crate) fn is_unique_violation(error: &sea_orm::DbErr) -> bool {
    use sea_orm::RuntimeErr;

    const PG_UNIQUE: &str = "23505";
    const SQLITE_DUPLICATE_CODES: &[&str] = &["1555", "2067"];

    let runtime_err = match error {
        sea_orm::DbErr::Query(RuntimeErr::SqlxError(sqlx_err))
        | sea_orm::DbErr::Exec(RuntimeErr::SqlxError(sqlx_err)) => sqlx_err,
        _ => return false,
    };

    let Some(db_error) = runtime_err.as_database_error() else {
        return false;
    };

    if db_error.is_unique_violation() {
        return true;
    }

    if let Some(code) = db_error.code() {
        let code_str = code.as_ref();
        if code_str == PG_UNIQUE || SQLITE_DUPLICATE_CODES.contains(&code_str) {
            return true;
        }
    }

    false
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut headers = HeaderMap::new();
        headers.insert(
            "content-type",
            HeaderValue::from_static("application/problem+json"),
        );

        // Add Retry-After header if present
        if let Some(retry_after) = self.retry_after
            && let Ok(header_value) = HeaderValue::from_str(&retry_after.to_string())
        {
            headers.insert("retry-after", header_value);
        }

        (self.status, headers, axum::Json(self)).into_response()
    }
}

// Error mappers for common sources

impl From<EngineError> for ApiError {
    fn from(error: EngineError) -> Self {
        match error {
            EngineError::IllegalTransition { ref from, ref to } => ApiError::new(
                StatusCode::CONFLICT,
                "ILLEGAL_TRANSITION",
                &format!("Cannot transition lease from {from} to {to}"),
            ),
            EngineError::RateLimited {
                retry_after_seconds,
            } => ApiError::new(
                StatusCode::TOO_MANY_REQUESTS,
                "RATE_LIMITED",
                "Too many verification codes requested",
            )
            .with_retry_after(retry_after_seconds),
            EngineError::Expired { .. } => ApiError::new(
                StatusCode::GONE,
                "EXPIRED",
                "This code or link has expired",
            ),
            // Generic on purpose: no internal state enumeration for attackers
            EngineError::VerificationFailed => ApiError::new(
                StatusCode::UNAUTHORIZED,
                "VERIFICATION_FAILED",
                "Verification failed",
            ),
            EngineError::AllocationExhausted { ref key, attempts } => {
                tracing::error!(key = %key, attempts, "sequence allocation exhausted");
                ApiError::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "ALLOCATION_EXHAUSTED",
                    "Failed to allocate a unique document identifier",
                )
            }
            EngineError::TransportFailure { ref message } => {
                tracing::warn!(error = %message, "transport delivery failed");
                ApiError::new(
                    StatusCode::BAD_GATEWAY,
                    "TRANSPORT_FAILURE",
                    "Message delivery failed; please retry",
                )
            }
            EngineError::AlreadySigned => ApiError::new(
                StatusCode::CONFLICT,
                "ALREADY_SIGNED",
                "This lease has already been signed and cannot be disputed",
            ),
            EngineError::RenewalAlreadyOffered => ApiError::new(
                StatusCode::CONFLICT,
                "RENEWAL_ALREADY_OFFERED",
                "A renewal has already been offered for this lease",
            ),
            EngineError::NotEligibleToSign => ApiError::new(
                StatusCode::CONFLICT,
                "NOT_ELIGIBLE_TO_SIGN",
                "Lease is not eligible for signature capture",
            ),
            EngineError::Timeout { timeout_ms } => ApiError::new(
                StatusCode::SERVICE_UNAVAILABLE,
                "TIMEOUT",
                "Operation timed out; please retry",
            )
            .with_retry_after(timeout_ms.div_ceil(1000).max(1)),
            EngineError::LeaseNotFound => {
                ApiError::new(StatusCode::NOT_FOUND, "NOT_FOUND", "Lease not found")
            }
            EngineError::Database(db_err) => db_err.into(),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(error: anyhow::Error) -> Self {
        // Log the full error for debugging
        tracing::error!("Internal error: {:?}", error);

        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "INTERNAL_SERVER_ERROR",
            "An internal error occurred",
        )
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        let message = match rejection {
            JsonRejection::JsonDataError(err) => format!("Invalid JSON: {}", err),
            JsonRejection::JsonSyntaxError(err) => format!("JSON syntax error: {}", err),
            JsonRejection::MissingJsonContentType(_) => {
                "Missing 'Content-Type: application/json' header".to_string()
            }
            _ => "Invalid request body".to_string(),
        };

        Self::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", &message)
    }
}

impl From<sea_orm::DbErr> for ApiError {
    fn from(error: sea_orm::DbErr) -> Self {
        if is_unique_violation(&error) {
            tracing::debug!(?error, "Unique constraint violation detected");
            return Self::new(StatusCode::CONFLICT, "CONFLICT", "Resource already exists");
        }

        match error {
            sea_orm::DbErr::RecordNotFound(record) => Self::new(
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                &format!("Record not found: {}", record),
            ),
            sea_orm::DbErr::Conn(connection_err) => {
                tracing::error!("Database connection error: {:?}", connection_err);
                Self::new(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "SERVICE_UNAVAILABLE",
                    "Database service unavailable",
                )
            }
            _ => {
                tracing::error!("Database error: {:?}", error);
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_SERVER_ERROR",
                    "Database error occurred",
                )
            }
        }
    }
}

/// Create a validation error with field details
pub fn validation_error(message: &str, field_errors: serde_json::Value) -> ApiError {
    ApiError::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", message).with_details(field_errors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_api_error_basic() {
        let error = ApiError::new(
            StatusCode::BAD_REQUEST,
            "VALIDATION_FAILED",
            "Test error message",
        );

        assert_eq!(error.code, Box::from("VALIDATION_FAILED"));
        assert_eq!(error.message, Box::from("Test error message"));
        assert_eq!(error.details, None);
        assert_eq!(error.retry_after, None);
    }

    #[test]
    fn test_rate_limited_maps_to_429_with_retry_after() {
        let api_error: ApiError = EngineError::RateLimited {
            retry_after_seconds: 1800,
        }
        .into();

        assert_eq!(api_error.status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(api_error.code, Box::from("RATE_LIMITED"));
        assert_eq!(api_error.retry_after, Some(1800));

        let response = api_error.into_response();
        assert_eq!(response.headers().get("retry-after").unwrap(), "1800");
        assert_eq!(
            response.headers().get("content-type").unwrap(),
            "application/problem+json"
        );
    }

    #[test]
    fn test_illegal_transition_maps_to_conflict() {
        let api_error: ApiError = EngineError::IllegalTransition {
            from: WorkflowState::Disputed,
            to: WorkflowState::Disputed,
        }
        .into();

        assert_eq!(api_error.status, StatusCode::CONFLICT);
        assert_eq!(api_error.code, Box::from("ILLEGAL_TRANSITION"));
        assert!(api_error.message.contains("disputed"));
    }

    #[test]
    fn test_verification_failure_is_generic() {
        // The response must not reveal whether the lease, phone, or challenge
        // exists.
        let api_error: ApiError = EngineError::VerificationFailed.into();

        assert_eq!(api_error.status, StatusCode::UNAUTHORIZED);
        assert_eq!(api_error.message, Box::from("Verification failed"));
        assert!(api_error.details.is_none());
    }

    #[test]
    fn test_timeout_is_retryable() {
        let err = EngineError::Timeout { timeout_ms: 2500 };
        assert!(err.is_retryable());

        let api_error: ApiError = err.into();
        assert_eq!(api_error.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(api_error.retry_after, Some(3));

        assert!(!EngineError::VerificationFailed.is_retryable());
        assert!(
            !EngineError::AllocationExhausted {
                key: "A/2026/commercial".to_string(),
                attempts: 100,
            }
            .is_retryable()
        );
    }

    #[test]
    fn test_database_error_mapping() {
        let db_error = sea_orm::DbErr::RecordNotFound("lease".to_string());
        let api_error: ApiError = db_error.into();

        assert_eq!(api_error.status, StatusCode::NOT_FOUND);
        assert_eq!(api_error.code, Box::from("NOT_FOUND"));
    }

    #[test]
    fn test_validation_error_with_details() {
        let field_errors = json!({
            "phone": "Phone number is required"
        });

        let err = validation_error("Validation failed", field_errors.clone());

        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.code, Box::from("VALIDATION_FAILED"));
        assert_eq!(err.details, Some(Box::new(field_errors)));
    }

    #[test]
    fn test_trace_id_generation() {
        let error = ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "INTERNAL_SERVER_ERROR",
            "Test error",
        );

        assert!(error.trace_id.is_some());
        let trace_id = error.trace_id.unwrap();
        assert!(trace_id.starts_with("corr-"));
        assert_eq!(trace_id.len(), 13); // "corr-" + 8 chars
    }
}
