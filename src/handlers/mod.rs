//! # API Handlers
//!
//! This module contains all the HTTP endpoint handlers for the lease engine.

use axum::http::HeaderMap;
use axum::response::Json;

use crate::fingerprint::RequestSignals;
use crate::models::ServiceInfo;

pub mod leases;
pub mod signing;
pub mod verification;

/// Root handler that returns basic service information
#[utoipa::path(
    get,
    path = "/",
    responses(
        (status = 200, description = "Service information", body = ServiceInfo)
    ),
    tag = "root"
)]
pub async fn root() -> Json<ServiceInfo> {
    Json(ServiceInfo::default())
}

/// Liveness endpoint
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy", body = ServiceInfo)
    ),
    tag = "root"
)]
pub async fn health() -> Json<ServiceInfo> {
    Json(ServiceInfo::default())
}

/// Best-effort client IP: first hop of `X-Forwarded-For`, else `X-Real-IP`.
pub(crate) fn client_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .or_else(|| {
            headers
                .get("x-real-ip")
                .and_then(|value| value.to_str().ok())
                .map(|value| value.to_string())
        })
}

/// Collect risk-scoring signals from the request.
pub(crate) fn request_signals(headers: &HeaderMap) -> RequestSignals {
    RequestSignals::from_headers(headers, client_ip(headers))
}
