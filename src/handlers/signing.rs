//! # Tenant Signing Handlers
//!
//! Tenant-facing endpoints reached through the signed link: OTP request,
//! verification, signature capture, status, and dispute. Every route
//! validates the link token (expiry and recipient binding) before the engine
//! is invoked, and error responses stay generic so the endpoints cannot be
//! used to enumerate leases or phone numbers.

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::Json,
};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::dispute::DisputeReason;
use crate::error::{ApiError, EngineError, validation_error};
use crate::models::otp_challenge::ChallengeStatus;
use crate::server::AppState;
use crate::signed_link::SignedLinkError;
use crate::signing::{SignaturePayload, SigningStatus};
use crate::workflow::ActorContext;

use super::{client_ip, request_signals};

/// Signed-link parameters appended to every tenant signing URL
#[derive(Debug, Deserialize, IntoParams)]
pub struct LinkParams {
    /// Tenant the link was issued to
    pub tenant: Uuid,
    /// Link expiry (unix seconds)
    pub expires: i64,
    /// HMAC token binding lease, tenant, and expiry
    pub token: String,
}

/// Request payload for verifying an OTP code
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct VerifyOtpRequestDto {
    /// The code received via SMS
    #[schema(example = "0421")]
    pub code: String,
}

/// Response for a verification attempt
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct VerifyOtpResponseDto {
    /// Whether the code was accepted
    pub verified: bool,
}

/// Request payload for raising a dispute
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DisputeRequestDto {
    /// Dispute reason key
    #[schema(example = "wrong_dates")]
    pub reason: String,
    /// Optional free-form comment
    pub comment: Option<String>,
}

/// Response for a captured signature
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SignatureResponseDto {
    /// Signature id
    pub id: Uuid,
    /// Content hash stored for integrity checks
    pub verification_hash: String,
    /// Capture timestamp (ISO 8601)
    pub signed_at: String,
}

fn verify_link(
    state: &AppState,
    lease_id: Uuid,
    params: &LinkParams,
) -> Result<(), ApiError> {
    state
        .links
        .verify(lease_id, params.tenant, params.expires, &params.token)
        .map_err(|err| match err {
            SignedLinkError::Expired => EngineError::Expired {
                subject: "signing link",
            }
            .into(),
            _ => EngineError::VerificationFailed.into(),
        })
}

fn tenant_context(headers: &HeaderMap) -> ActorContext {
    let mut ctx = ActorContext::new("tenant");
    if let Some(ip) = client_ip(headers) {
        ctx = ctx.with_ip(ip);
    }
    ctx
}

/// Request an OTP for the signing session
#[utoipa::path(
    post,
    path = "/api/v1/sign/{lease_id}/otp/request",
    params(("lease_id" = Uuid, Path, description = "Lease ID"), LinkParams),
    responses(
        (status = 200, description = "Code dispatched", body = ChallengeStatus),
        (status = 401, description = "Invalid link", body = ApiError),
        (status = 410, description = "Link expired", body = ApiError),
        (status = 429, description = "Too many codes requested", body = ApiError),
        (status = 502, description = "SMS delivery failed", body = ApiError)
    ),
    tag = "signing"
)]
pub async fn request_otp(
    State(state): State<AppState>,
    Path(lease_id): Path<Uuid>,
    Query(params): Query<LinkParams>,
    headers: HeaderMap,
) -> Result<Json<ChallengeStatus>, ApiError> {
    verify_link(&state, lease_id, &params)?;

    let signals = request_signals(&headers);
    let ctx = tenant_context(&headers);

    let status = state.signing.request_otp(lease_id, &signals, &ctx).await?;
    Ok(Json(status))
}

/// Re-send the OTP, invalidating all previous codes
#[utoipa::path(
    post,
    path = "/api/v1/sign/{lease_id}/otp/resend",
    params(("lease_id" = Uuid, Path, description = "Lease ID"), LinkParams),
    responses(
        (status = 200, description = "Code re-sent", body = ChallengeStatus),
        (status = 401, description = "Invalid link", body = ApiError),
        (status = 429, description = "Too many codes requested", body = ApiError)
    ),
    tag = "signing"
)]
pub async fn resend_otp(
    State(state): State<AppState>,
    Path(lease_id): Path<Uuid>,
    Query(params): Query<LinkParams>,
    headers: HeaderMap,
) -> Result<Json<ChallengeStatus>, ApiError> {
    verify_link(&state, lease_id, &params)?;

    let signals = request_signals(&headers);
    let ctx = tenant_context(&headers);

    let status = state.signing.resend_otp(lease_id, &signals, &ctx).await?;
    Ok(Json(status))
}

/// Verify a submitted OTP code
#[utoipa::path(
    post,
    path = "/api/v1/sign/{lease_id}/otp/verify",
    params(("lease_id" = Uuid, Path, description = "Lease ID"), LinkParams),
    request_body = VerifyOtpRequestDto,
    responses(
        (status = 200, description = "Code accepted", body = VerifyOtpResponseDto),
        (status = 401, description = "Verification failed", body = ApiError)
    ),
    tag = "signing"
)]
pub async fn verify_otp(
    State(state): State<AppState>,
    Path(lease_id): Path<Uuid>,
    Query(params): Query<LinkParams>,
    headers: HeaderMap,
    Json(request): Json<VerifyOtpRequestDto>,
) -> Result<Json<VerifyOtpResponseDto>, ApiError> {
    verify_link(&state, lease_id, &params)?;

    if request.code.is_empty() || request.code.len() > 8 {
        // Same generic response as a wrong code
        return Err(EngineError::VerificationFailed.into());
    }

    let signals = request_signals(&headers);
    let ctx = tenant_context(&headers);

    let verified = state
        .signing
        .verify_otp(lease_id, &request.code, &signals, &ctx)
        .await?;

    if verified {
        Ok(Json(VerifyOtpResponseDto { verified: true }))
    } else {
        Err(EngineError::VerificationFailed.into())
    }
}

/// Capture the tenant's signature
#[utoipa::path(
    post,
    path = "/api/v1/sign/{lease_id}/signature",
    params(("lease_id" = Uuid, Path, description = "Lease ID"), LinkParams),
    request_body = SignaturePayload,
    responses(
        (status = 201, description = "Signature captured", body = SignatureResponseDto),
        (status = 401, description = "Invalid link", body = ApiError),
        (status = 409, description = "Not eligible to sign", body = ApiError)
    ),
    tag = "signing"
)]
pub async fn capture_signature(
    State(state): State<AppState>,
    Path(lease_id): Path<Uuid>,
    Query(params): Query<LinkParams>,
    headers: HeaderMap,
    Json(payload): Json<SignaturePayload>,
) -> Result<(StatusCode, Json<SignatureResponseDto>), ApiError> {
    verify_link(&state, lease_id, &params)?;

    if payload.signature_data.is_empty() {
        return Err(validation_error(
            "Signature payload is required",
            serde_json::json!({ "field": "signature_data" }),
        ));
    }

    let signals = request_signals(&headers);
    let ctx = tenant_context(&headers);

    let signature = state
        .signing
        .capture_signature(lease_id, payload, &signals, &ctx)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(SignatureResponseDto {
            id: signature.id,
            verification_hash: signature.verification_hash,
            signed_at: signature.signed_at.to_rfc3339(),
        }),
    ))
}

/// Signing progress for the lease
#[utoipa::path(
    get,
    path = "/api/v1/sign/{lease_id}/status",
    params(("lease_id" = Uuid, Path, description = "Lease ID"), LinkParams),
    responses(
        (status = 200, description = "Signing status", body = SigningStatus),
        (status = 401, description = "Invalid link", body = ApiError)
    ),
    tag = "signing"
)]
pub async fn signing_status(
    State(state): State<AppState>,
    Path(lease_id): Path<Uuid>,
    Query(params): Query<LinkParams>,
) -> Result<Json<SigningStatus>, ApiError> {
    verify_link(&state, lease_id, &params)?;

    let status = state.signing.signing_status(lease_id).await?;
    Ok(Json(status))
}

/// Raise a dispute for the lease
#[utoipa::path(
    post,
    path = "/api/v1/sign/{lease_id}/dispute",
    params(("lease_id" = Uuid, Path, description = "Lease ID"), LinkParams),
    request_body = DisputeRequestDto,
    responses(
        (status = 204, description = "Dispute recorded"),
        (status = 401, description = "Invalid link", body = ApiError),
        (status = 409, description = "Lease cannot be disputed", body = ApiError)
    ),
    tag = "signing"
)]
pub async fn dispute_lease(
    State(state): State<AppState>,
    Path(lease_id): Path<Uuid>,
    Query(params): Query<LinkParams>,
    headers: HeaderMap,
    Json(request): Json<DisputeRequestDto>,
) -> Result<StatusCode, ApiError> {
    verify_link(&state, lease_id, &params)?;

    let reason: DisputeReason = request.reason.parse().map_err(|_| {
        validation_error(
            "Unknown dispute reason",
            serde_json::json!({ "field": "reason", "value": request.reason }),
        )
    })?;

    let ctx = tenant_context(&headers);
    state
        .disputes
        .dispute(lease_id, reason, request.comment.as_deref(), &ctx)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}
