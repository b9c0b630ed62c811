//! # Lease API Handlers
//!
//! Staff-facing endpoints: lease creation (which mints both identifiers),
//! workflow transitions, renewal offers, signing initiation, and the audit
//! trail read side.

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::{ApiError, validation_error};
use crate::models::lease::LeaseResponse;
use crate::repositories::{NewAuditEvent, NewLease};
use crate::sequence::LeaseType;
use crate::server::AppState;
use crate::signing::{DeliveryMethod, InitiateOutcome};
use crate::sms::PhoneFormatter;
use crate::workflow::{ActorContext, WorkflowState};

use super::client_ip;

/// Request payload for creating a new lease
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CreateLeaseRequestDto {
    /// Lease type key (residential, commercial, residential_major, residential_micro)
    #[schema(example = "commercial")]
    pub lease_type: String,
    /// Zone code
    #[schema(example = "A")]
    pub zone: String,
    /// Tenant ID
    pub tenant_id: Uuid,
    /// Landlord ID (optional during drafting)
    pub landlord_id: Option<Uuid>,
    /// Unit ID (optional during drafting)
    pub unit_id: Option<Uuid>,
    /// Phone number OTP challenges will be sent to
    #[schema(example = "+254712345678")]
    pub tenant_phone: String,
    /// Contact of the staff member responsible for approvals
    pub approver_contact: Option<String>,
    /// Acting staff identifier recorded in the audit trail
    #[schema(example = "agent.wambui")]
    pub actor: Option<String>,
}

/// Request payload for a workflow transition
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TransitionRequestDto {
    /// Target workflow state
    #[schema(example = "received")]
    pub target_state: String,
    /// Acting staff identifier recorded in the audit trail
    pub actor: Option<String>,
}

/// Request payload for initiating digital signing
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct InitiateSigningRequestDto {
    /// Delivery method override: sms, notify, or both
    pub method: Option<String>,
    /// Acting staff identifier recorded in the audit trail
    pub actor: Option<String>,
}

/// Request payload for offering a renewal
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RenewalOfferRequestDto {
    /// Acting staff identifier recorded in the audit trail
    pub actor: Option<String>,
}

/// Audit entry representation returned by the API
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AuditEntryResponse {
    /// Entry id (canonical ordering)
    pub id: i64,
    /// Action kind
    pub action: String,
    /// State before the action
    pub old_state: Option<String>,
    /// State after the action
    pub new_state: Option<String>,
    /// Who performed the action
    pub actor: String,
    /// When the entry was recorded (ISO 8601)
    pub created_at: String,
    /// Human-readable summary
    pub description: String,
}

fn actor_context(actor: Option<String>, headers: &HeaderMap) -> ActorContext {
    let mut ctx = ActorContext::new(actor.unwrap_or_else(|| "staff".to_string()));
    if let Some(ip) = client_ip(headers) {
        ctx = ctx.with_ip(ip);
    }
    ctx
}

/// Create a new lease
///
/// Mints a reference number and a serial number from their independent
/// counters and admits the lease into DRAFT.
#[utoipa::path(
    post,
    path = "/api/v1/leases",
    request_body = CreateLeaseRequestDto,
    responses(
        (status = 201, description = "Lease created", body = LeaseResponse),
        (status = 400, description = "Validation failed", body = ApiError),
        (status = 500, description = "Identifier allocation failed", body = ApiError)
    ),
    tag = "leases"
)]
pub async fn create_lease(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CreateLeaseRequestDto>,
) -> Result<(StatusCode, Json<LeaseResponse>), ApiError> {
    let lease_type: LeaseType = request.lease_type.parse().map_err(|_| {
        validation_error(
            "Unknown lease type",
            serde_json::json!({ "field": "lease_type", "value": request.lease_type }),
        )
    })?;

    let zone = request.zone.trim().to_uppercase();
    if zone.is_empty() || zone.len() > 8 {
        return Err(validation_error(
            "Zone must be 1-8 characters",
            serde_json::json!({ "field": "zone" }),
        ));
    }

    if !PhoneFormatter::is_valid(&request.tenant_phone) {
        return Err(validation_error(
            "Invalid tenant phone number",
            serde_json::json!({ "field": "tenant_phone" }),
        ));
    }

    let reference_number = state
        .allocator
        .allocate_reference(&zone, lease_type, None)
        .await?;
    let serial_number = state
        .allocator
        .allocate_serial(&state.config.serial.prefix, None)
        .await?;

    let now = state.clock.now();
    let lease = state
        .leases
        .create(
            NewLease {
                reference_number,
                serial_number,
                lease_type: lease_type.as_str().to_string(),
                zone,
                tenant_id: request.tenant_id,
                landlord_id: request.landlord_id,
                unit_id: request.unit_id,
                tenant_phone: request.tenant_phone,
                approver_contact: request.approver_contact,
            },
            now,
        )
        .await?;

    let ctx = actor_context(request.actor, &headers);
    state
        .audit
        .append(
            NewAuditEvent {
                lease_id: lease.id,
                action: "lease_created".to_string(),
                actor: ctx.actor,
                ip_address: ctx.ip_address,
                payload: Some(serde_json::json!({
                    "reference_number": lease.reference_number,
                    "serial_number": lease.serial_number,
                })),
                description: format!("Lease {} created", lease.reference_number),
            },
            now,
        )
        .await?;

    Ok((StatusCode::CREATED, Json(lease.into())))
}

/// Fetch a lease by id
#[utoipa::path(
    get,
    path = "/api/v1/leases/{id}",
    params(("id" = Uuid, Path, description = "Lease ID")),
    responses(
        (status = 200, description = "Lease found", body = LeaseResponse),
        (status = 404, description = "Lease not found", body = ApiError)
    ),
    tag = "leases"
)]
pub async fn get_lease(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<LeaseResponse>, ApiError> {
    let lease = state
        .leases
        .find_by_id(id)
        .await?
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, "NOT_FOUND", "Lease not found"))?;

    Ok(Json(lease.into()))
}

/// Soft-retire a lease
///
/// The row is kept forever for the audit trail; the lease simply disappears
/// from every operational lookup.
#[utoipa::path(
    delete,
    path = "/api/v1/leases/{id}",
    params(("id" = Uuid, Path, description = "Lease ID")),
    responses(
        (status = 204, description = "Lease retired"),
        (status = 404, description = "Lease not found", body = ApiError)
    ),
    tag = "leases"
)]
pub async fn retire_lease(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    let now = state.clock.now();

    if !state.leases.soft_retire(id, now).await? {
        return Err(ApiError::new(
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            "Lease not found",
        ));
    }

    let ctx = actor_context(None, &headers);
    state
        .audit
        .append(
            NewAuditEvent {
                lease_id: id,
                action: "lease_retired".to_string(),
                actor: ctx.actor,
                ip_address: ctx.ip_address,
                payload: None,
                description: "Lease soft-retired".to_string(),
            },
            now,
        )
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

/// Transition a lease to a new workflow state
#[utoipa::path(
    post,
    path = "/api/v1/leases/{id}/transition",
    params(("id" = Uuid, Path, description = "Lease ID")),
    request_body = TransitionRequestDto,
    responses(
        (status = 200, description = "Transition applied", body = LeaseResponse),
        (status = 400, description = "Unknown target state", body = ApiError),
        (status = 404, description = "Lease not found", body = ApiError),
        (status = 409, description = "Illegal transition", body = ApiError)
    ),
    tag = "leases"
)]
pub async fn transition_lease(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(request): Json<TransitionRequestDto>,
) -> Result<Json<LeaseResponse>, ApiError> {
    let target: WorkflowState = request.target_state.parse().map_err(|_| {
        validation_error(
            "Unknown workflow state",
            serde_json::json!({ "field": "target_state", "value": request.target_state }),
        )
    })?;

    let ctx = actor_context(request.actor, &headers);
    let lease = state.workflow.transition(id, target, &ctx, None).await?;

    Ok(Json(lease.into()))
}

/// Offer a renewal for an active lease
///
/// Permitted at most once per lease; a second offer fails even after the
/// lease returned to ACTIVE.
#[utoipa::path(
    post,
    path = "/api/v1/leases/{id}/renewal-offer",
    params(("id" = Uuid, Path, description = "Lease ID")),
    request_body = RenewalOfferRequestDto,
    responses(
        (status = 200, description = "Renewal offered", body = LeaseResponse),
        (status = 404, description = "Lease not found", body = ApiError),
        (status = 409, description = "Illegal transition or renewal already offered", body = ApiError)
    ),
    tag = "leases"
)]
pub async fn offer_renewal(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(request): Json<RenewalOfferRequestDto>,
) -> Result<Json<LeaseResponse>, ApiError> {
    let ctx = actor_context(request.actor, &headers);
    let lease = state.workflow.offer_renewal(id, &ctx).await?;

    Ok(Json(lease.into()))
}

/// Initiate digital signing for a lease
#[utoipa::path(
    post,
    path = "/api/v1/leases/{id}/signing/initiate",
    params(("id" = Uuid, Path, description = "Lease ID")),
    request_body = InitiateSigningRequestDto,
    responses(
        (status = 200, description = "Signing initiated", body = InitiateOutcome),
        (status = 404, description = "Lease not found", body = ApiError),
        (status = 409, description = "Illegal transition", body = ApiError)
    ),
    tag = "leases"
)]
pub async fn initiate_signing(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(request): Json<InitiateSigningRequestDto>,
) -> Result<Json<InitiateOutcome>, ApiError> {
    let method = match request.method.as_deref() {
        Some(raw) => Some(raw.parse::<DeliveryMethod>().map_err(|_| {
            validation_error(
                "Unknown delivery method",
                serde_json::json!({ "field": "method", "value": raw }),
            )
        })?),
        None => None,
    };

    let ctx = actor_context(request.actor, &headers);
    let outcome = state.signing.initiate(id, method, &ctx).await?;

    Ok(Json(outcome))
}

/// Read the audit trail for a lease
#[utoipa::path(
    get,
    path = "/api/v1/leases/{id}/audit",
    params(("id" = Uuid, Path, description = "Lease ID")),
    responses(
        (status = 200, description = "Audit trail", body = [AuditEntryResponse]),
        (status = 404, description = "Lease not found", body = ApiError)
    ),
    tag = "leases"
)]
pub async fn lease_audit_trail(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<AuditEntryResponse>>, ApiError> {
    if state.leases.find_by_id(id).await?.is_none() {
        return Err(ApiError::new(
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            "Lease not found",
        ));
    }

    let entries = state
        .audit
        .list_for_lease(id)
        .await?
        .into_iter()
        .map(|entry| AuditEntryResponse {
            id: entry.id,
            action: entry.action,
            old_state: entry.old_state,
            new_state: entry.new_state,
            actor: entry.actor,
            created_at: entry.created_at.to_rfc3339(),
            description: entry.description,
        })
        .collect();

    Ok(Json(entries))
}
