//! # Public Verification Handlers
//!
//! Anyone holding a printed lease can check its authenticity by serial
//! number. Only basic information is disclosed: the endpoint confirms the
//! document exists and whether it is in force, nothing more.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::ApiError;
use crate::sequence::is_valid_serial;
use crate::server::AppState;
use crate::workflow::WorkflowState;

/// Public verification result (basic info only)
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct VerificationResponseDto {
    /// The serial number that was checked
    pub serial_number: String,
    /// Whether a document with this serial exists
    pub exists: bool,
    /// Workflow state label, when the document exists
    pub status: Option<String>,
    /// Whether the lease is currently in force
    pub is_active: bool,
}

/// Verify a lease document by serial number
#[utoipa::path(
    get,
    path = "/api/v1/verify/{serial}",
    params(("serial" = String, Path, description = "Document serial number")),
    responses(
        (status = 200, description = "Verification result", body = VerificationResponseDto),
        (status = 400, description = "Malformed serial number", body = ApiError)
    ),
    tag = "verification"
)]
pub async fn verify_serial(
    State(state): State<AppState>,
    Path(serial): Path<String>,
) -> Result<Json<VerificationResponseDto>, ApiError> {
    if !is_valid_serial(&serial) {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "VALIDATION_FAILED",
            "Malformed serial number",
        ));
    }

    let lease = state.leases.find_by_serial(&serial).await?;

    let response = match lease {
        Some(lease) => {
            let state_enum = lease.state()?;
            VerificationResponseDto {
                serial_number: serial,
                exists: true,
                status: Some(state_enum.label().to_string()),
                is_active: state_enum == WorkflowState::Active,
            }
        }
        None => VerificationResponseDto {
            serial_number: serial,
            exists: false,
            status: None,
            is_active: false,
        },
    };

    Ok(Json(response))
}
