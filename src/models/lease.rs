//! # Lease Model
//!
//! This module contains the lease entity, the aggregate the signing and
//! verification workflow revolves around.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::workflow::WorkflowState;

/// Lease entity carrying the two human-facing identifiers and the workflow state
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "leases")]
pub struct Model {
    /// Primary key UUID
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Human-readable reference number, e.g. `LSE-COM-A-00001-2026`.
    /// Immutable once assigned, globally unique.
    pub reference_number: String,

    /// Document serial number, e.g. `LSE-2026-0001`. Allocated from an
    /// independent counter, also immutable and unique.
    pub serial_number: String,

    /// Lease type key (residential, commercial, ...)
    pub lease_type: String,

    /// Zone code the lease belongs to
    pub zone: String,

    /// Tenant who signs the lease
    pub tenant_id: Uuid,

    /// Landlord party (optional during drafting)
    pub landlord_id: Option<Uuid>,

    /// Unit under lease (optional during drafting)
    pub unit_id: Option<Uuid>,

    /// Phone number OTP challenges are sent to
    pub tenant_phone: String,

    /// Contact of the staff member responsible for approvals; dispute
    /// notifications fall back to the admin fan-out when absent
    pub approver_contact: Option<String>,

    /// Current workflow state; mutated only through the state machine
    pub workflow_state: String,

    /// Free-form notes; dispute notes are appended here
    pub notes: Option<String>,

    /// Set the first (and only) time a renewal is offered
    pub renewal_offered_at: Option<chrono::DateTime<chrono::Utc>>,

    /// When the lease was created
    pub created_at: chrono::DateTime<chrono::Utc>,

    /// When the lease was last updated
    pub updated_at: chrono::DateTime<chrono::Utc>,

    /// Soft-retire marker; leases are never physically deleted
    pub deleted_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Parse the persisted workflow state into the closed enum.
    ///
    /// A row holding an unknown state means the database no longer matches
    /// the code; surfaced as a database error rather than coerced.
    pub fn state(&self) -> Result<WorkflowState, sea_orm::DbErr> {
        self.workflow_state.parse().map_err(|_| {
            sea_orm::DbErr::Custom(format!(
                "lease {} holds unknown workflow state '{}'",
                self.id, self.workflow_state
            ))
        })
    }

    /// Whether the lease has been soft-retired.
    pub fn is_retired(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Lease representation returned by the API
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LeaseResponse {
    /// Lease ID
    pub id: Uuid,
    /// Reference number
    pub reference_number: String,
    /// Serial number
    pub serial_number: String,
    /// Lease type key
    pub lease_type: String,
    /// Zone code
    pub zone: String,
    /// Current workflow state
    pub workflow_state: String,
    /// Tenant ID
    pub tenant_id: Uuid,
    /// Creation timestamp (ISO 8601)
    pub created_at: String,
}

impl From<Model> for LeaseResponse {
    fn from(model: Model) -> Self {
        Self {
            id: model.id,
            reference_number: model.reference_number,
            serial_number: model.serial_number,
            lease_type: model.lease_type,
            zone: model.zone,
            workflow_state: model.workflow_state,
            tenant_id: model.tenant_id,
            created_at: model.created_at.to_rfc3339(),
        }
    }
}
