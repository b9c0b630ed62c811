//! # Lease Audit Entry Model
//!
//! Append-only audit trail. Every workflow transition writes exactly one
//! entry; entries are never updated or deleted, and their ordering is the
//! canonical ordering of transitions for a lease.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Audit entry entity
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "lease_audit_entries")]
pub struct Model {
    /// Monotonic primary key
    #[sea_orm(primary_key)]
    pub id: i64,

    /// Lease the entry belongs to
    pub lease_id: Uuid,

    /// Action kind, e.g. "state_transition", "dispute_raised"
    pub action: String,

    /// Workflow state before the action, when applicable
    pub old_state: Option<String>,

    /// Workflow state after the action, when applicable
    pub new_state: Option<String>,

    /// Who performed the action (staff id, "tenant", or "system")
    pub actor: String,

    /// IP address of the originating request
    pub ip_address: Option<String>,

    /// Structured context for the action
    pub payload: Option<Json>,

    /// Human-readable summary
    pub description: String,

    /// When the entry was recorded
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
