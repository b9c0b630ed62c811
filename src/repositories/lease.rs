//! # Lease Repository
//!
//! This module provides database operations for lease records.

use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DatabaseTransaction, EntityTrait,
    QueryFilter, Set,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::models::lease::{self, ActiveModel, Entity, Model};
use crate::workflow::WorkflowState;

/// Fields required to create a lease; identifiers are minted by the
/// allocator before this is persisted.
#[derive(Debug, Clone)]
pub struct NewLease {
    pub reference_number: String,
    pub serial_number: String,
    pub lease_type: String,
    pub zone: String,
    pub tenant_id: Uuid,
    pub landlord_id: Option<Uuid>,
    pub unit_id: Option<Uuid>,
    pub tenant_phone: String,
    pub approver_contact: Option<String>,
}

/// Repository for lease database operations
pub struct LeaseRepository {
    db: Arc<DatabaseConnection>,
}

impl LeaseRepository {
    /// Create a new lease repository
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Persist a new lease in DRAFT.
    pub async fn create(&self, new_lease: NewLease, now: DateTime<Utc>) -> Result<Model, sea_orm::DbErr> {
        let model = ActiveModel {
            id: Set(Uuid::new_v4()),
            reference_number: Set(new_lease.reference_number),
            serial_number: Set(new_lease.serial_number),
            lease_type: Set(new_lease.lease_type),
            zone: Set(new_lease.zone),
            tenant_id: Set(new_lease.tenant_id),
            landlord_id: Set(new_lease.landlord_id),
            unit_id: Set(new_lease.unit_id),
            tenant_phone: Set(new_lease.tenant_phone),
            approver_contact: Set(new_lease.approver_contact),
            workflow_state: Set(WorkflowState::Draft.as_str().to_string()),
            notes: Set(None),
            renewal_offered_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
            deleted_at: Set(None),
        };

        model.insert(self.db.as_ref()).await
    }

    /// Find a lease by id, excluding soft-retired rows.
    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<Model>, sea_orm::DbErr> {
        Entity::find_by_id(id)
            .filter(lease::Column::DeletedAt.is_null())
            .one(self.db.as_ref())
            .await
    }

    /// Find a lease by its serial number (public verification path).
    pub async fn find_by_serial(&self, serial: &str) -> Result<Option<Model>, sea_orm::DbErr> {
        Entity::find()
            .filter(lease::Column::SerialNumber.eq(serial))
            .filter(lease::Column::DeletedAt.is_null())
            .one(self.db.as_ref())
            .await
    }

    /// Find a lease by its reference number.
    pub async fn find_by_reference(
        &self,
        reference: &str,
    ) -> Result<Option<Model>, sea_orm::DbErr> {
        Entity::find()
            .filter(lease::Column::ReferenceNumber.eq(reference))
            .filter(lease::Column::DeletedAt.is_null())
            .one(self.db.as_ref())
            .await
    }

    /// Append a note to a lease inside a caller-managed transaction.
    pub async fn append_note_in_txn(
        &self,
        txn: &DatabaseTransaction,
        lease: Model,
        note: &str,
        now: DateTime<Utc>,
    ) -> Result<Model, sea_orm::DbErr> {
        let combined = match &lease.notes {
            Some(existing) => format!("{existing}{note}"),
            None => note.to_string(),
        };

        let mut active: ActiveModel = lease.into();
        active.notes = Set(Some(combined));
        active.updated_at = Set(now);
        active.update(txn).await
    }

    /// Soft-retire a lease. The row is kept forever; retired leases are
    /// invisible to every other lookup in this repository.
    pub async fn soft_retire(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool, sea_orm::DbErr> {
        let Some(lease) = self.find_by_id(id).await? else {
            return Ok(false);
        };

        let mut active: ActiveModel = lease.into();
        active.deleted_at = Set(Some(now));
        active.updated_at = Set(now);
        active.update(self.db.as_ref()).await?;

        Ok(true)
    }
}
