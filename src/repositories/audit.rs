//! # Audit Repository
//!
//! Read side and non-transactional append for the lease audit trail. The
//! repository deliberately exposes no update or delete: the table is
//! append-only and its row order is the canonical transition ordering.

use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::models::audit_entry::{self, ActiveModel, Entity, Model};

/// Fields for a non-transition audit event (disputes, resends, cleanup).
#[derive(Debug, Clone)]
pub struct NewAuditEvent {
    pub lease_id: Uuid,
    pub action: String,
    pub actor: String,
    pub ip_address: Option<String>,
    pub payload: Option<serde_json::Value>,
    pub description: String,
}

/// Repository for audit trail database operations
pub struct AuditRepository {
    db: Arc<DatabaseConnection>,
}

impl AuditRepository {
    /// Create a new audit repository
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Append an audit event outside of a workflow transition.
    pub async fn append(
        &self,
        event: NewAuditEvent,
        now: DateTime<Utc>,
    ) -> Result<Model, sea_orm::DbErr> {
        let entry = ActiveModel {
            lease_id: Set(event.lease_id),
            action: Set(event.action),
            old_state: Set(None),
            new_state: Set(None),
            actor: Set(event.actor),
            ip_address: Set(event.ip_address),
            payload: Set(event.payload),
            description: Set(event.description),
            created_at: Set(now),
            ..Default::default()
        };

        entry.insert(self.db.as_ref()).await
    }

    /// Full trail for a lease in transition order.
    pub async fn list_for_lease(&self, lease_id: Uuid) -> Result<Vec<Model>, sea_orm::DbErr> {
        Entity::find()
            .filter(audit_entry::Column::LeaseId.eq(lease_id))
            .order_by_asc(audit_entry::Column::Id)
            .all(self.db.as_ref())
            .await
    }

    /// Number of entries recorded for a lease.
    pub async fn count_for_lease(&self, lease_id: Uuid) -> Result<u64, sea_orm::DbErr> {
        Entity::find()
            .filter(audit_entry::Column::LeaseId.eq(lease_id))
            .count(self.db.as_ref())
            .await
    }

    /// Number of entries for a lease with the given action kind.
    pub async fn count_for_lease_action(
        &self,
        lease_id: Uuid,
        action: &str,
    ) -> Result<u64, sea_orm::DbErr> {
        Entity::find()
            .filter(audit_entry::Column::LeaseId.eq(lease_id))
            .filter(audit_entry::Column::Action.eq(action))
            .count(self.db.as_ref())
            .await
    }
}
