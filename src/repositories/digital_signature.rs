//! # Digital Signature Repository
//!
//! This module provides database operations for captured signatures.
//! Signatures are versioned: re-capture supersedes rather than overwrites,
//! keeping at most one active row per lease.

use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    Set,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::models::digital_signature::{self, ActiveModel, Entity, Model, payload_hash};

/// Fields captured alongside a signature payload.
#[derive(Debug, Clone)]
pub struct NewSignature {
    pub lease_id: Uuid,
    pub tenant_id: Uuid,
    pub signature_data: String,
    pub signature_type: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub otp_challenge_id: Option<Uuid>,
}

/// Repository for digital signature database operations
pub struct DigitalSignatureRepository {
    db: Arc<DatabaseConnection>,
}

impl DigitalSignatureRepository {
    /// Create a new digital signature repository
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Persist a captured signature, computing its content hash.
    pub async fn create(
        &self,
        signature: NewSignature,
        now: DateTime<Utc>,
    ) -> Result<Model, sea_orm::DbErr> {
        let verification_hash = payload_hash(&signature.signature_data);

        let model = ActiveModel {
            id: Set(Uuid::new_v4()),
            lease_id: Set(signature.lease_id),
            tenant_id: Set(signature.tenant_id),
            signature_data: Set(signature.signature_data),
            signature_type: Set(signature.signature_type),
            ip_address: Set(signature.ip_address),
            user_agent: Set(signature.user_agent),
            latitude: Set(signature.latitude),
            longitude: Set(signature.longitude),
            otp_challenge_id: Set(signature.otp_challenge_id),
            verification_hash: Set(verification_hash),
            signed_at: Set(now),
            superseded_at: Set(None),
            created_at: Set(now),
        };

        model.insert(self.db.as_ref()).await
    }

    /// The lease's active signature, if any.
    pub async fn active_for_lease(&self, lease_id: Uuid) -> Result<Option<Model>, sea_orm::DbErr> {
        Entity::find()
            .filter(digital_signature::Column::LeaseId.eq(lease_id))
            .filter(digital_signature::Column::SupersededAt.is_null())
            .one(self.db.as_ref())
            .await
    }

    /// Whether the lease carries an active signature.
    pub async fn has_active(&self, lease_id: Uuid) -> Result<bool, sea_orm::DbErr> {
        let count = Entity::find()
            .filter(digital_signature::Column::LeaseId.eq(lease_id))
            .filter(digital_signature::Column::SupersededAt.is_null())
            .count(self.db.as_ref())
            .await?;

        Ok(count > 0)
    }

    /// Mark every active signature for a lease as superseded. Used before a
    /// sanctioned re-capture; rows are kept for the audit trail.
    pub async fn supersede_active(
        &self,
        lease_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<u64, sea_orm::DbErr> {
        let result = Entity::update_many()
            .col_expr(
                digital_signature::Column::SupersededAt,
                Expr::value(Some(now)),
            )
            .filter(digital_signature::Column::LeaseId.eq(lease_id))
            .filter(digital_signature::Column::SupersededAt.is_null())
            .exec(self.db.as_ref())
            .await?;

        Ok(result.rows_affected)
    }
}
