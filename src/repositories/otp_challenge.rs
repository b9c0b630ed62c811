//! # OTP Challenge Repository
//!
//! This module provides database operations for OTP challenge rows. Rate
//! limiting counts challenge rows by timestamp rather than a separate
//! counter, so a challenge that was issued is always accounted for.

use chrono::{DateTime, Duration, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::models::otp_challenge::{self, ActiveModel, Entity, Model};

/// Fields captured when issuing a challenge.
#[derive(Debug, Clone)]
pub struct NewChallenge {
    pub lease_id: Uuid,
    pub phone: String,
    pub code_hash: String,
    pub purpose: String,
    pub sent_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub device_fingerprint: Option<serde_json::Value>,
    pub risk_score: Option<i32>,
}

/// Repository for OTP challenge database operations
pub struct OtpChallengeRepository {
    db: Arc<DatabaseConnection>,
}

impl OtpChallengeRepository {
    /// Create a new OTP challenge repository
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Persist a freshly issued challenge.
    pub async fn create(&self, challenge: NewChallenge) -> Result<Model, sea_orm::DbErr> {
        let model = ActiveModel {
            id: Set(Uuid::new_v4()),
            lease_id: Set(challenge.lease_id),
            phone: Set(challenge.phone),
            code_hash: Set(challenge.code_hash),
            purpose: Set(challenge.purpose),
            sent_at: Set(challenge.sent_at),
            expires_at: Set(challenge.expires_at),
            verified_at: Set(None),
            attempts: Set(0),
            is_verified: Set(false),
            is_expired: Set(false),
            ip_address: Set(None),
            device_fingerprint: Set(challenge.device_fingerprint),
            risk_score: Set(challenge.risk_score),
            created_at: Set(challenge.sent_at),
        };

        model.insert(self.db.as_ref()).await
    }

    /// Number of challenges issued for a lease since `since` (rate limiting).
    pub async fn count_issued_since(
        &self,
        lease_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<u64, sea_orm::DbErr> {
        Entity::find()
            .filter(otp_challenge::Column::LeaseId.eq(lease_id))
            .filter(otp_challenge::Column::SentAt.gte(since))
            .count(self.db.as_ref())
            .await
    }

    /// Oldest challenge inside the rate-limit window, used to compute the
    /// retry-after hint.
    pub async fn oldest_issued_since(
        &self,
        lease_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<Option<Model>, sea_orm::DbErr> {
        Entity::find()
            .filter(otp_challenge::Column::LeaseId.eq(lease_id))
            .filter(otp_challenge::Column::SentAt.gte(since))
            .order_by_asc(otp_challenge::Column::SentAt)
            .one(self.db.as_ref())
            .await
    }

    /// Most recent challenge for a lease that is still actionable: neither
    /// verified nor invalidated, inside its window, under the attempt cap.
    pub async fn latest_valid(
        &self,
        lease_id: Uuid,
        now: DateTime<Utc>,
        max_attempts: i32,
    ) -> Result<Option<Model>, sea_orm::DbErr> {
        Entity::find()
            .filter(otp_challenge::Column::LeaseId.eq(lease_id))
            .filter(otp_challenge::Column::IsVerified.eq(false))
            .filter(otp_challenge::Column::IsExpired.eq(false))
            .filter(otp_challenge::Column::ExpiresAt.gt(now))
            .filter(otp_challenge::Column::Attempts.lt(max_attempts))
            .order_by_desc(otp_challenge::Column::SentAt)
            .one(self.db.as_ref())
            .await
    }

    /// Most recent challenge regardless of validity.
    pub async fn latest(&self, lease_id: Uuid) -> Result<Option<Model>, sea_orm::DbErr> {
        Entity::find()
            .filter(otp_challenge::Column::LeaseId.eq(lease_id))
            .order_by_desc(otp_challenge::Column::SentAt)
            .one(self.db.as_ref())
            .await
    }

    /// Whether the lease carries a challenge verified within the replay
    /// window; this is the signing gate.
    pub async fn has_recent_verified(
        &self,
        lease_id: Uuid,
        now: DateTime<Utc>,
        validity: Duration,
    ) -> Result<bool, sea_orm::DbErr> {
        let count = Entity::find()
            .filter(otp_challenge::Column::LeaseId.eq(lease_id))
            .filter(otp_challenge::Column::IsVerified.eq(true))
            .filter(otp_challenge::Column::VerifiedAt.gte(now - validity))
            .count(self.db.as_ref())
            .await?;

        Ok(count > 0)
    }

    /// Most recent verified challenge inside the replay window.
    pub async fn latest_recent_verified(
        &self,
        lease_id: Uuid,
        now: DateTime<Utc>,
        validity: Duration,
    ) -> Result<Option<Model>, sea_orm::DbErr> {
        Entity::find()
            .filter(otp_challenge::Column::LeaseId.eq(lease_id))
            .filter(otp_challenge::Column::IsVerified.eq(true))
            .filter(otp_challenge::Column::VerifiedAt.gte(now - validity))
            .order_by_desc(otp_challenge::Column::VerifiedAt)
            .one(self.db.as_ref())
            .await
    }

    /// Invalidate every actionable challenge for a lease (resend path).
    /// Returns the number of challenges invalidated.
    pub async fn invalidate_valid(
        &self,
        lease_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<u64, sea_orm::DbErr> {
        let result = Entity::update_many()
            .col_expr(otp_challenge::Column::IsExpired, Expr::value(true))
            .filter(otp_challenge::Column::LeaseId.eq(lease_id))
            .filter(otp_challenge::Column::IsVerified.eq(false))
            .filter(otp_challenge::Column::IsExpired.eq(false))
            .filter(otp_challenge::Column::ExpiresAt.gt(now))
            .exec(self.db.as_ref())
            .await?;

        Ok(result.rows_affected)
    }

    /// Force-expire a single challenge (transport failure or attempt cap).
    pub async fn mark_expired(&self, challenge: Model) -> Result<Model, sea_orm::DbErr> {
        let mut active: ActiveModel = challenge.into();
        active.is_expired = Set(true);
        active.update(self.db.as_ref()).await
    }

    /// Record a verification attempt. Attempts are incremented regardless of
    /// outcome; success stamps the verification time and IP; reaching the
    /// attempt cap force-expires the challenge.
    pub async fn record_attempt(
        &self,
        challenge: Model,
        verified: bool,
        ip_address: Option<String>,
        now: DateTime<Utc>,
        max_attempts: i32,
    ) -> Result<Model, sea_orm::DbErr> {
        let attempts = challenge.attempts + 1;

        let mut active: ActiveModel = challenge.into();
        active.attempts = Set(attempts);

        if verified {
            active.is_verified = Set(true);
            active.verified_at = Set(Some(now));
            active.ip_address = Set(ip_address);
        } else if attempts >= max_attempts {
            active.is_expired = Set(true);
        }

        active.update(self.db.as_ref()).await
    }

    /// Retention sweep: delete challenges older than `days`. Returns the
    /// number of rows removed.
    pub async fn delete_older_than(
        &self,
        now: DateTime<Utc>,
        days: i64,
    ) -> Result<u64, sea_orm::DbErr> {
        let cutoff = now - Duration::days(days);

        let result = Entity::delete_many()
            .filter(otp_challenge::Column::CreatedAt.lt(cutoff))
            .exec(self.db.as_ref())
            .await?;

        Ok(result.rows_affected)
    }
}
