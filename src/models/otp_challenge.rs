//! # OTP Challenge Model
//!
//! One verification attempt window: an issued one-time code (stored as a
//! salted hash, never plaintext) with its validity bounds and risk context.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// OTP challenge entity
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "otp_challenges")]
pub struct Model {
    /// Primary key UUID
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Lease this challenge authorizes signing for
    pub lease_id: Uuid,

    /// Phone number the plaintext code was delivered to
    pub phone: String,

    /// Salted SHA-256 of the code, `"{salt}${digest}"` hex encoded.
    /// Never serialized into API responses.
    #[serde(skip_serializing)]
    pub code_hash: String,

    /// Challenge purpose, e.g. "digital_signing"
    pub purpose: String,

    /// When the code was dispatched
    pub sent_at: chrono::DateTime<chrono::Utc>,

    /// Hard validity deadline (sent_at + expiry window)
    pub expires_at: chrono::DateTime<chrono::Utc>,

    /// Set when the code was verified successfully
    pub verified_at: Option<chrono::DateTime<chrono::Utc>>,

    /// Verification attempts, counted regardless of outcome
    pub attempts: i32,

    /// Whether the code was verified
    pub is_verified: bool,

    /// Whether the challenge was invalidated (expiry, resend, transport
    /// failure, or attempt cap)
    pub is_expired: bool,

    /// IP address recorded at successful verification
    pub ip_address: Option<String>,

    /// Device fingerprint captured at issuance
    pub device_fingerprint: Option<Json>,

    /// Risk score captured at issuance (0-100)
    pub risk_score: Option<i32>,

    /// Row creation timestamp
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// A challenge is actionable when it is unverified, not invalidated,
    /// inside its validity window, and under the attempt cap.
    pub fn is_valid(&self, now: chrono::DateTime<chrono::Utc>, max_attempts: i32) -> bool {
        !self.is_expired && !self.is_verified && now < self.expires_at && self.attempts < max_attempts
    }

    /// Whether the challenge is past its validity window or was invalidated.
    pub fn has_expired(&self, now: chrono::DateTime<chrono::Utc>) -> bool {
        self.is_expired || now >= self.expires_at
    }

    /// Minutes remaining before expiry (zero once expired).
    pub fn minutes_until_expiry(&self, now: chrono::DateTime<chrono::Utc>) -> i64 {
        (self.expires_at - now).num_minutes().max(0)
    }
}

/// Challenge status exposed through the signing-status endpoint.
/// The code itself is never included in any representation.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ChallengeStatus {
    /// Whether the challenge is still actionable
    pub is_valid: bool,
    /// Whether the challenge is expired or invalidated
    pub is_expired: bool,
    /// Verification attempts so far
    pub attempts: i32,
    /// Minutes until expiry (zero once expired)
    pub minutes_until_expiry: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn challenge_at(now: chrono::DateTime<chrono::Utc>) -> Model {
        Model {
            id: Uuid::new_v4(),
            lease_id: Uuid::new_v4(),
            phone: "+254712345678".to_string(),
            code_hash: "ab$cd".to_string(),
            purpose: "digital_signing".to_string(),
            sent_at: now,
            expires_at: now + Duration::minutes(10),
            verified_at: None,
            attempts: 0,
            is_verified: false,
            is_expired: false,
            ip_address: None,
            device_fingerprint: None,
            risk_score: None,
            created_at: now,
        }
    }

    #[test]
    fn test_validity_window() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let challenge = challenge_at(now);

        assert!(challenge.is_valid(now, 5));
        assert!(challenge.is_valid(now + Duration::minutes(9), 5));
        // Boundary: expiry instant itself is no longer valid
        assert!(!challenge.is_valid(now + Duration::minutes(10), 5));
        assert!(challenge.has_expired(now + Duration::minutes(10)));
    }

    #[test]
    fn test_attempt_cap_and_flags_invalidate() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();

        let mut challenge = challenge_at(now);
        challenge.attempts = 5;
        assert!(!challenge.is_valid(now, 5));

        let mut verified = challenge_at(now);
        verified.is_verified = true;
        assert!(!verified.is_valid(now, 5));

        let mut expired = challenge_at(now);
        expired.is_expired = true;
        assert!(!expired.is_valid(now, 5));
        assert!(expired.has_expired(now));
    }

    #[test]
    fn test_minutes_until_expiry_floors_at_zero() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let challenge = challenge_at(now);

        assert_eq!(challenge.minutes_until_expiry(now), 10);
        assert_eq!(
            challenge.minutes_until_expiry(now + Duration::minutes(25)),
            0
        );
    }
}
