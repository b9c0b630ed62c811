//! # Digital Signature Model
//!
//! Captured tenant signatures. Rows are immutable after creation; a
//! re-capture supersedes the previous row instead of overwriting it, so at
//! most one row per lease is active (superseded_at IS NULL) at a time.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Digital signature entity
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "digital_signatures")]
pub struct Model {
    /// Primary key UUID
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Lease the signature belongs to
    pub lease_id: Uuid,

    /// Tenant who signed
    pub tenant_id: Uuid,

    /// Opaque signature payload (e.g. base64 canvas capture)
    pub signature_data: String,

    /// Capture method, e.g. "canvas"
    pub signature_type: String,

    /// IP the capture request came from
    pub ip_address: Option<String>,

    /// User agent of the capturing device
    pub user_agent: Option<String>,

    /// Capture latitude, when the device shared it
    pub latitude: Option<f64>,

    /// Capture longitude, when the device shared it
    pub longitude: Option<f64>,

    /// Challenge that authorized this capture
    pub otp_challenge_id: Option<Uuid>,

    /// SHA-256 of the payload, stored for later integrity checks
    pub verification_hash: String,

    /// When the signature was captured
    pub signed_at: chrono::DateTime<chrono::Utc>,

    /// Set when a newer capture replaced this one
    pub superseded_at: Option<chrono::DateTime<chrono::Utc>>,

    /// Row creation timestamp
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

/// Compute the content hash stored alongside a signature payload.
pub fn payload_hash(signature_data: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(signature_data.as_bytes());
    hex::encode(hasher.finalize())
}

impl Model {
    /// Whether this row is the lease's active signature.
    pub fn is_active(&self) -> bool {
        self.superseded_at.is_none()
    }

    /// Recompute the payload hash and compare against the stored one.
    pub fn verify_hash(&self) -> bool {
        use subtle::ConstantTimeEq;

        let computed = payload_hash(&self.signature_data);
        ConstantTimeEq::ct_eq(computed.as_bytes(), self.verification_hash.as_bytes()).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_payload_hash_is_stable_and_content_sensitive() {
        let a = payload_hash("data:image/png;base64,AAAA");
        let b = payload_hash("data:image/png;base64,AAAA");
        let c = payload_hash("data:image/png;base64,BBBB");

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64); // hex-encoded SHA-256
    }

    #[test]
    fn test_verify_hash_detects_tampering() {
        let now = Utc::now();
        let mut signature = Model {
            id: Uuid::new_v4(),
            lease_id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            signature_data: "payload".to_string(),
            signature_type: "canvas".to_string(),
            ip_address: None,
            user_agent: None,
            latitude: None,
            longitude: None,
            otp_challenge_id: None,
            verification_hash: payload_hash("payload"),
            signed_at: now,
            superseded_at: None,
            created_at: now,
        };

        assert!(signature.verify_hash());
        assert!(signature.is_active());

        signature.signature_data = "tampered".to_string();
        assert!(!signature.verify_hash());
    }
}
