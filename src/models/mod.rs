//! # Data Models
//!
//! This module contains all the data models used throughout the lease engine.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub mod audit_entry;
pub mod digital_signature;
pub mod lease;
pub mod otp_challenge;
pub mod sequence_counter;

pub use audit_entry::Entity as LeaseAuditEntry;
pub use digital_signature::Entity as DigitalSignature;
pub use lease::Entity as Lease;
pub use otp_challenge::Entity as OtpChallenge;
pub use sequence_counter::reference::Entity as ReferenceSequence;
pub use sequence_counter::serial::Entity as SerialSequence;

/// Basic service information response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServiceInfo {
    /// The name of the service
    pub service: String,
    /// The version of the service
    pub version: String,
}

impl Default for ServiceInfo {
    fn default() -> Self {
        Self {
            service: "lease-engine".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}
