//! # Repository Layer
//!
//! This module contains repository implementations that encapsulate SeaORM
//! operations for database entities, providing a clean API for data access.

pub mod audit;
pub mod digital_signature;
pub mod lease;
pub mod otp_challenge;

pub use audit::{AuditRepository, NewAuditEvent};
pub use digital_signature::{DigitalSignatureRepository, NewSignature};
pub use lease::{LeaseRepository, NewLease};
pub use otp_challenge::{NewChallenge, OtpChallengeRepository};
