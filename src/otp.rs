//! # OTP Verifier
//!
//! Issues, rate-limits, stores, and verifies the one-time codes that
//! authorize a tenant to sign a lease. Codes are uniformly random, persisted
//! only as salted SHA-256 hashes, and compared in constant time. The rate
//! limit counts challenge rows by timestamp (not a separate counter), so an
//! issued challenge can never escape accounting. Transport failures
//! immediately expire the just-issued challenge: a code nobody received must
//! not be guessable-and-usable.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Duration;
use rand::Rng;
use sha2::{Digest, Sha256};
use tracing::{info, warn};
use uuid::Uuid;

use crate::clock::{Clock, SharedClock};
use crate::config::OtpConfig;
use crate::error::EngineError;
use crate::fingerprint::{DeviceRiskScorer, Fingerprint, RequestSignals, similarity};
use crate::models::lease;
use crate::models::otp_challenge::Model as Challenge;
use crate::repositories::{NewChallenge, OtpChallengeRepository};
use crate::sms::{PhoneFormatter, SmsError, SmsTransport, otp_message};

/// Similarity floor below which a verification is logged as coming from a
/// different device than the one the code was issued to.
const FINGERPRINT_MATCH_THRESHOLD: u32 = 50;

/// Scoring context for OTP traffic.
const RISK_CONTEXT: &str = "otp";

/// Default challenge purpose.
pub const PURPOSE_DIGITAL_SIGNING: &str = "digital_signing";

/// Issues and verifies OTP challenges for lease signing.
pub struct OtpVerifier {
    challenges: OtpChallengeRepository,
    scorer: Arc<DeviceRiskScorer>,
    transport: Arc<dyn SmsTransport>,
    clock: SharedClock,
    config: OtpConfig,
    country_code: String,
    operation_timeout: StdDuration,
}

impl OtpVerifier {
    /// Create a new OTP verifier
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        challenges: OtpChallengeRepository,
        scorer: Arc<DeviceRiskScorer>,
        transport: Arc<dyn SmsTransport>,
        clock: SharedClock,
        config: OtpConfig,
        country_code: String,
        operation_timeout: StdDuration,
    ) -> Self {
        Self {
            challenges,
            scorer,
            transport,
            clock,
            config,
            country_code,
            operation_timeout,
        }
    }

    /// Issue a challenge for the lease and dispatch the plaintext code.
    ///
    /// Rejects with [`EngineError::RateLimited`] once the per-lease hourly
    /// budget is spent. The device fingerprint and risk score are captured at
    /// issuance and persisted with the challenge; a suspicious assessment is
    /// logged for monitoring but does not block issuance.
    pub async fn issue(
        &self,
        lease: &lease::Model,
        phone: &str,
        purpose: &str,
        signals: &RequestSignals,
    ) -> Result<Challenge, EngineError> {
        let timeout_ms = self.operation_timeout.as_millis() as u64;

        tokio::time::timeout(
            self.operation_timeout,
            self.issue_inner(lease, phone, purpose, signals),
        )
        .await
        .map_err(|_| EngineError::Timeout { timeout_ms })?
    }

    async fn issue_inner(
        &self,
        lease: &lease::Model,
        phone: &str,
        purpose: &str,
        signals: &RequestSignals,
    ) -> Result<Challenge, EngineError> {
        let now = self.clock.now();
        let window_start = now - Duration::hours(1);
        let masked = PhoneFormatter::mask(phone, &self.country_code);

        let issued_recently = self
            .challenges
            .count_issued_since(lease.id, window_start)
            .await?;

        if issued_recently >= self.config.max_per_hour {
            let retry_after_seconds = match self
                .challenges
                .oldest_issued_since(lease.id, window_start)
                .await?
            {
                Some(oldest) => ((oldest.sent_at + Duration::hours(1)) - now)
                    .num_seconds()
                    .max(1) as u64,
                None => 3600,
            };

            metrics::counter!("lease_otp_rate_limited_total").increment(1);
            warn!(
                lease_id = %lease.id,
                phone_masked = %masked,
                issued_recently,
                "OTP rate limit hit"
            );

            return Err(EngineError::RateLimited {
                retry_after_seconds,
            });
        }

        let fingerprint = self.scorer.fingerprint(signals);
        let assessment = self.scorer.score(&fingerprint, RISK_CONTEXT);

        // Logged for monitoring, not blocked: a false positive here would
        // lock a legitimate tenant out of signing
        if assessment.is_suspicious {
            warn!(
                lease_id = %lease.id,
                phone_masked = %masked,
                risk_score = assessment.risk_score,
                reasons = ?assessment.reasons,
                ip = signals.ip_address.as_deref().unwrap_or("unknown"),
                "Suspicious OTP request detected"
            );
        }

        let plaintext_code = generate_code(self.config.code_length);
        let expires_at = now + Duration::minutes(self.config.expiry_minutes);

        let challenge = self
            .challenges
            .create(NewChallenge {
                lease_id: lease.id,
                phone: phone.to_string(),
                code_hash: hash_code(&plaintext_code),
                purpose: purpose.to_string(),
                sent_at: now,
                expires_at,
                device_fingerprint: Some(fingerprint.to_stored_json()),
                risk_score: Some(assessment.risk_score as i32),
            })
            .await?;

        // Challenge state is durable before the transport call: no lock is
        // held across network I/O, and a delivery failure only has to expire
        // the row afterwards.
        let delivery = self
            .transport
            .send(
                phone,
                &otp_message(
                    &plaintext_code,
                    &lease.reference_number,
                    self.config.expiry_minutes,
                ),
            )
            .await;

        match delivery {
            Ok(true) => {}
            Err(SmsError::NotConfigured) => {
                // Development mode: no gateway, challenge stays actionable
                warn!(
                    lease_id = %lease.id,
                    phone_masked = %masked,
                    "SMS gateway not configured - OTP not dispatched"
                );
            }
            Ok(false) => {
                self.challenges.mark_expired(challenge).await?;
                return Err(EngineError::TransportFailure {
                    message: "SMS gateway rejected the message".to_string(),
                });
            }
            Err(err) => {
                self.challenges.mark_expired(challenge).await?;
                return Err(EngineError::TransportFailure {
                    message: err.to_string(),
                });
            }
        }

        metrics::counter!("lease_otp_issued_total").increment(1);
        info!(
            lease_id = %lease.id,
            phone_masked = %masked,
            challenge_id = %challenge.id,
            risk_score = assessment.risk_score,
            "OTP generated and sent"
        );

        Ok(challenge)
    }

    /// Verify a submitted code against the lease's newest actionable
    /// challenge.
    ///
    /// Fails closed when no actionable challenge exists. Attempts are
    /// counted regardless of outcome and the challenge is force-expired at
    /// the attempt cap. Returns `Ok(false)` for every non-success so callers
    /// cannot distinguish "no challenge" from "wrong code".
    pub async fn verify(
        &self,
        lease: &lease::Model,
        code: &str,
        signals: &RequestSignals,
    ) -> Result<bool, EngineError> {
        let timeout_ms = self.operation_timeout.as_millis() as u64;

        tokio::time::timeout(self.operation_timeout, self.verify_inner(lease, code, signals))
            .await
            .map_err(|_| EngineError::Timeout { timeout_ms })?
    }

    async fn verify_inner(
        &self,
        lease: &lease::Model,
        code: &str,
        signals: &RequestSignals,
    ) -> Result<bool, EngineError> {
        let now = self.clock.now();

        let Some(challenge) = self
            .challenges
            .latest_valid(lease.id, now, self.config.max_verification_attempts)
            .await?
        else {
            warn!(lease_id = %lease.id, "No valid OTP challenge found for lease");
            return Ok(false);
        };

        let current = self.scorer.fingerprint(signals);
        if let Some(stored) = challenge
            .device_fingerprint
            .as_ref()
            .and_then(Fingerprint::from_stored_json)
        {
            let score = similarity(&stored, &current);
            if score < FINGERPRINT_MATCH_THRESHOLD {
                warn!(
                    lease_id = %lease.id,
                    challenge_id = %challenge.id,
                    similarity_score = score,
                    original_ip = stored.signals.ip_address.as_deref().unwrap_or("unknown"),
                    current_ip = signals.ip_address.as_deref().unwrap_or("unknown"),
                    "OTP verification from different device"
                );
            }
        }

        let verified = verify_code(code, &challenge.code_hash);
        let challenge_id = challenge.id;
        let attempts_before = challenge.attempts;

        let updated = self
            .challenges
            .record_attempt(
                challenge,
                verified,
                signals.ip_address.clone(),
                now,
                self.config.max_verification_attempts,
            )
            .await?;

        if verified {
            metrics::counter!("lease_otp_verified_total").increment(1);
            info!(
                lease_id = %lease.id,
                challenge_id = %challenge_id,
                "OTP verified successfully"
            );
        } else {
            metrics::counter!("lease_otp_failed_total").increment(1);
            warn!(
                lease_id = %lease.id,
                challenge_id = %challenge_id,
                attempts = attempts_before + 1,
                force_expired = updated.is_expired,
                "OTP verification failed"
            );
        }

        Ok(verified)
    }

    /// Whether the lease holds a challenge verified within the replay
    /// window. This is the gate `can_sign` builds on.
    pub async fn has_verified_challenge(&self, lease_id: Uuid) -> Result<bool, EngineError> {
        let now = self.clock.now();
        let validity = Duration::minutes(self.config.verified_validity_minutes);

        Ok(self
            .challenges
            .has_recent_verified(lease_id, now, validity)
            .await?)
    }

    /// The challenge that currently satisfies the signing gate, if any.
    pub async fn verified_challenge(
        &self,
        lease_id: Uuid,
    ) -> Result<Option<Challenge>, EngineError> {
        let now = self.clock.now();
        let validity = Duration::minutes(self.config.verified_validity_minutes);

        Ok(self
            .challenges
            .latest_recent_verified(lease_id, now, validity)
            .await?)
    }

    /// Most recent challenge for status reporting.
    pub async fn latest_challenge(&self, lease_id: Uuid) -> Result<Option<Challenge>, EngineError> {
        Ok(self.challenges.latest(lease_id).await?)
    }

    /// Attempt-cap setting, needed to interpret challenge validity.
    pub fn max_verification_attempts(&self) -> i32 {
        self.config.max_verification_attempts
    }

    /// Resend: invalidate every actionable challenge, then issue a new one.
    /// At most one actionable challenge exists per lease afterwards.
    pub async fn resend(
        &self,
        lease: &lease::Model,
        phone: &str,
        signals: &RequestSignals,
    ) -> Result<Challenge, EngineError> {
        let invalidated = self
            .challenges
            .invalidate_valid(lease.id, self.clock.now())
            .await?;

        if invalidated > 0 {
            info!(
                lease_id = %lease.id,
                invalidated,
                "Invalidated previous OTP challenges before resend"
            );
        }

        self.issue(lease, phone, PURPOSE_DIGITAL_SIGNING, signals).await
    }

    /// Retention sweep: remove challenges older than the configured number
    /// of days. Returns the number of rows removed.
    pub async fn cleanup(&self) -> Result<u64, EngineError> {
        let removed = self
            .challenges
            .delete_older_than(self.clock.now(), self.config.retention_days)
            .await?;

        if removed > 0 {
            info!(removed, "OTP retention sweep removed old challenges");
        }

        Ok(removed)
    }
}

/// Generate a uniformly random zero-padded numeric code.
fn generate_code(length: u32) -> String {
    let max: u64 = 10u64.pow(length);
    let value = rand::thread_rng().gen_range(0..max);
    format!("{value:0width$}", width = length as usize)
}

/// Hash a code with a random salt: `"{salt}${digest}"`, both hex.
fn hash_code(code: &str) -> String {
    let salt: [u8; 16] = rand::thread_rng().r#gen();
    let salt_hex = hex::encode(salt);
    format!("{salt_hex}${}", digest_with_salt(&salt_hex, code))
}

/// Constant-time comparison of a submitted code against a stored hash.
fn verify_code(code: &str, stored: &str) -> bool {
    use subtle::ConstantTimeEq;

    let Some((salt_hex, digest_hex)) = stored.split_once('$') else {
        return false;
    };

    let computed = digest_with_salt(salt_hex, code);
    ConstantTimeEq::ct_eq(computed.as_bytes(), digest_hex.as_bytes()).into()
}

fn digest_with_salt(salt_hex: &str, code: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt_hex.as_bytes());
    hasher.update(code.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_codes_are_numeric_and_padded() {
        for _ in 0..100 {
            let code = generate_code(4);
            assert_eq!(code.len(), 4);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
        }

        let long = generate_code(6);
        assert_eq!(long.len(), 6);
    }

    #[test]
    fn test_hash_round_trip() {
        let code = "0421";
        let stored = hash_code(code);

        // Salted: hashing the same code twice produces different storage
        assert_ne!(stored, hash_code(code));
        assert!(stored.contains('$'));
        // The plaintext never appears in the stored form
        assert!(!stored.contains(code));

        assert!(verify_code(code, &stored));
        assert!(!verify_code("0422", &stored));
        assert!(!verify_code("", &stored));
    }

    #[test]
    fn test_verify_rejects_malformed_storage() {
        assert!(!verify_code("0421", ""));
        assert!(!verify_code("0421", "no-separator"));
        assert!(!verify_code("0421", "salt$"));
    }
}
