//! # Signing Coordinator
//!
//! Orchestrates the digital signing flow: signed-link generation and
//! dispatch, OTP gating, signature capture, and the resulting workflow
//! transitions. The authoritative state change always commits before any
//! transport dispatch, so a delivery failure can cost a notification but
//! never workflow or identifier integrity.

use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::clock::{Clock, SharedClock};
use crate::config::SigningConfig;
use crate::error::EngineError;
use crate::fingerprint::RequestSignals;
use crate::models::digital_signature::Model as Signature;
use crate::models::lease;
use crate::models::otp_challenge::ChallengeStatus;
use crate::notify::Notifier;
use crate::otp::{OtpVerifier, PURPOSE_DIGITAL_SIGNING};
use crate::repositories::{DigitalSignatureRepository, LeaseRepository, NewSignature};
use crate::signed_link::SignedLinkIssuer;
use crate::sms::{SmsTransport, signing_link_message};
use crate::workflow::{ActorContext, WorkflowEngine, WorkflowState};

/// How a signing link reaches the tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMethod {
    Sms,
    Notify,
    Both,
}

impl DeliveryMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryMethod::Sms => "sms",
            DeliveryMethod::Notify => "notify",
            DeliveryMethod::Both => "both",
        }
    }
}

impl FromStr for DeliveryMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sms" => Ok(DeliveryMethod::Sms),
            "notify" => Ok(DeliveryMethod::Notify),
            "both" => Ok(DeliveryMethod::Both),
            other => Err(format!("unknown delivery method '{other}'")),
        }
    }
}

/// Result of initiating (or re-sending) the signing flow.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct InitiateOutcome {
    /// Whether every requested delivery channel accepted the message.
    /// `false` is a soft failure: the workflow transition stands and the
    /// caller may retry the send.
    pub delivered: bool,
    /// When the signing link stops being accepted
    pub expires_at: DateTime<Utc>,
    /// Channel(s) the link was dispatched through
    pub sent_via: DeliveryMethod,
    /// Reference number of the lease
    pub lease_reference: String,
}

/// Signing progress summary for a lease.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SigningStatus {
    /// Whether an active signature exists
    pub has_signature: bool,
    /// Whether a verified, unexpired challenge exists
    pub has_verified_otp: bool,
    /// The signature-capture gate
    pub can_sign: bool,
    /// Current workflow state
    pub workflow_state: String,
    /// Latest challenge status, if any challenge was ever issued
    pub otp_status: Option<ChallengeStatus>,
}

/// Payload submitted when capturing a signature.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct SignaturePayload {
    /// Opaque signature data (e.g. base64 canvas capture)
    pub signature_data: String,
    /// Capture method
    #[serde(default = "default_signature_type")]
    pub signature_type: String,
    /// Capture latitude, when shared
    pub latitude: Option<f64>,
    /// Capture longitude, when shared
    pub longitude: Option<f64>,
}

fn default_signature_type() -> String {
    "canvas".to_string()
}

/// Coordinates the signing flow end to end.
pub struct SigningCoordinator {
    leases: LeaseRepository,
    signatures: DigitalSignatureRepository,
    otp: Arc<OtpVerifier>,
    workflow: Arc<WorkflowEngine>,
    links: Arc<SignedLinkIssuer>,
    transport: Arc<dyn SmsTransport>,
    notifier: Arc<dyn Notifier>,
    clock: SharedClock,
    config: SigningConfig,
}

impl SigningCoordinator {
    /// Create a new signing coordinator
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        leases: LeaseRepository,
        signatures: DigitalSignatureRepository,
        otp: Arc<OtpVerifier>,
        workflow: Arc<WorkflowEngine>,
        links: Arc<SignedLinkIssuer>,
        transport: Arc<dyn SmsTransport>,
        notifier: Arc<dyn Notifier>,
        clock: SharedClock,
        config: SigningConfig,
    ) -> Self {
        Self {
            leases,
            signatures,
            otp,
            workflow,
            links,
            transport,
            notifier,
            clock,
            config,
        }
    }

    /// Start (or re-start) the digital signing flow for a lease.
    ///
    /// Generates a recipient-bound signing link, transitions the lease to
    /// SENT_DIGITAL through the state machine, then dispatches the link.
    /// Re-sending for a lease already in SENT_DIGITAL skips the transition
    /// but never bypasses legality checks from any other state.
    pub async fn initiate(
        &self,
        lease_id: Uuid,
        method: Option<DeliveryMethod>,
        ctx: &ActorContext,
    ) -> Result<InitiateOutcome, EngineError> {
        let method = method.unwrap_or_else(|| self.default_method());

        let lease = self
            .leases
            .find_by_id(lease_id)
            .await?
            .ok_or(EngineError::LeaseNotFound)?;

        let link = self
            .links
            .issue(
                lease.id,
                lease.tenant_id,
                Duration::hours(self.config.link_expiry_hours),
            )
            .map_err(|err| EngineError::TransportFailure {
                message: err.to_string(),
            })?;

        // State first, dispatch second: the transition is durable before any
        // network I/O happens.
        let lease = if lease.state()? == WorkflowState::SentDigital {
            lease
        } else {
            self.workflow
                .transition(
                    lease.id,
                    WorkflowState::SentDigital,
                    ctx,
                    Some(serde_json::json!({ "method": method.as_str() })),
                )
                .await?
        };

        let delivered = self.dispatch_link(&lease, &link.url, method).await;

        info!(
            lease_id = %lease.id,
            lease_reference = %lease.reference_number,
            method = method.as_str(),
            delivered,
            "Signing link dispatched"
        );

        Ok(InitiateOutcome {
            delivered,
            expires_at: link.expires_at,
            sent_via: method,
            lease_reference: lease.reference_number,
        })
    }

    /// Re-send the signing link. Defined as `initiate` called again.
    pub async fn resend_link(
        &self,
        lease_id: Uuid,
        method: Option<DeliveryMethod>,
        ctx: &ActorContext,
    ) -> Result<InitiateOutcome, EngineError> {
        self.initiate(lease_id, method, ctx).await
    }

    /// Request an OTP for the signing session. Issues the challenge first;
    /// only a successful issuance moves SENT_DIGITAL forward to PENDING_OTP.
    pub async fn request_otp(
        &self,
        lease_id: Uuid,
        signals: &RequestSignals,
        ctx: &ActorContext,
    ) -> Result<ChallengeStatus, EngineError> {
        let lease = self
            .leases
            .find_by_id(lease_id)
            .await?
            .ok_or(EngineError::LeaseNotFound)?;

        let challenge = self
            .otp
            .issue(&lease, &lease.tenant_phone, PURPOSE_DIGITAL_SIGNING, signals)
            .await?;

        if lease.state()? == WorkflowState::SentDigital {
            self.workflow
                .transition(lease.id, WorkflowState::PendingOtp, ctx, None)
                .await?;
        }

        let now = self.clock.now();
        Ok(ChallengeStatus {
            is_valid: challenge.is_valid(now, self.otp.max_verification_attempts()),
            is_expired: challenge.has_expired(now),
            attempts: challenge.attempts,
            minutes_until_expiry: challenge.minutes_until_expiry(now),
        })
    }

    /// Re-send the OTP: prior challenges are invalidated before the new one
    /// is issued, so at most one actionable challenge exists.
    pub async fn resend_otp(
        &self,
        lease_id: Uuid,
        signals: &RequestSignals,
        ctx: &ActorContext,
    ) -> Result<ChallengeStatus, EngineError> {
        let lease = self
            .leases
            .find_by_id(lease_id)
            .await?
            .ok_or(EngineError::LeaseNotFound)?;

        let challenge = self.otp.resend(&lease, &lease.tenant_phone, signals).await?;

        if lease.state()? == WorkflowState::SentDigital {
            self.workflow
                .transition(lease.id, WorkflowState::PendingOtp, ctx, None)
                .await?;
        }

        let now = self.clock.now();
        Ok(ChallengeStatus {
            is_valid: challenge.is_valid(now, self.otp.max_verification_attempts()),
            is_expired: challenge.has_expired(now),
            attempts: challenge.attempts,
            minutes_until_expiry: challenge.minutes_until_expiry(now),
        })
    }

    /// Verify a submitted OTP code. A success from PENDING_OTP advances the
    /// lease to PENDING_TENANT_SIGNATURE.
    pub async fn verify_otp(
        &self,
        lease_id: Uuid,
        code: &str,
        signals: &RequestSignals,
        ctx: &ActorContext,
    ) -> Result<bool, EngineError> {
        let lease = self
            .leases
            .find_by_id(lease_id)
            .await?
            .ok_or(EngineError::LeaseNotFound)?;

        let verified = self.otp.verify(&lease, code, signals).await?;

        if verified && lease.state()? == WorkflowState::PendingOtp {
            self.workflow
                .transition(lease.id, WorkflowState::PendingTenantSignature, ctx, None)
                .await?;
        }

        Ok(verified)
    }

    /// The sole gate before signature capture: a verified, unexpired
    /// challenge exists and no active signature does.
    pub async fn can_sign(&self, lease_id: Uuid) -> Result<bool, EngineError> {
        if self.signatures.has_active(lease_id).await? {
            return Ok(false);
        }

        self.otp.has_verified_challenge(lease_id).await
    }

    /// Capture the tenant's signature and advance the workflow one state.
    ///
    /// Persists the signature with its content hash, then transitions
    /// PENDING_TENANT_SIGNATURE → ACTIVE. A second capture is rejected
    /// because `can_sign` is false once an active signature exists.
    pub async fn capture_signature(
        &self,
        lease_id: Uuid,
        payload: SignaturePayload,
        signals: &RequestSignals,
        ctx: &ActorContext,
    ) -> Result<Signature, EngineError> {
        let lease = self
            .leases
            .find_by_id(lease_id)
            .await?
            .ok_or(EngineError::LeaseNotFound)?;

        if !self.can_sign(lease_id).await? {
            return Err(EngineError::NotEligibleToSign);
        }

        // Fail before persisting anything if the workflow cannot advance
        let state = lease.state()?;
        if !state.can_transition_to(WorkflowState::Active) {
            return Err(EngineError::IllegalTransition {
                from: state,
                to: WorkflowState::Active,
            });
        }

        let challenge = self.otp.verified_challenge(lease_id).await?;

        let signature = self
            .signatures
            .create(
                NewSignature {
                    lease_id: lease.id,
                    tenant_id: lease.tenant_id,
                    signature_data: payload.signature_data,
                    signature_type: payload.signature_type,
                    ip_address: signals.ip_address.clone(),
                    user_agent: signals.user_agent.clone(),
                    latitude: payload.latitude,
                    longitude: payload.longitude,
                    otp_challenge_id: challenge.map(|c| c.id),
                },
                self.clock.now(),
            )
            .await?;

        match self
            .workflow
            .transition(
                lease.id,
                WorkflowState::Active,
                ctx,
                Some(serde_json::json!({ "signature_id": signature.id })),
            )
            .await
        {
            Ok(_) => {}
            Err(err) => {
                // A concurrent capture won the transition; retire this
                // signature so at most one stays active.
                warn!(
                    lease_id = %lease.id,
                    signature_id = %signature.id,
                    error = %err,
                    "Transition after capture failed; superseding signature"
                );
                self.signatures
                    .supersede_active(lease.id, self.clock.now())
                    .await?;
                return Err(err);
            }
        }

        metrics::counter!("lease_signatures_captured_total").increment(1);
        info!(
            lease_id = %lease.id,
            signature_id = %signature.id,
            tenant_id = %lease.tenant_id,
            "Digital signature captured"
        );

        Ok(signature)
    }

    /// Signing progress summary for a lease.
    pub async fn signing_status(&self, lease_id: Uuid) -> Result<SigningStatus, EngineError> {
        let lease = self
            .leases
            .find_by_id(lease_id)
            .await?
            .ok_or(EngineError::LeaseNotFound)?;

        let has_signature = self.signatures.has_active(lease_id).await?;
        let has_verified_otp = self.otp.has_verified_challenge(lease_id).await?;
        let latest = self.otp.latest_challenge(lease_id).await?;

        let now = self.clock.now();
        let otp_status = latest.map(|challenge| ChallengeStatus {
            is_valid: challenge.is_valid(now, self.otp.max_verification_attempts()),
            is_expired: challenge.has_expired(now),
            attempts: challenge.attempts,
            minutes_until_expiry: challenge.minutes_until_expiry(now),
        });

        Ok(SigningStatus {
            has_signature,
            has_verified_otp,
            can_sign: has_verified_otp && !has_signature,
            workflow_state: lease.workflow_state,
            otp_status,
        })
    }

    fn default_method(&self) -> DeliveryMethod {
        self.config
            .default_notification_method
            .parse()
            .unwrap_or(DeliveryMethod::Both)
    }

    /// Dispatch the link over the requested channel(s). Failures are logged
    /// and reported as `false`, never propagated: losing a notification is
    /// recoverable, losing workflow integrity is not.
    async fn dispatch_link(&self, lease: &lease::Model, url: &str, method: DeliveryMethod) -> bool {
        let message = signing_link_message(&lease.reference_number, url);
        let mut delivered = true;

        if matches!(method, DeliveryMethod::Sms | DeliveryMethod::Both) {
            match self.transport.send(&lease.tenant_phone, &message).await {
                Ok(true) => {}
                Ok(false) => {
                    warn!(lease_id = %lease.id, "Signing link SMS not accepted");
                    delivered = false;
                }
                Err(err) => {
                    warn!(lease_id = %lease.id, error = %err, "Failed to send signing link SMS");
                    delivered = false;
                }
            }
        }

        if matches!(method, DeliveryMethod::Notify | DeliveryMethod::Both) {
            let result = self
                .notifier
                .notify(
                    &lease.tenant_phone,
                    "Your lease is ready to sign",
                    &message,
                )
                .await;

            if let Err(err) = result {
                warn!(lease_id = %lease.id, error = %err, "Failed to send signing link notification");
                delivered = false;
            }
        }

        delivered
    }
}
