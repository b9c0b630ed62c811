//! # Dispute Handling
//!
//! Guards the subset of states a tenant may raise a dispute from, executes
//! the DISPUTED transition, and fans the alert out to the responsible staff.
//! A signed lease can never be disputed through this path.

use std::str::FromStr;
use std::sync::Arc;

use sea_orm::{DatabaseConnection, TransactionTrait};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::clock::{Clock, SharedClock};
use crate::config::DisputeConfig;
use crate::error::EngineError;
use crate::models::lease;
use crate::notify::Notifier;
use crate::repositories::{DigitalSignatureRepository, LeaseRepository};
use crate::sms::PhoneFormatter;
use crate::workflow::{ActorContext, WorkflowEngine, WorkflowState};

/// States a tenant may dispute from.
const DISPUTABLE_STATES: &[WorkflowState] = &[
    WorkflowState::SentDigital,
    WorkflowState::PendingOtp,
    WorkflowState::PendingTenantSignature,
];

/// Closed set of dispute reasons a tenant can select.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum DisputeReason {
    RentTooHigh,
    WrongDates,
    IncorrectDetails,
    TermsDisagreement,
    NotMyLease,
    Other,
}

impl DisputeReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisputeReason::RentTooHigh => "rent_too_high",
            DisputeReason::WrongDates => "wrong_dates",
            DisputeReason::IncorrectDetails => "incorrect_details",
            DisputeReason::TermsDisagreement => "terms_disagreement",
            DisputeReason::NotMyLease => "not_my_lease",
            DisputeReason::Other => "other",
        }
    }

    /// Human-readable label for notes and notifications.
    pub fn label(&self) -> &'static str {
        match self {
            DisputeReason::RentTooHigh => "Rent Amount Too High",
            DisputeReason::WrongDates => "Incorrect Lease Dates",
            DisputeReason::IncorrectDetails => "Incorrect Personal/Property Details",
            DisputeReason::TermsDisagreement => "Disagreement with Terms & Conditions",
            DisputeReason::NotMyLease => "This is Not My Lease",
            DisputeReason::Other => "Other Reason",
        }
    }
}

impl FromStr for DisputeReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rent_too_high" => Ok(DisputeReason::RentTooHigh),
            "wrong_dates" => Ok(DisputeReason::WrongDates),
            "incorrect_details" => Ok(DisputeReason::IncorrectDetails),
            "terms_disagreement" => Ok(DisputeReason::TermsDisagreement),
            "not_my_lease" => Ok(DisputeReason::NotMyLease),
            "other" => Ok(DisputeReason::Other),
            other => Err(format!("unknown dispute reason '{other}'")),
        }
    }
}

impl std::fmt::Display for DisputeReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Executes tenant disputes.
pub struct DisputeHandler {
    db: Arc<DatabaseConnection>,
    leases: LeaseRepository,
    signatures: DigitalSignatureRepository,
    workflow: Arc<WorkflowEngine>,
    notifier: Arc<dyn Notifier>,
    clock: SharedClock,
    config: DisputeConfig,
}

impl DisputeHandler {
    /// Create a new dispute handler
    pub fn new(
        db: Arc<DatabaseConnection>,
        leases: LeaseRepository,
        signatures: DigitalSignatureRepository,
        workflow: Arc<WorkflowEngine>,
        notifier: Arc<dyn Notifier>,
        clock: SharedClock,
        config: DisputeConfig,
    ) -> Self {
        Self {
            db,
            leases,
            signatures,
            workflow,
            notifier,
            clock,
            config,
        }
    }

    /// Process a dispute raised by a tenant.
    ///
    /// Preconditions, both enforced: the lease is in a disputable state, and
    /// no active signature exists. The note append and the DISPUTED
    /// transition (with its audit entry) commit in one transaction;
    /// notification fan-out happens after commit and its failures are logged,
    /// never propagated.
    pub async fn dispute(
        &self,
        lease_id: Uuid,
        reason: DisputeReason,
        comment: Option<&str>,
        ctx: &ActorContext,
    ) -> Result<(), EngineError> {
        let lease = self
            .leases
            .find_by_id(lease_id)
            .await?
            .ok_or(EngineError::LeaseNotFound)?;

        let state = lease.state()?;
        if !DISPUTABLE_STATES.contains(&state) {
            return Err(EngineError::IllegalTransition {
                from: state,
                to: WorkflowState::Disputed,
            });
        }

        if self.signatures.has_active(lease_id).await? {
            return Err(EngineError::AlreadySigned);
        }

        let now = self.clock.now();
        let txn = self.db.begin().await?;

        // Re-load under lock; the state may have moved since the precheck
        let lease = self.workflow.load_for_update(&txn, lease_id).await?;

        let note = format!(
            "\n\n--- DISPUTE RAISED [{}] ---\nReason: {}\nComment: {}\n---",
            now.format("%Y-%m-%d %H:%M:%S"),
            reason.label(),
            comment.unwrap_or("No comment provided"),
        );
        let lease = self
            .leases
            .append_note_in_txn(&txn, lease, &note, now)
            .await?;

        let previous_state = state;
        let lease = self
            .workflow
            .transition_in_txn(
                &txn,
                lease,
                WorkflowState::Disputed,
                ctx,
                Some(serde_json::json!({
                    "reason": reason.as_str(),
                    "reason_label": reason.label(),
                    "comment": comment,
                    "previous_state": previous_state.as_str(),
                })),
            )
            .await?;

        txn.commit().await?;

        metrics::counter!("lease_disputes_total", "reason" => reason.as_str()).increment(1);
        info!(
            lease_id = %lease.id,
            tenant_id = %lease.tenant_id,
            reference_number = %lease.reference_number,
            reason = %reason,
            previous_state = %previous_state,
            "Lease disputed by tenant"
        );

        self.notify_responsible_parties(&lease, reason, comment)
            .await;

        Ok(())
    }

    /// Notify the assigned approver, or fall back to every administrator.
    async fn notify_responsible_parties(
        &self,
        lease: &lease::Model,
        reason: DisputeReason,
        comment: Option<&str>,
    ) {
        let subject = format!("Lease {} disputed", lease.reference_number);
        let body = format!(
            "Tenant ({}) disputed lease {}.\nReason: {}\nComment: {}",
            PhoneFormatter::mask(&lease.tenant_phone, "254"),
            lease.reference_number,
            reason.label(),
            comment.unwrap_or("No comment provided"),
        );

        if let Some(approver) = &lease.approver_contact {
            if let Err(err) = self.notifier.notify(approver, &subject, &body).await {
                warn!(
                    lease_id = %lease.id,
                    approver,
                    error = %err,
                    "Failed to notify approver of dispute"
                );
            } else {
                info!(lease_id = %lease.id, approver, "Approver notified of lease dispute");
            }
            return;
        }

        // Degraded path: no assigned approver, fan out to every admin
        warn!(
            lease_id = %lease.id,
            zone = %lease.zone,
            admin_count = self.config.admin_contacts.len(),
            "No approver assigned for disputed lease, notifying admins instead"
        );

        for admin in &self.config.admin_contacts {
            if let Err(err) = self.notifier.notify(admin, &subject, &body).await {
                warn!(
                    lease_id = %lease.id,
                    admin,
                    error = %err,
                    "Failed to notify admin of dispute"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_round_trip() {
        for reason in [
            DisputeReason::RentTooHigh,
            DisputeReason::WrongDates,
            DisputeReason::IncorrectDetails,
            DisputeReason::TermsDisagreement,
            DisputeReason::NotMyLease,
            DisputeReason::Other,
        ] {
            let parsed: DisputeReason = reason.as_str().parse().expect("round trip");
            assert_eq!(parsed, reason);
        }

        assert!("haunted".parse::<DisputeReason>().is_err());
    }

    #[test]
    fn test_disputable_states_match_transition_table() {
        // The guard set and the DISPUTED edges must agree
        for state in WorkflowState::all() {
            assert_eq!(
                DISPUTABLE_STATES.contains(state),
                state.can_transition_to(WorkflowState::Disputed),
                "guard set and transition table disagree on {state}"
            );
        }
    }
}
