//! # Lease Workflow State Machine
//!
//! The authoritative set of lease lifecycle states and legal transitions.
//! Every mutation of `leases.workflow_state` goes through [`WorkflowEngine`]:
//! the lease row is locked for the duration of the transition (concurrent
//! transitions on one lease are serialized), the edge is validated against
//! the closed transition table, and exactly one audit entry is written inside
//! the same transaction. Illegal edges are typed errors, never coerced.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DatabaseTransaction, EntityTrait,
    QueryFilter, QuerySelect, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::clock::{Clock, SharedClock};
use crate::error::EngineError;
use crate::models::audit_entry;
use crate::models::lease::{self, Entity as Lease};

/// Closed set of lease lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
    Draft,
    Received,
    PendingLandlordApproval,
    Approved,
    Printed,
    CheckedOut,
    SentDigital,
    PendingOtp,
    PendingTenantSignature,
    ReturnedUnsigned,
    Active,
    RenewalOffered,
    RenewalAccepted,
    RenewalDeclined,
    Expired,
    Terminated,
    Cancelled,
    Disputed,
    Archived,
}

impl WorkflowState {
    /// Stable string form persisted in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowState::Draft => "draft",
            WorkflowState::Received => "received",
            WorkflowState::PendingLandlordApproval => "pending_landlord_approval",
            WorkflowState::Approved => "approved",
            WorkflowState::Printed => "printed",
            WorkflowState::CheckedOut => "checked_out",
            WorkflowState::SentDigital => "sent_digital",
            WorkflowState::PendingOtp => "pending_otp",
            WorkflowState::PendingTenantSignature => "pending_tenant_signature",
            WorkflowState::ReturnedUnsigned => "returned_unsigned",
            WorkflowState::Active => "active",
            WorkflowState::RenewalOffered => "renewal_offered",
            WorkflowState::RenewalAccepted => "renewal_accepted",
            WorkflowState::RenewalDeclined => "renewal_declined",
            WorkflowState::Expired => "expired",
            WorkflowState::Terminated => "terminated",
            WorkflowState::Cancelled => "cancelled",
            WorkflowState::Disputed => "disputed",
            WorkflowState::Archived => "archived",
        }
    }

    /// Legal successor states.
    ///
    /// The happy path runs DRAFT → … → ACTIVE; DISPUTED is reachable only
    /// from the three post-dispatch states; terminal states funnel into
    /// ARCHIVED.
    pub fn valid_transitions(&self) -> &'static [WorkflowState] {
        use WorkflowState::*;

        match self {
            Draft => &[Received, PendingLandlordApproval, Cancelled],
            Received => &[PendingLandlordApproval, Approved, Cancelled],
            PendingLandlordApproval => &[Approved, Draft, Cancelled],
            Approved => &[Printed, CheckedOut, SentDigital, Cancelled],
            Printed => &[CheckedOut, Cancelled],
            CheckedOut => &[PendingTenantSignature, ReturnedUnsigned],
            SentDigital => &[PendingOtp, Disputed, Cancelled],
            PendingOtp => &[PendingTenantSignature, Disputed, SentDigital],
            PendingTenantSignature => &[Active, Disputed, ReturnedUnsigned],
            ReturnedUnsigned => &[CheckedOut, Cancelled],
            Active => &[RenewalOffered, Expired, Terminated],
            RenewalOffered => &[RenewalAccepted, RenewalDeclined, Expired],
            RenewalAccepted => &[Active],
            RenewalDeclined => &[Expired],
            Expired => &[Archived],
            Terminated => &[Archived],
            Cancelled => &[Archived],
            // Manual resolution: re-dispatch for signing or cancel
            Disputed => &[SentDigital, Cancelled],
            Archived => &[],
        }
    }

    /// Check whether a transition to `target` is legal.
    pub fn can_transition_to(&self, target: WorkflowState) -> bool {
        self.valid_transitions().contains(&target)
    }

    /// Human-readable label.
    pub fn label(&self) -> &'static str {
        match self {
            WorkflowState::Draft => "Draft",
            WorkflowState::Received => "Received",
            WorkflowState::PendingLandlordApproval => "Pending Landlord Approval",
            WorkflowState::Approved => "Approved",
            WorkflowState::Printed => "Printed",
            WorkflowState::CheckedOut => "Checked Out",
            WorkflowState::SentDigital => "Sent Digital",
            WorkflowState::PendingOtp => "Pending OTP Verification",
            WorkflowState::PendingTenantSignature => "Pending Tenant Signature",
            WorkflowState::ReturnedUnsigned => "Returned Unsigned",
            WorkflowState::Active => "Active",
            WorkflowState::RenewalOffered => "Renewal Offered",
            WorkflowState::RenewalAccepted => "Renewal Accepted",
            WorkflowState::RenewalDeclined => "Renewal Declined",
            WorkflowState::Expired => "Expired",
            WorkflowState::Terminated => "Terminated",
            WorkflowState::Cancelled => "Cancelled",
            WorkflowState::Disputed => "Disputed",
            WorkflowState::Archived => "Archived",
        }
    }

    /// Whether no further transitions are possible or the lease left normal
    /// operation permanently.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkflowState::Expired
                | WorkflowState::Terminated
                | WorkflowState::Cancelled
                | WorkflowState::Archived
        )
    }

    /// States where the tenant holds the next action.
    pub fn requires_tenant_action(&self) -> bool {
        matches!(
            self,
            WorkflowState::PendingOtp | WorkflowState::PendingTenantSignature
        )
    }

    /// All states, in lifecycle order.
    pub fn all() -> &'static [WorkflowState] {
        use WorkflowState::*;

        &[
            Draft,
            Received,
            PendingLandlordApproval,
            Approved,
            Printed,
            CheckedOut,
            SentDigital,
            PendingOtp,
            PendingTenantSignature,
            ReturnedUnsigned,
            Active,
            RenewalOffered,
            RenewalAccepted,
            RenewalDeclined,
            Expired,
            Terminated,
            Cancelled,
            Disputed,
            Archived,
        ]
    }
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error for unknown state strings read back from storage or requests.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown workflow state '{0}'")]
pub struct UnknownStateError(pub String);

impl FromStr for WorkflowState {
    type Err = UnknownStateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        WorkflowState::all()
            .iter()
            .find(|state| state.as_str() == s)
            .copied()
            .ok_or_else(|| UnknownStateError(s.to_string()))
    }
}

/// Who performed an engine operation, recorded on every audit entry.
#[derive(Debug, Clone)]
pub struct ActorContext {
    /// Staff identifier, "tenant", or "system"
    pub actor: String,
    /// Originating request IP, when known
    pub ip_address: Option<String>,
}

impl ActorContext {
    pub fn new(actor: impl Into<String>) -> Self {
        Self {
            actor: actor.into(),
            ip_address: None,
        }
    }

    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip_address = Some(ip.into());
        self
    }

    /// Context for engine-internal transitions.
    pub fn system() -> Self {
        Self::new("system")
    }
}

/// Transactional executor for workflow transitions.
pub struct WorkflowEngine {
    db: Arc<DatabaseConnection>,
    clock: SharedClock,
}

impl WorkflowEngine {
    /// Create a new workflow engine
    pub fn new(db: Arc<DatabaseConnection>, clock: SharedClock) -> Self {
        Self { db, clock }
    }

    /// Transition a lease to `target` in its own transaction.
    pub async fn transition(
        &self,
        lease_id: Uuid,
        target: WorkflowState,
        ctx: &ActorContext,
        payload: Option<serde_json::Value>,
    ) -> Result<lease::Model, EngineError> {
        let txn = self.db.begin().await?;

        let lease = self.load_for_update(&txn, lease_id).await?;
        let updated = self
            .transition_in_txn(&txn, lease, target, ctx, payload)
            .await?;

        txn.commit().await?;
        Ok(updated)
    }

    /// Transition a lease as part of a caller-managed transaction.
    ///
    /// The caller is responsible for having locked the lease row (see
    /// [`WorkflowEngine::load_for_update`]) and for committing. Exactly one
    /// audit entry is inserted; a failed validation inserts none.
    pub async fn transition_in_txn(
        &self,
        txn: &DatabaseTransaction,
        lease: lease::Model,
        target: WorkflowState,
        ctx: &ActorContext,
        payload: Option<serde_json::Value>,
    ) -> Result<lease::Model, EngineError> {
        let from = lease.state()?;

        if !from.can_transition_to(target) {
            return Err(EngineError::IllegalTransition { from, to: target });
        }

        let now = self.clock.now();
        let lease_id = lease.id;

        let mut active: lease::ActiveModel = lease.into();
        active.workflow_state = Set(target.as_str().to_string());
        active.updated_at = Set(now);
        let updated = active.update(txn).await?;

        let entry = audit_entry::ActiveModel {
            lease_id: Set(lease_id),
            action: Set("state_transition".to_string()),
            old_state: Set(Some(from.as_str().to_string())),
            new_state: Set(Some(target.as_str().to_string())),
            actor: Set(ctx.actor.clone()),
            ip_address: Set(ctx.ip_address.clone()),
            payload: Set(payload),
            description: Set(format!("Transitioned from {from} to {target}")),
            created_at: Set(now),
            ..Default::default()
        };
        entry.insert(txn).await?;

        metrics::counter!(
            "lease_workflow_transitions_total",
            "to" => target.as_str()
        )
        .increment(1);

        tracing::info!(
            lease_id = %lease_id,
            from = %from,
            to = %target,
            actor = %ctx.actor,
            "lease workflow transition"
        );

        Ok(updated)
    }

    /// Load a lease under an exclusive row lock, serializing concurrent
    /// transitions for the same lease. Soft-retired leases are not eligible.
    pub async fn load_for_update(
        &self,
        txn: &DatabaseTransaction,
        lease_id: Uuid,
    ) -> Result<lease::Model, EngineError> {
        let lease = Lease::find_by_id(lease_id)
            .filter(lease::Column::DeletedAt.is_null())
            .lock_exclusive()
            .one(txn)
            .await?
            .ok_or(EngineError::LeaseNotFound)?;

        Ok(lease)
    }

    /// Check a transition without executing it.
    pub async fn can_transition(
        &self,
        lease_id: Uuid,
        target: WorkflowState,
    ) -> Result<bool, EngineError> {
        let lease = Lease::find_by_id(lease_id)
            .filter(lease::Column::DeletedAt.is_null())
            .one(self.db.as_ref())
            .await?
            .ok_or(EngineError::LeaseNotFound)?;

        Ok(lease.state()?.can_transition_to(target))
    }

    /// Legal successor states for a lease.
    pub async fn valid_next_states(
        &self,
        lease_id: Uuid,
    ) -> Result<Vec<WorkflowState>, EngineError> {
        let lease = Lease::find_by_id(lease_id)
            .filter(lease::Column::DeletedAt.is_null())
            .one(self.db.as_ref())
            .await?
            .ok_or(EngineError::LeaseNotFound)?;

        Ok(lease.state()?.valid_transitions().to_vec())
    }

    /// Offer a renewal: the ACTIVE to RENEWAL_OFFERED transition, permitted
    /// at most once per lease. The guard lives here because the transition
    /// table alone cannot express "once": after an accepted renewal the
    /// state returns to ACTIVE and the edge would be legal again.
    pub async fn offer_renewal(
        &self,
        lease_id: Uuid,
        ctx: &ActorContext,
    ) -> Result<lease::Model, EngineError> {
        let txn = self.db.begin().await?;

        let lease = self.load_for_update(&txn, lease_id).await?;

        if lease.renewal_offered_at.is_some() {
            return Err(EngineError::RenewalAlreadyOffered);
        }

        let now = self.clock.now();
        let mut stamped: lease::ActiveModel = lease.into();
        stamped.renewal_offered_at = Set(Some(now));
        let lease = stamped.update(&txn).await?;

        let updated = self
            .transition_in_txn(&txn, lease, WorkflowState::RenewalOffered, ctx, None)
            .await?;

        txn.commit().await?;
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_edges_are_legal() {
        use WorkflowState::*;

        let happy_path = [
            (Draft, Received),
            (Received, PendingLandlordApproval),
            (PendingLandlordApproval, Approved),
            (Approved, SentDigital),
            (SentDigital, PendingOtp),
            (PendingOtp, PendingTenantSignature),
            (PendingTenantSignature, Active),
        ];

        for (from, to) in happy_path {
            assert!(from.can_transition_to(to), "{from} -> {to} should be legal");
        }
    }

    #[test]
    fn test_physical_path_edges_are_legal() {
        use WorkflowState::*;

        assert!(Approved.can_transition_to(Printed));
        assert!(Printed.can_transition_to(CheckedOut));
        assert!(CheckedOut.can_transition_to(PendingTenantSignature));
        assert!(CheckedOut.can_transition_to(ReturnedUnsigned));
        assert!(ReturnedUnsigned.can_transition_to(CheckedOut));
    }

    #[test]
    fn test_disputed_reachable_only_from_post_dispatch_states() {
        use WorkflowState::*;

        let sources_of_dispute: Vec<_> = WorkflowState::all()
            .iter()
            .filter(|state| state.can_transition_to(Disputed))
            .copied()
            .collect();

        assert_eq!(
            sources_of_dispute,
            vec![SentDigital, PendingOtp, PendingTenantSignature]
        );
    }

    #[test]
    fn test_illegal_edges_rejected() {
        use WorkflowState::*;

        assert!(!Draft.can_transition_to(Active));
        assert!(!Active.can_transition_to(Draft));
        assert!(!Disputed.can_transition_to(Disputed));
        assert!(!Archived.can_transition_to(Draft));
        assert!(Archived.valid_transitions().is_empty());
    }

    #[test]
    fn test_renewal_offered_only_from_active() {
        use WorkflowState::*;

        let sources: Vec<_> = WorkflowState::all()
            .iter()
            .filter(|state| state.can_transition_to(RenewalOffered))
            .copied()
            .collect();

        assert_eq!(sources, vec![Active]);
    }

    #[test]
    fn test_every_state_round_trips_through_string_form() {
        for state in WorkflowState::all() {
            let parsed: WorkflowState = state.as_str().parse().expect("round trip");
            assert_eq!(parsed, *state);
        }

        assert!("signed_in_crayon".parse::<WorkflowState>().is_err());
    }

    #[test]
    fn test_terminal_states() {
        use WorkflowState::*;

        for state in [Expired, Terminated, Cancelled, Archived] {
            assert!(state.is_terminal(), "{state} should be terminal");
        }

        // ACTIVE is the long-lived operating state, not a terminal one
        assert!(!Active.is_terminal());
        assert!(!Disputed.is_terminal());
    }

    #[test]
    fn test_tenant_action_states() {
        use WorkflowState::*;

        assert!(PendingOtp.requires_tenant_action());
        assert!(PendingTenantSignature.requires_tenant_action());
        assert!(!SentDigital.requires_tenant_action());
        assert!(!Active.requires_tenant_action());
    }
}
