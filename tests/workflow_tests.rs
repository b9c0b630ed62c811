//! Integration tests for the workflow state machine and its audit contract.

mod test_utils;

use lease_engine::error::EngineError;
use lease_engine::repositories::AuditRepository;
use lease_engine::workflow::{ActorContext, WorkflowState};

use test_utils::{advance_to, create_test_lease, reload_lease, setup_harness};

fn staff_ctx() -> ActorContext {
    ActorContext::new("agent.wambui").with_ip("10.20.0.5")
}

#[tokio::test]
async fn test_successful_transition_writes_exactly_one_audit_entry() {
    let harness = setup_harness().await.expect("harness");
    let lease = create_test_lease(&harness).await.expect("lease");

    let audit = AuditRepository::new(harness.db.clone());
    let before = audit.count_for_lease(lease.id).await.expect("count");

    let updated = harness
        .state
        .workflow
        .transition(lease.id, WorkflowState::Received, &staff_ctx(), None)
        .await
        .expect("legal transition");
    assert_eq!(updated.workflow_state, WorkflowState::Received.as_str());

    let after = audit.count_for_lease(lease.id).await.expect("count");
    assert_eq!(after, before + 1);

    let entries = audit.list_for_lease(lease.id).await.expect("trail");
    let entry = entries.last().expect("entry");
    assert_eq!(entry.action, "state_transition");
    assert_eq!(entry.old_state.as_deref(), Some("draft"));
    assert_eq!(entry.new_state.as_deref(), Some("received"));
    assert_eq!(entry.actor, "agent.wambui");
    assert_eq!(entry.ip_address.as_deref(), Some("10.20.0.5"));
}

#[tokio::test]
async fn test_illegal_transition_is_typed_and_writes_nothing() {
    let harness = setup_harness().await.expect("harness");
    let lease = create_test_lease(&harness).await.expect("lease");

    let audit = AuditRepository::new(harness.db.clone());
    let before = audit.count_for_lease(lease.id).await.expect("count");

    let result = harness
        .state
        .workflow
        .transition(lease.id, WorkflowState::Active, &staff_ctx(), None)
        .await;

    assert!(matches!(
        result,
        Err(EngineError::IllegalTransition {
            from: WorkflowState::Draft,
            to: WorkflowState::Active,
        })
    ));

    // Failed transitions leave no trace and no state change
    let after = audit.count_for_lease(lease.id).await.expect("count");
    assert_eq!(after, before);

    let current = reload_lease(&harness, lease.id).await.expect("reload");
    assert_eq!(current.workflow_state, WorkflowState::Draft.as_str());
}

#[tokio::test]
async fn test_every_declared_successor_is_accepted() {
    let harness = setup_harness().await.expect("harness");
    let lease = create_test_lease(&harness).await.expect("lease");

    // can_transition agrees with the declared table for the current state
    for target in WorkflowState::all() {
        let allowed = harness
            .state
            .workflow
            .can_transition(lease.id, *target)
            .await
            .expect("check");
        assert_eq!(
            allowed,
            WorkflowState::Draft.can_transition_to(*target),
            "disagreement on draft -> {target}"
        );
    }

    let next = harness
        .state
        .workflow
        .valid_next_states(lease.id)
        .await
        .expect("next states");
    assert_eq!(
        next,
        vec![
            WorkflowState::Received,
            WorkflowState::PendingLandlordApproval,
            WorkflowState::Cancelled,
        ]
    );
}

#[tokio::test]
async fn test_concurrent_transitions_serialize_per_lease() {
    let harness = setup_harness().await.expect("harness");
    let lease = create_test_lease(&harness).await.expect("lease");

    let workflow_a = harness.state.workflow.clone();
    let workflow_b = harness.state.workflow.clone();
    let id = lease.id;
    let ctx = staff_ctx();

    let (a, b) = tokio::join!(
        workflow_a.transition(id, WorkflowState::Received, &ctx, None),
        workflow_b.transition(id, WorkflowState::Received, &ctx, None),
    );

    // Exactly one attempt wins; the loser sees an illegal edge, not a
    // silently skipped state
    let outcomes = [a.is_ok(), b.is_ok()];
    assert_eq!(outcomes.iter().filter(|ok| **ok).count(), 1);

    let audit = AuditRepository::new(harness.db.clone());
    let transitions = audit
        .count_for_lease_action(id, "state_transition")
        .await
        .expect("count");
    assert_eq!(transitions, 1);
}

#[tokio::test]
async fn test_renewal_offered_at_most_once() {
    let harness = setup_harness().await.expect("harness");
    let lease = create_test_lease(&harness).await.expect("lease");

    advance_to(
        &harness,
        lease.id,
        &[
            WorkflowState::Received,
            WorkflowState::Approved,
            WorkflowState::SentDigital,
            WorkflowState::PendingOtp,
            WorkflowState::PendingTenantSignature,
            WorkflowState::Active,
        ],
    )
    .await
    .expect("to active");

    let offered = harness
        .state
        .workflow
        .offer_renewal(lease.id, &staff_ctx())
        .await
        .expect("first offer");
    assert_eq!(offered.workflow_state, WorkflowState::RenewalOffered.as_str());
    assert!(offered.renewal_offered_at.is_some());

    // Tenant accepts; lease returns to ACTIVE
    advance_to(
        &harness,
        lease.id,
        &[WorkflowState::RenewalAccepted, WorkflowState::Active],
    )
    .await
    .expect("accept renewal");

    // ACTIVE -> RENEWAL_OFFERED is a legal edge again, but the per-lease
    // guard refuses a second offer
    let second = harness
        .state
        .workflow
        .offer_renewal(lease.id, &staff_ctx())
        .await;
    assert!(matches!(second, Err(EngineError::RenewalAlreadyOffered)));

    let current = reload_lease(&harness, lease.id).await.expect("reload");
    assert_eq!(current.workflow_state, WorkflowState::Active.as_str());
}

#[tokio::test]
async fn test_missing_lease_is_reported() {
    let harness = setup_harness().await.expect("harness");

    let result = harness
        .state
        .workflow
        .transition(
            uuid::Uuid::new_v4(),
            WorkflowState::Received,
            &staff_ctx(),
            None,
        )
        .await;

    assert!(matches!(result, Err(EngineError::LeaseNotFound)));
}
