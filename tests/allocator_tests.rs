//! Integration tests for the sequence allocator.

mod test_utils;

use lease_engine::error::EngineError;
use lease_engine::sequence::LeaseType;

use test_utils::{create_test_lease, setup_harness};

#[tokio::test]
async fn test_reference_numbers_are_sequential_for_one_key() {
    let harness = setup_harness().await.expect("harness");
    let allocator = &harness.state.allocator;

    let first = allocator
        .allocate_reference("A", LeaseType::Commercial, Some(2026))
        .await
        .expect("first allocation");
    let second = allocator
        .allocate_reference("A", LeaseType::Commercial, Some(2026))
        .await
        .expect("second allocation");

    assert_eq!(first, "LSE-COM-A-00001-2026");
    assert_eq!(second, "LSE-COM-A-00002-2026");
}

#[tokio::test]
async fn test_unrelated_keys_have_independent_sequences() {
    let harness = setup_harness().await.expect("harness");
    let allocator = &harness.state.allocator;

    let commercial_a = allocator
        .allocate_reference("A", LeaseType::Commercial, Some(2026))
        .await
        .expect("allocates");
    let residential_a = allocator
        .allocate_reference("A", LeaseType::Residential, Some(2026))
        .await
        .expect("allocates");
    let commercial_b = allocator
        .allocate_reference("B", LeaseType::Commercial, Some(2026))
        .await
        .expect("allocates");
    let commercial_a_2027 = allocator
        .allocate_reference("A", LeaseType::Commercial, Some(2027))
        .await
        .expect("allocates");

    // Every key starts its own counter at 1
    assert_eq!(commercial_a, "LSE-COM-A-00001-2026");
    assert_eq!(residential_a, "LSE-RES-A-00001-2026");
    assert_eq!(commercial_b, "LSE-COM-B-00001-2026");
    assert_eq!(commercial_a_2027, "LSE-COM-A-00001-2027");
}

#[tokio::test]
async fn test_serial_numbers_use_their_own_counter() {
    let harness = setup_harness().await.expect("harness");
    let allocator = &harness.state.allocator;

    // Reference allocations must not consume serial sequences
    allocator
        .allocate_reference("A", LeaseType::Commercial, Some(2026))
        .await
        .expect("allocates");

    let first = allocator
        .allocate_serial("LSE", Some(2026))
        .await
        .expect("allocates");
    let second = allocator
        .allocate_serial("LSE", Some(2026))
        .await
        .expect("allocates");

    assert_eq!(first, "LSE-2026-0001");
    assert_eq!(second, "LSE-2026-0002");
}

#[tokio::test]
async fn test_concurrent_allocations_same_key_never_duplicate() {
    let harness = setup_harness().await.expect("harness");
    let allocator = harness.state.allocator.clone();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let allocator = allocator.clone();
        handles.push(tokio::spawn(async move {
            allocator
                .allocate_reference("A", LeaseType::Commercial, Some(2026))
                .await
        }));
    }

    let mut allocated = Vec::new();
    for handle in handles {
        allocated.push(handle.await.expect("task").expect("allocation"));
    }

    allocated.sort();
    allocated.dedup();
    assert_eq!(allocated.len(), 8, "duplicates were allocated");

    // Contiguous, gap-free sequence 1..=8
    let expected: Vec<String> = (1..=8)
        .map(|n| format!("LSE-COM-A-{n:05}-2026"))
        .collect();
    assert_eq!(allocated, expected);
}

#[tokio::test]
async fn test_current_sequence_reads_without_incrementing() {
    let harness = setup_harness().await.expect("harness");
    let allocator = &harness.state.allocator;

    assert_eq!(
        allocator
            .current_reference_sequence("A", LeaseType::Commercial, Some(2026))
            .await
            .expect("reads"),
        0
    );

    allocator
        .allocate_reference("A", LeaseType::Commercial, Some(2026))
        .await
        .expect("allocates");

    assert_eq!(
        allocator
            .current_reference_sequence("A", LeaseType::Commercial, Some(2026))
            .await
            .expect("reads"),
        1
    );
    // Reading twice does not advance
    assert_eq!(
        allocator
            .current_reference_sequence("A", LeaseType::Commercial, Some(2026))
            .await
            .expect("reads"),
        1
    );
}

#[tokio::test]
async fn test_drift_guard_skips_identifiers_already_in_use() {
    let harness = setup_harness().await.expect("harness");
    let allocator = &harness.state.allocator;

    // A lease minted normally holds LSE-COM-A-00001-2026 (and LSE-2026-0001)
    let lease = create_test_lease(&harness).await.expect("lease");
    assert_eq!(lease.reference_number, "LSE-COM-A-00001-2026");

    // Simulate a counter table restored from an old backup
    assert!(
        allocator
            .reset_reference_sequence("A", LeaseType::Commercial, None)
            .await
            .expect("resets")
    );
    assert!(
        allocator
            .reset_serial_sequence("LSE", None)
            .await
            .expect("resets")
    );

    // The allocator must advance past the identifiers already in use
    let reference = allocator
        .allocate_reference("A", LeaseType::Commercial, None)
        .await
        .expect("allocates");
    let serial = allocator.allocate_serial("LSE", None).await.expect("allocates");

    assert_eq!(reference, "LSE-COM-A-00002-2026");
    assert_eq!(serial, "LSE-2026-0002");
}

#[tokio::test]
async fn test_reset_missing_counter_reports_false() {
    let harness = setup_harness().await.expect("harness");

    let reset = harness
        .state
        .allocator
        .reset_reference_sequence("ZZ", LeaseType::Residential, Some(2031))
        .await
        .expect("runs");

    assert!(!reset);
}

#[tokio::test]
async fn test_exhausted_retry_budget_is_fatal() {
    let mut config = test_utils::test_config();
    config.allocator.max_attempts = 2;
    let harness = test_utils::setup_harness_with_config(config)
        .await
        .expect("harness");

    // Two minted leases occupy sequences 1 and 2; with the counter reset and
    // only two attempts allowed, allocation must fail loudly.
    create_test_lease(&harness).await.expect("lease one");
    create_test_lease(&harness).await.expect("lease two");

    harness
        .state
        .allocator
        .reset_reference_sequence("A", LeaseType::Commercial, None)
        .await
        .expect("resets");

    let result = harness
        .state
        .allocator
        .allocate_reference("A", LeaseType::Commercial, None)
        .await;

    assert!(matches!(
        result,
        Err(EngineError::AllocationExhausted { attempts: 2, .. })
    ));
}
