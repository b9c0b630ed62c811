//! Test utilities for database and engine testing.
//!
//! Provides an in-memory SQLite database with migrations applied, a manual
//! clock, and recording SMS/notifier doubles so the engine can be driven
//! deterministically end to end.

// Each test binary uses a different subset of these helpers
#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use migration::{Migrator, MigratorTrait};
use sea_orm::{ActiveModelTrait, Database, DatabaseConnection, Set};
use uuid::Uuid;

use lease_engine::clock::{Clock, ManualClock};
use lease_engine::config::AppConfig;
use lease_engine::models::lease;
use lease_engine::notify::{Notifier, NotifyError};
use lease_engine::repositories::{LeaseRepository, NewLease};
use lease_engine::server::AppState;
use lease_engine::sms::{SmsError, SmsTransport};
use lease_engine::workflow::{ActorContext, WorkflowState};

/// Sets up an in-memory SQLite database with all migrations applied.
pub async fn setup_test_db() -> Result<Arc<DatabaseConnection>> {
    let db = Database::connect("sqlite::memory:").await?;
    Migrator::up(&db, None).await?;
    Ok(Arc::new(db))
}

/// Fixed test start instant: 2026-03-01 09:00:00 UTC.
pub fn test_start() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()
}

/// Manual clock frozen at [`test_start`].
pub fn test_clock() -> Arc<ManualClock> {
    ManualClock::starting_at(test_start())
}

/// How the mock SMS transport responds to sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendMode {
    /// Gateway accepts the message
    Accept,
    /// Gateway answers but rejects the message (send returns false)
    Reject,
    /// Transport errors out entirely
    Fail,
}

/// Recording SMS transport double.
pub struct MockSmsTransport {
    pub sent: Mutex<Vec<(String, String)>>,
    pub mode: Mutex<SendMode>,
}

impl MockSmsTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            mode: Mutex::new(SendMode::Accept),
        })
    }

    pub fn set_mode(&self, mode: SendMode) {
        *self.mode.lock().unwrap() = mode;
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    /// Extract the OTP code from the most recent message body.
    pub fn last_otp_code(&self) -> Option<String> {
        let sent = self.sent.lock().unwrap();
        let (_, message) = sent.last()?;

        let needle = " is ";
        let start = message.find(needle)? + needle.len();
        let code: String = message[start..]
            .chars()
            .take_while(|c| c.is_ascii_digit())
            .collect();

        (!code.is_empty()).then_some(code)
    }

    /// The most recent message body.
    pub fn last_message(&self) -> Option<String> {
        self.sent.lock().unwrap().last().map(|(_, m)| m.clone())
    }
}

#[async_trait]
impl SmsTransport for MockSmsTransport {
    async fn send(&self, phone: &str, message: &str) -> Result<bool, SmsError> {
        let mode = *self.mode.lock().unwrap();
        match mode {
            SendMode::Accept => {
                self.sent
                    .lock()
                    .unwrap()
                    .push((phone.to_string(), message.to_string()));
                Ok(true)
            }
            SendMode::Reject => Ok(false),
            SendMode::Fail => Err(SmsError::Request("simulated outage".to_string())),
        }
    }
}

/// Recording notifier double.
pub struct MockNotifier {
    pub notifications: Mutex<Vec<(String, String)>>,
}

impl MockNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            notifications: Mutex::new(Vec::new()),
        })
    }

    pub fn recipients(&self) -> Vec<String> {
        self.notifications
            .lock()
            .unwrap()
            .iter()
            .map(|(recipient, _)| recipient.clone())
            .collect()
    }
}

#[async_trait]
impl Notifier for MockNotifier {
    async fn notify(
        &self,
        recipient: &str,
        subject: &str,
        _body: &str,
    ) -> Result<(), NotifyError> {
        self.notifications
            .lock()
            .unwrap()
            .push((recipient.to_string(), subject.to_string()));
        Ok(())
    }
}

/// Configuration used by the test harness.
pub fn test_config() -> AppConfig {
    let mut config = AppConfig {
        profile: "test".to_string(),
        signing_link_secret: Some("integration-test-secret".to_string()),
        ..AppConfig::default()
    };
    config.dispute.admin_contacts = vec![
        "admin.one@example.com".to_string(),
        "admin.two@example.com".to_string(),
    ];
    config
}

/// Everything a test needs to drive the engine.
pub struct TestHarness {
    pub db: Arc<DatabaseConnection>,
    pub state: AppState,
    pub clock: Arc<ManualClock>,
    pub transport: Arc<MockSmsTransport>,
    pub notifier: Arc<MockNotifier>,
}

/// Build an [`AppState`] over an in-memory database with deterministic
/// collaborators.
pub async fn setup_harness() -> Result<TestHarness> {
    setup_harness_with_config(test_config()).await
}

/// Same as [`setup_harness`] with a custom configuration.
pub async fn setup_harness_with_config(config: AppConfig) -> Result<TestHarness> {
    let db = setup_test_db().await?;
    let clock = test_clock();
    let transport = MockSmsTransport::new();
    let notifier = MockNotifier::new();

    let state = AppState::build(
        db.clone(),
        Arc::new(config),
        clock.clone(),
        transport.clone(),
        notifier.clone(),
    );

    Ok(TestHarness {
        db,
        state,
        clock,
        transport,
        notifier,
    })
}

/// Create a lease in DRAFT with pre-minted identifiers.
pub async fn create_test_lease(harness: &TestHarness) -> Result<lease::Model> {
    create_test_lease_with(harness, None).await
}

/// Create a lease in DRAFT, optionally assigning an approver contact.
pub async fn create_test_lease_with(
    harness: &TestHarness,
    approver_contact: Option<String>,
) -> Result<lease::Model> {
    let reference_number = harness
        .state
        .allocator
        .allocate_reference("A", "commercial".parse().unwrap(), None)
        .await?;
    let serial_number = harness.state.allocator.allocate_serial("LSE", None).await?;

    let repo = LeaseRepository::new(harness.db.clone());
    let lease = repo
        .create(
            NewLease {
                reference_number,
                serial_number,
                lease_type: "commercial".to_string(),
                zone: "A".to_string(),
                tenant_id: Uuid::new_v4(),
                landlord_id: Some(Uuid::new_v4()),
                unit_id: Some(Uuid::new_v4()),
                tenant_phone: "+254712345678".to_string(),
                approver_contact,
            },
            harness.clock.now(),
        )
        .await?;

    Ok(lease)
}

/// Walk a lease through legal transitions until it reaches `target`.
pub async fn advance_to(
    harness: &TestHarness,
    lease_id: Uuid,
    path: &[WorkflowState],
) -> Result<()> {
    let ctx = ActorContext::new("test.staff");

    for target in path {
        harness
            .state
            .workflow
            .transition(lease_id, *target, &ctx, None)
            .await?;
    }

    Ok(())
}

/// The canonical path from DRAFT to SENT_DIGITAL.
pub fn path_to_sent_digital() -> Vec<WorkflowState> {
    vec![
        WorkflowState::Received,
        WorkflowState::Approved,
        WorkflowState::SentDigital,
    ]
}

/// Force a lease's workflow state directly, bypassing the engine. Test
/// setup only.
pub async fn force_state(
    harness: &TestHarness,
    lease: lease::Model,
    state: WorkflowState,
) -> Result<lease::Model> {
    let mut active: lease::ActiveModel = lease.into();
    active.workflow_state = Set(state.as_str().to_string());
    Ok(active.update(harness.db.as_ref()).await?)
}

/// Fetch the lease fresh from the database.
pub async fn reload_lease(harness: &TestHarness, lease_id: Uuid) -> Result<lease::Model> {
    let repo = LeaseRepository::new(harness.db.clone());
    Ok(repo
        .find_by_id(lease_id)
        .await?
        .expect("lease should exist"))
}
