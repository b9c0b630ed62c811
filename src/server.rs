//! # Server Configuration
//!
//! This module contains the application state wiring and the Axum server
//! setup for the lease engine.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    extract::Request,
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
};
use sea_orm::DatabaseConnection;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::clock::{SharedClock, system_clock};
use crate::config::AppConfig;
use crate::dispute::DisputeHandler;
use crate::fingerprint::{DeviceRiskScorer, InMemoryVelocityStore};
use crate::handlers;
use crate::notify::{Notifier, notifier_from_config};
use crate::otp::OtpVerifier;
use crate::repositories::{
    AuditRepository, DigitalSignatureRepository, LeaseRepository, OtpChallengeRepository,
};
use crate::sequence::SequenceAllocator;
use crate::signed_link::SignedLinkIssuer;
use crate::signing::SigningCoordinator;
use crate::sms::{HttpSmsTransport, SmsTransport};
use crate::telemetry::{self, TraceContext};
use crate::workflow::WorkflowEngine;

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub clock: SharedClock,
    pub leases: Arc<LeaseRepository>,
    pub audit: Arc<AuditRepository>,
    pub allocator: Arc<SequenceAllocator>,
    pub workflow: Arc<WorkflowEngine>,
    pub otp: Arc<OtpVerifier>,
    pub signing: Arc<SigningCoordinator>,
    pub disputes: Arc<DisputeHandler>,
    pub links: Arc<SignedLinkIssuer>,
}

impl AppState {
    /// Wire the engine services from a database connection and configuration.
    ///
    /// The clock, transport, and notifier are injectable so tests can
    /// substitute deterministic implementations.
    pub fn build(
        db: Arc<DatabaseConnection>,
        config: Arc<AppConfig>,
        clock: SharedClock,
        transport: Arc<dyn SmsTransport>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let operation_timeout = Duration::from_millis(config.operation_timeout_ms);

        let velocity = Arc::new(InMemoryVelocityStore::new(clock.clone()));
        let scorer = Arc::new(DeviceRiskScorer::new(velocity));

        let workflow = Arc::new(WorkflowEngine::new(db.clone(), clock.clone()));
        let allocator = Arc::new(SequenceAllocator::new(
            db.clone(),
            clock.clone(),
            config.allocator.clone(),
            operation_timeout,
        ));

        let otp = Arc::new(OtpVerifier::new(
            OtpChallengeRepository::new(db.clone()),
            scorer,
            transport.clone(),
            clock.clone(),
            config.otp.clone(),
            config.sms.default_country_code.clone(),
            operation_timeout,
        ));

        let links = Arc::new(SignedLinkIssuer::new(
            config
                .signing_link_secret
                .clone()
                .unwrap_or_else(|| "local-development-secret".to_string())
                .into_bytes(),
            config.signing_link_base_url.clone(),
            clock.clone(),
        ));

        let signing = Arc::new(SigningCoordinator::new(
            LeaseRepository::new(db.clone()),
            DigitalSignatureRepository::new(db.clone()),
            otp.clone(),
            workflow.clone(),
            links.clone(),
            transport,
            notifier.clone(),
            clock.clone(),
            config.signing.clone(),
        ));

        let disputes = Arc::new(DisputeHandler::new(
            db.clone(),
            LeaseRepository::new(db.clone()),
            DigitalSignatureRepository::new(db.clone()),
            workflow.clone(),
            notifier,
            clock.clone(),
            config.dispute.clone(),
        ));

        Self {
            config,
            clock,
            leases: Arc::new(LeaseRepository::new(db.clone())),
            audit: Arc::new(AuditRepository::new(db)),
            allocator,
            workflow,
            otp,
            signing,
            disputes,
            links,
        }
    }
}

/// Creates and configures the Axum application router
pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health))
        .route("/api/v1/leases", post(handlers::leases::create_lease))
        .route(
            "/api/v1/leases/{id}",
            get(handlers::leases::get_lease).delete(handlers::leases::retire_lease),
        )
        .route(
            "/api/v1/leases/{id}/transition",
            post(handlers::leases::transition_lease),
        )
        .route(
            "/api/v1/leases/{id}/renewal-offer",
            post(handlers::leases::offer_renewal),
        )
        .route(
            "/api/v1/leases/{id}/signing/initiate",
            post(handlers::leases::initiate_signing),
        )
        .route(
            "/api/v1/leases/{id}/audit",
            get(handlers::leases::lease_audit_trail),
        )
        .route(
            "/api/v1/sign/{lease_id}/otp/request",
            post(handlers::signing::request_otp),
        )
        .route(
            "/api/v1/sign/{lease_id}/otp/resend",
            post(handlers::signing::resend_otp),
        )
        .route(
            "/api/v1/sign/{lease_id}/otp/verify",
            post(handlers::signing::verify_otp),
        )
        .route(
            "/api/v1/sign/{lease_id}/signature",
            post(handlers::signing::capture_signature),
        )
        .route(
            "/api/v1/sign/{lease_id}/status",
            get(handlers::signing::signing_status),
        )
        .route(
            "/api/v1/sign/{lease_id}/dispute",
            post(handlers::signing::dispute_lease),
        )
        .route(
            "/api/v1/verify/{serial}",
            get(handlers::verification::verify_serial),
        )
        .layer(middleware::from_fn(trace_context_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/openapi.json", ApiDoc::openapi()))
}

/// Scope every request to a correlation ID so error responses and logs can
/// be matched up.
async fn trace_context_middleware(request: Request, next: Next) -> Response {
    let context = TraceContext::generate();
    telemetry::with_trace_context(context, next.run(request)).await
}

/// Starts the server with the given configuration
pub async fn run_server(
    config: AppConfig,
    db: DatabaseConnection,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = Arc::new(config);
    let transport = Arc::new(HttpSmsTransport::new(config.sms.clone()));
    let notifier = notifier_from_config(&config.dispute);

    let state = AppState::build(
        Arc::new(db),
        config.clone(),
        system_clock(),
        transport,
        notifier,
    );
    let app = create_app(state);

    // Resolve the configured bind address
    let addr = config
        .bind_addr()
        .map_err(|e| format!("Invalid server address: {}", e))?;

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, profile = %config.profile, "Server listening");

    axum::serve(listener, app).await?;

    Ok(())
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::root,
        crate::handlers::health,
        crate::handlers::leases::create_lease,
        crate::handlers::leases::get_lease,
        crate::handlers::leases::retire_lease,
        crate::handlers::leases::transition_lease,
        crate::handlers::leases::offer_renewal,
        crate::handlers::leases::initiate_signing,
        crate::handlers::leases::lease_audit_trail,
        crate::handlers::signing::request_otp,
        crate::handlers::signing::resend_otp,
        crate::handlers::signing::verify_otp,
        crate::handlers::signing::capture_signature,
        crate::handlers::signing::signing_status,
        crate::handlers::signing::dispute_lease,
        crate::handlers::verification::verify_serial,
    ),
    components(
        schemas(
            crate::models::ServiceInfo,
            crate::models::lease::LeaseResponse,
            crate::models::otp_challenge::ChallengeStatus,
            crate::handlers::leases::CreateLeaseRequestDto,
            crate::handlers::leases::TransitionRequestDto,
            crate::handlers::leases::InitiateSigningRequestDto,
            crate::handlers::leases::RenewalOfferRequestDto,
            crate::handlers::leases::AuditEntryResponse,
            crate::handlers::signing::VerifyOtpRequestDto,
            crate::handlers::signing::VerifyOtpResponseDto,
            crate::handlers::signing::DisputeRequestDto,
            crate::handlers::signing::SignatureResponseDto,
            crate::handlers::verification::VerificationResponseDto,
            crate::signing::InitiateOutcome,
            crate::signing::SigningStatus,
            crate::signing::SignaturePayload,
            crate::error::ApiError,
        )
    ),
    info(
        title = "Lease Engine API",
        description = "Lease signing & verification engine",
        version = env!("CARGO_PKG_VERSION"),
    )
)]
pub struct ApiDoc;
