//! Integration tests for the HTTP surface.

mod test_utils;

use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use chrono::Duration;
use serde_json::{Value, json};
use tower::util::ServiceExt;

use lease_engine::server::create_app;
use lease_engine::workflow::WorkflowState;

use test_utils::{advance_to, create_test_lease, path_to_sent_digital, setup_harness};

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("json body")
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .header("user-agent", "Mozilla/5.0 (X11; Linux x86_64) Firefox/121.0")
        .header("accept-language", "en-US")
        .header("x-real-ip", "41.90.1.10")
        .body(Body::from(body.to_string()))
        .expect("request")
}

#[tokio::test]
async fn test_create_lease_mints_both_identifiers() {
    let harness = setup_harness().await.expect("harness");
    let app = create_app(harness.state.clone());

    let request = post_json(
        "/api/v1/leases",
        json!({
            "lease_type": "commercial",
            "zone": "a",
            "tenant_id": uuid::Uuid::new_v4(),
            "tenant_phone": "+254712345678",
            "actor": "agent.wambui"
        }),
    );

    let response = app.oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::CREATED);

    let body = body_json(response).await;
    assert_eq!(body["reference_number"], "LSE-COM-A-00001-2026");
    assert_eq!(body["serial_number"], "LSE-2026-0001");
    assert_eq!(body["workflow_state"], "draft");
}

#[tokio::test]
async fn test_create_lease_rejects_unknown_type() {
    let harness = setup_harness().await.expect("harness");
    let app = create_app(harness.state.clone());

    let request = post_json(
        "/api/v1/leases",
        json!({
            "lease_type": "industrial",
            "zone": "A",
            "tenant_id": uuid::Uuid::new_v4(),
            "tenant_phone": "+254712345678"
        }),
    );

    let response = app.oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = body_json(response).await;
    assert_eq!(body["code"], "VALIDATION_FAILED");
}

#[tokio::test]
async fn test_illegal_transition_returns_conflict() {
    let harness = setup_harness().await.expect("harness");
    let lease = create_test_lease(&harness).await.expect("lease");
    let app = create_app(harness.state.clone());

    let request = post_json(
        &format!("/api/v1/leases/{}/transition", lease.id),
        json!({ "target_state": "active", "actor": "agent.wambui" }),
    );

    let response = app.oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let body = body_json(response).await;
    assert_eq!(body["code"], "ILLEGAL_TRANSITION");
}

#[tokio::test]
async fn test_public_verification_discloses_basic_info_only() {
    let harness = setup_harness().await.expect("harness");
    let lease = create_test_lease(&harness).await.expect("lease");
    let app = create_app(harness.state.clone());

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/api/v1/verify/{}", lease.serial_number))
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["exists"], true);
    assert_eq!(body["is_active"], false);
    assert_eq!(body["status"], "Draft");
    // No tenant, phone, or reference data leaks through this endpoint
    assert!(body.get("tenant_id").is_none());
    assert!(body.get("reference_number").is_none());

    // Unknown serial: same shape, nothing disclosed
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/v1/verify/LSE-2026-9999")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["exists"], false);

    // Malformed serials are rejected outright
    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/v1/verify/not-a-serial")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_retired_lease_disappears_from_lookups() {
    let harness = setup_harness().await.expect("harness");
    let lease = create_test_lease(&harness).await.expect("lease");
    let app = create_app(harness.state.clone());

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/api/v1/leases/{}", lease.id))
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    // Soft-retired: gone from lookups, row kept for the audit trail
    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/api/v1/leases/{}", lease.id))
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_signing_routes_require_a_valid_link() {
    let harness = setup_harness().await.expect("harness");
    let lease = create_test_lease(&harness).await.expect("lease");
    advance_to(&harness, lease.id, &path_to_sent_digital())
        .await
        .expect("setup path");
    let app = create_app(harness.state.clone());

    // Forged token
    let request = post_json(
        &format!(
            "/api/v1/sign/{}/otp/request?tenant={}&expires=4102444800&token={}",
            lease.id,
            lease.tenant_id,
            "ab".repeat(32),
        ),
        json!({}),
    );
    let response = app.clone().oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let body = body_json(response).await;
    assert_eq!(body["code"], "VERIFICATION_FAILED");
    // Generic message: no lease/tenant enumeration help
    assert_eq!(body["message"], "Verification failed");
}

#[tokio::test]
async fn test_signing_flow_over_http() {
    let harness = setup_harness().await.expect("harness");
    let lease = create_test_lease(&harness).await.expect("lease");
    advance_to(&harness, lease.id, &path_to_sent_digital())
        .await
        .expect("setup path");
    let app = create_app(harness.state.clone());

    // A genuine link as the tenant would receive it
    let link = harness
        .state
        .links
        .issue(lease.id, lease.tenant_id, Duration::hours(72))
        .expect("link");
    let query = url::Url::parse(&link.url).expect("parses");
    let query = query.query().expect("query").to_string();

    // Request the OTP
    let response = app
        .clone()
        .oneshot(post_json(
            &format!("/api/v1/sign/{}/otp/request?{query}", lease.id),
            json!({}),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    let code = harness.transport.last_otp_code().expect("code in sms");

    // Wrong code is a generic 401
    let response = app
        .clone()
        .oneshot(post_json(
            &format!("/api/v1/sign/{}/otp/verify?{query}", lease.id),
            json!({ "code": if code == "0000" { "0001" } else { "0000" } }),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // Correct code verifies
    let response = app
        .clone()
        .oneshot(post_json(
            &format!("/api/v1/sign/{}/otp/verify?{query}", lease.id),
            json!({ "code": code }),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["verified"], true);

    // Capture the signature
    let response = app
        .clone()
        .oneshot(post_json(
            &format!("/api/v1/sign/{}/signature?{query}", lease.id),
            json!({ "signature_data": "data:image/png;base64,AAAA" }),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::CREATED);

    // The lease is now in force
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/api/v1/verify/{}", lease.serial_number))
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    let body = body_json(response).await;
    assert_eq!(body["is_active"], true);

    // And the audit trail shows the full journey
    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/api/v1/leases/{}/audit", lease.id))
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    let states: Vec<&str> = body
        .as_array()
        .expect("array")
        .iter()
        .filter_map(|entry| entry["new_state"].as_str())
        .collect();
    assert_eq!(
        states,
        vec![
            "received",
            "approved",
            "sent_digital",
            "pending_otp",
            "pending_tenant_signature",
            "active",
        ]
    );
}

#[tokio::test]
async fn test_expired_link_returns_gone() {
    let harness = setup_harness().await.expect("harness");
    let lease = create_test_lease(&harness).await.expect("lease");
    advance_to(&harness, lease.id, &path_to_sent_digital())
        .await
        .expect("setup path");

    let link = harness
        .state
        .links
        .issue(lease.id, lease.tenant_id, Duration::hours(72))
        .expect("link");
    let query = url::Url::parse(&link.url).expect("parses");
    let query = query.query().expect("query").to_string();

    harness.clock.advance(Duration::hours(73));

    let app = create_app(harness.state.clone());
    let response = app
        .oneshot(post_json(
            &format!("/api/v1/sign/{}/otp/request?{query}", lease.id),
            json!({}),
        ))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::GONE);
    let body = body_json(response).await;
    assert_eq!(body["code"], "EXPIRED");
}

#[tokio::test]
async fn test_rate_limit_surfaces_retry_after_header() {
    let harness = setup_harness().await.expect("harness");
    let lease = create_test_lease(&harness).await.expect("lease");
    advance_to(&harness, lease.id, &path_to_sent_digital())
        .await
        .expect("setup path");

    let link = harness
        .state
        .links
        .issue(lease.id, lease.tenant_id, Duration::hours(72))
        .expect("link");
    let query = url::Url::parse(&link.url).expect("parses");
    let query = query.query().expect("query").to_string();

    let app = create_app(harness.state.clone());
    for _ in 0..3 {
        let response = app
            .clone()
            .oneshot(post_json(
                &format!("/api/v1/sign/{}/otp/request?{query}", lease.id),
                json!({}),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = app
        .oneshot(post_json(
            &format!("/api/v1/sign/{}/otp/request?{query}", lease.id),
            json!({}),
        ))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(response.headers().get("retry-after").is_some());
    let body = body_json(response).await;
    assert_eq!(body["code"], "RATE_LIMITED");
}
