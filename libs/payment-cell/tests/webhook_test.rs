use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use serde_json::json;
use tower::ServiceExt;
use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use payment_cell::router::payment_routes;
use payment_cell::services::webhook::sign_webhook_payload;
use shared_utils::test_utils::{MockStoreResponses, TestConfig};

fn create_test_app(config: &TestConfig) -> Router {
    payment_routes(Arc::new(config.to_app_config()))
}

fn webhook_request(body: &str, signature: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/webhook")
        .header("Content-Type", "application/json");
    if let Some(signature) = signature {
        builder = builder.header("x-webhook-signature", signature);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

#[tokio::test]
async fn webhooks_without_a_signature_are_rejected() {
    let config = TestConfig::default();
    let app = create_test_app(&config);

    let body = json!({
        "event_type": "checkout.session.completed",
        "session_id": "order_abc"
    })
    .to_string();

    let response = app.oneshot(webhook_request(&body, None)).await.unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn webhooks_with_a_bad_signature_are_rejected() {
    let config = TestConfig::default();
    let app = create_test_app(&config);

    let body = json!({
        "event_type": "checkout.session.completed",
        "session_id": "order_abc"
    })
    .to_string();
    let signature = sign_webhook_payload(body.as_bytes(), "attacker-secret");

    let response = app
        .oneshot(webhook_request(&body, Some(&signature)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn unhandled_event_types_are_acknowledged_without_processing() {
    let config = TestConfig::default();
    let app = create_test_app(&config);

    let body = json!({
        "event_type": "checkout.session.expired",
        "session_id": "order_abc"
    })
    .to_string();
    let signature = sign_webhook_payload(body.as_bytes(), &config.webhook_secret);

    let response = app
        .oneshot(webhook_request(&body, Some(&signature)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn a_replayed_completion_event_returns_success_without_side_effects() {
    let mock_server = MockServer::start().await;
    let config = TestConfig::with_supabase_url(&mock_server.uri());

    let patient_id = Uuid::new_v4();
    let doctor_id = Uuid::new_v4();
    let appointment_id = Uuid::new_v4();

    // The payment is already completed: the webhook is a provider retry.
    Mock::given(method("GET"))
        .and(path("/rest/v1/payments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
            "id": Uuid::new_v4(),
            "patient_id": patient_id,
            "doctor_id": doctor_id,
            "appointment_id": appointment_id,
            "bill_id": null,
            "amount": 25000,
            "currency": "INR",
            "payment_type": "booking_fee",
            "provider_session_id": "order_retry",
            "provider_payment_id": "pay_abc",
            "status": "completed",
            "payment_date": "2024-05-01T09:00:00Z",
            "metadata": null,
            "created_at": "2024-05-01T08:00:00Z",
            "updated_at": "2024-05-01T09:00:00Z"
        }])))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockStoreResponses::appointment(
                &appointment_id.to_string(),
                &patient_id.to_string(),
                &doctor_id.to_string(),
                "2024-05-01",
                "10:00-10:30",
                "scheduled",
            )
        ])))
        .mount(&mock_server)
        .await;

    // No writes on a replay.
    Mock::given(method("POST"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([])))
        .expect(0)
        .mount(&mock_server)
        .await;

    let body = json!({
        "event_type": "checkout.session.completed",
        "session_id": "order_retry",
        "provider_payment_id": "pay_abc"
    })
    .to_string();
    let signature = sign_webhook_payload(body.as_bytes(), &config.webhook_secret);

    let app = create_test_app(&config);
    let response = app
        .oneshot(webhook_request(&body, Some(&signature)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn unknown_sessions_return_an_error_so_the_provider_retries() {
    let mock_server = MockServer::start().await;
    let config = TestConfig::with_supabase_url(&mock_server.uri());

    Mock::given(method("GET"))
        .and(path("/rest/v1/payments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&mock_server)
        .await;

    let body = json!({
        "event_type": "checkout.session.completed",
        "session_id": "order_unknown"
    })
    .to_string();
    let signature = sign_webhook_payload(body.as_bytes(), &config.webhook_secret);

    let app = create_test_app(&config);
    let response = app
        .oneshot(webhook_request(&body, Some(&signature)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
