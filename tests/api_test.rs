mod common;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use chrono::Utc;
use common::{stored, RecordingRepository, StubGateway};
use payment_gateway::domain::{Provider, TransactionStatus, TransactionType};
use payment_gateway::gateways::{GatewayRegistry, RetryPolicy};
use payment_gateway::ports::TransactionRepository;
use payment_gateway::services::signature::{
    sign_authorize_net, sign_stripe, AUTHORIZE_NET_SIGNATURE_HEADER, STRIPE_SIGNATURE_HEADER,
};
use payment_gateway::services::SignatureVerifier;
use payment_gateway::{create_app, AppState};
use tower::ServiceExt;

const STRIPE_SECRET: &str = "whsec_test";
const ANET_KEY: &str = "anet_signature_key";

struct TestApp {
    app: Router,
    repository: Arc<RecordingRepository>,
    stripe: Arc<StubGateway>,
}

fn test_app() -> TestApp {
    let repository = Arc::new(RecordingRepository::new());
    let stripe = Arc::new(StubGateway::new(Provider::Stripe));
    let gateways = GatewayRegistry::new()
        .with(stripe.clone())
        .with(Arc::new(StubGateway::new(Provider::AuthorizeNet)));
    let state = AppState::new(
        repository.clone(),
        gateways,
        RetryPolicy::immediate(3),
        SignatureVerifier::new(
            Some(STRIPE_SECRET.to_string()),
            Some(ANET_KEY.to_string()),
            Duration::from_secs(300),
        ),
    );
    TestApp {
        app: create_app(state),
        repository,
        stripe,
    }
}

fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn stripe_webhook(body: &str, signature: Option<String>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/api/v1/stripe-webhook");
    if let Some(signature) = signature {
        builder = builder.header(STRIPE_SIGNATURE_HEADER, signature);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn deposit_body(transaction_id: &str, provider: &str) -> serde_json::Value {
    serde_json::json!({
        "amount": 10,
        "userId": "user-1",
        "token": "tok_visa",
        "currency": "usd",
        "transactionId": transaction_id,
        "provider": provider
    })
}

#[tokio::test]
async fn test_health_check() {
    let TestApp { app, .. } = test_app();

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_deposit_succeeds() {
    let TestApp {
        app,
        repository,
        stripe,
    } = test_app();

    let response = app
        .oneshot(post_json("/api/v1/deposit", deposit_body("tx-api-1", "stripe")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));
    assert_eq!(stripe.charge_count(), 1);
    let tx = repository
        .find_by_transaction_id("tx-api-1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(tx.status, TransactionStatus::Succeeded);
    assert_eq!(tx.currency, "USD");
}

#[tokio::test]
async fn test_duplicate_deposit_is_bad_request() {
    let TestApp { app, stripe, .. } = test_app();

    let first = app
        .clone()
        .oneshot(post_json("/api/v1/deposit", deposit_body("tx-api-2", "stripe")))
        .await
        .unwrap();
    let second = app
        .oneshot(post_json("/api/v1/deposit", deposit_body("tx-api-2", "stripe")))
        .await
        .unwrap();

    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(second.status(), StatusCode::BAD_REQUEST);
    assert_eq!(stripe.charge_count(), 1);
}

#[tokio::test]
async fn test_unsupported_provider_is_rejected_before_any_write() {
    let TestApp {
        app, repository, ..
    } = test_app();

    let response = app
        .oneshot(post_json("/api/v1/deposit", deposit_body("tx-api-3", "paypal")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(repository.writes(), 0);
}

#[tokio::test]
async fn test_malformed_json_is_bad_request() {
    let TestApp {
        app, repository, ..
    } = test_app();

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/deposit")
                .header("content-type", "application/json")
                .body(Body::from("{\"amount\":"))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(repository.writes(), 0);
}

#[tokio::test]
async fn test_oversized_amount_is_rejected_before_any_write() {
    let TestApp {
        app, repository, ..
    } = test_app();

    let body = r#"{"amount":1234567890123456.78,"userId":"user-1","token":"tok_visa","currency":"usd","transactionId":"tx-api-big","provider":"stripe"}"#;
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/deposit")
                .header("content-type", "application/json")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(repository.writes(), 0);
}

#[tokio::test]
async fn test_get_transaction() {
    let TestApp { app, .. } = test_app();

    app.clone()
        .oneshot(post_json("/api/v1/deposit", deposit_body("tx-api-4", "stripe")))
        .await
        .unwrap();

    let found = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/v1/transactions/tx-api-4")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let missing = app
        .oneshot(
            Request::builder()
                .uri("/api/v1/transactions/nope")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(found.status(), StatusCode::OK);
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_stripe_webhook_with_valid_signature_reconciles() {
    let TestApp {
        app, repository, ..
    } = test_app();
    repository
        .seed(stored(
            "tx-wh-1",
            TransactionType::Deposit,
            Provider::Stripe,
            TransactionStatus::Pending,
            Some("pi_wh_1"),
            None,
        ))
        .await;

    let body = r#"{"id":"evt_1","type":"payment_intent.succeeded","data":{"object":{"id":"pi_wh_1","latest_charge":"ch_wh_1"}}}"#;
    let signature = sign_stripe(STRIPE_SECRET, Utc::now().timestamp(), body.as_bytes()).unwrap();

    let response = app.oneshot(stripe_webhook(body, Some(signature))).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let tx = repository
        .find_by_transaction_id("tx-wh-1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(tx.status, TransactionStatus::Succeeded);
    assert_eq!(tx.charge_id.as_deref(), Some("ch_wh_1"));
}

#[tokio::test]
async fn test_stripe_webhook_with_bad_signature_is_unauthorized() {
    let TestApp {
        app, repository, ..
    } = test_app();
    repository
        .seed(stored(
            "tx-wh-2",
            TransactionType::Deposit,
            Provider::Stripe,
            TransactionStatus::Pending,
            Some("pi_wh_2"),
            None,
        ))
        .await;

    let body = r#"{"id":"evt_2","type":"payment_intent.succeeded","data":{"object":{"id":"pi_wh_2"}}}"#;
    let forged = sign_stripe("whsec_wrong", Utc::now().timestamp(), body.as_bytes()).unwrap();

    let forged_response = app
        .clone()
        .oneshot(stripe_webhook(body, Some(forged)))
        .await
        .unwrap();
    let unsigned_response = app.oneshot(stripe_webhook(body, None)).await.unwrap();

    assert_eq!(forged_response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(unsigned_response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(repository.writes(), 0);
    let tx = repository
        .find_by_transaction_id("tx-wh-2")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(tx.status, TransactionStatus::Pending);
}

#[tokio::test]
async fn test_webhook_for_unknown_transaction_is_unprocessable() {
    let TestApp { app, .. } = test_app();

    let body = r#"{"id":"evt_3","type":"payment_intent.succeeded","data":{"object":{"id":"pi_ghost"}}}"#;
    let signature = sign_stripe(STRIPE_SECRET, Utc::now().timestamp(), body.as_bytes()).unwrap();

    let response = app.oneshot(stripe_webhook(body, Some(signature))).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_authorize_webhook_with_valid_signature() {
    let TestApp {
        app, repository, ..
    } = test_app();
    repository
        .seed(stored(
            "tx-wh-4",
            TransactionType::Deposit,
            Provider::AuthorizeNet,
            TransactionStatus::Pending,
            Some("60012345678"),
            None,
        ))
        .await;

    let body = r#"{"notificationId":"n-1","eventType":"net.authorize.payment.authcapture.created","payload":{"id":"60012345678"}}"#;
    let signature = sign_authorize_net(ANET_KEY, body.as_bytes()).unwrap();

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/authorize-webhook")
                .header(AUTHORIZE_NET_SIGNATURE_HEADER, signature)
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let tx = repository
        .find_by_transaction_id("tx-wh-4")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(tx.status, TransactionStatus::Succeeded);
}

#[tokio::test]
async fn test_oversized_webhook_is_rejected() {
    let TestApp {
        app, repository, ..
    } = test_app();

    let body = "x".repeat(65 * 1024);
    let signature = sign_stripe(STRIPE_SECRET, Utc::now().timestamp(), body.as_bytes()).unwrap();

    let response = app.oneshot(stripe_webhook(&body, Some(signature))).await.unwrap();

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(repository.writes(), 0);
}
