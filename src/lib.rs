pub mod adapters;
pub mod cli;
pub mod config;
pub mod db;
pub mod domain;
pub mod error;
pub mod gateways;
pub mod handlers;
pub mod middleware;
pub mod ports;
pub mod services;
pub mod startup;
pub mod utils;
pub mod validation;

use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};

use crate::gateways::{GatewayRegistry, RetryPolicy};
use crate::handlers::webhook::WEBHOOK_BODY_LIMIT;
use crate::ports::TransactionRepository;
use crate::services::{PaymentOrchestrator, SignatureVerifier, WebhookReconciler};

#[derive(Clone)]
pub struct AppState {
    pub repository: Arc<dyn TransactionRepository>,
    pub gateways: GatewayRegistry,
    pub orchestrator: PaymentOrchestrator,
    pub reconciler: WebhookReconciler,
    pub verifier: Arc<SignatureVerifier>,
}

impl AppState {
    /// Wires the orchestrator and reconciler over one repository and gateway set.
    pub fn new(
        repository: Arc<dyn TransactionRepository>,
        gateways: GatewayRegistry,
        retry: RetryPolicy,
        verifier: SignatureVerifier,
    ) -> Self {
        Self {
            orchestrator: PaymentOrchestrator::new(
                repository.clone(),
                gateways.clone(),
                retry.clone(),
            ),
            reconciler: WebhookReconciler::new(repository.clone(), gateways.clone(), retry),
            repository,
            gateways,
            verifier: Arc::new(verifier),
        }
    }
}

pub fn create_app(state: AppState) -> Router {
    let webhooks: Router<AppState> = Router::new()
        .route(
            "/api/v1/stripe-webhook",
            post(handlers::webhook::stripe_webhook),
        )
        .route(
            "/api/v1/authorize-webhook",
            post(handlers::webhook::authorize_webhook),
        )
        .layer(DefaultBodyLimit::max(WEBHOOK_BODY_LIMIT));

    Router::new()
        .route("/health", get(handlers::health))
        .route("/api/v1/deposit", post(handlers::payments::deposit))
        .route("/api/v1/withdraw", post(handlers::payments::withdraw))
        .route(
            "/api/v1/transactions/:transaction_id",
            get(handlers::payments::get_transaction),
        )
        .merge(webhooks)
        .layer(axum::middleware::from_fn(
            middleware::request_logger::request_logger_middleware,
        ))
        .with_state(state)
}
