use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
};

use crate::domain::Provider;
use crate::error::AppError;
use crate::gateways::events::parse_event;
use crate::services::SignatureVerifier;
use crate::AppState;

/// Largest webhook body accepted.
pub const WEBHOOK_BODY_LIMIT: usize = 64 * 1024;

pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, AppError> {
    receive(&state, Provider::Stripe, &headers, &body).await
}

pub async fn authorize_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, AppError> {
    receive(&state, Provider::AuthorizeNet, &headers, &body).await
}

/// Authenticates, parses and reconciles one delivery. Nothing is read from the body
/// until the signature checks out.
async fn receive(
    state: &AppState,
    provider: Provider,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<StatusCode, AppError> {
    let signature = headers
        .get(SignatureVerifier::header_name(provider))
        .and_then(|value| value.to_str().ok());

    if let Err(e) = state.verifier.verify(provider, signature, body) {
        tracing::warn!(provider = %provider, error = %e, "webhook signature rejected");
        return Err(AppError::Unauthorized(e.to_string()));
    }

    let event = parse_event(provider, body)?;
    tracing::info!(
        provider = %provider,
        event_id = %event.event_id,
        event_type = %event.event_type,
        "webhook received"
    );

    state.reconciler.handle(&event).await?;
    Ok(StatusCode::OK)
}
