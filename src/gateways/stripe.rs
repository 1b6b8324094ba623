//! Stripe gateway: form-encoded REST calls authenticated with the secret key.

use async_trait::async_trait;
use failsafe::futures::CircuitBreaker as FuturesCircuitBreaker;
use failsafe::Error as FailsafeError;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;

use super::events::{EventAction, EventParseError, WebhookEvent};
use super::{
    http_client, new_breaker, Breaker, DepositParams, GatewayError, GatewayFailure, GatewayResult,
    PaymentGateway, WithdrawParams,
};
use crate::domain::{to_minor_units, Provider, Transaction, TransactionStatus};
use crate::utils::sanitize::sanitize_json;

#[derive(Debug, Deserialize)]
struct PaymentIntent {
    id: String,
    status: String,
    #[serde(default)]
    latest_charge: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Payout {
    id: String,
    status: String,
}

#[derive(Debug, Deserialize)]
struct Refund {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: StripeApiError,
}

#[derive(Debug, Deserialize)]
struct StripeApiError {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    charge: Option<String>,
    /// Expanded payment intent object on card errors.
    #[serde(default)]
    payment_intent: Option<serde_json::Value>,
}

#[derive(Clone)]
pub struct StripeGateway {
    client: Client,
    base_url: String,
    secret_key: String,
    circuit_breaker: Breaker,
}

impl StripeGateway {
    pub fn new(base_url: String, secret_key: String, timeout: Duration) -> Self {
        Self {
            client: http_client(timeout),
            base_url,
            secret_key,
            circuit_breaker: new_breaker(5, Duration::from_secs(30)),
        }
    }

    /// Sends one form POST. Only transport failures and 5xx responses count against the
    /// breaker; 4xx bodies are returned for classification.
    async fn post_form(
        &self,
        path: &str,
        idempotency_key: &str,
        form: &[(&'static str, String)],
    ) -> Result<(StatusCode, String), GatewayError> {
        let url = format!("{}{}", self.base_url.trim_end_matches('/'), path);
        let request = self
            .client
            .post(&url)
            .bearer_auth(&self.secret_key)
            .header("Idempotency-Key", idempotency_key)
            .form(form);

        let result = self
            .circuit_breaker
            .call(async move {
                let response = request.send().await.map_err(GatewayError::from_transport)?;
                let status = response.status();
                let body = response.text().await.map_err(GatewayError::from_transport)?;
                if status.is_server_error() {
                    return Err(GatewayError::Unavailable(format!("stripe returned {}", status)));
                }
                Ok((status, body))
            })
            .await;

        match result {
            Ok(pair) => Ok(pair),
            Err(FailsafeError::Rejected) => Err(GatewayError::CircuitOpen(Provider::Stripe)),
            Err(FailsafeError::Inner(e)) => Err(e),
        }
    }

    /// Turns a non-2xx response into an error. Ids carried by a card error are kept on the
    /// transaction so later webhooks can still find it.
    fn classify_error(status: StatusCode, body: &str, tx: &mut Transaction) -> GatewayError {
        let envelope = serde_json::from_str::<ErrorEnvelope>(body).ok();
        let message = envelope
            .as_ref()
            .and_then(|e| e.error.message.clone())
            .unwrap_or_else(|| format!("stripe returned {}", status));
        let code = envelope.as_ref().and_then(|e| e.error.code.clone());

        if let Some(envelope) = &envelope {
            if let Some(charge) = &envelope.error.charge {
                tx.assign_charge_id(charge);
            }
            if let Some(intent_id) = envelope
                .error
                .payment_intent
                .as_ref()
                .and_then(|pi| pi.get("id"))
                .and_then(|id| id.as_str())
            {
                tx.assign_payment_id(intent_id);
            }
        }

        match (status, code.as_deref()) {
            (StatusCode::TOO_MANY_REQUESTS, _) | (_, Some("rate_limit")) => {
                GatewayError::RateLimited(message)
            }
            (_, Some("lock_timeout")) => GatewayError::Contention(message),
            (StatusCode::UNAUTHORIZED, _) => GatewayError::Authentication,
            _ if envelope.as_ref().map(|e| e.error.kind.as_str()) == Some("card_error") => {
                GatewayError::Declined(message)
            }
            _ => GatewayError::InvalidRequest(message),
        }
    }

    fn masked_payload(form: &[(&'static str, String)]) -> String {
        let object: serde_json::Map<String, serde_json::Value> = form
            .iter()
            .map(|(k, v)| (k.to_string(), serde_json::Value::String(v.clone())))
            .collect();
        sanitize_json(&serde_json::Value::Object(object)).to_string()
    }

    async fn execute<T, F>(
        &self,
        path: &str,
        form: Vec<(&'static str, String)>,
        mut tx: Transaction,
        apply: F,
    ) -> GatewayResult
    where
        T: for<'de> Deserialize<'de>,
        F: FnOnce(T, &mut Transaction),
    {
        tx.request_payload = Some(Self::masked_payload(&form));

        let (status, body) = match self.post_form(path, &tx.transaction_id, &form).await {
            Ok(pair) => pair,
            Err(e) => return Err(GatewayFailure::new(tx, e)),
        };
        tx.response_payload = Some(body.clone());

        if !status.is_success() {
            let error = Self::classify_error(status, &body, &mut tx);
            if matches!(error, GatewayError::Declined(_)) {
                tx.apply_status(TransactionStatus::Failed);
            }
            return Err(GatewayFailure::new(tx, error));
        }

        match serde_json::from_str::<T>(&body) {
            Ok(parsed) => {
                apply(parsed, &mut tx);
                Ok(tx)
            }
            Err(e) => Err(GatewayFailure::new(
                tx,
                GatewayError::MalformedResponse(e.to_string()),
            )),
        }
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    fn provider(&self) -> Provider {
        Provider::Stripe
    }

    async fn charge(&self, params: &DepositParams, tx: Transaction) -> GatewayResult {
        let token = match params.token.as_deref().filter(|t| !t.trim().is_empty()) {
            Some(token) => token.to_string(),
            None => {
                return Err(GatewayFailure::new(
                    tx,
                    GatewayError::InvalidRequest("payment method token is required".to_string()),
                ))
            }
        };
        let amount = match to_minor_units(&params.amount, &params.currency) {
            Ok(amount) => amount,
            Err(e) => return Err(GatewayFailure::new(tx, GatewayError::InvalidRequest(e.to_string()))),
        };

        let form = vec![
            ("amount", amount.to_string()),
            ("currency", params.currency.to_ascii_lowercase()),
            ("confirm", "true".to_string()),
            ("payment_method", token),
        ];

        self.execute("/v1/payment_intents", form, tx, |intent: PaymentIntent, tx| {
            tx.assign_payment_id(&intent.id);
            if let Some(charge) = intent.latest_charge.as_deref() {
                tx.assign_charge_id(charge);
            }
            match intent.status.as_str() {
                "succeeded" => {
                    tx.apply_status(TransactionStatus::Succeeded);
                }
                "requires_payment_method" | "canceled" => {
                    tx.apply_status(TransactionStatus::Failed);
                }
                other => tracing::info!(
                    transaction_id = %tx.transaction_id,
                    intent_status = other,
                    "payment intent not final, awaiting webhook"
                ),
            }
        })
        .await
    }

    async fn payout(&self, params: &WithdrawParams, tx: Transaction) -> GatewayResult {
        let mut form = vec![
            ("amount", params.amount.to_string()),
            ("currency", params.currency.to_ascii_lowercase()),
        ];
        if let Some(destination) = params.destination.as_deref().filter(|d| !d.trim().is_empty()) {
            form.push(("destination", destination.to_string()));
        }

        self.execute("/v1/payouts", form, tx, |payout: Payout, tx| {
            tx.assign_payment_id(&payout.id);
            match payout.status.as_str() {
                "paid" => {
                    tx.apply_status(TransactionStatus::Succeeded);
                }
                "failed" | "canceled" => {
                    tx.apply_status(TransactionStatus::Failed);
                }
                _ => {}
            }
        })
        .await
    }

    async fn refund(&self, tx: &Transaction) -> Result<String, GatewayError> {
        let form = match (tx.charge_id.as_deref(), tx.payment_id.as_deref()) {
            (Some(charge), _) => vec![("charge", charge.to_string())],
            (None, Some(intent)) => vec![("payment_intent", intent.to_string())],
            (None, None) => {
                return Err(GatewayError::InvalidRequest(format!(
                    "transaction {} has no charge to refund",
                    tx.transaction_id
                )))
            }
        };

        let idempotency_key = format!("refund-{}", tx.transaction_id);
        let (status, body) = self.post_form("/v1/refunds", &idempotency_key, &form).await?;
        if !status.is_success() {
            let mut scratch = tx.clone();
            return Err(Self::classify_error(status, &body, &mut scratch));
        }

        serde_json::from_str::<Refund>(&body)
            .map(|refund| refund.id)
            .map_err(|e| GatewayError::MalformedResponse(e.to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct StripeEvent {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    data: StripeEventData,
}

#[derive(Debug, Deserialize)]
struct StripeEventData {
    object: serde_json::Value,
}

fn string_field(object: &serde_json::Value, key: &str) -> Option<String> {
    object
        .get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Parses a Stripe event body into the gateway-neutral event shape.
pub fn parse_event(body: &[u8]) -> Result<WebhookEvent, EventParseError> {
    let raw = std::str::from_utf8(body)
        .map_err(|_| EventParseError::Malformed("body is not UTF-8".to_string()))?;
    let event: StripeEvent =
        serde_json::from_str(raw).map_err(|e| EventParseError::Malformed(e.to_string()))?;
    let object = &event.data.object;
    let object_id = || {
        string_field(object, "id")
            .ok_or_else(|| EventParseError::MissingField("data.object.id"))
    };

    let action = match event.event_type.as_str() {
        "payment_intent.succeeded" => EventAction::PaymentSucceeded {
            payment_id: object_id()?,
            charge_id: string_field(object, "latest_charge"),
        },
        "payment_intent.payment_failed" => EventAction::PaymentFailed {
            payment_id: object_id()?,
        },
        "charge.refunded" => EventAction::ChargeRefunded {
            charge_id: object_id()?,
            payment_id: string_field(object, "payment_intent"),
        },
        "payout.paid" => EventAction::PayoutPaid {
            payment_id: object_id()?,
        },
        "payout.failed" => EventAction::PayoutFailed {
            payment_id: object_id()?,
        },
        _ => EventAction::Ignored,
    };

    Ok(WebhookEvent {
        provider: Provider::Stripe,
        event_id: event.id,
        event_type: event.event_type,
        action,
        raw: raw.to_string(),
    })
}
