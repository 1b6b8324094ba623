//! Uniform charge/payout/refund capability over the external payment gateways.

pub mod authorize_net;
pub mod events;
pub mod retry;
pub mod stripe;

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use failsafe::{backoff, failure_policy, Config as BreakerConfig, StateMachine};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::config::Config;
use crate::domain::{Transaction, TransactionStatus};
pub use crate::domain::Provider;

pub use authorize_net::AuthorizeNetGateway;
pub use events::{EventAction, EventParseError, LookupKey, WebhookEvent};
pub use retry::{RetryPolicy, Retryable};
pub use stripe::StripeGateway;

/// Card data for gateways that take raw card fields. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct CardDetails {
    pub number: String,
    pub expiration_date: String,
    pub cvv: String,
}

impl fmt::Debug for CardDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CardDetails")
            .field("number", &"****")
            .field("expiration_date", &"****")
            .field("cvv", &"****")
            .finish()
    }
}

/// Deposit input in major units, e.g. `12.50 USD`.
#[derive(Debug, Clone)]
pub struct DepositParams {
    pub amount: BigDecimal,
    pub currency: String,
    pub token: Option<String>,
    pub card: Option<CardDetails>,
}

/// Withdrawal input in minor units, e.g. `1250` cents.
#[derive(Debug, Clone)]
pub struct WithdrawParams {
    pub amount: i64,
    pub currency: String,
    pub destination: Option<String>,
    pub card: Option<CardDetails>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    #[error("gateway timed out: {0}")]
    Timeout(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("rate limited by gateway: {0}")]
    RateLimited(String),

    #[error("gateway reported lock contention: {0}")]
    Contention(String),

    #[error("gateway unavailable: {0}")]
    Unavailable(String),

    #[error("circuit breaker open for {0}")]
    CircuitOpen(Provider),

    #[error("payment declined: {0}")]
    Declined(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("gateway rejected credentials")]
    Authentication,

    #[error("malformed gateway response: {0}")]
    MalformedResponse(String),
}

impl GatewayError {
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            GatewayError::Timeout(_)
                | GatewayError::Network(_)
                | GatewayError::RateLimited(_)
                | GatewayError::Contention(_)
                | GatewayError::Unavailable(_)
        )
    }

    /// Caused by the request itself rather than by the gateway or our setup.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            GatewayError::Declined(_) | GatewayError::InvalidRequest(_)
        )
    }

    /// The gateway may have acted on the request even though we saw a failure.
    /// Such transactions stay pending until a webhook settles them.
    pub fn leaves_outcome_unknown(&self) -> bool {
        matches!(
            self,
            GatewayError::Timeout(_)
                | GatewayError::Network(_)
                | GatewayError::Unavailable(_)
                | GatewayError::MalformedResponse(_)
        )
    }

    pub(crate) fn from_transport(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            GatewayError::Timeout(err.to_string())
        } else {
            GatewayError::Network(err.to_string())
        }
    }
}

impl Retryable for GatewayError {
    fn is_transient(&self) -> bool {
        GatewayError::is_transient(self)
    }
}

/// A failed gateway call together with the transaction as the gateway left it,
/// so the attempt can still be recorded.
#[derive(Debug)]
pub struct GatewayFailure {
    pub transaction: Transaction,
    pub error: GatewayError,
}

impl GatewayFailure {
    pub fn new(transaction: Transaction, error: GatewayError) -> Self {
        Self { transaction, error }
    }

    /// Marks the transaction failed when the gateway definitely did not move money.
    pub fn settle(mut self) -> Self {
        if !self.error.leaves_outcome_unknown() {
            self.transaction.apply_status(TransactionStatus::Failed);
        }
        self
    }
}

impl fmt::Display for GatewayFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)
    }
}

impl Retryable for GatewayFailure {
    fn is_transient(&self) -> bool {
        self.error.is_transient()
    }
}

pub type GatewayResult = Result<Transaction, GatewayFailure>;

/// One external payment gateway.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn provider(&self) -> Provider;

    /// Charges the customer. On success the transaction carries the gateway payment id,
    /// masked request payload and raw response payload.
    async fn charge(&self, params: &DepositParams, tx: Transaction) -> GatewayResult;

    /// Sends money out.
    async fn payout(&self, params: &WithdrawParams, tx: Transaction) -> GatewayResult;

    /// Reverses a completed charge. Returns the gateway's refund reference.
    async fn refund(&self, tx: &Transaction) -> Result<String, GatewayError>;
}

pub(crate) type Breaker =
    StateMachine<failure_policy::ConsecutiveFailures<backoff::EqualJittered>, ()>;

pub(crate) fn new_breaker(failure_threshold: u32, reset_timeout: Duration) -> Breaker {
    let backoff = backoff::equal_jittered(reset_timeout, reset_timeout * 2);
    let policy = failure_policy::consecutive_failures(failure_threshold, backoff);
    BreakerConfig::new().failure_policy(policy).build()
}

pub(crate) fn http_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_default()
}

/// Gateways available to this process, keyed by provider.
#[derive(Clone, Default)]
pub struct GatewayRegistry {
    gateways: HashMap<Provider, Arc<dyn PaymentGateway>>,
}

impl GatewayRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, gateway: Arc<dyn PaymentGateway>) {
        self.gateways.insert(gateway.provider(), gateway);
    }

    pub fn with(mut self, gateway: Arc<dyn PaymentGateway>) -> Self {
        self.register(gateway);
        self
    }

    pub fn get(&self, provider: Provider) -> Option<Arc<dyn PaymentGateway>> {
        self.gateways.get(&provider).cloned()
    }

    pub fn providers(&self) -> Vec<Provider> {
        Provider::ALL
            .into_iter()
            .filter(|p| self.gateways.contains_key(p))
            .collect()
    }

    /// Registers every gateway whose credentials are configured.
    pub fn from_config(config: &Config) -> Self {
        let mut registry = Self::new();
        let timeout = Duration::from_secs(config.gateway_timeout_secs);

        match &config.stripe_secret_key {
            Some(secret_key) => registry.register(Arc::new(StripeGateway::new(
                config.stripe_api_base.clone(),
                secret_key.clone(),
                timeout,
            ))),
            None => tracing::warn!("STRIPE_SECRET_KEY not set, stripe gateway disabled"),
        }

        match (&config.authorize_login_id, &config.authorize_transaction_key) {
            (Some(login_id), Some(transaction_key)) => {
                registry.register(Arc::new(AuthorizeNetGateway::new(
                    config.authorize_endpoint.clone(),
                    login_id.clone(),
                    transaction_key.clone(),
                    timeout,
                )))
            }
            _ => tracing::warn!("Authorize.Net credentials not set, authorize gateway disabled"),
        }

        registry
    }
}
