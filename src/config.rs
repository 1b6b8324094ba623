use anyhow::Context;
use dotenvy::dotenv;
use serde::Deserialize;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::gateways::authorize_net::SANDBOX_ENDPOINT;
use crate::gateways::RetryPolicy;

pub const DEFAULT_STRIPE_API_BASE: &str = "https://api.stripe.com";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server_port: u16,
    pub database_url: String,
    pub stripe_secret_key: Option<String>,
    pub stripe_endpoint_secret: Option<String>,
    pub stripe_api_base: String,
    pub authorize_login_id: Option<String>,
    pub authorize_transaction_key: Option<String>,
    pub authorize_webhook_signature_key: Option<String>,
    pub authorize_endpoint: String,
    pub retry_max_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub gateway_timeout_secs: u64,
    pub stripe_webhook_tolerance_secs: u64,
    pub log_format: LogFormat,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv().ok(); // Load .env file if present
        Self::from_source(|key| env::var(key).ok())
    }

    /// Builds the config from any key lookup. Blank values count as unset.
    pub fn from_source<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        Ok(Config {
            server_port: parse_or(&get, "SERVER_PORT", 3000)?,
            database_url: get("DATABASE_URL").context("DATABASE_URL must be set")?,
            stripe_secret_key: get("STRIPE_SECRET_KEY"),
            stripe_endpoint_secret: get("STRIPE_ENDPOINT_SECRET"),
            stripe_api_base: get("STRIPE_API_BASE")
                .unwrap_or_else(|| DEFAULT_STRIPE_API_BASE.to_string()),
            authorize_login_id: get("AUTHORIZE_LOGIN_ID"),
            authorize_transaction_key: get("AUTHORIZE_TRANSACTION_KEY"),
            authorize_webhook_signature_key: get("AUTHORIZE_NET_WEBHOOK_SIGNATURE_KEY"),
            authorize_endpoint: get("AUTHORIZE_ENDPOINT")
                .unwrap_or_else(|| SANDBOX_ENDPOINT.to_string()),
            retry_max_attempts: parse_or(&get, "RETRY_MAX_ATTEMPTS", 3)?,
            retry_base_delay_ms: parse_or(&get, "RETRY_BASE_DELAY_MS", 2000)?,
            gateway_timeout_secs: parse_or(&get, "GATEWAY_TIMEOUT_SECS", 30)?,
            stripe_webhook_tolerance_secs: parse_or(&get, "STRIPE_WEBHOOK_TOLERANCE_SECS", 300)?,
            log_format: match get("LOG_FORMAT").as_deref().map(str::to_ascii_lowercase).as_deref() {
                None | Some("text") | Some("pretty") => LogFormat::Text,
                Some("json") => LogFormat::Json,
                Some(other) => anyhow::bail!("LOG_FORMAT must be 'text' or 'json', got '{}'", other),
            },
        })
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry_max_attempts,
            Duration::from_millis(self.retry_base_delay_ms),
        )
    }

    pub fn webhook_tolerance(&self) -> Duration {
        Duration::from_secs(self.stripe_webhook_tolerance_secs)
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .parse()
            .with_context(|| format!("{} has an invalid value '{}'", key, raw)),
        None => Ok(default),
    }
}
