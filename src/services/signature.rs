//! Webhook authenticity checks.
//!
//! Stripe signs `"<timestamp>.<body>"` with HMAC-SHA256 and sends
//! `Stripe-Signature: t=<unix>,v1=<hex>`. Authorize.Net signs the body with HMAC-SHA512
//! and sends `X-ANET-Signature: sha512=<HEX>`. Digests are compared with
//! `Mac::verify_slice`, which is constant-time.

use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::{Sha256, Sha512};
use std::time::Duration;
use thiserror::Error;

use crate::domain::Provider;

type HmacSha256 = Hmac<Sha256>;
type HmacSha512 = Hmac<Sha512>;

pub const STRIPE_SIGNATURE_HEADER: &str = "stripe-signature";
pub const AUTHORIZE_NET_SIGNATURE_HEADER: &str = "x-anet-signature";
pub const DEFAULT_TOLERANCE: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    #[error("webhook secret for {0} is not configured")]
    NotConfigured(Provider),
    #[error("signature header is missing")]
    MissingHeader,
    #[error("signature header is malformed")]
    MalformedHeader,
    #[error("signature timestamp outside tolerance")]
    Expired,
    #[error("signature does not match")]
    Mismatch,
}

/// Verifies a Stripe signature header against `body` at time `now` (unix seconds).
pub fn verify_stripe_at(
    secret: &str,
    header: &str,
    body: &[u8],
    tolerance: Duration,
    now: i64,
) -> Result<(), SignatureError> {
    let mut timestamp: Option<&str> = None;
    let mut signatures = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = Some(value),
            Some(("v1", value)) => signatures.push(value),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(SignatureError::MalformedHeader)?;
    let issued_at: i64 = timestamp
        .parse()
        .map_err(|_| SignatureError::MalformedHeader)?;
    if signatures.is_empty() {
        return Err(SignatureError::MalformedHeader);
    }

    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| SignatureError::Mismatch)?;
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(body);

    let matched = signatures.iter().any(|candidate| {
        hex::decode(candidate)
            .map(|bytes| mac.clone().verify_slice(&bytes).is_ok())
            .unwrap_or(false)
    });
    if !matched {
        return Err(SignatureError::Mismatch);
    }

    // Checked after the digest so a stale but genuine request is reported as such.
    if (now - issued_at).unsigned_abs() > tolerance.as_secs() {
        return Err(SignatureError::Expired);
    }

    Ok(())
}

pub fn verify_stripe(
    secret: &str,
    header: &str,
    body: &[u8],
    tolerance: Duration,
) -> Result<(), SignatureError> {
    verify_stripe_at(secret, header, body, tolerance, Utc::now().timestamp())
}

pub fn verify_authorize_net(key: &str, header: &str, body: &[u8]) -> Result<(), SignatureError> {
    let header = header.trim();
    let (scheme, digest) = header
        .split_once('=')
        .ok_or(SignatureError::MalformedHeader)?;
    if !scheme.eq_ignore_ascii_case("sha512") {
        return Err(SignatureError::MalformedHeader);
    }
    let expected = hex::decode(digest).map_err(|_| SignatureError::MalformedHeader)?;

    let mut mac =
        HmacSha512::new_from_slice(key.as_bytes()).map_err(|_| SignatureError::Mismatch)?;
    mac.update(body);
    mac.verify_slice(&expected)
        .map_err(|_| SignatureError::Mismatch)
}

/// Builds a `Stripe-Signature` header value.
pub fn sign_stripe(secret: &str, timestamp: i64, body: &[u8]) -> Result<String, SignatureError> {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| SignatureError::Mismatch)?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(body);
    Ok(format!(
        "t={},v1={}",
        timestamp,
        hex::encode(mac.finalize().into_bytes())
    ))
}

/// Builds an `X-ANET-Signature` header value.
pub fn sign_authorize_net(key: &str, body: &[u8]) -> Result<String, SignatureError> {
    let mut mac =
        HmacSha512::new_from_slice(key.as_bytes()).map_err(|_| SignatureError::Mismatch)?;
    mac.update(body);
    Ok(format!(
        "sha512={}",
        hex::encode_upper(mac.finalize().into_bytes())
    ))
}

/// Holds the configured webhook secrets. A gateway without a secret rejects every event.
#[derive(Debug, Clone, Default)]
pub struct SignatureVerifier {
    stripe_secret: Option<String>,
    authorize_net_key: Option<String>,
    tolerance: Duration,
}

impl SignatureVerifier {
    pub fn new(
        stripe_secret: Option<String>,
        authorize_net_key: Option<String>,
        tolerance: Duration,
    ) -> Self {
        Self {
            stripe_secret,
            authorize_net_key,
            tolerance,
        }
    }

    pub fn header_name(provider: Provider) -> &'static str {
        match provider {
            Provider::Stripe => STRIPE_SIGNATURE_HEADER,
            Provider::AuthorizeNet => AUTHORIZE_NET_SIGNATURE_HEADER,
        }
    }

    pub fn verify(
        &self,
        provider: Provider,
        header: Option<&str>,
        body: &[u8],
    ) -> Result<(), SignatureError> {
        let header = header
            .filter(|h| !h.trim().is_empty())
            .ok_or(SignatureError::MissingHeader)?;
        match provider {
            Provider::Stripe => {
                let secret = self
                    .stripe_secret
                    .as_deref()
                    .ok_or(SignatureError::NotConfigured(provider))?;
                verify_stripe(secret, header, body, self.tolerance)
            }
            Provider::AuthorizeNet => {
                let key = self
                    .authorize_net_key
                    .as_deref()
                    .ok_or(SignatureError::NotConfigured(provider))?;
                verify_authorize_net(key, header, body)
            }
        }
    }
}
