//! Gateway-neutral webhook events.

use thiserror::Error;

use crate::domain::{Provider, TransactionStatus, TransactionType};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EventParseError {
    #[error("malformed event: {0}")]
    Malformed(String),
    #[error("event is missing {0}")]
    MissingField(&'static str),
}

/// What an inbound event asks the ledger to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventAction {
    PaymentSucceeded {
        payment_id: String,
        charge_id: Option<String>,
    },
    PaymentFailed {
        payment_id: String,
    },
    ChargeRefunded {
        charge_id: String,
        payment_id: Option<String>,
    },
    PayoutPaid {
        payment_id: String,
    },
    PayoutFailed {
        payment_id: String,
    },
    /// Event type this service does not act on.
    Ignored,
}

/// Identifier used to find the transaction an event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupKey<'a> {
    PaymentId(&'a str),
    ChargeId(&'a str),
}

impl EventAction {
    pub fn target_status(&self) -> Option<TransactionStatus> {
        match self {
            EventAction::PaymentSucceeded { .. } | EventAction::PayoutPaid { .. } => {
                Some(TransactionStatus::Succeeded)
            }
            EventAction::PaymentFailed { .. } | EventAction::PayoutFailed { .. } => {
                Some(TransactionStatus::Failed)
            }
            EventAction::ChargeRefunded { .. } => Some(TransactionStatus::Refunded),
            EventAction::Ignored => None,
        }
    }

    /// Kind of transaction the event can apply to.
    pub fn applies_to(&self) -> Option<TransactionType> {
        match self {
            EventAction::PaymentSucceeded { .. }
            | EventAction::PaymentFailed { .. }
            | EventAction::ChargeRefunded { .. } => Some(TransactionType::Deposit),
            EventAction::PayoutPaid { .. } | EventAction::PayoutFailed { .. } => {
                Some(TransactionType::Withdrawal)
            }
            EventAction::Ignored => None,
        }
    }

    /// Keys to try, most specific first.
    pub fn lookup_keys(&self) -> Vec<LookupKey<'_>> {
        match self {
            EventAction::PaymentSucceeded { payment_id, .. }
            | EventAction::PaymentFailed { payment_id }
            | EventAction::PayoutPaid { payment_id }
            | EventAction::PayoutFailed { payment_id } => vec![LookupKey::PaymentId(payment_id)],
            EventAction::ChargeRefunded {
                charge_id,
                payment_id,
            } => {
                let mut keys = vec![LookupKey::ChargeId(charge_id)];
                if let Some(payment_id) = payment_id {
                    keys.push(LookupKey::PaymentId(payment_id));
                }
                keys
            }
            EventAction::Ignored => Vec::new(),
        }
    }

    /// Charge id the event reveals, if any.
    pub fn charge_id(&self) -> Option<&str> {
        match self {
            EventAction::PaymentSucceeded { charge_id, .. } => charge_id.as_deref(),
            EventAction::ChargeRefunded { charge_id, .. } => Some(charge_id),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookEvent {
    pub provider: Provider,
    pub event_id: String,
    pub event_type: String,
    pub action: EventAction,
    /// Body exactly as received, stored for audit.
    pub raw: String,
}

/// Parses an authenticated webhook body for `provider`.
pub fn parse_event(provider: Provider, body: &[u8]) -> Result<WebhookEvent, EventParseError> {
    match provider {
        Provider::Stripe => super::stripe::parse_event(body),
        Provider::AuthorizeNet => super::authorize_net::parse_event(body),
    }
}
