//! Transaction domain entity.
//! Framework-agnostic record of one attempted deposit or withdrawal and its lifecycle.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

use super::Provider;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind}: {value}")]
pub struct ParseVariantError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseVariantError {
    pub(crate) fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    Deposit,
    Withdrawal,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Deposit => "deposit",
            TransactionType::Withdrawal => "withdrawal",
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionType {
    type Err = ParseVariantError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deposit" => Ok(TransactionType::Deposit),
            "withdrawal" => Ok(TransactionType::Withdrawal),
            other => Err(ParseVariantError::new("transaction type", other)),
        }
    }
}

/// Lifecycle status. `Pending` is the only initial state; `Refunded` is reachable
/// only from `Succeeded`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Succeeded,
    Failed,
    Refunded,
}

/// Outcome of checking a requested status change against the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The change is legal and has been applied.
    Applied,
    /// The transaction is already in the requested status.
    AlreadyApplied,
    /// The change is illegal; the transaction was left untouched.
    Rejected,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Succeeded => "succeeded",
            TransactionStatus::Failed => "failed",
            TransactionStatus::Refunded => "refunded",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransactionStatus::Pending)
    }

    /// Whether moving from `self` to `next` is a legal forward step.
    pub fn can_transition_to(&self, next: TransactionStatus) -> bool {
        use TransactionStatus::*;
        matches!(
            (self, next),
            (Pending, Succeeded) | (Pending, Failed) | (Succeeded, Refunded)
        )
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionStatus {
    type Err = ParseVariantError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TransactionStatus::Pending),
            "succeeded" => Ok(TransactionStatus::Succeeded),
            "failed" => Ok(TransactionStatus::Failed),
            "refunded" => Ok(TransactionStatus::Refunded),
            other => Err(ParseVariantError::new("transaction status", other)),
        }
    }
}

/// Domain entity representing a transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: Uuid,
    /// Caller-supplied idempotency key, unique across all transactions.
    pub transaction_id: String,
    pub transaction_type: TransactionType,
    pub gateway_name: Provider,
    pub amount: BigDecimal,
    pub currency: String,
    pub status: TransactionStatus,
    pub payment_id: Option<String>,
    pub charge_id: Option<String>,
    pub request_payload: Option<String>,
    pub response_payload: Option<String>,
    pub callback_payload: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    /// Provisional record written before any gateway call is made.
    pub fn pending(
        transaction_id: impl Into<String>,
        transaction_type: TransactionType,
        gateway_name: Provider,
        amount: BigDecimal,
        currency: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            transaction_id: transaction_id.into(),
            transaction_type,
            gateway_name,
            amount,
            currency: currency.into(),
            status: TransactionStatus::Pending,
            payment_id: None,
            charge_id: None,
            request_payload: None,
            response_payload: None,
            callback_payload: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Moves the status forward if the state machine allows it.
    pub fn apply_status(&mut self, next: TransactionStatus) -> Transition {
        if self.status == next {
            return Transition::AlreadyApplied;
        }
        if !self.status.can_transition_to(next) {
            return Transition::Rejected;
        }
        self.status = next;
        Transition::Applied
    }

    /// Records the gateway payment id. Empty ids never replace a known one.
    pub fn assign_payment_id(&mut self, payment_id: &str) {
        if !payment_id.trim().is_empty() {
            self.payment_id = Some(payment_id.to_string());
        }
    }

    pub fn assign_charge_id(&mut self, charge_id: &str) {
        if !charge_id.trim().is_empty() {
            self.charge_id = Some(charge_id.to_string());
        }
    }

    /// Identifier the gateway should use when refunding this transaction.
    pub fn refund_reference(&self) -> Option<&str> {
        self.charge_id.as_deref().or(self.payment_id.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending() -> Transaction {
        Transaction::pending(
            "tx-1",
            TransactionType::Deposit,
            Provider::Stripe,
            BigDecimal::from(1000),
            "USD",
        )
    }

    const ALL: [TransactionStatus; 4] = [
        TransactionStatus::Pending,
        TransactionStatus::Succeeded,
        TransactionStatus::Failed,
        TransactionStatus::Refunded,
    ];

    #[test]
    fn test_only_forward_transitions_are_legal() {
        let legal: Vec<(TransactionStatus, TransactionStatus)> = ALL
            .iter()
            .flat_map(|from| ALL.iter().map(move |to| (*from, *to)))
            .filter(|(from, to)| from.can_transition_to(*to))
            .collect();

        assert_eq!(
            legal,
            vec![
                (TransactionStatus::Pending, TransactionStatus::Succeeded),
                (TransactionStatus::Pending, TransactionStatus::Failed),
                (TransactionStatus::Succeeded, TransactionStatus::Refunded),
            ]
        );
    }

    #[test]
    fn test_terminal_states_never_regress() {
        for event_sequence in [
            vec![TransactionStatus::Failed, TransactionStatus::Succeeded],
            vec![TransactionStatus::Succeeded, TransactionStatus::Pending],
            vec![
                TransactionStatus::Succeeded,
                TransactionStatus::Refunded,
                TransactionStatus::Succeeded,
                TransactionStatus::Failed,
            ],
        ] {
            let mut tx = pending();
            let mut seen_terminal: Option<TransactionStatus> = None;
            for next in event_sequence {
                let before = tx.status;
                let outcome = tx.apply_status(next);
                if outcome == Transition::Rejected {
                    assert_eq!(tx.status, before);
                }
                if let Some(terminal) = seen_terminal {
                    assert!(
                        tx.status == terminal
                            || (terminal == TransactionStatus::Succeeded
                                && tx.status == TransactionStatus::Refunded)
                    );
                }
                if tx.status.is_terminal() {
                    seen_terminal = Some(tx.status);
                }
            }
        }
    }

    #[test]
    fn test_reapplying_same_status_is_reported() {
        let mut tx = pending();
        assert_eq!(tx.apply_status(TransactionStatus::Succeeded), Transition::Applied);
        assert_eq!(
            tx.apply_status(TransactionStatus::Succeeded),
            Transition::AlreadyApplied
        );
        assert_eq!(tx.apply_status(TransactionStatus::Refunded), Transition::Applied);
        assert_eq!(tx.apply_status(TransactionStatus::Failed), Transition::Rejected);
        assert_eq!(tx.status, TransactionStatus::Refunded);
    }

    #[test]
    fn test_payment_id_is_never_blanked() {
        let mut tx = pending();
        tx.assign_payment_id("pi_123");
        tx.assign_payment_id("");
        tx.assign_payment_id("   ");
        assert_eq!(tx.payment_id.as_deref(), Some("pi_123"));
    }

    #[test]
    fn test_refund_reference_prefers_charge_id() {
        let mut tx = pending();
        assert_eq!(tx.refund_reference(), None);
        tx.assign_payment_id("pi_123");
        assert_eq!(tx.refund_reference(), Some("pi_123"));
        tx.assign_charge_id("ch_456");
        assert_eq!(tx.refund_reference(), Some("ch_456"));
    }

    #[test]
    fn test_status_round_trips_through_text() {
        for status in ALL {
            assert_eq!(status.as_str().parse::<TransactionStatus>(), Ok(status));
        }
        assert!("completed".parse::<TransactionStatus>().is_err());
        assert_eq!("withdrawal".parse(), Ok(TransactionType::Withdrawal));
    }
}
