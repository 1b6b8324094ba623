//! Asynchronous webhook reconciliation.
//!
//! Events arrive already authenticated. Each one locks the affected row, moves it through
//! the state machine and records the raw body. When a successful charge cannot be
//! recorded, the charge is refunded so no untracked money movement remains.

use std::sync::Arc;

use crate::domain::{Transaction, TransactionStatus, TransactionType, Transition};
use crate::error::AppError;
use crate::gateways::{
    EventAction, GatewayError, GatewayRegistry, LookupKey, RetryPolicy, WebhookEvent,
};
use crate::ports::{RepositoryResult, RepositoryScope, TransactionRepository};

/// What handling an event did to the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciliation {
    /// The transaction moved to the given status.
    Applied(TransactionStatus),
    /// The event matched a transaction but could not advance it.
    Unchanged(TransactionStatus),
    /// The event type is not one this service acts on.
    Ignored,
}

#[derive(Clone)]
pub struct WebhookReconciler {
    repository: Arc<dyn TransactionRepository>,
    gateways: GatewayRegistry,
    retry: RetryPolicy,
}

impl WebhookReconciler {
    pub fn new(
        repository: Arc<dyn TransactionRepository>,
        gateways: GatewayRegistry,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            repository,
            gateways,
            retry,
        }
    }

    pub async fn handle(&self, event: &WebhookEvent) -> Result<Reconciliation, AppError> {
        let Some(target) = event.action.target_status() else {
            tracing::info!(
                provider = %event.provider,
                event_id = %event.event_id,
                event_type = %event.event_type,
                "ignoring unhandled event type"
            );
            return Ok(Reconciliation::Ignored);
        };

        let mut scope = self.repository.begin().await?;
        let current = match locate(scope.as_mut(), event).await {
            Ok(Some(tx)) => tx,
            Ok(None) => {
                release(scope).await;
                tracing::error!(
                    provider = %event.provider,
                    event_id = %event.event_id,
                    event_type = %event.event_type,
                    "webhook references unknown transaction"
                );
                return Err(AppError::UnknownTransaction(describe_keys(&event.action)));
            }
            Err(e) => {
                release(scope).await;
                return Err(AppError::Database(e));
            }
        };

        if event.action.applies_to() != Some(current.transaction_type) {
            tracing::warn!(
                transaction_id = %current.transaction_id,
                transaction_type = %current.transaction_type,
                event_type = %event.event_type,
                "event does not apply to this kind of transaction"
            );
            release(scope).await;
            return Ok(Reconciliation::Unchanged(current.status));
        }

        let mut updated = current.clone();
        let transition = updated.apply_status(target);
        if transition == Transition::Rejected {
            tracing::info!(
                transaction_id = %current.transaction_id,
                current = %current.status,
                requested = %target,
                event_id = %event.event_id,
                "event does not advance transaction, nothing to do"
            );
            release(scope).await;
            return Ok(Reconciliation::Unchanged(current.status));
        }
        if let Some(charge_id) = event.action.charge_id() {
            updated.assign_charge_id(charge_id);
        }
        updated.callback_payload = Some(event.raw.clone());

        if transition == Transition::AlreadyApplied {
            // Redelivery or confirmation of a synchronous outcome: keep the audit trail only.
            return match persist(scope, &updated).await {
                Ok(saved) => {
                    tracing::info!(
                        transaction_id = %saved.transaction_id,
                        status = %saved.status,
                        event_id = %event.event_id,
                        "event confirms current status, callback recorded"
                    );
                    Ok(Reconciliation::Unchanged(saved.status))
                }
                Err(e) => {
                    tracing::error!(
                        transaction_id = %updated.transaction_id,
                        error = %e,
                        "failed to record webhook callback"
                    );
                    Err(AppError::Database(e))
                }
            };
        }

        match persist(scope, &updated).await {
            Ok(saved) => {
                tracing::info!(
                    transaction_id = %saved.transaction_id,
                    from = %current.status,
                    to = %saved.status,
                    event_id = %event.event_id,
                    "transaction reconciled"
                );
                Ok(Reconciliation::Applied(saved.status))
            }
            Err(persist_err) => Err(self.compensate(&updated, persist_err).await),
        }
    }

    /// Runs after a failed write. Only a successful deposit has money to give back.
    async fn compensate(&self, tx: &Transaction, persist: crate::ports::RepositoryError) -> AppError {
        if tx.status != TransactionStatus::Succeeded || tx.transaction_type != TransactionType::Deposit {
            tracing::error!(
                transaction_id = %tx.transaction_id,
                status = %tx.status,
                error = %persist,
                "failed to record webhook outcome"
            );
            return AppError::Database(persist);
        }

        tracing::error!(
            transaction_id = %tx.transaction_id,
            payment_id = ?tx.payment_id,
            charge_id = ?tx.charge_id,
            error = %persist,
            "successful charge could not be recorded, issuing refund"
        );

        let refund = match self.gateways.get(tx.gateway_name) {
            Some(gateway) => self.retry.run("refund", |_| gateway.refund(tx)).await,
            None => Err(GatewayError::InvalidRequest(format!(
                "{} gateway is not configured",
                tx.gateway_name
            ))),
        };

        match refund {
            Ok(refund_id) => {
                tracing::warn!(
                    transaction_id = %tx.transaction_id,
                    refund_id = %refund_id,
                    "compensating refund issued"
                );
                AppError::Compensated { persist, refund_id }
            }
            Err(refund) => {
                tracing::error!(
                    transaction_id = %tx.transaction_id,
                    persist_error = %persist,
                    refund_error = %refund,
                    "compensating refund failed, manual intervention required"
                );
                AppError::CompensationFailed { persist, refund }
            }
        }
    }
}

/// Finds and locks the transaction an event refers to. A row owned by another gateway
/// does not count as a match.
async fn locate(
    scope: &mut dyn RepositoryScope,
    event: &WebhookEvent,
) -> RepositoryResult<Option<Transaction>> {
    for key in event.action.lookup_keys() {
        let found = match key {
            LookupKey::PaymentId(id) => scope.lock_by_payment_id(id).await?,
            LookupKey::ChargeId(id) => scope.lock_by_charge_id(id).await?,
        };
        if let Some(tx) = found.filter(|tx| tx.gateway_name == event.provider) {
            return Ok(Some(tx));
        }
    }
    Ok(None)
}

async fn persist(
    mut scope: Box<dyn RepositoryScope>,
    tx: &Transaction,
) -> RepositoryResult<Transaction> {
    match scope.save(tx).await {
        Ok(saved) => {
            scope.commit().await?;
            Ok(saved)
        }
        Err(e) => {
            release(scope).await;
            Err(e)
        }
    }
}

async fn release(scope: Box<dyn RepositoryScope>) {
    if let Err(e) = scope.rollback().await {
        tracing::warn!(error = %e, "rollback failed");
    }
}

fn describe_keys(action: &EventAction) -> String {
    action
        .lookup_keys()
        .iter()
        .map(|key| match key {
            LookupKey::PaymentId(id) => format!("payment id {}", id),
            LookupKey::ChargeId(id) => format!("charge id {}", id),
        })
        .collect::<Vec<_>>()
        .join(" or ")
}
