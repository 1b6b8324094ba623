//! Synchronous deposit and withdrawal workflow.
//!
//! Each request is recorded as `pending` before any gateway call, so a charge is never
//! attempted without a durable record. The gateway outcome is then written back in a
//! second, independent write.

use std::sync::Arc;

use crate::domain::{from_minor_units, Provider, Transaction, TransactionType};
use crate::error::AppError;
use crate::gateways::{
    DepositParams, GatewayRegistry, GatewayResult, PaymentGateway, RetryPolicy, WithdrawParams,
};
use crate::ports::{RepositoryError, TransactionRepository};

/// Validated deposit request.
#[derive(Debug, Clone)]
pub struct DepositCommand {
    pub transaction_id: String,
    pub provider: Provider,
    pub params: DepositParams,
}

/// Validated withdrawal request.
#[derive(Debug, Clone)]
pub struct WithdrawCommand {
    pub transaction_id: String,
    pub provider: Provider,
    pub params: WithdrawParams,
}

#[derive(Clone)]
pub struct PaymentOrchestrator {
    repository: Arc<dyn TransactionRepository>,
    gateways: GatewayRegistry,
    retry: RetryPolicy,
}

impl PaymentOrchestrator {
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

    pub async fn deposit(&self, cmd: DepositCommand) -> Result<Transaction, AppError> {
        let gateway = self.gateway_for(cmd.provider)?;
        let pending = Transaction::pending(
            cmd.transaction_id,
            TransactionType::Deposit,
            cmd.provider,
            cmd.params.amount.clone(),
            cmd.params.currency.clone(),
        );
        let tx = self.record_pending(pending).await?;

        tracing::info!(
            transaction_id = %tx.transaction_id,
            provider = %cmd.provider,
            amount = %tx.amount,
            currency = %tx.currency,
            "dispatching charge"
        );
        let outcome = self
            .retry
            .run("charge", |_| gateway.charge(&cmd.params, tx.clone()))
            .await;

        self.record_outcome(outcome).await
    }

    pub async fn withdraw(&self, cmd: WithdrawCommand) -> Result<Transaction, AppError> {
        let gateway = self.gateway_for(cmd.provider)?;
        let pending = Transaction::pending(
            cmd.transaction_id,
            TransactionType::Withdrawal,
            cmd.provider,
            from_minor_units(cmd.params.amount, &cmd.params.currency),
            cmd.params.currency.clone(),
        );
        let tx = self.record_pending(pending).await?;

        tracing::info!(
            transaction_id = %tx.transaction_id,
            provider = %cmd.provider,
            amount_minor = cmd.params.amount,
            currency = %tx.currency,
            "dispatching payout"
        );
        let outcome = self
            .retry
            .run("payout", |_| gateway.payout(&cmd.params, tx.clone()))
            .await;

        self.record_outcome(outcome).await
    }

    /// Looks up a transaction by its external id.
    pub async fn find_transaction(&self, transaction_id: &str) -> Result<Transaction, AppError> {
        self.repository
            .find_by_transaction_id(transaction_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Transaction {} not found", transaction_id)))
    }

    fn gateway_for(&self, provider: Provider) -> Result<Arc<dyn PaymentGateway>, AppError> {
        self.gateways
            .get(provider)
            .ok_or(AppError::ProviderNotConfigured(provider))
    }

    /// Idempotency anchor. The pre-check catches sequential retries; the store's unique
    /// constraint catches concurrent ones.
    async fn record_pending(&self, tx: Transaction) -> Result<Transaction, AppError> {
        if self
            .repository
            .find_by_transaction_id(&tx.transaction_id)
            .await?
            .is_some()
        {
            tracing::info!(transaction_id = %tx.transaction_id, "duplicate transaction rejected");
            return Err(AppError::DuplicateTransaction(tx.transaction_id));
        }

        match self.repository.create(&tx).await {
            Ok(created) => Ok(created),
            Err(RepositoryError::Duplicate(_)) => {
                tracing::info!(
                    transaction_id = %tx.transaction_id,
                    "duplicate transaction lost insert race"
                );
                Err(AppError::DuplicateTransaction(tx.transaction_id))
            }
            Err(e) => {
                tracing::error!(
                    transaction_id = %tx.transaction_id,
                    error = %e,
                    "failed to record pending transaction, gateway not called"
                );
                Err(AppError::Database(e))
            }
        }
    }

    /// Persists the transaction as the gateway left it, then surfaces any gateway error.
    async fn record_outcome(&self, outcome: GatewayResult) -> Result<Transaction, AppError> {
        let (tx, gateway_error) = match outcome {
            Ok(tx) => (tx, None),
            Err(failure) => {
                let failure = failure.settle();
                (failure.transaction, Some(failure.error))
            }
        };

        let saved = match self.repository.save(&tx).await {
            Ok(saved) => saved,
            Err(e) => {
                tracing::error!(
                    transaction_id = %tx.transaction_id,
                    status = %tx.status,
                    payment_id = ?tx.payment_id,
                    error = %e,
                    "gateway outcome could not be recorded, needs reconciliation"
                );
                return Err(AppError::Database(e));
            }
        };

        match gateway_error {
            Some(error) => {
                tracing::warn!(
                    transaction_id = %saved.transaction_id,
                    status = %saved.status,
                    error = %error,
                    "gateway call failed"
                );
                Err(AppError::Payment(error))
            }
            None => {
                tracing::info!(
                    transaction_id = %saved.transaction_id,
                    status = %saved.status,
                    payment_id = ?saved.payment_id,
                    "transaction recorded"
                );
                Ok(saved)
            }
        }
    }
}
