//! Persistence ports used by the orchestrator and reconciler.
//!
//! Lookups return `Ok(None)` for absent rows so callers can tell "missing" from "failed".

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::Transaction;

#[derive(Debug, Error)]
pub enum RepositoryError {
    /// A unique constraint rejected the write. Carries the conflicting key.
    #[error("duplicate key: {0}")]
    Duplicate(String),

    #[error("transaction not found: {0}")]
    NotFound(String),

    #[error("corrupt row: {0}")]
    Corrupt(String),

    #[error("database error: {0}")]
    Database(String),
}

impl From<sqlx::Error> for RepositoryError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.is_unique_violation() {
                let constraint = db_err.constraint().unwrap_or("unique").to_string();
                return RepositoryError::Duplicate(constraint);
            }
        }
        RepositoryError::Database(err.to_string())
    }
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// Durable store of transactions.
#[async_trait]
pub trait TransactionRepository: Send + Sync {
    /// Inserts a new row. Returns `Duplicate` when `transaction_id` already exists.
    async fn create(&self, tx: &Transaction) -> RepositoryResult<Transaction>;

    async fn find_by_transaction_id(&self, transaction_id: &str)
        -> RepositoryResult<Option<Transaction>>;

    async fn find_by_payment_id(&self, payment_id: &str) -> RepositoryResult<Option<Transaction>>;

    async fn find_by_charge_id(&self, charge_id: &str) -> RepositoryResult<Option<Transaction>>;

    /// Writes every mutable column of `tx` and refreshes `updated_at`.
    async fn save(&self, tx: &Transaction) -> RepositoryResult<Transaction>;

    /// Opens a transactional scope holding row locks until commit or rollback.
    async fn begin(&self) -> RepositoryResult<Box<dyn RepositoryScope>>;

    async fn ping(&self) -> RepositoryResult<()>;
}

/// Unit of work over the store. Rows fetched through `lock_*` stay locked against other
/// scopes until the scope ends, which serializes webhook updates per transaction.
#[async_trait]
pub trait RepositoryScope: Send {
    async fn lock_by_payment_id(&mut self, payment_id: &str)
        -> RepositoryResult<Option<Transaction>>;

    async fn lock_by_charge_id(&mut self, charge_id: &str) -> RepositoryResult<Option<Transaction>>;

    async fn save(&mut self, tx: &Transaction) -> RepositoryResult<Transaction>;

    async fn commit(self: Box<Self>) -> RepositoryResult<()>;

    async fn rollback(self: Box<Self>) -> RepositoryResult<()>;
}
