//! Postgres implementation of TransactionRepository.

use async_trait::async_trait;
use sqlx::{PgExecutor, PgPool, Postgres};
use uuid::Uuid;

use crate::domain::{Provider, Transaction};
use crate::ports::{RepositoryError, RepositoryResult, RepositoryScope, TransactionRepository};

/// Postgres-backed transaction repository.
#[derive(Clone)]
pub struct PostgresTransactionRepository {
    pool: PgPool,
}

impl PostgresTransactionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TransactionRepository for PostgresTransactionRepository {
    async fn create(&self, tx: &Transaction) -> RepositoryResult<Transaction> {
        let row = sqlx::query_as::<_, TransactionRow>(
            r#"
            INSERT INTO transactions (
                id, transaction_id, transaction_type, gateway_name, amount, currency, status,
                payment_id, charge_id, request_payload, response_payload, callback_payload,
                created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, NULLIF($8, ''), NULLIF($9, ''), $10, $11, $12, $13, $14)
            RETURNING *
            "#,
        )
        .bind(tx.id)
        .bind(&tx.transaction_id)
        .bind(tx.transaction_type.as_str())
        .bind(tx.gateway_name.as_str())
        .bind(&tx.amount)
        .bind(&tx.currency)
        .bind(tx.status.as_str())
        .bind(&tx.payment_id)
        .bind(&tx.charge_id)
        .bind(&tx.request_payload)
        .bind(&tx.response_payload)
        .bind(&tx.callback_payload)
        .bind(tx.created_at)
        .bind(tx.updated_at)
        .fetch_one(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        row.into_domain()
    }

    async fn find_by_transaction_id(
        &self,
        transaction_id: &str,
    ) -> RepositoryResult<Option<Transaction>> {
        find_one(&self.pool, "transaction_id", transaction_id, false).await
    }

    async fn find_by_payment_id(&self, payment_id: &str) -> RepositoryResult<Option<Transaction>> {
        find_one(&self.pool, "payment_id", payment_id, false).await
    }

    async fn find_by_charge_id(&self, charge_id: &str) -> RepositoryResult<Option<Transaction>> {
        find_one(&self.pool, "charge_id", charge_id, false).await
    }

    async fn save(&self, tx: &Transaction) -> RepositoryResult<Transaction> {
        update(&self.pool, tx).await
    }

    async fn begin(&self) -> RepositoryResult<Box<dyn RepositoryScope>> {
        let tx = self.pool.begin().await.map_err(RepositoryError::from)?;
        Ok(Box::new(PostgresScope { tx }))
    }

    async fn ping(&self) -> RepositoryResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(RepositoryError::from)?;
        Ok(())
    }
}

/// Scope backed by a database transaction. Locked rows are released on commit/rollback,
/// or when the scope is dropped.
struct PostgresScope {
    tx: sqlx::Transaction<'static, Postgres>,
}

#[async_trait]
impl RepositoryScope for PostgresScope {
    async fn lock_by_payment_id(
        &mut self,
        payment_id: &str,
    ) -> RepositoryResult<Option<Transaction>> {
        find_one(&mut *self.tx, "payment_id", payment_id, true).await
    }

    async fn lock_by_charge_id(&mut self, charge_id: &str) -> RepositoryResult<Option<Transaction>> {
        find_one(&mut *self.tx, "charge_id", charge_id, true).await
    }

    async fn save(&mut self, tx: &Transaction) -> RepositoryResult<Transaction> {
        update(&mut *self.tx, tx).await
    }

    async fn commit(self: Box<Self>) -> RepositoryResult<()> {
        self.tx.commit().await.map_err(RepositoryError::from)
    }

    async fn rollback(self: Box<Self>) -> RepositoryResult<()> {
        self.tx.rollback().await.map_err(RepositoryError::from)
    }
}

async fn find_one<'e, E: PgExecutor<'e>>(
    executor: E,
    column: &'static str,
    value: &str,
    for_update: bool,
) -> RepositoryResult<Option<Transaction>> {
    // `column` is always one of the fixed names above, never caller input.
    let sql = format!(
        "SELECT * FROM transactions WHERE {column} = $1 ORDER BY created_at LIMIT 1{}",
        if for_update { " FOR UPDATE" } else { "" }
    );
    let row = sqlx::query_as::<_, TransactionRow>(&sql)
        .bind(value)
        .fetch_optional(executor)
        .await
        .map_err(RepositoryError::from)?;

    row.map(TransactionRow::into_domain).transpose()
}

async fn update<'e, E: PgExecutor<'e>>(executor: E, tx: &Transaction) -> RepositoryResult<Transaction> {
    let row = sqlx::query_as::<_, TransactionRow>(
        r#"
        UPDATE transactions SET
            status = $2,
            payment_id = COALESCE(NULLIF($3, ''), payment_id),
            charge_id = COALESCE(NULLIF($4, ''), charge_id),
            request_payload = COALESCE($5, request_payload),
            response_payload = COALESCE($6, response_payload),
            callback_payload = COALESCE($7, callback_payload),
            updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(tx.id)
    .bind(tx.status.as_str())
    .bind(&tx.payment_id)
    .bind(&tx.charge_id)
    .bind(&tx.request_payload)
    .bind(&tx.response_payload)
    .bind(&tx.callback_payload)
    .fetch_optional(executor)
    .await
    .map_err(RepositoryError::from)?;

    row.ok_or_else(|| RepositoryError::NotFound(tx.transaction_id.clone()))?
        .into_domain()
}

/// Internal row type for SQLx. Not exposed outside the adapter.
#[derive(Debug, sqlx::FromRow)]
struct TransactionRow {
    id: Uuid,
    transaction_id: String,
    transaction_type: String,
    gateway_name: String,
    amount: bigdecimal::BigDecimal,
    currency: String,
    status: String,
    payment_id: Option<String>,
    charge_id: Option<String>,
    request_payload: Option<String>,
    response_payload: Option<String>,
    callback_payload: Option<String>,
    created_at: chrono::DateTime<chrono::Utc>,
    updated_at: chrono::DateTime<chrono::Utc>,
}

impl TransactionRow {
    fn into_domain(self) -> RepositoryResult<Transaction> {
        let corrupt = |e: crate::domain::ParseVariantError| {
            RepositoryError::Corrupt(format!("{}: {}", self.transaction_id, e))
        };
        let transaction_type = self.transaction_type.parse().map_err(corrupt)?;
        let status = self.status.parse().map_err(corrupt)?;
        let gateway_name = self.gateway_name.parse::<Provider>().map_err(corrupt)?;

        Ok(Transaction {
            id: self.id,
            transaction_id: self.transaction_id,
            transaction_type,
            gateway_name,
            amount: self.amount,
            currency: self.currency.trim().to_string(),
            status,
            payment_id: self.payment_id,
            charge_id: self.charge_id,
            request_payload: self.request_payload,
            response_payload: self.response_payload,
            callback_payload: self.callback_payload,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}
