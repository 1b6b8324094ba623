//! In-memory implementation of TransactionRepository.
//!
//! Enforces the same uniqueness and per-row locking rules as the Postgres adapter so the
//! orchestration code can be exercised without a database.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex as SyncMutex, PoisonError};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use uuid::Uuid;

use crate::domain::Transaction;
use crate::ports::{RepositoryError, RepositoryResult, RepositoryScope, TransactionRepository};

#[derive(Default)]
struct Store {
    /// Keyed by the external `transaction_id`.
    rows: RwLock<HashMap<String, Transaction>>,
    /// Only rows currently locked by some scope, or being waited on, have an entry.
    row_locks: SyncMutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl Store {
    async fn find_by<F>(&self, matches: F) -> Option<Transaction>
    where
        F: Fn(&Transaction) -> bool,
    {
        let rows = self.rows.read().await;
        rows.values()
            .filter(|tx| matches(tx))
            .min_by_key(|tx| tx.created_at)
            .cloned()
    }

    fn row_lock(&self, id: Uuid) -> Arc<Mutex<()>> {
        let mut locks = self.row_locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.entry(id).or_default().clone()
    }

    /// Drops lock entries nobody holds or waits on. Clones are only handed out under the
    /// map's mutex, so a strong count of one cannot race with a new waiter.
    fn prune_row_locks(&self, ids: &[Uuid]) {
        let mut locks = self.row_locks.lock().unwrap_or_else(PoisonError::into_inner);
        for id in ids {
            if locks.get(id).is_some_and(|lock| Arc::strong_count(lock) == 1) {
                locks.remove(id);
            }
        }
    }

    async fn write(&self, tx: &Transaction) -> RepositoryResult<Transaction> {
        let mut rows = self.rows.write().await;
        let existing = rows
            .get_mut(&tx.transaction_id)
            .ok_or_else(|| RepositoryError::NotFound(tx.transaction_id.clone()))?;
        merge_into(existing, tx);
        Ok(existing.clone())
    }
}

/// Mirrors the column rules of the SQL update: ids and payloads are never blanked.
fn merge_into(existing: &mut Transaction, tx: &Transaction) {
    existing.status = tx.status;
    if let Some(payment_id) = tx.payment_id.as_deref() {
        existing.assign_payment_id(payment_id);
    }
    if let Some(charge_id) = tx.charge_id.as_deref() {
        existing.assign_charge_id(charge_id);
    }
    if tx.request_payload.is_some() {
        existing.request_payload = tx.request_payload.clone();
    }
    if tx.response_payload.is_some() {
        existing.response_payload = tx.response_payload.clone();
    }
    if tx.callback_payload.is_some() {
        existing.callback_payload = tx.callback_payload.clone();
    }
    existing.updated_at = Utc::now();
}

/// Thread-safe in-memory transaction repository.
#[derive(Default, Clone)]
pub struct InMemoryTransactionRepository {
    store: Arc<Store>,
}

impl InMemoryTransactionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.store.rows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl TransactionRepository for InMemoryTransactionRepository {
    async fn create(&self, tx: &Transaction) -> RepositoryResult<Transaction> {
        let mut rows = self.store.rows.write().await;
        if rows.contains_key(&tx.transaction_id) {
            return Err(RepositoryError::Duplicate(tx.transaction_id.clone()));
        }
        rows.insert(tx.transaction_id.clone(), tx.clone());
        Ok(tx.clone())
    }

    async fn find_by_transaction_id(
        &self,
        transaction_id: &str,
    ) -> RepositoryResult<Option<Transaction>> {
        Ok(self.store.rows.read().await.get(transaction_id).cloned())
    }

    async fn find_by_payment_id(&self, payment_id: &str) -> RepositoryResult<Option<Transaction>> {
        Ok(self
            .store
            .find_by(|tx| tx.payment_id.as_deref() == Some(payment_id))
            .await)
    }

    async fn find_by_charge_id(&self, charge_id: &str) -> RepositoryResult<Option<Transaction>> {
        Ok(self
            .store
            .find_by(|tx| tx.charge_id.as_deref() == Some(charge_id))
            .await)
    }

    async fn save(&self, tx: &Transaction) -> RepositoryResult<Transaction> {
        self.store.write(tx).await
    }

    async fn begin(&self) -> RepositoryResult<Box<dyn RepositoryScope>> {
        Ok(Box::new(InMemoryScope {
            store: self.store.clone(),
            guards: Vec::new(),
            staged: Vec::new(),
        }))
    }

    async fn ping(&self) -> RepositoryResult<()> {
        Ok(())
    }
}

/// Writes are staged and only become visible on commit.
struct InMemoryScope {
    store: Arc<Store>,
    guards: Vec<(Uuid, OwnedMutexGuard<()>)>,
    staged: Vec<Transaction>,
}

impl InMemoryScope {
    async fn lock_where<F>(&mut self, matches: F) -> RepositoryResult<Option<Transaction>>
    where
        F: Fn(&Transaction) -> bool,
    {
        let Some(found) = self.store.find_by(&matches).await else {
            return Ok(None);
        };
        if !self.guards.iter().any(|(id, _)| *id == found.id) {
            let lock = self.store.row_lock(found.id);
            let guard = lock.lock_owned().await;
            self.guards.push((found.id, guard));
        }
        // Re-read under the lock: another scope may have committed while we waited.
        let current = self
            .store
            .rows
            .read()
            .await
            .get(&found.transaction_id)
            .cloned();
        Ok(current.map(|row| {
            self.staged
                .iter()
                .find(|staged| staged.id == row.id)
                .cloned()
                .unwrap_or(row)
        }))
    }
}

impl Drop for InMemoryScope {
    fn drop(&mut self) {
        let ids: Vec<Uuid> = self.guards.drain(..).map(|(id, _guard)| id).collect();
        self.store.prune_row_locks(&ids);
    }
}

#[async_trait]
impl RepositoryScope for InMemoryScope {
    async fn lock_by_payment_id(
        &mut self,
        payment_id: &str,
    ) -> RepositoryResult<Option<Transaction>> {
        self.lock_where(|tx| tx.payment_id.as_deref() == Some(payment_id))
            .await
    }

    async fn lock_by_charge_id(&mut self, charge_id: &str) -> RepositoryResult<Option<Transaction>> {
        self.lock_where(|tx| tx.charge_id.as_deref() == Some(charge_id))
            .await
    }

    async fn save(&mut self, tx: &Transaction) -> RepositoryResult<Transaction> {
        let rows = self.store.rows.read().await;
        let mut merged = rows
            .get(&tx.transaction_id)
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound(tx.transaction_id.clone()))?;
        drop(rows);

        merge_into(&mut merged, tx);
        self.staged.retain(|staged| staged.id != merged.id);
        self.staged.push(merged.clone());
        Ok(merged)
    }

    async fn commit(self: Box<Self>) -> RepositoryResult<()> {
        let mut rows = self.store.rows.write().await;
        for staged in &self.staged {
            rows.insert(staged.transaction_id.clone(), staged.clone());
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> RepositoryResult<()> {
        Ok(())
    }
}
