#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bigdecimal::BigDecimal;
use payment_gateway::adapters::InMemoryTransactionRepository;
use payment_gateway::domain::{Provider, Transaction, TransactionStatus, TransactionType};
use payment_gateway::gateways::{
    DepositParams, GatewayError, GatewayFailure, GatewayResult, PaymentGateway, WithdrawParams,
};
use payment_gateway::ports::{
    RepositoryError, RepositoryResult, RepositoryScope, TransactionRepository,
};

/// Scripted gateway. Each call pops the next outcome; an empty script means success.
pub struct StubGateway {
    provider: Provider,
    outcomes: Mutex<VecDeque<Result<(), GatewayError>>>,
    refund_outcome: Mutex<Result<String, GatewayError>>,
    delay: Duration,
    pub charges: AtomicUsize,
    pub payouts: AtomicUsize,
    pub refunds: Mutex<Vec<String>>,
}

impl StubGateway {
    pub fn new(provider: Provider) -> Self {
        Self {
            provider,
            outcomes: Mutex::new(VecDeque::new()),
            refund_outcome: Mutex::new(Ok("re_1".to_string())),
            delay: Duration::ZERO,
            charges: AtomicUsize::new(0),
            payouts: AtomicUsize::new(0),
            refunds: Mutex::new(Vec::new()),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn then_fail(self, error: GatewayError) -> Self {
        self.outcomes.lock().unwrap().push_back(Err(error));
        self
    }

    pub fn failing_refund(self, error: GatewayError) -> Self {
        *self.refund_outcome.lock().unwrap() = Err(error);
        self
    }

    pub fn charge_count(&self) -> usize {
        self.charges.load(Ordering::SeqCst)
    }

    pub fn payout_count(&self) -> usize {
        self.payouts.load(Ordering::SeqCst)
    }

    pub fn refunded(&self) -> Vec<String> {
        self.refunds.lock().unwrap().clone()
    }

    async fn respond(&self, mut tx: Transaction, prefix: &str) -> GatewayResult {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let outcome = self.outcomes.lock().unwrap().pop_front().unwrap_or(Ok(()));
        tx.request_payload = Some(format!(r#"{{"transactionId":"{}"}}"#, tx.transaction_id));
        match outcome {
            Ok(()) => {
                tx.assign_payment_id(&format!("{}_{}", prefix, tx.transaction_id));
                tx.response_payload = Some(r#"{"status":"succeeded"}"#.to_string());
                tx.apply_status(TransactionStatus::Succeeded);
                Ok(tx)
            }
            Err(error) => Err(GatewayFailure::new(tx, error)),
        }
    }
}

#[async_trait]
impl PaymentGateway for StubGateway {
    fn provider(&self) -> Provider {
        self.provider
    }

    async fn charge(&self, _params: &DepositParams, tx: Transaction) -> GatewayResult {
        self.charges.fetch_add(1, Ordering::SeqCst);
        self.respond(tx, "pi").await
    }

    async fn payout(&self, _params: &WithdrawParams, tx: Transaction) -> GatewayResult {
        self.payouts.fetch_add(1, Ordering::SeqCst);
        self.respond(tx, "po").await
    }

    async fn refund(&self, tx: &Transaction) -> Result<String, GatewayError> {
        let reference = tx.refund_reference().unwrap_or_default().to_string();
        self.refunds.lock().unwrap().push(reference);
        self.refund_outcome.lock().unwrap().clone()
    }
}

/// In-memory store that counts writes and can be told to fail them.
#[derive(Default)]
pub struct RecordingRepository {
    inner: InMemoryTransactionRepository,
    flags: Arc<Flags>,
}

#[derive(Default)]
pub struct Flags {
    pub creates: AtomicUsize,
    pub saves: AtomicUsize,
    pub scope_saves: AtomicUsize,
    pub commits: AtomicUsize,
    pub fail_create: AtomicBool,
    pub fail_save: AtomicBool,
    pub fail_scope_save: AtomicBool,
}

impl RecordingRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn flags(&self) -> &Flags {
        &self.flags
    }

    pub fn writes(&self) -> usize {
        self.flags.creates.load(Ordering::SeqCst)
            + self.flags.saves.load(Ordering::SeqCst)
            + self.flags.commits.load(Ordering::SeqCst)
    }

    pub async fn len(&self) -> usize {
        self.inner.len().await
    }

    /// Seeds a row directly, bypassing the counters.
    pub async fn seed(&self, tx: Transaction) -> Transaction {
        self.inner.create(&tx).await.unwrap()
    }
}

#[async_trait]
impl TransactionRepository for RecordingRepository {
    async fn create(&self, tx: &Transaction) -> RepositoryResult<Transaction> {
        if self.flags.fail_create.load(Ordering::SeqCst) {
            return Err(RepositoryError::Database("connection refused".into()));
        }
        let created = self.inner.create(tx).await?;
        self.flags.creates.fetch_add(1, Ordering::SeqCst);
        Ok(created)
    }

    async fn find_by_transaction_id(
        &self,
        transaction_id: &str,
    ) -> RepositoryResult<Option<Transaction>> {
        self.inner.find_by_transaction_id(transaction_id).await
    }

    async fn find_by_payment_id(&self, payment_id: &str) -> RepositoryResult<Option<Transaction>> {
        self.inner.find_by_payment_id(payment_id).await
    }

    async fn find_by_charge_id(&self, charge_id: &str) -> RepositoryResult<Option<Transaction>> {
        self.inner.find_by_charge_id(charge_id).await
    }

    async fn save(&self, tx: &Transaction) -> RepositoryResult<Transaction> {
        if self.flags.fail_save.load(Ordering::SeqCst) {
            return Err(RepositoryError::Database("connection reset".into()));
        }
        let saved = self.inner.save(tx).await?;
        self.flags.saves.fetch_add(1, Ordering::SeqCst);
        Ok(saved)
    }

    async fn begin(&self) -> RepositoryResult<Box<dyn RepositoryScope>> {
        Ok(Box::new(RecordingScope {
            inner: self.inner.begin().await?,
            flags: self.flags.clone(),
        }))
    }

    async fn ping(&self) -> RepositoryResult<()> {
        self.inner.ping().await
    }
}

struct RecordingScope {
    inner: Box<dyn RepositoryScope>,
    flags: Arc<Flags>,
}

#[async_trait]
impl RepositoryScope for RecordingScope {
    async fn lock_by_payment_id(
        &mut self,
        payment_id: &str,
    ) -> RepositoryResult<Option<Transaction>> {
        self.inner.lock_by_payment_id(payment_id).await
    }

    async fn lock_by_charge_id(&mut self, charge_id: &str) -> RepositoryResult<Option<Transaction>> {
        self.inner.lock_by_charge_id(charge_id).await
    }

    async fn save(&mut self, tx: &Transaction) -> RepositoryResult<Transaction> {
        if self.flags.fail_scope_save.load(Ordering::SeqCst) {
            return Err(RepositoryError::Database("deadlock detected".into()));
        }
        self.flags.scope_saves.fetch_add(1, Ordering::SeqCst);
        self.inner.save(tx).await
    }

    async fn commit(self: Box<Self>) -> RepositoryResult<()> {
        self.inner.commit().await?;
        self.flags.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> RepositoryResult<()> {
        self.inner.rollback().await
    }
}

pub fn stored(
    transaction_id: &str,
    transaction_type: TransactionType,
    provider: Provider,
    status: TransactionStatus,
    payment_id: Option<&str>,
    charge_id: Option<&str>,
) -> Transaction {
    let mut tx = Transaction::pending(
        transaction_id,
        transaction_type,
        provider,
        BigDecimal::from(10),
        "USD",
    );
    tx.status = status;
    tx.payment_id = payment_id.map(str::to_string);
    tx.charge_id = charge_id.map(str::to_string);
    tx
}

pub fn deposit_params(amount: i64) -> DepositParams {
    DepositParams {
        amount: BigDecimal::from(amount),
        currency: "USD".to_string(),
        token: Some("tok_visa".to_string()),
        card: None,
    }
}

pub fn withdraw_params(amount: i64) -> WithdrawParams {
    WithdrawParams {
        amount,
        currency: "USD".to_string(),
        destination: Some("acct_123".to_string()),
        card: None,
    }
}
