pub mod orchestrator;
pub mod reconciler;
pub mod signature;

pub use orchestrator::{DepositCommand, PaymentOrchestrator, WithdrawCommand};
pub use reconciler::{Reconciliation, WebhookReconciler};
pub use signature::{SignatureError, SignatureVerifier};
