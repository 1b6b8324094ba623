//! Domain layer: entities and value types with no framework dependencies.

pub mod amount;
pub mod provider;
pub mod transaction;

pub use amount::{from_minor_units, to_minor_units, AmountError};
pub use provider::Provider;
pub use transaction::{
    ParseVariantError, Transaction, TransactionStatus, TransactionType, Transition,
};
