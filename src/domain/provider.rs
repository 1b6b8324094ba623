use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::ParseVariantError;

/// External payment gateway that handles a transaction.
///
/// Resolved once from the request's `provider` string; deeper layers only see this enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Provider {
    #[serde(rename = "stripe")]
    Stripe,
    #[serde(rename = "authorize")]
    AuthorizeNet,
}

impl Provider {
    pub const ALL: [Provider; 2] = [Provider::Stripe, Provider::AuthorizeNet];

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Stripe => "stripe",
            Provider::AuthorizeNet => "authorize",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = ParseVariantError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stripe" => Ok(Provider::Stripe),
            "authorize" => Ok(Provider::AuthorizeNet),
            _ => Err(ParseVariantError::new("provider", s)),
        }
    }
}
