use serde::{Deserialize, Serialize};
use std::fmt;

pub type AirlineId = u64;
pub type TicketId = u64;
pub type PurchaseId = u64;

/// Monetary amount in the smallest currency unit.
pub type Amount = u128;

/// Seconds since the Unix epoch (UTC).
pub type Timestamp = i64;

/// Opaque identity on the value-transfer substrate: a caller, an airline owner,
/// or a ledger instance itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Blank addresses never identify anyone.
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Address {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Address {
    fn from(value: String) -> Self {
        Self(value)
    }
}
