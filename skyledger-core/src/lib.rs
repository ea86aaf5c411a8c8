pub mod identity;
pub mod lifecycle;
pub mod payment;
pub mod registry;

pub use skyledger_shared::{Address, AirlineId, Amount, PurchaseId, TicketId, Timestamp};

use payment::TransferError;

/// Every way a ledger operation can fail. An operation fails with exactly one
/// of these and leaves no partial effect behind.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Already exists: {0}")]
    AlreadyExists(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Sold out: ticket {0} has no seats left")]
    SoldOut(TicketId),
    #[error("Insufficient payment: required {required}, paid {paid}")]
    InsufficientPayment { required: Amount, paid: Amount },
    #[error("System is paused")]
    SystemPaused,
    #[error("Invalid state: {0}")]
    InvalidState(String),
    #[error("Transfer rejected: {0}")]
    TransferRejected(#[from] TransferError),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl LedgerError {
    /// Stable machine-readable name of the failure kind.
    pub fn kind(&self) -> &'static str {
        match self {
            LedgerError::Unauthorized(_) => "UNAUTHORIZED",
            LedgerError::NotFound(_) => "NOT_FOUND",
            LedgerError::AlreadyExists(_) => "ALREADY_EXISTS",
            LedgerError::InvalidInput(_) => "INVALID_INPUT",
            LedgerError::SoldOut(_) => "SOLD_OUT",
            LedgerError::InsufficientPayment { .. } => "INSUFFICIENT_PAYMENT",
            LedgerError::SystemPaused => "SYSTEM_PAUSED",
            LedgerError::InvalidState(_) => "INVALID_STATE",
            LedgerError::TransferRejected(_) => "TRANSFER_REJECTED",
            LedgerError::Internal(_) => "INTERNAL",
        }
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;
