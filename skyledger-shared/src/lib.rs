pub mod models;
pub mod pii;

pub use models::events::{EventEnvelope, LedgerEvent};
pub use models::primitives::{Address, AirlineId, Amount, PurchaseId, TicketId, Timestamp};
pub use pii::Masked;
