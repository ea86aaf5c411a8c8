pub mod models;
pub mod settlement;
pub mod ledger;
pub mod finance;

pub use models::{BookedLeg, BookingReceipt, BookingRecord, BookingRequest, LedgerSettings, LedgerSnapshot};
pub use ledger::Ledger;
pub use finance::{SaleEntry, SettlementReport};
pub use settlement::SettlementPlan;
