use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use skyledger_catalog::{Airline, Ticket, DEFAULT_LOGO_REF};
use skyledger_core::lifecycle::LifecycleState;
use skyledger_core::{Address, AirlineId, Amount, PurchaseId, TicketId};
use skyledger_shared::Masked;

/// One leg of a booking as it was charged. Kept on the record so sales and
/// purchase history do not depend on the mutable ticket table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BookedLeg {
    pub ticket_id: TicketId,
    pub airline_id: AirlineId,
    pub price: Amount,
}

/// Append-only record of a committed booking.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BookingRecord {
    pub purchase_id: PurchaseId,
    pub legs: Vec<BookedLeg>,
    pub buyer: Address,
    pub first_name: Masked<String>,
    pub last_name: Masked<String>,
    pub total: Amount,
    pub booked_at: DateTime<Utc>,
}

impl BookingRecord {
    pub fn ticket_ids(&self) -> Vec<TicketId> {
        self.legs.iter().map(|leg| leg.ticket_id).collect()
    }

    pub fn passenger(&self) -> Masked<String> {
        Masked(format!("{} {}", self.first_name.expose(), self.last_name.expose()))
    }
}

/// A buyer's booking call: one or two legs plus the attached payment.
#[derive(Debug, Clone, Deserialize)]
pub struct BookingRequest {
    pub ticket_ids: Vec<TicketId>,
    pub first_name: Masked<String>,
    pub last_name: Masked<String>,
    pub paid: Amount,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct BookingReceipt {
    pub purchase_id: PurchaseId,
    pub total: Amount,
    pub change: Amount,
}

/// Per-instance tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerSettings {
    pub max_search_results: usize,
    pub default_logo_ref: String,
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            max_search_results: skyledger_catalog::search::DEFAULT_MAX_RESULTS,
            default_logo_ref: DEFAULT_LOGO_REF.to_string(),
        }
    }
}

/// Everything needed to rebuild a ledger instance, counters included.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LedgerSnapshot {
    pub instance: Address,
    pub admin: Address,
    pub lifecycle: LifecycleState,
    pub airlines: Vec<Airline>,
    pub last_airline_id: AirlineId,
    pub tickets: Vec<Ticket>,
    pub last_ticket_id: TicketId,
    pub bookings: Vec<BookingRecord>,
    pub last_purchase_id: PurchaseId,
}
