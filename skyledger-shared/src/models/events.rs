use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::primitives::{Address, AirlineId, Amount, PurchaseId, TicketId};
use crate::pii::Masked;

/// Everything the ledger announces to listeners. Each variant carries enough
/// to identify the affected record and the kind of change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerEvent {
    AirlineAdded {
        airline_id: AirlineId,
        name: String,
        owner: Address,
    },
    AirlineUpdated {
        airline_id: AirlineId,
        name: String,
        owner: Address,
    },
    AirlineRemoved {
        airline_id: AirlineId,
    },
    TicketAdded {
        ticket_id: TicketId,
        airline_id: AirlineId,
    },
    TicketUpdated {
        ticket_id: TicketId,
        airline_id: AirlineId,
        price: Amount,
        quantity: u32,
    },
    TicketRemoved {
        ticket_id: TicketId,
        airline_id: AirlineId,
    },
    /// One per leg of a booking.
    TicketPurchased {
        purchase_id: PurchaseId,
        ticket_id: TicketId,
        airline_id: AirlineId,
        buyer: Address,
        price: Amount,
        passenger: Masked<String>,
    },
    OwnershipTransferred {
        previous: Address,
        current: Address,
    },
    Paused {
        by: Address,
    },
    Unpaused {
        by: Address,
    },
    Destroyed {
        by: Address,
        released: Amount,
    },
    BackendChanged {
        previous: Address,
        current: Address,
    },
}

impl LedgerEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            LedgerEvent::AirlineAdded { .. } => "airline_added",
            LedgerEvent::AirlineUpdated { .. } => "airline_updated",
            LedgerEvent::AirlineRemoved { .. } => "airline_removed",
            LedgerEvent::TicketAdded { .. } => "ticket_added",
            LedgerEvent::TicketUpdated { .. } => "ticket_updated",
            LedgerEvent::TicketRemoved { .. } => "ticket_removed",
            LedgerEvent::TicketPurchased { .. } => "ticket_purchased",
            LedgerEvent::OwnershipTransferred { .. } => "ownership_transferred",
            LedgerEvent::Paused { .. } => "paused",
            LedgerEvent::Unpaused { .. } => "unpaused",
            LedgerEvent::Destroyed { .. } => "destroyed",
            LedgerEvent::BackendChanged { .. } => "backend_changed",
        }
    }

    /// Airline the event concerns, used to filter per-airline streams.
    pub fn airline_id(&self) -> Option<AirlineId> {
        match self {
            LedgerEvent::AirlineAdded { airline_id, .. }
            | LedgerEvent::AirlineUpdated { airline_id, .. }
            | LedgerEvent::AirlineRemoved { airline_id }
            | LedgerEvent::TicketAdded { airline_id, .. }
            | LedgerEvent::TicketUpdated { airline_id, .. }
            | LedgerEvent::TicketRemoved { airline_id, .. }
            | LedgerEvent::TicketPurchased { airline_id, .. } => Some(*airline_id),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event_id: Uuid,
    /// Ledger instance (or registry) that emitted the event.
    pub instance: Address,
    pub sequence: u64,
    pub emitted_at: DateTime<Utc>,
    pub event: LedgerEvent,
}

impl EventEnvelope {
    pub fn new(instance: Address, sequence: u64, event: LedgerEvent) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            instance,
            sequence,
            emitted_at: Utc::now(),
            event,
        }
    }
}
