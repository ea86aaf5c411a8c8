use serde::{Deserialize, Serialize};
use skyledger_core::{AirlineId, Amount, LedgerError, LedgerResult, TicketId, Timestamp};
use std::collections::BTreeMap;

pub const PLACE_MAX_CHARS: usize = 32;

/// One sellable flight leg.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Ticket {
    pub id: TicketId,
    pub airline_id: AirlineId,
    pub from: String,
    pub to: String,
    pub price: Amount,
    pub quantity: u32,
    pub departure: Timestamp,
    pub arrival: Timestamp,
}

impl Ticket {
    pub fn is_available(&self) -> bool {
        self.quantity > 0
    }

    /// Saturates for schedules spanning more than `i64::MAX` seconds.
    pub fn duration(&self) -> i64 {
        self.arrival.saturating_sub(self.departure)
    }
}

/// Everything needed to list a new ticket. Price and quantity are unsigned,
/// so negative values are rejected before they get here.
#[derive(Debug, Clone, Deserialize)]
pub struct NewTicket {
    pub airline_id: AirlineId,
    pub from: String,
    pub to: String,
    pub price: Amount,
    pub quantity: u32,
    pub departure: Timestamp,
    pub arrival: Timestamp,
}

impl NewTicket {
    pub fn validate(&self) -> LedgerResult<()> {
        validate_place("from", &self.from)?;
        validate_place("to", &self.to)?;
        if self.quantity < 1 {
            return Err(LedgerError::InvalidInput(
                "quantity must be at least 1".to_string(),
            ));
        }
        if self.arrival < self.departure {
            return Err(LedgerError::InvalidInput(format!(
                "arrival {} is before departure {}",
                self.arrival, self.departure
            )));
        }
        Ok(())
    }
}

/// All tickets keyed by a global id, plus a per-airline index that keeps
/// each airline's tickets in creation order.
#[derive(Debug, Clone, Default)]
pub struct TicketLedger {
    tickets: BTreeMap<TicketId, Ticket>,
    by_airline: BTreeMap<AirlineId, Vec<TicketId>>,
    last_id: TicketId,
}

impl TicketLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn restore(records: Vec<Ticket>, last_id: TicketId) -> LedgerResult<Self> {
        let mut ledger = Self {
            last_id,
            ..Self::default()
        };
        let mut records = records;
        records.sort_by_key(|ticket| ticket.id);
        for ticket in records {
            if ticket.id == 0 || ticket.id > last_id || ledger.tickets.contains_key(&ticket.id) {
                return Err(LedgerError::InvalidInput(format!(
                    "ticket id {} is duplicated or outside the allocated range",
                    ticket.id
                )));
            }
            ledger.by_airline.entry(ticket.airline_id).or_default().push(ticket.id);
            ledger.tickets.insert(ticket.id, ticket);
        }
        Ok(ledger)
    }

    pub fn add(&mut self, new: NewTicket) -> LedgerResult<TicketId> {
        new.validate()?;

        self.last_id += 1;
        let id = self.last_id;
        self.by_airline.entry(new.airline_id).or_default().push(id);
        self.tickets.insert(
            id,
            Ticket {
                id,
                airline_id: new.airline_id,
                from: new.from,
                to: new.to,
                price: new.price,
                quantity: new.quantity,
                departure: new.departure,
                arrival: new.arrival,
            },
        );
        Ok(id)
    }

    /// Only price and quantity change after listing; route and schedule are
    /// fixed once buyers may have seen them.
    pub fn edit(&mut self, id: TicketId, price: Amount, quantity: u32) -> LedgerResult<&Ticket> {
        let ticket = self.tickets.get_mut(&id).ok_or_else(|| not_found(id))?;
        ticket.price = price;
        ticket.quantity = quantity;
        Ok(ticket)
    }

    pub fn remove(&mut self, id: TicketId) -> LedgerResult<Ticket> {
        let ticket = self.tickets.remove(&id).ok_or_else(|| not_found(id))?;
        if let Some(ids) = self.by_airline.get_mut(&ticket.airline_id) {
            ids.retain(|other| *other != id);
            if ids.is_empty() {
                self.by_airline.remove(&ticket.airline_id);
            }
        }
        Ok(ticket)
    }

    /// Takes `seats` out of inventory, failing with `SoldOut` rather than
    /// letting the quantity go below zero.
    pub fn reserve(&mut self, id: TicketId, seats: u32) -> LedgerResult<()> {
        let ticket = self.tickets.get_mut(&id).ok_or_else(|| not_found(id))?;
        if ticket.quantity < seats {
            return Err(LedgerError::SoldOut(id));
        }
        ticket.quantity -= seats;
        Ok(())
    }

    pub fn get(&self, id: TicketId) -> Option<&Ticket> {
        self.tickets.get(&id)
    }

    /// The airline's `index`-th remaining ticket, in creation order.
    pub fn by_airline(&self, airline_id: AirlineId, index: usize) -> Option<&Ticket> {
        self.by_airline
            .get(&airline_id)
            .and_then(|ids| ids.get(index))
            .and_then(|id| self.tickets.get(id))
    }

    pub fn count_for(&self, airline_id: AirlineId) -> usize {
        self.by_airline.get(&airline_id).map_or(0, Vec::len)
    }

    pub fn for_airline(&self, airline_id: AirlineId) -> impl Iterator<Item = &Ticket> {
        self.by_airline
            .get(&airline_id)
            .into_iter()
            .flatten()
            .filter_map(move |id| self.tickets.get(id))
    }

    /// Every ticket in ascending id order, exhausted ones included.
    pub fn iter(&self) -> impl Iterator<Item = &Ticket> {
        self.tickets.values()
    }

    pub fn len(&self) -> usize {
        self.tickets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tickets.is_empty()
    }

    pub fn last_id(&self) -> TicketId {
        self.last_id
    }
}

fn validate_place(field: &str, value: &str) -> LedgerResult<()> {
    let length = value.chars().count();
    if value.trim().is_empty() || length > PLACE_MAX_CHARS {
        return Err(LedgerError::InvalidInput(format!(
            "'{}' must be 1-{} characters",
            field, PLACE_MAX_CHARS
        )));
    }
    Ok(())
}

fn not_found(id: TicketId) -> LedgerError {
    LedgerError::NotFound(format!("ticket {}", id))
}
