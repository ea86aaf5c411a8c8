use skyledger_catalog::{AirlineDirectory, TicketLedger};
use skyledger_core::identity::AirlineOwners;
use skyledger_core::payment::{Transfer, TransferPurpose};
use skyledger_core::{Address, Amount, LedgerError, LedgerResult, TicketId};
use std::collections::HashMap;

use crate::models::BookedLeg;

pub const MAX_LEGS: usize = 2;

/// The staged outcome of a booking: legs charged, seats already taken out of
/// the draft inventory, and the transfer batch that must settle before the
/// draft may be committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementPlan {
    pub legs: Vec<BookedLeg>,
    pub total: Amount,
    pub change: Amount,
    pub transfers: Vec<Transfer>,
}

impl SettlementPlan {
    /// Checks run in a fixed order: every leg resolves, then seats, then
    /// payment. `tickets` must be a draft; on error it may hold partial
    /// reservations and has to be discarded.
    pub fn prepare(
        tickets: &mut TicketLedger,
        airlines: &AirlineDirectory,
        ticket_ids: &[TicketId],
        buyer: &Address,
        instance: &Address,
        paid: Amount,
    ) -> LedgerResult<Self> {
        if ticket_ids.is_empty() || ticket_ids.len() > MAX_LEGS {
            return Err(LedgerError::InvalidInput(format!(
                "a booking has 1 to {} legs, got {}",
                MAX_LEGS,
                ticket_ids.len()
            )));
        }

        let mut legs = Vec::with_capacity(ticket_ids.len());
        let mut payees = Vec::with_capacity(ticket_ids.len());
        for &ticket_id in ticket_ids {
            let ticket = tickets
                .get(ticket_id)
                .ok_or_else(|| LedgerError::NotFound(format!("ticket {}", ticket_id)))?;
            let owner = airlines.owner_of(ticket.airline_id).ok_or_else(|| {
                LedgerError::NotFound(format!(
                    "airline {} selling ticket {}",
                    ticket.airline_id, ticket_id
                ))
            })?;
            payees.push(owner.clone());
            legs.push(BookedLeg {
                ticket_id,
                airline_id: ticket.airline_id,
                price: ticket.price,
            });
        }

        // The same ticket twice needs two seats.
        let mut seats: HashMap<TicketId, u32> = HashMap::new();
        for leg in &legs {
            *seats.entry(leg.ticket_id).or_default() += 1;
        }
        for leg in &legs {
            if let Some(count) = seats.remove(&leg.ticket_id) {
                tickets.reserve(leg.ticket_id, count)?;
            }
        }

        let total = legs
            .iter()
            .try_fold(0 as Amount, |total, leg| total.checked_add(leg.price))
            .ok_or_else(|| LedgerError::InvalidInput("itinerary total overflows".to_string()))?;
        if paid < total {
            return Err(LedgerError::InsufficientPayment { required: total, paid });
        }
        let change = paid - total;

        let mut transfers = Vec::with_capacity(legs.len() + 2);
        transfers.push(Transfer::new(
            buyer.clone(),
            instance.clone(),
            paid,
            TransferPurpose::Payment,
        ));
        for (leg, payee) in legs.iter().zip(payees) {
            transfers.push(Transfer::new(
                instance.clone(),
                payee,
                leg.price,
                TransferPurpose::Disbursement,
            ));
        }
        if change > 0 {
            transfers.push(Transfer::new(
                instance.clone(),
                buyer.clone(),
                change,
                TransferPurpose::Change,
            ));
        }

        Ok(Self {
            legs,
            total,
            change,
            transfers,
        })
    }

    pub fn disbursed(&self) -> Amount {
        self.total
    }
}
