use chrono::Utc;
use skyledger_catalog::{
    Airline, AirlineDirectory, AirlineUpdate, Itinerary, ItineraryView, NewTicket, RouteSearch, SortOrder, Ticket,
    TicketLedger,
};
use skyledger_core::identity::{require_airline_owner, AccessControl, AirlineOwners, Role};
use skyledger_core::lifecycle::{Lifecycle, LifecycleState};
use skyledger_core::payment::{FundsRail, Transfer, TransferPurpose};
use skyledger_core::{Address, AirlineId, Amount, LedgerError, LedgerResult, PurchaseId, TicketId, Timestamp};
use skyledger_shared::{EventEnvelope, LedgerEvent};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::finance::{self, SaleEntry, SettlementReport};
use crate::models::{BookingReceipt, BookingRecord, BookingRequest, LedgerSettings, LedgerSnapshot};
use crate::settlement::SettlementPlan;

#[derive(Debug, Clone)]
struct LedgerState {
    access: AccessControl,
    lifecycle: Lifecycle,
    airlines: AirlineDirectory,
    tickets: TicketLedger,
    bookings: Vec<BookingRecord>,
    last_purchase_id: PurchaseId,
}

/// Writes staged by one operation. Nothing here is visible until the
/// transfers settle and the state is swapped in.
struct Draft {
    state: LedgerState,
    transfers: Vec<Transfer>,
    events: Vec<LedgerEvent>,
}

impl Draft {
    fn emit(&mut self, event: LedgerEvent) {
        self.events.push(event);
    }
}

/// One ledger instance: airlines, tickets and bookings behind a single
/// transaction boundary. Every mutation runs against a draft copy, settles
/// its transfer batch through the rail, and only then commits.
pub struct Ledger {
    address: Address,
    state: RwLock<LedgerState>,
    rail: Arc<dyn FundsRail>,
    events: broadcast::Sender<EventEnvelope>,
    sequence: AtomicU64,
    settings: LedgerSettings,
}

impl Ledger {
    pub fn new(
        address: Address,
        admin: Address,
        rail: Arc<dyn FundsRail>,
        settings: LedgerSettings,
        events: broadcast::Sender<EventEnvelope>,
    ) -> Self {
        let state = LedgerState {
            access: AccessControl::new(admin),
            lifecycle: Lifecycle::new(),
            airlines: AirlineDirectory::new(),
            tickets: TicketLedger::new(),
            bookings: Vec::new(),
            last_purchase_id: 0,
        };
        Self {
            address,
            state: RwLock::new(state),
            rail,
            events,
            sequence: AtomicU64::new(0),
            settings,
        }
    }

    /// A fresh instance under a newly minted address.
    pub fn deploy(
        admin: Address,
        rail: Arc<dyn FundsRail>,
        settings: LedgerSettings,
        events: broadcast::Sender<EventEnvelope>,
    ) -> Self {
        let address = Address::new(format!("instance:{}", Uuid::new_v4().simple()));
        info!(instance = %address, admin = %admin, "Deploying ledger instance");
        Self::new(address, admin, rail, settings, events)
    }

    pub fn restore(
        snapshot: LedgerSnapshot,
        rail: Arc<dyn FundsRail>,
        settings: LedgerSettings,
        events: broadcast::Sender<EventEnvelope>,
    ) -> LedgerResult<Self> {
        if snapshot.bookings.iter().any(|record| record.purchase_id > snapshot.last_purchase_id) {
            return Err(LedgerError::InvalidInput(
                "booking record beyond the purchase counter".to_string(),
            ));
        }
        let state = LedgerState {
            access: AccessControl::new(snapshot.admin),
            lifecycle: Lifecycle::restore(snapshot.lifecycle),
            airlines: AirlineDirectory::restore(snapshot.airlines, snapshot.last_airline_id)?,
            tickets: TicketLedger::restore(snapshot.tickets, snapshot.last_ticket_id)?,
            bookings: snapshot.bookings,
            last_purchase_id: snapshot.last_purchase_id,
        };
        Ok(Self {
            address: snapshot.instance,
            state: RwLock::new(state),
            rail,
            events,
            sequence: AtomicU64::new(0),
            settings,
        })
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        self.read(|state| LedgerSnapshot {
            instance: self.address.clone(),
            admin: state.access.admin().clone(),
            lifecycle: state.lifecycle.state(),
            airlines: state.airlines.iter().cloned().collect(),
            last_airline_id: state.airlines.last_id(),
            tickets: state.tickets.iter().cloned().collect(),
            last_ticket_id: state.tickets.last_id(),
            bookings: state.bookings.clone(),
            last_purchase_id: state.last_purchase_id,
        })
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn settings(&self) -> &LedgerSettings {
        &self.settings
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.events.subscribe()
    }

    /// Funds currently held by the instance itself.
    pub fn balance(&self) -> Amount {
        self.rail.balance_of(&self.address)
    }

    // ---- identity and lifecycle ----

    pub fn admin(&self) -> Address {
        self.read(|state| state.access.admin().clone())
    }

    pub fn lifecycle_state(&self) -> LifecycleState {
        self.read(|state| state.lifecycle.state())
    }

    pub fn role_of(&self, address: &Address) -> Role {
        self.read(|state| Role::resolve(&state.access, &state.airlines, address))
    }

    /// Not gated by pause, so a paused instance can still change hands.
    pub fn transfer_ownership(&self, caller: &Address, new_admin: Address) -> LedgerResult<()> {
        self.transact("transfer_ownership", |draft| {
            draft.state.lifecycle.ensure_live()?;
            let event = draft.state.access.transfer_ownership(caller, new_admin)?;
            draft.emit(event);
            Ok(())
        })
    }

    pub fn pause(&self, caller: &Address) -> LedgerResult<()> {
        self.transact("pause", |draft| {
            draft.state.lifecycle.ensure_live()?;
            draft.state.access.require_admin(caller)?;
            draft.state.lifecycle.pause()?;
            warn!(by = %caller, "Ledger paused");
            draft.emit(LedgerEvent::Paused { by: caller.clone() });
            Ok(())
        })
    }

    pub fn unpause(&self, caller: &Address) -> LedgerResult<()> {
        self.transact("unpause", |draft| {
            draft.state.lifecycle.ensure_live()?;
            draft.state.access.require_admin(caller)?;
            draft.state.lifecycle.unpause()?;
            info!(by = %caller, "Ledger unpaused");
            draft.emit(LedgerEvent::Unpaused { by: caller.clone() });
            Ok(())
        })
    }

    /// Terminal. Releases whatever the instance holds to the administrator and
    /// wipes every table. Returns the amount released.
    pub fn destroy(&self, caller: &Address) -> LedgerResult<Amount> {
        self.transact("destroy", |draft| {
            let state = &mut draft.state;
            state.lifecycle.ensure_live()?;
            state.access.require_admin(caller)?;
            state.lifecycle.destroy()?;

            state.airlines = AirlineDirectory::new();
            state.tickets = TicketLedger::new();
            state.bookings.clear();
            state.last_purchase_id = 0;

            let released = self.rail.balance_of(&self.address);
            if released > 0 {
                draft.transfers.push(Transfer::new(
                    self.address.clone(),
                    caller.clone(),
                    released,
                    TransferPurpose::Release,
                ));
            }
            warn!(by = %caller, released, "Ledger destroyed");
            draft.emit(LedgerEvent::Destroyed {
                by: caller.clone(),
                released,
            });
            Ok(released)
        })
    }

    // ---- airlines ----

    pub fn add_airline(
        &self,
        caller: &Address,
        name: String,
        owner: Address,
        logo_ref: Option<String>,
    ) -> LedgerResult<AirlineId> {
        self.transact("add_airline", |draft| {
            let state = &mut draft.state;
            state.lifecycle.ensure_mutable()?;
            state.access.require_admin(caller)?;

            let logo_ref = logo_ref.unwrap_or_else(|| self.settings.default_logo_ref.clone());
            let airline_id = state.airlines.add(name.clone(), owner.clone(), Some(logo_ref))?;

            info!(airline_id, name = %name, owner = %owner, "Airline added");
            draft.emit(LedgerEvent::AirlineAdded { airline_id, name, owner });
            Ok(airline_id)
        })
    }

    pub fn edit_airline(&self, caller: &Address, airline_id: AirlineId, update: AirlineUpdate) -> LedgerResult<Airline> {
        self.transact("edit_airline", |draft| {
            let state = &mut draft.state;
            state.lifecycle.ensure_mutable()?;
            state.access.require_admin(caller)?;

            let airline = state.airlines.edit(airline_id, update)?.clone();

            info!(airline_id, name = %airline.name, owner = %airline.owner, "Airline updated");
            draft.emit(LedgerEvent::AirlineUpdated {
                airline_id,
                name: airline.name.clone(),
                owner: airline.owner.clone(),
            });
            Ok(airline)
        })
    }

    /// Tickets of the removed airline stay behind as orphans.
    pub fn remove_airline(&self, caller: &Address, airline_id: AirlineId) -> LedgerResult<()> {
        self.transact("remove_airline", |draft| {
            let state = &mut draft.state;
            state.lifecycle.ensure_mutable()?;
            state.access.require_admin(caller)?;

            let removed = state.airlines.remove(airline_id)?;
            let orphaned = state.tickets.count_for(airline_id);

            info!(airline_id, name = %removed.name, orphaned, "Airline removed");
            draft.emit(LedgerEvent::AirlineRemoved { airline_id });
            Ok(())
        })
    }

    pub fn airline_exists(&self, name: &str) -> bool {
        self.read(|state| state.airlines.exists(name))
    }

    pub fn airline(&self, airline_id: AirlineId) -> Option<Airline> {
        self.read(|state| state.airlines.get(airline_id).cloned())
    }

    pub fn airlines_count(&self) -> usize {
        self.read(|state| state.airlines.count())
    }

    pub fn airline_at(&self, index: usize) -> Option<Airline> {
        self.read(|state| state.airlines.at(index).cloned())
    }

    pub fn airlines(&self) -> Vec<Airline> {
        self.read(|state| state.airlines.iter().cloned().collect())
    }

    pub fn last_airline_id(&self) -> AirlineId {
        self.read(|state| state.airlines.last_id())
    }

    pub fn airlines_owned_by(&self, address: &Address) -> Vec<AirlineId> {
        self.read(|state| state.airlines.owned_by(address))
    }

    // ---- tickets ----

    pub fn add_ticket(&self, caller: &Address, ticket: NewTicket) -> LedgerResult<TicketId> {
        self.transact("add_ticket", |draft| {
            let state = &mut draft.state;
            state.lifecycle.ensure_mutable()?;
            require_airline_owner(&state.airlines, ticket.airline_id, caller)?;

            let airline_id = ticket.airline_id;
            let ticket_id = state.tickets.add(ticket)?;

            info!(ticket_id, airline_id, "Ticket added");
            draft.emit(LedgerEvent::TicketAdded { ticket_id, airline_id });
            Ok(ticket_id)
        })
    }

    pub fn edit_ticket(&self, caller: &Address, ticket_id: TicketId, price: Amount, quantity: u32) -> LedgerResult<Ticket> {
        self.transact("edit_ticket", |draft| {
            let state = &mut draft.state;
            state.lifecycle.ensure_mutable()?;
            let airline_id = owning_airline(&state.tickets, ticket_id)?;
            require_airline_owner(&state.airlines, airline_id, caller)?;

            let ticket = state.tickets.edit(ticket_id, price, quantity)?.clone();

            info!(ticket_id, airline_id, price, quantity, "Ticket updated");
            draft.emit(LedgerEvent::TicketUpdated {
                ticket_id,
                airline_id,
                price,
                quantity,
            });
            Ok(ticket)
        })
    }

    pub fn remove_ticket(&self, caller: &Address, ticket_id: TicketId) -> LedgerResult<()> {
        self.transact("remove_ticket", |draft| {
            let state = &mut draft.state;
            state.lifecycle.ensure_mutable()?;
            let airline_id = owning_airline(&state.tickets, ticket_id)?;
            require_airline_owner(&state.airlines, airline_id, caller)?;

            state.tickets.remove(ticket_id)?;

            info!(ticket_id, airline_id, "Ticket removed");
            draft.emit(LedgerEvent::TicketRemoved { ticket_id, airline_id });
            Ok(())
        })
    }

    pub fn ticket(&self, ticket_id: TicketId) -> Option<Ticket> {
        self.read(|state| state.tickets.get(ticket_id).cloned())
    }

    pub fn ticket_by_airline(&self, airline_id: AirlineId, index: usize) -> Option<Ticket> {
        self.read(|state| state.tickets.by_airline(airline_id, index).cloned())
    }

    pub fn tickets_count(&self, airline_id: AirlineId) -> usize {
        self.read(|state| state.tickets.count_for(airline_id))
    }

    pub fn tickets_of(&self, airline_id: AirlineId) -> Vec<Ticket> {
        self.read(|state| state.tickets.for_airline(airline_id).cloned().collect())
    }

    pub fn last_ticket_id(&self) -> TicketId {
        self.read(|state| state.tickets.last_id())
    }

    // ---- search ----

    pub fn find_direct_flights(&self, from: &str, to: &str, when: Timestamp) -> Vec<TicketId> {
        self.read(|state| self.search(&state.tickets).find_direct_flights(from, to, when))
    }

    pub fn find_one_stop_flights(&self, from: &str, to: &str, when: Timestamp) -> Vec<Itinerary> {
        self.read(|state| self.search(&state.tickets).find_one_stop_flights(from, to, when))
    }

    pub fn itineraries(
        &self,
        from: &str,
        to: &str,
        when: Timestamp,
        direct_only: bool,
        order: SortOrder,
    ) -> Vec<ItineraryView> {
        self.read(|state| {
            self.search(&state.tickets)
                .itineraries(from, to, when, direct_only, order)
        })
    }

    fn search<'a>(&self, tickets: &'a TicketLedger) -> RouteSearch<'a> {
        RouteSearch::new(tickets, self.settings.max_search_results)
    }

    // ---- booking and settlement ----

    /// Books one or two legs for the caller, paying `request.paid`. Seats,
    /// payouts to each airline owner, the change and the booking record
    /// commit together or not at all.
    pub fn book_flight(&self, caller: &Address, request: BookingRequest) -> LedgerResult<BookingReceipt> {
        self.transact("book_flight", |draft| {
            let state = &mut draft.state;
            state.lifecycle.ensure_mutable()?;

            let plan = SettlementPlan::prepare(
                &mut state.tickets,
                &state.airlines,
                &request.ticket_ids,
                caller,
                &self.address,
                request.paid,
            )?;

            state.last_purchase_id += 1;
            let purchase_id = state.last_purchase_id;
            let record = BookingRecord {
                purchase_id,
                legs: plan.legs.clone(),
                buyer: caller.clone(),
                first_name: request.first_name,
                last_name: request.last_name,
                total: plan.total,
                booked_at: Utc::now(),
            };
            let passenger = record.passenger();
            state.bookings.push(record);

            for leg in &plan.legs {
                draft.emit(LedgerEvent::TicketPurchased {
                    purchase_id,
                    ticket_id: leg.ticket_id,
                    airline_id: leg.airline_id,
                    buyer: caller.clone(),
                    price: leg.price,
                    passenger: passenger.clone(),
                });
            }
            info!(
                purchase_id,
                buyer = %caller,
                legs = plan.legs.len(),
                total = plan.total,
                change = plan.change,
                "Booking staged"
            );

            let receipt = BookingReceipt {
                purchase_id,
                total: plan.disbursed(),
                change: plan.change,
            };
            draft.transfers.extend(plan.transfers);
            Ok(receipt)
        })
    }

    /// The buyer's bookings, newest first.
    pub fn purchases_of(&self, buyer: &Address) -> Vec<BookingRecord> {
        self.read(|state| {
            finance::purchases_of(&state.bookings, buyer)
                .into_iter()
                .cloned()
                .collect()
        })
    }

    /// Sales carry passenger names, so only the airline's owner or the
    /// administrator may read them.
    pub fn sales_of(&self, caller: &Address, airline_id: AirlineId) -> LedgerResult<Vec<SaleEntry>> {
        self.read(|state| {
            require_owner_or_admin(state, airline_id, caller)?;
            Ok(finance::sales_of(&state.bookings, airline_id))
        })
    }

    pub fn settlement_report(&self, caller: &Address, airline_id: AirlineId) -> LedgerResult<SettlementReport> {
        self.read(|state| {
            require_owner_or_admin(state, airline_id, caller)?;
            Ok(finance::settlement_report(&state.bookings, airline_id))
        })
    }

    // ---- transaction plumbing ----

    fn read<T>(&self, query: impl FnOnce(&LedgerState) -> T) -> T {
        // Commits are a single assignment, so a poisoned lock still guards a
        // consistent state.
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        query(&state)
    }

    fn transact<T>(
        &self,
        operation: &'static str,
        apply: impl FnOnce(&mut Draft) -> LedgerResult<T>,
    ) -> LedgerResult<T> {
        let mut state = self
            .state
            .write()
            .map_err(|_| LedgerError::Internal("ledger state lock poisoned".to_string()))?;

        let mut draft = Draft {
            state: state.clone(),
            transfers: Vec::new(),
            events: Vec::new(),
        };

        let output = match apply(&mut draft) {
            Ok(output) => output,
            Err(err) => {
                debug!(operation, error = %err, "Operation rejected");
                return Err(err);
            }
        };

        if !draft.transfers.is_empty() {
            if let Err(err) = self.rail.settle(&draft.transfers) {
                warn!(operation, error = %err, "Settlement failed, draft discarded");
                return Err(err.into());
            }
        }

        *state = draft.state;
        // Published under the lock so sequence numbers follow commit order.
        for event in draft.events {
            self.publish(event);
        }
        Ok(output)
    }

    fn publish(&self, event: LedgerEvent) {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(sequence, kind = event.kind(), "Publishing ledger event");
        // No subscribers is fine.
        let _ = self
            .events
            .send(EventEnvelope::new(self.address.clone(), sequence, event));
    }
}

fn owning_airline(tickets: &TicketLedger, ticket_id: TicketId) -> LedgerResult<AirlineId> {
    tickets
        .get(ticket_id)
        .map(|ticket| ticket.airline_id)
        .ok_or_else(|| LedgerError::NotFound(format!("ticket {}", ticket_id)))
}

fn require_owner_or_admin(state: &LedgerState, airline_id: AirlineId, caller: &Address) -> LedgerResult<()> {
    if state.access.is_admin(caller) {
        return Ok(());
    }
    require_airline_owner(&state.airlines, airline_id, caller)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use skyledger_core::payment::BalanceBook;
    use skyledger_shared::Masked;

    const ETHER: Amount = 1_000_000_000_000_000_000;
    // 2018-12-10 00:00:00 UTC
    const DAY: Timestamp = 1_544_400_000;
    const HOUR: Timestamp = 3_600;

    fn addr(s: &str) -> Address {
        Address::new(s)
    }

    fn admin() -> Address {
        addr("0xadmin")
    }

    fn fixture() -> (Ledger, Arc<BalanceBook>) {
        let rail = Arc::new(BalanceBook::with_balances([
            (addr("0xbuyer"), 10 * ETHER),
            (addr("0xother"), 10 * ETHER),
        ]));
        let (events, _) = broadcast::channel(64);
        let ledger = Ledger::new(addr("ledger"), admin(), rail.clone(), LedgerSettings::default(), events);
        (ledger, rail)
    }

    fn ticket(airline_id: AirlineId, from: &str, to: &str, price: Amount, dep_h: i64, arr_h: i64) -> NewTicket {
        NewTicket {
            airline_id,
            from: from.to_string(),
            to: to.to_string(),
            price,
            quantity: 150,
            departure: DAY + dep_h * HOUR,
            arrival: DAY + arr_h * HOUR,
        }
    }

    fn booking(ticket_ids: Vec<TicketId>, paid: Amount) -> BookingRequest {
        BookingRequest {
            ticket_ids,
            first_name: Masked::from("Jane"),
            last_name: Masked::from("Doe"),
            paid,
        }
    }

    /// Bangkok→Dubai and Dubai→London on separate airlines, London→New York on a third.
    fn world_tour(ledger: &Ledger) -> (TicketId, TicketId, TicketId) {
        for (name, owner) in [("Emirates Air", "0xemirates"), ("Sky Air", "0xsky"), ("Ocean Air", "0xocean")] {
            ledger.add_airline(&admin(), name.to_string(), addr(owner), None).unwrap();
        }
        let l1 = ledger
            .add_ticket(&addr("0xemirates"), ticket(1, "Bangkok", "Dubai", ETHER, 10, 15))
            .unwrap();
        let l2 = ledger
            .add_ticket(&addr("0xsky"), ticket(2, "Dubai", "London", ETHER / 2, 17, 23))
            .unwrap();
        let l3 = ledger
            .add_ticket(&addr("0xocean"), ticket(3, "London", "New York", 2 * ETHER, 31, 39))
            .unwrap();
        (l1, l2, l3)
    }

    #[test]
    fn test_duplicate_airline_name() {
        let (ledger, _) = fixture();

        let id = ledger
            .add_airline(&admin(), "Test Airline".to_string(), addr("0x2"), None)
            .unwrap();
        let duplicate = ledger.add_airline(&admin(), "Test Airline".to_string(), addr("0x3"), None);

        assert!(matches!(duplicate, Err(LedgerError::AlreadyExists(_))));
        assert_eq!(ledger.airlines_count(), 1);
        assert_eq!(ledger.airline(id).unwrap().logo_ref, ledger.settings().default_logo_ref);
        assert!(ledger.airline_exists("Test Airline"));
    }

    #[test]
    fn test_only_admin_manages_airlines() {
        let (ledger, _) = fixture();
        let intruder = addr("0xintruder");

        assert!(matches!(
            ledger.add_airline(&intruder, "Rogue Air".to_string(), intruder.clone(), None),
            Err(LedgerError::Unauthorized(_))
        ));

        let id = ledger
            .add_airline(&admin(), "Test Airline".to_string(), addr("0x2"), None)
            .unwrap();
        let update = AirlineUpdate {
            name: "Hijacked".to_string(),
            owner: intruder.clone(),
            logo_ref: None,
        };
        assert!(matches!(
            ledger.edit_airline(&intruder, id, update),
            Err(LedgerError::Unauthorized(_))
        ));
        assert!(matches!(ledger.remove_airline(&intruder, id), Err(LedgerError::Unauthorized(_))));
        assert_eq!(ledger.airline(id).unwrap().owner, addr("0x2"));
    }

    #[test]
    fn test_ticket_edit_by_owner_only() {
        let (ledger, _) = fixture();
        let owner = addr("0x2");
        let airline_id = ledger
            .add_airline(&admin(), "Test Airline".to_string(), owner.clone(), None)
            .unwrap();
        let ticket_id = ledger
            .add_ticket(
                &owner,
                NewTicket {
                    airline_id,
                    from: "Hong Kong".to_string(),
                    to: "Denpasar".to_string(),
                    price: ETHER / 10,
                    quantity: 150,
                    departure: 1_536_573_600,
                    arrival: 1_536_589_800,
                },
            )
            .unwrap();

        let edited = ledger.edit_ticket(&owner, ticket_id, ETHER / 5, 100).unwrap();
        assert_eq!(edited.price, ETHER / 5);
        assert_eq!(edited.quantity, 100);

        let denied = ledger.edit_ticket(&addr("0x3"), ticket_id, 1, 1);
        assert!(matches!(denied, Err(LedgerError::Unauthorized(_))));
        assert_eq!(ledger.ticket(ticket_id).unwrap().price, ETHER / 5);

        assert!(matches!(
            ledger.remove_ticket(&addr("0x3"), ticket_id),
            Err(LedgerError::Unauthorized(_))
        ));
        assert!(matches!(ledger.remove_ticket(&admin(), ticket_id), Err(LedgerError::Unauthorized(_))));
        assert!(ledger.ticket(ticket_id).is_some());
        assert_eq!(ledger.tickets_count(airline_id), 1);

        assert!(matches!(
            ledger.add_ticket(&addr("0x3"), ticket(airline_id, "A", "B", 1, 0, 1)),
            Err(LedgerError::Unauthorized(_))
        ));
        assert!(matches!(
            ledger.edit_ticket(&owner, 99, 1, 1),
            Err(LedgerError::NotFound(_))
        ));
        assert!(matches!(
            ledger.add_ticket(&owner, ticket(42, "A", "B", 1, 0, 1)),
            Err(LedgerError::NotFound(_))
        ));
    }

    #[test]
    fn test_one_stop_search_and_booking_with_exact_refund() {
        let (ledger, rail) = fixture();
        let (l1, l2, _) = world_tour(&ledger);
        let buyer = addr("0xbuyer");

        let itineraries = ledger.find_one_stop_flights("Bangkok", "London", DAY);
        assert_eq!(itineraries, vec![Itinerary::OneStop(l1, l2)]);
        assert_eq!(ledger.find_direct_flights("Dubai", "London", DAY), vec![l2]);

        let receipt = ledger.book_flight(&buyer, booking(vec![l1, l2], 2 * ETHER)).unwrap();

        assert_eq!(receipt.purchase_id, 1);
        assert_eq!(receipt.total, ETHER + ETHER / 2);
        assert_eq!(receipt.change, ETHER / 2);
        assert_eq!(rail.balance_of(&buyer), 10 * ETHER - ETHER - ETHER / 2);
        assert_eq!(rail.balance_of(&addr("0xemirates")), ETHER);
        assert_eq!(rail.balance_of(&addr("0xsky")), ETHER / 2);
        assert_eq!(ledger.balance(), 0);
        assert_eq!(ledger.ticket(l1).unwrap().quantity, 149);
        assert_eq!(ledger.ticket(l2).unwrap().quantity, 149);

        let purchases = ledger.purchases_of(&buyer);
        assert_eq!(purchases.len(), 1);
        assert_eq!(purchases[0].ticket_ids(), vec![l1, l2]);
        assert_eq!(purchases[0].first_name.expose(), "Jane");
    }

    fn assert_untouched(ledger: &Ledger, rail: &BalanceBook, before: &LedgerSnapshot) {
        assert_eq!(&ledger.snapshot(), before);
        assert_eq!(rail.balance_of(&addr("0xbuyer")), 10 * ETHER);
        assert_eq!(rail.balance_of(&addr("0xemirates")), 0);
        assert_eq!(rail.balance_of(&addr("0xsky")), 0);
        assert_eq!(ledger.balance(), 0);
    }

    #[test]
    fn test_failed_bookings_leave_no_trace() {
        let (ledger, rail) = fixture();
        let (l1, l2, _) = world_tour(&ledger);
        let buyer = addr("0xbuyer");
        let before = ledger.snapshot();

        let unknown = ledger.book_flight(&buyer, booking(vec![l1, 77], 5 * ETHER));
        assert!(matches!(unknown, Err(LedgerError::NotFound(_))));
        assert_untouched(&ledger, &rail, &before);

        let short = ledger.book_flight(&buyer, booking(vec![l1, l2], ETHER));
        assert_eq!(
            short,
            Err(LedgerError::InsufficientPayment {
                required: ETHER + ETHER / 2,
                paid: ETHER,
            })
        );
        assert_untouched(&ledger, &rail, &before);

        rail.set_rejecting(&addr("0xsky"), true).unwrap();
        let rejected = ledger.book_flight(&buyer, booking(vec![l1, l2], 2 * ETHER));
        assert!(matches!(rejected, Err(LedgerError::TransferRejected(_))));
        assert_untouched(&ledger, &rail, &before);

        let broke = ledger.book_flight(&addr("0xnobody"), booking(vec![l1], ETHER));
        assert!(matches!(broke, Err(LedgerError::TransferRejected(_))));
        assert_untouched(&ledger, &rail, &before);
    }

    #[test]
    fn test_same_ticket_twice_needs_two_seats() {
        let (ledger, _) = fixture();
        ledger
            .add_airline(&admin(), "Test Airline".to_string(), addr("0x2"), None)
            .unwrap();
        let mut last_seat = ticket(1, "A", "B", 10, 0, 1);
        last_seat.quantity = 1;
        let id = ledger.add_ticket(&addr("0x2"), last_seat).unwrap();

        let result = ledger.book_flight(&addr("0xbuyer"), booking(vec![id, id], 100));

        assert_eq!(result, Err(LedgerError::SoldOut(id)));
        assert_eq!(ledger.ticket(id).unwrap().quantity, 1);

        ledger.book_flight(&addr("0xbuyer"), booking(vec![id], 10)).unwrap();
        assert_eq!(
            ledger.book_flight(&addr("0xbuyer"), booking(vec![id], 10)),
            Err(LedgerError::SoldOut(id))
        );
        // Exhausted tickets stay listed but drop out of search.
        assert_eq!(ledger.tickets_count(1), 1);
        assert!(ledger.find_direct_flights("A", "B", DAY).is_empty());
    }

    #[test]
    fn test_pause_blocks_mutations_but_not_reads() {
        let (ledger, _) = fixture();
        let (l1, _, _) = world_tour(&ledger);

        assert!(matches!(ledger.pause(&addr("0xemirates")), Err(LedgerError::Unauthorized(_))));
        ledger.pause(&admin()).unwrap();
        assert!(matches!(ledger.pause(&admin()), Err(LedgerError::InvalidState(_))));

        assert_eq!(
            ledger.add_airline(&admin(), "Late Air".to_string(), addr("0x9"), None),
            Err(LedgerError::SystemPaused)
        );
        assert_eq!(ledger.remove_airline(&admin(), 1), Err(LedgerError::SystemPaused));
        let rename = AirlineUpdate {
            name: "Renamed Air".to_string(),
            owner: addr("0xemirates"),
            logo_ref: None,
        };
        assert_eq!(ledger.edit_airline(&admin(), 1, rename), Err(LedgerError::SystemPaused));
        assert_eq!(ledger.remove_ticket(&addr("0xemirates"), l1), Err(LedgerError::SystemPaused));
        assert_eq!(
            ledger.add_ticket(&addr("0xemirates"), ticket(1, "A", "B", 1, 0, 1)),
            Err(LedgerError::SystemPaused)
        );
        assert_eq!(
            ledger.edit_ticket(&addr("0xemirates"), l1, 1, 1),
            Err(LedgerError::SystemPaused)
        );
        assert_eq!(
            ledger.book_flight(&addr("0xbuyer"), booking(vec![l1], ETHER)),
            Err(LedgerError::SystemPaused)
        );

        assert_eq!(ledger.airlines_count(), 3);
        assert_eq!(ledger.airline(1).unwrap().name, "Emirates Air");
        assert!(ledger.ticket(l1).is_some());
        assert_eq!(ledger.find_direct_flights("Bangkok", "Dubai", DAY), vec![l1]);
        assert_eq!(ledger.lifecycle_state(), LifecycleState::Paused);

        ledger.transfer_ownership(&admin(), addr("0xnext")).unwrap();
        assert!(ledger.unpause(&admin()).is_err());
        ledger.unpause(&addr("0xnext")).unwrap();
        assert!(matches!(ledger.unpause(&addr("0xnext")), Err(LedgerError::InvalidState(_))));
        assert!(ledger.book_flight(&addr("0xbuyer"), booking(vec![l1], ETHER)).is_ok());
    }

    #[test]
    fn test_destroy_releases_funds_and_wipes_tables() {
        let (ledger, rail) = fixture();
        let (l1, _, _) = world_tour(&ledger);
        rail.credit(&addr("ledger"), 3 * ETHER).unwrap();

        assert!(matches!(ledger.destroy(&addr("0xbuyer")), Err(LedgerError::Unauthorized(_))));
        let released = ledger.destroy(&admin()).unwrap();

        assert_eq!(released, 3 * ETHER);
        assert_eq!(rail.balance_of(&admin()), 3 * ETHER);
        assert_eq!(ledger.balance(), 0);
        assert_eq!(ledger.lifecycle_state(), LifecycleState::Destroyed);

        assert!(ledger.ticket(l1).is_none());
        assert!(ledger.airline(1).is_none());
        assert!(!ledger.airline_exists("Sky Air"));
        assert_eq!(ledger.airlines_count(), 0);
        assert_eq!(ledger.tickets_count(1), 0);

        assert!(matches!(
            ledger.add_airline(&admin(), "Phoenix Air".to_string(), addr("0x2"), None),
            Err(LedgerError::InvalidState(_))
        ));
        assert!(matches!(ledger.pause(&admin()), Err(LedgerError::InvalidState(_))));
        assert!(matches!(ledger.destroy(&admin()), Err(LedgerError::InvalidState(_))));
        assert!(matches!(
            ledger.transfer_ownership(&admin(), addr("0x2")),
            Err(LedgerError::InvalidState(_))
        ));
    }

    #[test]
    fn test_events_follow_commit_order() {
        let (ledger, _) = fixture();
        let mut events = ledger.subscribe();

        let (l1, l2, _) = world_tour(&ledger);
        let _ = ledger.add_airline(&addr("0xnobody"), "Nope Air".to_string(), addr("0x1"), None);
        ledger.book_flight(&addr("0xbuyer"), booking(vec![l1, l2], 2 * ETHER)).unwrap();

        let received: Vec<EventEnvelope> = std::iter::from_fn(|| events.try_recv().ok()).collect();
        let kinds: Vec<&str> = received.iter().map(|envelope| envelope.event.kind()).collect();
        assert_eq!(
            kinds,
            vec![
                "airline_added",
                "airline_added",
                "airline_added",
                "ticket_added",
                "ticket_added",
                "ticket_added",
                "ticket_purchased",
                "ticket_purchased",
            ]
        );
        let sequences: Vec<u64> = received.iter().map(|envelope| envelope.sequence).collect();
        assert_eq!(sequences, (1..=8).collect::<Vec<_>>());
        assert!(received.iter().all(|envelope| envelope.instance == addr("ledger")));
    }

    #[test]
    fn test_sales_and_report_visibility() {
        let (ledger, _) = fixture();
        let (l1, l2, _) = world_tour(&ledger);
        ledger.book_flight(&addr("0xbuyer"), booking(vec![l1, l2], 2 * ETHER)).unwrap();
        ledger.book_flight(&addr("0xother"), booking(vec![l2], ETHER)).unwrap();

        let sales = ledger.sales_of(&addr("0xsky"), 2).unwrap();
        assert_eq!(sales.iter().map(|s| s.purchase_id).collect::<Vec<_>>(), vec![2, 1]);

        let report = ledger.settlement_report(&admin(), 2).unwrap();
        assert_eq!(report.tickets_sold, 2);
        assert_eq!(report.gross_revenue, ETHER);

        assert!(matches!(ledger.sales_of(&addr("0xbuyer"), 2), Err(LedgerError::Unauthorized(_))));
        assert_eq!(
            ledger.role_of(&addr("0xsky")),
            Role::AirlineOwner { airline_ids: vec![2] }
        );
        assert_eq!(ledger.role_of(&admin()), Role::Admin);
        assert_eq!(ledger.role_of(&addr("0xbuyer")), Role::Customer);
    }

    #[test]
    fn test_snapshot_restore_keeps_counters() {
        let (ledger, rail) = fixture();
        let (l1, _, l3) = world_tour(&ledger);
        ledger.book_flight(&addr("0xbuyer"), booking(vec![l1], ETHER)).unwrap();
        ledger.remove_ticket(&addr("0xocean"), l3).unwrap();

        let snapshot = ledger.snapshot();
        let (events, _) = broadcast::channel(8);
        let restored = Ledger::restore(snapshot.clone(), rail, LedgerSettings::default(), events).unwrap();

        assert_eq!(restored.snapshot(), snapshot);
        assert_eq!(restored.address(), &addr("ledger"));
        let next = restored
            .add_ticket(&addr("0xocean"), ticket(3, "London", "Paris", 1, 40, 41))
            .unwrap();
        assert_eq!(next, l3 + 1);
        let receipt = restored.book_flight(&addr("0xbuyer"), booking(vec![next], 1)).unwrap();
        assert_eq!(receipt.purchase_id, 2);
    }

    proptest! {
        #[test]
        fn prop_inventory_is_conserved(
            quantities in proptest::collection::vec(1u32..4, 3),
            orders in proptest::collection::vec((0usize..3, proptest::option::of(0usize..3), 0u128..400), 0..30),
        ) {
            let (ledger, rail) = fixture();
            ledger.add_airline(&admin(), "Sky Air".to_string(), addr("0xsky"), None).unwrap();
            let mut ids = Vec::new();
            for (i, quantity) in quantities.iter().enumerate() {
                let mut new = ticket(1, "A", "B", 100 + i as Amount * 10, 0, 1);
                new.quantity = *quantity;
                ids.push(ledger.add_ticket(&addr("0xsky"), new).unwrap());
            }

            for (first, second, paid) in orders {
                let mut legs = vec![ids[first]];
                legs.extend(second.map(|i| ids[i]));
                let _ = ledger.book_flight(&addr("0xbuyer"), booking(legs, paid));
            }

            let purchases = ledger.purchases_of(&addr("0xbuyer"));
            for (id, initial) in ids.iter().zip(&quantities) {
                let sold = purchases
                    .iter()
                    .flat_map(|record| record.legs.iter())
                    .filter(|leg| leg.ticket_id == *id)
                    .count() as u32;
                prop_assert_eq!(ledger.ticket(*id).unwrap().quantity + sold, *initial);
            }

            let spent: Amount = purchases.iter().map(|record| record.total).sum();
            prop_assert_eq!(rail.balance_of(&addr("0xsky")), spent);
            prop_assert_eq!(rail.balance_of(&addr("0xbuyer")), 10 * ETHER - spent);
            prop_assert_eq!(ledger.balance(), 0);
        }

        #[test]
        fn prop_orphaned_tickets_stay_visible_but_unsellable(
            tickets_per_airline in proptest::collection::vec(1usize..4, 1..5),
            removed in proptest::collection::vec(any::<bool>(), 5),
        ) {
            let (ledger, _) = fixture();
            let mut owned = Vec::new();
            for (index, count) in tickets_per_airline.iter().enumerate() {
                let owner = addr(&format!("0xowner{}", index));
                let airline_id = ledger
                    .add_airline(&admin(), format!("Airline {}", index), owner.clone(), None)
                    .unwrap();
                for _ in 0..*count {
                    let id = ledger.add_ticket(&owner, ticket(airline_id, "A", "B", 10, 1, 2)).unwrap();
                    owned.push((id, airline_id, owner.clone()));
                }
            }

            for airline_id in 1..=tickets_per_airline.len() as AirlineId {
                if removed[airline_id as usize - 1] {
                    ledger.remove_airline(&admin(), airline_id).unwrap();
                }
            }

            let searchable = ledger.find_direct_flights("A", "B", DAY);
            for (ticket_id, airline_id, owner) in owned {
                prop_assert!(ledger.ticket(ticket_id).is_some());
                prop_assert!(searchable.contains(&ticket_id) || searchable.len() == ledger.settings().max_search_results);
                let orphan = removed[airline_id as usize - 1];
                if orphan {
                    prop_assert!(ledger.airline(airline_id).is_none());
                    prop_assert!(matches!(
                        ledger.book_flight(&addr("0xbuyer"), booking(vec![ticket_id], 10)),
                        Err(LedgerError::NotFound(_))
                    ));
                    prop_assert!(matches!(
                        ledger.edit_ticket(&owner, ticket_id, 1, 1),
                        Err(LedgerError::NotFound(_))
                    ));
                    prop_assert_eq!(ledger.ticket(ticket_id).unwrap().quantity, 150);
                } else {
                    prop_assert!(ledger.book_flight(&addr("0xbuyer"), booking(vec![ticket_id], 10)).is_ok());
                }
            }
        }
    }
}
