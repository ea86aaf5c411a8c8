use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use skyledger_core::{Amount, TicketId, Timestamp};
use std::collections::HashMap;

use crate::ticket::{Ticket, TicketLedger};

pub const SEARCH_WINDOW_SECONDS: i64 = 86_400;
pub const DEFAULT_MAX_RESULTS: usize = 20;

/// Departure window of one search day: `[start, start + 86400)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchWindow {
    start: Timestamp,
}

impl SearchWindow {
    pub fn starting_at(start: Timestamp) -> Self {
        Self { start }
    }

    /// Window covering a calendar day, starting at UTC midnight.
    pub fn on(date: NaiveDate) -> Self {
        Self {
            start: date.and_time(NaiveTime::MIN).and_utc().timestamp(),
        }
    }

    pub fn start(&self) -> Timestamp {
        self.start
    }

    /// Widened to i128 so any pair of timestamps compares without overflow.
    pub fn contains(&self, timestamp: Timestamp) -> bool {
        let offset = i128::from(timestamp) - i128::from(self.start);
        (0..i128::from(SEARCH_WINDOW_SECONDS)).contains(&offset)
    }
}

/// A search hit: either one ticket or two connecting tickets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Itinerary {
    Direct(TicketId),
    OneStop(TicketId, TicketId),
}

impl Itinerary {
    pub fn ticket_ids(&self) -> Vec<TicketId> {
        match *self {
            Itinerary::Direct(id) => vec![id],
            Itinerary::OneStop(first, second) => vec![first, second],
        }
    }

    pub fn stops(&self) -> u8 {
        match self {
            Itinerary::Direct(_) => 0,
            Itinerary::OneStop(..) => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    #[default]
    Cheapest,
    Shortest,
}

/// An itinerary with its legs resolved, as shown to a buyer.
#[derive(Debug, Clone, Serialize)]
pub struct ItineraryView {
    pub itinerary: Itinerary,
    pub stops: u8,
    pub legs: Vec<Ticket>,
    pub total_price: Amount,
    pub departure: Timestamp,
    pub arrival: Timestamp,
    pub duration_seconds: i64,
    pub layover_seconds: Option<i64>,
}

impl ItineraryView {
    fn build(itinerary: Itinerary, legs: Vec<Ticket>) -> Option<Self> {
        let first = legs.first()?;
        let last = legs.last()?;
        let total_price = legs
            .iter()
            .try_fold(0 as Amount, |total, leg| total.checked_add(leg.price))?;
        let layover_seconds = match legs.as_slice() {
            [first, second] => Some(second.departure.saturating_sub(first.arrival)),
            _ => None,
        };

        Some(Self {
            itinerary,
            stops: itinerary.stops(),
            total_price,
            departure: first.departure,
            arrival: last.arrival,
            duration_seconds: last.arrival.saturating_sub(first.departure),
            layover_seconds,
            legs,
        })
    }
}

/// Stateless route queries over the ticket set. Results are deterministic for
/// a fixed ledger state: ascending id of the first leg, then of the second.
pub struct RouteSearch<'a> {
    tickets: &'a TicketLedger,
    max_results: usize,
}

impl<'a> RouteSearch<'a> {
    pub fn new(tickets: &'a TicketLedger, max_results: usize) -> Self {
        Self {
            tickets,
            max_results,
        }
    }

    /// Bookable tickets from `from` to `to` departing within the day starting at `when`.
    pub fn find_direct_flights(&self, from: &str, to: &str, when: Timestamp) -> Vec<TicketId> {
        let window = SearchWindow::starting_at(when);
        self.tickets
            .iter()
            .filter(|ticket| ticket.from == from && ticket.to == to)
            .filter(|ticket| ticket.is_available() && window.contains(ticket.departure))
            .map(|ticket| ticket.id)
            .take(self.max_results)
            .collect()
    }

    /// Direct and one-connection itineraries in a single pass. The first leg
    /// must depart inside the window; the second may leave any time at or
    /// after the first one lands.
    pub fn find_one_stop_flights(&self, from: &str, to: &str, when: Timestamp) -> Vec<Itinerary> {
        let window = SearchWindow::starting_at(when);
        let mut results = Vec::new();
        if self.max_results == 0 {
            return results;
        }

        // Second-leg candidates bucketed by origin; buckets stay in id order.
        let mut connections: HashMap<&str, Vec<&Ticket>> = HashMap::new();
        for ticket in self.tickets.iter().filter(|t| t.to == to && t.is_available()) {
            connections.entry(ticket.from.as_str()).or_default().push(ticket);
        }

        let first_legs = self
            .tickets
            .iter()
            .filter(|t| t.from == from && t.is_available() && window.contains(t.departure));

        for first in first_legs {
            if first.to == to {
                results.push(Itinerary::Direct(first.id));
                if results.len() == self.max_results {
                    return results;
                }
                continue;
            }

            let Some(candidates) = connections.get(first.to.as_str()) else {
                continue;
            };
            for second in candidates.iter().filter(|second| second.departure >= first.arrival) {
                results.push(Itinerary::OneStop(first.id, second.id));
                if results.len() == self.max_results {
                    return results;
                }
            }
        }

        results
    }

    /// Resolved itineraries, sorted for display. Ties keep search order.
    pub fn itineraries(
        &self,
        from: &str,
        to: &str,
        when: Timestamp,
        direct_only: bool,
        order: SortOrder,
    ) -> Vec<ItineraryView> {
        let hits: Vec<Itinerary> = if direct_only {
            self.find_direct_flights(from, to, when)
                .into_iter()
                .map(Itinerary::Direct)
                .collect()
        } else {
            self.find_one_stop_flights(from, to, when)
        };

        let mut views: Vec<ItineraryView> = hits
            .into_iter()
            .filter_map(|itinerary| {
                let legs = itinerary
                    .ticket_ids()
                    .into_iter()
                    .map(|id| self.tickets.get(id).cloned())
                    .collect::<Option<Vec<_>>>()?;
                ItineraryView::build(itinerary, legs)
            })
            .collect();

        match order {
            SortOrder::Cheapest => views.sort_by_key(|view| view.total_price),
            SortOrder::Shortest => views.sort_by_key(|view| view.duration_seconds),
        }
        views
    }
}
