use chrono::{DateTime, Utc};
use serde::Serialize;
use skyledger_core::{Address, AirlineId, Amount, PurchaseId, TicketId};
use skyledger_shared::Masked;

use crate::models::BookingRecord;

/// One sold seat, as shown to the airline that sold it.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SaleEntry {
    pub purchase_id: PurchaseId,
    pub ticket_id: TicketId,
    pub price: Amount,
    pub buyer: Address,
    pub passenger: Masked<String>,
    pub booked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SettlementReport {
    pub airline_id: AirlineId,
    pub tickets_sold: u64,
    pub gross_revenue: Amount,
    pub purchases: u64,
    pub report_date: DateTime<Utc>,
}

/// Every leg the airline sold, newest purchase first.
pub fn sales_of(bookings: &[BookingRecord], airline_id: AirlineId) -> Vec<SaleEntry> {
    bookings
        .iter()
        .rev()
        .flat_map(|record| {
            record
                .legs
                .iter()
                .filter(move |leg| leg.airline_id == airline_id)
                .map(move |leg| SaleEntry {
                    purchase_id: record.purchase_id,
                    ticket_id: leg.ticket_id,
                    price: leg.price,
                    buyer: record.buyer.clone(),
                    passenger: record.passenger(),
                    booked_at: record.booked_at,
                })
        })
        .collect()
}

/// Seats sold and gross revenue disbursed to one airline.
pub fn settlement_report(bookings: &[BookingRecord], airline_id: AirlineId) -> SettlementReport {
    let mut tickets_sold = 0;
    let mut gross_revenue: Amount = 0;
    let mut purchases = 0;

    for record in bookings {
        let mut counted = false;
        for leg in record.legs.iter().filter(|leg| leg.airline_id == airline_id) {
            tickets_sold += 1;
            gross_revenue = gross_revenue.saturating_add(leg.price);
            counted = true;
        }
        if counted {
            purchases += 1;
        }
    }

    SettlementReport {
        airline_id,
        tickets_sold,
        gross_revenue,
        purchases,
        report_date: Utc::now(),
    }
}

/// A buyer's bookings, newest first.
pub fn purchases_of<'a>(bookings: &'a [BookingRecord], buyer: &Address) -> Vec<&'a BookingRecord> {
    bookings
        .iter()
        .rev()
        .filter(|record| &record.buyer == buyer)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BookedLeg;

    fn record(purchase_id: PurchaseId, buyer: &str, legs: &[(TicketId, AirlineId, Amount)]) -> BookingRecord {
        let legs: Vec<BookedLeg> = legs
            .iter()
            .map(|&(ticket_id, airline_id, price)| BookedLeg { ticket_id, airline_id, price })
            .collect();
        BookingRecord {
            purchase_id,
            total: legs.iter().map(|leg| leg.price).sum(),
            legs,
            buyer: Address::new(buyer),
            first_name: Masked::from("Jane"),
            last_name: Masked::from("Doe"),
            booked_at: Utc::now(),
        }
    }

    #[test]
    fn test_sales_newest_first_and_filtered() {
        let bookings = vec![
            record(1, "0xa", &[(1, 7, 100)]),
            record(2, "0xb", &[(1, 7, 100), (4, 8, 50)]),
            record(3, "0xa", &[(4, 8, 50)]),
        ];

        let sales = sales_of(&bookings, 7);

        assert_eq!(sales.iter().map(|s| s.purchase_id).collect::<Vec<_>>(), vec![2, 1]);
        assert_eq!(sales[0].passenger.expose(), "Jane Doe");
        assert!(sales_of(&bookings, 99).is_empty());
    }

    #[test]
    fn test_settlement_report_totals() {
        let bookings = vec![
            record(1, "0xa", &[(1, 7, 100), (2, 7, 30)]),
            record(2, "0xb", &[(4, 8, 50)]),
            record(3, "0xc", &[(1, 7, 100)]),
        ];

        let report = settlement_report(&bookings, 7);

        assert_eq!(report.tickets_sold, 3);
        assert_eq!(report.gross_revenue, 230);
        assert_eq!(report.purchases, 2);
    }

    #[test]
    fn test_purchases_of_buyer() {
        let bookings = vec![
            record(1, "0xa", &[(1, 7, 100)]),
            record(2, "0xb", &[(1, 7, 100)]),
            record(3, "0xa", &[(4, 8, 50)]),
        ];

        let mine = purchases_of(&bookings, &Address::new("0xa"));

        assert_eq!(mine.iter().map(|r| r.purchase_id).collect::<Vec<_>>(), vec![3, 1]);
    }
}
