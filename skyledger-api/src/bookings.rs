use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use skyledger_core::identity::Role;
use skyledger_core::TicketId;
use skyledger_order::{BookingReceipt, BookingRecord, BookingRequest};
use skyledger_shared::Masked;
use tracing::info;

use crate::{auth::Caller, error::AppError, non_negative_amount, state::AppState};

#[derive(Debug, Deserialize)]
pub struct BookFlightRequest {
    pub ticket_ids: Vec<TicketId>,
    pub first_name: Masked<String>,
    pub last_name: Masked<String>,
    /// Funds attached to the call; anything above the total comes back.
    pub paid: i128,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/bookings", post(book_flight))
        .route("/v1/bookings/mine", get(my_bookings))
        .route("/v1/me/role", get(my_role))
}

async fn book_flight(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Json(req): Json<BookFlightRequest>,
) -> Result<(StatusCode, Json<BookingReceipt>), AppError> {
    let request = BookingRequest {
        ticket_ids: req.ticket_ids,
        first_name: req.first_name,
        last_name: req.last_name,
        paid: non_negative_amount("paid", req.paid)?,
    };

    let ledger = state.ledger().await?;
    let result = ledger.book_flight(&caller, request);
    state.metrics.record("book_flight", &result);
    let receipt = result?;

    state.metrics.record_booking(receipt.total);
    state.persist(&ledger).await;
    info!(purchase_id = receipt.purchase_id, buyer = %caller, "Booking committed");
    Ok((StatusCode::CREATED, Json(receipt)))
}

async fn my_bookings(
    State(state): State<AppState>,
    Caller(caller): Caller,
) -> Result<Json<Vec<BookingRecord>>, AppError> {
    let ledger = state.ledger().await?;
    Ok(Json(ledger.purchases_of(&caller)))
}

async fn my_role(State(state): State<AppState>, Caller(caller): Caller) -> Result<Json<Role>, AppError> {
    let ledger = state.ledger().await?;
    Ok(Json(ledger.role_of(&caller)))
}
