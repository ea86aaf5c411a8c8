use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use skyledger_catalog::{NewTicket, Ticket};
use skyledger_core::{AirlineId, TicketId, Timestamp};

use crate::{auth::Caller, error::AppError, non_negative_amount, non_negative_quantity, state::AppState};

/// Wire form of a new ticket. Price and quantity arrive signed so that
/// negative values get a proper validation error.
#[derive(Debug, Deserialize)]
pub struct CreateTicketRequest {
    pub from: String,
    pub to: String,
    pub price: i128,
    pub quantity: i64,
    pub departure: Timestamp,
    pub arrival: Timestamp,
}

#[derive(Debug, Deserialize)]
pub struct EditTicketRequest {
    pub price: i128,
    pub quantity: i64,
}

#[derive(Debug, Serialize)]
pub struct TicketCreated {
    pub ticket_id: TicketId,
}

#[derive(Debug, Deserialize)]
pub struct TicketListQuery {
    /// Position among the airline's remaining tickets, creation order.
    pub index: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct TicketList {
    pub count: usize,
    pub last_ticket_id: TicketId,
    pub tickets: Vec<Ticket>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/airlines/{id}/tickets", get(list_tickets).post(add_ticket))
        .route(
            "/v1/tickets/{id}",
            get(get_ticket).put(edit_ticket).delete(remove_ticket),
        )
}

async fn list_tickets(
    State(state): State<AppState>,
    Path(airline_id): Path<AirlineId>,
    Query(query): Query<TicketListQuery>,
) -> Result<Json<TicketList>, AppError> {
    let ledger = state.ledger().await?;
    let tickets = match query.index {
        Some(index) => ledger.ticket_by_airline(airline_id, index).into_iter().collect(),
        None => ledger.tickets_of(airline_id),
    };
    Ok(Json(TicketList {
        count: ledger.tickets_count(airline_id),
        last_ticket_id: ledger.last_ticket_id(),
        tickets,
    }))
}

async fn add_ticket(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(airline_id): Path<AirlineId>,
    Json(req): Json<CreateTicketRequest>,
) -> Result<(StatusCode, Json<TicketCreated>), AppError> {
    let ticket = NewTicket {
        airline_id,
        from: req.from,
        to: req.to,
        price: non_negative_amount("price", req.price)?,
        quantity: non_negative_quantity(req.quantity)?,
        departure: req.departure,
        arrival: req.arrival,
    };

    let ledger = state.ledger().await?;
    let result = ledger.add_ticket(&caller, ticket);
    state.metrics.record("add_ticket", &result);
    let ticket_id = result?;

    state.persist(&ledger).await;
    Ok((StatusCode::CREATED, Json(TicketCreated { ticket_id })))
}

async fn get_ticket(State(state): State<AppState>, Path(id): Path<TicketId>) -> Result<Json<Ticket>, AppError> {
    let ledger = state.ledger().await?;
    ledger
        .ticket(id)
        .map(Json)
        .ok_or_else(|| AppError::NotFoundError(format!("ticket {}", id)))
}

async fn edit_ticket(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(id): Path<TicketId>,
    Json(req): Json<EditTicketRequest>,
) -> Result<Json<Ticket>, AppError> {
    let price = non_negative_amount("price", req.price)?;
    let quantity = non_negative_quantity(req.quantity)?;

    let ledger = state.ledger().await?;
    let result = ledger.edit_ticket(&caller, id, price, quantity);
    state.metrics.record("edit_ticket", &result);
    let ticket = result?;

    state.persist(&ledger).await;
    Ok(Json(ticket))
}

async fn remove_ticket(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(id): Path<TicketId>,
) -> Result<StatusCode, AppError> {
    let ledger = state.ledger().await?;
    let result = ledger.remove_ticket(&caller, id);
    state.metrics.record("remove_ticket", &result);
    result?;

    state.persist(&ledger).await;
    Ok(StatusCode::NO_CONTENT)
}
