use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use skyledger_catalog::{Airline, AirlineUpdate};
use skyledger_core::{Address, AirlineId};
use skyledger_order::{SaleEntry, SettlementReport};

use crate::{auth::Caller, error::AppError, state::AppState};

#[derive(Debug, Deserialize)]
pub struct CreateAirlineRequest {
    pub name: String,
    pub owner: String,
    pub logo_ref: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct EditAirlineRequest {
    pub name: String,
    pub owner: String,
    pub logo_ref: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AirlineCreated {
    pub airline_id: AirlineId,
}

#[derive(Debug, Serialize)]
pub struct AirlineList {
    pub count: usize,
    pub last_airline_id: AirlineId,
    pub airlines: Vec<Airline>,
}

#[derive(Debug, Deserialize)]
pub struct ExistsQuery {
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct ExistsResponse {
    pub exists: bool,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/airlines", get(list_airlines).post(add_airline))
        .route("/v1/airlines/exists", get(airline_exists))
        .route("/v1/airlines/index/{index}", get(airline_at))
        .route(
            "/v1/airlines/{id}",
            get(get_airline).put(edit_airline).delete(remove_airline),
        )
        .route("/v1/airlines/{id}/sales", get(sales))
        .route("/v1/airlines/{id}/report", get(report))
}

async fn list_airlines(State(state): State<AppState>) -> Result<Json<AirlineList>, AppError> {
    let ledger = state.ledger().await?;
    Ok(Json(AirlineList {
        count: ledger.airlines_count(),
        last_airline_id: ledger.last_airline_id(),
        airlines: ledger.airlines(),
    }))
}

async fn add_airline(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Json(req): Json<CreateAirlineRequest>,
) -> Result<(StatusCode, Json<AirlineCreated>), AppError> {
    let ledger = state.ledger().await?;
    let result = ledger.add_airline(&caller, req.name, Address::new(req.owner), req.logo_ref);
    state.metrics.record("add_airline", &result);
    let airline_id = result?;

    state.persist(&ledger).await;
    Ok((StatusCode::CREATED, Json(AirlineCreated { airline_id })))
}

async fn airline_exists(
    State(state): State<AppState>,
    Query(query): Query<ExistsQuery>,
) -> Result<Json<ExistsResponse>, AppError> {
    let ledger = state.ledger().await?;
    Ok(Json(ExistsResponse {
        exists: ledger.airline_exists(&query.name),
    }))
}

async fn airline_at(State(state): State<AppState>, Path(index): Path<usize>) -> Result<Json<Airline>, AppError> {
    let ledger = state.ledger().await?;
    ledger
        .airline_at(index)
        .map(Json)
        .ok_or_else(|| AppError::NotFoundError(format!("no airline at index {}", index)))
}

async fn get_airline(State(state): State<AppState>, Path(id): Path<AirlineId>) -> Result<Json<Airline>, AppError> {
    let ledger = state.ledger().await?;
    ledger
        .airline(id)
        .map(Json)
        .ok_or_else(|| AppError::NotFoundError(format!("airline {}", id)))
}

async fn edit_airline(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(id): Path<AirlineId>,
    Json(req): Json<EditAirlineRequest>,
) -> Result<Json<Airline>, AppError> {
    let ledger = state.ledger().await?;
    let update = AirlineUpdate {
        name: req.name,
        owner: Address::new(req.owner),
        logo_ref: req.logo_ref,
    };
    let result = ledger.edit_airline(&caller, id, update);
    state.metrics.record("edit_airline", &result);
    let airline = result?;

    state.persist(&ledger).await;
    Ok(Json(airline))
}

async fn remove_airline(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(id): Path<AirlineId>,
) -> Result<StatusCode, AppError> {
    let ledger = state.ledger().await?;
    let result = ledger.remove_airline(&caller, id);
    state.metrics.record("remove_airline", &result);
    result?;

    state.persist(&ledger).await;
    Ok(StatusCode::NO_CONTENT)
}

async fn sales(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(id): Path<AirlineId>,
) -> Result<Json<Vec<SaleEntry>>, AppError> {
    let ledger = state.ledger().await?;
    Ok(Json(ledger.sales_of(&caller, id)?))
}

async fn report(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(id): Path<AirlineId>,
) -> Result<Json<SettlementReport>, AppError> {
    let ledger = state.ledger().await?;
    Ok(Json(ledger.settlement_report(&caller, id)?))
}
