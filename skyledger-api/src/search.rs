use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use skyledger_catalog::{Itinerary, ItineraryView, SearchWindow, SortOrder};
use skyledger_core::{TicketId, Timestamp};

use crate::{error::AppError, state::AppState};

/// A route query. The window start is either a raw timestamp (`when`) or a
/// calendar day (`date`, UTC midnight).
#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub from: String,
    pub to: String,
    pub when: Option<Timestamp>,
    pub date: Option<NaiveDate>,
    #[serde(default)]
    pub sort: SortOrder,
    #[serde(default)]
    pub direct_only: bool,
}

impl SearchQuery {
    fn window_start(&self) -> Result<Timestamp, AppError> {
        match (self.when, self.date) {
            (Some(when), None) => Ok(when),
            (None, Some(date)) => Ok(SearchWindow::on(date).start()),
            _ => Err(AppError::ValidationError(
                "exactly one of 'when' or 'date' is required".to_string(),
            )),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DirectResponse {
    pub ticket_ids: Vec<TicketId>,
}

#[derive(Debug, Serialize)]
pub struct OneStopResponse {
    pub itineraries: Vec<Itinerary>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/search/direct", get(direct))
        .route("/v1/search/one-stop", get(one_stop))
        .route("/v1/search/itineraries", get(itineraries))
}

async fn direct(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<DirectResponse>, AppError> {
    let when = query.window_start()?;
    let ledger = state.ledger().await?;
    Ok(Json(DirectResponse {
        ticket_ids: ledger.find_direct_flights(&query.from, &query.to, when),
    }))
}

async fn one_stop(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<OneStopResponse>, AppError> {
    let when = query.window_start()?;
    let ledger = state.ledger().await?;
    Ok(Json(OneStopResponse {
        itineraries: ledger.find_one_stop_flights(&query.from, &query.to, when),
    }))
}

async fn itineraries(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Vec<ItineraryView>>, AppError> {
    let when = query.window_start()?;
    let ledger = state.ledger().await?;
    Ok(Json(ledger.itineraries(
        &query.from,
        &query.to,
        when,
        query.direct_only,
        query.sort,
    )))
}
