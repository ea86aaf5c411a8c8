use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;
use skyledger_core::{Amount, LedgerError};
use skyledger_store::redis_repo::rate_limit_key;
use std::net::SocketAddr;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

pub mod admin;
pub mod airlines;
pub mod auth;
pub mod bookings;
pub mod error;
pub mod events;
pub mod metrics;
pub mod search;
pub mod state;
pub mod tickets;

pub use error::AppError;
pub use state::AppState;

pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE, header::USER_AGENT]);

    let mut router = Router::new()
        .route("/health", get(health))
        .route("/metrics", get(render_metrics))
        .merge(auth::routes())
        .merge(airlines::routes())
        .merge(tickets::routes())
        .merge(search::routes())
        .merge(bookings::routes())
        .merge(admin::routes())
        .merge(events::routes());

    if state.redis.is_some() {
        router = router.layer(middleware::from_fn_with_state(state.clone(), rate_limit_middleware));
    }

    router
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Result<Json<serde_json::Value>, AppError> {
    let ledger = state.ledger().await?;
    Ok(Json(json!({
        "status": "ok",
        "instance": ledger.address(),
        "state": ledger.lifecycle_state(),
    })))
}

async fn render_metrics(State(state): State<AppState>) -> Result<String, AppError> {
    state
        .metrics
        .render()
        .map_err(|e| anyhow::anyhow!("failed to render metrics: {}", e).into())
}

/// Fixed-window limit per client IP. Fails open when redis is unreachable.
async fn rate_limit_middleware(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let (Some(redis), Some(limits)) = (&state.redis, &state.rate_limit) else {
        return next.run(req).await;
    };

    let client = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string());

    match redis
        .check_rate_limit(&rate_limit_key(&client), limits.requests, limits.window_seconds)
        .await
    {
        Ok(true) => next.run(req).await,
        Ok(false) => (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({ "error": "RATE_LIMITED", "message": "Rate limit exceeded" })),
        )
            .into_response(),
        Err(e) => {
            warn!(error = %e, "Rate limiter unavailable");
            next.run(req).await
        }
    }
}

/// Amounts arrive signed on the wire so a negative value is rejected with a
/// ledger-style validation error instead of a deserialization failure.
pub(crate) fn non_negative_amount(field: &str, value: i128) -> Result<Amount, AppError> {
    Amount::try_from(value)
        .map_err(|_| LedgerError::InvalidInput(format!("{} must not be negative, got {}", field, value)).into())
}

pub(crate) fn non_negative_quantity(value: i64) -> Result<u32, AppError> {
    u32::try_from(value)
        .map_err(|_| LedgerError::InvalidInput(format!("quantity must be between 0 and {}, got {}", u32::MAX, value)).into())
}
