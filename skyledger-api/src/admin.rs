use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use skyledger_core::lifecycle::LifecycleState;
use skyledger_core::{Address, Amount};
use skyledger_order::Ledger;
use std::sync::Arc;
use tracing::info;

use crate::{auth::Caller, error::AppError, state::AppState};

#[derive(Debug, Deserialize)]
pub struct OwnershipRequest {
    pub new_admin: String,
}

#[derive(Debug, Deserialize)]
pub struct ChangeBackendRequest {
    pub instance: String,
}

#[derive(Debug, Serialize)]
pub struct LifecycleResponse {
    pub instance: Address,
    pub state: LifecycleState,
}

#[derive(Debug, Serialize)]
pub struct DestroyResponse {
    pub instance: Address,
    pub released: Amount,
}

#[derive(Debug, Serialize)]
pub struct RegistryResponse {
    pub admin: Address,
    pub current: Address,
    pub history: Vec<Address>,
}

#[derive(Debug, Serialize)]
pub struct InstanceDeployed {
    pub instance: Address,
}

#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    pub address: Address,
    pub balance: Amount,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/admin/pause", post(pause))
        .route("/v1/admin/unpause", post(unpause))
        .route("/v1/admin/destroy", post(destroy))
        .route("/v1/admin/ownership", post(transfer_ownership))
        .route("/v1/admin/instances", post(deploy_instance))
        .route("/v1/registry", get(get_registry))
        .route("/v1/registry/backend", post(change_backend))
        .route("/v1/registry/ownership", post(transfer_registry_ownership))
        .route("/v1/balances/{address}", get(balance))
}

async fn pause(State(state): State<AppState>, Caller(caller): Caller) -> Result<Json<LifecycleResponse>, AppError> {
    let ledger = state.ledger().await?;
    let result = ledger.pause(&caller);
    state.metrics.record("pause", &result);
    result?;

    state.persist(&ledger).await;
    Ok(Json(lifecycle(&ledger)))
}

async fn unpause(State(state): State<AppState>, Caller(caller): Caller) -> Result<Json<LifecycleResponse>, AppError> {
    let ledger = state.ledger().await?;
    let result = ledger.unpause(&caller);
    state.metrics.record("unpause", &result);
    result?;

    state.persist(&ledger).await;
    Ok(Json(lifecycle(&ledger)))
}

async fn destroy(State(state): State<AppState>, Caller(caller): Caller) -> Result<Json<DestroyResponse>, AppError> {
    let ledger = state.ledger().await?;
    let result = ledger.destroy(&caller);
    state.metrics.record("destroy", &result);
    let released = result?;

    state.persist(&ledger).await;
    Ok(Json(DestroyResponse {
        instance: ledger.address().clone(),
        released,
    }))
}

async fn transfer_ownership(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Json(req): Json<OwnershipRequest>,
) -> Result<StatusCode, AppError> {
    let ledger = state.ledger().await?;
    let result = ledger.transfer_ownership(&caller, Address::new(req.new_admin));
    state.metrics.record("transfer_ownership", &result);
    result?;

    state.persist(&ledger).await;
    Ok(StatusCode::NO_CONTENT)
}

/// Deploys an empty instance administered by the caller. The registry keeps
/// pointing at the old one until `change_backend`.
async fn deploy_instance(
    State(state): State<AppState>,
    Caller(caller): Caller,
) -> Result<(StatusCode, Json<InstanceDeployed>), AppError> {
    state.registry.read().await.require_admin(&caller)?;

    let ledger = Ledger::deploy(caller, state.rail.clone(), state.settings.clone(), state.events.clone());
    let instance = ledger.address().clone();
    state.persist(&ledger).await;
    state
        .instances
        .write()
        .await
        .insert(instance.clone(), Arc::new(ledger));

    Ok((StatusCode::CREATED, Json(InstanceDeployed { instance })))
}

async fn get_registry(State(state): State<AppState>) -> Json<RegistryResponse> {
    let registry = state.registry.read().await;
    Json(RegistryResponse {
        admin: registry.admin().clone(),
        current: registry.current().clone(),
        history: registry.history().to_vec(),
    })
}

async fn change_backend(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Json(req): Json<ChangeBackendRequest>,
) -> Result<Json<RegistryResponse>, AppError> {
    let instance = Address::new(req.instance);
    if !state.instances.read().await.contains_key(&instance) {
        return Err(AppError::NotFoundError(format!("ledger instance {}", instance)));
    }

    let response = {
        let mut registry = state.registry.write().await;
        let result = registry.change_backend(&caller, instance);
        state.metrics.record("change_backend", &result);
        state.publish_registry_event(result?);
        RegistryResponse {
            admin: registry.admin().clone(),
            current: registry.current().clone(),
            history: registry.history().to_vec(),
        }
    };

    state.persist_registry().await;
    info!(current = %response.current, "Registry now points at new backend");
    Ok(Json(response))
}

async fn transfer_registry_ownership(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Json(req): Json<OwnershipRequest>,
) -> Result<StatusCode, AppError> {
    {
        let mut registry = state.registry.write().await;
        let result = registry.transfer_ownership(&caller, Address::new(req.new_admin));
        state.metrics.record("transfer_registry_ownership", &result);
        state.publish_registry_event(result?);
    }

    state.persist_registry().await;
    Ok(StatusCode::NO_CONTENT)
}

async fn balance(State(state): State<AppState>, Path(address): Path<String>) -> Json<BalanceResponse> {
    let address = Address::new(address);
    Json(BalanceResponse {
        balance: state.rail.balance_of(&address),
        address,
    })
}

fn lifecycle(ledger: &Ledger) -> LifecycleResponse {
    LifecycleResponse {
        instance: ledger.address().clone(),
        state: ledger.lifecycle_state(),
    }
}
