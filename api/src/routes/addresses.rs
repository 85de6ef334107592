// api/src/routes/addresses.rs

use crate::{ApiError, AppState};
use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use store::AddressUpsertOutcome;
use tx_parser::is_valid_address;

#[derive(Debug, Deserialize)]
pub struct AddAddressesRequest {
    addresses: Vec<String>,
    #[serde(default)]
    force: bool,
}

#[derive(Debug, Default, Serialize)]
pub struct AddAddressesResponse {
    added: Vec<String>,
    #[serde(rename = "alreadyExist")]
    already_exist: Vec<String>,
    #[serde(rename = "forcedRefetch")]
    forced_refetch: Vec<String>,
    invalid: Vec<String>,
}

/// `POST /addresses`: register new watched addresses, or (with
/// `force=true`) re-run historical backfill on ones already registered.
/// Backfill runs synchronously for newly inserted ids and for an
/// operator-forced re-fetch.
pub async fn add_addresses(
    State(state): State<AppState>,
    Json(body): Json<AddAddressesRequest>,
) -> Result<Json<AddAddressesResponse>, ApiError> {
    if body.addresses.is_empty() {
        return Err(ApiError::BadRequest("addresses must be non-empty".to_string()));
    }

    let now = Utc::now();
    let mut response = AddAddressesResponse::default();

    for address in body.addresses {
        if !is_valid_address(&address, state.network) {
            response.invalid.push(address);
            continue;
        }

        let outcome = state.store.upsert_address(&address, None, now).await?;
        match outcome {
            AddressUpsertOutcome::Added => {
                state.membership.add(address.clone());
                backfill::backfill_address(
                    &address,
                    state.explorer.as_ref(),
                    state.node.as_ref(),
                    state.store.as_ref(),
                    state.max_history_per_address,
                    state.archive_threshold,
                    now,
                )
                .await
                .map_err(|e| ApiError::Internal(e.to_string()))?;
                response.added.push(address);
            }
            AddressUpsertOutcome::AlreadyExisted => {
                if body.force {
                    backfill::backfill_address(
                        &address,
                        state.explorer.as_ref(),
                        state.node.as_ref(),
                        state.store.as_ref(),
                        state.max_history_per_address,
                        state.archive_threshold,
                        now,
                    )
                    .await
                    .map_err(|e| ApiError::Internal(e.to_string()))?;
                    response.forced_refetch.push(address);
                } else {
                    response.already_exist.push(address);
                }
            }
        }
    }

    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
pub struct ListAddressesQuery {
    active: Option<bool>,
    limit: Option<i64>,
    offset: Option<u64>,
}

pub async fn list_addresses(
    State(state): State<AppState>,
    Query(query): Query<ListAddressesQuery>,
) -> Result<Json<Vec<store::WatchedAddress>>, ApiError> {
    let addresses = state
        .store
        .list_addresses(query.active, query.limit.unwrap_or(50), query.offset.unwrap_or(0))
        .await?;
    Ok(Json(addresses))
}

#[derive(Debug, Serialize)]
pub struct AddressDetail {
    #[serde(flatten)]
    address: store::WatchedAddress,
    recent_transactions: Vec<store::ActiveTransaction>,
}

/// `GET /addresses/:addr`: details plus the 10 most-recent active
/// transactions touching this address.
pub async fn get_address(
    State(state): State<AppState>,
    Path(addr): Path<String>,
) -> Result<Json<AddressDetail>, ApiError> {
    let address = state
        .store
        .get_address(&addr)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("no such address: {addr}")))?;
    let recent_transactions = state.store.active_txs_for_address(&addr, 10).await?;
    Ok(Json(AddressDetail {
        address,
        recent_transactions,
    }))
}

/// `DELETE /addresses/:addr`: deactivates the record and drops it from
/// the membership set before responding, so the set reflects the
/// removal before the HTTP response is sent.
pub async fn remove_address(
    State(state): State<AppState>,
    Path(addr): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let deactivated = state.store.deactivate_address(&addr).await?;
    if !deactivated {
        return Err(ApiError::NotFound(format!("no such address: {addr}")));
    }
    state.membership.remove(&addr);
    Ok(Json(serde_json::json!({ "deactivated": addr })))
}
