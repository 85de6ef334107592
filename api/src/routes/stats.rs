// api/src/routes/stats.rs

use crate::{ApiError, AppState};
use axum::extract::State;
use axum::Json;
use serde::Serialize;
use store::TxStatus;

#[derive(Debug, Serialize)]
pub struct Stats {
    addresses_active: u64,
    addresses_total: u64,
    transactions_pending: usize,
    transactions_confirming: usize,
    transactions_archived: u64,
    webhooks_active: usize,
    membership_set_size: usize,
}

/// `GET /stats`: counts plus a per-subsystem snapshot. Cheap enough to
/// compute on demand; nothing here is cached.
pub async fn stats(State(state): State<AppState>) -> Result<Json<Stats>, ApiError> {
    let addresses_active = state.store.address_count(Some(true)).await?;
    let addresses_total = state.store.address_count(None).await?;
    let pending = state.store.list_active_txs(Some(TxStatus::Pending), -1, 0).await?;
    let confirming = state.store.list_active_txs(Some(TxStatus::Confirming), -1, 0).await?;
    let transactions_archived = state.store.archived_tx_count().await?;
    let webhooks = state.store.list_webhooks(Some(true), -1, 0).await?;

    Ok(Json(Stats {
        addresses_active,
        addresses_total,
        transactions_pending: pending.len(),
        transactions_confirming: confirming.len(),
        transactions_archived,
        webhooks_active: webhooks.len(),
        membership_set_size: state.membership.size(),
    }))
}
