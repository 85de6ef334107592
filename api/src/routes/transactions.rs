// api/src/routes/transactions.rs

use crate::{ApiError, AppState};
use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use store::TxStatus;

#[derive(Debug, Deserialize)]
pub struct ListTransactionsQuery {
    status: Option<TxStatus>,
    limit: Option<i64>,
    offset: Option<u64>,
}

pub async fn list_transactions(
    State(state): State<AppState>,
    Query(query): Query<ListTransactionsQuery>,
) -> Result<Json<Vec<store::ActiveTransaction>>, ApiError> {
    let txs = state
        .store
        .list_active_txs(query.status, query.limit.unwrap_or(50), query.offset.unwrap_or(0))
        .await?;
    Ok(Json(txs))
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum TransactionView {
    Active {
        #[serde(flatten)]
        tx: store::ActiveTransaction,
        archived: bool,
    },
    Archived {
        #[serde(flatten)]
        tx: store::ArchivedTransaction,
        archived: bool,
    },
}

/// `GET /transaction/:txid`: looks in the active set first, then
/// archived; the response flags which collection it came from.
pub async fn get_transaction(
    State(state): State<AppState>,
    Path(txid): Path<String>,
) -> Result<Json<TransactionView>, ApiError> {
    if let Some(tx) = state.store.get_active_tx(&txid).await? {
        return Ok(Json(TransactionView::Active { tx, archived: false }));
    }
    if let Some(tx) = state.store.get_archived_tx(&txid).await? {
        return Ok(Json(TransactionView::Archived { tx, archived: true }));
    }
    Err(ApiError::NotFound(format!("no such transaction: {txid}")))
}
