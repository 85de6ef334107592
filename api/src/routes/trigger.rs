// api/src/routes/trigger.rs

use crate::{ApiError, AppState};
use axum::extract::State;
use axum::Json;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct TriggerResponse {
    ran: bool,
    tip_height: Option<u64>,
    verified: Option<usize>,
    archived: Option<usize>,
    retried: Option<usize>,
    dropped: Option<usize>,
}

/// `POST /trigger/confirmations`: runs one confirmation-tracker cycle on
/// demand. `ran=false` means a cycle was already in flight and this
/// call's frame was dropped, mirroring the ZMQ-driven path.
pub async fn trigger_confirmations(
    State(state): State<AppState>,
) -> Result<Json<TriggerResponse>, ApiError> {
    let report = state
        .tracker
        .process_new_block()
        .await
        .map_err(ApiError::from)?;

    Ok(Json(match report {
        Some(r) => TriggerResponse {
            ran: true,
            tip_height: Some(r.tip_height),
            verified: Some(r.verified),
            archived: Some(r.archived),
            retried: Some(r.retried),
            dropped: Some(r.dropped),
        },
        None => TriggerResponse {
            ran: false,
            tip_height: None,
            verified: None,
            archived: None,
            retried: None,
            dropped: None,
        },
    }))
}
