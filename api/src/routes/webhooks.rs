// api/src/routes/webhooks.rs

use crate::{ApiError, AppState};
use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use store::Webhook;

#[derive(Debug, Deserialize)]
pub struct CreateWebhookRequest {
    url: String,
    #[serde(default)]
    addresses: BTreeSet<String>,
    #[serde(default = "default_true")]
    active: bool,
}

fn default_true() -> bool {
    true
}

/// `POST /webhooks`: empty or missing `addresses` subscribes to every
/// address (`monitor_all`).
pub async fn create_webhook(
    State(state): State<AppState>,
    Json(body): Json<CreateWebhookRequest>,
) -> Result<Json<Webhook>, ApiError> {
    if body.url.is_empty() {
        return Err(ApiError::BadRequest("url must be non-empty".to_string()));
    }

    let monitor_all = body.addresses.is_empty();
    let webhook = Webhook {
        id: uuid::Uuid::new_v4().to_string(),
        url: body.url,
        addresses: body.addresses,
        monitor_all,
        active: body.active,
        created_at: Utc::now(),
        trigger_count: 0,
        last_triggered: None,
    };
    state.store.create_webhook(webhook.clone()).await?;
    Ok(Json(webhook))
}

#[derive(Debug, Deserialize)]
pub struct ListWebhooksQuery {
    active: Option<bool>,
    limit: Option<i64>,
    offset: Option<u64>,
}

pub async fn list_webhooks(
    State(state): State<AppState>,
    Query(query): Query<ListWebhooksQuery>,
) -> Result<Json<Vec<Webhook>>, ApiError> {
    let webhooks = state
        .store
        .list_webhooks(query.active, query.limit.unwrap_or(50), query.offset.unwrap_or(0))
        .await?;
    Ok(Json(webhooks))
}

#[derive(Debug, Serialize)]
pub struct WebhookDetail {
    #[serde(flatten)]
    webhook: Webhook,
    recent_deliveries: Vec<store::WebhookDelivery>,
}

/// `GET /webhooks/:id`: details plus the last 10 deliveries.
pub async fn get_webhook(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<WebhookDetail>, ApiError> {
    let webhook = state
        .store
        .get_webhook(&id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("no such webhook: {id}")))?;
    let recent_deliveries = state.store.deliveries_for_webhook(&id, 10).await?;
    Ok(Json(WebhookDetail {
        webhook,
        recent_deliveries,
    }))
}

#[derive(Debug, Deserialize)]
pub struct UpdateWebhookRequest {
    url: Option<String>,
    addresses: Option<BTreeSet<String>>,
    active: Option<bool>,
    monitor_all: Option<bool>,
}

pub async fn update_webhook(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<UpdateWebhookRequest>,
) -> Result<Json<Webhook>, ApiError> {
    let updated = state
        .store
        .update_webhook(&id, body.url, body.addresses, body.monitor_all, body.active)
        .await?;
    if !updated {
        return Err(ApiError::NotFound(format!("no such webhook: {id}")));
    }
    let webhook = state
        .store
        .get_webhook(&id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("no such webhook: {id}")))?;
    Ok(Json(webhook))
}

/// `DELETE /webhooks/:id`: removes the subscription and cancels any
/// pending deliveries still queued for it.
pub async fn delete_webhook(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let now = Utc::now();
    let deleted = state.store.delete_webhook(&id).await?;
    if !deleted {
        return Err(ApiError::NotFound(format!("no such webhook: {id}")));
    }
    state.store.cancel_pending_for_webhook(&id, now).await?;
    Ok(Json(serde_json::json!({ "deleted": id })))
}
