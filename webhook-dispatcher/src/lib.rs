// webhook-dispatcher/src/lib.rs

//! Webhook Dispatcher (C9): a durable queue that coalesces duplicate
//! pending updates for the same `(webhook, tx)` pair, HTTP-POSTs payloads
//! with exponential backoff, and cleans up terminal records.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use store::{DeliveryStatus, Store, StoreError, Webhook, WebhookDelivery};

/// `backoff[min(attempts-1, len-1)]`.
const BACKOFF: [Duration; 5] = [
    Duration::from_secs(1),
    Duration::from_secs(5),
    Duration::from_secs(30),
    Duration::from_secs(5 * 60),
    Duration::from_secs(60 * 60),
];

/// Snapshot of a transaction's public fields as a webhook payload
/// describes them.
#[derive(Debug, Clone, Serialize)]
pub struct TransactionSnapshot {
    pub _id: String,
    pub addresses: BTreeSet<String>,
    pub confirmations: u64,
    pub status: String,
    pub block_height: Option<u64>,
    pub block_hash: Option<String>,
    pub first_seen: DateTime<Utc>,
}

/// What changed to trigger this event. `status` here is not constrained
/// to the `ActiveTransaction` lifecycle enum — intake reports the
/// pseudo-status `"new"` for a freshly matched transaction, and archival
/// reports `"archived"`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Changes {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confirmations: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_height: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
struct WebhookPayload {
    timestamp: DateTime<Utc>,
    transaction: TransactionSnapshot,
    changes: Changes,
}

/// Build the payload a webhook delivery will carry, restricting
/// `addresses` to the webhook's own set unless it monitors everything.
pub fn build_payload(
    webhook: &Webhook,
    snapshot: &TransactionSnapshot,
    changes: Changes,
    now: DateTime<Utc>,
) -> serde_json::Value {
    let mut snapshot = snapshot.clone();
    if !webhook.monitor_all {
        snapshot.addresses = snapshot
            .addresses
            .intersection(&webhook.addresses)
            .cloned()
            .collect();
    }
    serde_json::to_value(WebhookPayload {
        timestamp: now,
        transaction: snapshot,
        changes,
    })
    .expect("payload is built from serializable, non-cyclic data")
}

/// Enqueue one delivery for `webhook`, first cancelling any non-terminal
/// delivery already pending for the same `(webhook, transaction)` pair.
pub async fn enqueue(
    store: &dyn Store,
    webhook: &Webhook,
    snapshot: &TransactionSnapshot,
    changes: Changes,
    now: DateTime<Utc>,
) -> Result<(), StoreError> {
    let payload = build_payload(webhook, snapshot, changes, now);
    store
        .supersede_pending_deliveries(&webhook.id, &snapshot._id, now)
        .await?;

    let delivery = WebhookDelivery {
        id: uuid::Uuid::new_v4().to_string(),
        webhook_id: webhook.id.clone(),
        url: webhook.url.clone(),
        payload,
        transaction_id: Some(snapshot._id.clone()),
        status: DeliveryStatus::Pending,
        attempts: 0,
        next_retry: now,
        last_error: None,
        last_attempt: None,
        created_at: now,
        completed_at: None,
        failed_at: None,
        cancelled_at: None,
        cancel_reason: None,
        response_status: None,
        response_body: None,
    };
    store.enqueue_delivery(delivery).await
}

/// Find every webhook matching `addresses` (monitor-all or intersecting)
/// and enqueue a delivery for each, bumping its trigger counter. This is
/// the fan-out shared by intake and the confirmation tracker.
pub async fn dispatch_event(
    store: &dyn Store,
    addresses: &BTreeSet<String>,
    snapshot: &TransactionSnapshot,
    changes: Changes,
    now: DateTime<Utc>,
) -> Result<usize, StoreError> {
    let webhooks = store.webhooks_matching(addresses).await?;
    for webhook in &webhooks {
        enqueue(store, webhook, snapshot, changes.clone(), now).await?;
        store.record_webhook_trigger(&webhook.id, now).await?;
    }
    Ok(webhooks.len())
}

pub struct DispatcherConfig {
    pub batch_size: usize,
    pub timeout: Duration,
    pub max_retries: u32,
    pub cleanup_days: i64,
}

/// Drives the delivery queue: claims ready entries, POSTs them, and
/// applies the retry/terminal outcome rules.
pub struct Dispatcher {
    store: Arc<dyn Store>,
    http: reqwest::Client,
    config: DispatcherConfig,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn Store>, config: DispatcherConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .expect("building a plain reqwest client cannot fail");
        Dispatcher { store, http, config }
    }

    /// Run one processing cycle: claim up to `batch_size` ready
    /// deliveries and attempt each in turn. Returns the number processed.
    pub async fn process_once(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let claimed = self.store.claim_deliveries(self.config.batch_size, now).await?;
        let count = claimed.len();
        for delivery in claimed {
            self.process_one(delivery, now).await?;
        }
        Ok(count)
    }

    async fn process_one(&self, delivery: WebhookDelivery, now: DateTime<Utc>) -> Result<(), StoreError> {
        // Secondary cancellation pass: a newer delivery for the same pair
        // may have been enqueued between this one's original supersede
        // check and its claim just now.
        if let Some(txid) = &delivery.transaction_id {
            let siblings = self
                .store
                .deliveries_for_webhook(&delivery.webhook_id, 50)
                .await?;
            let superseded = siblings.iter().any(|d| {
                d.id != delivery.id
                    && d.transaction_id.as_deref() == Some(txid.as_str())
                    && d.created_at > delivery.created_at
                    && !d.status.is_terminal()
            });
            if superseded {
                self.store
                    .cancel_delivery(&delivery.id, "superseded".to_string(), now)
                    .await?;
                return Ok(());
            }
        }

        let attempt = delivery.attempts + 1;
        let outcome = self
            .http
            .post(&delivery.url)
            .json(&delivery.payload)
            .send()
            .await;

        match outcome {
            Ok(resp) if resp.status().is_success() => {
                let status = resp.status().as_u16();
                let body = resp.text().await.unwrap_or_default();
                let trimmed: String = body.chars().take(1024).collect();
                self.store
                    .complete_delivery(&delivery.id, status, trimmed, now)
                    .await?;
            }
            Ok(resp) => {
                let status = resp.status().as_u16();
                self.record_failure(&delivery.id, attempt, format!("http status {status}"), now)
                    .await?;
            }
            Err(e) => {
                self.record_failure(&delivery.id, attempt, e.to_string(), now).await?;
            }
        }
        Ok(())
    }

    async fn record_failure(
        &self,
        id: &str,
        attempts: u32,
        error: String,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        if attempts >= self.config.max_retries {
            self.store.fail_delivery(id, attempts, error, now).await
        } else {
            let backoff = BACKOFF[(attempts as usize).saturating_sub(1).min(BACKOFF.len() - 1)];
            let next_retry = now + ChronoDuration::from_std(backoff).unwrap();
            self.store.retry_delivery(id, attempts, next_retry, error).await
        }
    }

    /// Delete terminal records older than `cleanup_days`.
    pub async fn cleanup_once(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let cutoff = now - ChronoDuration::days(self.config.cleanup_days);
        self.store.cleanup_terminal_deliveries(cutoff).await
    }
}
