// store/src/model.rs

//! Entities persisted in the four document collections named in the
//! system's environment/persistence contract: `trackedAddresses`,
//! `activeTransactions`, `archivedTransactions`, `webhooks`, and
//! `webhookQueue`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A watched address. Identified by its base58 string, stored as `_id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WatchedAddress {
    #[serde(rename = "_id")]
    pub address: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub last_activity: Option<DateTime<Utc>>,
    pub transaction_count: u64,
    pub historical_fetched: bool,
    pub historical_fetched_at: Option<DateTime<Utc>>,
    pub label: Option<String>,
    #[serde(default)]
    pub metadata: bson::Document,
}

impl WatchedAddress {
    pub fn new(address: String, label: Option<String>, now: DateTime<Utc>) -> Self {
        WatchedAddress {
            address,
            active: true,
            created_at: now,
            last_activity: None,
            transaction_count: 0,
            historical_fetched: false,
            historical_fetched_at: None,
            label,
            metadata: bson::Document::new(),
        }
    }
}

/// Lifecycle status of an [`ActiveTransaction`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxStatus {
    Pending,
    Confirming,
}

/// A transaction still progressing through the confirmation lifecycle.
/// Identified by transaction id (hex), stored as `_id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActiveTransaction {
    #[serde(rename = "_id")]
    pub txid: String,
    pub addresses: BTreeSet<String>,
    pub block_height: Option<u64>,
    pub block_hash: Option<String>,
    pub block_time: Option<u64>,
    pub confirmations: u64,
    pub first_seen: DateTime<Utc>,
    pub status: TxStatus,
    pub is_historical: bool,
    pub last_verified: Option<DateTime<Utc>>,
    pub hex: Option<String>,
}

impl ActiveTransaction {
    pub fn new_pending(
        txid: String,
        addresses: BTreeSet<String>,
        first_seen: DateTime<Utc>,
        is_historical: bool,
    ) -> Self {
        ActiveTransaction {
            txid,
            addresses,
            block_height: None,
            block_hash: None,
            block_time: None,
            confirmations: 0,
            first_seen,
            status: TxStatus::Pending,
            is_historical,
            last_verified: None,
            hex: None,
        }
    }
}

/// A transaction that has reached the archive threshold.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ArchivedTransaction {
    #[serde(rename = "_id")]
    pub txid: String,
    pub addresses: BTreeSet<String>,
    pub block_height: u64,
    pub block_hash: String,
    pub final_confirmations: u64,
    pub first_seen: DateTime<Utc>,
    pub is_historical: bool,
    pub archived_at: DateTime<Utc>,
    pub archive_height: u64,
}

impl From<(ActiveTransaction, DateTime<Utc>)> for ArchivedTransaction {
    /// Mirror an [`ActiveTransaction`] into its archived form at `archive_height`
    /// (the second tuple element is `archived_at`). Panics if the source
    /// record has no block fields set — callers must only archive
    /// `confirming` transactions, which the invariants guarantee have them.
    fn from((active, archived_at): (ActiveTransaction, DateTime<Utc>)) -> Self {
        ArchivedTransaction {
            txid: active.txid,
            addresses: active.addresses,
            block_height: active
                .block_height
                .expect("archiving requires a known block_height"),
            block_hash: active
                .block_hash
                .expect("archiving requires a known block_hash"),
            final_confirmations: active.confirmations,
            first_seen: active.first_seen,
            is_historical: active.is_historical,
            archived_at,
            archive_height: active.block_height.unwrap(),
        }
    }
}

/// A registered webhook subscription.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Webhook {
    #[serde(rename = "_id")]
    pub id: String,
    pub url: String,
    pub addresses: BTreeSet<String>,
    pub monitor_all: bool,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub trigger_count: u64,
    pub last_triggered: Option<DateTime<Utc>>,
}

/// Delivery lifecycle for a single queued webhook event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Pending,
    Processing,
    Retry,
    Completed,
    Failed,
    Cancelled,
}

impl DeliveryStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DeliveryStatus::Completed | DeliveryStatus::Failed | DeliveryStatus::Cancelled
        )
    }
}

/// A single queued webhook delivery attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WebhookDelivery {
    #[serde(rename = "_id")]
    pub id: String,
    pub webhook_id: String,
    pub url: String,
    pub payload: serde_json::Value,
    pub transaction_id: Option<String>,
    pub status: DeliveryStatus,
    pub attempts: u32,
    pub next_retry: DateTime<Utc>,
    pub last_error: Option<String>,
    pub last_attempt: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancel_reason: Option<String>,
    pub response_status: Option<u16>,
    pub response_body: Option<String>,
}
