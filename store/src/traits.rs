// store/src/traits.rs

use crate::error::StoreError;
use crate::model::{ActiveTransaction, ArchivedTransaction, TxStatus, WatchedAddress, Webhook, WebhookDelivery};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;

/// Outcome of inserting or re-registering a watched address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressUpsertOutcome {
    Added,
    AlreadyExisted,
}

/// Result of the verification update a confirmation-tracker worker writes
/// back for one transaction.
#[derive(Debug, Clone)]
pub struct VerificationUpdate {
    pub txid: String,
    pub block_hash: Option<String>,
    pub block_height: Option<u64>,
    pub block_time: Option<u64>,
    pub confirmations: u64,
    pub hex: Option<String>,
    pub status: TxStatus,
    pub verified_at: DateTime<Utc>,
}

/// The persistent document store (C3), abstracted to the operations the
/// pipeline actually uses: primary-key upsert, conditional update,
/// range/equality filter, unordered bulk insert, and count. Concrete
/// implementations: [`crate::mongo::MongoStore`] for production,
/// [`crate::memory::InMemoryStore`] for tests.
#[async_trait]
pub trait Store: Send + Sync {
    // -- watched addresses --------------------------------------------

    /// Insert `address` if absent (active=true, counters zeroed); returns
    /// which happened. On `force`, an existing record is left in place
    /// (the caller drives a historical re-fetch instead of mutating it).
    async fn upsert_address(
        &self,
        address: &str,
        label: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<AddressUpsertOutcome, StoreError>;

    async fn get_address(&self, address: &str) -> Result<Option<WatchedAddress>, StoreError>;

    async fn list_addresses(
        &self,
        active: Option<bool>,
        limit: i64,
        offset: u64,
    ) -> Result<Vec<WatchedAddress>, StoreError>;

    /// All addresses currently `active=true`, unpaged — used once at
    /// startup to seed the membership set.
    async fn all_active_addresses(&self) -> Result<Vec<String>, StoreError>;

    async fn deactivate_address(&self, address: &str) -> Result<bool, StoreError>;

    /// Fetch the watched records among `candidates` that are `active=true`.
    async fn get_active_among(
        &self,
        candidates: &[String],
    ) -> Result<Vec<WatchedAddress>, StoreError>;

    async fn bump_activity(&self, addresses: &[String], now: DateTime<Utc>) -> Result<(), StoreError>;

    async fn mark_historical_fetched(
        &self,
        address: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Addresses where `historical_fetched != true` — the startup sweep's
    /// worklist for C8.
    async fn addresses_needing_backfill(&self) -> Result<Vec<WatchedAddress>, StoreError>;

    async fn address_count(&self, active: Option<bool>) -> Result<u64, StoreError>;

    // -- active transactions -------------------------------------------

    /// Upsert semantics per spec step 4.3.5: on a new id, insert with
    /// `status=pending`; on an existing id, preserve `first_seen` and
    /// block fields, union `addresses`.
    async fn upsert_active_tx(
        &self,
        txid: &str,
        addresses: &BTreeSet<String>,
        first_seen: DateTime<Utc>,
        is_historical: bool,
    ) -> Result<(), StoreError>;

    async fn get_active_tx(&self, txid: &str) -> Result<Option<ActiveTransaction>, StoreError>;

    async fn active_tx_exists(&self, txid: &str) -> Result<bool, StoreError>;

    async fn list_active_txs(
        &self,
        status: Option<TxStatus>,
        limit: i64,
        offset: u64,
    ) -> Result<Vec<ActiveTransaction>, StoreError>;

    /// The `limit` most-recent active transactions touching `address`,
    /// newest `first_seen` first — backs `GET /addresses/:addr`'s detail
    /// view.
    async fn active_txs_for_address(
        &self,
        address: &str,
        limit: i64,
    ) -> Result<Vec<ActiveTransaction>, StoreError>;

    /// Up to `limit` transactions with `status in {pending, confirming}`,
    /// oldest `first_seen` first — the confirmation tracker's per-cycle
    /// worklist.
    async fn active_txs_for_verification(
        &self,
        limit: usize,
    ) -> Result<Vec<ActiveTransaction>, StoreError>;

    /// Apply one worker's verification result. `status` is recomputed by
    /// the caller (tracker) before being passed in here.
    async fn apply_verification(&self, update: &VerificationUpdate) -> Result<(), StoreError>;

    /// `confirming` transactions with `block_height <= tip_height -
    /// archive_threshold + 1` — the archival sweep's worklist.
    async fn find_archivable(
        &self,
        tip_height: u64,
        archive_threshold: u64,
    ) -> Result<Vec<ActiveTransaction>, StoreError>;

    async fn delete_active_tx(&self, txid: &str) -> Result<(), StoreError>;

    /// Insert historical records discovered by C8 that are not yet
    /// archive-eligible. Unordered: duplicate-key races are swallowed.
    async fn insert_active_txs_bulk(
        &self,
        records: Vec<ActiveTransaction>,
    ) -> Result<(), StoreError>;

    // -- archived transactions -------------------------------------------

    async fn archive_tx_exists(&self, txid: &str) -> Result<bool, StoreError>;

    async fn get_archived_tx(&self, txid: &str) -> Result<Option<ArchivedTransaction>, StoreError>;

    async fn insert_archived_tx(&self, record: ArchivedTransaction) -> Result<(), StoreError>;

    /// Unordered bulk insert for historical records already at/above the
    /// archive threshold.
    async fn insert_archived_txs_bulk(
        &self,
        records: Vec<ArchivedTransaction>,
    ) -> Result<(), StoreError>;

    async fn archived_tx_count(&self) -> Result<u64, StoreError>;

    // -- webhooks --------------------------------------------------------

    async fn create_webhook(&self, webhook: Webhook) -> Result<(), StoreError>;

    async fn get_webhook(&self, id: &str) -> Result<Option<Webhook>, StoreError>;

    async fn list_webhooks(
        &self,
        active: Option<bool>,
        limit: i64,
        offset: u64,
    ) -> Result<Vec<Webhook>, StoreError>;

    /// Webhooks that should receive an event for `addresses`: either
    /// `monitor_all=true`, or a non-empty intersection with their own set.
    async fn webhooks_matching(&self, addresses: &BTreeSet<String>) -> Result<Vec<Webhook>, StoreError>;

    async fn update_webhook(
        &self,
        id: &str,
        url: Option<String>,
        addresses: Option<BTreeSet<String>>,
        monitor_all: Option<bool>,
        active: Option<bool>,
    ) -> Result<bool, StoreError>;

    async fn delete_webhook(&self, id: &str) -> Result<bool, StoreError>;

    async fn record_webhook_trigger(&self, id: &str, now: DateTime<Utc>) -> Result<(), StoreError>;

    // -- webhook delivery queue -------------------------------------------

    async fn enqueue_delivery(&self, delivery: WebhookDelivery) -> Result<(), StoreError>;

    /// Cancel every non-terminal delivery for `(webhook_id, transaction_id)`
    /// with `cancel_reason='superseded'`. Used both before insert and again
    /// at claim time to absorb races between a fresh event and one still
    /// queued for the same transaction.
    async fn supersede_pending_deliveries(
        &self,
        webhook_id: &str,
        transaction_id: &str,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError>;

    async fn cancel_pending_for_webhook(&self, webhook_id: &str, now: DateTime<Utc>) -> Result<u64, StoreError>;

    /// Atomically claim up to `limit` ready deliveries, setting
    /// `status=processing, last_attempt=now`.
    async fn claim_deliveries(
        &self,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<WebhookDelivery>, StoreError>;

    async fn complete_delivery(
        &self,
        id: &str,
        response_status: u16,
        response_body: String,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn retry_delivery(
        &self,
        id: &str,
        attempts: u32,
        next_retry: DateTime<Utc>,
        last_error: String,
    ) -> Result<(), StoreError>;

    async fn fail_delivery(
        &self,
        id: &str,
        attempts: u32,
        last_error: String,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Cancel a single in-flight delivery (secondary supersession pass at
    /// claim time) with the given reason.
    async fn cancel_delivery(&self, id: &str, reason: String, now: DateTime<Utc>) -> Result<(), StoreError>;

    /// Delete terminal deliveries whose terminal timestamp is older than
    /// `cutoff`.
    async fn cleanup_terminal_deliveries(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;

    async fn deliveries_for_webhook(
        &self,
        webhook_id: &str,
        limit: i64,
    ) -> Result<Vec<WebhookDelivery>, StoreError>;
}
