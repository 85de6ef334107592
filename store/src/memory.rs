// store/src/memory.rs

//! In-memory [`Store`] used to exercise the pipeline end to end in tests
//! without a live MongoDB.

use crate::error::StoreError;
use crate::model::{
    ActiveTransaction, ArchivedTransaction, DeliveryStatus, TxStatus, WatchedAddress, Webhook,
    WebhookDelivery,
};
use crate::traits::{AddressUpsertOutcome, Store, VerificationUpdate};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::sync::Mutex;

#[derive(Default)]
struct Tables {
    addresses: std::collections::HashMap<String, WatchedAddress>,
    active_txs: std::collections::HashMap<String, ActiveTransaction>,
    archived_txs: std::collections::HashMap<String, ArchivedTransaction>,
    webhooks: std::collections::HashMap<String, Webhook>,
    deliveries: std::collections::HashMap<String, WebhookDelivery>,
}

/// A single-process, lock-guarded store. Good enough for sequential test
/// scenarios; not intended for concurrent production use.
#[derive(Default)]
pub struct InMemoryStore {
    tables: Mutex<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn upsert_address(
        &self,
        address: &str,
        label: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<AddressUpsertOutcome, StoreError> {
        let mut t = self.tables.lock().unwrap();
        if t.addresses.contains_key(address) {
            return Ok(AddressUpsertOutcome::AlreadyExisted);
        }
        t.addresses.insert(
            address.to_string(),
            WatchedAddress::new(address.to_string(), label, now),
        );
        Ok(AddressUpsertOutcome::Added)
    }

    async fn get_address(&self, address: &str) -> Result<Option<WatchedAddress>, StoreError> {
        Ok(self.tables.lock().unwrap().addresses.get(address).cloned())
    }

    async fn list_addresses(
        &self,
        active: Option<bool>,
        limit: i64,
        offset: u64,
    ) -> Result<Vec<WatchedAddress>, StoreError> {
        let t = self.tables.lock().unwrap();
        let mut matched: Vec<_> = t
            .addresses
            .values()
            .filter(|a| active.map(|want| a.active == want).unwrap_or(true))
            .cloned()
            .collect();
        matched.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(page(matched, limit, offset))
    }

    async fn all_active_addresses(&self) -> Result<Vec<String>, StoreError> {
        let t = self.tables.lock().unwrap();
        Ok(t.addresses
            .values()
            .filter(|a| a.active)
            .map(|a| a.address.clone())
            .collect())
    }

    async fn deactivate_address(&self, address: &str) -> Result<bool, StoreError> {
        let mut t = self.tables.lock().unwrap();
        match t.addresses.get_mut(address) {
            Some(a) => {
                a.active = false;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn get_active_among(
        &self,
        candidates: &[String],
    ) -> Result<Vec<WatchedAddress>, StoreError> {
        let t = self.tables.lock().unwrap();
        Ok(candidates
            .iter()
            .filter_map(|c| t.addresses.get(c))
            .filter(|a| a.active)
            .cloned()
            .collect())
    }

    async fn bump_activity(
        &self,
        addresses: &[String],
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut t = self.tables.lock().unwrap();
        for addr in addresses {
            if let Some(a) = t.addresses.get_mut(addr) {
                a.transaction_count += 1;
                a.last_activity = Some(now);
            }
        }
        Ok(())
    }

    async fn mark_historical_fetched(
        &self,
        address: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut t = self.tables.lock().unwrap();
        if let Some(a) = t.addresses.get_mut(address) {
            a.historical_fetched = true;
            a.historical_fetched_at = Some(at);
        }
        Ok(())
    }

    async fn addresses_needing_backfill(&self) -> Result<Vec<WatchedAddress>, StoreError> {
        let t = self.tables.lock().unwrap();
        Ok(t.addresses
            .values()
            .filter(|a| !a.historical_fetched)
            .cloned()
            .collect())
    }

    async fn address_count(&self, active: Option<bool>) -> Result<u64, StoreError> {
        let t = self.tables.lock().unwrap();
        Ok(t.addresses
            .values()
            .filter(|a| active.map(|want| a.active == want).unwrap_or(true))
            .count() as u64)
    }

    async fn upsert_active_tx(
        &self,
        txid: &str,
        addresses: &BTreeSet<String>,
        first_seen: DateTime<Utc>,
        is_historical: bool,
    ) -> Result<(), StoreError> {
        let mut t = self.tables.lock().unwrap();
        match t.active_txs.get_mut(txid) {
            Some(existing) => {
                existing.addresses.extend(addresses.iter().cloned());
            }
            None => {
                t.active_txs.insert(
                    txid.to_string(),
                    ActiveTransaction::new_pending(
                        txid.to_string(),
                        addresses.clone(),
                        first_seen,
                        is_historical,
                    ),
                );
            }
        }
        Ok(())
    }

    async fn get_active_tx(&self, txid: &str) -> Result<Option<ActiveTransaction>, StoreError> {
        Ok(self.tables.lock().unwrap().active_txs.get(txid).cloned())
    }

    async fn active_tx_exists(&self, txid: &str) -> Result<bool, StoreError> {
        Ok(self.tables.lock().unwrap().active_txs.contains_key(txid))
    }

    async fn list_active_txs(
        &self,
        status: Option<TxStatus>,
        limit: i64,
        offset: u64,
    ) -> Result<Vec<ActiveTransaction>, StoreError> {
        let t = self.tables.lock().unwrap();
        let mut matched: Vec<_> = t
            .active_txs
            .values()
            .filter(|tx| status.map(|want| tx.status == want).unwrap_or(true))
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.first_seen.cmp(&a.first_seen));
        Ok(page(matched, limit, offset))
    }

    async fn active_txs_for_address(
        &self,
        address: &str,
        limit: i64,
    ) -> Result<Vec<ActiveTransaction>, StoreError> {
        let t = self.tables.lock().unwrap();
        let mut matched: Vec<_> = t
            .active_txs
            .values()
            .filter(|tx| tx.addresses.contains(address))
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.first_seen.cmp(&a.first_seen));
        Ok(page(matched, limit, 0))
    }

    async fn active_txs_for_verification(
        &self,
        limit: usize,
    ) -> Result<Vec<ActiveTransaction>, StoreError> {
        let t = self.tables.lock().unwrap();
        let mut matched: Vec<_> = t
            .active_txs
            .values()
            .filter(|tx| matches!(tx.status, TxStatus::Pending | TxStatus::Confirming))
            .cloned()
            .collect();
        matched.sort_by(|a, b| a.first_seen.cmp(&b.first_seen));
        matched.truncate(limit);
        Ok(matched)
    }

    async fn apply_verification(&self, update: &VerificationUpdate) -> Result<(), StoreError> {
        let mut t = self.tables.lock().unwrap();
        if let Some(tx) = t.active_txs.get_mut(&update.txid) {
            tx.block_hash = update.block_hash.clone();
            tx.block_height = update.block_height;
            tx.block_time = update.block_time;
            tx.confirmations = update.confirmations;
            tx.hex = update.hex.clone().or_else(|| tx.hex.clone());
            tx.status = update.status;
            tx.last_verified = Some(update.verified_at);
        }
        Ok(())
    }

    async fn find_archivable(
        &self,
        tip_height: u64,
        archive_threshold: u64,
    ) -> Result<Vec<ActiveTransaction>, StoreError> {
        let t = self.tables.lock().unwrap();
        let cutoff = tip_height.saturating_sub(archive_threshold) + 1;
        Ok(t.active_txs
            .values()
            .filter(|tx| {
                tx.status == TxStatus::Confirming
                    && tx.block_height.map(|h| h <= cutoff).unwrap_or(false)
            })
            .cloned()
            .collect())
    }

    async fn delete_active_tx(&self, txid: &str) -> Result<(), StoreError> {
        self.tables.lock().unwrap().active_txs.remove(txid);
        Ok(())
    }

    async fn insert_active_txs_bulk(
        &self,
        records: Vec<ActiveTransaction>,
    ) -> Result<(), StoreError> {
        let mut t = self.tables.lock().unwrap();
        for record in records {
            t.active_txs.entry(record.txid.clone()).or_insert(record);
        }
        Ok(())
    }

    async fn archive_tx_exists(&self, txid: &str) -> Result<bool, StoreError> {
        Ok(self.tables.lock().unwrap().archived_txs.contains_key(txid))
    }

    async fn get_archived_tx(
        &self,
        txid: &str,
    ) -> Result<Option<ArchivedTransaction>, StoreError> {
        Ok(self.tables.lock().unwrap().archived_txs.get(txid).cloned())
    }

    async fn insert_archived_tx(&self, record: ArchivedTransaction) -> Result<(), StoreError> {
        self.tables
            .lock()
            .unwrap()
            .archived_txs
            .entry(record.txid.clone())
            .or_insert(record);
        Ok(())
    }

    async fn insert_archived_txs_bulk(
        &self,
        records: Vec<ArchivedTransaction>,
    ) -> Result<(), StoreError> {
        let mut t = self.tables.lock().unwrap();
        for record in records {
            t.archived_txs.entry(record.txid.clone()).or_insert(record);
        }
        Ok(())
    }

    async fn archived_tx_count(&self) -> Result<u64, StoreError> {
        Ok(self.tables.lock().unwrap().archived_txs.len() as u64)
    }

    async fn create_webhook(&self, webhook: Webhook) -> Result<(), StoreError> {
        self.tables
            .lock()
            .unwrap()
            .webhooks
            .insert(webhook.id.clone(), webhook);
        Ok(())
    }

    async fn get_webhook(&self, id: &str) -> Result<Option<Webhook>, StoreError> {
        Ok(self.tables.lock().unwrap().webhooks.get(id).cloned())
    }

    async fn list_webhooks(
        &self,
        active: Option<bool>,
        limit: i64,
        offset: u64,
    ) -> Result<Vec<Webhook>, StoreError> {
        let t = self.tables.lock().unwrap();
        let mut matched: Vec<_> = t
            .webhooks
            .values()
            .filter(|w| active.map(|want| w.active == want).unwrap_or(true))
            .cloned()
            .collect();
        matched.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(page(matched, limit, offset))
    }

    async fn webhooks_matching(
        &self,
        addresses: &BTreeSet<String>,
    ) -> Result<Vec<Webhook>, StoreError> {
        let t = self.tables.lock().unwrap();
        Ok(t.webhooks
            .values()
            .filter(|w| w.active)
            .filter(|w| w.monitor_all || !w.addresses.is_disjoint(addresses))
            .cloned()
            .collect())
    }

    async fn update_webhook(
        &self,
        id: &str,
        url: Option<String>,
        addresses: Option<BTreeSet<String>>,
        monitor_all: Option<bool>,
        active: Option<bool>,
    ) -> Result<bool, StoreError> {
        let mut t = self.tables.lock().unwrap();
        match t.webhooks.get_mut(id) {
            Some(w) => {
                if let Some(url) = url {
                    w.url = url;
                }
                if let Some(addresses) = addresses {
                    w.addresses = addresses;
                }
                if let Some(monitor_all) = monitor_all {
                    w.monitor_all = monitor_all;
                }
                if let Some(active) = active {
                    w.active = active;
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_webhook(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self.tables.lock().unwrap().webhooks.remove(id).is_some())
    }

    async fn record_webhook_trigger(
        &self,
        id: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut t = self.tables.lock().unwrap();
        if let Some(w) = t.webhooks.get_mut(id) {
            w.trigger_count += 1;
            w.last_triggered = Some(now);
        }
        Ok(())
    }

    async fn enqueue_delivery(&self, delivery: WebhookDelivery) -> Result<(), StoreError> {
        self.tables
            .lock()
            .unwrap()
            .deliveries
            .insert(delivery.id.clone(), delivery);
        Ok(())
    }

    async fn supersede_pending_deliveries(
        &self,
        webhook_id: &str,
        transaction_id: &str,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let mut t = self.tables.lock().unwrap();
        let mut count = 0;
        for d in t.deliveries.values_mut() {
            if d.webhook_id == webhook_id
                && d.transaction_id.as_deref() == Some(transaction_id)
                && matches!(d.status, DeliveryStatus::Pending | DeliveryStatus::Retry)
            {
                d.status = DeliveryStatus::Cancelled;
                d.cancelled_at = Some(now);
                d.cancel_reason = Some("superseded".to_string());
                count += 1;
            }
        }
        Ok(count)
    }

    async fn cancel_pending_for_webhook(
        &self,
        webhook_id: &str,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let mut t = self.tables.lock().unwrap();
        let mut count = 0;
        for d in t.deliveries.values_mut() {
            if d.webhook_id == webhook_id && !d.status.is_terminal() {
                d.status = DeliveryStatus::Cancelled;
                d.cancelled_at = Some(now);
                d.cancel_reason = Some("webhook_deleted".to_string());
                count += 1;
            }
        }
        Ok(count)
    }

    async fn claim_deliveries(
        &self,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<WebhookDelivery>, StoreError> {
        let mut t = self.tables.lock().unwrap();
        let mut ready: Vec<String> = t
            .deliveries
            .values()
            .filter(|d| {
                matches!(d.status, DeliveryStatus::Pending | DeliveryStatus::Retry)
                    && d.next_retry <= now
            })
            .map(|d| d.id.clone())
            .collect();
        ready.sort();
        ready.truncate(limit);

        let mut claimed = Vec::new();
        for id in ready {
            if let Some(d) = t.deliveries.get_mut(&id) {
                d.status = DeliveryStatus::Processing;
                d.last_attempt = Some(now);
                claimed.push(d.clone());
            }
        }
        Ok(claimed)
    }

    async fn complete_delivery(
        &self,
        id: &str,
        response_status: u16,
        response_body: String,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut t = self.tables.lock().unwrap();
        if let Some(d) = t.deliveries.get_mut(id) {
            d.status = DeliveryStatus::Completed;
            d.completed_at = Some(now);
            d.response_status = Some(response_status);
            d.response_body = Some(response_body);
        }
        Ok(())
    }

    async fn retry_delivery(
        &self,
        id: &str,
        attempts: u32,
        next_retry: DateTime<Utc>,
        last_error: String,
    ) -> Result<(), StoreError> {
        let mut t = self.tables.lock().unwrap();
        if let Some(d) = t.deliveries.get_mut(id) {
            d.status = DeliveryStatus::Retry;
            d.attempts = attempts;
            d.next_retry = next_retry;
            d.last_error = Some(last_error);
        }
        Ok(())
    }

    async fn fail_delivery(
        &self,
        id: &str,
        attempts: u32,
        last_error: String,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut t = self.tables.lock().unwrap();
        if let Some(d) = t.deliveries.get_mut(id) {
            d.status = DeliveryStatus::Failed;
            d.attempts = attempts;
            d.failed_at = Some(now);
            d.last_error = Some(last_error);
        }
        Ok(())
    }

    async fn cancel_delivery(&self, id: &str, reason: String, now: DateTime<Utc>) -> Result<(), StoreError> {
        let mut t = self.tables.lock().unwrap();
        if let Some(d) = t.deliveries.get_mut(id) {
            d.status = DeliveryStatus::Cancelled;
            d.cancelled_at = Some(now);
            d.cancel_reason = Some(reason);
        }
        Ok(())
    }

    async fn cleanup_terminal_deliveries(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut t = self.tables.lock().unwrap();
        let to_remove: Vec<String> = t
            .deliveries
            .values()
            .filter(|d| {
                let terminal_at = d.completed_at.or(d.failed_at).or(d.cancelled_at);
                d.status.is_terminal() && terminal_at.map(|at| at < cutoff).unwrap_or(false)
            })
            .map(|d| d.id.clone())
            .collect();
        let count = to_remove.len() as u64;
        for id in to_remove {
            t.deliveries.remove(&id);
        }
        Ok(count)
    }

    async fn deliveries_for_webhook(
        &self,
        webhook_id: &str,
        limit: i64,
    ) -> Result<Vec<WebhookDelivery>, StoreError> {
        let t = self.tables.lock().unwrap();
        let mut matched: Vec<_> = t
            .deliveries
            .values()
            .filter(|d| d.webhook_id == webhook_id)
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(page(matched, limit, 0))
    }
}

fn page<T>(mut items: Vec<T>, limit: i64, offset: u64) -> Vec<T> {
    let offset = offset as usize;
    if offset >= items.len() {
        return Vec::new();
    }
    items.drain(..offset);
    if limit >= 0 {
        items.truncate(limit as usize);
    }
    items
}
