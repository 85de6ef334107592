// store/src/mongo.rs

//! MongoDB-backed [`Store`]. Collection names and required indexes match
//! the persistent layout in the system's operator-facing reference:
//! `trackedAddresses`, `activeTransactions`, `archivedTransactions`,
//! `webhooks`, `webhookQueue`.

use crate::error::StoreError;
use crate::model::{
    ActiveTransaction, ArchivedTransaction, DeliveryStatus, TxStatus, WatchedAddress, Webhook,
    WebhookDelivery,
};
use crate::traits::{AddressUpsertOutcome, Store, VerificationUpdate};
use async_trait::async_trait;
use bson::{doc, Document};
use chrono::{DateTime, Utc};
use futures::stream::TryStreamExt;
use mongodb::options::{FindOptions, IndexOptions};
use mongodb::{Client, Collection, IndexModel};
use std::collections::BTreeSet;

#[derive(Clone)]
pub struct MongoStore {
    addresses: Collection<WatchedAddress>,
    active_txs: Collection<ActiveTransaction>,
    archived_txs: Collection<ArchivedTransaction>,
    webhooks: Collection<Webhook>,
    deliveries: Collection<WebhookDelivery>,
}

impl MongoStore {
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = Client::with_uri_str(url)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        let db = client.database(&database_name_from_url(url));

        let store = MongoStore {
            addresses: db.collection("trackedAddresses"),
            active_txs: db.collection("activeTransactions"),
            archived_txs: db.collection("archivedTransactions"),
            webhooks: db.collection("webhooks"),
            deliveries: db.collection("webhookQueue"),
        };
        store.ensure_indexes().await?;
        Ok(store)
    }

    /// Create the secondary indexes the persistence contract requires.
    /// Idempotent: `create_indexes` is a no-op for indexes that already
    /// exist with the same key pattern.
    async fn ensure_indexes(&self) -> Result<(), StoreError> {
        self.addresses
            .create_indexes(vec![
                IndexModel::builder().keys(doc! {"active": 1}).build(),
                IndexModel::builder().keys(doc! {"historical_fetched": 1}).build(),
                IndexModel::builder()
                    .keys(doc! {"active": 1, "historical_fetched": 1})
                    .build(),
            ])
            .await?;

        self.active_txs
            .create_indexes(vec![
                IndexModel::builder().keys(doc! {"addresses": 1}).build(),
                IndexModel::builder().keys(doc! {"status": 1}).build(),
                IndexModel::builder().keys(doc! {"block_height": 1}).build(),
                IndexModel::builder()
                    .keys(doc! {"status": 1, "block_height": 1})
                    .build(),
                IndexModel::builder()
                    .keys(doc! {"first_seen": -1})
                    .build(),
            ])
            .await?;

        self.archived_txs
            .create_indexes(vec![
                IndexModel::builder().keys(doc! {"addresses": 1}).build(),
                IndexModel::builder().keys(doc! {"archived_at": -1}).build(),
                IndexModel::builder().keys(doc! {"block_height": 1}).build(),
            ])
            .await?;

        self.deliveries
            .create_indexes(vec![
                IndexModel::builder()
                    .keys(doc! {"webhook_id": 1, "transaction_id": 1, "status": 1})
                    .build(),
                IndexModel::builder()
                    .keys(doc! {"status": 1, "next_retry": 1})
                    .build(),
            ])
            .await?;

        // Primary keys double as unique indexes on `_id` implicitly; the
        // watched-address collection additionally benefits from a unique
        // index on the address to make re-registration races safe.
        self.addresses
            .create_index(
                IndexModel::builder()
                    .keys(doc! {"_id": 1})
                    .options(IndexOptions::builder().unique(true).build())
                    .build(),
            )
            .await?;

        Ok(())
    }
}

/// Extract the database name from the path segment of a `mongodb://` URL,
/// falling back to a sensible default when the URL carries none (as the
/// bare `mongodb://host:port` form does).
fn database_name_from_url(url: &str) -> String {
    url.split('/')
        .nth(3)
        .map(|rest| rest.split(['?', '#']).next().unwrap_or(rest))
        .filter(|name| !name.is_empty())
        .unwrap_or("bsv-tracker")
        .to_string()
}

fn paginate(limit: i64, offset: u64) -> FindOptions {
    FindOptions::builder()
        .limit(if limit < 0 { None } else { Some(limit) })
        .skip(Some(offset))
        .build()
}

#[async_trait]
impl Store for MongoStore {
    async fn upsert_address(
        &self,
        address: &str,
        label: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<AddressUpsertOutcome, StoreError> {
        if self.addresses.find_one(doc! {"_id": address}).await?.is_some() {
            return Ok(AddressUpsertOutcome::AlreadyExisted);
        }
        let record = WatchedAddress::new(address.to_string(), label, now);
        match self.addresses.insert_one(&record).await {
            Ok(_) => Ok(AddressUpsertOutcome::Added),
            Err(e) => {
                let err: StoreError = e.into();
                match err {
                    StoreError::Conflict(_) => Ok(AddressUpsertOutcome::AlreadyExisted),
                    other => Err(other),
                }
            }
        }
    }

    async fn get_address(&self, address: &str) -> Result<Option<WatchedAddress>, StoreError> {
        Ok(self.addresses.find_one(doc! {"_id": address}).await?)
    }

    async fn list_addresses(
        &self,
        active: Option<bool>,
        limit: i64,
        offset: u64,
    ) -> Result<Vec<WatchedAddress>, StoreError> {
        let mut filter = Document::new();
        if let Some(active) = active {
            filter.insert("active", active);
        }
        let cursor = self.addresses.find(filter).with_options(paginate(limit, offset)).await?;
        Ok(cursor.try_collect().await?)
    }

    async fn all_active_addresses(&self) -> Result<Vec<String>, StoreError> {
        let cursor = self.addresses.find(doc! {"active": true}).await?;
        let records: Vec<WatchedAddress> = cursor.try_collect().await?;
        Ok(records.into_iter().map(|a| a.address).collect())
    }

    async fn deactivate_address(&self, address: &str) -> Result<bool, StoreError> {
        let result = self
            .addresses
            .update_one(doc! {"_id": address}, doc! {"$set": {"active": false}})
            .await?;
        Ok(result.matched_count > 0)
    }

    async fn get_active_among(
        &self,
        candidates: &[String],
    ) -> Result<Vec<WatchedAddress>, StoreError> {
        let cursor = self
            .addresses
            .find(doc! {"_id": {"$in": candidates}, "active": true})
            .await?;
        Ok(cursor.try_collect().await?)
    }

    async fn bump_activity(
        &self,
        addresses: &[String],
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.addresses
            .update_many(
                doc! {"_id": {"$in": addresses}},
                doc! {"$inc": {"transaction_count": 1}, "$set": {"last_activity": now}},
            )
            .await?;
        Ok(())
    }

    async fn mark_historical_fetched(
        &self,
        address: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.addresses
            .update_one(
                doc! {"_id": address},
                doc! {"$set": {"historical_fetched": true, "historical_fetched_at": at}},
            )
            .await?;
        Ok(())
    }

    async fn addresses_needing_backfill(&self) -> Result<Vec<WatchedAddress>, StoreError> {
        let cursor = self
            .addresses
            .find(doc! {"historical_fetched": {"$ne": true}})
            .await?;
        Ok(cursor.try_collect().await?)
    }

    async fn address_count(&self, active: Option<bool>) -> Result<u64, StoreError> {
        let mut filter = Document::new();
        if let Some(active) = active {
            filter.insert("active", active);
        }
        Ok(self.addresses.count_documents(filter).await?)
    }

    async fn upsert_active_tx(
        &self,
        txid: &str,
        addresses: &BTreeSet<String>,
        first_seen: DateTime<Utc>,
        is_historical: bool,
    ) -> Result<(), StoreError> {
        let addrs: Vec<&String> = addresses.iter().collect();
        self.active_txs
            .update_one(
                doc! {"_id": txid},
                doc! {
                    "$addToSet": {"addresses": {"$each": &addrs}},
                    "$setOnInsert": {
                        "first_seen": first_seen,
                        "status": "pending",
                        "confirmations": 0i64,
                        "is_historical": is_historical,
                        "block_height": bson::Bson::Null,
                        "block_hash": bson::Bson::Null,
                        "block_time": bson::Bson::Null,
                        "last_verified": bson::Bson::Null,
                        "hex": bson::Bson::Null,
                    },
                },
            )
            .upsert(true)
            .await?;
        Ok(())
    }

    async fn get_active_tx(&self, txid: &str) -> Result<Option<ActiveTransaction>, StoreError> {
        Ok(self.active_txs.find_one(doc! {"_id": txid}).await?)
    }

    async fn active_tx_exists(&self, txid: &str) -> Result<bool, StoreError> {
        Ok(self.active_txs.find_one(doc! {"_id": txid}).await?.is_some())
    }

    async fn list_active_txs(
        &self,
        status: Option<TxStatus>,
        limit: i64,
        offset: u64,
    ) -> Result<Vec<ActiveTransaction>, StoreError> {
        let mut filter = Document::new();
        if let Some(status) = status {
            filter.insert("status", status_str(status));
        }
        let opts = FindOptions::builder()
            .limit(if limit < 0 { None } else { Some(limit) })
            .skip(Some(offset))
            .sort(doc! {"first_seen": -1})
            .build();
        let cursor = self.active_txs.find(filter).with_options(opts).await?;
        Ok(cursor.try_collect().await?)
    }

    async fn active_txs_for_address(
        &self,
        address: &str,
        limit: i64,
    ) -> Result<Vec<ActiveTransaction>, StoreError> {
        let opts = FindOptions::builder()
            .limit(if limit < 0 { None } else { Some(limit) })
            .sort(doc! {"first_seen": -1})
            .build();
        let cursor = self
            .active_txs
            .find(doc! {"addresses": address})
            .with_options(opts)
            .await?;
        Ok(cursor.try_collect().await?)
    }

    async fn active_txs_for_verification(
        &self,
        limit: usize,
    ) -> Result<Vec<ActiveTransaction>, StoreError> {
        let opts = FindOptions::builder()
            .limit(Some(limit as i64))
            .sort(doc! {"first_seen": 1})
            .build();
        let cursor = self
            .active_txs
            .find(doc! {"status": {"$in": ["pending", "confirming"]}})
            .with_options(opts)
            .await?;
        Ok(cursor.try_collect().await?)
    }

    async fn apply_verification(&self, update: &VerificationUpdate) -> Result<(), StoreError> {
        self.active_txs
            .update_one(
                doc! {"_id": &update.txid},
                doc! {"$set": {
                    "block_hash": &update.block_hash,
                    "block_height": update.block_height.map(|h| h as i64),
                    "block_time": update.block_time.map(|t| t as i64),
                    "confirmations": update.confirmations as i64,
                    "hex": &update.hex,
                    "status": status_str(update.status),
                    "last_verified": update.verified_at,
                }},
            )
            .await?;
        Ok(())
    }

    async fn find_archivable(
        &self,
        tip_height: u64,
        archive_threshold: u64,
    ) -> Result<Vec<ActiveTransaction>, StoreError> {
        let cutoff = tip_height.saturating_sub(archive_threshold) + 1;
        let cursor = self
            .active_txs
            .find(doc! {"status": "confirming", "block_height": {"$lte": cutoff as i64}})
            .await?;
        Ok(cursor.try_collect().await?)
    }

    async fn delete_active_tx(&self, txid: &str) -> Result<(), StoreError> {
        self.active_txs.delete_one(doc! {"_id": txid}).await?;
        Ok(())
    }

    async fn insert_active_txs_bulk(
        &self,
        records: Vec<ActiveTransaction>,
    ) -> Result<(), StoreError> {
        if records.is_empty() {
            return Ok(());
        }
        for record in records {
            if let Err(e) = self.active_txs.insert_one(&record).await {
                let err: StoreError = e.into();
                if !matches!(err, StoreError::Conflict(_)) {
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    async fn archive_tx_exists(&self, txid: &str) -> Result<bool, StoreError> {
        Ok(self.archived_txs.find_one(doc! {"_id": txid}).await?.is_some())
    }

    async fn get_archived_tx(
        &self,
        txid: &str,
    ) -> Result<Option<ArchivedTransaction>, StoreError> {
        Ok(self.archived_txs.find_one(doc! {"_id": txid}).await?)
    }

    async fn insert_archived_tx(&self, record: ArchivedTransaction) -> Result<(), StoreError> {
        match self.archived_txs.insert_one(&record).await {
            Ok(_) => Ok(()),
            Err(e) => {
                let err: StoreError = e.into();
                if matches!(err, StoreError::Conflict(_)) {
                    Ok(())
                } else {
                    Err(err)
                }
            }
        }
    }

    async fn insert_archived_txs_bulk(
        &self,
        records: Vec<ArchivedTransaction>,
    ) -> Result<(), StoreError> {
        for record in records {
            self.insert_archived_tx(record).await?;
        }
        Ok(())
    }

    async fn archived_tx_count(&self) -> Result<u64, StoreError> {
        Ok(self.archived_txs.count_documents(doc! {}).await?)
    }

    async fn create_webhook(&self, webhook: Webhook) -> Result<(), StoreError> {
        self.webhooks.insert_one(&webhook).await?;
        Ok(())
    }

    async fn get_webhook(&self, id: &str) -> Result<Option<Webhook>, StoreError> {
        Ok(self.webhooks.find_one(doc! {"_id": id}).await?)
    }

    async fn list_webhooks(
        &self,
        active: Option<bool>,
        limit: i64,
        offset: u64,
    ) -> Result<Vec<Webhook>, StoreError> {
        let mut filter = Document::new();
        if let Some(active) = active {
            filter.insert("active", active);
        }
        let cursor = self.webhooks.find(filter).with_options(paginate(limit, offset)).await?;
        Ok(cursor.try_collect().await?)
    }

    async fn webhooks_matching(
        &self,
        addresses: &BTreeSet<String>,
    ) -> Result<Vec<Webhook>, StoreError> {
        let addrs: Vec<&String> = addresses.iter().collect();
        let cursor = self
            .webhooks
            .find(doc! {
                "active": true,
                "$or": [
                    {"monitor_all": true},
                    {"addresses": {"$in": &addrs}},
                ],
            })
            .await?;
        Ok(cursor.try_collect().await?)
    }

    async fn update_webhook(
        &self,
        id: &str,
        url: Option<String>,
        addresses: Option<BTreeSet<String>>,
        monitor_all: Option<bool>,
        active: Option<bool>,
    ) -> Result<bool, StoreError> {
        let mut set = Document::new();
        if let Some(url) = url {
            set.insert("url", url);
        }
        if let Some(addresses) = addresses {
            set.insert(
                "addresses",
                addresses.into_iter().collect::<Vec<_>>(),
            );
        }
        if let Some(monitor_all) = monitor_all {
            set.insert("monitor_all", monitor_all);
        }
        if let Some(active) = active {
            set.insert("active", active);
        }
        if set.is_empty() {
            return Ok(self.webhooks.find_one(doc! {"_id": id}).await?.is_some());
        }
        let result = self
            .webhooks
            .update_one(doc! {"_id": id}, doc! {"$set": set})
            .await?;
        Ok(result.matched_count > 0)
    }

    async fn delete_webhook(&self, id: &str) -> Result<bool, StoreError> {
        let result = self.webhooks.delete_one(doc! {"_id": id}).await?;
        Ok(result.deleted_count > 0)
    }

    async fn record_webhook_trigger(
        &self,
        id: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.webhooks
            .update_one(
                doc! {"_id": id},
                doc! {"$inc": {"trigger_count": 1}, "$set": {"last_triggered": now}},
            )
            .await?;
        Ok(())
    }

    async fn enqueue_delivery(&self, delivery: WebhookDelivery) -> Result<(), StoreError> {
        self.deliveries.insert_one(&delivery).await?;
        Ok(())
    }

    async fn supersede_pending_deliveries(
        &self,
        webhook_id: &str,
        transaction_id: &str,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let result = self
            .deliveries
            .update_many(
                doc! {
                    "webhook_id": webhook_id,
                    "transaction_id": transaction_id,
                    "status": {"$in": ["pending", "retry"]},
                },
                doc! {"$set": {
                    "status": "cancelled",
                    "cancelled_at": now,
                    "cancel_reason": "superseded",
                }},
            )
            .await?;
        Ok(result.modified_count)
    }

    async fn cancel_pending_for_webhook(
        &self,
        webhook_id: &str,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let result = self
            .deliveries
            .update_many(
                doc! {
                    "webhook_id": webhook_id,
                    "status": {"$in": ["pending", "retry", "processing"]},
                },
                doc! {"$set": {
                    "status": "cancelled",
                    "cancelled_at": now,
                    "cancel_reason": "webhook_deleted",
                }},
            )
            .await?;
        Ok(result.modified_count)
    }

    async fn claim_deliveries(
        &self,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<WebhookDelivery>, StoreError> {
        let cursor = self
            .deliveries
            .find(doc! {
                "status": {"$in": ["pending", "retry"]},
                "next_retry": {"$lte": now},
            })
            .with_options(FindOptions::builder().limit(Some(limit as i64)).build())
            .await?;
        let candidates: Vec<WebhookDelivery> = cursor.try_collect().await?;

        let mut claimed = Vec::new();
        for candidate in candidates {
            let result = self
                .deliveries
                .update_one(
                    doc! {"_id": &candidate.id, "status": {"$in": ["pending", "retry"]}},
                    doc! {"$set": {"status": "processing", "last_attempt": now}},
                )
                .await?;
            if result.modified_count == 1 {
                let mut claimed_delivery = candidate;
                claimed_delivery.status = DeliveryStatus::Processing;
                claimed_delivery.last_attempt = Some(now);
                claimed.push(claimed_delivery);
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
        self.deliveries
            .update_one(
                doc! {"_id": id},
                doc! {"$set": {
                    "status": "completed",
                    "completed_at": now,
                    "response_status": response_status as i32,
                    "response_body": response_body,
                }},
            )
            .await?;
        Ok(())
    }

    async fn retry_delivery(
        &self,
        id: &str,
        attempts: u32,
        next_retry: DateTime<Utc>,
        last_error: String,
    ) -> Result<(), StoreError> {
        self.deliveries
            .update_one(
                doc! {"_id": id},
                doc! {"$set": {
                    "status": "retry",
                    "attempts": attempts as i32,
                    "next_retry": next_retry,
                    "last_error": last_error,
                }},
            )
            .await?;
        Ok(())
    }

    async fn fail_delivery(
        &self,
        id: &str,
        attempts: u32,
        last_error: String,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.deliveries
            .update_one(
                doc! {"_id": id},
                doc! {"$set": {
                    "status": "failed",
                    "attempts": attempts as i32,
                    "failed_at": now,
                    "last_error": last_error,
                }},
            )
            .await?;
        Ok(())
    }

    async fn cancel_delivery(&self, id: &str, reason: String, now: DateTime<Utc>) -> Result<(), StoreError> {
        self.deliveries
            .update_one(
                doc! {"_id": id},
                doc! {"$set": {
                    "status": "cancelled",
                    "cancelled_at": now,
                    "cancel_reason": reason,
                }},
            )
            .await?;
        Ok(())
    }

    async fn cleanup_terminal_deliveries(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = self
            .deliveries
            .delete_many(doc! {
                "status": {"$in": ["completed", "failed", "cancelled"]},
                "$or": [
                    {"completed_at": {"$lt": cutoff}},
                    {"failed_at": {"$lt": cutoff}},
                    {"cancelled_at": {"$lt": cutoff}},
                ],
            })
            .await?;
        Ok(result.deleted_count)
    }

    async fn deliveries_for_webhook(
        &self,
        webhook_id: &str,
        limit: i64,
    ) -> Result<Vec<WebhookDelivery>, StoreError> {
        let opts = FindOptions::builder()
            .limit(Some(limit))
            .sort(doc! {"created_at": -1})
            .build();
        let cursor = self
            .deliveries
            .find(doc! {"webhook_id": webhook_id})
            .with_options(opts)
            .await?;
        Ok(cursor.try_collect().await?)
    }
}

fn status_str(status: TxStatus) -> &'static str {
    match status {
        TxStatus::Pending => "pending",
        TxStatus::Confirming => "confirming",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn database_name_parses_from_path() {
        assert_eq!(
            database_name_from_url("mongodb://127.0.0.1:27017/bsv-tracker"),
            "bsv-tracker"
        );
        assert_eq!(
            database_name_from_url("mongodb://127.0.0.1:27017/bsv-tracker?retryWrites=true"),
            "bsv-tracker"
        );
        assert_eq!(
            database_name_from_url("mongodb://127.0.0.1:27017"),
            "bsv-tracker"
        );
    }
}
