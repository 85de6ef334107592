// tracker/src/lib.rs

//! Confirmation Tracker (C7): on every new block hash, re-verifies every
//! active transaction under a bounded concurrent pool, advances the
//! per-transaction state machine, retries transient RPC failures with
//! backoff, and archives matured records.

use chrono::{DateTime, Utc};
use node_rpc::{NodeClient, NodeRpcError};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use store::{ArchivedTransaction, Store, StoreError, TxStatus, VerificationUpdate};
use tokio::sync::Mutex;
use webhook_dispatcher::{dispatch_event, Changes, TransactionSnapshot};

/// Tunables for one [`ConfirmationTracker`].
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// `AUTO_ARCHIVE_AFTER` (default 144).
    pub archive_threshold: u64,
    /// Per-cycle cap on how many active transactions are re-verified.
    pub pending_tx_limit: usize,
    /// `RPC_CONCURRENCY` (default 4).
    pub rpc_concurrency: usize,
    /// Pause between worker batches to cap burst rate (default 200ms).
    pub inter_batch_interval: Duration,
    /// Delay before a transiently-failed verification is retried (default 30s).
    pub retry_delay: Duration,
    /// Failures tolerated before a retry-queue entry is dropped (default 3).
    pub max_retries: u32,
    /// Retry-queue items drained per cycle (default 10).
    pub retry_batch_size: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        TrackerConfig {
            archive_threshold: 144,
            pending_tx_limit: 50,
            rpc_concurrency: 4,
            inter_batch_interval: Duration::from_millis(200),
            retry_delay: Duration::from_secs(30),
            max_retries: 3,
            retry_batch_size: 10,
        }
    }
}

#[derive(Debug, Clone)]
struct RetryItem {
    txid: String,
    next_retry_at: DateTime<Utc>,
    attempts: u32,
}

/// Summary of one [`ConfirmationTracker::process_new_block`] cycle,
/// returned for logging/the manual-sweep REST endpoint.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub tip_height: u64,
    pub verified: usize,
    pub archived: usize,
    pub retried: usize,
    pub dropped: usize,
}

/// Drives one confirmation-tracker cycle per new block. Holds the
/// ephemeral retry queue and the single-flight in-progress gate: a
/// single worker with an incoming signal that coalesces overlapping
/// wake-ups, modeled here as a `try_lock`'d mutex so overlapping block
/// hashes are simply dropped rather than queued.
pub struct ConfirmationTracker {
    node: Arc<dyn NodeClient>,
    store: Arc<dyn Store>,
    config: TrackerConfig,
    in_progress: Mutex<()>,
    retry_queue: Mutex<Vec<RetryItem>>,
}

impl ConfirmationTracker {
    pub fn new(node: Arc<dyn NodeClient>, store: Arc<dyn Store>, config: TrackerConfig) -> Self {
        ConfirmationTracker {
            node,
            store,
            config,
            in_progress: Mutex::new(()),
            retry_queue: Mutex::new(Vec::new()),
        }
    }

    /// Run one block-driven cycle. Returns `None` if another cycle is
    /// already in flight — the frame is dropped rather than queued.
    pub async fn process_new_block(&self) -> Result<Option<CycleReport>, StoreError> {
        let _guard = match self.in_progress.try_lock() {
            Ok(guard) => guard,
            Err(_) => return Ok(None),
        };

        let now = Utc::now();
        let tip_height = match self.node.get_block_count().await {
            Ok(h) => h,
            Err(e) => {
                tracing::warn!(error = %e, "failed to read tip height; skipping cycle");
                return Ok(None);
            }
        };

        let worklist = self
            .store
            .active_txs_for_verification(self.config.pending_tx_limit)
            .await?;

        let mut report = CycleReport {
            tip_height,
            ..Default::default()
        };

        for batch in worklist.chunks(self.config.rpc_concurrency) {
            let futures = batch
                .iter()
                .map(|tx| self.verify_one(tx.txid.clone(), now));
            let outcomes = futures::future::join_all(futures).await;
            for outcome in outcomes {
                match outcome? {
                    VerifyOutcome::Updated => report.verified += 1,
                    VerifyOutcome::Retrying => report.retried += 1,
                    VerifyOutcome::Failed => report.dropped += 1,
                }
            }
            if !self.config.inter_batch_interval.is_zero() {
                tokio::time::sleep(self.config.inter_batch_interval).await;
            }
        }

        report.archived += self.archival_sweep(tip_height, now).await?;

        let (retried, dropped) = self.drain_retry_queue(now).await?;
        report.retried += retried;
        report.dropped += dropped;

        Ok(Some(report))
    }

    /// Store failures propagate (Mongo outages are fatal per the
    /// process's shutdown policy); only transient RPC failures
    /// (`RpcTimeout`/`RpcUnavailable`) go to the retry queue. A permanent
    /// RPC application error (`RpcError`/`Malformed`) is logged and
    /// dropped for this cycle rather than retried forever.
    async fn verify_one(&self, txid: String, now: DateTime<Utc>) -> Result<VerifyOutcome, StoreError> {
        match self.apply_one_verification(&txid, now).await {
            Ok(()) => Ok(VerifyOutcome::Updated),
            Err(VerifyError::Store(e)) => Err(e),
            Err(VerifyError::Rpc(e)) if is_transient(&e) => {
                tracing::warn!(txid = %txid, error = %e, "verification failed; queued for retry");
                self.enqueue_retry(txid, now, 1).await;
                Ok(VerifyOutcome::Retrying)
            }
            Err(e) => {
                tracing::error!(txid = %txid, error = %e, "verification failed permanently; not retrying");
                Ok(VerifyOutcome::Failed)
            }
        }
    }

    async fn apply_one_verification(&self, txid: &str, now: DateTime<Utc>) -> Result<(), VerifyError> {
        let prior = self.store.get_active_tx(txid).await?;
        let response = self.node.get_raw_transaction(txid).await?;

        let status = if response.blockhash.is_some() && response.confirmations > 0 {
            TxStatus::Confirming
        } else {
            TxStatus::Pending
        };

        let update = VerificationUpdate {
            txid: txid.to_string(),
            block_hash: response.blockhash.clone(),
            block_height: response.block_height,
            block_time: response.block_time,
            confirmations: response.confirmations,
            hex: Some(response.hex),
            status,
            verified_at: now,
        };
        self.store.apply_verification(&update).await?;

        if let Some(prior) = prior {
            self.notify_change(&prior, &update, now).await?;
        }
        Ok(())
    }

    async fn notify_change(
        &self,
        prior: &store::ActiveTransaction,
        update: &VerificationUpdate,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut changes = Changes::default();
        if prior.confirmations != update.confirmations {
            changes.confirmations = Some(update.confirmations);
        }
        if prior.block_height != update.block_height {
            changes.block_height = update.block_height;
        }
        if prior.status != update.status {
            changes.status = Some(status_label(update.status).to_string());
        }
        if changes.confirmations.is_none() && changes.block_height.is_none() && changes.status.is_none() {
            return Ok(());
        }

        let snapshot = TransactionSnapshot {
            _id: update.txid.clone(),
            addresses: prior.addresses.clone(),
            confirmations: update.confirmations,
            status: status_label(update.status).to_string(),
            block_height: update.block_height,
            block_hash: update.block_hash.clone(),
            first_seen: prior.first_seen,
        };
        dispatch_event(self.store.as_ref(), &prior.addresses, &snapshot, changes, now).await?;
        Ok(())
    }

    /// Spec §4.7 step 4: mirror every `confirming` transaction whose
    /// block height is at least `archive_threshold` deep into the
    /// archived collection, then bump `transaction_count` on its
    /// addresses and notify webhooks.
    async fn archival_sweep(&self, tip_height: u64, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let archivable = self
            .store
            .find_archivable(tip_height, self.config.archive_threshold)
            .await?;
        let mut count = 0;
        for tx in archivable {
            let addresses: BTreeSet<String> = tx.addresses.clone();
            let archived = ArchivedTransaction::from((tx.clone(), now));
            self.store.insert_archived_tx(archived.clone()).await?;
            self.store.delete_active_tx(&tx.txid).await?;
            let addr_list: Vec<String> = addresses.iter().cloned().collect();
            self.store.bump_activity(&addr_list, now).await?;

            let snapshot = TransactionSnapshot {
                _id: archived.txid.clone(),
                addresses: addresses.clone(),
                confirmations: archived.final_confirmations,
                status: "archived".to_string(),
                block_height: Some(archived.block_height),
                block_hash: Some(archived.block_hash.clone()),
                first_seen: archived.first_seen,
            };
            dispatch_event(
                self.store.as_ref(),
                &addresses,
                &snapshot,
                Changes {
                    status: Some("archived".to_string()),
                    confirmations: Some(archived.final_confirmations),
                    ..Default::default()
                },
                now,
            )
            .await?;
            count += 1;
        }
        Ok(count)
    }

    async fn enqueue_retry(&self, txid: String, now: DateTime<Utc>, attempts: u32) {
        let mut q = self.retry_queue.lock().await;
        q.retain(|item| item.txid != txid);
        q.push(RetryItem {
            txid,
            next_retry_at: now + chrono::Duration::from_std(self.config.retry_delay).unwrap(),
            attempts,
        });
    }

    /// Spec §4.7 step 5: process at most `retry_batch_size` ready items.
    async fn drain_retry_queue(&self, now: DateTime<Utc>) -> Result<(usize, usize), StoreError> {
        let ready: Vec<RetryItem> = {
            let mut q = self.retry_queue.lock().await;
            let mut ready = Vec::new();
            q.retain(|item| {
                if item.next_retry_at <= now && ready.len() < self.config.retry_batch_size {
                    ready.push(item.clone());
                    false
                } else {
                    true
                }
            });
            ready
        };

        let mut retried = 0;
        let mut dropped = 0;
        for item in ready {
            match self.apply_one_verification(&item.txid, now).await {
                Ok(()) => retried += 1,
                Err(VerifyError::Store(e)) => return Err(e),
                Err(VerifyError::Rpc(e)) if is_transient(&e) => {
                    if item.attempts >= self.config.max_retries {
                        tracing::error!(txid = %item.txid, error = %e, "retry budget exhausted; dropping");
                        dropped += 1;
                    } else {
                        tracing::warn!(txid = %item.txid, error = %e, attempts = item.attempts, "retry failed again");
                        self.enqueue_retry(item.txid, now, item.attempts + 1).await;
                        retried += 1;
                    }
                }
                Err(e) => {
                    tracing::error!(txid = %item.txid, error = %e, "retry failed permanently; dropping");
                    dropped += 1;
                }
            }
        }
        Ok((retried, dropped))
    }
}

enum VerifyOutcome {
    Updated,
    Retrying,
    Failed,
}

#[derive(Debug, thiserror::Error)]
enum VerifyError {
    #[error(transparent)]
    Rpc(#[from] NodeRpcError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// `RpcTimeout`/`RpcUnavailable` are transport-level hiccups worth
/// retrying; `RpcError`/`Malformed` are application-level responses from
/// the node that a retry won't fix.
fn is_transient(e: &NodeRpcError) -> bool {
    matches!(e, NodeRpcError::RpcTimeout | NodeRpcError::RpcUnavailable(_))
}

fn status_label(status: TxStatus) -> &'static str {
    match status {
        TxStatus::Pending => "pending",
        TxStatus::Confirming => "confirming",
    }
}
