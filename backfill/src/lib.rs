// backfill/src/lib.rs

//! Historical Backfill (C8): for each newly registered (or not-yet-
//! fetched) address, pages the block explorer up to a cap and merges
//! discovered transactions into the active/archived collections
//! idempotently.
//!
//! The explorer's confirmed-history page reports only
//! `tx_hash`/`height`/`time` — no block hash. Since archiving a
//! transaction requires one (the `ArchivedTransaction` invariant), and
//! the only other on-chain source this system has is the node RPC's
//! `getrawtransaction`, each not-yet-seen historical id is resolved
//! through the node client to get an authoritative
//! `blockhash`/`confirmations` before deciding whether it archives
//! immediately or joins the active set. If the node call itself fails,
//! backfill falls back to the explorer-reported height to estimate
//! confirmations and leaves the record active (never archived) pending
//! a later confirmation-tracker cycle with a real block hash.

use chrono::{DateTime, Utc};
use explorer_client::{paginate, ExplorerClient, ExplorerError};
use node_rpc::NodeClient;
use std::collections::BTreeSet;
use store::{ActiveTransaction, ArchivedTransaction, Store, StoreError, TxStatus};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BackfillError {
    #[error(transparent)]
    Explorer(#[from] ExplorerError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Summary of one address's backfill run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BackfillReport {
    pub fetched: usize,
    pub skipped_existing: usize,
    pub inserted_active: usize,
    pub inserted_archived: usize,
}

/// Page the explorer for one address's history and merge it into the
/// store.
pub async fn backfill_address(
    address: &str,
    explorer: &dyn ExplorerClient,
    node: &dyn NodeClient,
    store: &dyn Store,
    max_history: usize,
    archive_threshold: u64,
    now: DateTime<Utc>,
) -> Result<BackfillReport, BackfillError> {
    let entries = paginate(explorer, address, max_history).await?;
    let tip_height = node.get_block_count().await.unwrap_or(0);

    let mut report = BackfillReport {
        fetched: entries.len(),
        ..Default::default()
    };

    let mut active_records = Vec::new();
    let mut archived_records = Vec::new();

    for entry in entries {
        if store.active_tx_exists(&entry.tx_hash).await?
            || store.archive_tx_exists(&entry.tx_hash).await?
        {
            report.skipped_existing += 1;
            continue;
        }

        let addresses: BTreeSet<String> = std::iter::once(address.to_string()).collect();

        match node.get_raw_transaction(&entry.tx_hash).await {
            Ok(verbose) if verbose.blockhash.is_some() && verbose.confirmations >= archive_threshold => {
                archived_records.push(ArchivedTransaction {
                    txid: entry.tx_hash,
                    addresses,
                    block_height: verbose.block_height.unwrap_or(0),
                    block_hash: verbose.blockhash.unwrap(),
                    final_confirmations: verbose.confirmations,
                    first_seen: now,
                    is_historical: true,
                    archived_at: now,
                    archive_height: tip_height,
                });
            }
            Ok(verbose) => {
                let status = if verbose.confirmations > 0 {
                    TxStatus::Confirming
                } else {
                    TxStatus::Pending
                };
                active_records.push(ActiveTransaction {
                    txid: entry.tx_hash,
                    addresses,
                    block_height: verbose.block_height,
                    block_hash: verbose.blockhash,
                    block_time: verbose.block_time,
                    confirmations: verbose.confirmations,
                    first_seen: now,
                    status,
                    is_historical: true,
                    last_verified: Some(now),
                    hex: Some(verbose.hex),
                });
            }
            Err(e) => {
                tracing::warn!(
                    txid = %entry.tx_hash, address, error = %e,
                    "node lookup failed during backfill; falling back to explorer height"
                );
                let confirmations = match entry.height {
                    Some(h) if tip_height > 0 => tip_height.saturating_sub(h) + 1,
                    _ => 0,
                };
                let status = if confirmations > 0 {
                    TxStatus::Confirming
                } else {
                    TxStatus::Pending
                };
                active_records.push(ActiveTransaction {
                    txid: entry.tx_hash,
                    addresses,
                    block_height: entry.height,
                    block_hash: None,
                    block_time: entry.time,
                    confirmations,
                    first_seen: now,
                    status,
                    is_historical: true,
                    last_verified: None,
                    hex: None,
                });
            }
        }
    }

    report.inserted_active = active_records.len();
    report.inserted_archived = archived_records.len();

    store.insert_active_txs_bulk(active_records).await?;
    store.insert_archived_txs_bulk(archived_records).await?;
    store.mark_historical_fetched(address, now).await?;

    Ok(report)
}

/// Run backfill over every address where `historical_fetched != true`,
/// invoked at startup for this worklist. An explorer failure for one
/// address is logged and the address is left un-fetched so it retries
/// on the next startup; other addresses still run.
pub async fn startup_sweep(
    explorer: &dyn ExplorerClient,
    node: &dyn NodeClient,
    store: &dyn Store,
    max_history: usize,
    archive_threshold: u64,
    now: DateTime<Utc>,
) -> Result<usize, StoreError> {
    let worklist = store.addresses_needing_backfill().await?;
    let mut completed = 0;
    for address in worklist {
        match backfill_address(
            &address.address,
            explorer,
            node,
            store,
            max_history,
            archive_threshold,
            now,
        )
        .await
        {
            Ok(_) => completed += 1,
            Err(e) => {
                tracing::warn!(address = %address.address, error = %e, "historical backfill failed; will retry next startup");
            }
        }
    }
    Ok(completed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use explorer_client::HistoryEntry;
    use node_rpc::{NodeRpcError, RawTransactionVerbose};
    use std::collections::HashMap;
    use std::sync::Mutex;
    use store::InMemoryStore;

    struct FakeExplorer {
        pages: Vec<Vec<HistoryEntry>>,
    }

    #[async_trait]
    impl ExplorerClient for FakeExplorer {
        async fn confirmed_history(
            &self,
            _address: &str,
            token: Option<&str>,
        ) -> Result<(Vec<HistoryEntry>, Option<String>), ExplorerError> {
            let idx: usize = token.map(|t| t.parse().unwrap()).unwrap_or(0);
            match self.pages.get(idx) {
                Some(page) => {
                    let next = if idx + 1 < self.pages.len() {
                        Some((idx + 1).to_string())
                    } else {
                        None
                    };
                    Ok((page.clone(), next))
                }
                None => Ok((Vec::new(), None)),
            }
        }
    }

    struct FakeNode {
        block_count: u64,
        txs: Mutex<HashMap<String, RawTransactionVerbose>>,
    }

    #[async_trait]
    impl NodeClient for FakeNode {
        async fn get_block_count(&self) -> Result<u64, NodeRpcError> {
            Ok(self.block_count)
        }

        async fn get_raw_transaction(
            &self,
            txid: &str,
        ) -> Result<RawTransactionVerbose, NodeRpcError> {
            self.txs
                .lock()
                .unwrap()
                .get(txid)
                .cloned()
                .ok_or(NodeRpcError::RpcError {
                    code: -5,
                    message: "not found".to_string(),
                })
        }
    }

    fn entry(tx_hash: &str, height: u64) -> HistoryEntry {
        HistoryEntry {
            tx_hash: tx_hash.to_string(),
            height: Some(height),
            time: Some(0),
        }
    }

    #[tokio::test]
    async fn deep_historical_tx_archives_immediately() {
        let store = InMemoryStore::new();
        store.upsert_address("addr1", None, Utc::now()).await.unwrap();

        let explorer = FakeExplorer {
            pages: vec![vec![entry("tx1", 100000)]],
        };
        let node = FakeNode {
            block_count: 100200,
            txs: Mutex::new(HashMap::from([(
                "tx1".to_string(),
                RawTransactionVerbose {
                    hex: "hex".to_string(),
                    txid: "tx1".to_string(),
                    blockhash: Some("bh1".to_string()),
                    block_height: Some(100000),
                    block_time: Some(0),
                    confirmations: 201,
                },
            )])),
        };

        let report = backfill_address("addr1", &explorer, &node, &store, 500, 144, Utc::now())
            .await
            .unwrap();
        assert_eq!(report.inserted_archived, 1);
        assert_eq!(report.inserted_active, 0);

        let archived = store.get_archived_tx("tx1").await.unwrap().unwrap();
        assert_eq!(archived.final_confirmations, 201);
        assert!(store.get_address("addr1").await.unwrap().unwrap().historical_fetched);
    }

    #[tokio::test]
    async fn shallow_historical_tx_stays_active() {
        let store = InMemoryStore::new();
        store.upsert_address("addr1", None, Utc::now()).await.unwrap();

        let explorer = FakeExplorer {
            pages: vec![vec![entry("tx2", 100190)]],
        };
        let node = FakeNode {
            block_count: 100200,
            txs: Mutex::new(HashMap::from([(
                "tx2".to_string(),
                RawTransactionVerbose {
                    hex: "hex".to_string(),
                    txid: "tx2".to_string(),
                    blockhash: Some("bh2".to_string()),
                    block_height: Some(100190),
                    block_time: Some(0),
                    confirmations: 11,
                },
            )])),
        };

        let report = backfill_address("addr1", &explorer, &node, &store, 500, 144, Utc::now())
            .await
            .unwrap();
        assert_eq!(report.inserted_active, 1);
        let tx = store.get_active_tx("tx2").await.unwrap().unwrap();
        assert_eq!(tx.status, TxStatus::Confirming);
    }

    #[tokio::test]
    async fn rerunning_backfill_is_a_no_op() {
        let store = InMemoryStore::new();
        store.upsert_address("addr1", None, Utc::now()).await.unwrap();
        let explorer = FakeExplorer {
            pages: vec![vec![entry("tx3", 100190)]],
        };
        let node = FakeNode {
            block_count: 100200,
            txs: Mutex::new(HashMap::from([(
                "tx3".to_string(),
                RawTransactionVerbose {
                    hex: "hex".to_string(),
                    txid: "tx3".to_string(),
                    blockhash: Some("bh3".to_string()),
                    block_height: Some(100190),
                    block_time: Some(0),
                    confirmations: 11,
                },
            )])),
        };

        backfill_address("addr1", &explorer, &node, &store, 500, 144, Utc::now())
            .await
            .unwrap();
        let second = backfill_address("addr1", &explorer, &node, &store, 500, 144, Utc::now())
            .await
            .unwrap();
        assert_eq!(second.inserted_active, 0);
        assert_eq!(second.skipped_existing, 1);
    }

    #[tokio::test]
    async fn node_lookup_failure_falls_back_to_explorer_height() {
        let store = InMemoryStore::new();
        store.upsert_address("addr1", None, Utc::now()).await.unwrap();
        let explorer = FakeExplorer {
            pages: vec![vec![entry("tx4", 100000)]],
        };
        let node = FakeNode {
            block_count: 100200,
            txs: Mutex::new(HashMap::new()),
        };

        let report = backfill_address("addr1", &explorer, &node, &store, 500, 144, Utc::now())
            .await
            .unwrap();
        assert_eq!(report.inserted_active, 1);
        let tx = store.get_active_tx("tx4").await.unwrap().unwrap();
        assert!(tx.block_hash.is_none());
        assert_eq!(tx.confirmations, 100200 - 100000 + 1);
    }
}
