// intake/src/lib.rs

//! Transaction Intake (C6): consumes raw-transaction frames, runs the
//! address extractor, pre-screens through the membership set, upserts a
//! new active record, and fans out "new" webhook events.
//!
//! Any failure aborts this transaction's intake only; the caller's
//! receive loop must keep running regardless of what [`process_raw_tx`]
//! returns.

use chrono::Utc;
use membership_set::MembershipSet;
use std::collections::BTreeSet;
use store::{Store, StoreError};
use thiserror::Error;
use tx_parser::{extract_from_bytes, Network, TxParseError};
use webhook_dispatcher::{dispatch_event, Changes, TransactionSnapshot};

#[derive(Debug, Error)]
pub enum IntakeError {
    #[error(transparent)]
    Parse(#[from] TxParseError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Outcome of one call to [`process_raw_tx`], useful to callers that want
/// to log or count what happened without re-deriving it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntakeOutcome {
    /// No candidate address was watched; nothing written.
    NoMatch,
    /// At least one watched address matched; an active record was
    /// upserted and webhooks (if any matched) were enqueued.
    Matched,
}

/// Extract, screen, record, and notify for one raw transaction frame.
pub async fn process_raw_tx(
    bytes: &[u8],
    network: Network,
    max_tx_size_bytes: usize,
    membership: &MembershipSet,
    store: &dyn Store,
) -> Result<IntakeOutcome, IntakeError> {
    let extracted = extract_from_bytes(bytes, network, max_tx_size_bytes)?;
    let all = extracted.all_addresses();

    let candidates = membership.filter(all.iter().cloned());
    if candidates.is_empty() {
        return Ok(IntakeOutcome::NoMatch);
    }

    let candidate_list: Vec<String> = candidates.into_iter().collect();
    let tracked_records = store.get_active_among(&candidate_list).await?;
    if tracked_records.is_empty() {
        return Ok(IntakeOutcome::NoMatch);
    }

    let tracked: BTreeSet<String> = tracked_records.iter().map(|a| a.address.clone()).collect();
    let now = Utc::now();

    store
        .upsert_active_tx(&extracted.txid, &tracked, now, false)
        .await?;

    let addrs: Vec<String> = tracked.iter().cloned().collect();
    store.bump_activity(&addrs, now).await?;

    let snapshot = TransactionSnapshot {
        _id: extracted.txid.clone(),
        addresses: tracked.clone(),
        confirmations: 0,
        status: "pending".to_string(),
        block_height: None,
        block_hash: None,
        first_seen: now,
    };
    dispatch_event(
        store,
        &tracked,
        &snapshot,
        Changes {
            status: Some("new".to_string()),
            ..Default::default()
        },
        now,
    )
    .await?;

    Ok(IntakeOutcome::Matched)
}

/// Decode `hex_str` and run [`process_raw_tx`] on the resulting bytes.
pub async fn process_raw_tx_hex(
    hex_str: &str,
    network: Network,
    max_tx_size_bytes: usize,
    membership: &MembershipSet,
    store: &dyn Store,
) -> Result<IntakeOutcome, IntakeError> {
    let bytes = hex::decode(hex_str).map_err(|e| TxParseError::MalformedTx(e.to_string()))?;
    process_raw_tx(&bytes, network, max_tx_size_bytes, membership, store).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use store::{InMemoryStore, Webhook};

    const KNOWN_TX: &str = "01000000014f226ee6c5e75ea5528219c9e98ad372fcb5cd3c9ac300d1cd25680370903dd02e0000006b483045022100e27577999098d75ae8afc04cad0253a879ef052e2776ccd9e1b921d4339a08a102203c9291d9c32ca06799d53567cb05df2ab973f4281a0a2a4bb85066e9d6964aaa41210292acdb57c788c1e8c83cdb0ae8f23e079139ba7ba1bccf67b31653c7af12c4b4ffffffff0140860100000000001976a914be83350213ab6483e111f675268b5bbaba7cdcae88ac00000000";

    #[tokio::test]
    async fn no_match_with_empty_membership_set() {
        let store = InMemoryStore::new();
        let membership = MembershipSet::new();

        let outcome = process_raw_tx_hex(
            KNOWN_TX,
            Network::Testnet,
            tx_parser::DEFAULT_MAX_TX_SIZE_BYTES,
            &membership,
            &store,
        )
        .await
        .unwrap();

        assert_eq!(outcome, IntakeOutcome::NoMatch);
        assert_eq!(store.address_count(None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn matched_address_creates_pending_tx_and_enqueues_webhook() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        store
            .upsert_address("mnai8LzKea5e3C9qgrBo7JHgpiEnHKMhwR", None, now)
            .await
            .unwrap();

        let membership = MembershipSet::new();
        membership.add("mnai8LzKea5e3C9qgrBo7JHgpiEnHKMhwR");

        store
            .create_webhook(Webhook {
                id: "wh1".to_string(),
                url: "http://example.com/hook".to_string(),
                addresses: BTreeSet::new(),
                monitor_all: true,
                active: true,
                created_at: now,
                trigger_count: 0,
                last_triggered: None,
            })
            .await
            .unwrap();

        let outcome = process_raw_tx_hex(
            KNOWN_TX,
            Network::Testnet,
            tx_parser::DEFAULT_MAX_TX_SIZE_BYTES,
            &membership,
            &store,
        )
        .await
        .unwrap();

        assert_eq!(outcome, IntakeOutcome::Matched);

        let txs = store.list_active_txs(None, 10, 0).await.unwrap();
        assert_eq!(txs.len(), 1);
        assert_eq!(txs[0].status, store::TxStatus::Pending);
        assert!(txs[0]
            .addresses
            .contains("mnai8LzKea5e3C9qgrBo7JHgpiEnHKMhwR"));

        let deliveries = store.deliveries_for_webhook("wh1", 10).await.unwrap();
        assert_eq!(deliveries.len(), 1);
        assert_eq!(
            deliveries[0].payload["changes"]["status"],
            serde_json::json!("new")
        );
    }

    #[tokio::test]
    async fn repeated_intake_of_same_tx_preserves_first_seen() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        store
            .upsert_address("mnai8LzKea5e3C9qgrBo7JHgpiEnHKMhwR", None, now)
            .await
            .unwrap();
        let membership = MembershipSet::new();
        membership.add("mnai8LzKea5e3C9qgrBo7JHgpiEnHKMhwR");

        for _ in 0..3 {
            process_raw_tx_hex(
                KNOWN_TX,
                Network::Testnet,
                tx_parser::DEFAULT_MAX_TX_SIZE_BYTES,
                &membership,
                &store,
            )
            .await
            .unwrap();
        }

        let txs = store.list_active_txs(None, 10, 0).await.unwrap();
        assert_eq!(txs.len(), 1);
    }

    #[tokio::test]
    async fn malformed_hex_is_reported_not_panicked() {
        let store = InMemoryStore::new();
        let membership = MembershipSet::new();
        let err = process_raw_tx_hex(
            "not-hex",
            Network::Mainnet,
            tx_parser::DEFAULT_MAX_TX_SIZE_BYTES,
            &membership,
            &store,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, IntakeError::Parse(_)));
    }
}
