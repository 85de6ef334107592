use chrono::Utc;
use std::collections::BTreeSet;
use store::{AddressUpsertOutcome, InMemoryStore, Store, TxStatus};

#[tokio::test]
async fn upsert_active_tx_is_idempotent_on_first_seen() {
    let s = InMemoryStore::new();
    let now = Utc::now();
    let addrs: BTreeSet<String> = ["addr1".to_string()].into_iter().collect();

    s.upsert_active_tx("tx1", &addrs, now, false).await.unwrap();
    let first = s.get_active_tx("tx1").await.unwrap().unwrap();

    let later = now + chrono::Duration::seconds(60);
    s.upsert_active_tx("tx1", &addrs, later, false).await.unwrap();
    let second = s.get_active_tx("tx1").await.unwrap().unwrap();

    assert_eq!(first.first_seen, second.first_seen);
}

#[tokio::test]
async fn upsert_active_tx_unions_addresses() {
    let s = InMemoryStore::new();
    let now = Utc::now();
    let a: BTreeSet<String> = ["addr1".to_string()].into_iter().collect();
    let b: BTreeSet<String> = ["addr2".to_string()].into_iter().collect();

    s.upsert_active_tx("tx1", &a, now, false).await.unwrap();
    s.upsert_active_tx("tx1", &b, now, false).await.unwrap();

    let tx = s.get_active_tx("tx1").await.unwrap().unwrap();
    assert_eq!(tx.addresses.len(), 2);
    assert_eq!(tx.status, TxStatus::Pending);
}

#[tokio::test]
async fn address_registration_reports_already_existed() {
    let s = InMemoryStore::new();
    let now = Utc::now();
    assert_eq!(
        s.upsert_address("addr1", None, now).await.unwrap(),
        AddressUpsertOutcome::Added
    );
    assert_eq!(
        s.upsert_address("addr1", None, now).await.unwrap(),
        AddressUpsertOutcome::AlreadyExisted
    );
}

#[tokio::test]
async fn find_archivable_respects_threshold_boundary() {
    let s = InMemoryStore::new();
    let now = Utc::now();
    let addrs: BTreeSet<String> = ["addr1".to_string()].into_iter().collect();
    s.upsert_active_tx("tx1", &addrs, now, false).await.unwrap();
    s.apply_verification(&store::VerificationUpdate {
        txid: "tx1".to_string(),
        block_hash: Some("h".to_string()),
        block_height: Some(100),
        block_time: Some(0),
        confirmations: 144,
        hex: None,
        status: TxStatus::Confirming,
        verified_at: now,
    })
    .await
    .unwrap();

    // tip=243 -> block_height 100 <= 243-144+1=100: archivable
    let archivable = s.find_archivable(243, 144).await.unwrap();
    assert_eq!(archivable.len(), 1);

    // tip=242 -> cutoff=99: not yet archivable
    let not_yet = s.find_archivable(242, 144).await.unwrap();
    assert!(not_yet.is_empty());
}

#[tokio::test]
async fn archiving_moves_record_out_of_active() {
    let s = InMemoryStore::new();
    let now = Utc::now();
    let addrs: BTreeSet<String> = ["addr1".to_string()].into_iter().collect();
    s.upsert_active_tx("tx1", &addrs, now, false).await.unwrap();
    let mut tx = s.get_active_tx("tx1").await.unwrap().unwrap();
    tx.block_height = Some(100);
    tx.block_hash = Some("h".to_string());
    tx.confirmations = 144;
    tx.status = TxStatus::Confirming;

    let archived: store::ArchivedTransaction = (tx, now).into();
    s.insert_archived_tx(archived).await.unwrap();
    s.delete_active_tx("tx1").await.unwrap();

    assert!(s.get_active_tx("tx1").await.unwrap().is_none());
    assert!(s.archive_tx_exists("tx1").await.unwrap());
}

#[tokio::test]
async fn webhook_coalescing_cancels_superseded_deliveries() {
    use store::model::{DeliveryStatus, WebhookDelivery};

    let s = InMemoryStore::new();
    let now = Utc::now();

    let make = |id: &str| WebhookDelivery {
        id: id.to_string(),
        webhook_id: "wh1".to_string(),
        url: "http://example.com".to_string(),
        payload: serde_json::json!({}),
        transaction_id: Some("tx1".to_string()),
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

    for i in 0..3 {
        let id = format!("d{i}");
        s.supersede_pending_deliveries("wh1", "tx1", now).await.unwrap();
        s.enqueue_delivery(make(&id)).await.unwrap();
    }

    let deliveries = s.deliveries_for_webhook("wh1", 10).await.unwrap();
    let pending = deliveries
        .iter()
        .filter(|d| d.status == DeliveryStatus::Pending)
        .count();
    let cancelled = deliveries
        .iter()
        .filter(|d| d.status == DeliveryStatus::Cancelled)
        .count();
    assert_eq!(pending, 1);
    assert_eq!(cancelled, 2);
}

#[tokio::test]
async fn active_tx_invariant_pending_has_no_block_fields() {
    let s = InMemoryStore::new();
    let now = Utc::now();
    let addrs: BTreeSet<String> = ["addr1".to_string()].into_iter().collect();
    s.upsert_active_tx("tx1", &addrs, now, false).await.unwrap();
    let tx = s.get_active_tx("tx1").await.unwrap().unwrap();
    assert_eq!(tx.status, TxStatus::Pending);
    assert!(tx.block_height.is_none());
    assert!(tx.block_hash.is_none());
    assert_eq!(tx.confirmations, 0);
}
