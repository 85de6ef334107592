// api/src/tests.rs

use crate::{router, AppState};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use explorer_client::{ExplorerClient, ExplorerError, HistoryEntry};
use node_rpc::{NodeClient, NodeRpcError, RawTransactionVerbose};
use std::sync::Arc;
use store::InMemoryStore;
use tower::ServiceExt;
use tracker::{ConfirmationTracker, TrackerConfig};
use tx_parser::Network;

struct EmptyExplorer;

#[async_trait]
impl ExplorerClient for EmptyExplorer {
    async fn confirmed_history(
        &self,
        _address: &str,
        _token: Option<&str>,
    ) -> Result<(Vec<HistoryEntry>, Option<String>), ExplorerError> {
        Ok((Vec::new(), None))
    }
}

struct EmptyNode;

#[async_trait]
impl NodeClient for EmptyNode {
    async fn get_block_count(&self) -> Result<u64, NodeRpcError> {
        Ok(0)
    }

    async fn get_raw_transaction(&self, txid: &str) -> Result<RawTransactionVerbose, NodeRpcError> {
        Err(NodeRpcError::RpcError {
            code: -5,
            message: format!("no such transaction: {txid}"),
        })
    }
}

fn test_state(require_api_key: bool, api_key: Option<String>) -> AppState {
    let store: Arc<dyn store::Store> = Arc::new(InMemoryStore::new());
    let node: Arc<dyn NodeClient> = Arc::new(EmptyNode);
    let explorer: Arc<dyn ExplorerClient> = Arc::new(EmptyExplorer);
    let tracker = Arc::new(ConfirmationTracker::new(
        node.clone(),
        store.clone(),
        TrackerConfig::default(),
    ));
    AppState {
        store,
        membership: Arc::new(membership_set::MembershipSet::new()),
        tracker,
        explorer,
        node,
        network: Network::Testnet,
        max_history_per_address: 500,
        archive_threshold: 144,
        require_api_key,
        api_key,
    }
}

#[tokio::test]
async fn health_is_exempt_from_api_key() {
    let app = router(test_state(true, Some("secret".to_string())));
    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn protected_route_without_key_is_unauthorized() {
    let app = router(test_state(true, Some("secret".to_string())));
    let response = app
        .oneshot(Request::builder().uri("/addresses").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn protected_route_with_correct_key_succeeds() {
    let app = router(test_state(true, Some("secret".to_string())));
    let response = app
        .oneshot(
            Request::builder()
                .uri("/addresses")
                .header("X-API-Key", "secret")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn register_then_fetch_address_round_trips() {
    let state = test_state(false, None);
    let store = state.store.clone();
    let membership = state.membership.clone();
    let app = router(state);

    let body = serde_json::json!({
        "addresses": ["mnai8LzKea5e3C9qgrBo7JHgpiEnHKMhwR"]
    });
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/addresses")
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(membership.contains("mnai8LzKea5e3C9qgrBo7JHgpiEnHKMhwR"));
    assert!(store
        .get_address("mnai8LzKea5e3C9qgrBo7JHgpiEnHKMhwR")
        .await
        .unwrap()
        .is_some());

    let response = app
        .oneshot(
            Request::builder()
                .uri("/addresses/mnai8LzKea5e3C9qgrBo7JHgpiEnHKMhwR")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn invalid_address_is_classified_not_inserted() {
    let state = test_state(false, None);
    let store = state.store.clone();
    let app = router(state);

    let body = serde_json::json!({ "addresses": ["not-a-real-address"] });
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/addresses")
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(store.address_count(None).await.unwrap(), 0);
}

#[tokio::test]
async fn unknown_address_detail_is_not_found() {
    let app = router(test_state(false, None));
    let response = app
        .oneshot(
            Request::builder()
                .uri("/addresses/nobody-home")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn webhook_crud_round_trips() {
    let app = router(test_state(false, None));

    let body = serde_json::json!({ "url": "http://example.com/hook" });
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/webhooks")
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let webhook: store::Webhook = serde_json::from_slice(&bytes).unwrap();
    assert!(webhook.monitor_all);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/webhooks/{}", webhook.id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/webhooks/{}", webhook.id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn trigger_confirmations_runs_a_cycle() {
    let app = router(test_state(false, None));
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/trigger/confirmations")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn stats_reports_zero_on_empty_store() {
    let app = router(test_state(false, None));
    let response = app
        .oneshot(Request::builder().uri("/stats").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let stats: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(stats["addresses_total"], 0);
}
