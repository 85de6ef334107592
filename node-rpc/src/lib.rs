// node-rpc/src/lib.rs

//! Typed wrapper over the watched node's JSON-RPC surface (C4 in the
//! design). Only the two methods the tracker actually calls are exposed:
//! `getblockcount` and `getrawtransaction` (verbose).
//!
//! `NodeClient` is one of the two interface abstractions the system needs
//! (the other is `ExplorerClient`, in the `explorer-client` crate) so that
//! the confirmation tracker and historical backfill can be exercised
//! against an in-memory fake in tests.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use thiserror::Error;
use transport::{Transport, TransportError};

/// Hard per-call timeout applied to every RPC unless the caller overrides it.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors a [`NodeClient`] implementation can return.
#[derive(Debug, Error)]
pub enum NodeRpcError {
    /// The call did not complete before its timeout elapsed.
    #[error("rpc call timed out")]
    RpcTimeout,

    /// The node could not be reached (connection refused, DNS failure, etc).
    #[error("node rpc unavailable: {0}")]
    RpcUnavailable(String),

    /// The node returned a JSON-RPC application error.
    #[error("rpc error {code}: {message}")]
    RpcError { code: i64, message: String },

    /// The response body did not match the expected shape.
    #[error("malformed rpc response: {0}")]
    Malformed(String),
}

impl From<TransportError> for NodeRpcError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Timeout(..) => NodeRpcError::RpcTimeout,
            TransportError::Http(_, inner) => NodeRpcError::RpcUnavailable(inner.to_string()),
            TransportError::Rpc(v) => {
                let code = v.get("code").and_then(|c| c.as_i64()).unwrap_or(0);
                let message = v
                    .get("message")
                    .and_then(|m| m.as_str())
                    .unwrap_or("unknown rpc error")
                    .to_string();
                NodeRpcError::RpcError { code, message }
            }
            TransportError::Serialization(e) => NodeRpcError::Malformed(e.to_string()),
            TransportError::MissingResult => {
                NodeRpcError::Malformed("missing result field".to_string())
            }
        }
    }
}

/// Verbose `getrawtransaction` response, as far as the tracker needs it.
#[derive(Debug, Clone, Deserialize)]
pub struct RawTransactionVerbose {
    pub hex: String,
    pub txid: String,
    pub blockhash: Option<String>,
    #[serde(rename = "blockheight")]
    pub block_height: Option<u64>,
    #[serde(rename = "blocktime")]
    pub block_time: Option<u64>,
    #[serde(default)]
    pub confirmations: u64,
}

/// Abstraction over the node's JSON-RPC surface. Implemented concretely by
/// [`RpcNodeClient`] and by in-memory fakes in tests.
#[async_trait]
pub trait NodeClient: Send + Sync {
    async fn get_block_count(&self) -> Result<u64, NodeRpcError>;
    async fn get_raw_transaction(
        &self,
        txid: &str,
    ) -> Result<RawTransactionVerbose, NodeRpcError>;
}

/// Concrete `NodeClient` backed by the node's HTTP JSON-RPC/1.0 endpoint.
pub struct RpcNodeClient {
    transport: Transport,
}

impl RpcNodeClient {
    pub fn new(url: impl Into<String>, user: &str, password: &str) -> Self {
        Self::with_timeout(url, user, password, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(
        url: impl Into<String>,
        user: &str,
        password: &str,
        timeout: Duration,
    ) -> Self {
        Self {
            transport: Transport::new_with_auth(url, user, password, timeout),
        }
    }
}

#[async_trait]
impl NodeClient for RpcNodeClient {
    async fn get_block_count(&self) -> Result<u64, NodeRpcError> {
        Ok(self
            .transport
            .call::<(), u64>("getblockcount", &[])
            .await?)
    }

    async fn get_raw_transaction(
        &self,
        txid: &str,
    ) -> Result<RawTransactionVerbose, NodeRpcError> {
        let params = [json!(txid), json!(true)];
        Ok(self
            .transport
            .call::<serde_json::Value, RawTransactionVerbose>("getrawtransaction", &params)
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Server;

    #[tokio::test]
    async fn get_block_count_parses_result() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("POST", "/")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"jsonrpc":"2.0","result":100142,"id":1}"#)
            .create_async()
            .await;

        let client = RpcNodeClient::new(server.url(), "user", "pass");
        let height = client.get_block_count().await.unwrap();
        assert_eq!(height, 100142);
    }

    #[tokio::test]
    async fn rpc_error_maps_to_typed_variant() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("POST", "/")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"jsonrpc":"2.0","error":{"code":-5,"message":"No such mempool or blockchain transaction"},"id":1}"#)
            .create_async()
            .await;

        let client = RpcNodeClient::new(server.url(), "user", "pass");
        let err = client.get_raw_transaction("deadbeef").await.unwrap_err();
        match err {
            NodeRpcError::RpcError { code, message } => {
                assert_eq!(code, -5);
                assert!(message.contains("No such"));
            }
            other => panic!("expected RpcError, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn connection_refused_is_unavailable() {
        let client = RpcNodeClient::new("http://127.0.0.1:0", "user", "pass");
        let err = client.get_block_count().await.unwrap_err();
        assert!(matches!(err, NodeRpcError::RpcUnavailable(_)));
    }
}
