// explorer-client/src/lib.rs

//! Explorer Client (C5): a rate-limited pager over the external block
//! explorer's "confirmed history" endpoint, used by the historical
//! backfill (C8) to enrich newly registered addresses.
//!
//! `ExplorerClient` is the second of the two interface abstractions the
//! system needs (the other is `NodeClient`, in `node-rpc`), so backfill
//! can be exercised against an in-memory fake in tests.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Page size the explorer returns; also the cue that a page is the last
/// one (a short page ends pagination before `nextPageToken` is even read).
pub const PAGE_SIZE: usize = 100;

#[derive(Debug, Error)]
pub enum ExplorerError {
    #[error("rate limited by upstream explorer")]
    RateLimited,

    #[error("upstream explorer error (status {0}): {1}")]
    UpstreamError(u16, String),

    #[error("request to explorer failed: {0}")]
    Transport(String),
}

/// One history entry as the explorer reports it.
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryEntry {
    pub tx_hash: String,
    pub height: Option<u64>,
    pub time: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
struct HistoryPage {
    result: Vec<HistoryEntry>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
}

/// Abstraction over the block explorer's confirmed-history endpoint.
/// Implemented concretely by [`WhatsOnChainClient`] and by in-memory
/// fakes in tests.
#[async_trait]
pub trait ExplorerClient: Send + Sync {
    async fn confirmed_history(
        &self,
        address: &str,
        token: Option<&str>,
    ) -> Result<(Vec<HistoryEntry>, Option<String>), ExplorerError>;
}

/// Concrete `ExplorerClient`, rate-limited to one request per
/// `rate_limit` interval, serialized through a single permit: strict
/// 1-concurrent with one permit per `WOC_RATE_LIMIT_MS`.
pub struct WhatsOnChainClient {
    base_url: String,
    api_key: Option<String>,
    http: reqwest::Client,
    gate: Arc<Mutex<Instant>>,
    rate_limit: Duration,
}

impl WhatsOnChainClient {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>, rate_limit: Duration) -> Self {
        WhatsOnChainClient {
            base_url: base_url.into(),
            api_key,
            http: reqwest::Client::new(),
            gate: Arc::new(Mutex::new(Instant::now() - rate_limit)),
            rate_limit,
        }
    }

    async fn throttle(&self) {
        let mut last = self.gate.lock().await;
        let elapsed = last.elapsed();
        if elapsed < self.rate_limit {
            tokio::time::sleep(self.rate_limit - elapsed).await;
        }
        *last = Instant::now();
    }
}

#[async_trait]
impl ExplorerClient for WhatsOnChainClient {
    async fn confirmed_history(
        &self,
        address: &str,
        token: Option<&str>,
    ) -> Result<(Vec<HistoryEntry>, Option<String>), ExplorerError> {
        self.throttle().await;

        let url = format!("{}/address/{}/confirmed/history", self.base_url, address);
        let mut req = self.http.get(&url);
        if let Some(token) = token {
            req = req.query(&[("token", token)]);
        }
        if let Some(key) = &self.api_key {
            req = req.header("Authorization", key);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| ExplorerError::Transport(e.to_string()))?;

        match resp.status().as_u16() {
            200 => {
                let page: HistoryPage = resp
                    .json()
                    .await
                    .map_err(|e| ExplorerError::Transport(e.to_string()))?;
                Ok((page.result, page.next_page_token))
            }
            404 => Ok((Vec::new(), None)),
            429 => Err(ExplorerError::RateLimited),
            status => {
                let body = resp.text().await.unwrap_or_default();
                Err(ExplorerError::UpstreamError(status, body))
            }
        }
    }
}

/// Page `address`'s confirmed history until `result` is empty,
/// `nextPageToken` is missing, a page returns fewer than [`PAGE_SIZE`]
/// entries, or `max_tx` entries have been collected — trimming the final
/// page to exactly `max_tx`.
pub async fn paginate<C: ExplorerClient + ?Sized>(
    client: &C,
    address: &str,
    max_tx: usize,
) -> Result<Vec<HistoryEntry>, ExplorerError> {
    let mut collected = Vec::new();
    let mut token: Option<String> = None;

    loop {
        let (page, next) = client.confirmed_history(address, token.as_deref()).await?;
        let page_len = page.len();
        collected.extend(page);

        if collected.len() >= max_tx {
            collected.truncate(max_tx);
            break;
        }
        if page_len == 0 || page_len < PAGE_SIZE {
            break;
        }
        match next {
            Some(t) => token = Some(t),
            None => break,
        }
    }

    Ok(collected)
}
