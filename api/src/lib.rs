// api/src/lib.rs

//! Control Surface (C11): the REST server operators use to manage
//! watched addresses and webhook subscriptions, inspect pipeline state,
//! and trigger a confirmation sweep on demand.
//!
//! Routing, request validation, and API-key auth live here; everything
//! else is a call into the collaborator crates (`store`, `membership-set`,
//! `tracker`, `backfill`) that the rest of the pipeline already uses.

mod auth;
mod error;
mod routes;

use axum::routing::{delete, get, post, put};
use axum::Router;
use explorer_client::ExplorerClient;
use node_rpc::NodeClient;
use std::sync::Arc;
use store::Store;
use tracker::ConfirmationTracker;
use tx_parser::Network;

pub use error::ApiError;

/// Shared state handed to every handler. Cloned per request (everything
/// inside is an `Arc`), mirroring the collaborator-seam pattern the rest
/// of the pipeline uses: the API depends on trait objects, never on a
/// concrete store or RPC client.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub membership: Arc<membership_set::MembershipSet>,
    pub tracker: Arc<ConfirmationTracker>,
    pub explorer: Arc<dyn ExplorerClient>,
    pub node: Arc<dyn NodeClient>,
    pub network: Network,
    pub max_history_per_address: usize,
    pub archive_threshold: u64,
    pub require_api_key: bool,
    pub api_key: Option<String>,
}

/// Build the router: all paths JSON, `/health` exempt from the API-key
/// gate, every other route behind [`auth::require_api_key`].
pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/addresses", post(routes::addresses::add_addresses))
        .route("/addresses", get(routes::addresses::list_addresses))
        .route("/addresses/:addr", get(routes::addresses::get_address))
        .route("/addresses/:addr", delete(routes::addresses::remove_address))
        .route("/transactions", get(routes::transactions::list_transactions))
        .route("/transaction/:txid", get(routes::transactions::get_transaction))
        .route("/stats", get(routes::stats::stats))
        .route("/webhooks", post(routes::webhooks::create_webhook))
        .route("/webhooks", get(routes::webhooks::list_webhooks))
        .route("/webhooks/:id", get(routes::webhooks::get_webhook))
        .route("/webhooks/:id", put(routes::webhooks::update_webhook))
        .route("/webhooks/:id", delete(routes::webhooks::delete_webhook))
        .route("/trigger/confirmations", post(routes::trigger::trigger_confirmations))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            auth::require_api_key,
        ));

    Router::new()
        .route("/health", get(routes::health::health))
        .merge(protected)
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests;
