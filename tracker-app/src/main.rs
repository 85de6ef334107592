// tracker-app/src/main.rs

//! Process entrypoint: wires every collaborator crate together and runs
//! them concurrently as tokio tasks. Exit code `0` on a clean shutdown,
//! `1` on startup failure or a fatal store outage.

use config::Config;
use explorer_client::WhatsOnChainClient;
use membership_set::MembershipSet;
use node_rpc::RpcNodeClient;
use std::sync::Arc;
use store::{MongoStore, Store};
use tracker::ConfirmationTracker;
use webhook_dispatcher::{Dispatcher, DispatcherConfig};

#[tokio::main]
async fn main() {
    logging::init();

    let cfg = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::error!(error = %e, "invalid configuration");
            std::process::exit(1);
        }
    };

    if let Err(e) = run(cfg).await {
        tracing::error!(error = %e, "fatal error; shutting down");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<(), Box<dyn std::error::Error>> {
    let store: Arc<dyn Store> = Arc::new(MongoStore::connect(&cfg.mongodb_url).await?);

    let network = match cfg.network {
        bitcoin::Network::Testnet => tx_parser::Network::Testnet,
        _ => tx_parser::Network::Mainnet,
    };
    let woc_base = match cfg.network {
        bitcoin::Network::Testnet => "https://api.whatsonchain.com/v1/bsv/test",
        _ => "https://api.whatsonchain.com/v1/bsv/main",
    };

    let node: Arc<dyn node_rpc::NodeClient> = Arc::new(RpcNodeClient::new(
        cfg.node_rpc.url(),
        &cfg.node_rpc.user,
        &cfg.node_rpc.password,
    ));
    let explorer: Arc<dyn explorer_client::ExplorerClient> = Arc::new(WhatsOnChainClient::new(
        woc_base,
        cfg.explorer.api_key.clone(),
        cfg.explorer.rate_limit,
    ));

    let membership = Arc::new(MembershipSet::new());
    membership.load(store.all_active_addresses().await?);
    tracing::info!(size = membership.size(), "membership set loaded");

    tracing::info!("running startup historical backfill sweep");
    backfill::startup_sweep(
        explorer.as_ref(),
        node.as_ref(),
        store.as_ref(),
        cfg.max_history_per_address,
        cfg.archive_threshold,
        chrono::Utc::now(),
    )
    .await?;

    let tracker = Arc::new(ConfirmationTracker::new(
        node.clone(),
        store.clone(),
        tracker::TrackerConfig {
            archive_threshold: cfg.archive_threshold,
            pending_tx_limit: cfg.confirmation_batch_size as usize,
            rpc_concurrency: cfg.rpc_concurrency,
            ..Default::default()
        },
    ));

    let rawtx_handle = {
        let store = store.clone();
        let membership = membership.clone();
        let endpoint = cfg.zmq.rawtx_endpoint.clone();
        let max_tx_size_bytes = cfg.max_tx_size_bytes;
        tokio::spawn(async move {
            zmq_listener::run_rawtx_listener(endpoint, move |bytes| {
                let store = store.clone();
                let membership = membership.clone();
                async move {
                    if let Err(e) =
                        intake::process_raw_tx(&bytes, network, max_tx_size_bytes, &membership, store.as_ref())
                            .await
                    {
                        tracing::warn!(error = %e, "transaction intake failed; dropping frame");
                    }
                }
            })
            .await
        })
    };

    let hashblock_handle = {
        let tracker = tracker.clone();
        let endpoint = cfg.zmq.hashblock_endpoint.clone();
        tokio::spawn(async move {
            zmq_listener::run_hashblock_listener(endpoint, move |_hash| {
                let tracker = tracker.clone();
                async move {
                    match tracker.process_new_block().await {
                        Ok(Some(report)) => {
                            tracing::info!(
                                tip_height = report.tip_height,
                                verified = report.verified,
                                archived = report.archived,
                                "confirmation cycle complete"
                            );
                        }
                        Ok(None) => tracing::debug!("confirmation cycle already in flight; frame dropped"),
                        Err(e) => tracing::error!(error = %e, "confirmation cycle failed"),
                    }
                }
            })
            .await
        })
    };

    let webhook_handle = if cfg.webhooks.enabled {
        let dispatcher = Dispatcher::new(
            store.clone(),
            DispatcherConfig {
                batch_size: cfg.webhooks.batch_size,
                timeout: cfg.webhooks.timeout,
                max_retries: cfg.webhooks.max_retries,
                cleanup_days: cfg.webhooks.cleanup_days as i64,
            },
        );
        let interval = cfg.webhooks.processing_interval;
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            let mut cleanup_ticker = tokio::time::interval(std::time::Duration::from_secs(3600));
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = dispatcher.process_once(chrono::Utc::now()).await {
                            tracing::error!(error = %e, "webhook dispatch cycle failed");
                        }
                    }
                    _ = cleanup_ticker.tick() => {
                        if let Err(e) = dispatcher.cleanup_once(chrono::Utc::now()).await {
                            tracing::error!(error = %e, "webhook cleanup sweep failed");
                        }
                    }
                }
            }
        }))
    } else {
        None
    };

    let api_state = api::AppState {
        store: store.clone(),
        membership: membership.clone(),
        tracker: tracker.clone(),
        explorer: explorer.clone(),
        node: node.clone(),
        network,
        max_history_per_address: cfg.max_history_per_address,
        archive_threshold: cfg.archive_threshold,
        require_api_key: cfg.api.require_api_key,
        api_key: cfg.api.api_key.clone(),
    };
    let app = api::router(api_state);
    let listener = tokio::net::TcpListener::bind((cfg.api.host.as_str(), cfg.api.port)).await?;
    tracing::info!(host = %cfg.api.host, port = cfg.api.port, "REST surface listening");
    let api_handle = tokio::spawn(async move { axum::serve(listener, app).await });

    let rawtx_abort = rawtx_handle.abort_handle();
    let hashblock_abort = hashblock_handle.abort_handle();
    let api_abort = api_handle.abort_handle();
    let webhook_abort = webhook_handle.as_ref().map(|h| h.abort_handle());

    tokio::select! {
        res = rawtx_handle => tracing::error!(?res, "rawtx listener task exited"),
        res = hashblock_handle => tracing::error!(?res, "hashblock listener task exited"),
        res = api_handle => tracing::error!(?res, "api server task exited"),
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received; stopping listeners, dispatcher, and REST surface");
        }
    }

    rawtx_abort.abort();
    hashblock_abort.abort();
    api_abort.abort();
    if let Some(abort) = webhook_abort {
        abort.abort();
    }

    Ok(())
}

/// Resolves once the process receives SIGINT or (on Unix) SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
