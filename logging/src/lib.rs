// logging/src/lib.rs

//! A small helper to initialize tracing for the tracker process.
//!
//! Usage:
//! ```rust,ignore
//! logging::init();
//! tracing::info!(txid = %txid, "transaction matched watched address");
//! ```

use tracing_subscriber::{fmt, EnvFilter};

const DEFAULT_FILTER: &str =
    "tracker_app=info,intake=info,tracker=info,backfill=info,webhook_dispatcher=info,api=info,zmq_listener=info";

/// Initialize the global tracing subscriber:
/// - Reads `RUST_LOG` for filter directives, falling back to [`DEFAULT_FILTER`].
/// - Uses a pretty-printed, line-based formatter.
pub fn init() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    fmt().with_env_filter(filter).init();
}
