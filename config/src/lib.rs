// config/src/lib.rs

//! Process configuration, loaded once from the environment at startup.
//!
//! Every field here corresponds to an environment variable documented in
//! the system's operator-facing reference (`SVNODE_RPC_*`, `MONGODB_URL`,
//! `API_*`, `WEBHOOK_*`, ...). A `.env` file in the working directory is
//! read first (via `dotenvy`) as a convenience for local development; real
//! process environment variables always take precedence.

use bitcoin::Network;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while building [`Config`] from the environment.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("invalid value for {name}: {value:?} ({reason})")]
    Invalid {
        name: &'static str,
        value: String,
        reason: &'static str,
    },

    #[error("REQUIRE_API_KEY is true but API_KEY is not set")]
    ApiKeyRequiredButMissing,
}

/// Top-level, immutable configuration. Built once via [`Config::from_env`].
#[derive(Debug, Clone)]
pub struct Config {
    pub node_rpc: NodeRpcConfig,
    pub zmq: ZmqConfig,
    pub mongodb_url: String,
    pub api: ApiConfig,
    pub network: Network,
    pub archive_threshold: u64,
    pub confirmation_batch_size: u32,
    pub rpc_concurrency: usize,
    pub max_history_per_address: usize,
    pub explorer: ExplorerConfig,
    pub max_tx_size_bytes: usize,
    pub webhooks: WebhookConfig,
}

#[derive(Debug, Clone)]
pub struct NodeRpcConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
}

impl NodeRpcConfig {
    pub fn url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone)]
pub struct ZmqConfig {
    pub rawtx_endpoint: String,
    pub hashblock_endpoint: String,
}

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    pub require_api_key: bool,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ExplorerConfig {
    pub api_key: Option<String>,
    pub rate_limit: Duration,
}

#[derive(Debug, Clone)]
pub struct WebhookConfig {
    pub enabled: bool,
    pub batch_size: usize,
    pub processing_interval: Duration,
    pub timeout: Duration,
    pub max_retries: u32,
    pub cleanup_days: u64,
}

fn env_var(name: &'static str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_or<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env_var(name) {
        None => Ok(default),
        Some(v) => v.parse().map_err(|_| ConfigError::Invalid {
            name,
            value: v,
            reason: "could not parse",
        }),
    }
}

fn env_required(name: &'static str) -> Result<String, ConfigError> {
    env_var(name).ok_or(ConfigError::Missing(name))
}

impl Config {
    /// Load configuration from the process environment, applying the
    /// defaults documented for each variable. Reads a `.env` file first,
    /// if one is present, without overriding variables already set.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();

        let node_rpc = NodeRpcConfig {
            host: env_or("SVNODE_RPC_HOST", "127.0.0.1".to_string())?,
            port: env_or("SVNODE_RPC_PORT", 8332u16)?,
            user: env_var("SVNODE_RPC_USER").unwrap_or_default(),
            password: env_var("SVNODE_RPC_PASSWORD").unwrap_or_default(),
        };

        let zmq = ZmqConfig {
            rawtx_endpoint: env_required("SVNODE_ZMQ_RAWTX")
                .unwrap_or_else(|_| "tcp://127.0.0.1:28332".to_string()),
            hashblock_endpoint: env_required("SVNODE_ZMQ_HASHBLOCK")
                .unwrap_or_else(|_| "tcp://127.0.0.1:28333".to_string()),
        };

        let mongodb_url = env_or(
            "MONGODB_URL",
            "mongodb://127.0.0.1:27017/bsv-tracker".to_string(),
        )?;

        let require_api_key = env_or("REQUIRE_API_KEY", false)?;
        let api_key = env_var("API_KEY");
        if require_api_key && api_key.is_none() {
            return Err(ConfigError::ApiKeyRequiredButMissing);
        }
        let api = ApiConfig {
            host: env_or("API_HOST", "0.0.0.0".to_string())?,
            port: env_or("API_PORT", 3000u16)?,
            require_api_key,
            api_key,
        };

        let network = match env_var("BSV_NETWORK").as_deref() {
            None | Some("mainnet") => Network::Bitcoin,
            Some("testnet") => Network::Testnet,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    name: "BSV_NETWORK",
                    value: other.to_string(),
                    reason: "expected \"mainnet\" or \"testnet\"",
                })
            }
        };

        let explorer = ExplorerConfig {
            api_key: env_var("WOC_API_KEY"),
            rate_limit: Duration::from_millis(env_or("WOC_RATE_LIMIT_MS", 1000u64)?),
        };

        let webhooks = WebhookConfig {
            enabled: env_or("ENABLE_WEBHOOKS", true)?,
            batch_size: env_or("WEBHOOK_BATCH_SIZE", 10usize)?,
            processing_interval: Duration::from_millis(env_or(
                "WEBHOOK_PROCESSING_INTERVAL",
                5000u64,
            )?),
            timeout: Duration::from_millis(env_or("WEBHOOK_TIMEOUT", 10_000u64)?),
            max_retries: env_or("WEBHOOK_MAX_RETRIES", 5u32)?,
            cleanup_days: env_or("WEBHOOK_CLEANUP_DAYS", 7u64)?,
        };

        Ok(Config {
            node_rpc,
            zmq,
            mongodb_url,
            api,
            network,
            archive_threshold: env_or("AUTO_ARCHIVE_AFTER", 144u64)?,
            confirmation_batch_size: env_or("CONFIRMATION_BATCH_SIZE", 100u32)?,
            rpc_concurrency: env_or("RPC_CONCURRENCY", 4usize)?,
            max_history_per_address: env_or("MAX_HISTORY_PER_ADDRESS", 500usize)?,
            explorer,
            max_tx_size_bytes: env_or("MAX_TX_SIZE_BYTES", 4 * 1024 * 1024usize)?,
            webhooks,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Environment variable mutation races across tests in the same process;
    // serialize them through a single lock rather than touching global state
    // unguarded.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn clear_all() {
        for key in [
            "SVNODE_RPC_HOST",
            "SVNODE_RPC_PORT",
            "SVNODE_RPC_USER",
            "SVNODE_RPC_PASSWORD",
            "SVNODE_ZMQ_RAWTX",
            "SVNODE_ZMQ_HASHBLOCK",
            "MONGODB_URL",
            "API_HOST",
            "API_PORT",
            "REQUIRE_API_KEY",
            "API_KEY",
            "BSV_NETWORK",
            "AUTO_ARCHIVE_AFTER",
            "WOC_API_KEY",
            "WOC_RATE_LIMIT_MS",
        ] {
            std::env::remove_var(key);
        }
    }

    #[test]
    fn defaults_apply_when_unset() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_all();
        let cfg = Config::from_env().unwrap();
        assert_eq!(cfg.node_rpc.port, 8332);
        assert_eq!(cfg.archive_threshold, 144);
        assert_eq!(cfg.rpc_concurrency, 4);
        assert_eq!(cfg.max_history_per_address, 500);
        assert_eq!(cfg.network, Network::Bitcoin);
        assert!(!cfg.api.require_api_key);
        clear_all();
    }

    #[test]
    fn require_api_key_without_key_is_invalid() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_all();
        std::env::set_var("REQUIRE_API_KEY", "true");
        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::ApiKeyRequiredButMissing));
        clear_all();
    }

    #[test]
    fn testnet_network_parses() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_all();
        std::env::set_var("BSV_NETWORK", "testnet");
        let cfg = Config::from_env().unwrap();
        assert_eq!(cfg.network, Network::Testnet);
        clear_all();
    }

    #[test]
    fn unknown_network_is_invalid() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_all();
        std::env::set_var("BSV_NETWORK", "signet");
        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "BSV_NETWORK", .. }));
        clear_all();
    }
}
