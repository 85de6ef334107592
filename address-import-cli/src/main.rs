// address-import-cli/src/main.rs

use anyhow::{Context, Result};
use clap::Parser;
use config::Config;
use explorer_client::WhatsOnChainClient;
use node_rpc::RpcNodeClient;
use std::path::PathBuf;
use store::{MongoStore, Store};
use tx_parser::is_valid_address;

/// Bulk-register watched addresses directly against the persistent
/// store, bypassing the REST surface. Intended for seeding a fresh
/// deployment or loading an address list from another system; the
/// running tracker-app process picks up any new rows on its next
/// startup (or after a manual `/addresses` call for hot-reload).
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// Path to a file with one address per line. Blank lines and lines
    /// starting with '#' are ignored.
    #[arg(long)]
    file: PathBuf,

    /// Also run historical backfill for each newly inserted address.
    #[arg(long)]
    backfill: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();
    let cli = Cli::parse();
    let cfg = Config::from_env().context("loading configuration")?;

    let addresses = read_addresses(&cli.file)?;
    if addresses.is_empty() {
        tracing::warn!(path = %cli.file.display(), "address file contained no candidates");
        return Ok(());
    }

    let network = match cfg.network {
        bitcoin::Network::Testnet => tx_parser::Network::Testnet,
        _ => tx_parser::Network::Mainnet,
    };
    let woc_base = match cfg.network {
        bitcoin::Network::Testnet => "https://api.whatsonchain.com/v1/bsv/test",
        _ => "https://api.whatsonchain.com/v1/bsv/main",
    };

    let store = MongoStore::connect(&cfg.mongodb_url)
        .await
        .context("connecting to MongoDB")?;

    let explorer = WhatsOnChainClient::new(woc_base, cfg.explorer.api_key.clone(), cfg.explorer.rate_limit);
    let node = RpcNodeClient::new(cfg.node_rpc.url(), &cfg.node_rpc.user, &cfg.node_rpc.password);

    let now = chrono::Utc::now();
    let mut inserted = 0usize;
    let mut skipped = 0usize;
    let mut invalid = Vec::new();

    for address in addresses {
        if !is_valid_address(&address, network) {
            invalid.push(address);
            continue;
        }

        match store.upsert_address(&address, None, now).await? {
            store::AddressUpsertOutcome::Added => {
                inserted += 1;
                if cli.backfill {
                    if let Err(e) = backfill::backfill_address(
                        &address,
                        &explorer,
                        &node,
                        &store,
                        cfg.max_history_per_address,
                        cfg.archive_threshold,
                        now,
                    )
                    .await
                    {
                        tracing::warn!(%address, error = %e, "backfill failed for imported address");
                    }
                }
            }
            store::AddressUpsertOutcome::AlreadyExisted => skipped += 1,
        }
    }

    if !invalid.is_empty() {
        tracing::warn!(count = invalid.len(), addresses = ?invalid, "skipped malformed addresses");
    }
    tracing::info!(inserted, skipped, invalid = invalid.len(), "address import complete");

    Ok(())
}

fn read_addresses(path: &PathBuf) -> Result<Vec<String>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    Ok(contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn parses_addresses_ignoring_blanks_and_comments() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# watched addresses").unwrap();
        writeln!(file, "mnai8LzKea5e3C9qgrBo7JHgpiEnHKMhwR").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "1BoatSLRHtKNngkdXEeobR76b53LETtpyT").unwrap();
        let addresses = read_addresses(&file.path().to_path_buf()).unwrap();
        assert_eq!(
            addresses,
            vec![
                "mnai8LzKea5e3C9qgrBo7JHgpiEnHKMhwR".to_string(),
                "1BoatSLRHtKNngkdXEeobR76b53LETtpyT".to_string(),
            ]
        );
    }

    #[test]
    fn missing_file_is_an_error() {
        let path = PathBuf::from("/nonexistent/addresses.txt");
        assert!(read_addresses(&path).is_err());
    }
}
