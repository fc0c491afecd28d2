use crate::scheduler::PollerConfig;
use anyhow::{Context, Result, anyhow};
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    /// RPC endpoints per network id, rotated on failure.
    pub rpc_urls: HashMap<u64, Vec<String>>,
    pub poll_interval: Duration,
    pub block_window: u64,
    pub dedup_capacity: usize,
    pub initial_block_lag: u64,
    pub confirmations: u64,
    pub retry_pause: Duration,
    pub processed_tx_retention: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let database_url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite:./nft_indexer.db".to_string());

        let rpc_urls = std::env::var("RPC_URLS").context("RPC_URLS must be set in .env")?;
        let rpc_urls = parse_rpc_urls(&rpc_urls).context("Invalid RPC_URLS format")?;

        Ok(Config {
            database_url,
            rpc_urls,
            poll_interval: Duration::from_secs(env_or("POLL_INTERVAL_SECS", 60)?),
            block_window: env_or("BLOCK_WINDOW", crate::cursor::BLOCK_WINDOW)?,
            dedup_capacity: env_or("DEDUP_CAPACITY", crate::dedup::DEFAULT_CAPACITY)?,
            initial_block_lag: env_or("INITIAL_BLOCK_LAG", 10)?,
            confirmations: env_or("CONFIRMATIONS", 0)?,
            retry_pause: Duration::from_millis(env_or("RETRY_PAUSE_MS", 1000)?),
            processed_tx_retention: Duration::from_secs(env_or(
                "PROCESSED_TX_RETENTION_SECS",
                crate::dedup::DEFAULT_RETENTION.as_secs(),
            )?),
        })
    }

    /// Database location for tools that do not talk to a node.
    pub fn database_url_from_env() -> String {
        dotenv::dotenv().ok();
        std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite:./nft_indexer.db".to_string())
    }

    pub fn poller_config(&self) -> PollerConfig {
        PollerConfig {
            interval: self.poll_interval,
            window: self.block_window,
            dedup_capacity: self.dedup_capacity,
            initial_lag: self.initial_block_lag,
            confirmations: self.confirmations,
            retry_pause: self.retry_pause,
            retention: self.processed_tx_retention,
        }
    }
}

fn env_or<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|e| anyhow!("Invalid {name} value {value:?}: {e}")),
        Err(_) => Ok(default),
    }
}

/// Parses `networkId=url[|url...]` pairs separated by commas.
pub fn parse_rpc_urls(raw: &str) -> Result<HashMap<u64, Vec<String>>> {
    let mut networks: HashMap<u64, Vec<String>> = HashMap::new();

    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (network, urls) = entry
            .split_once('=')
            .ok_or_else(|| anyhow!("expected networkId=url, got {entry:?}"))?;
        let network_id: u64 = network
            .trim()
            .parse()
            .with_context(|| format!("invalid network id {network:?}"))?;

        let urls: Vec<String> = urls
            .split('|')
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .map(String::from)
            .collect();
        if urls.is_empty() {
            return Err(anyhow!("no RPC URL given for network {network_id}"));
        }

        networks.entry(network_id).or_default().extend(urls);
    }

    if networks.is_empty() {
        return Err(anyhow!("at least one network must be configured"));
    }
    Ok(networks)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_several_networks_and_fallback_urls() {
        let parsed =
            parse_rpc_urls("1=https://a.example|https://b.example, 137=https://polygon.example")
                .unwrap();
        assert_eq!(
            parsed[&1],
            vec!["https://a.example".to_string(), "https://b.example".to_string()]
        );
        assert_eq!(parsed[&137], vec!["https://polygon.example".to_string()]);
    }

    #[test]
    fn rejects_malformed_entries() {
        assert!(parse_rpc_urls("").is_err());
        assert!(parse_rpc_urls("https://no-network.example").is_err());
        assert!(parse_rpc_urls("mainnet=https://a.example").is_err());
        assert!(parse_rpc_urls("1=").is_err());
    }
}
