//! Environment-based Configuration
//!
//! Loads core settings from environment variables. Secrets (counterparty
//! keys, signer material) are never read here; they belong to the chain
//! adapters.
//!
//! # Environment Variables
//!
//! - `SATSWAP_NETWORK` - "mainnet", "testnet" or "devnet" (default: "devnet")
//! - `SATSWAP_ESPLORA_URL` - Bitcoin/Esplora API endpoint
//! - `SATSWAP_DB_PATH` - SQLite database path (unset = in-memory stores)
//! - `SATSWAP_GRACE_PERIOD_SECS` - authorization grace period
//! - `SATSWAP_COMMIT_SAFETY_WINDOW_SECS` - minimum commit-to-expiry margin
//! - `SATSWAP_WATCHDOG_INTERVAL_SECS` - authoritative status poll cadence
//! - `SATSWAP_EVENT_POLL_SECS` - event reconciliation cadence
//! - `SATSWAP_RELAY_SYNC_SECS` - relay synchronizer cadence
//! - `SATSWAP_MAX_HEADERS_PER_TX` / `SATSWAP_MAX_HEADERS_PER_TX_FORK`
//! - `SATSWAP_LOG_LEVEL` - trace|debug|info|warn|error

use std::env;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Network environment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Network {
    Mainnet,
    Testnet,
    Devnet,
}

impl FromStr for Network {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mainnet" | "main" => Ok(Network::Mainnet),
            "testnet" | "test" => Ok(Network::Testnet),
            "devnet" | "dev" => Ok(Network::Devnet),
            _ => Err(ConfigError::InvalidValue(
                "SATSWAP_NETWORK".to_string(),
                format!("unknown network: {}", s),
            )),
        }
    }
}

impl Network {
    /// Default Bitcoin/Esplora API for this network
    pub fn default_esplora_url(&self) -> &'static str {
        match self {
            Network::Mainnet => "https://blockstream.info/api",
            Network::Testnet | Network::Devnet => "https://blockstream.info/testnet/api",
        }
    }

    /// Corresponding bitcoin network enum
    pub fn bitcoin_network(&self) -> bitcoin::Network {
        match self {
            Network::Mainnet => bitcoin::Network::Bitcoin,
            Network::Testnet | Network::Devnet => bitcoin::Network::Testnet,
        }
    }
}

/// Core configuration
#[derive(Debug, Clone)]
pub struct CoreConfig {
    pub network: Network,
    pub esplora_url: String,
    /// SQLite database path; `None` selects in-memory stores
    pub db_path: Option<String>,

    pub grace_period_secs: u64,
    pub commit_safety_window_secs: u64,
    pub watchdog_interval: Duration,
    pub event_poll_interval: Duration,
    pub relay_sync_interval: Duration,

    pub max_headers_per_tx_main: usize,
    pub max_headers_per_tx_fork: usize,

    pub log_level: String,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            network: Network::Devnet,
            esplora_url: Network::Devnet.default_esplora_url().to_string(),
            db_path: None,
            grace_period_secs: 60,
            commit_safety_window_secs: 600,
            watchdog_interval: Duration::from_secs(15),
            event_poll_interval: Duration::from_secs(10),
            relay_sync_interval: Duration::from_secs(60),
            max_headers_per_tx_main: 50,
            max_headers_per_tx_fork: 20,
            log_level: "info".to_string(),
        }
    }
}

impl CoreConfig {
    /// Load configuration from environment variables, applying network
    /// defaults for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();

        let network: Network = env::var("SATSWAP_NETWORK")
            .unwrap_or_else(|_| "devnet".to_string())
            .parse()?;

        let esplora_url = env::var("SATSWAP_ESPLORA_URL")
            .unwrap_or_else(|_| network.default_esplora_url().to_string());

        Ok(Self {
            network,
            esplora_url,
            db_path: env::var("SATSWAP_DB_PATH").ok(),
            grace_period_secs: parse_env("SATSWAP_GRACE_PERIOD_SECS", 60)?,
            commit_safety_window_secs: parse_env("SATSWAP_COMMIT_SAFETY_WINDOW_SECS", 600)?,
            watchdog_interval: Duration::from_secs(parse_env("SATSWAP_WATCHDOG_INTERVAL_SECS", 15)?),
            event_poll_interval: Duration::from_secs(parse_env("SATSWAP_EVENT_POLL_SECS", 10)?),
            relay_sync_interval: Duration::from_secs(parse_env("SATSWAP_RELAY_SYNC_SECS", 60)?),
            max_headers_per_tx_main: parse_env("SATSWAP_MAX_HEADERS_PER_TX", 50)?,
            max_headers_per_tx_fork: parse_env("SATSWAP_MAX_HEADERS_PER_TX_FORK", 20)?,
            log_level: env::var("SATSWAP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }
}

fn parse_env<T: FromStr>(key: &str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Err(_) => Ok(default),
        Ok(raw) => raw
            .parse()
            .map_err(|e| ConfigError::InvalidValue(key.to_string(), format!("{}", e))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_parsing() {
        assert_eq!("mainnet".parse::<Network>().unwrap(), Network::Mainnet);
        assert_eq!("TEST".parse::<Network>().unwrap(), Network::Testnet);
        assert_eq!("dev".parse::<Network>().unwrap(), Network::Devnet);
        assert!("garbage".parse::<Network>().is_err());
    }

    #[test]
    fn test_network_defaults() {
        assert!(Network::Mainnet.default_esplora_url().contains("blockstream"));
        assert_eq!(Network::Mainnet.bitcoin_network(), bitcoin::Network::Bitcoin);
        assert_eq!(Network::Devnet.bitcoin_network(), bitcoin::Network::Testnet);
    }

    #[test]
    fn test_default_config() {
        let config = CoreConfig::default();
        assert_eq!(config.network, Network::Devnet);
        assert!(config.max_headers_per_tx_main > config.max_headers_per_tx_fork);
        assert!(config.db_path.is_none());
    }
}
