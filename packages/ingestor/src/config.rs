//! Ingestor Configuration
//!
//! Subscription settings for the chain-data stream, the store it writes to
//! and where the starting block comes from when none is configured.

use std::path::PathBuf;
use std::time::Duration;

use alloy::rpc::client::ClientBuilder;
use alloy::transports::http::reqwest::Url;
use thiserror::Error;
use tracing::info;

use crate::filter::EventFilter;
use crate::store::{redis_store::DEFAULT_REDIS_URL, DEFAULT_CAPACITY, DEFAULT_COLLECTION};
use crate::tokens::{TokenError, TokenRegistry};
use crate::transform::DEFAULT_EXCHANGE_NAME;

/// Default Apibara DNA endpoint for Starknet mainnet
pub const DEFAULT_STREAM_URL: &str = "https://mainnet.starknet.a5a.ch";

/// Default Starknet JSON-RPC endpoint used to look up the chain head
pub const DEFAULT_RPC_URL: &str = "https://starknet-mainnet.public.blastapi.io";

/// Blocks per data message
pub const DEFAULT_BATCH_SIZE: u64 = 1;

/// How far behind the chain head streaming starts when no block is configured
pub const STARTING_BLOCK_LAG: u64 = 10;

/// Delay between reconnect attempts in milliseconds
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 1000;

/// Silence on the stream longer than this is reported
pub const DEFAULT_HEARTBEAT_THRESHOLD_SECS: u64 = 60;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing stream auth token")]
    MissingToken,

    #[error("Batch size must be at least 1")]
    ZeroBatchSize,

    #[error("Store capacity must be at least 1")]
    ZeroCapacity,

    #[error("Collection name cannot be empty")]
    EmptyCollection,

    #[error("Invalid RPC URL: {0}")]
    InvalidRpcUrl(String),

    #[error("Failed to fetch latest block: {0}")]
    Rpc(String),

    #[error("Token table error: {0}")]
    Tokens(#[from] TokenError),
}

/// Subscription settings for the chain-data stream
#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub url: String,
    pub token: Option<String>,
    pub filter: EventFilter,
    /// `None` resolves to the chain head minus [`STARTING_BLOCK_LAG`]
    pub starting_block: Option<u64>,
    pub batch_size: u64,
    pub reconnect_delay: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_STREAM_URL.to_string(),
            token: None,
            filter: EventFilter::avnu_swaps(),
            starting_block: None,
            batch_size: DEFAULT_BATCH_SIZE,
            reconnect_delay: Duration::from_millis(DEFAULT_RECONNECT_DELAY_MS),
        }
    }
}

impl StreamConfig {
    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
            ..Default::default()
        }
    }
}

/// Full ingestor configuration
#[derive(Debug, Clone)]
pub struct IngestorConfig {
    pub stream: StreamConfig,
    pub rpc_url: String,
    pub redis_url: String,
    pub collection: String,
    pub capacity: usize,
    /// JSON token table replacing the built-in mainnet tokens
    pub tokens_file: Option<PathBuf>,
    pub exchange: String,
    pub heartbeat_threshold: Duration,
}

impl Default for IngestorConfig {
    fn default() -> Self {
        Self {
            stream: StreamConfig::default(),
            rpc_url: DEFAULT_RPC_URL.to_string(),
            redis_url: DEFAULT_REDIS_URL.to_string(),
            collection: DEFAULT_COLLECTION.to_string(),
            capacity: DEFAULT_CAPACITY,
            tokens_file: None,
            exchange: DEFAULT_EXCHANGE_NAME.to_string(),
            heartbeat_threshold: Duration::from_secs(DEFAULT_HEARTBEAT_THRESHOLD_SECS),
        }
    }
}

impl IngestorConfig {
    /// Create a config with the stream auth token set
    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            stream: StreamConfig::with_token(token),
            ..Default::default()
        }
    }

    pub fn with_starting_block(mut self, block_number: u64) -> Self {
        self.stream.starting_block = Some(block_number);
        self
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = collection.into();
        self
    }

    /// Check the settings that would otherwise only fail once streaming starts
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.stream.token.as_deref() {
            Some(token) if !token.trim().is_empty() => {}
            _ => return Err(ConfigError::MissingToken),
        }
        if self.stream.batch_size == 0 {
            return Err(ConfigError::ZeroBatchSize);
        }
        if self.capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        if self.collection.trim().is_empty() {
            return Err(ConfigError::EmptyCollection);
        }
        Ok(())
    }

    /// Built-in mainnet tokens, or the configured token file
    pub fn load_tokens(&self) -> Result<TokenRegistry, ConfigError> {
        let registry = match &self.tokens_file {
            Some(path) => TokenRegistry::from_file(path)?,
            None => TokenRegistry::mainnet()?,
        };
        Ok(registry)
    }

    /// Configured starting block, or the chain head minus [`STARTING_BLOCK_LAG`]
    pub async fn resolve_starting_block(&self) -> Result<u64, ConfigError> {
        if let Some(block_number) = self.stream.starting_block {
            return Ok(block_number);
        }
        let latest = latest_block_number(&self.rpc_url).await?;
        let start = starting_block_from_head(latest);
        info!(latest, start, "Resolved starting block from chain head");
        Ok(start)
    }
}

/// Block to start from given the current chain head
pub fn starting_block_from_head(latest: u64) -> u64 {
    latest.saturating_sub(STARTING_BLOCK_LAG)
}

/// Query `starknet_blockNumber` on a JSON-RPC node
pub async fn latest_block_number(rpc_url: &str) -> Result<u64, ConfigError> {
    let url: Url = rpc_url
        .parse()
        .map_err(|e| ConfigError::InvalidRpcUrl(format!("{rpc_url}: {e}")))?;
    let client = ClientBuilder::default().http(url);

    let block_number: u64 = client
        .request("starknet_blockNumber", Vec::<serde_json::Value>::new())
        .await
        .map_err(|e| ConfigError::Rpc(e.to_string()))?;
    Ok(block_number)
}
