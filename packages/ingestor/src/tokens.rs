//! Token Metadata
//!
//! Read-only table mapping token contract addresses to ticker and decimal
//! precision. Loaded once at startup.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::felt::{FeltError, FieldElement};

/// Largest precision whose power of ten fits in 256 bits
pub const MAX_DECIMALS: u8 = 77;

#[derive(Error, Debug)]
pub enum TokenError {
    #[error("Invalid address for token {ticker}: {source}")]
    InvalidAddress {
        ticker: String,
        #[source]
        source: FeltError,
    },

    #[error("Duplicate token address: {0}")]
    DuplicateAddress(String),

    #[error("Token {ticker} has {decimals} decimals, maximum is {max}", max = MAX_DECIMALS)]
    DecimalsOutOfRange { ticker: String, decimals: u8 },

    #[error("Failed to read token file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse token list: {0}")]
    Json(#[from] serde_json::Error),
}

/// One entry of a token list file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenMetadata {
    pub ticker: String,
    pub decimals: u8,
    pub address: String,
}

impl TokenMetadata {
    pub fn new(ticker: &str, decimals: u8, address: &str) -> Self {
        Self {
            ticker: ticker.to_string(),
            decimals,
            address: address.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenInfo {
    pub ticker: String,
    pub decimals: u8,
}

/// Starknet mainnet tokens tracked by default
pub fn mainnet_tokens() -> Vec<TokenMetadata> {
    vec![
        TokenMetadata::new(
            "ETH",
            18,
            "0x049d36570d4e46f48e99674bd3fcc84644ddd6b96f7c741b1562b82f9e004dc7",
        ),
        TokenMetadata::new(
            "USDT",
            6,
            "0x068f5c6a61780768455de69077e07e89787839bf8166decfbf92b645209c0fb8",
        ),
        TokenMetadata::new(
            "USDC",
            6,
            "0x053c91253bc9682c04929ca02ed00b3e423f6710d2ee7e0d5ebb06f3ecf368a8",
        ),
        TokenMetadata::new(
            "STRK",
            18,
            "0x04718f5a0fc34cc1af16a1cdee98ffb20c31f5cd61d6ab07201858f4287c938d",
        ),
    ]
}

/// Address-keyed token lookup
#[derive(Debug, Clone, Default)]
pub struct TokenRegistry {
    by_address: HashMap<FieldElement, TokenInfo>,
}

impl TokenRegistry {
    pub fn from_entries(entries: Vec<TokenMetadata>) -> Result<Self, TokenError> {
        let mut by_address = HashMap::with_capacity(entries.len());

        for entry in entries {
            let address = FieldElement::from_hex(&entry.address).map_err(|source| {
                TokenError::InvalidAddress {
                    ticker: entry.ticker.clone(),
                    source,
                }
            })?;
            if entry.decimals > MAX_DECIMALS {
                return Err(TokenError::DecimalsOutOfRange {
                    ticker: entry.ticker,
                    decimals: entry.decimals,
                });
            }
            let info = TokenInfo {
                ticker: entry.ticker,
                decimals: entry.decimals,
            };
            if by_address.insert(address, info).is_some() {
                return Err(TokenError::DuplicateAddress(address.to_hex()));
            }
        }

        Ok(Self { by_address })
    }

    pub fn mainnet() -> Result<Self, TokenError> {
        Self::from_entries(mainnet_tokens())
    }

    /// Parse a JSON array of `{ticker, decimals, address}`
    pub fn from_json(json: &str) -> Result<Self, TokenError> {
        let entries: Vec<TokenMetadata> = serde_json::from_str(json)?;
        Self::from_entries(entries)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, TokenError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Look up a token. Presence of the address is what counts; a token
    /// with zero decimals resolves like any other.
    pub fn resolve(&self, address: &FieldElement) -> Option<&TokenInfo> {
        self.by_address.get(address)
    }

    pub fn len(&self) -> usize {
        self.by_address.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_address.is_empty()
    }
}
