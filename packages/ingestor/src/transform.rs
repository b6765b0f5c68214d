//! Swap Transformation
//!
//! Turns a matched swap event into a [`NormalizedSwapRecord`]: resolves both
//! tokens, scales the raw `u256` amounts by token precision and labels the
//! pair. Events whose tokens are not in the registry produce nothing.

use std::sync::Arc;

use alloy::primitives::U256;
use chrono::{DateTime, SecondsFormat, Utc};
use thiserror::Error;

use crate::decoder::{BlockHeader, RawEvent, TransactionReceipt};
use crate::felt::{u256_from_halves, FeltError, FieldElement};
use crate::record::NormalizedSwapRecord;
use crate::tokens::TokenRegistry;

/// Exchange label written to every record by default
pub const DEFAULT_EXCHANGE_NAME: &str = "avnu-swap";

/// Number of data elements in a swap event
pub const SWAP_EVENT_DATA_LEN: usize = 8;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum TransformError {
    #[error(
        "Swap event has {0} data elements, expected {expected}",
        expected = SWAP_EVENT_DATA_LEN
    )]
    MalformedEvent(usize),

    #[error("Amount half out of range: {0}")]
    AmountOutOfRange(#[from] FeltError),

    #[error("Unsupported decimal precision: {0}")]
    UnsupportedDecimals(u8),

    #[error("Amount {0} is not representable as a number")]
    AmountNotRepresentable(String),
}

/// Positions of the swap event fields in `RawEvent::data`
mod layout {
    pub const TAKER: usize = 0;
    pub const SELL_TOKEN: usize = 1;
    pub const SELL_AMOUNT_LOW: usize = 2;
    pub const SELL_AMOUNT_HIGH: usize = 3;
    pub const BUY_TOKEN: usize = 4;
    pub const BUY_AMOUNT_LOW: usize = 5;
    pub const BUY_AMOUNT_HIGH: usize = 6;
    pub const BENEFICIARY: usize = 7;
}

/// Exact decimal rendering of `raw / 10^decimals`, without trailing zeros
pub fn scale_amount(raw: U256, decimals: u8) -> Result<String, TransformError> {
    if decimals == 0 {
        return Ok(raw.to_string());
    }

    let divisor = U256::from(10u8)
        .checked_pow(U256::from(decimals))
        .ok_or(TransformError::UnsupportedDecimals(decimals))?;
    let (integer, fraction) = raw.div_rem(divisor);

    let fraction = format!("{:0>width$}", fraction.to_string(), width = decimals as usize);
    let fraction = fraction.trim_end_matches('0');

    if fraction.is_empty() {
        Ok(integer.to_string())
    } else {
        Ok(format!("{integer}.{fraction}"))
    }
}

/// Combine `(low, high)` halves and scale to a human amount
pub fn normalize_amount(
    low: &FieldElement,
    high: &FieldElement,
    decimals: u8,
) -> Result<f64, TransformError> {
    let raw = u256_from_halves(low.to_u128()?, high.to_u128()?);
    let exact = scale_amount(raw, decimals)?;
    exact
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or(TransformError::AmountNotRepresentable(exact))
}

/// Builds records for matched swap events
#[derive(Debug, Clone)]
pub struct SwapTransformer {
    tokens: Arc<TokenRegistry>,
    exchange: String,
}

impl SwapTransformer {
    pub fn new(tokens: Arc<TokenRegistry>, exchange: impl Into<String>) -> Self {
        Self {
            tokens,
            exchange: exchange.into(),
        }
    }

    pub fn with_default_exchange(tokens: Arc<TokenRegistry>) -> Self {
        Self::new(tokens, DEFAULT_EXCHANGE_NAME)
    }

    /// Registry used to resolve sell and buy tokens
    pub fn tokens(&self) -> &TokenRegistry {
        &self.tokens
    }

    /// Transform using the current time as ingestion timestamp
    pub fn transform(
        &self,
        header: &BlockHeader,
        event: &RawEvent,
        receipt: &TransactionReceipt,
    ) -> Result<Option<NormalizedSwapRecord>, TransformError> {
        self.transform_at(header, event, receipt, Utc::now())
    }

    /// Transform one matched swap event.
    ///
    /// # Arguments
    /// * `header` - Header of the block holding the event; supplies number and time
    /// * `event` - Swap event already matched against the filter
    /// * `receipt` - Receipt of the emitting transaction
    /// * `ingested_at` - Recorded as the record's `timestamp`
    ///
    /// # Returns
    /// `Ok(None)` when either token is unknown. That is an expected outcome,
    /// not an error, and nothing partial is produced. `Err` when the event is
    /// too short or an amount half exceeds 128 bits.
    pub fn transform_at(
        &self,
        header: &BlockHeader,
        event: &RawEvent,
        receipt: &TransactionReceipt,
        ingested_at: DateTime<Utc>,
    ) -> Result<Option<NormalizedSwapRecord>, TransformError> {
        let data = &event.data;
        if data.len() < SWAP_EVENT_DATA_LEN {
            return Err(TransformError::MalformedEvent(data.len()));
        }

        let sell_address = data[layout::SELL_TOKEN];
        let buy_address = data[layout::BUY_TOKEN];

        let (Some(sell_token), Some(buy_token)) =
            (self.tokens.resolve(&sell_address), self.tokens.resolve(&buy_address))
        else {
            return Ok(None);
        };

        let sell_amount = normalize_amount(
            &data[layout::SELL_AMOUNT_LOW],
            &data[layout::SELL_AMOUNT_HIGH],
            sell_token.decimals,
        )?;
        let buy_amount = normalize_amount(
            &data[layout::BUY_AMOUNT_LOW],
            &data[layout::BUY_AMOUNT_HIGH],
            buy_token.decimals,
        )?;

        Ok(Some(NormalizedSwapRecord {
            exchange: self.exchange.clone(),
            sell_token: sell_address.to_hex(),
            buy_token: buy_address.to_hex(),
            pair: format!("{}-{}", sell_token.ticker, buy_token.ticker),
            block_number: header.block_number,
            block_time: header.timestamp,
            timestamp: ingested_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            transaction_hash: receipt.transaction_hash.to_hex(),
            taker_address: data[layout::TAKER].to_hex(),
            sell_amount,
            buy_amount,
            beneficiary_address: data[layout::BENEFICIARY].to_hex(),
        }))
    }
}
