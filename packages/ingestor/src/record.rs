//! Swap Records
//!
//! The normalized document persisted for every accepted swap, and its stored
//! form carrying the store-assigned id.

use serde::{Deserialize, Serialize};

/// A swap event normalized for display.
///
/// Field names follow the persisted document schema consumed by the live
/// view, so they are serialized as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedSwapRecord {
    pub exchange: String,
    pub sell_token: String,
    pub buy_token: String,
    /// `"{sell ticker}-{buy ticker}"`
    pub pair: String,
    pub block_number: u64,
    /// Block timestamp in seconds, string-encoded
    #[serde(with = "string_encoded")]
    pub block_time: u64,
    /// Ingestion time, RFC 3339
    pub timestamp: String,
    pub transaction_hash: String,
    pub taker_address: String,
    pub sell_amount: f64,
    pub buy_amount: f64,
    pub beneficiary_address: String,
}

impl NormalizedSwapRecord {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// A record as held by a store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredSwap {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(flatten)]
    pub record: NormalizedSwapRecord,
}

impl StoredSwap {
    pub fn new(id: impl Into<String>, record: NormalizedSwapRecord) -> Self {
        Self { id: id.into(), record }
    }

    pub fn block_time(&self) -> u64 {
        self.record.block_time
    }

    pub fn block_number(&self) -> u64 {
        self.record.block_number
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Serialize an integer as a decimal string, accepting either form back
mod string_encoded {
    use serde::de::{self, Visitor};
    use serde::{Deserializer, Serializer};
    use std::fmt;

    pub fn serialize<S: Serializer>(value: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(value)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        struct U64OrString;

        impl Visitor<'_> for U64OrString {
            type Value = u64;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("an unsigned integer or a decimal string")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<u64, E> {
                Ok(v)
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<u64, E> {
                v.parse().map_err(E::custom)
            }
        }

        deserializer.deserialize_any(U64OrString)
    }
}
