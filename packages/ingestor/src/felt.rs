//! Field Elements
//!
//! Starknet encodes every value on the wire as a 252-bit field element. The
//! stream protocol splits it into four big-endian 64-bit limbs; the rest of
//! the crate works with the 32-byte form and its canonical hex rendering.

use std::fmt;
use std::str::FromStr;

use alloy::primitives::{B256, U256};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Number of hex digits in a canonical field element string (without prefix)
pub const FELT_HEX_DIGITS: usize = 64;

/// Errors that can occur when parsing or narrowing field elements
#[derive(Error, Debug, PartialEq, Eq)]
pub enum FeltError {
    #[error("Invalid hex string: {0}")]
    InvalidHex(String),

    #[error("Hex string too long for a field element: {0} digits")]
    TooLong(usize),

    #[error("Field element {0} does not fit in 128 bits")]
    Overflow128(String),
}

/// A 32-byte big-endian field element
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct FieldElement(B256);

impl FieldElement {
    pub const ZERO: Self = Self(B256::ZERO);

    /// Build from 32 big-endian bytes
    pub const fn from_be_bytes(bytes: [u8; 32]) -> Self {
        Self(B256::new(bytes))
    }

    /// Build from the four 64-bit limbs used by the stream protocol.
    ///
    /// `hi_hi` holds the most significant bits, `lo_lo` the least.
    pub fn from_limbs(lo_lo: u64, lo_hi: u64, hi_lo: u64, hi_hi: u64) -> Self {
        let mut bytes = [0u8; 32];
        bytes[0..8].copy_from_slice(&hi_hi.to_be_bytes());
        bytes[8..16].copy_from_slice(&hi_lo.to_be_bytes());
        bytes[16..24].copy_from_slice(&lo_hi.to_be_bytes());
        bytes[24..32].copy_from_slice(&lo_lo.to_be_bytes());
        Self::from_be_bytes(bytes)
    }

    /// Split into `(lo_lo, lo_hi, hi_lo, hi_hi)` limbs
    pub fn limbs(&self) -> (u64, u64, u64, u64) {
        let bytes = self.0 .0;
        let limb = |range: std::ops::Range<usize>| {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(&bytes[range]);
            u64::from_be_bytes(buf)
        };
        (limb(24..32), limb(16..24), limb(8..16), limb(0..8))
    }

    pub fn from_u64(value: u64) -> Self {
        Self::from_limbs(value, 0, 0, 0)
    }

    pub fn from_u128(value: u128) -> Self {
        let mut bytes = [0u8; 32];
        bytes[16..].copy_from_slice(&value.to_be_bytes());
        Self::from_be_bytes(bytes)
    }

    /// Parse a hex string, with or without `0x` prefix, of at most 64 digits.
    ///
    /// Leading zeros may be omitted and case is ignored, so `0x4dc7` and
    /// `0x0000...04DC7` parse to the same element.
    pub fn from_hex(hex_str: &str) -> Result<Self, FeltError> {
        let trimmed = hex_str.trim();
        let digits = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);

        if digits.is_empty() {
            return Err(FeltError::InvalidHex(hex_str.to_string()));
        }
        if digits.len() > FELT_HEX_DIGITS {
            return Err(FeltError::TooLong(digits.len()));
        }

        let padded = format!("{:0>width$}", digits, width = FELT_HEX_DIGITS);
        let decoded = hex::decode(&padded).map_err(|_| FeltError::InvalidHex(hex_str.to_string()))?;

        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&decoded);
        Ok(Self::from_be_bytes(bytes))
    }

    /// Canonical form: `0x` followed by 64 lowercase hex digits
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    pub fn to_u256(&self) -> U256 {
        U256::from_be_slice(self.0.as_slice())
    }

    /// Narrow to `u128`, failing if any of the upper 128 bits are set
    pub fn to_u128(&self) -> Result<u128, FeltError> {
        let bytes = self.0 .0;
        if bytes[..16].iter().any(|b| *b != 0) {
            return Err(FeltError::Overflow128(self.to_hex()));
        }
        let mut low = [0u8; 16];
        low.copy_from_slice(&bytes[16..]);
        Ok(u128::from_be_bytes(low))
    }

    pub fn is_zero(&self) -> bool {
        self.0 == B256::ZERO
    }
}

/// Combine a Cairo `u256` split into 128-bit halves into one integer
pub fn u256_from_halves(low: u128, high: u128) -> U256 {
    (U256::from(high) << 128) | U256::from(low)
}

impl fmt::Display for FieldElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for FieldElement {
    type Err = FeltError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl Serialize for FieldElement {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for FieldElement {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}
