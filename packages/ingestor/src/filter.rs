//! Swap Event Filtering
//!
//! Describes which events the stream should deliver (emitting contract plus
//! event key) and re-checks delivered events against the same criteria.
//! Targets the AVNU exchange `Swap` event on Starknet mainnet.

use prost::Message;

use crate::decoder::RawEvent;
use crate::felt::FieldElement;
use crate::proto::starknet as pb;

/// AVNU exchange contract on Starknet mainnet
pub const AVNU_EXCHANGE_ADDRESS: &str =
    "0x04270219d365d6b017231b52e92b3fb5d7c8378b05e9abc97724537a80e93b0f";

/// Selector of the AVNU `Swap` event
pub const SWAP_EVENT_KEY: &str = "0xe316f0d9d2a3affa97de1d99bb2aac0538e2666d0d8545545ead241ef0ccab";

/// Event subscription criteria
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventFilter {
    /// Contract that emits the event
    pub contract_address: FieldElement,
    /// Leading event keys that must match, in order
    pub keys: Vec<FieldElement>,
    /// Deliver every block header (`weak = false`), not only headers of blocks with matches
    pub include_header: bool,
}

impl EventFilter {
    pub fn new(contract_address: FieldElement, keys: Vec<FieldElement>) -> Self {
        Self {
            contract_address,
            keys,
            include_header: true,
        }
    }

    /// Filter for AVNU swaps, as subscribed by default
    pub fn avnu_swaps() -> Self {
        Self::new(
            FieldElement::from_hex(AVNU_EXCHANGE_ADDRESS).unwrap_or_default(),
            vec![FieldElement::from_hex(SWAP_EVENT_KEY).unwrap_or_default()],
        )
    }

    /// Check a delivered event against the filter.
    ///
    /// An event matches when it was emitted by the configured contract and
    /// its keys start with the configured keys.
    pub fn matches(&self, event: &RawEvent) -> bool {
        event.from_address == self.contract_address
            && event.keys.len() >= self.keys.len()
            && self.keys.iter().zip(&event.keys).all(|(want, got)| want == got)
    }

    /// Build the Starknet filter message sent with the stream request
    pub fn to_proto(&self) -> pb::Filter {
        pb::Filter {
            header: Some(pb::HeaderFilter {
                weak: !self.include_header,
            }),
            events: vec![pb::EventFilter {
                from_address: Some(self.contract_address.into()),
                keys: self.keys.iter().copied().map(Into::into).collect(),
                data: Vec::new(),
                include_reverted: None,
                include_transaction: None,
                include_receipt: Some(true),
            }],
        }
    }

    /// Encoded filter bytes for `StreamDataRequest::filter`
    pub fn encode(&self) -> Vec<u8> {
        self.to_proto().encode_to_vec()
    }
}

impl Default for EventFilter {
    fn default() -> Self {
        Self::avnu_swaps()
    }
}
