//! Block Decoder
//!
//! Decodes the opaque block payloads of a stream `data` batch into headers,
//! transactions and events with their receipts. A malformed payload fails
//! only its own batch item.

use prost::Message;
use thiserror::Error;
use tracing::debug;

use crate::felt::FieldElement;
use crate::proto::starknet as pb;

/// Errors that can occur during block decoding
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Failed to decode block protobuf: {0}")]
    Protobuf(#[from] prost::DecodeError),

    #[error("Empty block payload")]
    EmptyInput,
}

/// Block header fields used downstream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHeader {
    pub block_number: u64,
    /// Seconds since the Unix epoch
    pub timestamp: u64,
    pub block_hash: FieldElement,
}

/// An event as emitted on chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    pub from_address: FieldElement,
    pub keys: Vec<FieldElement>,
    pub data: Vec<FieldElement>,
    /// Position of the event within its block
    pub index: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionReceipt {
    pub transaction_hash: FieldElement,
    pub transaction_index: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedTransaction {
    pub hash: Option<FieldElement>,
    pub receipt: Option<TransactionReceipt>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventWithReceipt {
    pub event: RawEvent,
    pub receipt: Option<TransactionReceipt>,
}

/// A decoded block, in delivery order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedBlock {
    pub header: Option<BlockHeader>,
    pub transactions: Vec<DecodedTransaction>,
    pub events: Vec<EventWithReceipt>,
}

impl DecodedBlock {
    pub fn block_number(&self) -> Option<u64> {
        self.header.as_ref().map(|h| h.block_number)
    }
}

fn felt(fe: Option<&pb::FieldElement>) -> FieldElement {
    fe.map(FieldElement::from).unwrap_or(FieldElement::ZERO)
}

fn felts(fes: &[pb::FieldElement]) -> Vec<FieldElement> {
    fes.iter().map(FieldElement::from).collect()
}

impl From<&pb::BlockHeader> for BlockHeader {
    fn from(header: &pb::BlockHeader) -> Self {
        BlockHeader {
            block_number: header.block_number,
            timestamp: header
                .timestamp
                .map(|ts| u64::try_from(ts.seconds).unwrap_or(0))
                .unwrap_or(0),
            block_hash: felt(header.block_hash.as_ref()),
        }
    }
}

impl From<&pb::TransactionReceipt> for TransactionReceipt {
    fn from(receipt: &pb::TransactionReceipt) -> Self {
        TransactionReceipt {
            transaction_hash: felt(receipt.transaction_hash.as_ref()),
            transaction_index: receipt.transaction_index,
        }
    }
}

impl From<&pb::Event> for RawEvent {
    fn from(event: &pb::Event) -> Self {
        RawEvent {
            from_address: felt(event.from_address.as_ref()),
            keys: felts(&event.keys),
            data: felts(&event.data),
            index: event.index,
        }
    }
}

/// Decode one encoded block
pub fn decode_block(bytes: &[u8]) -> Result<DecodedBlock, DecodeError> {
    if bytes.is_empty() {
        return Err(DecodeError::EmptyInput);
    }

    let block = pb::Block::decode(bytes)?;

    let transactions = block
        .transactions
        .iter()
        .map(|tx| DecodedTransaction {
            hash: tx
                .transaction
                .as_ref()
                .and_then(|t| t.meta.as_ref())
                .and_then(|m| m.hash.as_ref())
                .map(FieldElement::from),
            receipt: tx.receipt.as_ref().map(TransactionReceipt::from),
        })
        .collect();

    let events = block
        .events
        .iter()
        .filter_map(|ev| match ev.event.as_ref() {
            Some(event) => Some(EventWithReceipt {
                event: RawEvent::from(event),
                receipt: ev.receipt.as_ref().map(TransactionReceipt::from),
            }),
            None => {
                debug!("Skipping event entry without event payload");
                None
            }
        })
        .collect();

    Ok(DecodedBlock {
        header: block.header.as_ref().map(BlockHeader::from),
        transactions,
        events,
    })
}

/// Decode every payload of a `data` batch independently
pub fn decode_batch<B: AsRef<[u8]>>(batch: &[B]) -> Vec<Result<DecodedBlock, DecodeError>> {
    batch.iter().map(|payload| decode_block(payload.as_ref())).collect()
}

/// Encode a block payload, the inverse of [`decode_block`] for the fields it reads.
///
/// Used to build fixtures for tests and benchmarks.
pub fn encode_block(
    header: Option<&BlockHeader>,
    events: &[(RawEvent, Option<TransactionReceipt>)],
) -> Vec<u8> {
    let to_pb_receipt = |r: &TransactionReceipt| pb::TransactionReceipt {
        transaction_hash: Some(r.transaction_hash.into()),
        transaction_index: r.transaction_index,
    };

    let block = pb::Block {
        header: header.map(|h| pb::BlockHeader {
            block_hash: Some(h.block_hash.into()),
            parent_block_hash: None,
            block_number: h.block_number,
            timestamp: Some(pb::Timestamp {
                seconds: i64::try_from(h.timestamp).unwrap_or(i64::MAX),
                nanos: 0,
            }),
        }),
        transactions: events
            .iter()
            .filter_map(|(_, receipt)| receipt.as_ref())
            .map(|r| pb::TransactionWithReceipt {
                transaction: Some(pb::Transaction {
                    meta: Some(pb::TransactionMeta {
                        hash: Some(r.transaction_hash.into()),
                    }),
                }),
                receipt: Some(to_pb_receipt(r)),
            })
            .collect(),
        events: events
            .iter()
            .map(|(event, receipt)| pb::EventWithTransaction {
                transaction: None,
                receipt: receipt.as_ref().map(to_pb_receipt),
                event: Some(pb::Event {
                    from_address: Some(event.from_address.into()),
                    keys: event.keys.iter().copied().map(Into::into).collect(),
                    data: event.data.iter().copied().map(Into::into).collect(),
                    index: event.index,
                }),
            })
            .collect(),
    };

    block.encode_to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(number: u64) -> BlockHeader {
        BlockHeader {
            block_number: number,
            timestamp: 1_700_000_000 + number,
            block_hash: FieldElement::from_u64(0xabc0 + number),
        }
    }

    fn event(index: u64) -> RawEvent {
        RawEvent {
            from_address: FieldElement::from_u64(0x42),
            keys: vec![FieldElement::from_u64(0x1)],
            data: (0..8).map(FieldElement::from_u64).collect(),
            index,
        }
    }

    fn receipt(hash: u64) -> TransactionReceipt {
        TransactionReceipt {
            transaction_hash: FieldElement::from_u64(hash),
            transaction_index: hash,
        }
    }

    #[test]
    fn test_decode_empty_input_returns_error() {
        assert!(matches!(decode_block(&[]), Err(DecodeError::EmptyInput)));
    }

    #[test]
    fn test_decode_invalid_protobuf_returns_error() {
        let garbage = vec![0xff, 0xff, 0xff, 0xff];
        assert!(matches!(decode_block(&garbage), Err(DecodeError::Protobuf(_))));
    }

    #[test]
    fn test_decode_header_and_events() {
        let bytes = encode_block(
            Some(&header(100)),
            &[(event(0), Some(receipt(7))), (event(1), None)],
        );
        let block = decode_block(&bytes).unwrap();

        assert_eq!(block.header, Some(header(100)));
        assert_eq!(block.block_number(), Some(100));
        assert_eq!(block.events.len(), 2);
        assert_eq!(block.events[0].event, event(0));
        assert_eq!(block.events[0].receipt, Some(receipt(7)));
        assert_eq!(block.events[1].receipt, None);
        assert_eq!(block.transactions.len(), 1);
        assert_eq!(block.transactions[0].hash, Some(FieldElement::from_u64(7)));
    }

    #[test]
    fn test_decode_preserves_event_order() {
        let events: Vec<_> = (0..5).map(|i| (event(i), Some(receipt(i)))).collect();
        let block = decode_block(&encode_block(Some(&header(1)), &events)).unwrap();
        let indices: Vec<u64> = block.events.iter().map(|e| e.event.index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_decode_block_without_header() {
        let bytes = encode_block(None, &[(event(0), Some(receipt(1)))]);
        let block = decode_block(&bytes).unwrap();
        assert!(block.header.is_none());
        assert_eq!(block.block_number(), None);
    }

    #[test]
    fn test_decode_batch_isolates_failures() {
        let good = encode_block(Some(&header(5)), &[]);
        let batch = vec![good.clone(), vec![0xff, 0xff], good];
        let results = decode_batch(&batch);
        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok());
        assert!(results[1].is_err());
        assert!(results[2].is_ok());
    }
}
