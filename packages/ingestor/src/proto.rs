//! Stream Wire Messages
//!
//! Protobuf messages of the Apibara DNA `v1alpha2` stream and the Starknet
//! block payloads it carries. Only the fields this crate reads are declared;
//! prost skips unknown fields when decoding.

/// `apibara.node.v1alpha2`
pub mod node {
    /// Fully qualified path of the bidirectional data stream RPC
    pub const STREAM_DATA_PATH: &str = "/apibara.node.v1alpha2.Stream/StreamData";

    #[derive(Clone, PartialEq, Eq, Hash, ::prost::Message)]
    pub struct Cursor {
        /// Block number
        #[prost(uint64, tag = "1")]
        pub order_key: u64,
        /// Block hash, empty when unknown
        #[prost(bytes = "vec", tag = "2")]
        pub unique_key: Vec<u8>,
    }

    impl Cursor {
        pub fn at_block(block_number: u64) -> Self {
            Self {
                order_key: block_number,
                unique_key: Vec::new(),
            }
        }
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct StreamDataRequest {
        #[prost(uint64, optional, tag = "1")]
        pub batch_size: Option<u64>,
        #[prost(uint64, optional, tag = "2")]
        pub stream_id: Option<u64>,
        #[prost(message, optional, tag = "3")]
        pub starting_cursor: Option<Cursor>,
        #[prost(enumeration = "DataFinality", optional, tag = "4")]
        pub finality: Option<i32>,
        /// Encoded chain-specific filter
        #[prost(bytes = "vec", tag = "5")]
        pub filter: Vec<u8>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct StreamDataResponse {
        #[prost(uint64, tag = "1")]
        pub stream_id: u64,
        #[prost(oneof = "stream_data_response::Message", tags = "2, 3, 4")]
        pub message: Option<stream_data_response::Message>,
    }

    pub mod stream_data_response {
        #[derive(Clone, PartialEq, ::prost::Oneof)]
        pub enum Message {
            #[prost(message, tag = "2")]
            Invalidate(super::Invalidate),
            #[prost(message, tag = "3")]
            Data(super::Data),
            #[prost(message, tag = "4")]
            Heartbeat(super::Heartbeat),
        }
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Invalidate {
        #[prost(message, optional, tag = "1")]
        pub cursor: Option<Cursor>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Data {
        #[prost(message, optional, tag = "1")]
        pub end_cursor: Option<Cursor>,
        #[prost(enumeration = "DataFinality", tag = "2")]
        pub finality: i32,
        /// One encoded block per entry
        #[prost(bytes = "vec", repeated, tag = "3")]
        pub data: Vec<Vec<u8>>,
        #[prost(message, optional, tag = "4")]
        pub cursor: Option<Cursor>,
    }

    #[derive(Clone, Copy, PartialEq, ::prost::Message)]
    pub struct Heartbeat {}

    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
    #[repr(i32)]
    pub enum DataFinality {
        DataStatusUnknown = 0,
        DataStatusPending = 1,
        DataStatusAccepted = 2,
        DataStatusFinalized = 3,
    }
}

/// `apibara.starknet.v1alpha2`
pub mod starknet {
    use crate::felt;

    #[derive(Clone, Copy, PartialEq, Eq, Hash, ::prost::Message)]
    pub struct FieldElement {
        #[prost(fixed64, tag = "1")]
        pub lo_lo: u64,
        #[prost(fixed64, tag = "2")]
        pub lo_hi: u64,
        #[prost(fixed64, tag = "3")]
        pub hi_lo: u64,
        #[prost(fixed64, tag = "4")]
        pub hi_hi: u64,
    }

    impl From<&FieldElement> for felt::FieldElement {
        fn from(fe: &FieldElement) -> Self {
            felt::FieldElement::from_limbs(fe.lo_lo, fe.lo_hi, fe.hi_lo, fe.hi_hi)
        }
    }

    impl From<felt::FieldElement> for FieldElement {
        fn from(fe: felt::FieldElement) -> Self {
            let (lo_lo, lo_hi, hi_lo, hi_hi) = fe.limbs();
            FieldElement {
                lo_lo,
                lo_hi,
                hi_lo,
                hi_hi,
            }
        }
    }

    /// Same wire layout as `google.protobuf.Timestamp`
    #[derive(Clone, Copy, PartialEq, Eq, Hash, ::prost::Message)]
    pub struct Timestamp {
        #[prost(int64, tag = "1")]
        pub seconds: i64,
        #[prost(int32, tag = "2")]
        pub nanos: i32,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Block {
        #[prost(message, optional, tag = "2")]
        pub header: Option<BlockHeader>,
        #[prost(message, repeated, tag = "3")]
        pub transactions: Vec<TransactionWithReceipt>,
        #[prost(message, repeated, tag = "5")]
        pub events: Vec<EventWithTransaction>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct BlockHeader {
        #[prost(message, optional, tag = "1")]
        pub block_hash: Option<FieldElement>,
        #[prost(message, optional, tag = "2")]
        pub parent_block_hash: Option<FieldElement>,
        #[prost(uint64, tag = "3")]
        pub block_number: u64,
        #[prost(message, optional, tag = "6")]
        pub timestamp: Option<Timestamp>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct TransactionWithReceipt {
        #[prost(message, optional, tag = "1")]
        pub transaction: Option<Transaction>,
        #[prost(message, optional, tag = "2")]
        pub receipt: Option<TransactionReceipt>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Transaction {
        #[prost(message, optional, tag = "1")]
        pub meta: Option<TransactionMeta>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct TransactionMeta {
        #[prost(message, optional, tag = "1")]
        pub hash: Option<FieldElement>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct TransactionReceipt {
        #[prost(message, optional, tag = "1")]
        pub transaction_hash: Option<FieldElement>,
        #[prost(uint64, tag = "2")]
        pub transaction_index: u64,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct EventWithTransaction {
        #[prost(message, optional, tag = "1")]
        pub transaction: Option<Transaction>,
        #[prost(message, optional, tag = "2")]
        pub receipt: Option<TransactionReceipt>,
        #[prost(message, optional, tag = "3")]
        pub event: Option<Event>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Event {
        #[prost(message, optional, tag = "1")]
        pub from_address: Option<FieldElement>,
        #[prost(message, repeated, tag = "2")]
        pub keys: Vec<FieldElement>,
        #[prost(message, repeated, tag = "3")]
        pub data: Vec<FieldElement>,
        #[prost(uint64, tag = "4")]
        pub index: u64,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Filter {
        #[prost(message, optional, tag = "1")]
        pub header: Option<HeaderFilter>,
        #[prost(message, repeated, tag = "4")]
        pub events: Vec<EventFilter>,
    }

    #[derive(Clone, Copy, PartialEq, ::prost::Message)]
    pub struct HeaderFilter {
        /// Only send the header when other data matched
        #[prost(bool, tag = "1")]
        pub weak: bool,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct EventFilter {
        #[prost(message, optional, tag = "1")]
        pub from_address: Option<FieldElement>,
        #[prost(message, repeated, tag = "2")]
        pub keys: Vec<FieldElement>,
        #[prost(message, repeated, tag = "3")]
        pub data: Vec<FieldElement>,
        #[prost(bool, optional, tag = "4")]
        pub include_reverted: Option<bool>,
        #[prost(bool, optional, tag = "5")]
        pub include_transaction: Option<bool>,
        #[prost(bool, optional, tag = "6")]
        pub include_receipt: Option<bool>,
    }
}
