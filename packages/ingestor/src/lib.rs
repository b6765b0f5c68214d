//! Swapfeed Ingestor Library
//!
//! This crate streams Starknet blocks from an Apibara DNA server, turns AVNU
//! swap events into normalized records and keeps the most recent ones in a
//! bounded, change-notifying store.

pub mod cli;
pub mod config;
pub mod decoder;
pub mod error;
pub mod felt;
pub mod filter;
pub mod logging;
pub mod pipeline;
pub mod proto;
pub mod record;
pub mod store;
pub mod stream;
pub mod tokens;
pub mod transform;

// Re-export commonly used types
pub use config::{IngestorConfig, StreamConfig};
pub use decoder::{decode_batch, decode_block, DecodedBlock};
pub use error::IngestorError;
pub use felt::FieldElement;
pub use filter::EventFilter;
pub use pipeline::{Ingestor, PipelineState, PipelineStats};
pub use record::{NormalizedSwapRecord, StoredSwap};
pub use store::{ChangeEvent, MemoryStore, RedisStore, SwapStore};
pub use stream::{MessageStream, StreamClient, StreamMessage};
pub use tokens::TokenRegistry;
pub use transform::SwapTransformer;
