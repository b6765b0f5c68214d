//! Bounded Swap Store
//!
//! A capped, time-ordered collection of swap records. Every insert is
//! followed by an eviction pass that deletes the records with the smallest
//! `block_time` until the collection is back at capacity. Inserts and
//! deletes are announced on a change feed so live views can follow along.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::record::{NormalizedSwapRecord, StoredSwap};

pub mod memory;
pub mod redis_store;

pub use memory::MemoryStore;
pub use redis_store::RedisStore;

/// Maximum number of records kept by default
pub const DEFAULT_CAPACITY: usize = 20;

/// Default collection name
pub const DEFAULT_COLLECTION: &str = "swaps";

/// Errors that can occur while reading or writing the store
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Redis error: {0}")]
    Redis(#[from] ::redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store capacity must be at least 1")]
    ZeroCapacity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    BlockTimeAscending,
    /// Newest first, as a live view loads its initial page
    #[default]
    BlockTimeDescending,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentKey {
    #[serde(rename = "_id")]
    pub id: String,
}

/// A change notification on the collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "operationType", rename_all = "camelCase")]
pub enum ChangeEvent {
    Insert {
        #[serde(rename = "fullDocument")]
        full_document: StoredSwap,
    },
    Delete {
        #[serde(rename = "documentKey")]
        document_key: DocumentKey,
    },
}

impl ChangeEvent {
    pub fn insert(doc: StoredSwap) -> Self {
        ChangeEvent::Insert { full_document: doc }
    }

    pub fn delete(id: impl Into<String>) -> Self {
        ChangeEvent::Delete {
            document_key: DocumentKey { id: id.into() },
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Result of a single insert
#[derive(Debug, Clone, PartialEq)]
pub struct InsertOutcome {
    pub stored: StoredSwap,
    /// Ids removed by the eviction pass, oldest first
    pub evicted: Vec<String>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SwapStore: Send + Sync {
    /// Maximum number of records retained
    fn capacity(&self) -> usize;

    /// Insert a record, assign its id, then evict the oldest records beyond capacity
    async fn insert(&self, record: NormalizedSwapRecord) -> Result<InsertOutcome, StoreError>;

    /// Snapshot of the current records
    async fn list(&self, order: SortOrder) -> Result<Vec<StoredSwap>, StoreError>;

    async fn count(&self) -> Result<usize, StoreError>;

    /// Remove every record, returning how many were removed
    async fn clear(&self) -> Result<usize, StoreError>;

    /// Remove records whose block is above `block_number`, returning their ids
    async fn remove_after_block(&self, block_number: u64) -> Result<Vec<String>, StoreError>;
}

/// Zero-padded so lexicographic order equals insertion order
pub(crate) fn format_id(seq: u64) -> String {
    format!("{seq:020}")
}

/// Pick the ids to evict so that at most `capacity` entries remain.
///
/// Entries are `(block_time, id)`; the smallest `block_time` goes first and
/// ties are broken by id, i.e. by insertion order.
pub(crate) fn select_evictions(entries: &[(u64, &str)], capacity: usize) -> Vec<String> {
    if entries.len() <= capacity {
        return Vec::new();
    }
    let excess = entries.len() - capacity;
    let mut ordered: Vec<_> = entries.to_vec();
    ordered.sort_unstable();
    ordered
        .into_iter()
        .take(excess)
        .map(|(_, id)| id.to_string())
        .collect()
}
