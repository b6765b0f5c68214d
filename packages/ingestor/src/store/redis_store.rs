//! Redis Store
//!
//! Persists swap documents in Redis and announces every insert and delete on
//! a pub/sub channel for the live view.
//!
//! Layout for collection `swaps`:
//! - `swaps:docs` hash, id -> document JSON
//! - `swaps:by_block_time` sorted set, id scored by `block_time`
//! - `swaps:seq` id counter
//! - `swaps:changes` pub/sub channel of [`ChangeEvent`] JSON

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tracing::{debug, info, warn};

use super::{format_id, ChangeEvent, InsertOutcome, SortOrder, StoreError, SwapStore};
use crate::record::{NormalizedSwapRecord, StoredSwap};

/// Default Redis URL
pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";

/// Writes one document and trims the collection back to capacity.
///
/// KEYS: docs hash, order zset. ARGV: id, document JSON, block_time, capacity.
/// Returns the evicted ids, lowest score first; equal scores fall back to
/// member order, i.e. insertion order.
const INSERT_AND_TRIM: &str = r#"
redis.call('HSET', KEYS[1], ARGV[1], ARGV[2])
redis.call('ZADD', KEYS[2], ARGV[3], ARGV[1])
local excess = redis.call('ZCARD', KEYS[2]) - tonumber(ARGV[4])
if excess <= 0 then
    return {}
end
local evicted = redis.call('ZRANGE', KEYS[2], 0, excess - 1)
redis.call('ZREM', KEYS[2], unpack(evicted))
redis.call('HDEL', KEYS[1], unpack(evicted))
return evicted
"#;

/// Bounded store backed by Redis
pub struct RedisStore {
    client: redis::Client,
    connection: MultiplexedConnection,
    collection: String,
    capacity: usize,
    insert_script: redis::Script,
}

impl RedisStore {
    /// Connect to Redis and bind to a collection
    ///
    /// # Arguments
    /// * `url` - Redis connection URL, e.g. `redis://127.0.0.1:6379`
    /// * `collection` - Key prefix shared by the documents, the order index and the change channel
    /// * `capacity` - Maximum number of documents kept; must be non-zero
    ///
    /// # Returns
    /// A store holding one multiplexed connection, or `StoreError::ZeroCapacity`
    /// / `StoreError::Redis` when the arguments or the server are unusable
    pub async fn connect(
        url: &str,
        collection: impl Into<String>,
        capacity: usize,
    ) -> Result<Self, StoreError> {
        if capacity == 0 {
            return Err(StoreError::ZeroCapacity);
        }
        let client = redis::Client::open(url)?;
        let connection = client.get_multiplexed_async_connection().await?;
        let collection = collection.into();
        info!(collection = %collection, capacity, "Connected to Redis store");

        Ok(Self {
            client,
            connection,
            collection,
            capacity,
            insert_script: redis::Script::new(INSERT_AND_TRIM),
        })
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn docs_key(&self) -> String {
        format!("{}:docs", self.collection)
    }

    pub fn order_key(&self) -> String {
        format!("{}:by_block_time", self.collection)
    }

    pub fn seq_key(&self) -> String {
        format!("{}:seq", self.collection)
    }

    /// Pub/sub channel carrying change events
    pub fn changes_channel(&self) -> String {
        format!("{}:changes", self.collection)
    }

    /// Subscribe to the change feed on a dedicated pub/sub connection
    pub async fn subscribe(&self) -> Result<impl Stream<Item = ChangeEvent>, StoreError> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(self.changes_channel()).await?;

        Ok(pubsub.into_on_message().filter_map(|msg| async move {
            let payload: String = msg.get_payload().ok()?;
            match ChangeEvent::from_json(&payload) {
                Ok(event) => Some(event),
                Err(e) => {
                    warn!(error = %e, "Ignoring malformed change event");
                    None
                }
            }
        }))
    }

    /// Publish a change event. A lost notification does not undo the write.
    async fn announce(&self, conn: &mut MultiplexedConnection, event: &ChangeEvent) {
        let json = match event.to_json() {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "Failed to serialize change event");
                return;
            }
        };
        let published: redis::RedisResult<i64> = conn.publish(self.changes_channel(), json).await;
        match published {
            Ok(subscribers) => debug!(subscribers, "Published change event"),
            Err(e) => warn!(error = %e, "Failed to publish change event"),
        }
    }

    /// Delete documents by id in one atomic step
    async fn delete_ids(
        &self,
        conn: &mut MultiplexedConnection,
        ids: &[String],
    ) -> Result<(), StoreError> {
        if ids.is_empty() {
            return Ok(());
        }
        let _: () = redis::pipe()
            .atomic()
            .zrem(self.order_key(), ids)
            .ignore()
            .hdel(self.docs_key(), ids)
            .ignore()
            .query_async(conn)
            .await?;
        Ok(())
    }

    async fn fetch_docs(
        &self,
        conn: &mut MultiplexedConnection,
        ids: &[String],
    ) -> Result<Vec<StoredSwap>, StoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let docs: Vec<Option<String>> = redis::cmd("HMGET")
            .arg(self.docs_key())
            .arg(ids)
            .query_async(conn)
            .await?;

        // An id evicted between the range read and HMGET comes back as nil
        docs.into_iter()
            .flatten()
            .map(|json| StoredSwap::from_json(&json).map_err(StoreError::from))
            .collect()
    }

    async fn all_docs(
        &self,
        conn: &mut MultiplexedConnection,
    ) -> Result<Vec<StoredSwap>, StoreError> {
        let docs: Vec<String> = conn.hvals(self.docs_key()).await?;
        docs.iter()
            .map(|json| StoredSwap::from_json(json).map_err(StoreError::from))
            .collect()
    }
}

#[async_trait]
impl SwapStore for RedisStore {
    fn capacity(&self) -> usize {
        self.capacity
    }

    async fn insert(&self, record: NormalizedSwapRecord) -> Result<InsertOutcome, StoreError> {
        let mut conn = self.connection.clone();

        let seq: u64 = conn.incr(self.seq_key(), 1u64).await?;
        let stored = StoredSwap::new(format_id(seq), record);
        let json = stored.to_json()?;

        // Write and trim run as one script, so a failure leaves nothing half applied
        let evicted: Vec<String> = self
            .insert_script
            .key(self.docs_key())
            .key(self.order_key())
            .arg(&stored.id)
            .arg(json)
            .arg(stored.block_time())
            .arg(self.capacity)
            .invoke_async(&mut conn)
            .await?;

        self.announce(&mut conn, &ChangeEvent::insert(stored.clone())).await;
        for id in &evicted {
            self.announce(&mut conn, &ChangeEvent::delete(id.clone())).await;
        }
        if !evicted.is_empty() {
            debug!(evicted = evicted.len(), "Evicted oldest swaps");
        }

        Ok(InsertOutcome { stored, evicted })
    }

    async fn list(&self, order: SortOrder) -> Result<Vec<StoredSwap>, StoreError> {
        let mut conn = self.connection.clone();
        let ids: Vec<String> = match order {
            SortOrder::BlockTimeAscending => conn.zrange(self.order_key(), 0, -1).await?,
            SortOrder::BlockTimeDescending => conn.zrevrange(self.order_key(), 0, -1).await?,
        };
        self.fetch_docs(&mut conn, &ids).await
    }

    async fn count(&self) -> Result<usize, StoreError> {
        let mut conn = self.connection.clone();
        Ok(conn.zcard(self.order_key()).await?)
    }

    async fn clear(&self) -> Result<usize, StoreError> {
        let mut conn = self.connection.clone();
        let ids: Vec<String> = conn.zrange(self.order_key(), 0, -1).await?;

        let _: () = redis::pipe()
            .atomic()
            .del(self.order_key())
            .ignore()
            .del(self.docs_key())
            .ignore()
            .query_async(&mut conn)
            .await?;

        for id in &ids {
            self.announce(&mut conn, &ChangeEvent::delete(id.clone())).await;
        }
        info!(collection = %self.collection, removed = ids.len(), "Collection cleared");
        Ok(ids.len())
    }

    async fn remove_after_block(&self, block_number: u64) -> Result<Vec<String>, StoreError> {
        let mut conn = self.connection.clone();
        let ids: Vec<String> = self
            .all_docs(&mut conn)
            .await?
            .into_iter()
            .filter(|doc| doc.block_number() > block_number)
            .map(|doc| doc.id)
            .collect();

        self.delete_ids(&mut conn, &ids).await?;
        for id in &ids {
            self.announce(&mut conn, &ChangeEvent::delete(id.clone())).await;
        }
        Ok(ids)
    }
}
