//! In-process store with a broadcast change feed.

use async_trait::async_trait;
use tokio::sync::{broadcast, RwLock};

use super::{
    format_id, select_evictions, ChangeEvent, InsertOutcome, SortOrder, StoreError, SwapStore,
};
use crate::record::{NormalizedSwapRecord, StoredSwap};

const CHANGE_FEED_CAPACITY: usize = 1024;

#[derive(Debug, Default)]
struct MemoryState {
    next_seq: u64,
    records: Vec<StoredSwap>,
}

/// Bounded store held in memory.
///
/// Insert and eviction happen under one write lock, so readers never see
/// the collection above capacity.
#[derive(Debug)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
    capacity: usize,
    changes: broadcast::Sender<ChangeEvent>,
}

impl MemoryStore {
    pub fn new(capacity: usize) -> Result<Self, StoreError> {
        if capacity == 0 {
            return Err(StoreError::ZeroCapacity);
        }
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Ok(Self {
            state: RwLock::new(MemoryState::default()),
            capacity,
            changes,
        })
    }

    /// Follow inserts and deletes from now on
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.changes.subscribe()
    }

    fn announce(&self, event: ChangeEvent) {
        // No receivers is fine
        let _ = self.changes.send(event);
    }

    fn remove_ids(records: &mut Vec<StoredSwap>, ids: &[String]) {
        records.retain(|r| !ids.contains(&r.id));
    }
}

#[async_trait]
impl SwapStore for MemoryStore {
    fn capacity(&self) -> usize {
        self.capacity
    }

    async fn insert(&self, record: NormalizedSwapRecord) -> Result<InsertOutcome, StoreError> {
        let (stored, evicted) = {
            let mut state = self.state.write().await;
            state.next_seq += 1;
            let stored = StoredSwap::new(format_id(state.next_seq), record);
            state.records.push(stored.clone());

            let entries: Vec<(u64, &str)> = state
                .records
                .iter()
                .map(|r| (r.block_time(), r.id.as_str()))
                .collect();
            let evicted = select_evictions(&entries, self.capacity);
            Self::remove_ids(&mut state.records, &evicted);
            (stored, evicted)
        };

        self.announce(ChangeEvent::insert(stored.clone()));
        for id in &evicted {
            self.announce(ChangeEvent::delete(id.clone()));
        }

        Ok(InsertOutcome { stored, evicted })
    }

    async fn list(&self, order: SortOrder) -> Result<Vec<StoredSwap>, StoreError> {
        let mut records = self.state.read().await.records.clone();
        records.sort_by(|a, b| (a.block_time(), &a.id).cmp(&(b.block_time(), &b.id)));
        if order == SortOrder::BlockTimeDescending {
            records.reverse();
        }
        Ok(records)
    }

    async fn count(&self) -> Result<usize, StoreError> {
        Ok(self.state.read().await.records.len())
    }

    async fn clear(&self) -> Result<usize, StoreError> {
        let removed = std::mem::take(&mut self.state.write().await.records);
        for record in &removed {
            self.announce(ChangeEvent::delete(record.id.clone()));
        }
        Ok(removed.len())
    }

    async fn remove_after_block(&self, block_number: u64) -> Result<Vec<String>, StoreError> {
        let removed: Vec<String> = {
            let mut state = self.state.write().await;
            let ids: Vec<String> = state
                .records
                .iter()
                .filter(|r| r.block_number() > block_number)
                .map(|r| r.id.clone())
                .collect();
            Self::remove_ids(&mut state.records, &ids);
            ids
        };
        for id in &removed {
            self.announce(ChangeEvent::delete(id.clone()));
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::fixtures::record;
    use crate::store::DEFAULT_CAPACITY;

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(matches!(MemoryStore::new(0), Err(StoreError::ZeroCapacity)));
    }

    #[tokio::test]
    async fn test_insert_assigns_increasing_ids() {
        let store = MemoryStore::new(DEFAULT_CAPACITY).unwrap();
        let first = store.insert(record(1)).await.unwrap();
        let second = store.insert(record(2)).await.unwrap();
        assert!(first.stored.id < second.stored.id);
        assert!(first.evicted.is_empty());
    }

    #[tokio::test]
    async fn test_count_never_exceeds_capacity() {
        let store = MemoryStore::new(5).unwrap();
        for i in 0..50u64 {
            // Non-monotonic block times
            store.insert(record((i * 7) % 13)).await.unwrap();
            assert!(store.count().await.unwrap() <= 5);
        }
        assert_eq!(store.count().await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_twenty_one_inserts_evict_block_time_one() {
        let store = MemoryStore::new(DEFAULT_CAPACITY).unwrap();
        for t in 1..=21u64 {
            store.insert(record(t)).await.unwrap();
        }

        let times: Vec<u64> = store
            .list(SortOrder::BlockTimeAscending)
            .await
            .unwrap()
            .iter()
            .map(|r| r.block_time())
            .collect();
        assert_eq!(times, (2..=21).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_eviction_removes_smallest_block_time_not_latest_insert() {
        let store = MemoryStore::new(2).unwrap();
        store.insert(record(10)).await.unwrap();
        store.insert(record(30)).await.unwrap();
        let outcome = store.insert(record(5)).await.unwrap();

        // The new record itself is the oldest and goes straight out
        assert_eq!(outcome.evicted, vec![outcome.stored.id.clone()]);
        let times: Vec<u64> = store
            .list(SortOrder::BlockTimeAscending)
            .await
            .unwrap()
            .iter()
            .map(|r| r.block_time())
            .collect();
        assert_eq!(times, vec![10, 30]);
    }

    #[tokio::test]
    async fn test_list_descending() {
        let store = MemoryStore::new(DEFAULT_CAPACITY).unwrap();
        for t in [3u64, 1, 2] {
            store.insert(record(t)).await.unwrap();
        }
        let times: Vec<u64> = store
            .list(SortOrder::BlockTimeDescending)
            .await
            .unwrap()
            .iter()
            .map(|r| r.block_time())
            .collect();
        assert_eq!(times, vec![3, 2, 1]);
    }

    #[tokio::test]
    async fn test_change_feed_reports_insert_then_delete() {
        let store = MemoryStore::new(1).unwrap();
        let mut feed = store.subscribe();

        let first = store.insert(record(1)).await.unwrap();
        let second = store.insert(record(2)).await.unwrap();

        assert_eq!(feed.recv().await.unwrap(), ChangeEvent::insert(first.stored.clone()));
        assert_eq!(feed.recv().await.unwrap(), ChangeEvent::insert(second.stored));
        assert_eq!(feed.recv().await.unwrap(), ChangeEvent::delete(first.stored.id));
    }

    #[tokio::test]
    async fn test_clear_removes_everything() {
        let store = MemoryStore::new(DEFAULT_CAPACITY).unwrap();
        for t in 0..4u64 {
            store.insert(record(t)).await.unwrap();
        }
        assert_eq!(store.clear().await.unwrap(), 4);
        assert_eq!(store.count().await.unwrap(), 0);
        assert!(store.list(SortOrder::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_remove_after_block() {
        let store = MemoryStore::new(DEFAULT_CAPACITY).unwrap();
        for t in 1..=5u64 {
            store.insert(record(t)).await.unwrap();
        }
        let removed = store.remove_after_block(3).await.unwrap();
        assert_eq!(removed.len(), 2);
        let numbers: Vec<u64> = store
            .list(SortOrder::BlockTimeAscending)
            .await
            .unwrap()
            .iter()
            .map(|r| r.block_number())
            .collect();
        assert_eq!(numbers, vec![1, 2, 3]);
    }
}
