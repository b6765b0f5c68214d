//! Mock Pipeline Integration Tests
//!
//! Tests the full pipeline with a mocked stream transport and the in-memory
//! store (no external dependencies). Verifies stream → decode → transform →
//! store works end to end, including reconnects and invalidations.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;

use swapfeed_ingestor::config::StreamConfig;
use swapfeed_ingestor::decoder::{encode_block, BlockHeader, RawEvent, TransactionReceipt};
use swapfeed_ingestor::proto::node::{
    stream_data_response, Cursor, Data, DataFinality, Invalidate, StreamDataRequest,
    StreamDataResponse,
};
use swapfeed_ingestor::store::{ChangeEvent, MemoryStore, SortOrder, SwapStore};
use swapfeed_ingestor::stream::{
    DataTransport, FixedDelay, MessageStream, ResponseStream, StreamClient, StreamError,
};
use swapfeed_ingestor::tokens::{TokenMetadata, TokenRegistry};
use swapfeed_ingestor::{EventFilter, FieldElement, Ingestor, StoredSwap, SwapTransformer};

const ETH: &str = "0x049d36570d4e46f48e99674bd3fcc84644ddd6b96f7c741b1562b82f9e004dc7";
const USDC: &str = "0x053c91253bc9682c04929ca02ed00b3e423f6710d2ee7e0d5ebb06f3ecf368a8";
const UNKNOWN: &str = "0x0badbadbad";

const ONE_ETHER: u128 = 1_000_000_000_000_000_000;

// ==================== Fixtures ====================

fn felt(hex: &str) -> FieldElement {
    FieldElement::from_hex(hex).unwrap()
}

/// AVNU swap event selling `sell_raw` of `sell` for `buy_raw` of `buy`
fn swap_event(sell: &str, sell_raw: u128, buy: &str, buy_raw: u128) -> RawEvent {
    let filter = EventFilter::avnu_swaps();
    RawEvent {
        from_address: filter.contract_address,
        keys: filter.keys,
        data: vec![
            felt("0x7a4e4"),
            felt(sell),
            FieldElement::from_u128(sell_raw),
            FieldElement::ZERO,
            felt(buy),
            FieldElement::from_u128(buy_raw),
            FieldElement::ZERO,
            felt("0xbe4e"),
        ],
        index: 0,
    }
}

/// Encoded block `number` holding one ETH → USDC swap, tx hash derived from `tag`
fn swap_block(number: u64, block_time: u64, tag: u64) -> Vec<u8> {
    let header = BlockHeader {
        block_number: number,
        timestamp: block_time,
        block_hash: FieldElement::from_u64(number),
    };
    let receipt = TransactionReceipt {
        transaction_hash: FieldElement::from_u64(tag),
        transaction_index: 0,
    };
    encode_block(
        Some(&header),
        &[(swap_event(ETH, ONE_ETHER, USDC, 2_500_000_000), Some(receipt))],
    )
}

fn data_response(
    stream_id: u64,
    number: u64,
    block: Vec<u8>,
) -> Result<StreamDataResponse, StreamError> {
    Ok(StreamDataResponse {
        stream_id,
        message: Some(stream_data_response::Message::Data(Data {
            end_cursor: Some(Cursor::at_block(number)),
            finality: DataFinality::DataStatusAccepted as i32,
            data: vec![block],
            cursor: Some(Cursor::at_block(number.saturating_sub(1))),
        })),
    })
}

fn unavailable() -> StreamError {
    StreamError::Status(tonic::Status::unavailable("connection reset by peer"))
}

fn transformer() -> SwapTransformer {
    SwapTransformer::with_default_exchange(Arc::new(TokenRegistry::mainnet().unwrap()))
}

fn stream_config(starting_block: u64) -> StreamConfig {
    StreamConfig {
        starting_block: Some(starting_block),
        ..StreamConfig::with_token("dna_test")
    }
}

fn no_delay() -> FixedDelay {
    FixedDelay::new(std::time::Duration::ZERO)
}

// ==================== Mock transports ====================

/// Serves a fixed chain of blocks from whatever cursor is requested,
/// dropping the connection after a scripted number of messages.
struct MockChainTransport {
    blocks: Arc<BTreeMap<u64, Vec<u8>>>,
    disconnect_after: VecDeque<usize>,
    opens: Arc<AtomicUsize>,
}

impl MockChainTransport {
    fn new(blocks: BTreeMap<u64, Vec<u8>>, disconnect_after: Vec<usize>) -> Self {
        Self {
            blocks: Arc::new(blocks),
            disconnect_after: disconnect_after.into(),
            opens: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl DataTransport for MockChainTransport {
    async fn open(&mut self, request: StreamDataRequest) -> Result<ResponseStream, StreamError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let stream_id = request.stream_id.unwrap_or_default();
        let start = request.starting_cursor.map(|c| c.order_key + 1).unwrap_or(0);

        let mut items: Vec<_> = self
            .blocks
            .range(start..)
            .map(|(&number, block)| data_response(stream_id, number, block.clone()))
            .collect();
        if let Some(limit) = self.disconnect_after.pop_front() {
            items.truncate(limit);
            items.push(Err(unavailable()));
        }
        Ok(stream::iter(items).boxed())
    }
}

/// Replays scripted sessions verbatim
struct ScriptedTransport {
    sessions: VecDeque<Vec<Result<StreamDataResponse, StreamError>>>,
}

#[async_trait]
impl DataTransport for ScriptedTransport {
    async fn open(&mut self, _request: StreamDataRequest) -> Result<ResponseStream, StreamError> {
        let items = self.sessions.pop_front().unwrap_or_default();
        Ok(stream::iter(items).boxed())
    }
}

/// Run the whole pipeline until the transport runs dry
async fn ingest<T: DataTransport>(
    transport: T,
    starting_block: u64,
    store: Arc<MemoryStore>,
) -> (Ingestor<MemoryStore>, Result<(), StreamError>) {
    let config = stream_config(starting_block);
    let cancel = CancellationToken::new();
    let mut messages: MessageStream =
        StreamClient::new(transport, no_delay(), &config).spawn(cancel.clone());

    let mut ingestor = Ingestor::new(store, transformer(), config.filter.clone());
    let result = ingestor.run(&mut messages, &cancel).await;
    messages.close().await;
    (ingestor, result)
}

async fn stored(store: &MemoryStore) -> Vec<StoredSwap> {
    store.list(SortOrder::BlockTimeAscending).await.unwrap()
}

fn tx_hashes(swaps: &[StoredSwap]) -> Vec<String> {
    swaps.iter().map(|s| s.record.transaction_hash.clone()).collect()
}

// ==================== Basic Pipeline Tests ====================

#[tokio::test]
async fn test_pipeline_persists_known_swap() {
    let chain = BTreeMap::from([(101, swap_block(101, 1_700_000_101, 101))]);
    let store = Arc::new(MemoryStore::new(20).unwrap());

    let transport = MockChainTransport::new(chain, vec![]);
    let (ingestor, result) = ingest(transport, 100, store.clone()).await;
    assert!(result.is_ok());
    assert_eq!(ingestor.stats().records_persisted, 1);

    let swaps = stored(&store).await;
    assert_eq!(swaps.len(), 1);
    let record = &swaps[0].record;
    assert_eq!(record.exchange, "avnu-swap");
    assert_eq!(record.pair, "ETH-USDC");
    assert_eq!(record.block_number, 101);
    assert_eq!(record.block_time, 1_700_000_101);
    assert_eq!(record.sell_token, ETH);
    assert_eq!(record.buy_token, USDC);
    assert_eq!(record.transaction_hash, FieldElement::from_u64(101).to_hex());
}

#[tokio::test]
async fn test_one_ether_normalizes_to_one() {
    let chain = BTreeMap::from([(5, swap_block(5, 5, 5))]);
    let store = Arc::new(MemoryStore::new(20).unwrap());
    let (_, result) = ingest(MockChainTransport::new(chain, vec![]), 4, store.clone()).await;
    assert!(result.is_ok());

    let swaps = stored(&store).await;
    assert_eq!(swaps[0].record.sell_amount, 1.0);
    assert_eq!(swaps[0].record.buy_amount, 2500.0);
}

#[tokio::test]
async fn test_swap_with_unknown_token_not_persisted() {
    let header = BlockHeader {
        block_number: 9,
        timestamp: 9,
        block_hash: FieldElement::from_u64(9),
    };
    let receipt = TransactionReceipt {
        transaction_hash: FieldElement::from_u64(9),
        transaction_index: 0,
    };
    let block = encode_block(
        Some(&header),
        &[(swap_event(ETH, ONE_ETHER, UNKNOWN, 1), Some(receipt))],
    );
    let store = Arc::new(MemoryStore::new(20).unwrap());
    let mut feed = store.subscribe();

    let transport = MockChainTransport::new(BTreeMap::from([(9, block)]), vec![]);
    let (ingestor, result) = ingest(transport, 8, store.clone()).await;
    assert!(result.is_ok());
    assert_eq!(ingestor.stats().records_dropped, 1);
    assert_eq!(store.count().await.unwrap(), 0);
    assert!(feed.try_recv().is_err());
}

#[tokio::test]
async fn test_malformed_block_skipped_rest_persisted() {
    let chain = BTreeMap::from([
        (1, swap_block(1, 1, 1)),
        (2, vec![0xde, 0xad, 0xbe, 0xef]),
        (3, swap_block(3, 3, 3)),
    ]);
    let store = Arc::new(MemoryStore::new(20).unwrap());

    let (ingestor, result) = ingest(MockChainTransport::new(chain, vec![]), 0, store.clone()).await;
    assert!(result.is_ok());
    assert_eq!(ingestor.stats().blocks_skipped, 1);

    let numbers: Vec<u64> = stored(&store).await.iter().map(|s| s.block_number()).collect();
    assert_eq!(numbers, vec![1, 3]);
}

// ==================== Capacity Tests ====================

#[tokio::test]
async fn test_twenty_one_blocks_keep_latest_twenty() {
    let chain: BTreeMap<u64, Vec<u8>> = (1..=21).map(|n| (n, swap_block(n, n, n))).collect();
    let store = Arc::new(MemoryStore::new(20).unwrap());

    let (ingestor, result) = ingest(MockChainTransport::new(chain, vec![]), 0, store.clone()).await;
    assert!(result.is_ok());
    assert_eq!(ingestor.store().count().await.unwrap(), 20);

    let times: Vec<u64> = stored(&store).await.iter().map(|s| s.block_time()).collect();
    assert_eq!(times, (2..=21).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_change_feed_follows_inserts_and_evictions() {
    let chain: BTreeMap<u64, Vec<u8>> = (1..=30).map(|n| (n, swap_block(n, n, n))).collect();
    let store = Arc::new(MemoryStore::new(20).unwrap());
    let mut feed = store.subscribe();

    let (ingestor, result) = ingest(MockChainTransport::new(chain, vec![]), 0, store.clone()).await;
    assert!(result.is_ok());
    assert_eq!(ingestor.stats().records_persisted, 30);
    assert_eq!(ingestor.stats().records_evicted, 10);

    let mut live = 0i64;
    let mut max_live = 0i64;
    while let Ok(event) = feed.try_recv() {
        match event {
            ChangeEvent::Insert { .. } => live += 1,
            ChangeEvent::Delete { .. } => live -= 1,
        }
        max_live = max_live.max(live);
    }
    assert_eq!(live, 20);
    // Insert is announced before its eviction
    assert_eq!(max_live, 21);
}

// ==================== Reconnect Tests ====================

#[tokio::test]
async fn test_reconnect_matches_uninterrupted_run() {
    let chain: BTreeMap<u64, Vec<u8>> =
        (50..60).map(|n| (n, swap_block(n, 1_000 + n, n))).collect();

    let uninterrupted = Arc::new(MemoryStore::new(100).unwrap());
    let transport = MockChainTransport::new(chain.clone(), vec![]);
    let (steady, result) = ingest(transport, 49, uninterrupted.clone()).await;
    assert!(result.is_ok());
    assert_eq!(steady.stats().reconnects, 0);

    let interrupted = Arc::new(MemoryStore::new(100).unwrap());
    let transport = MockChainTransport::new(chain, vec![3, 0, 4]);
    let opens = transport.opens.clone();
    let (ingestor, result) = ingest(transport, 49, interrupted.clone()).await;

    assert!(result.is_ok());
    assert_eq!(opens.load(Ordering::SeqCst), 4);
    assert_eq!(ingestor.stats().reconnects, 3);

    let expected = tx_hashes(&stored(&uninterrupted).await);
    assert_eq!(expected.len(), 10);
    assert_eq!(tx_hashes(&stored(&interrupted).await), expected);
}

#[tokio::test]
async fn test_fatal_stream_error_surfaces() {
    let transport = ScriptedTransport {
        sessions: VecDeque::from([vec![
            data_response(0, 1, swap_block(1, 1, 1)),
            Err(StreamError::Status(tonic::Status::unauthenticated("invalid api key"))),
        ]]),
    };
    let store = Arc::new(MemoryStore::new(20).unwrap());

    let (_, result) = ingest(transport, 0, store.clone()).await;
    assert!(matches!(result, Err(StreamError::Status(_))));
    assert_eq!(store.count().await.unwrap(), 1);
}

// ==================== Invalidate Tests ====================

#[tokio::test]
async fn test_invalidate_replaces_orphaned_blocks() {
    let invalidate = Ok(StreamDataResponse {
        stream_id: 0,
        message: Some(stream_data_response::Message::Invalidate(Invalidate {
            cursor: Some(Cursor::at_block(3)),
        })),
    });
    let mut session: Vec<_> = (1..=5).map(|n| data_response(0, n, swap_block(n, n, n))).collect();
    session.push(invalidate);
    // Replacement blocks 4 and 5 carry different transactions
    session.push(data_response(0, 4, swap_block(4, 4, 400)));
    session.push(data_response(0, 5, swap_block(5, 5, 500)));

    let transport = ScriptedTransport {
        sessions: VecDeque::from([session]),
    };
    let store = Arc::new(MemoryStore::new(20).unwrap());

    let (ingestor, result) = ingest(transport, 0, store.clone()).await;
    assert!(result.is_ok());
    assert_eq!(ingestor.stats().records_invalidated, 2);

    let hashes = tx_hashes(&stored(&store).await);
    let expected: Vec<String> = [1u64, 2, 3, 400, 500]
        .iter()
        .map(|&n| FieldElement::from_u64(n).to_hex())
        .collect();
    assert_eq!(hashes, expected);
}

// ==================== Shutdown Tests ====================

#[tokio::test]
async fn test_cancelled_pipeline_writes_nothing() {
    let chain: BTreeMap<u64, Vec<u8>> = (1..=5).map(|n| (n, swap_block(n, n, n))).collect();
    let config = stream_config(0);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let store = Arc::new(MemoryStore::new(20).unwrap());
    let transport = MockChainTransport::new(chain, vec![]);
    let mut messages = StreamClient::new(transport, no_delay(), &config).spawn(cancel.clone());
    let mut ingestor = Ingestor::new(store.clone(), transformer(), config.filter.clone());

    assert!(ingestor.run(&mut messages, &cancel).await.is_ok());
    messages.close().await;
    assert_eq!(store.count().await.unwrap(), 0);
}
