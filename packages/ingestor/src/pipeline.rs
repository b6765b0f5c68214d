//! Ingestion Pipeline
//!
//! Consumes stream messages strictly in delivery order: decodes each block of
//! a `data` batch, matches and transforms its swap events and persists the
//! resulting records. A failure on one block, event or record is logged and
//! the pipeline moves on to the next.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::DEFAULT_HEARTBEAT_THRESHOLD_SECS;
use crate::decoder::{decode_batch, BlockHeader, EventWithReceipt};
use crate::filter::EventFilter;
use crate::proto::node::Cursor;
use crate::store::SwapStore;
use crate::stream::{MessageStream, StreamError, StreamMessage};
use crate::transform::SwapTransformer;

/// Where the pipeline currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// Waiting for the first message
    Connecting,
    /// Waiting for the next message
    Streaming,
    /// The stream task is re-opening a failed session
    Reconnecting,
    Decoding,
    Matching,
    Persisting,
    /// Rolling back records of an invalidated range
    Invalidated,
    /// Shut down or the stream ended
    Stopped,
    /// The stream failed with a fatal error
    Failed,
}

/// Counters kept while ingesting
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub messages: u64,
    pub heartbeats: u64,
    pub reconnects: u64,
    pub blocks: u64,
    /// Payloads that failed to decode
    pub blocks_skipped: u64,
    pub events: u64,
    /// Events outside the filter, without a receipt, or malformed
    pub events_skipped: u64,
    /// Records dropped because a token is unknown
    pub records_dropped: u64,
    pub records_persisted: u64,
    pub records_evicted: u64,
    pub persist_failures: u64,
    pub invalidations: u64,
    pub records_invalidated: u64,
}

/// Drives records from stream messages into a store
pub struct Ingestor<S: SwapStore + ?Sized> {
    store: Arc<S>,
    transformer: SwapTransformer,
    filter: EventFilter,
    state: PipelineState,
    stats: PipelineStats,
    heartbeat_threshold: Duration,
}

impl<S: SwapStore + ?Sized> Ingestor<S> {
    pub fn new(store: Arc<S>, transformer: SwapTransformer, filter: EventFilter) -> Self {
        Self {
            store,
            transformer,
            filter,
            state: PipelineState::Connecting,
            stats: PipelineStats::default(),
            heartbeat_threshold: Duration::from_secs(DEFAULT_HEARTBEAT_THRESHOLD_SECS),
        }
    }

    /// Set how long the stream may stay silent before a warning is logged
    pub fn with_heartbeat_threshold(mut self, threshold: Duration) -> Self {
        self.heartbeat_threshold = threshold;
        self
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Process messages until the stream ends, fails, or `cancel` fires.
    ///
    /// Cancellation is observed between messages, so a message is either
    /// handled completely or not at all. Returns the fatal stream error, if
    /// any.
    pub async fn run(
        &mut self,
        messages: &mut MessageStream,
        cancel: &CancellationToken,
    ) -> Result<(), StreamError> {
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("Shutdown requested, stopping ingestion");
                    self.state = PipelineState::Stopped;
                    return Ok(());
                }
                next = timeout(self.heartbeat_threshold, messages.recv()) => next,
            };

            match next {
                Err(_) => {
                    // Liveness is only reported, the connection is left alone
                    warn!(
                        threshold_secs = self.heartbeat_threshold.as_secs(),
                        "No message or heartbeat received within threshold"
                    );
                }
                Ok(None) => {
                    info!(stats = ?self.stats, "Stream ended");
                    self.state = PipelineState::Stopped;
                    return Ok(());
                }
                Ok(Some(Err(e))) => {
                    error!(error = %e, "Stream failed");
                    self.state = PipelineState::Failed;
                    return Err(e);
                }
                Ok(Some(Ok(message))) => {
                    self.handle_message(message).await;
                    // Reconnecting holds until the next session delivers
                    if self.state != PipelineState::Reconnecting {
                        self.state = PipelineState::Streaming;
                    }
                }
            }
        }
    }

    /// Handle one stream message
    pub async fn handle_message(&mut self, message: StreamMessage) {
        self.stats.messages += 1;
        match message {
            StreamMessage::Data { batch, end_cursor, .. } => {
                debug!(
                    blocks = batch.len(),
                    end_block = ?end_cursor.as_ref().map(|c| c.order_key),
                    "Received data"
                );
                self.handle_data(&batch).await;
            }
            StreamMessage::Invalidate { cursor } => {
                self.handle_invalidate(cursor.as_ref()).await
            }
            StreamMessage::Heartbeat => {
                self.stats.heartbeats += 1;
                debug!("Heartbeat");
            }
            StreamMessage::Reconnecting { retry_count, error } => {
                self.state = PipelineState::Reconnecting;
                self.stats.reconnects += 1;
                info!(retry_count, error = %error, "Stream reconnecting");
            }
        }
    }

    async fn handle_data(&mut self, batch: &[Vec<u8>]) {
        self.state = PipelineState::Decoding;

        for decoded in decode_batch(batch) {
            let block = match decoded {
                Ok(block) => block,
                Err(e) => {
                    self.stats.blocks_skipped += 1;
                    warn!(error = %e, "Skipping undecodable block");
                    continue;
                }
            };
            self.stats.blocks += 1;

            let Some(header) = block.header else {
                debug!(events = block.events.len(), "Skipping block without header");
                self.stats.events_skipped += block.events.len() as u64;
                continue;
            };

            for event in block.events {
                self.handle_event(&header, event).await;
            }
        }
    }

    async fn handle_event(&mut self, header: &BlockHeader, item: EventWithReceipt) {
        self.stats.events += 1;
        self.state = PipelineState::Matching;

        if !self.filter.matches(&item.event) {
            debug!(block_number = header.block_number, "Ignoring event outside filter");
            self.stats.events_skipped += 1;
            return;
        }
        let Some(receipt) = item.receipt else {
            debug!(block_number = header.block_number, "Skipping event without receipt");
            self.stats.events_skipped += 1;
            return;
        };

        let record = match self.transformer.transform(header, &item.event, &receipt) {
            Ok(Some(record)) => record,
            Ok(None) => {
                debug!(block_number = header.block_number, "Dropping swap with unknown token");
                self.stats.records_dropped += 1;
                return;
            }
            Err(e) => {
                warn!(
                    block_number = header.block_number,
                    tx = %receipt.transaction_hash,
                    error = %e,
                    "Skipping malformed swap event"
                );
                self.stats.events_skipped += 1;
                return;
            }
        };

        self.state = PipelineState::Persisting;
        let pair = record.pair.clone();
        match self.store.insert(record).await {
            Ok(outcome) => {
                self.stats.records_persisted += 1;
                self.stats.records_evicted += outcome.evicted.len() as u64;
                info!(
                    id = %outcome.stored.id,
                    block_number = header.block_number,
                    pair = %pair,
                    evicted = outcome.evicted.len(),
                    "Persisted swap"
                );
            }
            Err(e) => {
                self.stats.persist_failures += 1;
                error!(block_number = header.block_number, error = %e, "Failed to persist swap");
            }
        }
    }

    async fn handle_invalidate(&mut self, cursor: Option<&Cursor>) {
        self.state = PipelineState::Invalidated;
        self.stats.invalidations += 1;

        let Some(cursor) = cursor else {
            warn!("Invalidate without cursor, nothing to roll back");
            return;
        };

        match self.store.remove_after_block(cursor.order_key).await {
            Ok(removed) => {
                self.stats.records_invalidated += removed.len() as u64;
                info!(
                    block_number = cursor.order_key,
                    removed = removed.len(),
                    "Rolled back invalidated swaps"
                );
            }
            Err(e) => {
                error!(
                    block_number = cursor.order_key,
                    error = %e,
                    "Failed to roll back invalidated swaps"
                );
            }
        }
    }
}
