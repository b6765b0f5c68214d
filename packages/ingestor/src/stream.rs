//! Chain Data Stream
//!
//! Maintains the subscription to the chain-data stream. A dedicated task owns
//! the transport connection, reconnects after transport failures and feeds
//! messages, in delivery order, into a channel the pipeline reads from.
//!
//! The client tracks the cursor of the last delivered batch and resumes from
//! it after a reconnect, so reconnecting neither replays nor skips blocks.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tonic::codec::ProstCodec;
use tonic::codegen::http::uri::PathAndQuery;
use tonic::metadata::{Ascii, MetadataValue};
use tonic::transport::{ClientTlsConfig, Endpoint, Uri};
use tonic::Code;
use tracing::{debug, error, info, warn};

use crate::config::{StreamConfig, DEFAULT_RECONNECT_DELAY_MS};
use crate::proto::node::{
    stream_data_response, Cursor, DataFinality, StreamDataRequest, StreamDataResponse,
    STREAM_DATA_PATH,
};

/// Initial backoff delay for [`ExponentialBackoff`]
pub const INITIAL_BACKOFF_MS: u64 = 100;

/// Maximum backoff delay for [`ExponentialBackoff`]
pub const MAX_BACKOFF_MS: u64 = 30000;

/// Buffered messages between the connection task and the pipeline
pub const MESSAGE_CHANNEL_CAPACITY: usize = 64;

/// Largest decoded message accepted from the server
const MAX_DECODING_MESSAGE_SIZE: usize = 100 * 1024 * 1024;

/// Errors that can occur on the stream
#[derive(Error, Debug)]
pub enum StreamError {
    #[error("Invalid stream endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("Invalid auth token: {0}")]
    InvalidToken(String),

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Stream call failed: {0}")]
    Status(#[from] tonic::Status),

    #[error("Reconnect aborted after {attempts} attempts: {source}")]
    ReconnectAborted {
        attempts: u32,
        #[source]
        source: Box<StreamError>,
    },
}

impl StreamError {
    /// Transport failures are retried; configuration failures are fatal
    pub fn is_retryable(&self) -> bool {
        match self {
            StreamError::Connection(_) => true,
            StreamError::Status(status) => !matches!(
                status.code(),
                Code::InvalidArgument
                    | Code::Unauthenticated
                    | Code::PermissionDenied
                    | Code::Unimplemented
            ),
            StreamError::InvalidEndpoint(_)
            | StreamError::InvalidToken(_)
            | StreamError::ReconnectAborted { .. } => false,
        }
    }
}

/// A message delivered by the stream
#[derive(Debug, Clone, PartialEq)]
pub enum StreamMessage {
    /// A batch of encoded blocks
    Data {
        cursor: Option<Cursor>,
        end_cursor: Option<Cursor>,
        finality: DataFinality,
        batch: Vec<Vec<u8>>,
    },
    /// Data delivered after `cursor` is no longer canonical
    Invalidate { cursor: Option<Cursor> },
    Heartbeat,
    /// The session failed and the client is about to reconnect
    Reconnecting { retry_count: u32, error: String },
}

impl StreamMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            StreamMessage::Data { .. } => "data",
            StreamMessage::Invalidate { .. } => "invalidate",
            StreamMessage::Heartbeat => "heartbeat",
            StreamMessage::Reconnecting { .. } => "reconnecting",
        }
    }
}

/// What to do after a transport failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    Retry(Duration),
    Stop,
}

/// Observes every reconnect attempt and decides whether to continue
pub trait ReconnectPolicy: Send + 'static {
    fn on_reconnect(&mut self, error: &StreamError, retry_count: u32) -> ReconnectDecision;
}

/// Same delay before every attempt
#[derive(Debug, Clone)]
pub struct FixedDelay {
    pub delay: Duration,
    /// `None` retries forever
    pub max_retries: Option<u32>,
}

impl Default for FixedDelay {
    fn default() -> Self {
        Self {
            delay: Duration::from_millis(DEFAULT_RECONNECT_DELAY_MS),
            max_retries: None,
        }
    }
}

impl FixedDelay {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            max_retries: None,
        }
    }
}

impl ReconnectPolicy for FixedDelay {
    fn on_reconnect(&mut self, _error: &StreamError, retry_count: u32) -> ReconnectDecision {
        match self.max_retries {
            Some(max) if retry_count > max => ReconnectDecision::Stop,
            _ => ReconnectDecision::Retry(self.delay),
        }
    }
}

/// Doubling delay, capped
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub max_retries: Option<u32>,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            initial_backoff_ms: INITIAL_BACKOFF_MS,
            max_backoff_ms: MAX_BACKOFF_MS,
            max_retries: None,
        }
    }
}

impl ExponentialBackoff {
    /// Delay before the given attempt, starting at 1
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(10);
        let delay_ms = self.initial_backoff_ms.saturating_mul(2u64.pow(exp));
        Duration::from_millis(delay_ms.min(self.max_backoff_ms))
    }
}

impl ReconnectPolicy for ExponentialBackoff {
    fn on_reconnect(&mut self, _error: &StreamError, retry_count: u32) -> ReconnectDecision {
        match self.max_retries {
            Some(max) if retry_count > max => ReconnectDecision::Stop,
            _ => ReconnectDecision::Retry(self.backoff_delay(retry_count)),
        }
    }
}

pub type ResponseStream = BoxStream<'static, Result<StreamDataResponse, StreamError>>;

/// Opens one stream session. Each call starts a fresh connection.
#[async_trait]
pub trait DataTransport: Send + 'static {
    async fn open(&mut self, request: StreamDataRequest) -> Result<ResponseStream, StreamError>;
}

/// gRPC transport to an Apibara DNA server
#[derive(Debug, Clone)]
pub struct GrpcTransport {
    endpoint: Endpoint,
    auth: Option<MetadataValue<Ascii>>,
}

impl GrpcTransport {
    /// Prepare a transport for the given server
    ///
    /// # Arguments
    /// * `url` - Server URL; `https` enables TLS with the native root certificates
    /// * `token` - Optional API key, sent as `authorization: bearer <token>`
    ///
    /// # Returns
    /// The transport, or an error when the URL or token cannot be used in a request.
    /// No connection is made until [`DataTransport::open`].
    pub fn new(url: &str, token: Option<&str>) -> Result<Self, StreamError> {
        let uri = Uri::from_str(url)
            .map_err(|e| StreamError::InvalidEndpoint(format!("{url}: {e}")))?;
        let tls = uri.scheme_str() == Some("https");

        let mut endpoint = Endpoint::from(uri);
        if tls {
            endpoint = endpoint
                .tls_config(ClientTlsConfig::new().with_native_roots())
                .map_err(|e| StreamError::InvalidEndpoint(e.to_string()))?;
        }

        let auth = token
            .map(|t| {
                format!("bearer {t}")
                    .parse::<MetadataValue<Ascii>>()
                    .map_err(|e| StreamError::InvalidToken(e.to_string()))
            })
            .transpose()?;

        Ok(Self { endpoint, auth })
    }
}

#[async_trait]
impl DataTransport for GrpcTransport {
    async fn open(&mut self, request: StreamDataRequest) -> Result<ResponseStream, StreamError> {
        // The connection is recreated for every session rather than reused
        let channel = self
            .endpoint
            .connect()
            .await
            .map_err(|e| StreamError::Connection(e.to_string()))?;

        let mut grpc = tonic::client::Grpc::new(channel)
            .max_decoding_message_size(MAX_DECODING_MESSAGE_SIZE);
        grpc.ready()
            .await
            .map_err(|e| StreamError::Connection(e.to_string()))?;

        // Keep the request side open; ending it would half-close the call
        let outbound = stream::once(async move { request }).chain(stream::pending());
        let mut call = tonic::Request::new(outbound);
        if let Some(auth) = &self.auth {
            call.metadata_mut().insert("authorization", auth.clone());
        }

        let codec: ProstCodec<StreamDataRequest, StreamDataResponse> = ProstCodec::default();
        let path = PathAndQuery::from_static(STREAM_DATA_PATH);
        let response = grpc.streaming(call, path, codec).await?;

        Ok(response.into_inner().map(|item| item.map_err(StreamError::from)).boxed())
    }
}

/// Receiving end of a running stream client
pub struct MessageStream {
    rx: mpsc::Receiver<Result<StreamMessage, StreamError>>,
    task: Option<JoinHandle<()>>,
    cancel: CancellationToken,
}

impl MessageStream {
    /// Wrap a channel fed by something other than [`StreamClient`], such as a replay
    pub fn from_receiver(rx: mpsc::Receiver<Result<StreamMessage, StreamError>>) -> Self {
        Self {
            rx,
            task: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Next message in delivery order.
    ///
    /// `None` once the stream has ended. A fatal error is yielded once,
    /// after which the stream ends.
    pub async fn recv(&mut self) -> Option<Result<StreamMessage, StreamError>> {
        self.rx.recv().await
    }

    /// Stop the connection task and wait for it to finish
    pub async fn close(self) {
        self.cancel.cancel();
        drop(self.rx);
        if let Some(task) = self.task {
            if let Err(e) = task.await {
                warn!(error = %e, "Stream task did not shut down cleanly");
            }
        }
    }
}

/// Reconnecting stream client
pub struct StreamClient<T, P> {
    transport: T,
    policy: P,
    filter: Vec<u8>,
    batch_size: u64,
    cursor: Option<Cursor>,
    stream_id: u64,
    retry_count: u32,
}

impl<T: DataTransport, P: ReconnectPolicy> StreamClient<T, P> {
    /// Create a client. Nothing is opened until [`StreamClient::spawn`].
    ///
    /// # Arguments
    /// * `transport` - Opens each session
    /// * `policy` - Consulted after every retryable failure
    /// * `config` - Filter, batch size and starting block of the first session
    ///
    /// # Returns
    /// A client whose first request resumes after `config.starting_block`,
    /// or from the server's default when it is unset
    pub fn new(transport: T, policy: P, config: &StreamConfig) -> Self {
        Self {
            transport,
            policy,
            filter: config.filter.encode(),
            batch_size: config.batch_size,
            cursor: config.starting_block.map(Cursor::at_block),
            stream_id: 0,
            retry_count: 0,
        }
    }

    /// Cursor the next session resumes from
    pub fn cursor(&self) -> Option<&Cursor> {
        self.cursor.as_ref()
    }

    fn request(&self) -> StreamDataRequest {
        StreamDataRequest {
            batch_size: Some(self.batch_size),
            stream_id: Some(self.stream_id),
            starting_cursor: self.cursor.clone(),
            finality: Some(DataFinality::DataStatusAccepted as i32),
            filter: self.filter.clone(),
        }
    }

    /// Start the connection task
    pub fn spawn(self, cancel: CancellationToken) -> MessageStream {
        let (tx, rx) = mpsc::channel(MESSAGE_CHANNEL_CAPACITY);
        let cancel = cancel.child_token();
        let task = tokio::spawn(self.run(tx, cancel.clone()));
        MessageStream {
            rx,
            task: Some(task),
            cancel,
        }
    }

    async fn run(
        mut self,
        tx: mpsc::Sender<Result<StreamMessage, StreamError>>,
        cancel: CancellationToken,
    ) {
        'connect: loop {
            info!(
                stream_id = self.stream_id,
                cursor = ?self.cursor.as_ref().map(|c| c.order_key),
                "Opening data stream"
            );

            let request = self.request();
            let opened = tokio::select! {
                _ = cancel.cancelled() => return,
                opened = self.transport.open(request) => opened,
            };
            let mut responses = match opened {
                Ok(responses) => responses,
                Err(e) => {
                    if self.backoff(e, &tx, &cancel).await {
                        continue 'connect;
                    }
                    return;
                }
            };

            loop {
                let next = tokio::select! {
                    _ = cancel.cancelled() => return,
                    next = responses.next() => next,
                };

                match next {
                    None => {
                        info!("Data stream ended");
                        return;
                    }
                    Some(Ok(response)) => {
                        self.retry_count = 0;
                        let Some(message) = self.accept(response) else {
                            continue;
                        };
                        if tx.send(Ok(message)).await.is_err() {
                            debug!("Message receiver dropped, stopping stream");
                            return;
                        }
                    }
                    Some(Err(e)) => {
                        if self.backoff(e, &tx, &cancel).await {
                            continue 'connect;
                        }
                        return;
                    }
                }
            }
        }
    }

    /// Convert a response into a message and advance the resume cursor.
    ///
    /// Responses of an earlier session are ignored.
    fn accept(&mut self, response: StreamDataResponse) -> Option<StreamMessage> {
        if response.stream_id != self.stream_id {
            debug!(
                got = response.stream_id,
                expected = self.stream_id,
                "Ignoring message from previous stream"
            );
            return None;
        }

        match response.message? {
            stream_data_response::Message::Data(data) => {
                if data.end_cursor.is_some() {
                    self.cursor = data.end_cursor.clone();
                }
                Some(StreamMessage::Data {
                    cursor: data.cursor,
                    end_cursor: data.end_cursor,
                    finality: DataFinality::try_from(data.finality)
                        .unwrap_or(DataFinality::DataStatusUnknown),
                    batch: data.data,
                })
            }
            stream_data_response::Message::Invalidate(invalidate) => {
                if invalidate.cursor.is_some() {
                    self.cursor = invalidate.cursor.clone();
                }
                Some(StreamMessage::Invalidate {
                    cursor: invalidate.cursor,
                })
            }
            stream_data_response::Message::Heartbeat(_) => Some(StreamMessage::Heartbeat),
        }
    }

    /// Handle a failed session. Returns `true` to reconnect.
    async fn backoff(
        &mut self,
        err: StreamError,
        tx: &mpsc::Sender<Result<StreamMessage, StreamError>>,
        cancel: &CancellationToken,
    ) -> bool {
        if !err.is_retryable() {
            error!(error = %err, "Fatal stream error");
            let _ = tx.send(Err(err)).await;
            return false;
        }

        self.retry_count += 1;
        match self.policy.on_reconnect(&err, self.retry_count) {
            ReconnectDecision::Retry(delay) => {
                warn!(
                    error = %err,
                    retry_count = self.retry_count,
                    ?delay,
                    "Reconnecting data stream"
                );
                let notice = StreamMessage::Reconnecting {
                    retry_count: self.retry_count,
                    error: err.to_string(),
                };
                if tx.send(Ok(notice)).await.is_err() {
                    debug!("Message receiver dropped, not reconnecting");
                    return false;
                }
                tokio::select! {
                    _ = cancel.cancelled() => return false,
                    _ = sleep(delay) => {}
                }
                self.stream_id += 1;
                true
            }
            ReconnectDecision::Stop => {
                error!(error = %err, retry_count = self.retry_count, "Giving up on data stream");
                let _ = tx
                    .send(Err(StreamError::ReconnectAborted {
                        attempts: self.retry_count,
                        source: Box::new(err),
                    }))
                    .await;
                false
            }
        }
    }
}
