use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use swapfeed_ingestor::cli::{Cli, Command, RunArgs, StoreArgs, StoreBackend};
use swapfeed_ingestor::logging::init_logging;
use swapfeed_ingestor::store::{MemoryStore, RedisStore, SortOrder, StoreError, SwapStore};
use swapfeed_ingestor::stream::{FixedDelay, GrpcTransport, StreamClient};
use swapfeed_ingestor::{Ingestor, IngestorError, SwapTransformer};

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    init_logging();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Exiting after fatal error");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), IngestorError> {
    match cli.command {
        Command::Run(args) => ingest(args).await,
        Command::List { store, ascending } => list(store, ascending).await,
        Command::Clear { store } => clear(store).await,
        Command::Watch { store } => watch(store).await,
    }
}

/// Cancel `token` on Ctrl-C
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl-C, shutting down");
            token.cancel();
        }
    });
}

async fn ingest(args: RunArgs) -> Result<(), IngestorError> {
    let backend = args.backend;
    let config = args.into_config();
    config.validate()?;

    let tokens = Arc::new(config.load_tokens()?);
    info!(tokens = tokens.len(), "Loaded token table");

    let store: Arc<dyn SwapStore> = match backend {
        StoreBackend::Memory => Arc::new(MemoryStore::new(config.capacity)?),
        StoreBackend::Redis => {
            let store =
                RedisStore::connect(&config.redis_url, config.collection.clone(), config.capacity)
                    .await?;
            Arc::new(store)
        }
    };

    let mut stream_config = config.stream.clone();
    stream_config.starting_block = Some(config.resolve_starting_block().await?);
    let transport = GrpcTransport::new(&stream_config.url, stream_config.token.as_deref())?;
    let policy = FixedDelay::new(stream_config.reconnect_delay);

    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    info!(
        url = %stream_config.url,
        starting_block = ?stream_config.starting_block,
        capacity = config.capacity,
        "Starting ingestion"
    );
    let mut messages = StreamClient::new(transport, policy, &stream_config).spawn(cancel.clone());

    let transformer = SwapTransformer::new(tokens, config.exchange.clone());
    let mut ingestor = Ingestor::new(store, transformer, stream_config.filter.clone())
        .with_heartbeat_threshold(config.heartbeat_threshold);

    let result = ingestor.run(&mut messages, &cancel).await;
    messages.close().await;
    info!(stats = ?ingestor.stats(), "Ingestion stopped");

    result.map_err(IngestorError::from)
}

async fn connect(args: &StoreArgs) -> Result<RedisStore, IngestorError> {
    Ok(RedisStore::connect(&args.redis_url, args.collection.clone(), args.capacity).await?)
}

async fn list(args: StoreArgs, ascending: bool) -> Result<(), IngestorError> {
    let store = connect(&args).await?;
    let order = if ascending {
        SortOrder::BlockTimeAscending
    } else {
        SortOrder::BlockTimeDescending
    };

    for swap in store.list(order).await? {
        println!("{}", swap.to_json().map_err(StoreError::from)?);
    }
    Ok(())
}

async fn clear(args: StoreArgs) -> Result<(), IngestorError> {
    let store = connect(&args).await?;
    let removed = store.clear().await?;
    println!("Removed {removed} swaps from {}", store.collection());
    Ok(())
}

async fn watch(args: StoreArgs) -> Result<(), IngestorError> {
    let store = connect(&args).await?;
    let feed = store.subscribe().await?;
    tokio::pin!(feed);

    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());
    info!(channel = %store.changes_channel(), "Watching for changes");

    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            event = feed.next() => event,
        };
        let Some(event) = event else {
            info!("Change feed closed");
            return Ok(());
        };
        println!("{}", event.to_json().map_err(StoreError::from)?);
    }
}
