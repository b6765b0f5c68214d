//! Command line interface.
//!
//! Every option can also be set through the environment; a `.env` file in
//! the working directory is loaded first.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::config::{
    IngestorConfig, DEFAULT_BATCH_SIZE, DEFAULT_HEARTBEAT_THRESHOLD_SECS,
    DEFAULT_RECONNECT_DELAY_MS, DEFAULT_RPC_URL, DEFAULT_STREAM_URL,
};
use crate::store::{redis_store::DEFAULT_REDIS_URL, DEFAULT_CAPACITY, DEFAULT_COLLECTION};
use crate::transform::DEFAULT_EXCHANGE_NAME;

#[derive(Parser, Debug)]
#[command(
    name = "swapfeed-ingestor",
    version,
    about = "Streams Starknet DEX swaps into a bounded live collection"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Ingest swaps until interrupted or the stream ends
    Run(RunArgs),
    /// Print the stored swaps as JSON, newest first
    List {
        #[command(flatten)]
        store: StoreArgs,
        /// Oldest first
        #[arg(long)]
        ascending: bool,
    },
    /// Delete every stored swap
    Clear {
        #[command(flatten)]
        store: StoreArgs,
    },
    /// Print change events from the store as they happen
    Watch {
        #[command(flatten)]
        store: StoreArgs,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StoreBackend {
    /// In-process store, lost on exit
    Memory,
    Redis,
}

#[derive(Args, Debug, Clone)]
pub struct StoreArgs {
    #[arg(long, env = "REDIS_URL", default_value = DEFAULT_REDIS_URL)]
    pub redis_url: String,

    #[arg(long, env = "SWAPFEED_COLLECTION", default_value = DEFAULT_COLLECTION)]
    pub collection: String,

    #[arg(long, env = "SWAPFEED_CAPACITY", default_value_t = DEFAULT_CAPACITY)]
    pub capacity: usize,
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    #[arg(long, value_enum, default_value_t = StoreBackend::Redis)]
    pub backend: StoreBackend,

    /// Apibara DNA endpoint
    #[arg(long, env = "APIBARA_URL", default_value = DEFAULT_STREAM_URL)]
    pub stream_url: String,

    #[arg(long, env = "APIBARA_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Node used to find the chain head when no starting block is given
    #[arg(long, env = "STARKNET_RPC_URL", default_value = DEFAULT_RPC_URL)]
    pub rpc_url: String,

    #[arg(long, env = "SWAPFEED_STARTING_BLOCK")]
    pub starting_block: Option<u64>,

    #[arg(long, env = "SWAPFEED_BATCH_SIZE", default_value_t = DEFAULT_BATCH_SIZE)]
    pub batch_size: u64,

    /// JSON list of `{ticker, decimals, address}` replacing the built-in tokens
    #[arg(long, env = "SWAPFEED_TOKENS_FILE")]
    pub tokens_file: Option<PathBuf>,

    #[arg(long, default_value = DEFAULT_EXCHANGE_NAME)]
    pub exchange: String,

    #[arg(long, default_value_t = DEFAULT_RECONNECT_DELAY_MS)]
    pub reconnect_delay_ms: u64,

    #[arg(long, default_value_t = DEFAULT_HEARTBEAT_THRESHOLD_SECS)]
    pub heartbeat_threshold_secs: u64,
}

impl RunArgs {
    pub fn into_config(self) -> IngestorConfig {
        let mut config = IngestorConfig::default();
        config.stream.url = self.stream_url;
        config.stream.token = self.token;
        config.stream.starting_block = self.starting_block;
        config.stream.batch_size = self.batch_size;
        config.stream.reconnect_delay = Duration::from_millis(self.reconnect_delay_ms);
        config.rpc_url = self.rpc_url;
        config.redis_url = self.store.redis_url;
        config.collection = self.store.collection;
        config.capacity = self.store.capacity;
        config.tokens_file = self.tokens_file;
        config.exchange = self.exchange;
        config.heartbeat_threshold = Duration::from_secs(self.heartbeat_threshold_secs);
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_args_into_config() {
        let cli = Cli::try_parse_from([
            "swapfeed-ingestor",
            "run",
            "--token",
            "dna_key",
            "--starting-block",
            "650000",
            "--capacity",
            "5",
            "--backend",
            "memory",
        ])
        .unwrap();

        let Command::Run(args) = cli.command else {
            panic!("expected run command");
        };
        assert_eq!(args.backend, StoreBackend::Memory);

        let config = args.into_config();
        assert_eq!(config.stream.token.as_deref(), Some("dna_key"));
        assert_eq!(config.stream.starting_block, Some(650_000));
        assert_eq!(config.capacity, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_list_ascending_flag() {
        let args = ["swapfeed-ingestor", "list", "--ascending", "--collection", "test_swaps"];
        let cli = Cli::try_parse_from(args).unwrap();
        match cli.command {
            Command::List { store, ascending } => {
                assert!(ascending);
                assert_eq!(store.collection, "test_swaps");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_backend_rejected() {
        let result = Cli::try_parse_from(["swapfeed-ingestor", "run", "--backend", "mongo"]);
        assert!(result.is_err());
    }
}
