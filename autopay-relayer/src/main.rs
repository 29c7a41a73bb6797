//! AutoPay Relayer
//!
//! Off-chain service for the AutoPay recurring-payments protocol: indexes
//! PolicyManager events, executes due charges and delivers signed webhooks.

mod api;
mod config;
mod service;
mod shutdown;
mod state;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use time::OffsetDateTime;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use autopay_core::chain::{ChainClient, EvmChainClient};
use autopay_core::executor::{Executor, ExecutorChain};
use autopay_core::indexer::Indexer;
use autopay_core::store::{PgStore, Store};

use config::ChainConfig;

/// AutoPay Relayer - indexer, charge executor and webhook dispatcher
#[derive(Parser, Debug)]
#[command(name = "autopay-relayer")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = "./relayer-config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run all loops and the status API until SIGINT/SIGTERM
    Start,
    /// Index one block range for a chain
    Index {
        /// Chain id from the config file
        #[arg(long)]
        chain: i64,
        /// Start block, overriding the stored cursor
        #[arg(long)]
        from_block: Option<u64>,
    },
    /// Re-index from a block until caught up with the chain head
    Backfill {
        #[arg(long)]
        chain: i64,
        #[arg(long)]
        from_block: u64,
    },
    /// Charge one policy immediately, bypassing the schedule
    Charge {
        /// Policy id (0x-prefixed 32-byte hex)
        policy_id: String,
        #[arg(long)]
        chain: i64,
    },
    /// Print per-chain indexing progress and charge/webhook counters
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let args = Args::parse();
    let file_config = config::load(&args.config).map_err(|e| {
        tracing::error!("Failed to load configuration: {}", e);
        e
    })?;
    tracing::info!("Configuration loaded from {:?}", args.config);

    match args.command {
        Command::Start => {
            tracing::info!("Starting autopay-relayer v{}", env!("CARGO_PKG_VERSION"));
            let pool = connect_pool().await?;
            service::run(file_config, pool).await
        }
        Command::Index { chain, from_block } => {
            let chain_config = find_chain(&file_config.chains, chain)?;
            let pool = connect_pool().await?;
            let store: Arc<dyn Store> = Arc::new(PgStore::new(pool));
            let indexer = Indexer::new(
                store,
                connect_chain(chain_config)?,
                chain_config.to_settings(),
            );
            let outcome = indexer
                .run_once(from_block, OffsetDateTime::now_utc())
                .await?;
            println!(
                "indexed {} blocks, applied {} events",
                outcome.blocks_processed, outcome.events_applied
            );
            Ok(())
        }
        Command::Backfill { chain, from_block } => {
            let chain_config = find_chain(&file_config.chains, chain)?;
            let pool = connect_pool().await?;
            let store: Arc<dyn Store> = Arc::new(PgStore::new(pool));
            let indexer = Indexer::new(
                store,
                connect_chain(chain_config)?,
                chain_config.to_settings(),
            );
            let events = indexer.backfill(from_block).await?;
            println!("backfill complete, applied {events} events");
            Ok(())
        }
        Command::Charge { policy_id, chain } => {
            let chain_config = find_chain(&file_config.chains, chain)?;
            let pool = connect_pool().await?;
            let store: Arc<dyn Store> = Arc::new(PgStore::new(pool));
            let executor = Executor::new(
                store,
                vec![ExecutorChain {
                    settings: chain_config.to_settings(),
                    client: connect_chain(chain_config)?,
                }],
                file_config.executor.to_settings(),
            );
            let result = executor
                .charge_policy_by_id(chain, &policy_id, OffsetDateTime::now_utc())
                .await?;
            println!("charge result: {result:?}");
            Ok(())
        }
        Command::Status => {
            let pool = connect_pool().await?;
            let store = PgStore::new(pool);
            for chain in &file_config.chains {
                let status = store.chain_status(chain.chain_id).await?;
                let cursor = status
                    .last_indexed_block
                    .map_or_else(|| "-".to_string(), |b| b.to_string());
                println!(
                    "{} (chain {}): last indexed block {}, {} active policies, {} pending charges",
                    chain.name,
                    chain.chain_id,
                    cursor,
                    status.active_policies,
                    status.pending_charges
                );
            }
            let webhooks = store.webhook_counts().await?;
            println!(
                "webhooks: {} pending, {} failed",
                webhooks.pending, webhooks.failed
            );
            Ok(())
        }
    }
}

fn find_chain(chains: &[ChainConfig], chain_id: i64) -> anyhow::Result<&ChainConfig> {
    chains
        .iter()
        .find(|c| c.chain_id == chain_id)
        .with_context(|| format!("chain {chain_id} is not in the config file"))
}

fn connect_chain(chain: &ChainConfig) -> anyhow::Result<Arc<dyn ChainClient>> {
    let signer = config::get_signer()?;
    Ok(Arc::new(EvmChainClient::connect(
        chain.rpc_url.clone(),
        chain.policy_manager,
        signer,
    )))
}

async fn connect_pool() -> anyhow::Result<PgPool> {
    let database_url = config::get_database_url().map_err(|e| {
        tracing::error!("DATABASE_URL environment variable not set");
        e
    })?;

    tracing::info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&database_url)
        .await
        .map_err(|e| {
            tracing::error!("Failed to connect to database: {}", e);
            e
        })?;
    tracing::info!("Database connection established");

    sqlx::migrate!("../migrations").run(&pool).await?;
    Ok(pool)
}

/// Initialize the tracing subscriber with environment-based filtering.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn,hyper=warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
