mod buffer;
mod db;
mod decoding;
mod driver;
mod enrichment;
mod materializer;
mod registry;
mod rpc;
mod source;
mod store;
mod types;

use std::collections::HashMap;
use std::env;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing_subscriber::EnvFilter;

use buffer::{FlushPolicy, OrderingBuffer};
use db::DbPool;
use driver::BatchDriver;
use enrichment::MetadataEnricher;
use materializer::Materializer;
use registry::ContractRegistry;
use rpc::RpcClient;
use source::ChainLogSource;
use store::PgStore;
use types::config::indexer::IndexerConfig;
use types::events::DeliveryBatch;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = IndexerConfig::load(Path::new("config/config.json"))?;
    load_required_env_vars(&config)?;

    tracing::info!(
        "Loaded config for chain {} with {} contract(s)",
        config.chain.name,
        config.contracts.len()
    );

    let rpc_url = env::var(&config.chain.rpc_url_env_var).with_context(|| {
        format!(
            "env var {} not set for chain {}",
            config.chain.rpc_url_env_var, config.chain.name
        )
    })?;
    let database_url = env::var(&config.database_url_env_var)
        .with_context(|| format!("env var {} not set", config.database_url_env_var))?;

    let pool = DbPool::new(&database_url)
        .await
        .context("failed to create database pool")?;
    pool.run_migrations()
        .await
        .context("failed to run database migrations")?;
    tracing::info!("Database pool initialized and migrations complete");

    let store = Arc::new(PgStore::new(Arc::new(pool)));
    let rpc = Arc::new(RpcClient::from_url(&rpc_url)?);
    let registry = Arc::new(ContractRegistry::from_config(&config.contracts));

    let floors: HashMap<_, _> = config
        .contracts
        .iter()
        .map(|c| (c.address, c.metadata_from_block))
        .collect();
    let enricher = Arc::new(MetadataEnricher::new(
        rpc.clone(),
        config.enrichment.clone(),
        floors,
    ));

    let policy = if config.precedence.is_empty() {
        FlushPolicy::standard()
    } else {
        FlushPolicy::from_rules(&config.precedence)
    };

    let materializer = Materializer::new(store, enricher, registry);

    if config.repair_missing_metadata {
        materializer
            .repair_missing_metadata()
            .await
            .context("metadata repair sweep failed")?;
    }

    let contract_starts: HashMap<_, _> = config
        .contracts
        .iter()
        .map(|c| (c.address, c.start_block.unwrap_or(config.chain.start_block)))
        .collect();
    let mut topics: Vec<_> = config
        .contracts
        .iter()
        .flat_map(|c| decoding::topics_for(c.kind))
        .collect();
    topics.sort();
    topics.dedup();
    let log_source = ChainLogSource::new(rpc, contract_starts, topics, &config.chain);

    let batch_driver = BatchDriver::new(OrderingBuffer::new(policy), materializer);

    let (batch_tx, batch_rx) = mpsc::channel::<DeliveryBatch>(config.chain.channel_capacity);

    let mut tasks: JoinSet<anyhow::Result<()>> = JoinSet::new();

    tasks.spawn(async move {
        log_source
            .run(batch_tx)
            .await
            .context("log collection failed")
    });

    tasks.spawn(async move {
        batch_driver
            .run(batch_rx)
            .await
            .context("batch driver failed")
    });

    while let Some(result) = tasks.join_next().await {
        result.context("pipeline task panicked")??;
    }

    tracing::info!("Indexer run complete for chain {}", config.chain.name);
    Ok(())
}

/// Ensures the RPC and database env vars are set, loading .env if needed.
fn load_required_env_vars(config: &IndexerConfig) -> anyhow::Result<()> {
    let required = [
        config.chain.rpc_url_env_var.as_str(),
        config.database_url_env_var.as_str(),
    ];

    let missing: Vec<&str> = required
        .iter()
        .filter(|var| env::var(var).is_err())
        .copied()
        .collect();

    if missing.is_empty() {
        return Ok(());
    }

    dotenvy::dotenv().with_context(|| {
        format!(
            "Missing env vars {:?} and failed to load .env file",
            missing
        )
    })?;

    let still_missing: Vec<&str> = required
        .iter()
        .filter(|var| env::var(var).is_err())
        .copied()
        .collect();

    anyhow::ensure!(
        still_missing.is_empty(),
        "Missing required env vars after loading .env: {:?}",
        still_missing
    );

    Ok(())
}
