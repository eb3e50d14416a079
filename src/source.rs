//! Chain log collection.
//!
//! Pulls logs for the configured (address, topic) pairs range by range,
//! resolves block timestamps, and hands ordered delivery batches to the
//! driver. Ranges are collected once, in ascending order; the feed is
//! assumed final and non-reverting.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Address, B256};
use alloy::rpc::types::{Filter, Log};
use tokio::sync::mpsc::Sender;

use crate::rpc::{RpcClient, RpcError};
use crate::types::config::chain::ChainConfig;
use crate::types::events::{DeliveryBatch, RawLog};

pub struct ChainLogSource {
    rpc: Arc<RpcClient>,
    addresses: Vec<Address>,
    topics: Vec<B256>,
    /// Per-contract starting heights; logs below them are dropped.
    contract_starts: HashMap<Address, u64>,
    start_block: u64,
    batch_span: u64,
    poll_interval: Option<Duration>,
}

impl ChainLogSource {
    pub fn new(
        rpc: Arc<RpcClient>,
        contract_starts: HashMap<Address, u64>,
        topics: Vec<B256>,
        chain: &ChainConfig,
    ) -> Self {
        Self {
            rpc,
            addresses: contract_starts.keys().copied().collect(),
            topics,
            contract_starts,
            start_block: chain.start_block,
            batch_span: chain.batch_span.max(1),
            poll_interval: chain.poll_interval_secs.map(Duration::from_secs),
        }
    }

    /// Collect ranges until the chain head is reached, then either stop or
    /// keep polling, per config. Returns when the driver hangs up.
    pub async fn run(self, batches: Sender<DeliveryBatch>) -> Result<(), RpcError> {
        let mut next = self.start_block;

        loop {
            let head = self.rpc.get_block_number().await?;

            while next <= head {
                let range_end = (next + self.batch_span - 1).min(head);
                let batch = self.collect_range(next, range_end).await?;

                tracing::debug!(
                    "collected blocks {}-{}: {} log(s)",
                    next,
                    range_end,
                    batch.logs.len()
                );

                if batches.send(batch).await.is_err() {
                    tracing::info!("batch receiver dropped, stopping log collection");
                    return Ok(());
                }
                next = range_end + 1;
            }

            match self.poll_interval {
                Some(interval) => tokio::time::sleep(interval).await,
                None => break,
            }
        }

        tracing::info!(
            "reached chain head at block {}, log collection done",
            next.saturating_sub(1)
        );
        Ok(())
    }

    async fn collect_range(&self, from: u64, to: u64) -> Result<DeliveryBatch, RpcError> {
        let filter = Filter::new()
            .address(self.addresses.clone())
            .event_signature(self.topics.clone())
            .from_block(from)
            .to_block(to);

        let logs = self.rpc.get_logs(&filter).await?;

        let mut block_numbers: Vec<u64> = logs.iter().filter_map(|l| l.block_number).collect();
        block_numbers.sort_unstable();
        block_numbers.dedup();
        let timestamps = self.rpc.get_block_timestamps(&block_numbers).await?;

        let mut raw: Vec<RawLog> = logs
            .into_iter()
            .filter_map(|log| self.to_raw_log(log, &timestamps))
            .collect();
        // eth_getLogs is ordered already; the zero-padded ids make this a
        // (block, index) sort either way.
        raw.sort_by(|a, b| a.id.cmp(&b.id));

        Ok(DeliveryBatch {
            range_start: from,
            range_end: to,
            logs: raw,
        })
    }

    fn to_raw_log(&self, log: Log, timestamps: &HashMap<u64, u64>) -> Option<RawLog> {
        let block = log.block_number?;
        let index = log.log_index?;
        let transaction_hash = log.transaction_hash?;
        let address = log.inner.address;

        // Honor per-contract starting heights.
        if block < self.contract_starts.get(&address).copied().unwrap_or(0) {
            return None;
        }

        let timestamp = match timestamps.get(&block) {
            Some(ts) => *ts,
            None => {
                tracing::warn!("no timestamp for block {}, dropping log", block);
                return None;
            }
        };

        Some(RawLog {
            id: format!("{:010}-{:05}", block, index),
            address,
            topics: log.inner.data.topics().to_vec(),
            data: log.inner.data.data.clone(),
            block,
            timestamp,
            transaction_hash,
        })
    }
}
