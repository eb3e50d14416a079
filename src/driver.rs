//! Top-level batch intake loop.
//!
//! Consumes delivery batches from the log source, decodes each log, lets the
//! ordering buffer decide what must materialize before the event is buffered,
//! and drains everything left at the end of each batch. Persistence failures
//! are fatal to the run; decode failures reject only the offending event.

use tokio::sync::mpsc::Receiver;

use crate::buffer::OrderingBuffer;
use crate::decoding;
use crate::enrichment::Enricher;
use crate::materializer::{MaterializeError, Materializer};
use crate::store::EntityStore;
use crate::types::events::DeliveryBatch;

pub struct BatchDriver<S, E> {
    buffer: OrderingBuffer,
    materializer: Materializer<S, E>,
}

impl<S: EntityStore, E: Enricher> BatchDriver<S, E> {
    pub fn new(buffer: OrderingBuffer, materializer: Materializer<S, E>) -> Self {
        Self {
            buffer,
            materializer,
        }
    }

    /// Run until the log source closes its channel.
    pub async fn run(mut self, mut batches: Receiver<DeliveryBatch>) -> Result<(), MaterializeError> {
        while let Some(batch) = batches.recv().await {
            tracing::info!(
                "processing blocks {}-{} ({} log(s))",
                batch.range_start,
                batch.range_end,
                batch.logs.len()
            );
            self.process_batch(batch).await?;
        }

        tracing::info!("log source closed, batch driver shutting down");
        Ok(())
    }

    /// Process one delivery batch to completion. The ordering buffer is fully
    /// drained before returning; no pending event crosses a batch boundary.
    pub async fn process_batch(&mut self, batch: DeliveryBatch) -> Result<(), MaterializeError> {
        for log in batch.logs {
            let event = match decoding::decode(&log) {
                Ok(event) => event,
                Err(e) => {
                    tracing::error!("rejecting undecodable log: {}", e);
                    continue;
                }
            };

            for flush in self.buffer.observe(event) {
                self.materializer.apply(flush).await?;
            }
        }

        for flush in self.buffer.drain() {
            self.materializer.apply(flush).await?;
        }
        debug_assert!(self.buffer.is_empty());

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    use alloy::dyn_abi::DynSolValue;
    use alloy::primitives::{keccak256, Address, Bytes, B256, U256};
    use async_trait::async_trait;

    use crate::buffer::FlushPolicy;
    use crate::decoding::{BUY_SIG, SELL_SIG, TRANSFER_SIG};
    use crate::enrichment::{EnrichmentError, TicketMetadata};
    use crate::registry::ContractRegistry;
    use crate::store::memory::MemStore;
    use crate::types::config::contract::{ContractConfig, ContractKind};
    use crate::types::events::RawLog;

    const COLLECTION: Address = Address::repeat_byte(0xcc);
    const MARKETPLACE: Address = Address::repeat_byte(0xdd);

    struct NullEnricher;

    #[async_trait]
    impl Enricher for NullEnricher {
        async fn resolve_uri(&self, _: Address, _: U256, _: u64) -> Option<String> {
            None
        }

        async fn resolve_image(&self, _: &str) -> Option<String> {
            None
        }

        async fn ticket_metadata(&self, _: U256) -> Result<TicketMetadata, EnrichmentError> {
            Err(EnrichmentError::NoEndpoint)
        }
    }

    fn registry() -> Arc<ContractRegistry> {
        Arc::new(ContractRegistry::from_config(&[ContractConfig {
            address: COLLECTION,
            name: "AstarCats".to_string(),
            symbol: "CAT".to_string(),
            kind: ContractKind::Collection,
            total_supply: U256::from(7777u64),
            start_block: None,
            metadata_from_block: 0,
        }]))
    }

    fn driver(store: Arc<MemStore>) -> BatchDriver<MemStore, NullEnricher> {
        BatchDriver::new(
            OrderingBuffer::new(FlushPolicy::standard()),
            Materializer::new(store, Arc::new(NullEnricher), registry()),
        )
    }

    fn transfer_log(index: u64, from: Address, to: Address, token: u64, tx: u8) -> RawLog {
        RawLog {
            id: format!("0000000100-{:05}", index),
            address: COLLECTION,
            topics: vec![
                keccak256(TRANSFER_SIG.as_bytes()),
                from.into_word(),
                to.into_word(),
                B256::from(U256::from(token).to_be_bytes::<32>()),
            ],
            data: Bytes::new(),
            block: 100,
            timestamp: 1_000,
            transaction_hash: B256::repeat_byte(tx),
        }
    }

    fn sell_log(index: u64, seller: Address, token: u64, tx: u8) -> RawLog {
        let data = DynSolValue::Tuple(vec![
            DynSolValue::Address(seller),
            DynSolValue::Uint(U256::from(token), 256),
            DynSolValue::Uint(U256::from(500u64), 256),
            DynSolValue::Address(COLLECTION),
        ])
        .abi_encode_params();

        RawLog {
            id: format!("0000000100-{:05}", index),
            address: MARKETPLACE,
            topics: vec![keccak256(SELL_SIG.as_bytes())],
            data: Bytes::from(data),
            block: 100,
            timestamp: 1_000,
            transaction_hash: B256::repeat_byte(tx),
        }
    }

    fn buy_log(index: u64, buyer: Address, seller: Address, token: u64, tx: u8) -> RawLog {
        let data = DynSolValue::Tuple(vec![
            DynSolValue::Address(buyer),
            DynSolValue::Address(seller),
            DynSolValue::Uint(U256::from(token), 256),
            DynSolValue::Uint(U256::from(600u64), 256),
            DynSolValue::Uint(U256::from(1_020u64), 256),
            DynSolValue::Address(COLLECTION),
        ])
        .abi_encode_params();

        RawLog {
            id: format!("0000000100-{:05}", index),
            address: MARKETPLACE,
            topics: vec![keccak256(BUY_SIG.as_bytes())],
            data: Bytes::from(data),
            block: 100,
            timestamp: 1_000,
            transaction_hash: B256::repeat_byte(tx),
        }
    }

    fn batch(logs: Vec<RawLog>) -> DeliveryBatch {
        DeliveryBatch {
            range_start: 100,
            range_end: 100,
            logs,
        }
    }

    #[tokio::test]
    async fn interleaved_events_commit_in_causal_order() {
        let store = Arc::new(MemStore::new());
        let mut driver = driver(store.clone());

        let seller = Address::repeat_byte(0x11);
        let buyer = Address::repeat_byte(0x22);
        let minter = Address::repeat_byte(0x33);

        // Token A (5) already exists and belongs to the seller.
        driver
            .process_batch(batch(vec![transfer_log(1, Address::ZERO, seller, 5, 0x01)]))
            .await
            .unwrap();

        // Sell(A), Transfer(B), Buy(A) interleaved in one batch.
        driver
            .process_batch(batch(vec![
                sell_log(2, seller, 5, 0x02),
                transfer_log(3, Address::ZERO, minter, 6, 0x03),
                buy_log(4, buyer, seller, 5, 0x04),
            ]))
            .await
            .unwrap();

        // LISTING(A) committed before MINT(B), before SOLD(A).
        let log = store.activity_log();
        let listing_pos = log.iter().position(|id| id.ends_with("-LISTING")).unwrap();
        let mint_b_pos = log
            .iter()
            .position(|id| id.contains("-6-") && id.ends_with("-MINT"))
            .unwrap();
        let sold_pos = log.iter().position(|id| id.ends_with("-SOLD")).unwrap();
        assert!(listing_pos < mint_b_pos, "sell must commit before transfer");
        assert!(mint_b_pos < sold_pos, "transfer must commit before buy");

        // End state: buyer owns A, nothing listed.
        let token = store.token("CAT-5").unwrap();
        assert!(!token.is_listed);
        assert_eq!(
            token.owner.as_deref(),
            Some(crate::store::address_id(&buyer).as_str())
        );
    }

    #[tokio::test]
    async fn replaying_a_batch_is_idempotent() {
        let store = Arc::new(MemStore::new());
        let mut driver = driver(store.clone());

        let logs = vec![
            transfer_log(1, Address::ZERO, Address::repeat_byte(0x11), 5, 0x01),
            sell_log(2, Address::repeat_byte(0x11), 5, 0x02),
        ];

        driver.process_batch(batch(logs.clone())).await.unwrap();
        let transfers_before = store.transfer_count();
        let activities_before = store.activity_count();

        // The upstream feed re-delivers the same range after a crash.
        driver.process_batch(batch(logs)).await.unwrap();
        assert_eq!(store.transfer_count(), transfers_before);
        assert_eq!(store.activity_count(), activities_before);
    }

    #[tokio::test]
    async fn undecodable_logs_are_rejected_without_aborting_the_batch() {
        let store = Arc::new(MemStore::new());
        let mut driver = driver(store.clone());

        let bogus = RawLog {
            id: "0000000100-00000".to_string(),
            address: COLLECTION,
            topics: vec![keccak256(b"Approval(address,address,uint256)")],
            data: Bytes::new(),
            block: 100,
            timestamp: 1_000,
            transaction_hash: B256::repeat_byte(0x0f),
        };

        driver
            .process_batch(batch(vec![
                bogus,
                transfer_log(1, Address::ZERO, Address::repeat_byte(0x11), 5, 0x01),
            ]))
            .await
            .unwrap();

        assert_eq!(store.token_count(), 1);
        assert_eq!(store.transfer_count(), 1);
    }

    #[tokio::test]
    async fn pending_state_never_crosses_batches() {
        let store = Arc::new(MemStore::new());
        let mut driver = driver(store.clone());

        let seller = Address::repeat_byte(0x11);
        driver
            .process_batch(batch(vec![transfer_log(1, Address::ZERO, seller, 5, 0x01)]))
            .await
            .unwrap();

        // A batch ending with an unflushed sell still commits the listing.
        driver
            .process_batch(batch(vec![sell_log(2, seller, 5, 0x02)]))
            .await
            .unwrap();

        assert!(store.token("CAT-5").unwrap().is_listed);
        let ids: HashSet<String> = store.activity_log().into_iter().collect();
        assert!(ids.iter().any(|id| id.ends_with("-LISTING")));
    }
}
