//! Static contract registry and the in-memory cache of persisted Contract
//! records.
//!
//! Built once at startup from config and passed by reference into the
//! materializer; the cache is append-only for the lifetime of the run.

use std::collections::HashMap;
use std::sync::Mutex;

use alloy::primitives::{Address, U256};

use crate::store::{address_id, Contract, EntityStore, StoreError};
use crate::types::config::contract::{ContractConfig, ContractKind};

/// Config-seeded facts about a contract.
#[derive(Debug, Clone)]
pub struct SeededContract {
    pub name: String,
    pub symbol: String,
    pub kind: ContractKind,
    pub total_supply: U256,
    pub metadata_from_block: u64,
}

pub struct ContractRegistry {
    seeded: HashMap<Address, SeededContract>,
    cache: Mutex<HashMap<Address, Contract>>,
}

impl ContractRegistry {
    pub fn from_config(contracts: &[ContractConfig]) -> Self {
        let mut seeded = HashMap::with_capacity(contracts.len());
        for c in contracts {
            tracing::debug!("registered {:?} contract {} at {}", c.kind, c.name, c.address);
            seeded.insert(
                c.address,
                SeededContract {
                    name: c.name.clone(),
                    symbol: c.symbol.clone(),
                    kind: c.kind,
                    total_supply: c.total_supply,
                    metadata_from_block: c.metadata_from_block,
                },
            );
        }

        Self {
            seeded,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn kind_of(&self, address: &Address) -> Option<ContractKind> {
        self.seeded.get(address).map(|c| c.kind)
    }

    /// Collection symbol, empty for unknown addresses.
    pub fn symbol_of(&self, address: &Address) -> &str {
        self.seeded
            .get(address)
            .map(|c| c.symbol.as_str())
            .unwrap_or("")
    }

    /// Composite token id: `{collectionSymbol}-{tokenId}`.
    pub fn token_key(&self, address: &Address, token_id: &U256) -> String {
        format!("{}-{}", self.symbol_of(address), token_id)
    }

    /// Earliest block at which tokenURI calls against `address` are usable.
    pub fn metadata_floor(&self, address: &Address) -> u64 {
        self.seeded
            .get(address)
            .map(|c| c.metadata_from_block)
            .unwrap_or(0)
    }

    /// Get or create the persisted Contract record for an address.
    ///
    /// Unknown addresses get a best-effort record with an empty symbol. The
    /// result is cached for the remainder of the process.
    pub async fn contract_entity<S: EntityStore>(
        &self,
        store: &S,
        address: &Address,
    ) -> Result<Contract, StoreError> {
        if let Some(hit) = self.cache.lock().unwrap().get(address) {
            return Ok(hit.clone());
        }

        let id = address_id(address);
        let record = match store.contract(&id).await? {
            Some(existing) => existing,
            None => {
                let record = match self.seeded.get(address) {
                    Some(info) => Contract {
                        id: id.clone(),
                        name: info.name.clone(),
                        symbol: info.symbol.clone(),
                        total_supply: info.total_supply,
                        minted_tokens: Vec::new(),
                    },
                    None => Contract {
                        id: id.clone(),
                        name: String::new(),
                        symbol: String::new(),
                        total_supply: U256::ZERO,
                        minted_tokens: Vec::new(),
                    },
                };
                store.save_contracts(std::slice::from_ref(&record)).await?;
                tracing::debug!("persisted contract record for {}", record.id);
                record
            }
        };

        self.cache.lock().unwrap().insert(*address, record.clone());
        Ok(record)
    }
}
