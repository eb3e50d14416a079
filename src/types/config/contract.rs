use alloy_primitives::{Address, U256};
use serde::Deserialize;

/// What a configured contract is to the indexer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContractKind {
    Collection,
    Marketplace,
    TicketIssuer,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContractConfig {
    pub address: Address,
    pub name: String,
    /// Collection symbol used in token ids. Empty for non-collections.
    #[serde(default)]
    pub symbol: String,
    pub kind: ContractKind,
    #[serde(default)]
    pub total_supply: U256,
    /// Per-contract starting block; falls back to the chain start block.
    #[serde(default)]
    pub start_block: Option<u64>,
    /// Earliest block at which tokenURI calls return usable state.
    #[serde(default)]
    pub metadata_from_block: u64,
}
