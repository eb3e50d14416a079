//! Raw log feed types and the closed set of decoded events.

use alloy::primitives::{Address, Bytes, B256, U256};
use serde::Deserialize;

/// A single raw EVM log as delivered by the chain log source.
#[derive(Debug, Clone)]
pub struct RawLog {
    /// Globally unique log id, `"{block:010}-{index:05}"`.
    pub id: String,
    /// Emitting contract address.
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
    pub block: u64,
    /// Block timestamp in seconds.
    pub timestamp: u64,
    pub transaction_hash: B256,
}

/// One unit of work handed to the batch driver: an ordered range of blocks
/// flattened into their logs.
#[derive(Debug, Clone)]
pub struct DeliveryBatch {
    pub range_start: u64,
    pub range_end: u64,
    pub logs: Vec<RawLog>,
}

/// Event kinds tracked by the ordering buffer and its flush policy.
///
/// The custom collection `Minted` event has no kind of its own: it enters the
/// transfer pending list, carrying its extra identifier along.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Transfer,
    Sell,
    Buy,
    TicketMint,
    DevMint,
    SetUri,
}

#[derive(Debug, Clone)]
pub struct TransferEvent {
    pub id: String,
    pub from: Address,
    pub to: Address,
    pub token_id: U256,
    /// Externally supplied identifier carried by custom `Minted` events.
    pub fish_id: Option<String>,
    pub contract: Address,
    pub block: u64,
    pub timestamp: u64,
    pub transaction_hash: B256,
}

#[derive(Debug, Clone)]
pub struct SellEvent {
    pub id: String,
    pub seller: Address,
    pub token_id: U256,
    pub price: U256,
    /// Collection the listed token belongs to (not the marketplace itself).
    pub nft_contract: Address,
    pub contract: Address,
    pub block: u64,
    pub timestamp: u64,
    pub transaction_hash: B256,
}

#[derive(Debug, Clone)]
pub struct BuyEvent {
    pub id: String,
    pub buyer: Address,
    pub seller: Address,
    pub token_id: U256,
    pub price: U256,
    pub buy_time: U256,
    pub nft_contract: Address,
    pub contract: Address,
    pub block: u64,
    pub timestamp: u64,
    pub transaction_hash: B256,
}

#[derive(Debug, Clone)]
pub struct TicketMintEvent {
    pub id: String,
    pub start_token_id: U256,
    pub to: Address,
    pub quantity: u64,
    pub value: U256,
    pub contract: Address,
}

#[derive(Debug, Clone)]
pub struct DevMintEvent {
    pub id: String,
    pub start_token_id: U256,
    pub to: Address,
    pub quantity: u64,
    pub contract: Address,
}

#[derive(Debug, Clone)]
pub struct SetUriEvent {
    pub id: String,
    pub new_uri: String,
    pub contract: Address,
}

/// Custom collection mint: a transfer that also carries an external id.
#[derive(Debug, Clone)]
pub struct MintEvent {
    pub id: String,
    pub from: Address,
    pub to: Address,
    pub token_id: U256,
    pub fish_id: String,
    pub contract: Address,
    pub block: u64,
    pub timestamp: u64,
    pub transaction_hash: B256,
}

impl MintEvent {
    /// Custom mints are materialized through the transfer flow.
    pub fn into_transfer(self) -> TransferEvent {
        TransferEvent {
            id: self.id,
            from: self.from,
            to: self.to,
            token_id: self.token_id,
            fish_id: Some(self.fish_id),
            contract: self.contract,
            block: self.block,
            timestamp: self.timestamp,
            transaction_hash: self.transaction_hash,
        }
    }
}

/// Closed variant set produced by the event decoder.
#[derive(Debug, Clone)]
pub enum DecodedEvent {
    Transfer(TransferEvent),
    Sell(SellEvent),
    Buy(BuyEvent),
    BatchMint(TicketMintEvent),
    DevMint(DevMintEvent),
    SetUri(SetUriEvent),
    Mint(MintEvent),
}

impl DecodedEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            DecodedEvent::Transfer(_) | DecodedEvent::Mint(_) => EventKind::Transfer,
            DecodedEvent::Sell(_) => EventKind::Sell,
            DecodedEvent::Buy(_) => EventKind::Buy,
            DecodedEvent::BatchMint(_) => EventKind::TicketMint,
            DecodedEvent::DevMint(_) => EventKind::DevMint,
            DecodedEvent::SetUri(_) => EventKind::SetUri,
        }
    }

    /// Emitting contract address.
    pub fn contract(&self) -> Address {
        match self {
            DecodedEvent::Transfer(e) => e.contract,
            DecodedEvent::Sell(e) => e.contract,
            DecodedEvent::Buy(e) => e.contract,
            DecodedEvent::BatchMint(e) => e.contract,
            DecodedEvent::DevMint(e) => e.contract,
            DecodedEvent::SetUri(e) => e.contract,
            DecodedEvent::Mint(e) => e.contract,
        }
    }
}
