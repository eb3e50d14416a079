//! Persisted entity shapes.
//!
//! Owners and Tokens are update-in-place and never deleted; Transfers and
//! Activities are append-only and immutable, deduplicated by their ids.

use alloy::primitives::{Address, U256};

/// Lowercase `0x…` id for an address-keyed entity.
pub fn address_id(address: &Address) -> String {
    format!("{address:#x}")
}

#[derive(Debug, Clone, PartialEq)]
pub struct Owner {
    pub id: String,
    pub balance: i64,
}

impl Owner {
    pub fn new(id: String) -> Self {
        Self { id, balance: 0 }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    /// `{collectionSymbol}-{tokenId}`; stable for the token's lifetime.
    pub id: String,
    pub token_id: U256,
    /// Current owner (Owner id).
    pub owner: Option<String>,
    /// True only strictly between a Sell and the next Buy or transfer.
    pub is_listed: bool,
    pub uri: Option<String>,
    pub image_uri: Option<String>,
    /// Set for batch-minted ticket tokens after metadata generation.
    pub ticket_id: Option<String>,
    /// Externally supplied identifier for specialized collections.
    pub fish_id: Option<String>,
    /// Owning contract (Contract id).
    pub contract: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Contract {
    pub id: String,
    pub name: String,
    pub symbol: String,
    pub total_supply: U256,
    pub minted_tokens: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transfer {
    /// The event's unique log id.
    pub id: String,
    /// Token id reference.
    pub token: String,
    pub from: String,
    pub to: String,
    pub block: u64,
    pub timestamp: u64,
    pub transaction_hash: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityType {
    Mint,
    Transfer,
    Listing,
    Sold,
}

impl ActivityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityType::Mint => "MINT",
            ActivityType::Transfer => "TRANSFER",
            ActivityType::Listing => "LISTING",
            ActivityType::Sold => "SOLD",
        }
    }

}

#[derive(Debug, Clone, PartialEq)]
pub struct Activity {
    /// `{contractAddress}-{transactionHash}-{tokenId}-{TYPE}`: the natural
    /// key that makes replays a no-op.
    pub id: String,
    pub activity_type: ActivityType,
    pub token: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub price: Option<U256>,
    pub block: u64,
    pub timestamp: u64,
    pub transaction_hash: String,
}

impl Activity {
    pub fn natural_key(
        contract: &str,
        transaction_hash: &str,
        token_id: &U256,
        activity_type: ActivityType,
    ) -> String {
        format!(
            "{}-{}-{}-{}",
            contract,
            transaction_hash,
            token_id,
            activity_type.as_str()
        )
    }
}
