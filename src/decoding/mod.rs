//! Raw log -> typed event decoding.
//!
//! Decoding is a pure function of the event signature selected by topic0.
//! Unknown topics are rejected with a [`DecodeError`] and never reach the
//! ordering buffer.

use std::sync::LazyLock;

use alloy::dyn_abi::{DynSolType, DynSolValue};
use alloy::primitives::{keccak256, Address, B256, U256};
use thiserror::Error;

use crate::types::config::contract::ContractKind;
use crate::types::events::{
    BuyEvent, DecodedEvent, DevMintEvent, MintEvent, RawLog, SellEvent, SetUriEvent,
    TicketMintEvent, TransferEvent,
};

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("log {log_id}: no topics")]
    MissingTopic0 { log_id: String },

    #[error("log {log_id}: unknown event topic {topic}")]
    UnknownTopic { log_id: String, topic: B256 },

    #[error("log {log_id}: {event} expects {expected} topics, got {got}")]
    TopicCount {
        log_id: String,
        event: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("log {log_id}: failed to decode {event} payload: {message}")]
    Payload {
        log_id: String,
        event: &'static str,
        message: String,
    },

    #[error("log {log_id}: {event} field '{field}' has unexpected type")]
    FieldType {
        log_id: String,
        event: &'static str,
        field: &'static str,
    },

    #[error("log {log_id}: {event} field '{field}' exceeds u64")]
    ValueOutOfRange {
        log_id: String,
        event: &'static str,
        field: &'static str,
    },
}

pub const TRANSFER_SIG: &str = "Transfer(address,address,uint256)";
pub const SELL_SIG: &str = "SellEvent(address,uint256,uint256,address)";
pub const BUY_SIG: &str = "BuyEvent(address,address,uint256,uint256,uint256,address)";
pub const TICKET_MINT_SIG: &str = "MintEvent(uint256,address,uint256,uint256)";
pub const DEV_MINT_SIG: &str = "DevMintEvent(uint256,address,uint256)";
pub const MINTED_SIG: &str = "Minted(address,address,uint256,string)";
pub const SET_URI_SIG: &str = "SetNewURI(string)";

static TRANSFER_TOPIC: LazyLock<B256> = LazyLock::new(|| keccak256(TRANSFER_SIG.as_bytes()));
static SELL_TOPIC: LazyLock<B256> = LazyLock::new(|| keccak256(SELL_SIG.as_bytes()));
static BUY_TOPIC: LazyLock<B256> = LazyLock::new(|| keccak256(BUY_SIG.as_bytes()));
static TICKET_MINT_TOPIC: LazyLock<B256> = LazyLock::new(|| keccak256(TICKET_MINT_SIG.as_bytes()));
static DEV_MINT_TOPIC: LazyLock<B256> = LazyLock::new(|| keccak256(DEV_MINT_SIG.as_bytes()));
static MINTED_TOPIC: LazyLock<B256> = LazyLock::new(|| keccak256(MINTED_SIG.as_bytes()));
static SET_URI_TOPIC: LazyLock<B256> = LazyLock::new(|| keccak256(SET_URI_SIG.as_bytes()));

/// Topic0 hashes emitted by a contract of the given kind.
pub fn topics_for(kind: ContractKind) -> Vec<B256> {
    match kind {
        ContractKind::Collection => vec![*TRANSFER_TOPIC, *MINTED_TOPIC, *SET_URI_TOPIC],
        ContractKind::Marketplace => vec![*SELL_TOPIC, *BUY_TOPIC],
        ContractKind::TicketIssuer => {
            vec![*TRANSFER_TOPIC, *TICKET_MINT_TOPIC, *DEV_MINT_TOPIC]
        }
    }
}

/// Decode a raw log into one of the closed event variants.
pub fn decode(log: &RawLog) -> Result<DecodedEvent, DecodeError> {
    let topic0 = log.topics.first().ok_or_else(|| DecodeError::MissingTopic0 {
        log_id: log.id.clone(),
    })?;

    match *topic0 {
        t if t == *TRANSFER_TOPIC => decode_transfer(log),
        t if t == *SELL_TOPIC => decode_sell(log),
        t if t == *BUY_TOPIC => decode_buy(log),
        t if t == *TICKET_MINT_TOPIC => decode_ticket_mint(log),
        t if t == *DEV_MINT_TOPIC => decode_dev_mint(log),
        t if t == *MINTED_TOPIC => decode_minted(log),
        t if t == *SET_URI_TOPIC => decode_set_uri(log),
        topic => Err(DecodeError::UnknownTopic {
            log_id: log.id.clone(),
            topic,
        }),
    }
}

/// ERC-721 transfer: all three parameters are indexed.
fn decode_transfer(log: &RawLog) -> Result<DecodedEvent, DecodeError> {
    if log.topics.len() != 4 {
        return Err(DecodeError::TopicCount {
            log_id: log.id.clone(),
            event: "Transfer",
            expected: 4,
            got: log.topics.len(),
        });
    }

    Ok(DecodedEvent::Transfer(TransferEvent {
        id: log.id.clone(),
        from: Address::from_word(log.topics[1]),
        to: Address::from_word(log.topics[2]),
        token_id: U256::from_be_bytes(log.topics[3].0),
        fish_id: None,
        contract: log.address,
        block: log.block,
        timestamp: log.timestamp,
        transaction_hash: log.transaction_hash,
    }))
}

fn decode_sell(log: &RawLog) -> Result<DecodedEvent, DecodeError> {
    let values = decode_data(log, "SellEvent", "(address,uint256,uint256,address)")?;

    Ok(DecodedEvent::Sell(SellEvent {
        id: log.id.clone(),
        seller: field_address(log, &values, 0, "SellEvent", "seller")?,
        token_id: field_uint(log, &values, 1, "SellEvent", "tokenId")?,
        price: field_uint(log, &values, 2, "SellEvent", "price")?,
        nft_contract: field_address(log, &values, 3, "SellEvent", "NFTAddress")?,
        contract: log.address,
        block: log.block,
        timestamp: log.timestamp,
        transaction_hash: log.transaction_hash,
    }))
}

fn decode_buy(log: &RawLog) -> Result<DecodedEvent, DecodeError> {
    let values = decode_data(
        log,
        "BuyEvent",
        "(address,address,uint256,uint256,uint256,address)",
    )?;

    Ok(DecodedEvent::Buy(BuyEvent {
        id: log.id.clone(),
        buyer: field_address(log, &values, 0, "BuyEvent", "buyer")?,
        seller: field_address(log, &values, 1, "BuyEvent", "seller")?,
        token_id: field_uint(log, &values, 2, "BuyEvent", "tokenId")?,
        price: field_uint(log, &values, 3, "BuyEvent", "price")?,
        buy_time: field_uint(log, &values, 4, "BuyEvent", "buyTime")?,
        nft_contract: field_address(log, &values, 5, "BuyEvent", "NFTAddress")?,
        contract: log.address,
        block: log.block,
        timestamp: log.timestamp,
        transaction_hash: log.transaction_hash,
    }))
}

fn decode_ticket_mint(log: &RawLog) -> Result<DecodedEvent, DecodeError> {
    let values = decode_data(log, "MintEvent", "(uint256,address,uint256,uint256)")?;
    let quantity = field_uint(log, &values, 2, "MintEvent", "quantity")?;

    Ok(DecodedEvent::BatchMint(TicketMintEvent {
        id: log.id.clone(),
        start_token_id: field_uint(log, &values, 0, "MintEvent", "startTokenID")?,
        to: field_address(log, &values, 1, "MintEvent", "to")?,
        quantity: narrow_u64(log, quantity, "MintEvent", "quantity")?,
        value: field_uint(log, &values, 3, "MintEvent", "value")?,
        contract: log.address,
    }))
}

fn decode_dev_mint(log: &RawLog) -> Result<DecodedEvent, DecodeError> {
    let values = decode_data(log, "DevMintEvent", "(uint256,address,uint256)")?;
    let quantity = field_uint(log, &values, 2, "DevMintEvent", "quantity")?;

    Ok(DecodedEvent::DevMint(DevMintEvent {
        id: log.id.clone(),
        start_token_id: field_uint(log, &values, 0, "DevMintEvent", "startTokenID")?,
        to: field_address(log, &values, 1, "DevMintEvent", "to")?,
        quantity: narrow_u64(log, quantity, "DevMintEvent", "quantity")?,
        contract: log.address,
    }))
}

fn decode_minted(log: &RawLog) -> Result<DecodedEvent, DecodeError> {
    let values = decode_data(log, "Minted", "(address,address,uint256,string)")?;

    Ok(DecodedEvent::Mint(MintEvent {
        id: log.id.clone(),
        from: field_address(log, &values, 0, "Minted", "from")?,
        to: field_address(log, &values, 1, "Minted", "to")?,
        token_id: field_uint(log, &values, 2, "Minted", "tokenId")?,
        fish_id: field_string(log, &values, 3, "Minted", "fishId")?,
        contract: log.address,
        block: log.block,
        timestamp: log.timestamp,
        transaction_hash: log.transaction_hash,
    }))
}

fn decode_set_uri(log: &RawLog) -> Result<DecodedEvent, DecodeError> {
    let values = decode_data(log, "SetNewURI", "(string)")?;

    Ok(DecodedEvent::SetUri(SetUriEvent {
        id: log.id.clone(),
        new_uri: field_string(log, &values, 0, "SetNewURI", "newURI")?,
        contract: log.address,
    }))
}

/// Decode a log's data section against a parameter schema.
fn decode_data(
    log: &RawLog,
    event: &'static str,
    schema: &str,
) -> Result<Vec<DynSolValue>, DecodeError> {
    let ty = DynSolType::parse(schema).map_err(|e| DecodeError::Payload {
        log_id: log.id.clone(),
        event,
        message: e.to_string(),
    })?;

    let decoded = ty
        .abi_decode_params(&log.data)
        .map_err(|e| DecodeError::Payload {
            log_id: log.id.clone(),
            event,
            message: e.to_string(),
        })?;

    match decoded {
        DynSolValue::Tuple(values) => Ok(values),
        _ => Err(DecodeError::Payload {
            log_id: log.id.clone(),
            event,
            message: "expected tuple".to_string(),
        }),
    }
}

fn field_address(
    log: &RawLog,
    values: &[DynSolValue],
    idx: usize,
    event: &'static str,
    field: &'static str,
) -> Result<Address, DecodeError> {
    values
        .get(idx)
        .and_then(DynSolValue::as_address)
        .ok_or_else(|| DecodeError::FieldType {
            log_id: log.id.clone(),
            event,
            field,
        })
}

fn field_uint(
    log: &RawLog,
    values: &[DynSolValue],
    idx: usize,
    event: &'static str,
    field: &'static str,
) -> Result<U256, DecodeError> {
    values
        .get(idx)
        .and_then(|v| v.as_uint().map(|(value, _)| value))
        .ok_or_else(|| DecodeError::FieldType {
            log_id: log.id.clone(),
            event,
            field,
        })
}

fn field_string(
    log: &RawLog,
    values: &[DynSolValue],
    idx: usize,
    event: &'static str,
    field: &'static str,
) -> Result<String, DecodeError> {
    values
        .get(idx)
        .and_then(|v| v.as_str().map(str::to_string))
        .ok_or_else(|| DecodeError::FieldType {
            log_id: log.id.clone(),
            event,
            field,
        })
}

fn narrow_u64(
    log: &RawLog,
    value: U256,
    event: &'static str,
    field: &'static str,
) -> Result<u64, DecodeError> {
    u64::try_from(value).map_err(|_| DecodeError::ValueOutOfRange {
        log_id: log.id.clone(),
        event,
        field,
    })
}
