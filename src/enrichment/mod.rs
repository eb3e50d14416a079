//! Token metadata enrichment.
//!
//! Two best-effort flows: resolving a token's on-chain `tokenURI` (bounded
//! retry + timeout around a read-only contract call) and fetching the image
//! reference from the URI's JSON document. Neither failure is ever fatal to
//! a batch; the materializer retries opportunistically on later encounters.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use alloy::dyn_abi::{DynSolType, DynSolValue};
use alloy::primitives::{keccak256, Address, Bytes, U256};
use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

use crate::rpc::{RpcClient, RpcError};
use crate::types::config::enrichment::EnrichmentConfig;

#[derive(Debug, Error)]
pub enum EnrichmentError {
    #[error("tokenURI call failed: {0}")]
    Rpc(#[from] RpcError),

    #[error("tokenURI call timed out after {0:?}")]
    Timeout(Duration),

    #[error("failed to decode tokenURI return: {0}")]
    Decode(String),

    #[error("metadata request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("metadata generation endpoint not configured")]
    NoEndpoint,
}

/// Off-chain metadata returned by the ticket metadata-generation endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct TicketMetadata {
    pub id: String,
    pub image: String,
    pub file: String,
}

/// JSON document behind a token URI.
#[derive(Debug, Deserialize)]
struct TokenMetadata {
    image: Option<String>,
    image_alt: Option<String>,
}

#[async_trait]
pub trait Enricher: Send + Sync {
    /// Resolve a token's metadata URI via a read-only contract call at the
    /// given block height. None once the bounded attempts are exhausted.
    async fn resolve_uri(&self, contract: Address, token_id: U256, block: u64) -> Option<String>;

    /// Fetch the URI's JSON document and extract an image reference.
    async fn resolve_image(&self, uri: &str) -> Option<String>;

    /// Ask the metadata-generation endpoint to produce ticket metadata.
    async fn ticket_metadata(&self, token_id: U256) -> Result<TicketMetadata, EnrichmentError>;
}

pub struct MetadataEnricher {
    rpc: Arc<RpcClient>,
    http: reqwest::Client,
    config: EnrichmentConfig,
    /// Per-contract floor heights for tokenURI calls.
    floors: HashMap<Address, u64>,
}

impl MetadataEnricher {
    pub fn new(rpc: Arc<RpcClient>, config: EnrichmentConfig, floors: HashMap<Address, u64>) -> Self {
        Self {
            rpc,
            http: reqwest::Client::new(),
            config,
            floors,
        }
    }

    /// Single tokenURI attempt, no retry or timeout applied.
    async fn token_uri_call(
        &self,
        contract: Address,
        token_id: U256,
        block: u64,
    ) -> Result<String, EnrichmentError> {
        let mut calldata = keccak256(b"tokenURI(uint256)")[..4].to_vec();
        calldata.extend(DynSolValue::Uint(token_id, 256).abi_encode());

        let ret = self.rpc.call(contract, Bytes::from(calldata), block).await?;

        let output_type = DynSolType::parse("(string)")
            .map_err(|e| EnrichmentError::Decode(e.to_string()))?;
        let decoded = output_type
            .abi_decode_params(&ret)
            .map_err(|e| EnrichmentError::Decode(e.to_string()))?;

        match decoded {
            DynSolValue::Tuple(values) => values
                .first()
                .and_then(|v| v.as_str().map(str::to_string))
                .ok_or_else(|| EnrichmentError::Decode("return is not a string".to_string())),
            _ => Err(EnrichmentError::Decode("expected tuple".to_string())),
        }
    }

    async fn fetch_metadata(&self, uri: &str) -> Result<TokenMetadata, EnrichmentError> {
        let metadata = self
            .http
            .get(uri)
            .send()
            .await?
            .error_for_status()?
            .json::<TokenMetadata>()
            .await?;
        Ok(metadata)
    }
}

#[async_trait]
impl Enricher for MetadataEnricher {
    async fn resolve_uri(&self, contract: Address, token_id: U256, block: u64) -> Option<String> {
        let floor = self.floors.get(&contract).copied().unwrap_or(0);
        let height = block.max(floor);
        let timeout = Duration::from_secs(self.config.timeout_secs);

        for attempt in 1..=self.config.attempts {
            match tokio::time::timeout(timeout, self.token_uri_call(contract, token_id, height))
                .await
            {
                Ok(Ok(uri)) => return Some(uri),
                Ok(Err(e)) => tracing::warn!(
                    "tokenURI({}) on {} failed (attempt {}/{}): {}",
                    token_id,
                    contract,
                    attempt,
                    self.config.attempts,
                    e
                ),
                Err(_) => tracing::warn!(
                    "tokenURI({}) on {} timed out after {:?} (attempt {}/{})",
                    token_id,
                    contract,
                    timeout,
                    attempt,
                    self.config.attempts
                ),
            }
        }

        None
    }

    async fn resolve_image(&self, uri: &str) -> Option<String> {
        match self.fetch_metadata(uri).await {
            Ok(metadata) => image_from_metadata(metadata),
            Err(e) => {
                tracing::warn!("image fetch from {} failed: {}", uri, e);
                None
            }
        }
    }

    async fn ticket_metadata(&self, token_id: U256) -> Result<TicketMetadata, EnrichmentError> {
        let endpoint = self
            .config
            .metadata_endpoint
            .as_deref()
            .ok_or(EnrichmentError::NoEndpoint)?;

        let metadata = self
            .http
            .post(endpoint)
            .json(&serde_json::json!({ "token_id": token_id.to_string() }))
            .send()
            .await?
            .error_for_status()?
            .json::<TicketMetadata>()
            .await?;
        Ok(metadata)
    }
}

/// Prefer `image` over `image_alt`.
fn image_from_metadata(metadata: TokenMetadata) -> Option<String> {
    metadata.image.or(metadata.image_alt)
}

/// Re-derive a token URI from a template: `{id}` substituted when present,
/// the id appended otherwise.
pub fn format_token_uri(template: &str, token_id: &U256) -> String {
    if template.contains("{id}") {
        template.replace("{id}", &token_id.to_string())
    } else {
        format!("{}{}", template, token_id)
    }
}
