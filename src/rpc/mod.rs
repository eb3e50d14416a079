//! Read-only RPC access: log collection, block timestamps, contract calls.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use alloy::network::Ethereum;
use alloy::primitives::{Address, BlockNumber, Bytes, TxKind};
use alloy::providers::{Provider, RootProvider};
use alloy::rpc::types::{BlockId, BlockNumberOrTag, Filter, Log, TransactionInput, TransactionRequest};
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Provider error: {0}")]
    ProviderError(String),
}

impl RpcError {
    /// Check if this error is likely transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            RpcError::InvalidUrl(_) => false,
            RpcError::ProviderError(msg) => {
                let msg = msg.to_lowercase();
                msg.contains("connection")
                    || msg.contains("timeout")
                    || msg.contains("timed out")
                    || msg.contains("reset")
                    || msg.contains("broken pipe")
                    || msg.contains("network")
                    || msg.contains("rate limit")
                    || msg.contains("too many requests")
                    || msg.contains("429")
                    || msg.contains("502")
                    || msg.contains("503")
                    || msg.contains("504")
                    || msg.contains("service unavailable")
                    || msg.contains("bad gateway")
                    || msg.contains("try again")
            }
        }
    }
}

/// Bounded retry with exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 10,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let delay_ms = self.initial_delay.as_millis() as f64
            * self.backoff_multiplier.powi(attempt as i32 - 1);
        std::cmp::min(Duration::from_millis(delay_ms as u64), self.max_delay)
    }
}

async fn with_retry<F, Fut, T>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
) -> Result<T, RpcError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RpcError>>,
{
    let mut last_error = None;

    for attempt in 0..=config.max_retries {
        if attempt > 0 {
            let delay = config.delay_for_attempt(attempt);
            tracing::warn!(
                "RPC retry {}/{} for '{}' in {:?}",
                attempt,
                config.max_retries,
                operation_name,
                delay
            );
            tokio::time::sleep(delay).await;
        }

        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                if e.is_retryable() && attempt < config.max_retries {
                    tracing::warn!(
                        "RPC '{}' failed (attempt {}/{}): {}",
                        operation_name,
                        attempt + 1,
                        config.max_retries + 1,
                        e
                    );
                    last_error = Some(e);
                } else {
                    return Err(e);
                }
            }
        }
    }

    Err(last_error.unwrap_or_else(|| RpcError::ProviderError("Unknown error".to_string())))
}

pub struct RpcClient {
    provider: RootProvider<Ethereum>,
    retry: RetryConfig,
}

impl RpcClient {
    pub fn from_url(url: &str) -> Result<Self, RpcError> {
        let url = Url::parse(url).map_err(|e| RpcError::InvalidUrl(e.to_string()))?;
        Ok(Self {
            provider: RootProvider::<Ethereum>::new_http(url),
            retry: RetryConfig::default(),
        })
    }

    pub async fn get_block_number(&self) -> Result<BlockNumber, RpcError> {
        with_retry(&self.retry, "get_block_number", || async {
            self.provider
                .get_block_number()
                .await
                .map_err(|e| RpcError::ProviderError(e.to_string()))
        })
        .await
    }

    pub async fn get_logs(&self, filter: &Filter) -> Result<Vec<Log>, RpcError> {
        let op_name = format!(
            "eth_getLogs(blocks {:?}-{:?})",
            filter.get_from_block(),
            filter.get_to_block()
        );
        with_retry(&self.retry, &op_name, || async {
            self.provider
                .get_logs(filter)
                .await
                .map_err(|e| RpcError::ProviderError(e.to_string()))
        })
        .await
    }

    /// Resolve timestamps for a set of block numbers.
    pub async fn get_block_timestamps(
        &self,
        numbers: &[u64],
    ) -> Result<HashMap<u64, u64>, RpcError> {
        let mut timestamps = HashMap::with_capacity(numbers.len());

        for &number in numbers {
            let op_name = format!("eth_getBlockByNumber({})", number);
            let block = with_retry(&self.retry, &op_name, || async {
                self.provider
                    .get_block(BlockId::Number(BlockNumberOrTag::Number(number)))
                    .await
                    .map_err(|e| RpcError::ProviderError(e.to_string()))
            })
            .await?;

            match block {
                Some(block) => {
                    timestamps.insert(number, block.header.timestamp);
                }
                None => tracing::warn!("block {} not found while resolving timestamps", number),
            }
        }

        Ok(timestamps)
    }

    /// Read-only contract call at a specific block height.
    pub async fn call(
        &self,
        to: Address,
        calldata: Bytes,
        block: u64,
    ) -> Result<Bytes, RpcError> {
        let tx = TransactionRequest {
            to: Some(TxKind::Call(to)),
            input: TransactionInput::new(calldata),
            ..Default::default()
        };

        let op_name = format!("eth_call(to={:?}, block={})", to, block);
        with_retry(&self.retry, &op_name, || {
            let tx = tx.clone();
            async move {
                self.provider
                    .call(tx)
                    .block(BlockId::Number(BlockNumberOrTag::Number(block)))
                    .await
                    .map_err(|e| RpcError::ProviderError(e.to_string()))
            }
        })
        .await
    }
}

impl std::fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcClient").finish_non_exhaustive()
    }
}
