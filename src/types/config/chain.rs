use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    pub name: String,
    pub rpc_url_env_var: String,
    /// First block the indexer cares about, across all contracts.
    pub start_block: u64,
    /// Blocks per delivery batch.
    #[serde(default = "default_batch_span")]
    pub batch_span: u64,
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    /// Seconds to wait at chain head before polling again.
    /// When absent the run stops once the head is reached.
    #[serde(default)]
    pub poll_interval_secs: Option<u64>,
}

fn default_batch_span() -> u64 {
    500
}

fn default_channel_capacity() -> usize {
    100
}
