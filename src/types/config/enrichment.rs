use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct EnrichmentConfig {
    /// Timeout applied to each tokenURI contract call.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Bounded attempt count for tokenURI resolution.
    #[serde(default = "default_attempts")]
    pub attempts: u32,
    /// POST target for ticket metadata generation.
    #[serde(default)]
    pub metadata_endpoint: Option<String>,
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_attempts() -> u32 {
    3
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            attempts: default_attempts(),
            metadata_endpoint: None,
        }
    }
}
