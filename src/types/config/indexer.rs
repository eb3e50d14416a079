use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

use crate::types::config::chain::ChainConfig;
use crate::types::config::contract::ContractConfig;
use crate::types::config::enrichment::EnrichmentConfig;
use crate::types::config::precedence::PrecedenceRule;

#[derive(Debug, Deserialize)]
pub struct IndexerConfig {
    pub chain: ChainConfig,
    #[serde(default = "default_database_url_env_var")]
    pub database_url_env_var: String,
    pub contracts: Vec<ContractConfig>,
    /// Cross-contract flush precedence table. Empty = built-in default.
    #[serde(default)]
    pub precedence: Vec<PrecedenceRule>,
    #[serde(default)]
    pub enrichment: EnrichmentConfig,
    /// Sweep tokens with missing uri/image at startup and retry enrichment.
    #[serde(default)]
    pub repair_missing_metadata: bool,
}

fn default_database_url_env_var() -> String {
    "DATABASE_URL".to_string()
}

impl IndexerConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file at {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("failed to parse config file at {}", path.display()))
    }
}
