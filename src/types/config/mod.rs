pub mod chain;
pub mod contract;
pub mod enrichment;
pub mod indexer;
pub mod precedence;
