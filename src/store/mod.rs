//! Entity store abstraction and implementations.
//!
//! The materializer only sees this trait; production runs use the Postgres
//! store, tests an in-memory one.

pub mod entities;
#[cfg(test)]
pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use thiserror::Error;

use crate::db::DbError;

pub use entities::{address_id, Activity, ActivityType, Contract, Owner, Token, Transfer};
pub use postgres::PgStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] DbError),

    #[error("corrupt row in {table}: {message}")]
    CorruptRow {
        table: &'static str,
        message: String,
    },
}

/// Persistence primitives: id-set bulk loads and upserting bulk saves.
#[async_trait]
pub trait EntityStore: Send + Sync {
    async fn owners_by_ids(&self, ids: &[String]) -> Result<Vec<Owner>, StoreError>;
    async fn tokens_by_ids(&self, ids: &[String]) -> Result<Vec<Token>, StoreError>;
    async fn contract(&self, id: &str) -> Result<Option<Contract>, StoreError>;
    async fn has_activity(&self, id: &str) -> Result<bool, StoreError>;

    /// Every token currently in the store (URI rewrite sweeps).
    async fn all_tokens(&self) -> Result<Vec<Token>, StoreError>;
    /// Tokens whose uri or image_uri is still unresolved (repair sweeps).
    async fn tokens_missing_metadata(&self) -> Result<Vec<Token>, StoreError>;

    async fn save_owners(&self, owners: &[Owner]) -> Result<(), StoreError>;
    async fn save_tokens(&self, tokens: &[Token]) -> Result<(), StoreError>;
    async fn save_contracts(&self, contracts: &[Contract]) -> Result<(), StoreError>;
    async fn save_transfers(&self, transfers: &[Transfer]) -> Result<(), StoreError>;
    async fn save_activities(&self, activities: &[Activity]) -> Result<(), StoreError>;
}
