//! PostgreSQL-backed entity store.
//!
//! uint256 columns are NUMERIC: written as text with a `::numeric` cast,
//! read back with a `::text` cast and parsed.

use std::str::FromStr;
use std::sync::Arc;

use alloy::primitives::U256;
use async_trait::async_trait;
use tokio_postgres::Row;

use crate::db::{DbOperation, DbPool, DbValue};

use super::entities::{Activity, Contract, Owner, Token, Transfer};
use super::{EntityStore, StoreError};

const TOKEN_COLUMNS: &str =
    "id, token_id::text, owner, is_listed, uri, image_uri, ticket_id, fish_id, contract";

pub struct PgStore {
    pool: Arc<DbPool>,
}

impl PgStore {
    pub fn new(pool: Arc<DbPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EntityStore for PgStore {
    async fn owners_by_ids(&self, ids: &[String]) -> Result<Vec<Owner>, StoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = self
            .pool
            .query("SELECT id, balance FROM owners WHERE id = ANY($1)", &[&ids])
            .await?;
        Ok(rows
            .iter()
            .map(|row| Owner {
                id: row.get(0),
                balance: row.get(1),
            })
            .collect())
    }

    async fn tokens_by_ids(&self, ids: &[String]) -> Result<Vec<Token>, StoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = self
            .pool
            .query(
                &format!("SELECT {} FROM tokens WHERE id = ANY($1)", TOKEN_COLUMNS),
                &[&ids],
            )
            .await?;
        rows.iter().map(token_from_row).collect()
    }

    async fn contract(&self, id: &str) -> Result<Option<Contract>, StoreError> {
        let rows = self
            .pool
            .query(
                "SELECT id, name, symbol, total_supply::text, minted_tokens \
                 FROM contracts WHERE id = $1",
                &[&id],
            )
            .await?;
        rows.first().map(contract_from_row).transpose()
    }

    async fn has_activity(&self, id: &str) -> Result<bool, StoreError> {
        let rows = self
            .pool
            .query("SELECT 1 FROM activities WHERE id = $1", &[&id])
            .await?;
        Ok(!rows.is_empty())
    }

    async fn all_tokens(&self) -> Result<Vec<Token>, StoreError> {
        let rows = self
            .pool
            .query(&format!("SELECT {} FROM tokens ORDER BY id", TOKEN_COLUMNS), &[])
            .await?;
        rows.iter().map(token_from_row).collect()
    }

    async fn tokens_missing_metadata(&self) -> Result<Vec<Token>, StoreError> {
        let rows = self
            .pool
            .query(
                &format!(
                    "SELECT {} FROM tokens WHERE uri IS NULL OR image_uri IS NULL ORDER BY id",
                    TOKEN_COLUMNS
                ),
                &[],
            )
            .await?;
        rows.iter().map(token_from_row).collect()
    }

    async fn save_owners(&self, owners: &[Owner]) -> Result<(), StoreError> {
        let ops = owners
            .iter()
            .map(|owner| DbOperation::Upsert {
                table: "owners",
                columns: vec!["id", "balance"],
                values: vec![
                    DbValue::Text(owner.id.clone()),
                    DbValue::Int64(owner.balance),
                ],
                conflict_columns: vec!["id"],
                update_columns: vec!["balance"],
            })
            .collect();
        Ok(self.pool.execute_transaction(ops).await?)
    }

    async fn save_tokens(&self, tokens: &[Token]) -> Result<(), StoreError> {
        // token_id and contract never change after creation; everything else
        // is update-in-place.
        let ops = tokens
            .iter()
            .map(|token| DbOperation::Upsert {
                table: "tokens",
                columns: vec![
                    "id",
                    "token_id",
                    "owner",
                    "is_listed",
                    "uri",
                    "image_uri",
                    "ticket_id",
                    "fish_id",
                    "contract",
                ],
                values: vec![
                    DbValue::Text(token.id.clone()),
                    DbValue::Numeric(token.token_id.to_string()),
                    DbValue::opt_text(token.owner.clone()),
                    DbValue::Bool(token.is_listed),
                    DbValue::opt_text(token.uri.clone()),
                    DbValue::opt_text(token.image_uri.clone()),
                    DbValue::opt_text(token.ticket_id.clone()),
                    DbValue::opt_text(token.fish_id.clone()),
                    DbValue::opt_text(token.contract.clone()),
                ],
                conflict_columns: vec!["id"],
                update_columns: vec![
                    "owner",
                    "is_listed",
                    "uri",
                    "image_uri",
                    "ticket_id",
                    "fish_id",
                ],
            })
            .collect();
        Ok(self.pool.execute_transaction(ops).await?)
    }

    async fn save_contracts(&self, contracts: &[Contract]) -> Result<(), StoreError> {
        let ops = contracts
            .iter()
            .map(|contract| DbOperation::Upsert {
                table: "contracts",
                columns: vec!["id", "name", "symbol", "total_supply", "minted_tokens"],
                values: vec![
                    DbValue::Text(contract.id.clone()),
                    DbValue::Text(contract.name.clone()),
                    DbValue::Text(contract.symbol.clone()),
                    DbValue::Numeric(contract.total_supply.to_string()),
                    DbValue::Json(serde_json::json!(contract.minted_tokens)),
                ],
                conflict_columns: vec!["id"],
                update_columns: Vec::new(),
            })
            .collect();
        Ok(self.pool.execute_transaction(ops).await?)
    }

    async fn save_transfers(&self, transfers: &[Transfer]) -> Result<(), StoreError> {
        // Keyed on log id; replaying the same log is a no-op.
        let ops = transfers
            .iter()
            .map(|transfer| DbOperation::Upsert {
                table: "transfers",
                columns: vec![
                    "id",
                    "token",
                    "from",
                    "to",
                    "block",
                    "timestamp",
                    "transaction_hash",
                ],
                values: vec![
                    DbValue::Text(transfer.id.clone()),
                    DbValue::Text(transfer.token.clone()),
                    DbValue::Text(transfer.from.clone()),
                    DbValue::Text(transfer.to.clone()),
                    DbValue::Int64(transfer.block as i64),
                    DbValue::Int64(transfer.timestamp as i64),
                    DbValue::Text(transfer.transaction_hash.clone()),
                ],
                conflict_columns: vec!["id"],
                update_columns: Vec::new(),
            })
            .collect();
        Ok(self.pool.execute_transaction(ops).await?)
    }

    async fn save_activities(&self, activities: &[Activity]) -> Result<(), StoreError> {
        // The natural key dedupes replays at the store level too.
        let ops = activities
            .iter()
            .map(|activity| DbOperation::Upsert {
                table: "activities",
                columns: vec![
                    "id",
                    "activity_type",
                    "token",
                    "from",
                    "to",
                    "price",
                    "block",
                    "timestamp",
                    "transaction_hash",
                ],
                values: vec![
                    DbValue::Text(activity.id.clone()),
                    DbValue::Text(activity.activity_type.as_str().to_string()),
                    DbValue::opt_text(activity.token.clone()),
                    DbValue::opt_text(activity.from.clone()),
                    DbValue::opt_text(activity.to.clone()),
                    DbValue::opt_numeric(activity.price.map(|p| p.to_string())),
                    DbValue::Int64(activity.block as i64),
                    DbValue::Int64(activity.timestamp as i64),
                    DbValue::Text(activity.transaction_hash.clone()),
                ],
                conflict_columns: vec!["id"],
                update_columns: Vec::new(),
            })
            .collect();
        Ok(self.pool.execute_transaction(ops).await?)
    }
}

fn token_from_row(row: &Row) -> Result<Token, StoreError> {
    let token_id: String = row.get(1);
    let token_id = U256::from_str(&token_id).map_err(|e| StoreError::CorruptRow {
        table: "tokens",
        message: format!("token_id '{}': {}", token_id, e),
    })?;

    Ok(Token {
        id: row.get(0),
        token_id,
        owner: row.get(2),
        is_listed: row.get(3),
        uri: row.get(4),
        image_uri: row.get(5),
        ticket_id: row.get(6),
        fish_id: row.get(7),
        contract: row.get(8),
    })
}

fn contract_from_row(row: &Row) -> Result<Contract, StoreError> {
    let total_supply: String = row.get(3);
    let total_supply = U256::from_str(&total_supply).map_err(|e| StoreError::CorruptRow {
        table: "contracts",
        message: format!("total_supply '{}': {}", total_supply, e),
    })?;

    let minted: serde_json::Value = row.get(4);
    let minted_tokens =
        serde_json::from_value(minted).map_err(|e| StoreError::CorruptRow {
            table: "contracts",
            message: format!("minted_tokens: {}", e),
        })?;

    Ok(Contract {
        id: row.get(0),
        name: row.get(1),
        symbol: row.get(2),
        total_supply,
        minted_tokens,
    })
}
