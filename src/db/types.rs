use serde_json::Value as JsonValue;

/// A value bound into a SQL statement.
#[derive(Debug, Clone)]
pub enum DbValue {
    Null,
    Bool(bool),
    /// Block heights, timestamps, balances (stored as BIGINT).
    Int64(i64),
    Text(String),
    /// Decimal string for uint256 (stored as NUMERIC via a text cast).
    Numeric(String),
    /// JSONB value (minted token id lists).
    Json(JsonValue),
}

impl DbValue {
    /// An optional TEXT column.
    pub fn opt_text(value: Option<String>) -> Self {
        match value {
            Some(v) => DbValue::Text(v),
            None => DbValue::Null,
        }
    }

    /// An optional NUMERIC column.
    pub fn opt_numeric(value: Option<String>) -> Self {
        match value {
            Some(v) => DbValue::Numeric(v),
            None => DbValue::Null,
        }
    }
}

/// Database operation executed transactionally by [`super::DbPool`].
#[derive(Debug, Clone)]
pub enum DbOperation {
    /// INSERT with ON CONFLICT DO UPDATE; DO NOTHING when `update_columns`
    /// is empty (immutable rows: transfers, activities).
    Upsert {
        table: &'static str,
        columns: Vec<&'static str>,
        values: Vec<DbValue>,
        conflict_columns: Vec<&'static str>,
        update_columns: Vec<&'static str>,
    },
}
