use crate::db::schema::{ColumnType, TableSchema};

pub const TABLE: &str = "balances";

/// Wallet balances, one row per address
pub fn table() -> TableSchema {
    TableSchema::new(TABLE)
        .column("id", ColumnType::BigInt)
        .column("address", ColumnType::Text)
        .column("amount", ColumnType::BigInt)
        .column("created_at", ColumnType::TimestampTz)
}
