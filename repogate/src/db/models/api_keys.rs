use crate::db::schema::{ColumnType, TableSchema};

pub const TABLE: &str = "api_keys";

/// Credentials resolved by [`KeyLookupAuthenticator`](crate::auth::api_key::KeyLookupAuthenticator).
/// The `role` column is what role checks compare against.
pub fn table() -> TableSchema {
    TableSchema::new(TABLE)
        .column("id", ColumnType::BigInt)
        .column("name", ColumnType::Text)
        .column("api_key", ColumnType::Text)
        .column("role", ColumnType::Text)
        .column("created_at", ColumnType::TimestampTz)
}
