use crate::db::schema::{ColumnType, TableSchema};

pub const TABLE: &str = "nfts";

/// NFTs held by an address; many rows per address
pub fn table() -> TableSchema {
    TableSchema::new(TABLE)
        .column("id", ColumnType::BigInt)
        .column("address", ColumnType::Text)
        .column("nft_id", ColumnType::Text)
        .column("base_url", ColumnType::Text)
        .column("created_at", ColumnType::TimestampTz)
}
