//! Table schemas for the relational models served by the API.
//!
//! Each module exposes `table()`, the [`TableSchema`](crate::db::schema::TableSchema) a
//! [`Repository`](crate::db::handlers::Repository) is built from. Column lists mirror the
//! migrations in `migrations/`.

pub mod api_keys;
pub mod balances;
pub mod nfts;
