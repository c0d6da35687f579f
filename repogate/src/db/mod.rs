//! Database layer for data persistence and access.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐
//! │  Handlers   │  (API request handlers, holding a Session)
//! └──────┬──────┘
//!        │
//!        ↓
//! ┌─────────────┐      ┌─────────────┐
//! │ Repository  │ ───→ │ CacheStore  │  (opt-in, per call)
//! └──────┬──────┘      └─────────────┘
//!        │
//!        ↓
//! ┌─────────────┐
//! │ TableSchema │  (db::models - one per table)
//! └──────┬──────┘
//!        │
//!        ↓
//! ┌─────────────┐
//! │  PostgreSQL │
//! └─────────────┘
//! ```
//!
//! # Modules
//!
//! - [`handlers`]: The generic [`Repository`](handlers::Repository)
//! - [`models`]: Table schemas matching the migrations
//! - [`query`]: SQL construction for filters and raw queries
//! - [`schema`]: Table and column descriptions
//! - [`session`]: Request-scoped transactions
//! - [`errors`]: Database-specific error types
//!
//! # Transactions
//!
//! Every unit of work owns one [`Session`]. Reads run inside its lazily-opened transaction; each
//! write commits it before returning. A session dropped mid-transaction rolls back.

pub mod errors;
pub mod handlers;
pub mod models;
pub mod query;
pub mod schema;
pub mod session;

pub use session::Session;
