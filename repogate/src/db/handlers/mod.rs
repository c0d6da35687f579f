//! Repository access for database tables.
//!
//! A single generic [`Repository`] serves every table; what differs between tables is the
//! [`TableSchema`](crate::db::schema::TableSchema) it is built from (see [`crate::db::models`]).
//!
//! # Common Pattern
//!
//! ```ignore
//! use repogate::db::{Session, handlers::{FindOneOptions, Repository}, models::balances};
//! use repogate::types::Filter;
//!
//! async fn example(pool: sqlx::PgPool, cache: &repogate::cache::CacheStore) -> repogate::errors::Result<()> {
//!     let balances = Repository::new(balances::table(), cache);
//!     let mut session = Session::new(pool);
//!
//!     let found = balances
//!         .find_one(&mut session, Filter::new().with("address", "abc"), &FindOneOptions::projected(["amount"]))
//!         .await?;
//!
//!     // Writes commit the session's transaction before returning
//!     let mut data = repogate::types::Record::new();
//!     data.insert("amount".to_string(), 15.into());
//!     balances.update(&mut session, Filter::new().with("address", "abc"), &data).await?;
//!     Ok(())
//! }
//! ```

pub mod repository;

pub use repository::{FindOneOptions, FindOptions, InsertData, Repository};
