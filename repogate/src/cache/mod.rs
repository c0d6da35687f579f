//! Cache-aside support for the data-access layer.
//!
//! ```text
//! CacheStore                  <- key derivation, JSON encoding, tagged lookups
//!   └── Arc<dyn KvBackend>
//!         ├── RedisBackend    <- ConnectionManager-based async Redis
//!         └── MemoryBackend   <- DashMap, for tests and cache-less development
//! ```
//!
//! The cache is advisory. Nothing here takes part in a database transaction, concurrent writers to
//! the same key race (last writer wins), and read failures surface as [`CacheLookup::Unavailable`]
//! rather than errors wherever the caller has asked for the tagged form.

pub mod backend;
pub mod errors;
pub mod store;

pub use backend::{KvBackend, MemoryBackend, RedisBackend};
pub use errors::CacheError;
pub use store::{CacheLookup, CacheStore};

use std::sync::Arc;
use tracing::warn;

/// Connect to the configured cache, degrading to a disconnected store when it is unreachable
pub async fn connect(url: Option<&str>) -> CacheStore {
    let Some(url) = url else {
        return CacheStore::disconnected();
    };
    match RedisBackend::connect(url).await {
        Ok(backend) => CacheStore::new(Arc::new(backend)),
        Err(e) => {
            warn!("Cache unreachable, continuing without it: {e}");
            CacheStore::disconnected()
        }
    }
}
