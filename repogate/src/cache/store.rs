use super::backend::KvBackend;
use super::errors::{CacheError, Result};
use crate::types::{Filter, render_value};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Outcome of a cache read that never fails.
///
/// `Miss` means the backend answered and holds nothing usable for the key. `Unavailable` means
/// the backend could not be asked (not configured, or the command failed). Callers that only
/// care about hits treat both the same.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup<T> {
    Hit(T),
    Miss,
    Unavailable,
}

impl<T> CacheLookup<T> {
    pub fn hit(self) -> Option<T> {
        match self {
            CacheLookup::Hit(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_hit(&self) -> bool {
        matches!(self, CacheLookup::Hit(_))
    }
}

impl<T> From<Result<Option<T>>> for CacheLookup<T> {
    fn from(result: Result<Option<T>>) -> Self {
        match result {
            Ok(Some(value)) => CacheLookup::Hit(value),
            Ok(None) | Err(CacheError::Decode(_)) => CacheLookup::Miss,
            Err(_) => CacheLookup::Unavailable,
        }
    }
}

/// Deterministic key derivation plus get/set/hash-field operations over a [`KvBackend`].
///
/// Keys are built from a [`Filter`] by joining `field.value` pairs, sorted by field, with `:`.
/// A store obtained through [`CacheStore::scoped`] prefixes every key with `"<table>."`, so the
/// same filter against two tables never collides.
///
/// Every value is written as JSON text and decoded on the way out.
#[derive(Clone)]
pub struct CacheStore {
    backend: Option<Arc<dyn KvBackend>>,
    prefix: Option<String>,
}

impl fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheStore")
            .field("connected", &self.backend.is_some())
            .field("prefix", &self.prefix)
            .finish()
    }
}

impl CacheStore {
    pub fn new(backend: Arc<dyn KvBackend>) -> Self {
        Self {
            backend: Some(backend),
            prefix: None,
        }
    }

    /// A store with no backend. Reads through [`get`](Self::get) fail with
    /// [`CacheError::Unavailable`]; lookups report [`CacheLookup::Unavailable`].
    pub fn disconnected() -> Self {
        Self { backend: None, prefix: None }
    }

    /// A store over the same backend whose keys carry the table prefix
    pub fn scoped(&self, table: &str) -> Self {
        Self {
            backend: self.backend.clone(),
            prefix: Some(table.to_string()),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.backend.is_some()
    }

    /// `["<table>."]<field1>.<value1>:<field2>.<value2>...` with fields in lexicographic order
    pub fn key(&self, filter: &Filter) -> String {
        let body = filter
            .iter()
            .map(|(field, value)| format!("{field}.{}", render_value(value)))
            .collect::<Vec<_>>()
            .join(":");
        match &self.prefix {
            Some(table) => format!("{table}.{body}"),
            None => body,
        }
    }

    fn backend(&self) -> Result<&Arc<dyn KvBackend>> {
        self.backend.as_ref().ok_or(CacheError::Unavailable)
    }

    /// Overwrite the value at the filter's key. `ttl: None` never expires.
    #[instrument(skip(self, value), fields(key = %self.key(filter)), err)]
    pub async fn set(&self, filter: &Filter, value: &Value, ttl: Option<Duration>) -> Result<()> {
        let encoded = serde_json::to_string(value)?;
        self.backend()?.set(&self.key(filter), encoded, ttl).await
    }

    #[instrument(skip(self), fields(key = %self.key(filter)), err)]
    pub async fn get(&self, filter: &Filter) -> Result<Option<Value>> {
        let Some(raw) = self.backend()?.get(&self.key(filter)).await? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_str(&raw)?))
    }

    /// [`get`](Self::get) with failures folded into the tagged result
    pub async fn lookup(&self, filter: &Filter) -> CacheLookup<Value> {
        let result = self.get(filter).await;
        if let Err(e) = &result {
            debug!(key = %self.key(filter), "Cache read failed, treating as miss: {e}");
        }
        result.into()
    }

    /// Write `value` into the hash at the filter's key, under the field named by the filter's
    /// value for `field_name`.
    #[instrument(skip(self, value), fields(key = %self.key(filter)), err)]
    pub async fn hash_field_set(&self, filter: &Filter, field_name: &str, value: &Value) -> Result<()> {
        let field = filter
            .get(field_name)
            .map(render_value)
            .ok_or_else(|| CacheError::MissingField(field_name.to_string()))?;
        let encoded = serde_json::to_string(value)?;
        self.backend()?.hset(&self.key(filter), &field, encoded).await
    }

    #[instrument(skip(self), fields(key = %self.key(filter)), err)]
    pub async fn hash_field_get(&self, filter: &Filter, field: &str) -> Result<Option<Value>> {
        let Some(raw) = self.backend()?.hget(&self.key(filter), field).await? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_str(&raw)?))
    }

    /// All hash fields at the filter's key, decoded. Never fails: an empty hash or an undecodable
    /// field is a miss, a backend failure is `Unavailable`.
    pub async fn hash_field_get_all(&self, filter: &Filter) -> CacheLookup<HashMap<String, Value>> {
        let key = self.key(filter);
        let backend = match self.backend() {
            Ok(backend) => backend,
            Err(_) => return CacheLookup::Unavailable,
        };
        let fields = match backend.hgetall(&key).await {
            Ok(fields) => fields,
            Err(e) => {
                warn!(%key, "Cache hash read failed, treating as miss: {e}");
                return CacheLookup::Unavailable;
            }
        };
        if fields.is_empty() {
            return CacheLookup::Miss;
        }

        let mut decoded = HashMap::with_capacity(fields.len());
        for (field, raw) in fields {
            match serde_json::from_str(&raw) {
                Ok(value) => {
                    decoded.insert(field, value);
                }
                Err(e) => {
                    warn!(%key, %field, "Undecodable cached hash field, treating as miss: {e}");
                    return CacheLookup::Miss;
                }
            }
        }
        CacheLookup::Hit(decoded)
    }

    /// Remove the value or hash at the filter's key
    #[instrument(skip(self), fields(key = %self.key(filter)), err)]
    pub async fn delete(&self, filter: &Filter) -> Result<()> {
        self.backend()?.delete(&self.key(filter)).await
    }

    pub async fn ping(&self) -> Result<()> {
        self.backend()?.ping().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryBackend;
    use serde_json::json;

    fn store() -> CacheStore {
        CacheStore::new(Arc::new(MemoryBackend::new()))
    }

    #[test]
    fn test_key_is_invariant_under_field_order() {
        let store = store();
        let a: Filter = [("a", json!(1)), ("b", json!(2))].into_iter().collect();
        let b: Filter = [("b", json!(2)), ("a", json!(1))].into_iter().collect();
        assert_eq!(store.key(&a), store.key(&b));
        assert_eq!(store.key(&a), "a.1:b.2");
    }

    #[test]
    fn test_scoped_key_carries_table_prefix() {
        let store = store();
        let filter = Filter::new().with("address", "abc");
        assert_eq!(store.scoped("nfts").key(&filter), "nfts.address.abc");
        assert_ne!(store.scoped("nfts").key(&filter), store.scoped("balances").key(&filter));
    }

    #[tokio::test]
    async fn test_set_then_get_round_trips_scalars_and_structures() {
        let store = store();
        let filter = Filter::new().with("id", 7);
        for value in [json!("text"), json!(42), json!(true), json!({"address": "abc", "amount": 15}), json!([1, 2, 3])] {
            store.set(&filter, &value, None).await.unwrap();
            assert_eq!(store.get(&filter).await.unwrap(), Some(value));
        }
    }

    #[tokio::test]
    async fn test_set_with_ttl_expires() {
        let store = store();
        let filter = Filter::new().with("id", 1);
        store.set(&filter, &json!("v"), Some(Duration::from_millis(10))).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(store.get(&filter).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_get_without_backend_is_unavailable() {
        let store = CacheStore::disconnected();
        let filter = Filter::new().with("id", 1);
        assert!(matches!(store.get(&filter).await, Err(CacheError::Unavailable)));
        assert_eq!(store.lookup(&filter).await, CacheLookup::Unavailable);
        assert_eq!(store.hash_field_get_all(&filter).await, CacheLookup::Unavailable);
    }

    #[tokio::test]
    async fn test_lookup_distinguishes_hit_and_miss() {
        let store = store();
        let filter = Filter::new().with("id", 1);
        assert_eq!(store.lookup(&filter).await, CacheLookup::Miss);
        store.set(&filter, &json!({"id": 1}), None).await.unwrap();
        assert_eq!(store.lookup(&filter).await, CacheLookup::Hit(json!({"id": 1})));
    }

    #[tokio::test]
    async fn test_hash_fields_partition_by_filter_value() {
        let store = store().scoped("nfts");
        let filter = Filter::new().with("address", "abc");
        store
            .hash_field_set(&filter, "address", &json!([{"nft_id": "n1"}, {"nft_id": "n2"}]))
            .await
            .unwrap();

        let single = store.hash_field_get(&filter, "abc").await.unwrap();
        assert_eq!(single, Some(json!([{"nft_id": "n1"}, {"nft_id": "n2"}])));

        let CacheLookup::Hit(all) = store.hash_field_get_all(&filter).await else {
            panic!("expected a hit");
        };
        assert_eq!(all.len(), 1);
        assert!(all.contains_key("abc"));
    }

    #[tokio::test]
    async fn test_hash_field_set_requires_partition_field() {
        let store = store();
        let filter = Filter::new().with("address", "abc");
        let result = store.hash_field_set(&filter, "owner", &json!([])).await;
        assert!(matches!(result, Err(CacheError::MissingField(field)) if field == "owner"));
    }

    #[tokio::test]
    async fn test_hash_field_get_all_on_empty_is_miss() {
        let store = store();
        assert_eq!(store.hash_field_get_all(&Filter::new().with("a", 1)).await, CacheLookup::Miss);
    }

    #[tokio::test]
    async fn test_hash_field_get_all_on_undecodable_is_miss() {
        let backend = Arc::new(MemoryBackend::new());
        backend.hset("a.1", "x", "{not json".to_string()).await.unwrap();
        let store = CacheStore::new(backend);
        assert_eq!(store.hash_field_get_all(&Filter::new().with("a", 1)).await, CacheLookup::Miss);
    }

    #[tokio::test]
    async fn test_delete_removes_key() {
        let store = store();
        let filter = Filter::new().with("id", 1);
        store.set(&filter, &json!(1), None).await.unwrap();
        store.delete(&filter).await.unwrap();
        assert_eq!(store.get(&filter).await.unwrap(), None);
    }
}
