//! Generic repository over a relational model, shadowed by an optional cache.
//!
//! A [`Repository`] is built once per table at start-up and shared through application state. It
//! holds no connection: every call takes the caller's [`Session`], which owns the transaction for
//! the unit of work.
//!
//! Cache-aside behaviour is opt-in per call through [`FindOneOptions`] and [`FindOptions`]. Writes
//! never touch the cache; callers that need fresher reads call [`Repository::invalidate`].
//!
//! Every record handed back, whether it came from the cache or the database, goes through the
//! same shaping: timestamp columns are rendered as `YYYY-MM-DD HH:MM:SS` in UTC, and projected
//! columns are kept (or stripped, for shadow projections) so both paths look identical.

use crate::cache::{CacheLookup, CacheStore};
use crate::db::errors::DbError;
use crate::db::query::{self, Query, RawQuery};
use crate::db::schema::TableSchema;
use crate::db::session::Session;
use crate::errors::{Error, Result};
use crate::types::{Filter, Record};
use bon::Builder;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::{Value, json};
use sqlx::Postgres;
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{debug, error, instrument, warn};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Options for [`Repository::find_one`]
#[derive(Debug, Clone, Builder)]
pub struct FindOneOptions {
    /// Columns to load. Empty loads every column.
    #[builder(default)]
    pub projection: Vec<String>,
    /// When false, `projection` lists the columns to leave out instead
    #[builder(default = true)]
    pub materialize_projected: bool,
    #[builder(default)]
    pub from_cache: bool,
    #[builder(default)]
    pub cache_on_success: bool,
}

impl Default for FindOneOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl FindOneOptions {
    pub fn projected<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::builder().projection(columns.into_iter().map(Into::into).collect()).build()
    }
}

/// Options for [`Repository::find`]
#[derive(Debug, Clone, Builder)]
pub struct FindOptions {
    #[builder(default)]
    pub projection: Vec<String>,
    #[builder(default = true)]
    pub materialize_projected: bool,
    /// `None` or zero means unbounded
    pub limit: Option<u64>,
    #[builder(default)]
    pub skip: u64,
    #[builder(default)]
    pub from_cache: bool,
    /// Filter field whose value names the hash field results are cached under
    #[builder(into)]
    pub hash_field_key: Option<String>,
    #[builder(default)]
    pub cache_on_success: bool,
}

impl Default for FindOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Rows to insert
#[derive(Debug, Clone)]
pub enum InsertData {
    Rows(Vec<Record>),
    Raw(RawQuery),
}

impl From<Record> for InsertData {
    fn from(record: Record) -> Self {
        InsertData::Rows(vec![record])
    }
}

impl From<Vec<Record>> for InsertData {
    fn from(records: Vec<Record>) -> Self {
        InsertData::Rows(records)
    }
}

impl From<RawQuery> for InsertData {
    fn from(raw: RawQuery) -> Self {
        InsertData::Raw(raw)
    }
}

#[derive(Clone)]
pub struct Repository {
    table: Arc<TableSchema>,
    cache: CacheStore,
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository").field("table", &self.table.name()).finish()
    }
}

fn into_record(value: Value) -> Result<Record> {
    match value {
        Value::Object(record) => Ok(record),
        other => Err(Error::Other(anyhow::anyhow!("expected a row object, got {other}"))),
    }
}

/// Render a timestamp as `YYYY-MM-DD HH:MM:SS` in UTC. Values that are not timestamps (dates,
/// already-rendered values that don't parse) are returned unchanged.
fn render_timestamp(raw: &str) -> Option<String> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc).format(TIMESTAMP_FORMAT).to_string());
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|dt| dt.format(TIMESTAMP_FORMAT).to_string())
}

impl Repository {
    /// A repository for `table`, caching under keys prefixed with the table name
    pub fn new(table: TableSchema, cache: &CacheStore) -> Self {
        let cache = cache.scoped(table.name());
        Self {
            table: Arc::new(table),
            cache,
        }
    }

    pub fn table(&self) -> &TableSchema {
        &self.table
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    fn shape(&self, mut record: Record, projection: &[String], materialize_projected: bool) -> Record {
        for column in self.table.temporal_columns() {
            if let Some(Value::String(raw)) = record.get(column)
                && let Some(rendered) = render_timestamp(raw)
            {
                record.insert(column.to_string(), Value::String(rendered));
            }
        }
        if !projection.is_empty() {
            if materialize_projected {
                record.retain(|column, _| projection.contains(column));
            } else {
                record.retain(|column, _| !projection.contains(column));
            }
        }
        record
    }

    fn cache_filter<'q>(&self, query: &'q Query, operation: &str) -> Result<&'q Filter> {
        query.as_filter().ok_or_else(|| {
            Error::Database(DbError::invalid_argument(format!(
                "{operation} on '{}': raw queries cannot be read from or written to the cache",
                self.table.name()
            )))
        })
    }

    async fn fetch_records(&self, session: &mut Session, query: &Query, projection: &[String], materialize: bool, limit: Option<u64>, skip: u64) -> Result<Vec<Value>> {
        let rows = match query {
            Query::Filter(filter) => {
                let columns = self.table.projected_columns(projection, materialize)?;
                let mut select = query::select(&self.table, filter, &columns, limit, skip)?;
                select.build_query_scalar::<Value>().fetch_all(session.connection().await?).await?
            }
            Query::Raw(raw) => {
                let sql = raw.wrapped_select(limit, skip);
                sqlx::query_scalar_with::<Postgres, Value, _>(&sql, raw.arguments()?)
                    .fetch_all(session.connection().await?)
                    .await?
            }
        };
        Ok(rows)
    }

    /// Fetch at most one record.
    ///
    /// Returns `Ok(None)` when nothing matches. `from_cache` and `cache_on_success` need a plain
    /// [`Filter`]; a raw query fails with an invalid-argument error before any I/O.
    #[instrument(skip_all, fields(table = %self.table.name(), operation = "find_one"), err)]
    pub async fn find_one(&self, session: &mut Session, query: impl Into<Query>, options: &FindOneOptions) -> Result<Option<Record>> {
        let query = query.into();
        let cache_filter = if options.from_cache || options.cache_on_success {
            Some(self.cache_filter(&query, "find_one")?)
        } else {
            None
        };

        if options.from_cache
            && let Some(filter) = cache_filter
        {
            match self.cache.lookup(filter).await {
                CacheLookup::Hit(Value::Object(record)) => {
                    debug!("Cache hit");
                    return Ok(Some(self.shape(record, &options.projection, options.materialize_projected)));
                }
                CacheLookup::Hit(other) => warn!("Ignoring non-record cache entry: {other}"),
                CacheLookup::Miss | CacheLookup::Unavailable => debug!("Cache miss"),
            }
        }

        let rows = self
            .fetch_records(session, &query, &options.projection, options.materialize_projected, Some(1), 0)
            .await?;
        let Some(row) = rows.into_iter().next() else {
            return Ok(None);
        };
        let record = into_record(row)?;

        if options.cache_on_success
            && let Some(filter) = cache_filter
            && let Err(e) = self.cache.set(filter, &Value::Object(record.clone()), None).await
        {
            warn!("Failed to cache record: {e}");
        }

        Ok(Some(self.shape(record, &options.projection, options.materialize_projected)))
    }

    /// Fetch every matching record, ordered by primary key for filter queries.
    ///
    /// With `from_cache`, the hash at the filter's key is read; its fields are concatenated in field
    /// order and returned as-is (no further paging). An empty or unavailable cache falls through to
    /// the database. With `cache_on_success`, the result is stored under the hash field named by the
    /// filter's `hash_field_key` value; omitting `hash_field_key` is an internal error raised before
    /// any I/O.
    #[instrument(skip_all, fields(table = %self.table.name(), operation = "find", limit = ?options.limit, skip = options.skip), err)]
    pub async fn find(&self, session: &mut Session, query: impl Into<Query>, options: &FindOptions) -> Result<Vec<Record>> {
        let query = query.into();
        if options.cache_on_success && options.hash_field_key.is_none() {
            return Err(Error::internal()
                .with_message("hash_field_key is required when caching find results")
                .with_details(json!({ "hash_field_key": "missing" })));
        }
        let cache_filter = if options.from_cache || options.cache_on_success {
            Some(self.cache_filter(&query, "find")?)
        } else {
            None
        };
        if let (Some(filter), Some(key)) = (cache_filter, options.hash_field_key.as_deref())
            && options.cache_on_success
            && !filter.contains(key)
        {
            return Err(Error::Database(DbError::invalid_argument(format!(
                "hash_field_key '{key}' is not a field of the filter"
            ))));
        }

        if options.from_cache
            && let Some(filter) = cache_filter
            && let CacheLookup::Hit(fields) = self.cache.hash_field_get_all(filter).await
        {
            let mut fields: Vec<_> = fields.into_iter().collect();
            fields.sort_by(|(a, _), (b, _)| a.cmp(b));
            let records: Vec<Record> = fields
                .into_iter()
                .flat_map(|(_, value)| match value {
                    Value::Array(items) => items,
                    single => vec![single],
                })
                .filter_map(|item| match item {
                    Value::Object(record) => Some(self.shape(record, &options.projection, options.materialize_projected)),
                    _ => None,
                })
                .collect();
            if !records.is_empty() {
                debug!(count = records.len(), "Cache hit");
                return Ok(records);
            }
        }

        let limit = options.limit.filter(|l| *l > 0);
        let rows = self
            .fetch_records(session, &query, &options.projection, options.materialize_projected, limit, options.skip)
            .await?;
        let records = rows.into_iter().map(into_record).collect::<Result<Vec<_>>>()?;

        if options.cache_on_success
            && let (Some(filter), Some(key)) = (cache_filter, options.hash_field_key.as_deref())
        {
            let cached = Value::Array(records.iter().cloned().map(Value::Object).collect());
            if let Err(e) = self.cache.hash_field_set(filter, key, &cached).await {
                warn!("Failed to cache records: {e}");
            }
        }

        Ok(records
            .into_iter()
            .map(|record| self.shape(record, &options.projection, options.materialize_projected))
            .collect())
    }

    /// Insert rows and commit, returning the generated primary keys
    #[instrument(skip_all, fields(table = %self.table.name(), operation = "insert"), err)]
    pub async fn insert(&self, session: &mut Session, data: impl Into<InsertData>) -> Result<Vec<Value>> {
        let ids = match data.into() {
            InsertData::Rows(records) if records.is_empty() => Vec::new(),
            InsertData::Rows(records) => match query::insert(&self.table, &records)? {
                Some(mut insert) => insert.build_query_scalar::<Value>().fetch_all(session.connection().await?).await?,
                None => {
                    let mut ids = Vec::with_capacity(records.len());
                    for _ in &records {
                        let mut insert = query::insert_default(&self.table);
                        ids.push(insert.build_query_scalar::<Value>().fetch_one(session.connection().await?).await?);
                    }
                    ids
                }
            },
            InsertData::Raw(raw) => {
                let sql = raw.returning(self.table.pk());
                sqlx::query_scalar_with::<Postgres, Value, _>(&sql, raw.arguments()?)
                    .fetch_all(session.connection().await?)
                    .await?
            }
        };
        session.commit().await?;
        Ok(ids)
    }

    /// Update matching rows and commit, returning the affected primary keys.
    ///
    /// A raw update carries its own `SET` clause, so `data` must be empty for one.
    #[instrument(skip_all, fields(table = %self.table.name(), operation = "update"), err)]
    pub async fn update(&self, session: &mut Session, query: impl Into<Query>, data: &Record) -> Result<Vec<Value>> {
        let ids = match query.into() {
            Query::Filter(filter) => {
                let mut update = query::update(&self.table, &filter, data)?;
                update.build_query_scalar::<Value>().fetch_all(session.connection().await?).await?
            }
            Query::Raw(raw) => {
                if !data.is_empty() {
                    return Err(Error::Database(DbError::invalid_argument("raw updates take no separate data")));
                }
                let sql = raw.returning(self.table.pk());
                sqlx::query_scalar_with::<Postgres, Value, _>(&sql, raw.arguments()?)
                    .fetch_all(session.connection().await?)
                    .await?
            }
        };
        session.commit().await?;
        Ok(ids)
    }

    /// Delete matching rows and commit, returning the deleted primary keys
    #[instrument(skip_all, fields(table = %self.table.name(), operation = "delete"), err)]
    pub async fn delete(&self, session: &mut Session, query: impl Into<Query>) -> Result<Vec<Value>> {
        let ids = match query.into() {
            Query::Filter(filter) => {
                let mut delete = query::delete(&self.table, &filter)?;
                delete.build_query_scalar::<Value>().fetch_all(session.connection().await?).await?
            }
            Query::Raw(raw) => {
                let sql = raw.returning(self.table.pk());
                sqlx::query_scalar_with::<Postgres, Value, _>(&sql, raw.arguments()?)
                    .fetch_all(session.connection().await?)
                    .await?
            }
        };
        session.commit().await?;
        Ok(ids)
    }

    #[instrument(skip_all, fields(table = %self.table.name(), operation = "count"), err)]
    pub async fn count(&self, session: &mut Session, query: impl Into<Query>) -> Result<i64> {
        let count = match query.into() {
            Query::Filter(filter) => {
                let mut count = query::count(&self.table, &filter)?;
                count.build_query_scalar::<i64>().fetch_one(session.connection().await?).await?
            }
            Query::Raw(raw) => {
                let sql = raw.wrapped_count();
                sqlx::query_scalar_with::<Postgres, i64, _>(&sql, raw.arguments()?)
                    .fetch_one(session.connection().await?)
                    .await?
            }
        };
        Ok(count)
    }

    /// Drop the cached entry for `filter`. Failures are logged and otherwise ignored.
    pub async fn invalidate(&self, filter: &Filter) {
        if !self.cache.is_connected() {
            return;
        }
        if let Err(e) = self.cache.delete(filter).await {
            warn!(table = %self.table.name(), "Failed to invalidate cache entry: {e}");
        }
    }

    /// Schedule `write` on the current runtime in a fresh session. Returns whether scheduling
    /// succeeded; the write's own outcome is only logged.
    fn spawn_write<F, Fut>(&self, session: &Session, operation: &'static str, params: String, write: F) -> bool
    where
        F: FnOnce(Repository, Session) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Vec<Value>>> + Send + 'static,
    {
        let handle = match Handle::try_current() {
            Ok(handle) => handle,
            Err(e) => {
                error!(table = %self.table.name(), operation, %params, "Cannot schedule background write: {e}");
                return false;
            }
        };

        let repo = self.clone();
        let background = Session::new(session.pool().clone());
        let table = self.table.name().to_string();
        handle.spawn(async move {
            match write(repo, background).await {
                Ok(ids) => debug!(%table, operation, affected = ids.len(), "Background write completed"),
                Err(e) => error!(%table, operation, %params, "Background write failed: {e}"),
            }
        });
        true
    }

    /// [`insert`](Self::insert) detached from the caller
    pub fn insert_in_background(&self, session: &Session, data: impl Into<InsertData>) -> bool {
        let data = data.into();
        let params = format!("{data:?}");
        self.spawn_write(session, "insert", params, move |repo, mut session| async move {
            repo.insert(&mut session, data).await
        })
    }

    /// [`update`](Self::update) detached from the caller
    pub fn update_in_background(&self, session: &Session, query: impl Into<Query>, data: Record) -> bool {
        let query = query.into();
        let params = format!("query={query:?} data={data:?}");
        self.spawn_write(session, "update", params, move |repo, mut session| async move {
            repo.update(&mut session, query, &data).await
        })
    }

    /// [`delete`](Self::delete) detached from the caller
    pub fn delete_in_background(&self, session: &Session, query: impl Into<Query>) -> bool {
        let query = query.into();
        let params = format!("{query:?}");
        self.spawn_write(session, "delete", params, move |repo, mut session| async move {
            repo.delete(&mut session, query).await
        })
    }
}
