//! SQL construction for repository operations.
//!
//! Two kinds of input reach the database:
//!
//! - [`Filter`]s, turned into `WHERE 1=1 AND "col" = CAST($n AS <type>)` chains against a
//!   [`TableSchema`]. Values are bound as text and cast server-side to the column's type, so a
//!   filter built from JSON input works for every declared column type.
//! - [`RawQuery`]s, caller-written SQL with `$n` placeholders and positional JSON parameters.
//!   Raw selects are wrapped as sub-queries; raw writes get `RETURNING <pk>` appended.
//!
//! Every statement yields JSON: filter selects build one object per row from the projected
//! columns, raw selects return `to_jsonb(row)` and writes return `to_jsonb(pk)`.

use super::errors::{DbError, Result};
use super::schema::{Column, ColumnType, TableSchema, quote_ident};
use crate::types::{Filter, Record};
use serde_json::Value;
use sqlx::{Arguments, Postgres, QueryBuilder, postgres::PgArguments};

/// The predicate of a repository call
#[derive(Debug, Clone)]
pub enum Query {
    Filter(Filter),
    Raw(RawQuery),
}

impl Query {
    pub fn as_filter(&self) -> Option<&Filter> {
        match self {
            Query::Filter(filter) => Some(filter),
            Query::Raw(_) => None,
        }
    }
}

impl From<Filter> for Query {
    fn from(filter: Filter) -> Self {
        Query::Filter(filter)
    }
}

impl From<RawQuery> for Query {
    fn from(raw: RawQuery) -> Self {
        Query::Raw(raw)
    }
}

/// Caller-written SQL with positional parameters.
///
/// Parameters are bound by JSON type: strings as text, integers as `int8`, other numbers as
/// `float8`, booleans as `bool`, null as a null text and arrays/objects as `jsonb`.
#[derive(Debug, Clone, Default)]
pub struct RawQuery {
    pub sql: String,
    pub params: Vec<Value>,
}

impl RawQuery {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    pub fn bind(mut self, value: impl Into<Value>) -> Self {
        self.params.push(value.into());
        self
    }

    pub fn arguments(&self) -> Result<PgArguments> {
        let mut args = PgArguments::default();
        for (i, value) in self.params.iter().enumerate() {
            let added = match value {
                Value::Null => args.add(Option::<String>::None),
                Value::Bool(b) => args.add(*b),
                Value::Number(n) => match (n.as_i64(), n.as_f64()) {
                    (Some(int), _) => args.add(int),
                    (None, Some(float)) => args.add(float),
                    (None, None) => return Err(DbError::invalid_argument(format!("parameter ${} is not representable", i + 1))),
                },
                Value::String(s) => args.add(s.clone()),
                other => args.add(sqlx::types::Json(other.clone())),
            };
            added.map_err(|e| DbError::invalid_argument(format!("cannot bind parameter ${}: {e}", i + 1)))?;
        }
        Ok(args)
    }

    fn body(&self) -> &str {
        self.sql.trim().trim_end_matches(';')
    }

    /// `SELECT to_jsonb(t) FROM (<raw>) AS t [LIMIT n] [OFFSET m]`
    pub fn wrapped_select(&self, limit: Option<u64>, skip: u64) -> String {
        let mut sql = format!("SELECT to_jsonb(t) AS record FROM ({}) AS t", self.body());
        if let Some(limit) = limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        if skip > 0 {
            sql.push_str(&format!(" OFFSET {skip}"));
        }
        sql
    }

    pub fn wrapped_count(&self) -> String {
        format!("SELECT COUNT(*) FROM ({}) AS t", self.body())
    }

    pub fn returning(&self, primary_key: &str) -> String {
        format!("{} RETURNING to_jsonb({})", self.body(), quote_ident(primary_key))
    }
}

/// Bind one value for `column`, cast to the column's SQL type
fn push_value(query: &mut QueryBuilder<'static, Postgres>, table: &TableSchema, column: &Column, value: &Value) -> Result<()> {
    let text = match (column.column_type, value) {
        (_, Value::Null) => {
            query.push("NULL");
            return Ok(());
        }
        (ColumnType::Json, v) => v.to_string(),
        (_, Value::String(s)) => s.clone(),
        (_, Value::Number(n)) => n.to_string(),
        (_, Value::Bool(b)) => b.to_string(),
        (_, Value::Array(_) | Value::Object(_)) => {
            return Err(DbError::invalid_argument(format!(
                "column '{}' of '{}' cannot hold a structured value",
                column.name,
                table.name()
            )));
        }
    };
    query.push("CAST(");
    query.push_bind(text);
    query.push(format!(" AS {})", column.column_type.sql_type()));
    Ok(())
}

fn push_filter(query: &mut QueryBuilder<'static, Postgres>, table: &TableSchema, filter: &Filter) -> Result<()> {
    for (field, value) in filter.iter() {
        let column = table.require_column(field)?;
        query.push(" AND ");
        query.push(quote_ident(&column.name));
        if value.is_null() {
            query.push(" IS NULL");
        } else {
            query.push(" = ");
            push_value(query, table, column, value)?;
        }
    }
    Ok(())
}

fn returning_pk(query: &mut QueryBuilder<'static, Postgres>, table: &TableSchema) {
    query.push(" RETURNING to_jsonb(");
    query.push(quote_ident(table.pk()));
    query.push(")");
}

/// `jsonb_build_object('a', "a", ...)`, split into `||`-joined calls under the 100-argument limit
fn json_object(columns: &[&Column]) -> String {
    if columns.is_empty() {
        return "'{}'::jsonb".to_string();
    }
    columns
        .chunks(50)
        .map(|chunk| {
            let pairs = chunk
                .iter()
                .map(|c| format!("'{}', {}", c.name.replace('\'', "''"), quote_ident(&c.name)))
                .collect::<Vec<_>>()
                .join(", ");
            format!("jsonb_build_object({pairs})")
        })
        .collect::<Vec<_>>()
        .join(" || ")
}

/// Select rows as JSON objects holding only `columns`, ordered by primary key
pub fn select(table: &TableSchema, filter: &Filter, columns: &[&Column], limit: Option<u64>, skip: u64) -> Result<QueryBuilder<'static, Postgres>> {
    let mut query = QueryBuilder::new(format!(
        "SELECT {} AS record FROM {} WHERE 1=1",
        json_object(columns),
        quote_ident(table.name())
    ));
    push_filter(&mut query, table, filter)?;

    query.push(" ORDER BY ");
    query.push(quote_ident(table.pk()));
    if let Some(limit) = limit {
        query.push(" LIMIT ");
        query.push_bind(i64::try_from(limit).unwrap_or(i64::MAX));
    }
    if skip > 0 {
        query.push(" OFFSET ");
        query.push_bind(i64::try_from(skip).unwrap_or(i64::MAX));
    }
    Ok(query)
}

pub fn count(table: &TableSchema, filter: &Filter) -> Result<QueryBuilder<'static, Postgres>> {
    let mut query = QueryBuilder::new(format!("SELECT COUNT(*) FROM {} WHERE 1=1", quote_ident(table.name())));
    push_filter(&mut query, table, filter)?;
    Ok(query)
}

/// Multi-row insert. Columns are the union of the records' keys; a record missing one of them
/// gets `DEFAULT` there. Returns `None` when no record names any column, in which case callers
/// insert `DEFAULT VALUES` rows one at a time.
pub fn insert(table: &TableSchema, records: &[Record]) -> Result<Option<QueryBuilder<'static, Postgres>>> {
    let mut columns: Vec<&Column> = Vec::new();
    for record in records {
        for key in record.keys() {
            let column = table.require_column(key)?;
            if !columns.iter().any(|c| c.name == column.name) {
                columns.push(column);
            }
        }
    }
    if columns.is_empty() {
        return Ok(None);
    }

    let column_list = columns.iter().map(|c| quote_ident(&c.name)).collect::<Vec<_>>().join(", ");
    let mut query = QueryBuilder::new(format!("INSERT INTO {} ({column_list}) VALUES ", quote_ident(table.name())));
    for (row, record) in records.iter().enumerate() {
        if row > 0 {
            query.push(", ");
        }
        query.push("(");
        for (i, column) in columns.iter().enumerate() {
            if i > 0 {
                query.push(", ");
            }
            match record.get(&column.name) {
                Some(value) => push_value(&mut query, table, column, value)?,
                None => {
                    query.push("DEFAULT");
                }
            }
        }
        query.push(")");
    }
    returning_pk(&mut query, table);
    Ok(Some(query))
}

pub fn insert_default(table: &TableSchema) -> QueryBuilder<'static, Postgres> {
    let mut query = QueryBuilder::new(format!("INSERT INTO {} DEFAULT VALUES", quote_ident(table.name())));
    returning_pk(&mut query, table);
    query
}

pub fn update(table: &TableSchema, filter: &Filter, data: &Record) -> Result<QueryBuilder<'static, Postgres>> {
    if data.is_empty() {
        return Err(DbError::invalid_argument(format!("update of '{}' has no columns to set", table.name())));
    }
    let mut query = QueryBuilder::new(format!("UPDATE {} SET ", quote_ident(table.name())));
    for (i, (key, value)) in data.iter().enumerate() {
        let column = table.require_column(key)?;
        if i > 0 {
            query.push(", ");
        }
        query.push(quote_ident(&column.name));
        query.push(" = ");
        push_value(&mut query, table, column, value)?;
    }
    query.push(" WHERE 1=1");
    push_filter(&mut query, table, filter)?;
    returning_pk(&mut query, table);
    Ok(query)
}

pub fn delete(table: &TableSchema, filter: &Filter) -> Result<QueryBuilder<'static, Postgres>> {
    let mut query = QueryBuilder::new(format!("DELETE FROM {} WHERE 1=1", quote_ident(table.name())));
    push_filter(&mut query, table, filter)?;
    returning_pk(&mut query, table);
    Ok(query)
}
