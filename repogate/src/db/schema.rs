//! Declarative descriptions of relational models.
//!
//! A [`TableSchema`] names a table, its primary key and its typed columns. Repositories check
//! every filter key, projection entry and written column against it before building SQL, and
//! the column types decide how bound values are cast and which values get the temporal
//! rendering applied to records.

use super::errors::{DbError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Text,
    Integer,
    BigInt,
    Numeric,
    Double,
    Boolean,
    Timestamp,
    TimestampTz,
    Date,
    Uuid,
    Json,
}

impl ColumnType {
    /// The type name used in `CAST($n AS <type>)`
    pub fn sql_type(self) -> &'static str {
        match self {
            ColumnType::Text => "text",
            ColumnType::Integer => "integer",
            ColumnType::BigInt => "bigint",
            ColumnType::Numeric => "numeric",
            ColumnType::Double => "double precision",
            ColumnType::Boolean => "boolean",
            ColumnType::Timestamp => "timestamp",
            ColumnType::TimestampTz => "timestamptz",
            ColumnType::Date => "date",
            ColumnType::Uuid => "uuid",
            ColumnType::Json => "jsonb",
        }
    }

    pub fn is_temporal(self) -> bool {
        matches!(self, ColumnType::Timestamp | ColumnType::TimestampTz | ColumnType::Date)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub column_type: ColumnType,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    name: String,
    primary_key: String,
    columns: Vec<Column>,
}

impl TableSchema {
    /// A table whose primary key is `id` until told otherwise
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            primary_key: "id".to_string(),
            columns: Vec::new(),
        }
    }

    pub fn primary_key(mut self, column: impl Into<String>) -> Self {
        self.primary_key = column.into();
        self
    }

    pub fn column(mut self, name: impl Into<String>, column_type: ColumnType) -> Self {
        self.columns.push(Column {
            name: name.into(),
            column_type,
        });
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pk(&self) -> &str {
        &self.primary_key
    }

    /// Columns in declaration order
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn find_column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn require_column(&self, name: &str) -> Result<&Column> {
        self.find_column(name).ok_or_else(|| DbError::UnknownColumn {
            table: self.name.clone(),
            column: name.to_string(),
        })
    }

    pub fn temporal_columns(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().filter(|c| c.column_type.is_temporal()).map(|c| c.name.as_str())
    }

    /// The columns to load for a projection.
    ///
    /// An empty projection loads everything. Otherwise `materialize_projected` selects exactly the
    /// listed columns, and its negation loads every column except the listed ones.
    pub fn projected_columns(&self, projection: &[String], materialize_projected: bool) -> Result<Vec<&Column>> {
        for name in projection {
            self.require_column(name)?;
        }
        if projection.is_empty() {
            return Ok(self.columns.iter().collect());
        }
        if materialize_projected {
            // Keep caller order, skipping repeats
            let mut selected: Vec<&Column> = Vec::with_capacity(projection.len());
            for name in projection {
                let column = self.require_column(name)?;
                if !selected.iter().any(|c| c.name == column.name) {
                    selected.push(column);
                }
            }
            Ok(selected)
        } else {
            Ok(self.columns.iter().filter(|c| !projection.contains(&c.name)).collect())
        }
    }
}

/// Double-quote an identifier, doubling any embedded quotes
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn balances() -> TableSchema {
        TableSchema::new("balances")
            .column("id", ColumnType::BigInt)
            .column("address", ColumnType::Text)
            .column("amount", ColumnType::BigInt)
            .column("created_at", ColumnType::TimestampTz)
    }

    #[test]
    fn test_projection_selects_listed_columns() {
        let table = balances();
        let names: Vec<_> = table
            .projected_columns(&["amount".to_string(), "address".to_string()], true)
            .unwrap()
            .into_iter()
            .map(|c| c.name.as_str())
            .collect();
        assert_eq!(names, vec!["amount", "address"]);
    }

    #[test]
    fn test_shadow_projection_excludes_listed_columns() {
        let table = balances();
        let names: Vec<_> = table
            .projected_columns(&["created_at".to_string()], false)
            .unwrap()
            .into_iter()
            .map(|c| c.name.as_str())
            .collect();
        assert_eq!(names, vec!["id", "address", "amount"]);
    }

    #[test]
    fn test_unknown_projection_column_is_rejected() {
        let err = balances().projected_columns(&["nope".to_string()], true).unwrap_err();
        assert!(matches!(err, DbError::UnknownColumn { column, .. } if column == "nope"));
    }

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("amount"), "\"amount\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_temporal_columns() {
        assert_eq!(balances().temporal_columns().collect::<Vec<_>>(), vec!["created_at"]);
    }
}
