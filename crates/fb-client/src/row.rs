//! Materialized result rows.
//!
//! Column names keep the driver's native casing (Firebird upper-cases
//! unquoted identifiers). Every by-name lookup goes through
//! [`Row::position`], which prefers an exact match and falls back to an
//! ASCII case-insensitive one, so callers never re-derive casing rules.

use std::sync::Arc;

use crate::value::{FromSql, SqlValue, TypeError};

/// Column metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    /// Column name or alias, as reported by the driver.
    pub name: String,
    /// Column index.
    pub index: usize,
}

/// A row from a query result.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[Column]>,
    values: Vec<SqlValue>,
}

impl Row {
    /// Create a row from shared column metadata and its values.
    pub fn new(columns: Arc<[Column]>, values: Vec<SqlValue>) -> Self {
        Self { columns, values }
    }

    /// Create a row from `(name, value)` pairs.
    pub fn from_pairs<N, I>(pairs: I) -> Self
    where
        N: Into<String>,
        I: IntoIterator<Item = (N, SqlValue)>,
    {
        let (names, values): (Vec<String>, Vec<SqlValue>) = pairs
            .into_iter()
            .map(|(name, value)| (name.into(), value))
            .unzip();

        let columns = names
            .into_iter()
            .enumerate()
            .map(|(index, name)| Column { name, index })
            .collect();

        Self::new(columns, values)
    }

    /// Index of the column called `name`.
    #[must_use]
    pub fn position(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.name == name)
            .or_else(|| {
                self.columns
                    .iter()
                    .position(|c| c.name.eq_ignore_ascii_case(name))
            })
    }

    /// Get a value by column index.
    pub fn get<T: FromSql>(&self, index: usize) -> Result<T, TypeError> {
        self.values
            .get(index)
            .ok_or_else(|| TypeError::ColumnNotFound(format!("#{index}")))
            .and_then(T::from_sql)
    }

    /// Get a value by column name.
    pub fn get_by_name<T: FromSql>(&self, name: &str) -> Result<T, TypeError> {
        let index = self
            .position(name)
            .ok_or_else(|| TypeError::ColumnNotFound(name.to_string()))?;

        self.get(index)
    }

    /// Get a value by column name, returning `None` if NULL, missing or of
    /// another type.
    pub fn try_get_by_name<T: FromSql>(&self, name: &str) -> Option<T> {
        self.get_raw_by_name(name)
            .and_then(|v| T::from_sql_nullable(v).ok().flatten())
    }

    /// Get the raw value by index.
    #[must_use]
    pub fn get_raw(&self, index: usize) -> Option<&SqlValue> {
        self.values.get(index)
    }

    /// Get the raw value by column name.
    #[must_use]
    pub fn get_raw_by_name(&self, name: &str) -> Option<&SqlValue> {
        self.position(name).and_then(|i| self.values.get(i))
    }

    /// Number of columns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the row has no columns.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Column metadata.
    #[must_use]
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Iterate over `(column, value)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&Column, &SqlValue)> {
        self.columns.iter().zip(self.values.iter())
    }
}

impl IntoIterator for Row {
    type Item = SqlValue;
    type IntoIter = std::vec::IntoIter<SqlValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.into_iter()
    }
}
