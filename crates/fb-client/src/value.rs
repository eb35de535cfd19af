//! Scalar and temporal values exchanged with a client library.

use bytes::Bytes;
use thiserror::Error;

#[cfg(feature = "chrono")]
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
#[cfg(feature = "decimal")]
use rust_decimal::Decimal;

/// Errors converting a [`SqlValue`] into a Rust type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum TypeError {
    /// The row has no such column.
    #[error("column '{0}' not found")]
    ColumnNotFound(String),

    /// The value is NULL but a non-optional type was requested.
    #[error("unexpected NULL value")]
    UnexpectedNull,

    /// The value has a different type.
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        /// Requested type.
        expected: &'static str,
        /// What the value actually was.
        actual: String,
    },
}

/// A single column value or statement parameter.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum SqlValue {
    /// SQL NULL.
    Null,
    /// BOOLEAN.
    Boolean(bool),
    /// SMALLINT.
    SmallInt(i16),
    /// INTEGER.
    Integer(i32),
    /// BIGINT.
    BigInt(i64),
    /// FLOAT / DOUBLE PRECISION.
    Double(f64),
    /// NUMERIC / DECIMAL.
    #[cfg(feature = "decimal")]
    Decimal(Decimal),
    /// CHAR / VARCHAR / text BLOB.
    Text(String),
    /// Binary BLOB.
    Blob(Bytes),
    /// DATE.
    #[cfg(feature = "chrono")]
    Date(NaiveDate),
    /// TIME.
    #[cfg(feature = "chrono")]
    Time(NaiveTime),
    /// TIMESTAMP.
    #[cfg(feature = "chrono")]
    Timestamp(NaiveDateTime),
}

impl SqlValue {
    /// Whether the value is NULL.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// A short type name, used in conversion errors.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "NULL",
            Self::Boolean(_) => "BOOLEAN",
            Self::SmallInt(_) => "SMALLINT",
            Self::Integer(_) => "INTEGER",
            Self::BigInt(_) => "BIGINT",
            Self::Double(_) => "DOUBLE PRECISION",
            #[cfg(feature = "decimal")]
            Self::Decimal(_) => "DECIMAL",
            Self::Text(_) => "VARCHAR",
            Self::Blob(_) => "BLOB",
            #[cfg(feature = "chrono")]
            Self::Date(_) => "DATE",
            #[cfg(feature = "chrono")]
            Self::Time(_) => "TIME",
            #[cfg(feature = "chrono")]
            Self::Timestamp(_) => "TIMESTAMP",
        }
    }

    fn as_i64(&self) -> Option<i64> {
        match self {
            Self::SmallInt(v) => Some(i64::from(*v)),
            Self::Integer(v) => Some(i64::from(*v)),
            Self::BigInt(v) => Some(*v),
            _ => None,
        }
    }

    fn mismatch(&self, expected: &'static str) -> TypeError {
        if self.is_null() {
            return TypeError::UnexpectedNull;
        }
        TypeError::TypeMismatch {
            expected,
            actual: self.type_name().to_string(),
        }
    }
}

/// Conversion from a [`SqlValue`].
///
/// Integer columns widen to any integer type they fit in; nothing else is
/// coerced.
pub trait FromSql: Sized {
    /// Convert a non-NULL value.
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError>;

    /// Convert a value that may be NULL.
    fn from_sql_nullable(value: &SqlValue) -> Result<Option<Self>, TypeError> {
        if value.is_null() {
            Ok(None)
        } else {
            Self::from_sql(value).map(Some)
        }
    }
}

impl<T: FromSql> FromSql for Option<T> {
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
        T::from_sql_nullable(value)
    }
}

impl FromSql for bool {
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
        match value {
            SqlValue::Boolean(v) => Ok(*v),
            other => Err(other.mismatch("bool")),
        }
    }
}

impl FromSql for i64 {
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
        value.as_i64().ok_or_else(|| value.mismatch("i64"))
    }
}

impl FromSql for i32 {
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
        let wide = value.as_i64().ok_or_else(|| value.mismatch("i32"))?;
        i32::try_from(wide).map_err(|_| TypeError::TypeMismatch {
            expected: "i32",
            actual: format!("{wide} out of range"),
        })
    }
}

impl FromSql for f64 {
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
        match value {
            SqlValue::Double(v) => Ok(*v),
            other => other
                .as_i64()
                .map(|v| v as f64)
                .ok_or_else(|| other.mismatch("f64")),
        }
    }
}

impl FromSql for String {
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
        match value {
            SqlValue::Text(v) => Ok(v.clone()),
            other => Err(other.mismatch("String")),
        }
    }
}

impl FromSql for Bytes {
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
        match value {
            SqlValue::Blob(v) => Ok(v.clone()),
            other => Err(other.mismatch("Bytes")),
        }
    }
}

#[cfg(feature = "decimal")]
impl FromSql for Decimal {
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
        match value {
            SqlValue::Decimal(v) => Ok(*v),
            other => other
                .as_i64()
                .map(Decimal::from)
                .ok_or_else(|| other.mismatch("Decimal")),
        }
    }
}

#[cfg(feature = "chrono")]
impl FromSql for NaiveDate {
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
        match value {
            SqlValue::Date(v) => Ok(*v),
            other => Err(other.mismatch("NaiveDate")),
        }
    }
}

#[cfg(feature = "chrono")]
impl FromSql for NaiveTime {
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
        match value {
            SqlValue::Time(v) => Ok(*v),
            other => Err(other.mismatch("NaiveTime")),
        }
    }
}

#[cfg(feature = "chrono")]
impl FromSql for NaiveDateTime {
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
        match value {
            SqlValue::Timestamp(v) => Ok(*v),
            other => Err(other.mismatch("NaiveDateTime")),
        }
    }
}

macro_rules! impl_from_for_sql_value {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for SqlValue {
                fn from(value: $ty) -> Self {
                    SqlValue::$variant(value)
                }
            }
        )*
    };
}

impl_from_for_sql_value! {
    bool => Boolean,
    i16 => SmallInt,
    i32 => Integer,
    i64 => BigInt,
    f64 => Double,
    String => Text,
    Bytes => Blob,
}

#[cfg(feature = "decimal")]
impl_from_for_sql_value! { Decimal => Decimal }

#[cfg(feature = "chrono")]
impl_from_for_sql_value! {
    NaiveDate => Date,
    NaiveTime => Time,
    NaiveDateTime => Timestamp,
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        SqlValue::Text(value.to_string())
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(SqlValue::Null, Into::into)
    }
}
