// Dynamically typed cell values shared by sources, the loader, and query results.
use std::fmt;

use rusqlite::ToSql;
use rusqlite::types::{ToSqlOutput, ValueRef};
use serde::{Serialize, Serializer};

/// One cell. `Null` is an absent value; empty text is a present but empty value.
#[derive(Clone, Debug, PartialEq)]
pub enum Scalar {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

pub type Row = Vec<Scalar>;

impl Scalar {
    pub fn text(value: impl Into<String>) -> Self {
        Scalar::Text(value.into())
    }

    pub fn empty() -> Self {
        Scalar::Text(String::new())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Scalar::Null)
    }

    pub(crate) fn from_sql(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null => Scalar::Null,
            ValueRef::Integer(value) => Scalar::Integer(value),
            ValueRef::Real(value) => Scalar::Real(value),
            ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
                Scalar::Text(String::from_utf8_lossy(bytes).into_owned())
            }
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Null => Ok(()),
            Scalar::Integer(value) => write!(f, "{value}"),
            Scalar::Real(value) => write!(f, "{value}"),
            Scalar::Text(value) => f.write_str(value),
        }
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Scalar::Text(value.to_string())
    }
}

impl From<String> for Scalar {
    fn from(value: String) -> Self {
        Scalar::Text(value)
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Scalar::Integer(value)
    }
}

impl From<f64> for Scalar {
    fn from(value: f64) -> Self {
        Scalar::Real(value)
    }
}

impl ToSql for Scalar {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Scalar::Null => ToSqlOutput::Borrowed(ValueRef::Null),
            Scalar::Integer(value) => ToSqlOutput::Borrowed(ValueRef::Integer(*value)),
            Scalar::Real(value) => ToSqlOutput::Borrowed(ValueRef::Real(*value)),
            Scalar::Text(value) => ToSqlOutput::Borrowed(ValueRef::Text(value.as_bytes())),
        })
    }
}

impl Serialize for Scalar {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Scalar::Null => serializer.serialize_unit(),
            Scalar::Integer(value) => serializer.serialize_i64(*value),
            Scalar::Real(value) => serializer.serialize_f64(*value),
            Scalar::Text(value) => serializer.serialize_str(value),
        }
    }
}

/// Pad with empty text or truncate so the row has exactly `width` cells.
pub fn fit_row(mut row: Row, width: usize) -> Row {
    if row.len() != width {
        row.resize(width, Scalar::empty());
    }
    row
}
