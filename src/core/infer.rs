// Bounded-sample column type inference over the INTEGER -> REAL -> TEXT lattice.
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::core::value::{Row, Scalar};

pub const DEFAULT_SAMPLE_ROWS: usize = 100;

static INTEGER_LITERAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^-?[0-9]+$").expect("integer literal pattern"));
static REAL_LITERAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^-?[0-9]*\.[0-9]+$").expect("real literal pattern"));

/// Storage type of a column. Variant order is the widening order.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ColumnType {
    Integer,
    Real,
    Text,
}

impl ColumnType {
    pub fn as_sql(self) -> &'static str {
        match self {
            ColumnType::Integer => "INTEGER",
            ColumnType::Real => "REAL",
            ColumnType::Text => "TEXT",
        }
    }

    /// Least upper bound of two types on the lattice.
    pub fn widen(self, other: ColumnType) -> ColumnType {
        self.max(other)
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

/// Classify a single literal. Returns `None` for empty input, which carries
/// no evidence either way.
pub fn classify_literal(value: &str) -> Option<ColumnType> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if INTEGER_LITERAL.is_match(value) {
        Some(ColumnType::Integer)
    } else if REAL_LITERAL.is_match(value) {
        Some(ColumnType::Real)
    } else {
        Some(ColumnType::Text)
    }
}

/// Classify a cell by its literal form, so typed cells and text cells that
/// print the same way are treated the same.
pub fn classify(value: &Scalar) -> Option<ColumnType> {
    match value {
        Scalar::Null => None,
        Scalar::Integer(_) => Some(ColumnType::Integer),
        Scalar::Real(real) if real.is_finite() => classify_literal(&real.to_string()),
        Scalar::Real(_) => Some(ColumnType::Text),
        Scalar::Text(text) => classify_literal(text),
    }
}

/// Assign one type per column from the sampled rows. Columns with no
/// non-empty value default to TEXT.
pub fn infer_column_types(width: usize, sample: &[Row]) -> Vec<ColumnType> {
    (0..width)
        .map(|col| {
            let mut seen: Option<ColumnType> = None;
            for row in sample {
                let Some(kind) = row.get(col).and_then(classify) else {
                    continue;
                };
                let widened = seen.map_or(kind, |current| current.widen(kind));
                seen = Some(widened);
                if widened == ColumnType::Text {
                    break;
                }
            }
            seen.unwrap_or(ColumnType::Text)
        })
        .collect()
}
