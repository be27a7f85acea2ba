//! Column descriptors.
//!
//! [`CursorColumn`] is what a driver reports about a result set column;
//! [`ColumnInfo`] is the dialect-neutral descriptor built once per transfer
//! that flows unchanged through every later stage.

use serde::{Deserialize, Serialize};

use crate::dialect::CanonicalType;

/// Dialect-neutral column descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    /// Column name as reported by the source.
    pub name: String,
    /// Canonical type tag.
    pub canonical: CanonicalType,
    /// Length in characters or bytes, when known.
    pub length: Option<i64>,
    /// `(precision, scale)`, present only when both are known.
    pub decimal: Option<(i64, i64)>,
    /// Set only when the source is a table reference with a primary key.
    pub is_primary_key: bool,
}

impl ColumnInfo {
    /// Create a descriptor with no length or precision.
    pub fn new(name: impl Into<String>, canonical: CanonicalType) -> Self {
        Self {
            name: name.into(),
            canonical,
            length: None,
            decimal: None,
            is_primary_key: false,
        }
    }

    /// Set the length.
    #[must_use]
    pub fn with_length(mut self, length: i64) -> Self {
        self.length = Some(length);
        self
    }

    /// Set precision and scale.
    #[must_use]
    pub fn with_decimal(mut self, precision: i64, scale: i64) -> Self {
        self.decimal = Some((precision, scale));
        self
    }

    /// Mark as part of the primary key.
    #[must_use]
    pub fn primary_key(mut self) -> Self {
        self.is_primary_key = true;
        self
    }

    /// Precision, if known.
    pub fn precision(&self) -> Option<i64> {
        self.decimal.map(|(p, _)| p)
    }

    /// Scale, if known.
    pub fn scale(&self) -> Option<i64> {
        self.decimal.map(|(_, s)| s)
    }
}

/// Result-set column metadata reported by a driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CursorColumn {
    /// Column name.
    pub name: String,
    /// Driver type name, uppercase (e.g. `INT4`, `NVARCHAR`, `TIMESTAMP_NTZ`).
    pub type_name: String,
    /// Length, when the driver reports one.
    pub length: Option<i64>,
    /// `(precision, scale)`, when the driver reports both.
    pub decimal: Option<(i64, i64)>,
}

impl CursorColumn {
    /// Create column metadata with only a name and type.
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            length: None,
            decimal: None,
        }
    }
}

/// Names of the primary-key columns, in order.
pub fn primary_key_names(columns: &[ColumnInfo]) -> Vec<&str> {
    columns
        .iter()
        .filter(|c| c.is_primary_key)
        .map(|c| c.name.as_str())
        .collect()
}

/// Find a column by name, ignoring case.
pub fn find_column<'a>(columns: &'a [ColumnInfo], name: &str) -> Option<&'a ColumnInfo> {
    columns.iter().find(|c| c.name.eq_ignore_ascii_case(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_builder() {
        let col = ColumnInfo::new("amount", CanonicalType::Decimal)
            .with_decimal(10, 2)
            .primary_key();
        assert_eq!(col.precision(), Some(10));
        assert_eq!(col.scale(), Some(2));
        assert!(col.is_primary_key);
        assert_eq!(col.length, None);
    }

    #[test]
    fn test_primary_key_names_keeps_order() {
        let cols = vec![
            ColumnInfo::new("b", CanonicalType::Int32).primary_key(),
            ColumnInfo::new("x", CanonicalType::Text),
            ColumnInfo::new("a", CanonicalType::Int32).primary_key(),
        ];
        assert_eq!(primary_key_names(&cols), vec!["b", "a"]);
    }

    #[test]
    fn test_find_column_is_case_insensitive() {
        let cols = vec![ColumnInfo::new("Updated_At", CanonicalType::Datetime)];
        assert!(find_column(&cols, "updated_at").is_some());
        assert!(find_column(&cols, "created_at").is_none());
    }
}
