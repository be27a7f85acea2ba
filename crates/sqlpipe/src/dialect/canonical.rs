//! Canonical (intermediate) type tags shared by every dialect.
//!
//! Every source column maps to exactly one tag and every tag maps to one
//! target DDL type, so adding an engine needs one mapping in each direction
//! instead of one per engine pair:
//!
//! ```text
//! Source DB   →  CanonicalType  →  Target DB
//!   MSSQL     →     Int32       →   MySQL
//!   Oracle    →     Decimal     →   Snowflake
//! ```
//!
//! Dialect match arms over this enum are exhaustive, so adding a tag fails
//! to compile until every engine has handled it.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::PipeError;

/// Canonical type of a transferred column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CanonicalType {
    // ===== Strings =====
    /// Bounded Unicode string.
    Nvarchar,
    /// Bounded single-byte string.
    Varchar,
    /// Unbounded Unicode text.
    Ntext,
    /// Unbounded single-byte text.
    Text,

    // ===== Numbers =====
    Int16,
    Int32,
    Int64,
    Float32,
    Float64,
    /// Exact decimal; precision and scale travel on the column.
    Decimal,
    /// Fixed-point currency.
    Money,

    // ===== Temporal =====
    /// Wall-clock timestamp with no zone.
    Datetime,
    /// Instant, normalized to UTC when written.
    Datetimetz,
    Date,
    Time,

    // ===== Binary =====
    /// Bounded byte string.
    Varbinary,
    /// Unbounded byte string.
    Blob,

    // ===== Other =====
    Uuid,
    Bool,
    Json,
    Xml,
    /// Bit string.
    Varbit,
}

impl CanonicalType {
    /// Every canonical type, in declaration order.
    pub const ALL: [CanonicalType; 22] = [
        CanonicalType::Nvarchar,
        CanonicalType::Varchar,
        CanonicalType::Ntext,
        CanonicalType::Text,
        CanonicalType::Int16,
        CanonicalType::Int32,
        CanonicalType::Int64,
        CanonicalType::Float32,
        CanonicalType::Float64,
        CanonicalType::Decimal,
        CanonicalType::Money,
        CanonicalType::Datetime,
        CanonicalType::Datetimetz,
        CanonicalType::Date,
        CanonicalType::Time,
        CanonicalType::Varbinary,
        CanonicalType::Blob,
        CanonicalType::Uuid,
        CanonicalType::Bool,
        CanonicalType::Json,
        CanonicalType::Xml,
        CanonicalType::Varbit,
    ];

    /// Tag name as written in configuration and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            CanonicalType::Nvarchar => "nvarchar",
            CanonicalType::Varchar => "varchar",
            CanonicalType::Ntext => "ntext",
            CanonicalType::Text => "text",
            CanonicalType::Int16 => "int16",
            CanonicalType::Int32 => "int32",
            CanonicalType::Int64 => "int64",
            CanonicalType::Float32 => "float32",
            CanonicalType::Float64 => "float64",
            CanonicalType::Decimal => "decimal",
            CanonicalType::Money => "money",
            CanonicalType::Datetime => "datetime",
            CanonicalType::Datetimetz => "datetimetz",
            CanonicalType::Date => "date",
            CanonicalType::Time => "time",
            CanonicalType::Varbinary => "varbinary",
            CanonicalType::Blob => "blob",
            CanonicalType::Uuid => "uuid",
            CanonicalType::Bool => "bool",
            CanonicalType::Json => "json",
            CanonicalType::Xml => "xml",
            CanonicalType::Varbit => "varbit",
        }
    }

    /// Whether values are character data.
    pub fn is_string(&self) -> bool {
        matches!(
            self,
            CanonicalType::Nvarchar
                | CanonicalType::Varchar
                | CanonicalType::Ntext
                | CanonicalType::Text
        )
    }

    /// Whether values are numbers written without quoting in SQL.
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            CanonicalType::Int16
                | CanonicalType::Int32
                | CanonicalType::Int64
                | CanonicalType::Float32
                | CanonicalType::Float64
                | CanonicalType::Decimal
                | CanonicalType::Money
        )
    }

    /// Whether values are dates, times or timestamps.
    pub fn is_temporal(&self) -> bool {
        matches!(
            self,
            CanonicalType::Datetime
                | CanonicalType::Datetimetz
                | CanonicalType::Date
                | CanonicalType::Time
        )
    }

    /// Whether values are byte strings.
    pub fn is_binary(&self) -> bool {
        matches!(self, CanonicalType::Varbinary | CanonicalType::Blob)
    }
}

impl fmt::Display for CanonicalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CanonicalType {
    type Err = PipeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_lowercase();
        CanonicalType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == lower)
            .ok_or_else(|| PipeError::Config(format!("Unknown canonical type: '{}'", s)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_has_every_tag_once() {
        let mut names: Vec<&str> = CanonicalType::ALL.iter().map(|t| t.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), 22);
    }

    #[test]
    fn test_parse_display_agree() {
        for t in CanonicalType::ALL {
            assert_eq!(t.to_string().parse::<CanonicalType>().unwrap(), t);
        }
        assert_eq!(
            "DateTimeTZ".parse::<CanonicalType>().unwrap(),
            CanonicalType::Datetimetz
        );
        assert!("interval".parse::<CanonicalType>().is_err());
    }

    #[test]
    fn test_categories() {
        assert!(CanonicalType::Ntext.is_string());
        assert!(CanonicalType::Money.is_numeric());
        assert!(!CanonicalType::Bool.is_numeric());
        assert!(CanonicalType::Time.is_temporal());
        assert!(CanonicalType::Blob.is_binary());
        assert!(!CanonicalType::Uuid.is_binary());
    }
}
