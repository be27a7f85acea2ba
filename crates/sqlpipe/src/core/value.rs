//! Driver-native scalar values handed to the pipe-file formatters.
//!
//! Each driver decodes its wire values into [`SqlValue`] and the source
//! dialect's pipe formatter turns them into text. Values never cross a
//! stage boundary in this form; only pipe and final files do.

use std::borrow::Cow;
use std::fmt;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use uuid::Uuid;

/// SQL value decoded from a source driver.
///
/// Uses `Cow` for string and byte data so drivers that can lend their
/// buffers avoid a copy; rows sent across tasks are made `'static` with
/// [`SqlValue::into_owned`].
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue<'a> {
    /// SQL NULL.
    Null,

    /// Boolean value.
    Bool(bool),

    /// 16-bit signed integer.
    I16(i16),

    /// 32-bit signed integer.
    I32(i32),

    /// 64-bit signed integer.
    I64(i64),

    /// Unsigned 64-bit integer (MySQL `BIGINT UNSIGNED`).
    U64(u64),

    /// 32-bit float.
    F32(f32),

    /// 64-bit float.
    F64(f64),

    /// Text. Drivers that only speak text (ODBC, numeric strings) also land here.
    Text(Cow<'a, str>),

    /// Binary data.
    Bytes(Cow<'a, [u8]>),

    /// UUID/GUID value.
    Uuid(Uuid),

    /// Decimal value.
    Decimal(Decimal),

    /// Timestamp without zone.
    DateTime(NaiveDateTime),

    /// Timestamp with zone offset.
    DateTimeOffset(DateTime<FixedOffset>),

    /// Date.
    Date(NaiveDate),

    /// Time of day.
    Time(NaiveTime),

    /// JSON document.
    Json(serde_json::Value),
}

impl<'a> SqlValue<'a> {
    /// Convert to a fully owned value with `'static` lifetime.
    #[must_use]
    pub fn into_owned(self) -> SqlValue<'static> {
        match self {
            SqlValue::Null => SqlValue::Null,
            SqlValue::Bool(v) => SqlValue::Bool(v),
            SqlValue::I16(v) => SqlValue::I16(v),
            SqlValue::I32(v) => SqlValue::I32(v),
            SqlValue::I64(v) => SqlValue::I64(v),
            SqlValue::U64(v) => SqlValue::U64(v),
            SqlValue::F32(v) => SqlValue::F32(v),
            SqlValue::F64(v) => SqlValue::F64(v),
            SqlValue::Text(v) => SqlValue::Text(Cow::Owned(v.into_owned())),
            SqlValue::Bytes(v) => SqlValue::Bytes(Cow::Owned(v.into_owned())),
            SqlValue::Uuid(v) => SqlValue::Uuid(v),
            SqlValue::Decimal(v) => SqlValue::Decimal(v),
            SqlValue::DateTime(v) => SqlValue::DateTime(v),
            SqlValue::DateTimeOffset(v) => SqlValue::DateTimeOffset(v),
            SqlValue::Date(v) => SqlValue::Date(v),
            SqlValue::Time(v) => SqlValue::Time(v),
            SqlValue::Json(v) => SqlValue::Json(v),
        }
    }

    /// Check if this value is NULL.
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// Build an owned text value.
    pub fn text(s: impl Into<String>) -> SqlValue<'static> {
        SqlValue::Text(Cow::Owned(s.into()))
    }

    /// Build an owned byte value.
    pub fn bytes(b: impl Into<Vec<u8>>) -> SqlValue<'static> {
        SqlValue::Bytes(Cow::Owned(b.into()))
    }

    /// Short name of the variant, used in format errors.
    pub fn kind(&self) -> &'static str {
        match self {
            SqlValue::Null => "null",
            SqlValue::Bool(_) => "bool",
            SqlValue::I16(_) => "i16",
            SqlValue::I32(_) => "i32",
            SqlValue::I64(_) => "i64",
            SqlValue::U64(_) => "u64",
            SqlValue::F32(_) => "f32",
            SqlValue::F64(_) => "f64",
            SqlValue::Text(_) => "text",
            SqlValue::Bytes(_) => "bytes",
            SqlValue::Uuid(_) => "uuid",
            SqlValue::Decimal(_) => "decimal",
            SqlValue::DateTime(_) => "datetime",
            SqlValue::DateTimeOffset(_) => "datetimeoffset",
            SqlValue::Date(_) => "date",
            SqlValue::Time(_) => "time",
            SqlValue::Json(_) => "json",
        }
    }
}

impl fmt::Display for SqlValue<'_> {
    /// Debug-oriented rendering used in error messages, not in staged files.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlValue::Null => f.write_str("NULL"),
            SqlValue::Bool(v) => write!(f, "{}", v),
            SqlValue::I16(v) => write!(f, "{}", v),
            SqlValue::I32(v) => write!(f, "{}", v),
            SqlValue::I64(v) => write!(f, "{}", v),
            SqlValue::U64(v) => write!(f, "{}", v),
            SqlValue::F32(v) => write!(f, "{}", v),
            SqlValue::F64(v) => write!(f, "{}", v),
            SqlValue::Text(v) => f.write_str(v),
            SqlValue::Bytes(v) => write!(f, "0x{}", hex::encode(v)),
            SqlValue::Uuid(v) => write!(f, "{}", v),
            SqlValue::Decimal(v) => write!(f, "{}", v),
            SqlValue::DateTime(v) => write!(f, "{}", v),
            SqlValue::DateTimeOffset(v) => write!(f, "{}", v),
            SqlValue::Date(v) => write!(f, "{}", v),
            SqlValue::Time(v) => write!(f, "{}", v),
            SqlValue::Json(v) => write!(f, "{}", v),
        }
    }
}

/// One decoded source row.
pub type Row = Vec<SqlValue<'static>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_into_owned_preserves_value() {
        let s = String::from("abc");
        let borrowed = SqlValue::Text(Cow::Borrowed(s.as_str()));
        let owned: SqlValue<'static> = borrowed.clone().into_owned();
        assert_eq!(borrowed, owned);
    }

    #[test]
    fn test_is_null() {
        assert!(SqlValue::Null.is_null());
        assert!(!SqlValue::I32(0).is_null());
    }

    #[test]
    fn test_display_bytes_as_hex() {
        assert_eq!(SqlValue::bytes(vec![0xde, 0xad]).to_string(), "0xdead");
        assert_eq!(SqlValue::Null.kind(), "null");
    }
}
