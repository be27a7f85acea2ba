//! Identifier validation, quoting and qualification.
//!
//! SQL identifiers (schema, table and column names) cannot be bound as
//! parameters, so every generated statement builds them from text. This
//! module keeps that in one place:
//! 1. Validate identifiers for suspicious patterns (null bytes, excessive length)
//! 2. Quote only when the name is not a plain identifier or is reserved
//! 3. Double the closing quote character inside quoted names

use crate::core::traits::Dialect;
use crate::error::{PipeError, Result};

/// Maximum identifier length (conservative limit across databases).
const MAX_IDENTIFIER_LENGTH: usize = 128;

/// Validate an identifier for security issues.
///
/// Rejects empty identifiers, null bytes and names longer than 128 bytes.
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(PipeError::Config("Identifier cannot be empty".to_string()));
    }

    if name.contains('\0') {
        return Err(PipeError::Config(format!(
            "SECURITY: Identifier contains null byte (possible injection attempt): {:?}",
            name
        )));
    }

    if name.len() > MAX_IDENTIFIER_LENGTH {
        return Err(PipeError::Config(format!(
            "SECURITY: Identifier exceeds maximum length of {} bytes (got {} bytes): {:?}",
            MAX_IDENTIFIER_LENGTH,
            name.len(),
            name
        )));
    }

    Ok(())
}

/// Wrap `name` in the quote pair, doubling embedded closing quotes.
pub fn quote_with(name: &str, open: char, close: char) -> String {
    let mut out = String::with_capacity(name.len() + 2);
    out.push(open);
    for c in name.chars() {
        if c == close {
            out.push(close);
        }
        out.push(c);
    }
    out.push(close);
    out
}

/// Reverse [`quote_with`]. Names that are not quoted come back unchanged.
pub fn unquote_with(quoted: &str, open: char, close: char) -> String {
    let inner = match quoted
        .strip_prefix(open)
        .and_then(|rest| rest.strip_suffix(close))
    {
        Some(inner) => inner,
        None => return quoted.to_string(),
    };

    let doubled: String = [close, close].iter().collect();
    inner.replace(&doubled, &close.to_string())
}

/// Whether `name` must be quoted for `dialect`.
///
/// Plain identifiers start with a letter, `_`, `@` or `#` and continue with
/// letters, digits or `_`; anything else, and every reserved keyword, is
/// quoted.
pub fn needs_escaping(name: &str, dialect: &dyn Dialect) -> bool {
    let mut chars = name.chars();
    let first = match chars.next() {
        Some(c) => c,
        None => return false,
    };

    if dialect.is_reserved_keyword(name) {
        return true;
    }

    if !(first.is_alphabetic() || matches!(first, '_' | '@' | '#')) {
        return true;
    }

    chars.any(|c| !(c.is_alphanumeric() || c == '_'))
}

/// Quote `name` only when [`needs_escaping`] says so.
pub fn escape_if_needed(name: &str, dialect: &dyn Dialect) -> String {
    if needs_escaping(name, dialect) {
        dialect.escape(name)
    } else {
        name.to_string()
    }
}

/// `schema.table` for dialects that require a schema, otherwise `table`.
///
/// Both parts go through [`escape_if_needed`] when `escape` is set.
pub fn schema_period_table(schema: &str, table: &str, dialect: &dyn Dialect, escape: bool) -> String {
    let (schema, table) = if escape {
        (
            escape_if_needed(schema, dialect),
            escape_if_needed(table, dialect),
        )
    } else {
        (schema.to_string(), table.to_string())
    };

    if dialect.schema_required() && !schema.is_empty() {
        format!("{}.{}", schema, table)
    } else {
        table
    }
}

/// Comma-joined column list, each escaped if needed.
pub fn column_list<'a, I>(names: I, dialect: &dyn Dialect) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    names
        .into_iter()
        .map(|n| escape_if_needed(n, dialect))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Quote a SQL string literal, doubling single quotes.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::DialectImpl;

    #[test]
    fn test_validate_identifier() {
        assert!(validate_identifier("users").is_ok());
        assert!(validate_identifier("").is_err());
        assert!(validate_identifier("bad\0name").is_err());
        assert!(validate_identifier(&"a".repeat(129)).is_err());
    }

    #[test]
    fn test_quote_roundtrip_with_embedded_quotes() {
        for (open, close) in [('"', '"'), ('`', '`'), ('[', ']')] {
            for name in ["users", "we\"ird", "back`tick", "br]acket", "with space"] {
                let quoted = quote_with(name, open, close);
                assert_eq!(unquote_with(&quoted, open, close), name);
            }
        }
        assert_eq!(quote_with("a]b", '[', ']'), "[a]]b]");
    }

    #[test]
    fn test_needs_escaping_rules() {
        let pg = DialectImpl::from_db_type("postgresql").unwrap();
        assert!(!needs_escaping("users", &pg));
        assert!(!needs_escaping("_tmp1", &pg));
        assert!(needs_escaping("1abc", &pg));
        assert!(needs_escaping("has space", &pg));
        assert!(needs_escaping("dash-ed", &pg));
        assert!(needs_escaping("select", &pg));
        assert!(!needs_escaping("", &pg));
    }

    #[test]
    fn test_reserved_words_always_escaped() {
        let mssql = DialectImpl::from_db_type("mssql").unwrap();
        assert_eq!(escape_if_needed("order", &mssql), "[order]");
        assert_eq!(escape_if_needed("orders", &mssql), "orders");
    }

    #[test]
    fn test_schema_period_table() {
        let pg = DialectImpl::from_db_type("postgresql").unwrap();
        let mysql = DialectImpl::from_db_type("mysql").unwrap();
        assert_eq!(schema_period_table("public", "t", &pg, true), "public.t");
        assert_eq!(
            schema_period_table("public", "my table", &pg, true),
            "public.\"my table\""
        );
        assert_eq!(schema_period_table("db", "t", &mysql, true), "t");
    }

    #[test]
    fn test_quote_literal() {
        assert_eq!(quote_literal("it's"), "'it''s'");
    }
}
