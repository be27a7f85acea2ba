//! PostgreSQL SQL dialect (Strategy pattern).
//!
//! Type maps, DDL text, catalog queries and value formatters for PostgreSQL.
//! Redshift reuses the catalog queries and literal builders here.

use chrono::NaiveTime;

use crate::core::identifier::{quote_literal, schema_period_table};
use crate::core::schema::ColumnInfo;
use crate::core::traits::{BatchLimit, Dialect};
use crate::core::value::SqlValue;
use crate::dialect::format;
use crate::dialect::CanonicalType;
use crate::error::Result;

/// Reserved words that are always quoted.
const RESERVED_KEYWORDS: &[&str] = &[
    "all", "analyse", "analyze", "and", "any", "array", "as", "asc", "asymmetric", "both",
    "case", "cast", "check", "collate", "column", "constraint", "create", "current_catalog",
    "current_date", "current_role", "current_time", "current_timestamp", "current_user",
    "default", "desc", "distinct", "do", "else", "end", "except", "false", "for", "foreign",
    "from", "full", "grant", "group", "having", "in", "initially", "inner", "intersect", "into",
    "is", "join", "leading", "left", "like", "limit", "localtime", "localtimestamp", "natural",
    "not", "null", "offset", "on", "only", "or", "order", "outer", "overlaps", "placing",
    "primary", "references", "returning", "right", "select", "session_user", "similar", "some",
    "symmetric", "table", "then", "to", "trailing", "true", "union", "unique", "user", "using",
    "variadic", "verbose", "when", "where", "window", "with",
];

/// Whether `name` is a PostgreSQL reserved word (case-insensitive).
pub(crate) fn is_pg_reserved(name: &str) -> bool {
    RESERVED_KEYWORDS
        .binary_search(&name.to_lowercase().as_str())
        .is_ok()
}

/// PostgreSQL dialect implementation.
#[derive(Debug, Clone, Default)]
pub struct PostgresDialect;

impl PostgresDialect {
    /// Create a new PostgreSQL dialect instance.
    pub fn new() -> Self {
        Self
    }
}

/// Wire type names (uppercase) shared by PostgreSQL and Redshift.
pub(crate) fn pg_driver_type_to_canonical(native: &str) -> Option<CanonicalType> {
    use CanonicalType::*;
    let canonical = match native {
        "VARCHAR" | "BPCHAR" | "NAME" => Nvarchar,
        "TEXT" => Ntext,
        "INT8" => Int64,
        "INT4" => Int32,
        "INT2" => Int16,
        "FLOAT8" => Float64,
        "FLOAT4" => Float32,
        "NUMERIC" => Decimal,
        "MONEY" => Money,
        "TIMESTAMP" => Datetime,
        "TIMESTAMPTZ" => Datetimetz,
        "DATE" => Date,
        "TIME" => Time,
        "BYTEA" => Blob,
        "UUID" => Uuid,
        "BOOL" => Bool,
        "JSON" | "JSONB" => Json,
        "XML" => Xml,
        "BIT" | "VARBIT" => Varbit,
        // Rendered as text on the way out
        "INTERVAL" | "BOX" | "CIRCLE" | "LINE" | "PATH" | "POINT" | "POLYGON" | "LSEG"
        | "INET" | "MACADDR" | "MACADDR8" | "CIDR" | "TIMETZ" | "TSVECTOR" | "TSQUERY"
        | "TXID_SNAPSHOT" | "PG_LSN" | "PG_SNAPSHOT" => Nvarchar,
        _ => return None,
    };
    Some(canonical)
}

/// `information_schema.columns.data_type` names shared by PostgreSQL and Redshift.
pub(crate) fn pg_db_type_to_canonical(catalog: &str) -> Option<CanonicalType> {
    use CanonicalType::*;
    let canonical = match catalog {
        "character varying" | "character" | "name" => Nvarchar,
        "text" => Ntext,
        "bigint" => Int64,
        "integer" => Int32,
        "smallint" => Int16,
        "double precision" => Float64,
        "real" => Float32,
        "numeric" => Decimal,
        "money" => Money,
        "timestamp without time zone" => Datetime,
        "timestamp with time zone" => Datetimetz,
        "date" => Date,
        "time without time zone" => Time,
        "bytea" => Blob,
        "uuid" => Uuid,
        "boolean" => Bool,
        "json" | "jsonb" => Json,
        "xml" => Xml,
        "bit" | "bit varying" => Varbit,
        "interval" | "time with time zone" | "box" | "circle" | "line" | "path" | "point"
        | "polygon" | "lseg" | "inet" | "macaddr" | "cidr" | "tsvector" | "tsquery"
        | "txid_snapshot" | "pg_lsn" | "pg_snapshot" | "USER-DEFINED" | "ARRAY" => Nvarchar,
        _ => return None,
    };
    Some(canonical)
}

/// Pipe formatter shared by the PostgreSQL wire protocol drivers.
pub(crate) fn pg_pipe_value(canonical: CanonicalType, value: &SqlValue<'_>) -> Result<String> {
    use CanonicalType::*;
    match canonical {
        Nvarchar | Varchar | Ntext | Text | Xml => format::text(canonical, value),
        Int16 | Int32 | Int64 => format::integer(canonical, value),
        Float32 | Float64 => format::float(canonical, value),
        Decimal | Money => format::decimal(canonical, value),
        Datetime => format::timestamp(canonical, value),
        Datetimetz => format::timestamptz(canonical, value),
        Date => format::date(canonical, value),
        Time => format::time(canonical, value),
        Varbinary | Blob => format::hex(canonical, value),
        Uuid => format::uuid(canonical, value),
        Bool => format::boolean(canonical, value),
        Json => format::json(canonical, value),
        Varbit => format::bits(canonical, value),
    }
}

/// `'YYYY-MM-DD HH:MM:SS.ffffff'`, with `+00` when the value is an instant.
pub(crate) fn pg_timestamp_literal(canonical: CanonicalType, value: &str) -> Result<String> {
    let parsed = format::parse_timestamp(canonical, value)?;
    Ok(match canonical {
        CanonicalType::Datetimetz => {
            quote_literal(&format!("{}+00", format::datetime_trimmed(&format::utc(&parsed), 6)))
        }
        _ => quote_literal(&format::datetime_trimmed(&format::wall_clock(&parsed), 6)),
    })
}

/// `'YYYY-MM-DD'`
pub(crate) fn pg_date_literal(canonical: CanonicalType, value: &str) -> Result<String> {
    let d = format::parse_date(canonical, value)?;
    Ok(quote_literal(&d.format("%Y-%m-%d").to_string()))
}

/// `'HH:MM:SS.ffffff'`
pub(crate) fn pg_time_literal(canonical: CanonicalType, value: &str) -> Result<String> {
    let t: NaiveTime = format::parse_time(canonical, value)?;
    Ok(quote_literal(&format::time_trimmed(&t, 6)))
}

/// Catalog query for `(name, type, precision, scale, length, is_primary)`.
pub(crate) fn pg_column_infos_sql(schema: &str, table: &str) -> String {
    let schema = schema.replace('\'', "''");
    let table = table.replace('\'', "''");
    format!(
        "WITH PrimaryKeys AS ( \
SELECT kcu.column_name \
FROM information_schema.key_column_usage AS kcu \
JOIN information_schema.table_constraints AS tc \
ON kcu.constraint_name = tc.constraint_name \
AND kcu.table_name = tc.table_name \
AND kcu.table_schema = tc.table_schema \
WHERE tc.constraint_type = 'PRIMARY KEY' \
AND kcu.table_schema = '{schema}' \
AND kcu.table_name = '{table}' \
) \
SELECT columns.column_name::text AS col_name, \
columns.data_type::text AS col_type, \
coalesce(columns.numeric_precision::int, -1) AS col_precision, \
coalesce(columns.numeric_scale::int, -1) AS col_scale, \
coalesce(columns.character_maximum_length::int, -1) AS col_length, \
CASE WHEN pk.column_name IS NOT NULL THEN true ELSE false END AS col_is_primary \
FROM information_schema.columns \
LEFT JOIN PrimaryKeys pk ON columns.column_name = pk.column_name \
WHERE columns.table_schema = '{schema}' \
AND columns.table_name = '{table}' \
ORDER BY columns.ordinal_position"
    )
}

/// Catalog query for primary-key column names.
pub(crate) fn pg_primary_keys_sql(dialect: &dyn Dialect, schema: &str, table: &str) -> String {
    let regclass = schema_period_table(schema, table, dialect, true).replace('\'', "''");
    format!(
        "SELECT att.attname::text AS column_name \
FROM pg_index idx \
JOIN pg_attribute att ON att.attnum = ANY(idx.indkey) AND att.attrelid = idx.indrelid \
JOIN pg_class cls ON cls.oid = idx.indrelid \
WHERE idx.indisprimary = TRUE \
AND cls.oid = '{}'::regclass \
ORDER BY array_position(idx.indkey::int2[], att.attnum)",
        regclass
    )
}

impl Dialect for PostgresDialect {
    fn name(&self) -> &'static str {
        "postgresql"
    }

    fn quote_chars(&self) -> (char, char) {
        ('"', '"')
    }

    fn is_reserved_keyword(&self, name: &str) -> bool {
        is_pg_reserved(name)
    }

    fn schema_required(&self) -> bool {
        true
    }

    fn driver_type_to_canonical(&self, native: &str) -> Option<CanonicalType> {
        pg_driver_type_to_canonical(native)
    }

    fn db_type_to_canonical(&self, catalog: &str) -> Option<CanonicalType> {
        pg_db_type_to_canonical(catalog)
    }

    fn canonical_to_ddl(&self, column: &ColumnInfo) -> Result<String> {
        use CanonicalType::*;
        let ddl = match column.canonical {
            Nvarchar | Varchar | Ntext | Text => "text".to_string(),
            Int64 => "bigint".to_string(),
            Int32 => "integer".to_string(),
            Int16 => "smallint".to_string(),
            Float64 => "double precision".to_string(),
            Float32 => "real".to_string(),
            Decimal => match column.decimal {
                Some((p, s)) if s > 0 && s <= 1000 && p > 0 && p <= 1000 && p > s => {
                    format!("decimal({},{})", p, s)
                }
                _ => "decimal".to_string(),
            },
            Money => "money".to_string(),
            Datetime => "timestamp".to_string(),
            Datetimetz => "timestamptz".to_string(),
            Date => "date".to_string(),
            Time => "time".to_string(),
            Varbinary | Blob => "bytea".to_string(),
            Uuid => "uuid".to_string(),
            Bool => "boolean".to_string(),
            Json => "jsonb".to_string(),
            Xml => "xml".to_string(),
            Varbit => "varbit".to_string(),
        };
        Ok(ddl)
    }

    fn pipe_value(&self, canonical: CanonicalType, value: &SqlValue<'_>) -> Result<String> {
        pg_pipe_value(canonical, value)
    }

    fn final_value(&self, canonical: CanonicalType, value: &str) -> Result<String> {
        use CanonicalType::*;
        match canonical {
            Date => Ok(format::parse_date(canonical, value)?
                .format("%Y-%m-%d")
                .to_string()),
            Time => Ok(format::time_trimmed(&format::parse_time(canonical, value)?, 6)),
            Varbinary | Blob => Ok(format!("\\x{}", value)),
            Nvarchar | Varchar | Ntext | Text | Int16 | Int32 | Int64 | Float32 | Float64
            | Decimal | Money | Datetime | Datetimetz | Uuid | Bool | Json | Xml | Varbit => {
                Ok(value.to_string())
            }
        }
    }

    fn sql_value(&self, canonical: CanonicalType, value: &str) -> Result<String> {
        use CanonicalType::*;
        match canonical {
            Nvarchar | Varchar | Ntext | Text | Json | Xml | Uuid => Ok(quote_literal(value)),
            Int16 | Int32 | Int64 | Float32 | Float64 | Decimal => Ok(value.to_string()),
            Money => Ok(quote_literal(value)),
            Datetime | Datetimetz => pg_timestamp_literal(canonical, value),
            Date => pg_date_literal(canonical, value),
            Time => pg_time_literal(canonical, value),
            Varbinary | Blob => Ok(format!("'\\x{}'", value)),
            Bool => Ok(format::parse_bool(canonical, value)?.to_string()),
            Varbit => Ok(format!("B'{}'", value)),
        }
    }

    fn insert_batch_limit(&self) -> BatchLimit {
        BatchLimit::Chars(10_000_000)
    }

    fn primary_keys_sql(&self, schema: &str, table: &str) -> String {
        pg_primary_keys_sql(self, schema, table)
    }

    fn column_infos_sql(&self, schema: &str, table: &str) -> String {
        pg_column_infos_sql(schema, table)
    }

    fn is_table_not_found_error(&self, message: &str) -> bool {
        message.contains("does not exist")
    }

    fn as_dyn(&self) -> &dyn Dialect {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::identifier::escape_if_needed;

    #[test]
    fn test_keyword_list_is_sorted() {
        let mut sorted = RESERVED_KEYWORDS.to_vec();
        sorted.sort_unstable();
        assert_eq!(sorted, RESERVED_KEYWORDS);
        assert!(is_pg_reserved("SELECT"));
        assert!(!is_pg_reserved("users"));
    }

    #[test]
    fn test_type_maps() {
        let d = PostgresDialect::new();
        assert_eq!(d.driver_type_to_canonical("TIMESTAMPTZ"), Some(CanonicalType::Datetimetz));
        assert_eq!(d.driver_type_to_canonical("INET"), Some(CanonicalType::Nvarchar));
        assert_eq!(d.driver_type_to_canonical("HSTORE"), None);
        assert_eq!(d.db_type_to_canonical("bit varying"), Some(CanonicalType::Varbit));
    }

    #[test]
    fn test_ddl_identity_over_stable_subset() {
        let d = PostgresDialect::new();
        for t in ["bigint", "integer", "smallint", "double precision", "real", "date", "uuid", "boolean", "xml", "bytea", "money"] {
            let canonical = d.db_type_to_canonical(t).unwrap();
            let ddl = d.canonical_to_ddl(&ColumnInfo::new("c", canonical)).unwrap();
            assert_eq!(ddl, t);
        }
    }

    #[test]
    fn test_decimal_ddl_needs_valid_precision_and_scale() {
        let d = PostgresDialect::new();
        let ok = ColumnInfo::new("c", CanonicalType::Decimal).with_decimal(12, 2);
        assert_eq!(d.canonical_to_ddl(&ok).unwrap(), "decimal(12,2)");
        let bad = ColumnInfo::new("c", CanonicalType::Decimal).with_decimal(2, 2);
        assert_eq!(d.canonical_to_ddl(&bad).unwrap(), "decimal");
    }

    #[test]
    fn test_sql_literals() {
        let d = PostgresDialect::new();
        assert_eq!(d.sql_value(CanonicalType::Text, "it's").unwrap(), "'it''s'");
        assert_eq!(
            d.sql_value(CanonicalType::Datetime, "2024-06-15T12:34:56.789Z").unwrap(),
            "'2024-06-15 12:34:56.789'"
        );
        assert_eq!(
            d.sql_value(CanonicalType::Datetimetz, "2024-01-01T00:00:00Z").unwrap(),
            "'2024-01-01 00:00:00+00'"
        );
        assert_eq!(
            d.sql_value(CanonicalType::Time, "0000-01-01T08:30:00Z").unwrap(),
            "'08:30:00'"
        );
        assert_eq!(d.sql_value(CanonicalType::Blob, "dead").unwrap(), "'\\xdead'");
        assert_eq!(d.sql_value(CanonicalType::Varbit, "101").unwrap(), "B'101'");
    }

    #[test]
    fn test_primary_keys_sql_escapes_table() {
        let d = PostgresDialect::new();
        let sql = d.primary_keys_sql("public", "order");
        assert!(sql.contains("'public.\"order\"'::regclass"));
        assert_eq!(escape_if_needed("order", &d), "\"order\"");
    }
}
