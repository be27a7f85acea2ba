//! Redshift SQL dialect.
//!
//! Shares keywords, wire type names and literal builders with PostgreSQL.
//! DDL differs: Redshift has no uuid, bytea, xml or bit string columns, and
//! caps numeric precision at 38.

use crate::core::identifier::quote_literal;
use crate::core::schema::ColumnInfo;
use crate::core::traits::{BatchLimit, Dialect};
use crate::core::value::SqlValue;
use crate::dialect::format;
use crate::dialect::CanonicalType;
use crate::drivers::postgres::{
    is_pg_reserved, pg_column_infos_sql, pg_date_literal, pg_db_type_to_canonical,
    pg_driver_type_to_canonical, pg_pipe_value, pg_time_literal, pg_timestamp_literal,
};
use crate::error::Result;

/// Largest DECIMAL precision Redshift accepts.
const MAX_DECIMAL_PRECISION: i64 = 38;

/// Redshift dialect implementation.
#[derive(Debug, Clone, Default)]
pub struct RedshiftDialect;

impl RedshiftDialect {
    /// Create a new Redshift dialect instance.
    pub fn new() -> Self {
        Self
    }
}

impl Dialect for RedshiftDialect {
    fn name(&self) -> &'static str {
        "redshift"
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
        match native {
            "SUPER" => Some(CanonicalType::Json),
            "VARBYTE" => Some(CanonicalType::Varbinary),
            "GEOMETRY" | "GEOGRAPHY" | "HLLSKETCH" => Some(CanonicalType::Nvarchar),
            other => pg_driver_type_to_canonical(other),
        }
    }

    fn db_type_to_canonical(&self, catalog: &str) -> Option<CanonicalType> {
        match catalog {
            "super" => Some(CanonicalType::Json),
            "binary varying" | "varbyte" => Some(CanonicalType::Varbinary),
            "geometry" | "geography" | "hllsketch" => Some(CanonicalType::Nvarchar),
            other => pg_db_type_to_canonical(other),
        }
    }

    fn canonical_to_ddl(&self, column: &ColumnInfo) -> Result<String> {
        use CanonicalType::*;
        let ddl = match column.canonical {
            Nvarchar | Varchar | Ntext | Text | Json => "NVARCHAR(MAX)".to_string(),
            Int64 => "BIGINT".to_string(),
            Int32 => "INT".to_string(),
            Int16 => "SMALLINT".to_string(),
            Float64 => "DOUBLE PRECISION".to_string(),
            Float32 => "REAL".to_string(),
            Decimal => match column.decimal {
                Some((p, s)) if p > 0 && p <= MAX_DECIMAL_PRECISION && s >= 0 && s <= p => {
                    format!("DECIMAL({},{})", p, s)
                }
                _ => "DOUBLE PRECISION".to_string(),
            },
            Money => "DECIMAL(19,4)".to_string(),
            Datetime => "TIMESTAMP".to_string(),
            Datetimetz => "TIMESTAMPTZ".to_string(),
            Date => "DATE".to_string(),
            Time => "TIME".to_string(),
            Varbinary | Blob | Uuid | Xml | Varbit => "VARCHAR(MAX)".to_string(),
            Bool => "BOOLEAN".to_string(),
        };
        Ok(ddl)
    }

    fn pipe_value(&self, canonical: CanonicalType, value: &SqlValue<'_>) -> Result<String> {
        pg_pipe_value(canonical, value)
    }

    fn final_value(&self, _canonical: CanonicalType, value: &str) -> Result<String> {
        Ok(value.to_string())
    }

    fn sql_value(&self, canonical: CanonicalType, value: &str) -> Result<String> {
        use CanonicalType::*;
        match canonical {
            Nvarchar | Varchar | Ntext | Text | Json | Xml | Uuid | Varbinary | Blob | Varbit => {
                Ok(quote_literal(value))
            }
            Int16 | Int32 | Int64 | Float32 | Float64 | Decimal | Money => Ok(value.to_string()),
            Datetime | Datetimetz => pg_timestamp_literal(canonical, value),
            Date => pg_date_literal(canonical, value),
            Time => pg_time_literal(canonical, value),
            Bool => Ok(format::parse_bool(canonical, value)?.to_string()),
        }
    }

    fn insert_batch_limit(&self) -> BatchLimit {
        BatchLimit::Chars(10_000_000)
    }

    fn primary_keys_sql(&self, schema: &str, table: &str) -> String {
        // Redshift has no array_position, so read key order from the catalog views
        let schema = schema.replace('\'', "''");
        let table = table.replace('\'', "''");
        format!(
            "SELECT kcu.column_name::text \
FROM information_schema.table_constraints tc \
JOIN information_schema.key_column_usage kcu \
ON tc.constraint_name = kcu.constraint_name \
AND tc.table_schema = kcu.table_schema \
AND tc.table_name = kcu.table_name \
WHERE tc.constraint_type = 'PRIMARY KEY' \
AND tc.table_schema = '{schema}' \
AND tc.table_name = '{table}' \
ORDER BY kcu.ordinal_position"
        )
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

    #[test]
    fn test_ddl_differs_from_postgres() {
        let d = RedshiftDialect::new();
        let ddl = |c: CanonicalType| d.canonical_to_ddl(&ColumnInfo::new("c", c)).unwrap();
        assert_eq!(ddl(CanonicalType::Text), "NVARCHAR(MAX)");
        assert_eq!(ddl(CanonicalType::Uuid), "VARCHAR(MAX)");
        assert_eq!(ddl(CanonicalType::Blob), "VARCHAR(MAX)");
        assert_eq!(ddl(CanonicalType::Money), "DECIMAL(19,4)");
    }

    #[test]
    fn test_decimal_precision_cap() {
        let d = RedshiftDialect::new();
        let fits = ColumnInfo::new("c", CanonicalType::Decimal).with_decimal(38, 10);
        assert_eq!(d.canonical_to_ddl(&fits).unwrap(), "DECIMAL(38,10)");
        let wide = ColumnInfo::new("c", CanonicalType::Decimal).with_decimal(60, 10);
        assert_eq!(d.canonical_to_ddl(&wide).unwrap(), "DOUBLE PRECISION");
    }

    #[test]
    fn test_binary_literal_is_plain_string() {
        let d = RedshiftDialect::new();
        assert_eq!(d.sql_value(CanonicalType::Blob, "dead").unwrap(), "'dead'");
        assert_eq!(d.sql_value(CanonicalType::Bool, "true").unwrap(), "true");
    }

    #[test]
    fn test_super_maps_to_json() {
        let d = RedshiftDialect::new();
        assert_eq!(d.driver_type_to_canonical("SUPER"), Some(CanonicalType::Json));
        assert_eq!(d.db_type_to_canonical("integer"), Some(CanonicalType::Int32));
    }
}
