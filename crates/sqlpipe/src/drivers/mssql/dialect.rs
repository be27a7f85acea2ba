//! Microsoft SQL Server dialect.
//!
//! Final files are written in the transfer's own delimiter and newline
//! because `bcp -c` is told both terminators on the command line. Empty
//! strings are written as a NUL byte, which bcp reads back as `''` rather
//! than NULL.

use crate::core::identifier::{escape_if_needed, quote_literal, schema_period_table};
use crate::core::schema::ColumnInfo;
use crate::core::traits::{BatchLimit, Dialect, FinalLayout};
use crate::core::value::SqlValue;
use crate::dialect::{ddl, format, CanonicalType};
use crate::error::{PipeError, Result};

/// Largest sized `nvarchar(n)`.
const MAX_NVARCHAR: i64 = 4000;

/// Largest sized `varchar(n)` / `varbinary(n)`.
const MAX_VARCHAR: i64 = 8000;

/// Largest DECIMAL precision.
const MAX_DECIMAL_PRECISION: i64 = 38;

/// Fractional-second digits kept by datetime2 and time.
const FRACTION_DIGITS: usize = 7;

/// T-SQL reserved keywords.
const RESERVED_KEYWORDS: &[&str] = &[
    "ADD", "ALL", "ALTER", "AND", "ANY", "AS", "ASC", "AUTHORIZATION", "BACKUP", "BEGIN",
    "BETWEEN", "BREAK", "BROWSE", "BULK", "BY", "CASCADE", "CASE", "CHECK", "CHECKPOINT",
    "CLOSE", "CLUSTERED", "COALESCE", "COLLATE", "COLUMN", "COMMIT", "COMPUTE", "CONSTRAINT",
    "CONTAINS", "CONTAINSTABLE", "CONTINUE", "CONVERT", "CREATE", "CROSS", "CURRENT",
    "CURRENT_DATE", "CURRENT_TIME", "CURRENT_TIMESTAMP", "CURRENT_USER", "CURSOR", "DATABASE",
    "DBCC", "DEALLOCATE", "DECLARE", "DEFAULT", "DELETE", "DENY", "DESC", "DISK", "DISTINCT",
    "DISTRIBUTED", "DOUBLE", "DROP", "DUMP", "ELSE", "END", "ERRLVL", "ESCAPE", "EXCEPT", "EXEC",
    "EXECUTE", "EXISTS", "EXIT", "EXTERNAL", "FETCH", "FILE", "FILLFACTOR", "FOR", "FOREIGN",
    "FREETEXT", "FREETEXTTABLE", "FROM", "FULL", "FUNCTION", "GOTO", "GRANT", "GROUP", "HAVING",
    "HOLDLOCK", "IDENTITY", "IDENTITY_INSERT", "IDENTITYCOL", "IF", "IN", "INDEX", "INNER",
    "INSERT", "INTERSECT", "INTO", "IS", "JOIN", "KEY", "KILL", "LEFT", "LIKE", "LINENO", "LOAD",
    "MERGE", "NATIONAL", "NOCHECK", "NONCLUSTERED", "NOT", "NULL", "NULLIF", "OF", "OFF",
    "OFFSETS", "ON", "OPEN", "OPENDATASOURCE", "OPENQUERY", "OPENROWSET", "OPENXML", "OPTION",
    "OR", "ORDER", "OUTER", "OVER", "PERCENT", "PIVOT", "PLAN", "PRECISION", "PRIMARY", "PRINT",
    "PROC", "PROCEDURE", "PUBLIC", "RAISERROR", "RANGE", "READ", "READTEXT", "RECONFIGURE",
    "REFERENCES", "REPLICATION", "RESTORE", "RESTRICT", "RETURN", "REVERT", "REVOKE", "RIGHT",
    "ROLLBACK", "ROWCOUNT", "ROWGUIDCOL", "RULE", "SAVE", "SCHEMA", "SECURITYAUDIT", "SELECT",
    "SEMANTICKEYPHRASETABLE", "SEMANTICSIMILARITYDETAILSTABLE", "SEMANTICSIMILARITYTABLE",
    "SESSION_USER", "SET", "SETUSER", "SHUTDOWN", "SOME", "STATISTICS", "SYSTEM_USER", "TABLE",
    "TABLESAMPLE", "TEXTSIZE", "THEN", "TO", "TOP", "TRAN", "TRANSACTION", "TRIGGER", "TRUNCATE",
    "TRY_CONVERT", "TSEQUAL", "UNION", "UNIQUE", "UNPIVOT", "UPDATE", "UPDATETEXT", "USE", "USER",
    "VALUES", "VARYING", "VIEW", "WAITFOR", "WHEN", "WHERE", "WHILE", "WITH", "WRITETEXT",
];

/// SQL Server dialect implementation.
#[derive(Debug, Clone, Default)]
pub struct MssqlDialect;

impl MssqlDialect {
    /// Create a new MSSQL dialect instance.
    pub fn new() -> Self {
        Self
    }
}

/// Uppercase UUID text from the 16 bytes SQL Server stores.
///
/// The first three groups are little-endian on the wire.
pub(crate) fn mssql_uuid_from_bytes(b: &[u8]) -> Option<String> {
    if b.len() != 16 {
        return None;
    }
    Some(format!(
        "{:02X}{:02X}{:02X}{:02X}-{:02X}{:02X}-{:02X}{:02X}-{:02X}{:02X}-{}",
        b[3],
        b[2],
        b[1],
        b[0],
        b[5],
        b[4],
        b[7],
        b[6],
        b[8],
        b[9],
        hex::encode_upper(&b[10..])
    ))
}

/// `(n)` or `(max)` for a sized type whose largest bounded form is `limit`.
fn sized(base: &str, length: Option<i64>, limit: i64) -> String {
    match length {
        Some(n) if n > 0 && n <= limit => format!("{}({})", base, n),
        _ => format!("{}(max)", base),
    }
}

fn quote_unicode(value: &str) -> String {
    format!("N{}", quote_literal(value))
}

impl Dialect for MssqlDialect {
    fn name(&self) -> &'static str {
        "mssql"
    }

    fn quote_chars(&self) -> (char, char) {
        ('[', ']')
    }

    fn is_reserved_keyword(&self, name: &str) -> bool {
        RESERVED_KEYWORDS
            .iter()
            .any(|k| k.eq_ignore_ascii_case(name))
    }

    fn schema_required(&self) -> bool {
        true
    }

    fn driver_type_to_canonical(&self, native: &str) -> Option<CanonicalType> {
        use CanonicalType::*;
        let canonical = match native {
            "NVARCHAR" | "NCHAR" => Nvarchar,
            "VARCHAR" | "CHAR" => Varchar,
            "NTEXT" => Ntext,
            "TEXT" => Text,
            "BIGINT" => Int64,
            "INT" => Int32,
            "SMALLINT" | "TINYINT" => Int16,
            "FLOAT" => Float64,
            "REAL" => Float32,
            "DECIMAL" | "NUMERIC" => Decimal,
            "MONEY" | "SMALLMONEY" => Money,
            "DATETIME2" | "DATETIME" | "SMALLDATETIME" => Datetime,
            "DATETIMEOFFSET" => Datetimetz,
            "DATE" => Date,
            "TIME" => Time,
            "BINARY" => Varbinary,
            "VARBINARY" | "IMAGE" => Blob,
            "UNIQUEIDENTIFIER" => Uuid,
            "BIT" => Bool,
            "XML" => Xml,
            _ => return None,
        };
        Some(canonical)
    }

    fn db_type_to_canonical(&self, catalog: &str) -> Option<CanonicalType> {
        match catalog {
            "timestamp" | "rowversion" => Some(CanonicalType::Varbinary),
            other => self.driver_type_to_canonical(&other.to_uppercase()),
        }
    }

    fn canonical_to_ddl(&self, column: &ColumnInfo) -> Result<String> {
        use CanonicalType::*;
        let ddl = match column.canonical {
            Nvarchar | Json => sized("nvarchar", column.length, MAX_NVARCHAR),
            Varchar | Varbit => sized("varchar", column.length, MAX_VARCHAR),
            Ntext => "nvarchar(max)".to_string(),
            Text => "varchar(max)".to_string(),
            Int64 => "bigint".to_string(),
            Int32 => "integer".to_string(),
            Int16 => "smallint".to_string(),
            Float64 => "float".to_string(),
            Float32 => "real".to_string(),
            Decimal => match column.decimal {
                Some((p, s))
                    if p > 0 && p <= MAX_DECIMAL_PRECISION && s >= 0 && p > s =>
                {
                    format!("decimal({},{})", p, s)
                }
                _ => "float".to_string(),
            },
            Money => "money".to_string(),
            Datetime | Datetimetz => "datetime2".to_string(),
            Date => "date".to_string(),
            Time => "time".to_string(),
            Varbinary => sized("varbinary", column.length, MAX_VARCHAR),
            Blob => "varbinary(max)".to_string(),
            Uuid => "uniqueidentifier".to_string(),
            Bool => "bit".to_string(),
            Xml => "xml".to_string(),
        };
        Ok(ddl)
    }

    fn pipe_value(&self, canonical: CanonicalType, value: &SqlValue<'_>) -> Result<String> {
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
            Uuid => match value {
                SqlValue::Bytes(b) => mssql_uuid_from_bytes(b).ok_or_else(|| {
                    PipeError::format(canonical, value.to_string(), "expected 16 bytes")
                }),
                _ => Ok(format::uuid(canonical, value)?.to_uppercase()),
            },
            Bool => format::boolean(canonical, value),
            Json => format::json(canonical, value),
            Varbit => format::bits(canonical, value),
        }
    }

    fn final_value(&self, canonical: CanonicalType, value: &str) -> Result<String> {
        use CanonicalType::*;
        match canonical {
            Nvarchar | Varchar | Ntext | Text | Json | Xml if value.is_empty() => {
                Ok("\u{0}".to_string())
            }
            Datetime => Ok(format::datetime_trimmed(
                &format::wall_clock(&format::parse_timestamp(canonical, value)?),
                FRACTION_DIGITS,
            )),
            Datetimetz => Ok(format::datetime_trimmed(
                &format::utc(&format::parse_timestamp(canonical, value)?),
                FRACTION_DIGITS,
            )),
            Date => Ok(format::parse_date(canonical, value)?
                .format("%Y-%m-%d")
                .to_string()),
            Time => Ok(format::time_trimmed(
                &format::parse_time(canonical, value)?,
                FRACTION_DIGITS,
            )),
            Bool => Ok(if format::parse_bool(canonical, value)? { "1" } else { "0" }.to_string()),
            Nvarchar | Varchar | Ntext | Text | Json | Xml | Int16 | Int32 | Int64 | Float32
            | Float64 | Decimal | Money | Varbinary | Blob | Uuid | Varbit => Ok(value.to_string()),
        }
    }

    fn sql_value(&self, canonical: CanonicalType, value: &str) -> Result<String> {
        use CanonicalType::*;
        match canonical {
            Nvarchar | Ntext | Json | Xml => Ok(quote_unicode(value)),
            Varchar | Text | Uuid | Varbit => Ok(quote_literal(value)),
            Int16 | Int32 | Int64 | Float32 | Float64 | Decimal | Money => Ok(value.to_string()),
            Datetime | Datetimetz | Date | Time => Ok(quote_literal(&self.final_value(canonical, value)?)),
            Varbinary | Blob => Ok(format!("0x{}", value)),
            Bool => self.final_value(canonical, value),
        }
    }

    fn final_layout(&self) -> FinalLayout {
        FinalLayout::Delimited
    }

    fn bulk_loader(&self) -> Option<&'static str> {
        Some("bcp")
    }

    fn insert_batch_limit(&self) -> BatchLimit {
        // SQL Server rejects more than 1000 row value expressions
        BatchLimit::Rows(1000)
    }

    fn supports_row_values(&self) -> bool {
        false
    }

    fn create_schema_sql(&self, schema: &str) -> String {
        let create = format!("CREATE SCHEMA {}", escape_if_needed(schema, self));
        format!(
            "IF NOT EXISTS (SELECT * FROM sys.schemas WHERE name = '{}') BEGIN EXEC('{}') END",
            schema.replace('\'', "''"),
            create.replace('\'', "''")
        )
    }

    fn create_table_sql(
        &self,
        schema: &str,
        table: &str,
        columns: &[ColumnInfo],
        incremental: bool,
    ) -> Result<String> {
        let body = ddl::column_definitions(columns, incremental, self)?;
        Ok(format!(
            "IF NOT EXISTS (SELECT * FROM sys.tables WHERE name = '{}' AND schema_id = SCHEMA_ID('{}')) \
BEGIN CREATE TABLE {} ({}) END",
            table.replace('\'', "''"),
            schema.replace('\'', "''"),
            schema_period_table(schema, table, self, true),
            body
        ))
    }

    fn primary_keys_sql(&self, schema: &str, table: &str) -> String {
        format!(
            "SELECT c.name \
FROM sys.indexes AS i \
JOIN sys.index_columns AS ic ON i.object_id = ic.object_id AND i.index_id = ic.index_id \
JOIN sys.columns AS c ON ic.object_id = c.object_id AND ic.column_id = c.column_id \
WHERE i.is_primary_key = 1 AND i.object_id = OBJECT_ID('{}') \
ORDER BY ic.key_ordinal",
            schema_period_table(schema, table, self, true).replace('\'', "''")
        )
    }

    fn column_infos_sql(&self, schema: &str, table: &str) -> String {
        let schema = schema.replace('\'', "''");
        let table = table.replace('\'', "''");
        format!(
            "WITH pks AS ( \
SELECT kcu.COLUMN_NAME FROM INFORMATION_SCHEMA.TABLE_CONSTRAINTS AS tc \
JOIN INFORMATION_SCHEMA.KEY_COLUMN_USAGE AS kcu \
ON tc.CONSTRAINT_NAME = kcu.CONSTRAINT_NAME AND tc.TABLE_SCHEMA = kcu.TABLE_SCHEMA \
WHERE tc.CONSTRAINT_TYPE = 'PRIMARY KEY' AND tc.TABLE_SCHEMA = '{schema}' AND tc.TABLE_NAME = '{table}') \
SELECT c.COLUMN_NAME AS col_name, c.DATA_TYPE AS col_type, \
CAST(COALESCE(c.NUMERIC_PRECISION, -1) AS INT) AS col_precision, \
CAST(COALESCE(c.NUMERIC_SCALE, -1) AS INT) AS col_scale, \
CAST(COALESCE(c.CHARACTER_MAXIMUM_LENGTH, -1) AS INT) AS col_length, \
CAST(CASE WHEN pks.COLUMN_NAME IS NULL THEN 0 ELSE 1 END AS INT) AS col_is_primary \
FROM INFORMATION_SCHEMA.COLUMNS AS c \
LEFT JOIN pks ON c.COLUMN_NAME = pks.COLUMN_NAME \
WHERE c.TABLE_SCHEMA = '{schema}' AND c.TABLE_NAME = '{table}' \
ORDER BY c.ORDINAL_POSITION"
        )
    }

    fn is_table_not_found_error(&self, message: &str) -> bool {
        message.contains("Invalid object name")
    }

    fn as_dyn(&self) -> &dyn Dialect {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uuid_byte_order() {
        let bytes: Vec<u8> = (1..=16).collect();
        assert_eq!(
            mssql_uuid_from_bytes(&bytes).unwrap(),
            "04030201-0605-0807-090A-0B0C0D0E0F10"
        );
        assert!(mssql_uuid_from_bytes(&bytes[..4]).is_none());

        let d = MssqlDialect::new();
        let value = SqlValue::bytes(bytes);
        assert_eq!(
            d.pipe_value(CanonicalType::Uuid, &value).unwrap(),
            "04030201-0605-0807-090A-0B0C0D0E0F10"
        );
    }

    #[test]
    fn test_escaping() {
        let d = MssqlDialect::new();
        assert_eq!(escape_if_needed("order", &d), "[order]");
        assert_eq!(escape_if_needed("a]b", &d), "[a]]b]");
        assert_eq!(escape_if_needed("customers", &d), "customers");
    }

    #[test]
    fn test_sized_ddl() {
        let d = MssqlDialect::new();
        let col = |ty, len| ColumnInfo::new("c", ty).with_length(len);
        assert_eq!(d.canonical_to_ddl(&col(CanonicalType::Nvarchar, 50)).unwrap(), "nvarchar(50)");
        assert_eq!(d.canonical_to_ddl(&col(CanonicalType::Nvarchar, 5000)).unwrap(), "nvarchar(max)");
        assert_eq!(d.canonical_to_ddl(&col(CanonicalType::Varchar, 8000)).unwrap(), "varchar(8000)");
        assert_eq!(d.canonical_to_ddl(&col(CanonicalType::Varbinary, 0)).unwrap(), "varbinary(max)");
        assert_eq!(
            d.canonical_to_ddl(&ColumnInfo::new("c", CanonicalType::Nvarchar)).unwrap(),
            "nvarchar(max)"
        );
        let dec = ColumnInfo::new("c", CanonicalType::Decimal).with_decimal(40, 2);
        assert_eq!(d.canonical_to_ddl(&dec).unwrap(), "float");
    }

    #[test]
    fn test_final_values() {
        let d = MssqlDialect::new();
        assert_eq!(d.final_value(CanonicalType::Nvarchar, "").unwrap(), "\u{0}");
        assert_eq!(d.final_value(CanonicalType::Nvarchar, "x").unwrap(), "x");
        assert_eq!(d.final_value(CanonicalType::Bool, "true").unwrap(), "1");
        assert_eq!(
            d.final_value(CanonicalType::Datetimetz, "2024-01-01T02:00:00.123456789+02:00")
                .unwrap(),
            "2024-01-01 00:00:00.1234567"
        );
        assert_eq!(d.final_null("{nll}"), "");
        assert_eq!(d.final_layout(), FinalLayout::Delimited);
    }

    #[test]
    fn test_sql_values() {
        let d = MssqlDialect::new();
        assert_eq!(d.sql_value(CanonicalType::Nvarchar, "it's").unwrap(), "N'it''s'");
        assert_eq!(d.sql_value(CanonicalType::Blob, "beef").unwrap(), "0xbeef");
        assert_eq!(d.sql_value(CanonicalType::Bool, "false").unwrap(), "0");
    }

    #[test]
    fn test_create_statements() {
        let d = MssqlDialect::new();
        assert_eq!(
            d.create_schema_sql("sales"),
            "IF NOT EXISTS (SELECT * FROM sys.schemas WHERE name = 'sales') BEGIN EXEC('CREATE SCHEMA sales') END"
        );
        let cols = vec![ColumnInfo::new("id", CanonicalType::Int64)];
        let sql = d.create_table_sql("dbo", "t", &cols, false).unwrap();
        assert!(sql.starts_with("IF NOT EXISTS (SELECT * FROM sys.tables WHERE name = 't'"));
        assert!(sql.ends_with("BEGIN CREATE TABLE dbo.t (id bigint) END"));
    }

    #[test]
    fn test_type_maps() {
        let d = MssqlDialect::new();
        assert_eq!(d.db_type_to_canonical("uniqueidentifier"), Some(CanonicalType::Uuid));
        assert_eq!(d.db_type_to_canonical("timestamp"), Some(CanonicalType::Varbinary));
        assert_eq!(d.driver_type_to_canonical("DATETIMEOFFSET"), Some(CanonicalType::Datetimetz));
        assert_eq!(d.driver_type_to_canonical("SQL_VARIANT"), None);
        assert!(d.is_table_not_found_error("Invalid object name 'dbo.t'."));
    }
}
